use entity::deal;
use entity::related::RelatedKind;
use sea_orm::{ConnectionTrait, EntityTrait};
use uuid::Uuid;

use crate::directory::{ensure_company_active, ensure_contact_active};
use crate::error::{CrmError, CrmResult, ValidationError};

/// Pointer from a task or interaction to the record it is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelatedEntityRef {
    pub kind: RelatedKind,
    pub id: Uuid,
}

impl RelatedEntityRef {
    pub fn company(id: Uuid) -> Self {
        Self {
            kind: RelatedKind::Company,
            id,
        }
    }

    pub fn contact(id: Uuid) -> Self {
        Self {
            kind: RelatedKind::Contact,
            id,
        }
    }

    pub fn deal(id: Uuid) -> Self {
        Self {
            kind: RelatedKind::Deal,
            id,
        }
    }

    /// Picks the single target out of separate optional ids; more than one is an error.
    pub fn from_exclusive(
        company_id: Option<Uuid>,
        contact_id: Option<Uuid>,
        deal_id: Option<Uuid>,
    ) -> Result<Option<Self>, ValidationError> {
        let candidates = [
            company_id.map(Self::company),
            contact_id.map(Self::contact),
            deal_id.map(Self::deal),
        ];
        let mut chosen = candidates.into_iter().flatten();
        let first = chosen.next();
        if chosen.next().is_some() {
            return Err(ValidationError::Invalid(
                "a record can relate to at most one of company, contact or deal".into(),
            ));
        }
        Ok(first)
    }

    /// Rebuilds the pointer from its two stored columns.
    pub fn from_columns(kind: Option<RelatedKind>, id: Option<Uuid>) -> Option<Self> {
        match (kind, id) {
            (Some(kind), Some(id)) => Some(Self { kind, id }),
            _ => None,
        }
    }

    pub fn into_columns(target: Option<Self>) -> (Option<RelatedKind>, Option<Uuid>) {
        match target {
            Some(target) => (Some(target.kind), Some(target.id)),
            None => (None, None),
        }
    }

    /// Fails with `NotFound` unless the target exists and is active.
    pub async fn ensure_exists<C>(&self, conn: &C) -> CrmResult<()>
    where
        C: ConnectionTrait,
    {
        match self.kind {
            RelatedKind::Company => ensure_company_active(conn, self.id).await.map(|_| ()),
            RelatedKind::Contact => ensure_contact_active(conn, self.id).await.map(|_| ()),
            RelatedKind::Deal => deal::Entity::find_by_id(self.id)
                .one(conn)
                .await?
                .filter(|deal| deal.is_active)
                .map(|_| ())
                .ok_or(CrmError::NotFound("deal")),
        }
    }
}
