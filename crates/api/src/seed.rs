//! Demo dataset used by `server seed` and the integration tests.

use chrono::{Duration, Utc};
use entity::deal::{LostReason, Stage};
use entity::{company, contact, deal, interaction, task};
use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait, QueryOrder};
use tracing::info;
use uuid::Uuid;

use crate::activity::{create_task, log_interaction, NewInteraction, NewTask};
use crate::actor::Actor;
use crate::directory::{create_company, create_contact, NewCompany, NewContact};
use crate::error::CrmResult;
use crate::lifecycle::{create_deal, get_deal, transition_deal, NewDeal, TransitionRequest};
use crate::related::RelatedEntityRef;

/// Actor recorded on seeded rows.
pub const SEED_ACTOR: Actor = Actor {
    user_id: Uuid::from_u128(0x5eed_0000_0000_4000_8000_0000_0000_0001),
};

#[derive(Debug, Clone, Default)]
pub struct SeededCrmRecords {
    pub companies: Vec<company::Model>,
    pub contacts: Vec<contact::Model>,
    pub deals: Vec<deal::Model>,
}

impl SeededCrmRecords {
    pub fn company_named(&self, name: &str) -> Option<&company::Model> {
        self.companies.iter().find(|c| c.name == name)
    }

    pub fn contact_email(&self, email: &str) -> Option<&contact::Model> {
        self.contacts.iter().find(|c| c.email == email)
    }

    pub fn deal_titled(&self, title: &str) -> Option<&deal::Model> {
        self.deals.iter().find(|d| d.title == title)
    }
}

/// Inserts the demo companies, contacts and deals. When companies already
/// exist nothing is written and the current rows are returned.
pub async fn seed_crm_demo(db: &DatabaseConnection) -> CrmResult<SeededCrmRecords> {
    if company::Entity::find().count(db).await? > 0 {
        info!("crm data present, skipping seed");
        return Ok(SeededCrmRecords {
            companies: company::Entity::find()
                .order_by_asc(company::Column::Name)
                .all(db)
                .await?,
            contacts: contact::Entity::find()
                .order_by_asc(contact::Column::Email)
                .all(db)
                .await?,
            deals: deal::Entity::find()
                .order_by_asc(deal::Column::DealCode)
                .all(db)
                .await?,
        });
    }

    let acme = create_company(
        db,
        NewCompany {
            name: "ACME, Inc.".into(),
            website: Some("https://acme.test".into()),
            industry: Some("Manufacturing".into()),
        },
    )
    .await?;
    let globex = create_company(
        db,
        NewCompany {
            name: "Globex".into(),
            website: Some("https://globex.test".into()),
            industry: Some("Logistics".into()),
        },
    )
    .await?;

    let ana = create_contact(
        db,
        NewContact {
            first_name: "Ana".into(),
            last_name: "Ng".into(),
            email: "ana@acme.test".into(),
            phone: Some("+1-555-0100".into()),
            company_id: Some(acme.id),
        },
    )
    .await?;
    let hank = create_contact(
        db,
        NewContact {
            first_name: "Hank".into(),
            last_name: "Scorpio".into(),
            email: "hank@globex.test".into(),
            phone: None,
            company_id: Some(globex.id),
        },
    )
    .await?;

    let today = Utc::now().date_naive();
    let mut rollout = NewDeal::new("ACME Pilot Rollout", acme.id, 1_250_000);
    rollout.contact_id = Some(ana.id);
    rollout.expected_close_date = Some(today + Duration::days(21));
    let rollout = create_deal(db, rollout, SEED_ACTOR).await?;
    transition_deal(
        db,
        rollout.id,
        TransitionRequest::to(Stage::Qualified).with_note("Budget confirmed"),
        SEED_ACTOR,
    )
    .await?;
    transition_deal(db, rollout.id, TransitionRequest::to(Stage::Proposal), SEED_ACTOR).await?;

    let mut renewal = NewDeal::new("Globex Support Renewal", globex.id, 480_000);
    renewal.contact_id = Some(hank.id);
    renewal.expected_close_date = Some(today + Duration::days(50));
    let renewal = create_deal(db, renewal, SEED_ACTOR).await?;
    transition_deal(db, renewal.id, TransitionRequest::to(Stage::Negotiation), SEED_ACTOR).await?;

    let expansion = create_deal(
        db,
        NewDeal::new("ACME Warehouse Expansion", acme.id, 2_000_000),
        SEED_ACTOR,
    )
    .await?;
    transition_deal(
        db,
        expansion.id,
        TransitionRequest::to(Stage::ClosedLost)
            .lost(LostReason::Competitor, Some("Went with an incumbent".into())),
        SEED_ACTOR,
    )
    .await?;

    let mut follow_up = NewTask::new("Send revised proposal");
    follow_up.priority = task::Priority::High;
    follow_up.due_at = Some(Utc::now() + Duration::days(3));
    follow_up.related = Some(RelatedEntityRef::deal(rollout.id));
    create_task(db, follow_up, SEED_ACTOR).await?;

    log_interaction(
        db,
        NewInteraction {
            kind: interaction::Kind::Call,
            subject: "Kickoff call".into(),
            summary: Some("Walked through rollout plan".into()),
            occurred_at: None,
            related: Some(RelatedEntityRef::contact(ana.id)),
        },
        SEED_ACTOR,
    )
    .await?;

    let deals = vec![
        get_deal(db, rollout.id).await?,
        get_deal(db, renewal.id).await?,
        get_deal(db, expansion.id).await?,
    ];
    info!(deals = deals.len(), "crm demo data seeded");
    Ok(SeededCrmRecords {
        companies: vec![acme, globex],
        contacts: vec![ana, hank],
        deals,
    })
}
