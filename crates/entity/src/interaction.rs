use sea_orm::entity::prelude::*;

use crate::related::RelatedKind;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "interaction")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub kind: Kind,
    pub subject: String,
    pub summary: Option<String>,
    #[sea_orm(indexed)]
    pub occurred_at: DateTimeWithTimeZone,
    pub related_kind: Option<RelatedKind>,
    #[sea_orm(indexed)]
    pub related_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
pub enum Kind {
    #[sea_orm(string_value = "call")]
    Call,
    #[sea_orm(string_value = "email")]
    Email,
    #[sea_orm(string_value = "meeting")]
    Meeting,
    #[sea_orm(string_value = "note")]
    Note,
    #[sea_orm(string_value = "other")]
    Other,
}

impl ActiveModelBehavior for ActiveModel {}
