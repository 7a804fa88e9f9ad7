use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "deal")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique, indexed)]
    pub deal_code: String,
    pub title: String,
    pub amount_cents: i64,
    pub currency: String,
    #[sea_orm(indexed)]
    pub stage: Stage,
    pub probability: i16,
    pub forecast_category: ForecastCategory,
    pub expected_close_date: Option<Date>,
    pub actual_close_date: Option<Date>,
    pub lost_reason: Option<LostReason>,
    pub lost_notes: Option<String>,
    #[sea_orm(indexed)]
    pub company_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub notes: Option<String>,
    pub assigned_user_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub version: i32,
    pub is_active: bool,
    pub deleted_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::company::Entity",
        from = "Column::CompanyId",
        to = "super::company::Column::Id",
        on_delete = "Cascade"
    )]
    Company,
    #[sea_orm(
        belongs_to = "super::contact::Entity",
        from = "Column::ContactId",
        to = "super::contact::Column::Id",
        on_delete = "SetNull"
    )]
    Contact,
    #[sea_orm(has_many = "super::deal_stage_history::Entity")]
    StageHistory,
}

impl Related<super::company::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Company.def()
    }
}

impl Related<super::contact::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Contact.def()
    }
}

impl Related<super::deal_stage_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StageHistory.def()
    }
}

/// Pipeline stage, in board order.
#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Hash)]
#[sea_orm(rs_type = "String", db_type = "String(Some(20))")]
pub enum Stage {
    #[sea_orm(string_value = "lead")]
    Lead,
    #[sea_orm(string_value = "qualified")]
    Qualified,
    #[sea_orm(string_value = "proposal")]
    Proposal,
    #[sea_orm(string_value = "negotiation")]
    Negotiation,
    #[sea_orm(string_value = "closed_won")]
    ClosedWon,
    #[sea_orm(string_value = "closed_lost")]
    ClosedLost,
    #[sea_orm(string_value = "on_hold")]
    OnHold,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq)]
#[sea_orm(rs_type = "String", db_type = "String(Some(20))")]
pub enum ForecastCategory {
    #[sea_orm(string_value = "pipeline")]
    Pipeline,
    #[sea_orm(string_value = "best_case")]
    BestCase,
    #[sea_orm(string_value = "commit")]
    Commit,
    #[sea_orm(string_value = "closed")]
    Closed,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq)]
#[sea_orm(rs_type = "String", db_type = "String(Some(20))")]
pub enum LostReason {
    #[sea_orm(string_value = "price")]
    Price,
    #[sea_orm(string_value = "competitor")]
    Competitor,
    #[sea_orm(string_value = "timing")]
    Timing,
    #[sea_orm(string_value = "features")]
    Features,
    #[sea_orm(string_value = "other")]
    Other,
}

impl ActiveModelBehavior for ActiveModel {}
