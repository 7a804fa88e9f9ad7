use sea_orm::entity::prelude::*;

/// Discriminator stored next to `related_id` on tasks and interactions.
#[derive(Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Hash)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
pub enum RelatedKind {
    #[sea_orm(string_value = "company")]
    Company,
    #[sea_orm(string_value = "contact")]
    Contact,
    #[sea_orm(string_value = "deal")]
    Deal,
}
