pub use sea_orm_migration::prelude::*;

mod m20251201_100000_crm_core;
mod m20251201_110000_deal_lifecycle;
mod m20251201_120000_crm_activity;

pub struct Migrator;
#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251201_100000_crm_core::Migration),
            Box::new(m20251201_110000_deal_lifecycle::Migration),
            Box::new(m20251201_120000_crm_activity::Migration),
        ]
    }
}
