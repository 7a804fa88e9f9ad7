use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Deal {
    Table,
    Id,
    DealCode,
    Title,
    AmountCents,
    Currency,
    Stage,
    Probability,
    ForecastCategory,
    ExpectedCloseDate,
    ActualCloseDate,
    LostReason,
    LostNotes,
    CompanyId,
    ContactId,
    Notes,
    AssignedUserId,
    CreatedBy,
    UpdatedBy,
    Version,
    IsActive,
    DeletedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DealStageHistory {
    Table,
    Id,
    DealId,
    FromStage,
    ToStage,
    ChangedBy,
    ChangedAt,
    Note,
    DealVersion,
}

#[derive(DeriveIden)]
enum DealCodeSequence {
    Table,
    Year,
    LastValue,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Company {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Contact {
    Table,
    Id,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Deal::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Deal::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Deal::DealCode).string_len(50).not_null())
                    .col(ColumnDef::new(Deal::Title).string_len(200).not_null())
                    .col(
                        ColumnDef::new(Deal::AmountCents)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Deal::Currency)
                            .string_len(3)
                            .not_null()
                            .default("USD"),
                    )
                    .col(
                        ColumnDef::new(Deal::Stage)
                            .string_len(20)
                            .not_null()
                            .default("lead"),
                    )
                    .col(
                        ColumnDef::new(Deal::Probability)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Deal::ForecastCategory)
                            .string_len(20)
                            .not_null()
                            .default("pipeline"),
                    )
                    .col(ColumnDef::new(Deal::ExpectedCloseDate).date())
                    .col(ColumnDef::new(Deal::ActualCloseDate).date())
                    .col(ColumnDef::new(Deal::LostReason).string_len(20))
                    .col(ColumnDef::new(Deal::LostNotes).text())
                    .col(ColumnDef::new(Deal::CompanyId).uuid().not_null())
                    .col(ColumnDef::new(Deal::ContactId).uuid())
                    .col(ColumnDef::new(Deal::Notes).text())
                    .col(ColumnDef::new(Deal::AssignedUserId).uuid())
                    .col(ColumnDef::new(Deal::CreatedBy).uuid())
                    .col(ColumnDef::new(Deal::UpdatedBy).uuid())
                    .col(
                        ColumnDef::new(Deal::Version)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Deal::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Deal::DeletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Deal::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Deal::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .check(Expr::col(Deal::Probability).between(0, 100))
                    .check(Expr::col(Deal::AmountCents).gte(0))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_company")
                            .from(Deal::Table, Deal::CompanyId)
                            .to(Company::Table, Company::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_contact")
                            .from(Deal::Table, Deal::ContactId)
                            .to(Contact::Table, Contact::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Backstop for concurrent allocation: a duplicate code never commits.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_deal_code")
                    .table(Deal::Table)
                    .col(Deal::DealCode)
                    .unique()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deal_stage_close")
                    .table(Deal::Table)
                    .col(Deal::Stage)
                    .col(Deal::ExpectedCloseDate)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deal_company_stage")
                    .table(Deal::Table)
                    .col(Deal::CompanyId)
                    .col(Deal::Stage)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DealStageHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DealStageHistory::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DealStageHistory::DealId).uuid().not_null())
                    .col(
                        ColumnDef::new(DealStageHistory::FromStage)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DealStageHistory::ToStage)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DealStageHistory::ChangedBy).uuid())
                    .col(
                        ColumnDef::new(DealStageHistory::ChangedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DealStageHistory::Note).text())
                    .col(
                        ColumnDef::new(DealStageHistory::DealVersion)
                            .integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_stage_history_deal")
                            .from(DealStageHistory::Table, DealStageHistory::DealId)
                            .to(Deal::Table, Deal::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deal_stage_history_deal")
                    .table(DealStageHistory::Table)
                    .col(DealStageHistory::DealId)
                    .col(DealStageHistory::ChangedAt)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_deal_stage_history_version")
                    .table(DealStageHistory::Table)
                    .col(DealStageHistory::DealId)
                    .col(DealStageHistory::DealVersion)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DealCodeSequence::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DealCodeSequence::Year)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DealCodeSequence::LastValue)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DealCodeSequence::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DealCodeSequence::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DealStageHistory::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Deal::Table).to_owned())
            .await
    }
}
