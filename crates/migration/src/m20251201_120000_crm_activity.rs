use sea_orm_migration::prelude::*;
use sea_query::SimpleExpr;

#[derive(DeriveIden, Copy, Clone)]
enum Task {
    Table,
    Id,
    Title,
    Description,
    Status,
    Priority,
    DueAt,
    CompletedAt,
    RelatedKind,
    RelatedId,
    AssignedUserId,
    CreatedBy,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden, Copy, Clone)]
enum Interaction {
    Table,
    Id,
    Kind,
    Subject,
    Summary,
    OccurredAt,
    RelatedKind,
    RelatedId,
    CreatedBy,
    CreatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Task::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Task::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Task::Title).string_len(200).not_null())
                    .col(ColumnDef::new(Task::Description).text())
                    .col(
                        ColumnDef::new(Task::Status)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Task::Priority)
                            .string_len(10)
                            .not_null()
                            .default("medium"),
                    )
                    .col(ColumnDef::new(Task::DueAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Task::CompletedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Task::RelatedKind).string_len(16))
                    .col(ColumnDef::new(Task::RelatedId).uuid())
                    .col(ColumnDef::new(Task::AssignedUserId).uuid())
                    .col(ColumnDef::new(Task::CreatedBy).uuid())
                    .col(
                        ColumnDef::new(Task::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Task::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Task::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .check(related_pair_check())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_task_status")
                    .table(Task::Table)
                    .col(Task::Status)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_task_due_at")
                    .table(Task::Table)
                    .col(Task::DueAt)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_task_related")
                    .table(Task::Table)
                    .col(Task::RelatedKind)
                    .col(Task::RelatedId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Interaction::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Interaction::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Interaction::Kind).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Interaction::Subject)
                            .string_len(200)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Interaction::Summary).text())
                    .col(
                        ColumnDef::new(Interaction::OccurredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Interaction::RelatedKind).string_len(16))
                    .col(ColumnDef::new(Interaction::RelatedId).uuid())
                    .col(ColumnDef::new(Interaction::CreatedBy).uuid())
                    .col(
                        ColumnDef::new(Interaction::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .check(related_pair_check())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_interaction_related")
                    .table(Interaction::Table)
                    .col(Interaction::RelatedKind)
                    .col(Interaction::RelatedId)
                    .col(Interaction::OccurredAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Interaction::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Task::Table).to_owned())
            .await
    }
}

/// `related_kind` and `related_id` are either both set or both null.
fn related_pair_check() -> SimpleExpr {
    Expr::cust("((related_kind IS NULL) = (related_id IS NULL))")
}
