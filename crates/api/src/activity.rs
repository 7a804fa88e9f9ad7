//! Tasks and logged interactions attached to a company, contact or deal.

use chrono::{DateTime, Duration, Utc};
use entity::{interaction, task};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::NullOrdering;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, Order, QueryFilter, QueryOrder, QuerySelect, Select, TransactionTrait,
};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::actor::Actor;
use crate::error::{CrmError, CrmResult, ValidationError};
use crate::related::RelatedEntityRef;
use crate::validation::{optional_text, require_text, NOTES_MAX, TITLE_MAX};

pub const MAX_TASKS_PAGE: u64 = 100;
pub const MAX_INTERACTIONS_PAGE: u64 = 100;
/// Horizon of [`list_upcoming_tasks`].
pub const UPCOMING_WINDOW_DAYS: i64 = 7;

const OPEN_STATUSES: [task::Status; 2] = [task::Status::Pending, task::Status::InProgress];

#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: task::Priority,
    pub due_at: Option<DateTime<Utc>>,
    pub related: Option<RelatedEntityRef>,
    pub assigned_user_id: Option<Uuid>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority: task::Priority::Medium,
            due_at: None,
            related: None,
            assigned_user_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewInteraction {
    pub kind: interaction::Kind,
    pub subject: String,
    pub summary: Option<String>,
    /// Defaults to the time of logging.
    pub occurred_at: Option<DateTime<Utc>>,
    pub related: Option<RelatedEntityRef>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskListQuery {
    pub related: Option<RelatedEntityRef>,
    pub assigned_user_id: Option<Uuid>,
    pub include_closed: bool,
    pub first: Option<u64>,
    pub offset: Option<u64>,
}

pub async fn create_task(
    db: &DatabaseConnection,
    input: NewTask,
    actor: Actor,
) -> CrmResult<task::Model> {
    create_task_at(db, input, actor, Utc::now()).await
}

pub async fn create_task_at(
    db: &DatabaseConnection,
    input: NewTask,
    actor: Actor,
    now: DateTime<Utc>,
) -> CrmResult<task::Model> {
    let span = info_span!("crm.tasks.create", actor = %actor.user_id);
    insert_task(db, input, actor, now).instrument(span).await
}

async fn insert_task(
    db: &DatabaseConnection,
    input: NewTask,
    actor: Actor,
    now: DateTime<Utc>,
) -> CrmResult<task::Model> {
    let title = require_text("title", &input.title, TITLE_MAX)?;
    let description = optional_text("description", input.description, NOTES_MAX)?;
    if input.due_at.is_some_and(|due| due < now) {
        return Err(ValidationError::DueInPast.into());
    }

    let txn = db.begin().await?;
    if let Some(target) = &input.related {
        target.ensure_exists(&txn).await?;
    }
    let (related_kind, related_id) = RelatedEntityRef::into_columns(input.related);
    let stamp: DateTimeWithTimeZone = now.into();
    let created = task::ActiveModel {
        id: Set(Uuid::new_v4()),
        title: Set(title),
        description: Set(description),
        status: Set(task::Status::Pending),
        priority: Set(input.priority),
        due_at: Set(input.due_at.map(Into::into)),
        completed_at: Set(None),
        related_kind: Set(related_kind),
        related_id: Set(related_id),
        assigned_user_id: Set(input.assigned_user_id),
        created_by: Set(Some(actor.user_id)),
        is_active: Set(true),
        created_at: Set(stamp),
        updated_at: Set(stamp),
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;
    info!(task_id = %created.id, "task created");
    Ok(created)
}

/// Marks a task completed. Completing an already completed task is a no-op.
pub async fn complete_task(
    db: &DatabaseConnection,
    task_id: Uuid,
    actor: Actor,
) -> CrmResult<task::Model> {
    let txn = db.begin().await?;
    let existing = task::Entity::find_by_id(task_id)
        .one(&txn)
        .await?
        .filter(|task| task.is_active)
        .ok_or(CrmError::NotFound("task"))?;
    if existing.status == task::Status::Completed {
        return Ok(existing);
    }

    let now: DateTimeWithTimeZone = Utc::now().into();
    let mut active: task::ActiveModel = existing.into();
    active.status = Set(task::Status::Completed);
    active.completed_at = Set(Some(now));
    active.updated_at = Set(now);
    let updated = active.update(&txn).await?;
    txn.commit().await?;
    info!(task_id = %updated.id, actor = %actor.user_id, "task completed");
    Ok(updated)
}

/// Reassigns a task. Assignees are opaque user ids.
pub async fn reassign_task(
    db: &DatabaseConnection,
    task_id: Uuid,
    assignee: Uuid,
    actor: Actor,
) -> CrmResult<task::Model> {
    let txn = db.begin().await?;
    let existing = task::Entity::find_by_id(task_id)
        .one(&txn)
        .await?
        .filter(|task| task.is_active)
        .ok_or(CrmError::NotFound("task"))?;
    let previous = existing.assigned_user_id;

    let mut active: task::ActiveModel = existing.into();
    active.assigned_user_id = Set(Some(assignee));
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&txn).await?;
    txn.commit().await?;
    info!(
        task_id = %updated.id,
        from = ?previous,
        to = %assignee,
        actor = %actor.user_id,
        "task reassigned"
    );
    Ok(updated)
}

/// Soonest due first, undated tasks last; ties newest first.
pub async fn list_tasks<C>(conn: &C, query: TaskListQuery) -> CrmResult<Vec<task::Model>>
where
    C: ConnectionTrait,
{
    let mut select = task::Entity::find().filter(task::Column::IsActive.eq(true));
    if let Some(target) = query.related {
        select = select
            .filter(task::Column::RelatedKind.eq(target.kind))
            .filter(task::Column::RelatedId.eq(target.id));
    }
    if let Some(assignee) = query.assigned_user_id {
        select = select.filter(task::Column::AssignedUserId.eq(assignee));
    }
    if !query.include_closed {
        select = select.filter(
            task::Column::Status.is_not_in([task::Status::Completed, task::Status::Cancelled]),
        );
    }
    let rows = select
        .order_by_with_nulls(task::Column::DueAt, Order::Asc, NullOrdering::Last)
        .order_by_desc(task::Column::CreatedAt)
        .limit(query.first.unwrap_or(MAX_TASKS_PAGE).min(MAX_TASKS_PAGE))
        .offset(query.offset.unwrap_or(0))
        .all(conn)
        .await?;
    Ok(rows)
}

/// Pending or in-progress tasks already past due, oldest due first.
pub async fn list_overdue_tasks<C>(
    conn: &C,
    now: DateTime<Utc>,
    first: Option<u64>,
) -> CrmResult<Vec<task::Model>>
where
    C: ConnectionTrait,
{
    let now: DateTimeWithTimeZone = now.into();
    let rows = open_by_due(first)
        .filter(task::Column::DueAt.lt(now))
        .all(conn)
        .await?;
    Ok(rows)
}

/// Pending or in-progress tasks due within [`UPCOMING_WINDOW_DAYS`] of `now`.
pub async fn list_upcoming_tasks<C>(
    conn: &C,
    now: DateTime<Utc>,
    first: Option<u64>,
) -> CrmResult<Vec<task::Model>>
where
    C: ConnectionTrait,
{
    let until: DateTimeWithTimeZone = (now + Duration::days(UPCOMING_WINDOW_DAYS)).into();
    let now: DateTimeWithTimeZone = now.into();
    let rows = open_by_due(first)
        .filter(task::Column::DueAt.gte(now))
        .filter(task::Column::DueAt.lte(until))
        .all(conn)
        .await?;
    Ok(rows)
}

fn open_by_due(first: Option<u64>) -> Select<task::Entity> {
    task::Entity::find()
        .filter(task::Column::IsActive.eq(true))
        .filter(task::Column::Status.is_in(OPEN_STATUSES))
        .order_by_asc(task::Column::DueAt)
        .order_by_asc(task::Column::CreatedAt)
        .limit(first.unwrap_or(MAX_TASKS_PAGE).min(MAX_TASKS_PAGE))
}

pub fn is_overdue(task: &task::Model, now: DateTime<Utc>) -> bool {
    let open = !matches!(
        task.status,
        task::Status::Completed | task::Status::Cancelled
    );
    open && task.due_at.is_some_and(|due| due < now)
}

pub fn days_overdue(task: &task::Model, now: DateTime<Utc>) -> i64 {
    match task.due_at {
        Some(due) if is_overdue(task, now) => (now - due.with_timezone(&Utc)).num_days().max(0),
        _ => 0,
    }
}

pub async fn log_interaction(
    db: &DatabaseConnection,
    input: NewInteraction,
    actor: Actor,
) -> CrmResult<interaction::Model> {
    let subject = require_text("subject", &input.subject, TITLE_MAX)?;
    let summary = optional_text("summary", input.summary, NOTES_MAX)?;
    let now = Utc::now();

    let txn = db.begin().await?;
    if let Some(target) = &input.related {
        target.ensure_exists(&txn).await?;
    }
    let (related_kind, related_id) = RelatedEntityRef::into_columns(input.related);
    let created = interaction::ActiveModel {
        id: Set(Uuid::new_v4()),
        kind: Set(input.kind),
        subject: Set(subject),
        summary: Set(summary),
        occurred_at: Set(input.occurred_at.unwrap_or(now).into()),
        related_kind: Set(related_kind),
        related_id: Set(related_id),
        created_by: Set(Some(actor.user_id)),
        created_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;
    info!(interaction_id = %created.id, actor = %actor.user_id, "interaction logged");
    Ok(created)
}

/// Interactions for one record, most recent first.
pub async fn list_interactions<C>(
    conn: &C,
    related: RelatedEntityRef,
    first: Option<u64>,
) -> CrmResult<Vec<interaction::Model>>
where
    C: ConnectionTrait,
{
    let rows = interaction::Entity::find()
        .filter(interaction::Column::RelatedKind.eq(related.kind))
        .filter(interaction::Column::RelatedId.eq(related.id))
        .order_by_desc(interaction::Column::OccurredAt)
        .limit(first.unwrap_or(MAX_INTERACTIONS_PAGE).min(MAX_INTERACTIONS_PAGE))
        .all(conn)
        .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn task_due(due: Option<DateTime<Utc>>, status: task::Status) -> task::Model {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        task::Model {
            id: Uuid::new_v4(),
            title: "Send proposal".into(),
            description: None,
            status,
            priority: task::Priority::High,
            due_at: due.map(Into::into),
            completed_at: None,
            related_kind: None,
            related_id: None,
            assigned_user_id: None,
            created_by: None,
            is_active: true,
            created_at: created.into(),
            updated_at: created.into(),
        }
    }

    #[test]
    fn only_open_tasks_past_due_are_overdue() {
        let now = Utc.with_ymd_and_hms(2024, 2, 10, 12, 0, 0).unwrap();
        let past = now - Duration::days(3);
        assert!(is_overdue(&task_due(Some(past), task::Status::Pending), now));
        assert!(is_overdue(&task_due(Some(past), task::Status::InProgress), now));
        assert!(!is_overdue(&task_due(Some(past), task::Status::Completed), now));
        assert!(!is_overdue(&task_due(Some(past), task::Status::Cancelled), now));
        assert!(!is_overdue(&task_due(None, task::Status::Pending), now));
        assert!(!is_overdue(
            &task_due(Some(now + Duration::hours(1)), task::Status::Pending),
            now
        ));
    }

    #[test]
    fn days_overdue_counts_full_days() {
        let now = Utc.with_ymd_and_hms(2024, 2, 10, 12, 0, 0).unwrap();
        let task = task_due(Some(now - Duration::hours(50)), task::Status::Pending);
        assert_eq!(days_overdue(&task, now), 2);
        let done = task_due(Some(now - Duration::hours(50)), task::Status::Completed);
        assert_eq!(days_overdue(&done, now), 0);
    }
}
