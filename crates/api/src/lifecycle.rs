//! Deal lifecycle: creation, guarded edits, stage transitions and the audit trail.
//!
//! Every mutation builds the full candidate row, runs [`validate_deal`] on it and
//! only then writes, inside a single transaction. Deal rows are updated with a
//! `version` guard so a concurrent writer loses with [`CrmError::Conflict`]
//! instead of silently overwriting.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use entity::deal::{self, LostReason, Stage};
use entity::deal_stage_history;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::actor::Actor;
use crate::deal_code::allocate_deal_code;
use crate::directory::{ensure_company_active, ensure_contact_active};
use crate::error::{CrmError, CrmResult, TransitionError};
use crate::rules::{default_probability, forecast_category, is_terminal, stage_key};
use crate::validation::{
    normalize_currency, optional_text, require_text, validate_deal, NOTES_MAX, TITLE_MAX,
};

pub const DEFAULT_CURRENCY: &str = "USD";
pub const MAX_DEALS_PAGE: u64 = 100;

#[derive(Debug, Clone)]
pub struct NewDeal {
    pub title: String,
    pub company_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub amount_cents: i64,
    pub currency: Option<String>,
    /// Starting probability; must sit inside the lead band. Defaults to 0.
    pub probability: Option<i16>,
    pub expected_close_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub assigned_user_id: Option<Uuid>,
}

impl NewDeal {
    pub fn new(title: impl Into<String>, company_id: Uuid, amount_cents: i64) -> Self {
        Self {
            title: title.into(),
            company_id,
            contact_id: None,
            amount_cents,
            currency: None,
            probability: None,
            expected_close_date: None,
            notes: None,
            assigned_user_id: None,
        }
    }
}

/// Direct edits. `None` leaves a field alone; `Some(None)` clears a nullable one.
///
/// Stage and probability are deliberately absent: they only move through
/// [`transition_deal`].
#[derive(Debug, Clone, Default)]
pub struct DealChanges {
    pub title: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub expected_close_date: Option<Option<NaiveDate>>,
    pub contact_id: Option<Option<Uuid>>,
    pub notes: Option<Option<String>>,
    pub assigned_user_id: Option<Option<Uuid>>,
    /// When set, the edit is rejected with a conflict unless the stored
    /// version still matches.
    pub expected_version: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub stage: Stage,
    pub probability: Option<i16>,
    pub note: Option<String>,
    pub lost_reason: Option<LostReason>,
    pub lost_notes: Option<String>,
    pub expected_version: Option<i32>,
}

impl TransitionRequest {
    pub fn to(stage: Stage) -> Self {
        Self {
            stage,
            probability: None,
            note: None,
            lost_reason: None,
            lost_notes: None,
            expected_version: None,
        }
    }

    pub fn with_probability(mut self, probability: i16) -> Self {
        self.probability = Some(probability);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn lost(mut self, reason: LostReason, notes: Option<String>) -> Self {
        self.lost_reason = Some(reason);
        self.lost_notes = notes;
        self
    }

    pub fn at_version(mut self, version: i32) -> Self {
        self.expected_version = Some(version);
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DealListQuery {
    pub include_archived: bool,
    pub stage: Option<Stage>,
    pub first: Option<u64>,
    pub offset: Option<u64>,
}

pub async fn create_deal(
    db: &DatabaseConnection,
    input: NewDeal,
    actor: Actor,
) -> CrmResult<deal::Model> {
    create_deal_at(db, input, actor, Utc::now()).await
}

pub async fn create_deal_at(
    db: &DatabaseConnection,
    input: NewDeal,
    actor: Actor,
    now: DateTime<Utc>,
) -> CrmResult<deal::Model> {
    let span = info_span!(
        "crm.deals.create",
        company_id = %input.company_id,
        actor = %actor.user_id
    );
    insert_deal(db, input, actor, now).instrument(span).await
}

async fn insert_deal(
    db: &DatabaseConnection,
    input: NewDeal,
    actor: Actor,
    now: DateTime<Utc>,
) -> CrmResult<deal::Model> {
    let stamp: DateTimeWithTimeZone = now.into();
    let mut candidate = deal::Model {
        id: Uuid::new_v4(),
        deal_code: String::new(),
        title: require_text("title", &input.title, TITLE_MAX)?,
        amount_cents: input.amount_cents,
        currency: normalize_currency(input.currency.as_deref().unwrap_or(DEFAULT_CURRENCY))?,
        stage: Stage::Lead,
        probability: input.probability.unwrap_or(0),
        forecast_category: forecast_category(Stage::Lead),
        expected_close_date: input.expected_close_date,
        actual_close_date: None,
        lost_reason: None,
        lost_notes: None,
        company_id: input.company_id,
        contact_id: input.contact_id,
        notes: optional_text("notes", input.notes, NOTES_MAX)?,
        assigned_user_id: input.assigned_user_id,
        created_by: Some(actor.user_id),
        updated_by: Some(actor.user_id),
        version: 0,
        is_active: true,
        deleted_at: None,
        created_at: stamp,
        updated_at: stamp,
    };
    validate_deal(&candidate)?;

    let txn = db.begin().await?;
    ensure_company_active(&txn, candidate.company_id).await?;
    if let Some(contact_id) = candidate.contact_id {
        ensure_contact_active(&txn, contact_id).await?;
    }
    candidate.deal_code = allocate_deal_code(&txn, now.year()).await?;
    deal::Entity::insert(full_active_model(&candidate))
        .exec_without_returning(&txn)
        .await?;
    let created = load_deal(&txn, candidate.id).await?;
    txn.commit().await?;

    info!(deal_id = %created.id, deal_code = %created.deal_code, "deal created");
    Ok(created)
}

pub async fn update_deal(
    db: &DatabaseConnection,
    deal_id: Uuid,
    changes: DealChanges,
    actor: Actor,
) -> CrmResult<deal::Model> {
    let span = info_span!("crm.deals.update", deal_id = %deal_id, actor = %actor.user_id);
    apply_changes(db, deal_id, changes, actor).instrument(span).await
}

async fn apply_changes(
    db: &DatabaseConnection,
    deal_id: Uuid,
    changes: DealChanges,
    actor: Actor,
) -> CrmResult<deal::Model> {
    let txn = db.begin().await?;
    let existing = load_active_deal(&txn, deal_id).await?;
    check_version(&existing, changes.expected_version)?;

    let mut candidate = existing.clone();
    if let Some(title) = changes.title {
        candidate.title = require_text("title", &title, TITLE_MAX)?;
    }
    if let Some(amount_cents) = changes.amount_cents {
        candidate.amount_cents = amount_cents;
    }
    if let Some(currency) = changes.currency {
        candidate.currency = normalize_currency(&currency)?;
    }
    if let Some(expected_close_date) = changes.expected_close_date {
        candidate.expected_close_date = expected_close_date;
    }
    if let Some(contact_id) = changes.contact_id {
        if let Some(id) = contact_id {
            ensure_contact_active(&txn, id).await?;
        }
        candidate.contact_id = contact_id;
    }
    if let Some(notes) = changes.notes {
        candidate.notes = optional_text("notes", notes, NOTES_MAX)?;
    }
    if let Some(assigned_user_id) = changes.assigned_user_id {
        candidate.assigned_user_id = assigned_user_id;
    }
    candidate.updated_by = Some(actor.user_id);
    candidate.updated_at = Utc::now().into();
    candidate.version = existing.version + 1;
    validate_deal(&candidate)?;

    let updated = write_deal(&txn, &candidate, existing.version).await?;
    txn.commit().await?;
    info!(deal_code = %updated.deal_code, version = updated.version, "deal updated");
    Ok(updated)
}

/// Moves a deal to `request.stage`, recording the change in the stage history.
pub async fn transition_deal(
    db: &DatabaseConnection,
    deal_id: Uuid,
    request: TransitionRequest,
    actor: Actor,
) -> CrmResult<deal::Model> {
    transition_deal_at(db, deal_id, request, actor, Utc::now()).await
}

pub async fn transition_deal_at(
    db: &DatabaseConnection,
    deal_id: Uuid,
    request: TransitionRequest,
    actor: Actor,
    now: DateTime<Utc>,
) -> CrmResult<deal::Model> {
    let span = info_span!(
        "crm.deals.transition",
        deal_id = %deal_id,
        to = stage_key(request.stage),
        actor = %actor.user_id
    );
    apply_transition(db, deal_id, request, actor, now)
        .instrument(span)
        .await
}

async fn apply_transition(
    db: &DatabaseConnection,
    deal_id: Uuid,
    request: TransitionRequest,
    actor: Actor,
    now: DateTime<Utc>,
) -> CrmResult<deal::Model> {
    let txn = db.begin().await?;
    let planned = plan_transition(&txn, deal_id, request, actor, now).await?;
    let updated = write_transition(&txn, planned).await?;
    txn.commit().await?;
    Ok(updated)
}

/// A validated transition, bound to the deal version it was computed from.
#[derive(Debug, Clone)]
pub struct PlannedTransition {
    from_version: i32,
    candidate: deal::Model,
    history: deal_stage_history::Model,
}

impl PlannedTransition {
    pub fn from_version(&self) -> i32 {
        self.from_version
    }

    pub fn candidate(&self) -> &deal::Model {
        &self.candidate
    }
}

/// Reads the deal and builds the transitioned state without writing anything.
pub async fn plan_transition<C>(
    conn: &C,
    deal_id: Uuid,
    request: TransitionRequest,
    actor: Actor,
    now: DateTime<Utc>,
) -> CrmResult<PlannedTransition>
where
    C: ConnectionTrait,
{
    let existing = load_active_deal(conn, deal_id).await?;
    if is_terminal(existing.stage) {
        warn!(from = stage_key(existing.stage), "transition out of a closed deal refused");
        return Err(TransitionError::Terminal {
            from: existing.stage,
        }
        .into());
    }
    check_version(&existing, request.expected_version)?;

    let stamp: DateTimeWithTimeZone = now.into();
    let stage = request.stage;
    let mut candidate = existing.clone();
    candidate.stage = stage;
    candidate.probability = request
        .probability
        .unwrap_or_else(|| default_probability(stage));
    candidate.forecast_category = forecast_category(stage);
    if is_terminal(stage) {
        candidate.actual_close_date = Some(now.date_naive());
    }
    if stage == Stage::ClosedLost {
        candidate.lost_reason = request.lost_reason;
        candidate.lost_notes = optional_text("lostNotes", request.lost_notes, NOTES_MAX)?;
    }
    candidate.updated_by = Some(actor.user_id);
    candidate.updated_at = stamp;
    candidate.version = existing.version + 1;
    validate_deal(&candidate)?;
    let note = optional_text("note", request.note, NOTES_MAX)?;

    Ok(PlannedTransition {
        from_version: existing.version,
        history: deal_stage_history::Model {
            id: Uuid::new_v4(),
            deal_id,
            from_stage: existing.stage,
            to_stage: stage,
            changed_by: Some(actor.user_id),
            changed_at: stamp,
            note,
            deal_version: candidate.version,
        },
        candidate,
    })
}

/// Commits a planned transition in its own transaction.
///
/// Fails with `Conflict` when the deal moved past the planned version.
pub async fn commit_transition(
    db: &DatabaseConnection,
    planned: PlannedTransition,
) -> CrmResult<deal::Model> {
    let span = info_span!(
        "crm.deals.transition",
        deal_id = %planned.candidate.id,
        to = stage_key(planned.candidate.stage),
    );
    write_planned(db, planned).instrument(span).await
}

async fn write_planned(
    db: &DatabaseConnection,
    planned: PlannedTransition,
) -> CrmResult<deal::Model> {
    let txn = db.begin().await?;
    let updated = write_transition(&txn, planned).await?;
    txn.commit().await?;
    Ok(updated)
}

async fn write_transition<C>(conn: &C, planned: PlannedTransition) -> CrmResult<deal::Model>
where
    C: ConnectionTrait,
{
    let PlannedTransition {
        from_version,
        candidate,
        history,
    } = planned;
    let from = history.from_stage;
    let updated = write_deal(conn, &candidate, from_version).await?;
    deal_stage_history::Entity::insert(deal_stage_history::ActiveModel::from(history))
        .exec_without_returning(conn)
        .await?;

    info!(
        deal_code = %updated.deal_code,
        from = stage_key(from),
        probability = updated.probability,
        "deal stage changed"
    );
    Ok(updated)
}

/// Soft-deletes a deal. Archiving an archived deal is a no-op.
pub async fn archive_deal(
    db: &DatabaseConnection,
    deal_id: Uuid,
    actor: Actor,
) -> CrmResult<deal::Model> {
    set_active(db, deal_id, false, actor).await
}

pub async fn restore_deal(
    db: &DatabaseConnection,
    deal_id: Uuid,
    actor: Actor,
) -> CrmResult<deal::Model> {
    set_active(db, deal_id, true, actor).await
}

async fn set_active(
    db: &DatabaseConnection,
    deal_id: Uuid,
    active: bool,
    actor: Actor,
) -> CrmResult<deal::Model> {
    let txn = db.begin().await?;
    let existing = load_deal(&txn, deal_id).await?;
    if existing.is_active == active {
        return Ok(existing);
    }
    let now: DateTimeWithTimeZone = Utc::now().into();
    let mut candidate = existing.clone();
    candidate.is_active = active;
    candidate.deleted_at = if active { None } else { Some(now) };
    candidate.updated_by = Some(actor.user_id);
    candidate.updated_at = now;
    candidate.version = existing.version + 1;

    let updated = write_deal(&txn, &candidate, existing.version).await?;
    txn.commit().await?;
    info!(
        deal_code = %updated.deal_code,
        active,
        actor = %actor.user_id,
        "deal active flag changed"
    );
    Ok(updated)
}

/// Looks a deal up by id, archived or not.
pub async fn get_deal<C>(conn: &C, deal_id: Uuid) -> CrmResult<deal::Model>
where
    C: ConnectionTrait,
{
    load_deal(conn, deal_id).await
}

/// Newest deals first.
pub async fn list_deals<C>(conn: &C, query: DealListQuery) -> CrmResult<Vec<deal::Model>>
where
    C: ConnectionTrait,
{
    let mut select = deal::Entity::find();
    if !query.include_archived {
        select = select.filter(deal::Column::IsActive.eq(true));
    }
    if let Some(stage) = query.stage {
        select = select.filter(deal::Column::Stage.eq(stage));
    }
    let rows = select
        .order_by_desc(deal::Column::CreatedAt)
        .order_by_desc(deal::Column::DealCode)
        .limit(query.first.unwrap_or(MAX_DEALS_PAGE).min(MAX_DEALS_PAGE))
        .offset(query.offset.unwrap_or(0))
        .all(conn)
        .await?;
    Ok(rows)
}

/// Stage history, newest first. Archived deals keep their history.
pub async fn get_stage_history<C>(
    conn: &C,
    deal_id: Uuid,
) -> CrmResult<Vec<deal_stage_history::Model>>
where
    C: ConnectionTrait,
{
    load_deal(conn, deal_id).await?;
    let rows = deal_stage_history::Entity::find()
        .filter(deal_stage_history::Column::DealId.eq(deal_id))
        .order_by_desc(deal_stage_history::Column::ChangedAt)
        .order_by_desc(deal_stage_history::Column::DealVersion)
        .all(conn)
        .await?;
    Ok(rows)
}

/// Whole days since the latest stage change, 0 when the deal never moved.
pub async fn days_in_stage<C>(conn: &C, deal_id: Uuid, now: DateTime<Utc>) -> CrmResult<i64>
where
    C: ConnectionTrait,
{
    load_deal(conn, deal_id).await?;
    let latest = deal_stage_history::Entity::find()
        .filter(deal_stage_history::Column::DealId.eq(deal_id))
        .order_by_desc(deal_stage_history::Column::ChangedAt)
        .order_by_desc(deal_stage_history::Column::DealVersion)
        .one(conn)
        .await?;
    Ok(latest
        .map(|row| days_since(row.changed_at.with_timezone(&Utc), now))
        .unwrap_or(0))
}

pub fn days_since(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now.date_naive() - then.date_naive()).num_days().max(0)
}

pub fn is_closed(deal: &deal::Model) -> bool {
    is_terminal(deal.stage)
}

async fn load_deal<C>(conn: &C, deal_id: Uuid) -> CrmResult<deal::Model>
where
    C: ConnectionTrait,
{
    deal::Entity::find_by_id(deal_id)
        .one(conn)
        .await?
        .ok_or(CrmError::NotFound("deal"))
}

async fn load_active_deal<C>(conn: &C, deal_id: Uuid) -> CrmResult<deal::Model>
where
    C: ConnectionTrait,
{
    let deal = load_deal(conn, deal_id).await?;
    if !deal.is_active {
        return Err(CrmError::NotFound("deal"));
    }
    Ok(deal)
}

fn check_version(existing: &deal::Model, expected: Option<i32>) -> CrmResult<()> {
    match expected {
        Some(version) if version != existing.version => Err(CrmError::Conflict(format!(
            "deal {} is at version {}, not {}",
            existing.deal_code, existing.version, version
        ))),
        _ => Ok(()),
    }
}

/// Writes `candidate` only if the stored row is still at `expected_version`.
async fn write_deal<C>(
    conn: &C,
    candidate: &deal::Model,
    expected_version: i32,
) -> CrmResult<deal::Model>
where
    C: ConnectionTrait,
{
    let mut active = full_active_model(candidate);
    active.id = NotSet;
    active.deal_code = NotSet;
    active.created_by = NotSet;
    active.created_at = NotSet;

    let result = deal::Entity::update_many()
        .set(active)
        .filter(deal::Column::Id.eq(candidate.id))
        .filter(deal::Column::Version.eq(expected_version))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        warn!(deal_code = %candidate.deal_code, expected_version, "stale deal version");
        return Err(CrmError::Conflict(format!(
            "deal {} was modified concurrently",
            candidate.deal_code
        )));
    }
    load_deal(conn, candidate.id).await
}

fn full_active_model(model: &deal::Model) -> deal::ActiveModel {
    deal::ActiveModel {
        id: Set(model.id),
        deal_code: Set(model.deal_code.clone()),
        title: Set(model.title.clone()),
        amount_cents: Set(model.amount_cents),
        currency: Set(model.currency.clone()),
        stage: Set(model.stage),
        probability: Set(model.probability),
        forecast_category: Set(model.forecast_category),
        expected_close_date: Set(model.expected_close_date),
        actual_close_date: Set(model.actual_close_date),
        lost_reason: Set(model.lost_reason),
        lost_notes: Set(model.lost_notes.clone()),
        company_id: Set(model.company_id),
        contact_id: Set(model.contact_id),
        notes: Set(model.notes.clone()),
        assigned_user_id: Set(model.assigned_user_id),
        created_by: Set(model.created_by),
        updated_by: Set(model.updated_by),
        version: Set(model.version),
        is_active: Set(model.is_active),
        deleted_at: Set(model.deleted_at),
        created_at: Set(model.created_at),
        updated_at: Set(model.updated_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn days_since_counts_calendar_days_and_never_goes_negative() {
        let then = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        let next_morning = Utc.with_ymd_and_hms(2024, 3, 2, 0, 15, 0).unwrap();
        assert_eq!(days_since(then, next_morning), 1);
        assert_eq!(days_since(then, then), 0);
        let later = Utc.with_ymd_and_hms(2024, 3, 31, 8, 0, 0).unwrap();
        assert_eq!(days_since(then, later), 30);
        assert_eq!(days_since(later, then), 0);
    }

    #[test]
    fn transition_request_builder_sets_lost_fields() {
        let request = TransitionRequest::to(Stage::ClosedLost)
            .lost(LostReason::Timing, Some("budget frozen".into()))
            .with_note("customer paused")
            .at_version(3);
        assert_eq!(request.lost_reason, Some(LostReason::Timing));
        assert_eq!(request.lost_notes.as_deref(), Some("budget frozen"));
        assert_eq!(request.note.as_deref(), Some("customer paused"));
        assert_eq!(request.expected_version, Some(3));
        assert_eq!(request.probability, None);
    }
}
