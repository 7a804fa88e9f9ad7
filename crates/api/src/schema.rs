use std::sync::Arc;

use async_graphql::{
    ComplexObject, Context, EmptySubscription, Enum, Error, ErrorExtensions, InputObject,
    MaybeUndefined, Object, Schema, SimpleObject, ID,
};
use chrono::{DateTime, NaiveDate, Utc};
use entity::related::RelatedKind;
use entity::{company, contact, deal, deal_stage_history, interaction, task};
use sea_orm::DatabaseConnection;
use tracing::error;
use uuid::Uuid;

use crate::activity::{self, NewInteraction, NewTask, TaskListQuery};
use crate::actor::Actor;
use crate::directory::{self, NewCompany, NewContact};
use crate::error::{CrmError, ValidationError};
use crate::lifecycle::{self, DealChanges, DealListQuery, NewDeal, TransitionRequest};
use crate::related::RelatedEntityRef;
use crate::reports::{self, CompanyStats, ForecastWindow, StageTotals};
use crate::rules::{self, parse_stage, weighted_amount_cents};

pub struct AppSchema(pub Schema<QueryRoot, MutationRoot, EmptySubscription>);

pub fn build_schema(db: Arc<DatabaseConnection>) -> AppSchema {
    let schema = Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(db)
        .finish();
    AppSchema(schema)
}

pub struct QueryRoot;
pub struct MutationRoot;

#[Object]
impl QueryRoot {
    async fn crm(&self) -> CrmQuery {
        CrmQuery
    }
}

#[Object]
impl MutationRoot {
    async fn crm(&self) -> CrmMutation {
        CrmMutation
    }
}

#[derive(Default)]
pub struct CrmQuery;

#[derive(Default)]
pub struct CrmMutation;

#[Object]
impl CrmQuery {
    async fn deal(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<DealNode> {
        let db = database(ctx)?;
        let deal_id = parse_uuid(&id)?;
        let model = lifecycle::get_deal(db.as_ref(), deal_id)
            .await
            .map_err(crm_error)?;
        Ok(model.into())
    }

    async fn deals(
        &self,
        ctx: &Context<'_>,
        stage: Option<DealStage>,
        #[graphql(name = "includeArchived", default = false)] include_archived: bool,
        first: Option<i32>,
        offset: Option<i32>,
    ) -> async_graphql::Result<Vec<DealNode>> {
        let db = database(ctx)?;
        let query = DealListQuery {
            include_archived,
            stage: stage.map(Into::into),
            first: page_size(first),
            offset: page_offset(offset),
        };
        let records = lifecycle::list_deals(db.as_ref(), query)
            .await
            .map_err(crm_error)?;
        Ok(records.into_iter().map(DealNode::from).collect())
    }

    #[graphql(name = "dealStageHistory")]
    async fn deal_stage_history(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "dealId")] deal_id: ID,
    ) -> async_graphql::Result<Vec<DealStageHistoryNode>> {
        let db = database(ctx)?;
        let deal_id = parse_uuid(&deal_id)?;
        let rows = lifecycle::get_stage_history(db.as_ref(), deal_id)
            .await
            .map_err(crm_error)?;
        Ok(rows.into_iter().map(DealStageHistoryNode::from).collect())
    }

    #[graphql(name = "pipelineSummary")]
    async fn pipeline_summary(
        &self,
        ctx: &Context<'_>,
    ) -> async_graphql::Result<Vec<StageTotalsNode>> {
        let db = database(ctx)?;
        let totals = reports::pipeline_summary(db.as_ref())
            .await
            .map_err(crm_error)?;
        Ok(totals.into_iter().map(StageTotalsNode::from).collect())
    }

    async fn forecast(
        &self,
        ctx: &Context<'_>,
        today: Option<NaiveDate>,
    ) -> async_graphql::Result<Vec<ForecastWindowNode>> {
        let db = database(ctx)?;
        let today = today.unwrap_or_else(|| Utc::now().date_naive());
        let windows = reports::forecast(db.as_ref(), today)
            .await
            .map_err(crm_error)?;
        Ok(windows.into_iter().map(ForecastWindowNode::from).collect())
    }

    async fn tasks(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "companyId")] company_id: Option<ID>,
        #[graphql(name = "contactId")] contact_id: Option<ID>,
        #[graphql(name = "dealId")] deal_id: Option<ID>,
        #[graphql(name = "assignedUserId")] assigned_user_id: Option<ID>,
        #[graphql(name = "includeClosed", default = false)] include_closed: bool,
        first: Option<i32>,
        offset: Option<i32>,
    ) -> async_graphql::Result<Vec<TaskNode>> {
        let db = database(ctx)?;
        let related = related_target(company_id, contact_id, deal_id)?;
        let query = TaskListQuery {
            related,
            assigned_user_id: assigned_user_id.as_ref().map(parse_uuid).transpose()?,
            include_closed,
            first: page_size(first),
            offset: page_offset(offset),
        };
        let records = activity::list_tasks(db.as_ref(), query)
            .await
            .map_err(crm_error)?;
        Ok(records.into_iter().map(TaskNode::from).collect())
    }

    /// Open tasks assigned to the calling actor.
    #[graphql(name = "myTasks")]
    async fn my_tasks(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "includeClosed", default = false)] include_closed: bool,
        first: Option<i32>,
        offset: Option<i32>,
    ) -> async_graphql::Result<Vec<TaskNode>> {
        let actor = current_actor(ctx)?;
        let db = database(ctx)?;
        let query = TaskListQuery {
            assigned_user_id: Some(actor.user_id),
            include_closed,
            first: page_size(first),
            offset: page_offset(offset),
            ..Default::default()
        };
        let records = activity::list_tasks(db.as_ref(), query)
            .await
            .map_err(crm_error)?;
        Ok(records.into_iter().map(TaskNode::from).collect())
    }

    #[graphql(name = "overdueTasks")]
    async fn overdue_tasks(
        &self,
        ctx: &Context<'_>,
        first: Option<i32>,
    ) -> async_graphql::Result<Vec<TaskNode>> {
        let db = database(ctx)?;
        let records = activity::list_overdue_tasks(db.as_ref(), Utc::now(), page_size(first))
            .await
            .map_err(crm_error)?;
        Ok(records.into_iter().map(TaskNode::from).collect())
    }

    #[graphql(name = "upcomingTasks")]
    async fn upcoming_tasks(
        &self,
        ctx: &Context<'_>,
        first: Option<i32>,
    ) -> async_graphql::Result<Vec<TaskNode>> {
        let db = database(ctx)?;
        let records = activity::list_upcoming_tasks(db.as_ref(), Utc::now(), page_size(first))
            .await
            .map_err(crm_error)?;
        Ok(records.into_iter().map(TaskNode::from).collect())
    }

    #[graphql(name = "companyStats")]
    async fn company_stats(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "companyId")] company_id: ID,
    ) -> async_graphql::Result<CompanyStatsNode> {
        let db = database(ctx)?;
        let company_id = parse_uuid(&company_id)?;
        let stats = reports::company_stats(db.as_ref(), company_id)
            .await
            .map_err(crm_error)?;
        Ok(stats.into())
    }

    async fn interactions(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "companyId")] company_id: Option<ID>,
        #[graphql(name = "contactId")] contact_id: Option<ID>,
        #[graphql(name = "dealId")] deal_id: Option<ID>,
        first: Option<i32>,
    ) -> async_graphql::Result<Vec<InteractionNode>> {
        let db = database(ctx)?;
        let Some(related) = related_target(company_id, contact_id, deal_id)? else {
            return Err(crm_error(
                ValidationError::Required {
                    field: "companyId, contactId or dealId",
                }
                .into(),
            ));
        };
        let records = activity::list_interactions(db.as_ref(), related, page_size(first))
            .await
            .map_err(crm_error)?;
        Ok(records.into_iter().map(InteractionNode::from).collect())
    }
}

#[Object]
impl CrmMutation {
    #[graphql(name = "createCompany")]
    async fn create_company(
        &self,
        ctx: &Context<'_>,
        input: NewCompanyInput,
    ) -> async_graphql::Result<CompanyNode> {
        current_actor(ctx)?;
        let db = database(ctx)?;
        let created = directory::create_company(
            db.as_ref(),
            NewCompany {
                name: input.name,
                website: input.website,
                industry: input.industry,
            },
        )
        .await
        .map_err(crm_error)?;
        Ok(created.into())
    }

    #[graphql(name = "createContact")]
    async fn create_contact(
        &self,
        ctx: &Context<'_>,
        input: NewContactInput,
    ) -> async_graphql::Result<ContactNode> {
        current_actor(ctx)?;
        let db = database(ctx)?;
        let company_id = input.company_id.as_ref().map(parse_uuid).transpose()?;
        let created = directory::create_contact(
            db.as_ref(),
            NewContact {
                first_name: input.first_name,
                last_name: input.last_name,
                email: input.email,
                phone: input.phone,
                company_id,
            },
        )
        .await
        .map_err(crm_error)?;
        Ok(created.into())
    }

    #[graphql(name = "createDeal")]
    async fn create_deal(
        &self,
        ctx: &Context<'_>,
        input: NewDealInput,
    ) -> async_graphql::Result<DealNode> {
        let actor = current_actor(ctx)?;
        let db = database(ctx)?;
        let new_deal = NewDeal {
            title: input.title,
            company_id: parse_uuid(&input.company_id)?,
            contact_id: input.contact_id.as_ref().map(parse_uuid).transpose()?,
            amount_cents: input.amount_cents,
            currency: input.currency,
            probability: input.probability.map(probability_arg).transpose()?,
            expected_close_date: input.expected_close_date,
            notes: input.notes,
            assigned_user_id: input.assigned_user_id.as_ref().map(parse_uuid).transpose()?,
        };
        let created = lifecycle::create_deal(db.as_ref(), new_deal, actor)
            .await
            .map_err(crm_error)?;
        Ok(created.into())
    }

    #[graphql(name = "updateDeal")]
    async fn update_deal(
        &self,
        ctx: &Context<'_>,
        id: ID,
        input: UpdateDealInput,
    ) -> async_graphql::Result<DealNode> {
        let actor = current_actor(ctx)?;
        let db = database(ctx)?;
        let deal_id = parse_uuid(&id)?;
        let changes = DealChanges {
            title: input.title,
            amount_cents: input.amount_cents,
            currency: input.currency,
            expected_close_date: patch(input.expected_close_date),
            contact_id: patch_id(input.contact_id)?,
            notes: patch(input.notes),
            assigned_user_id: patch_id(input.assigned_user_id)?,
            expected_version: input.expected_version,
        };
        let updated = lifecycle::update_deal(db.as_ref(), deal_id, changes, actor)
            .await
            .map_err(crm_error)?;
        Ok(updated.into())
    }

    #[graphql(name = "transitionDeal")]
    async fn transition_deal(
        &self,
        ctx: &Context<'_>,
        id: ID,
        input: TransitionDealInput,
    ) -> async_graphql::Result<DealNode> {
        let actor = current_actor(ctx)?;
        let db = database(ctx)?;
        let deal_id = parse_uuid(&id)?;
        let stage = parse_stage(&input.stage.to_ascii_lowercase()).map_err(crm_error)?;
        let request = TransitionRequest {
            stage,
            probability: input.probability.map(probability_arg).transpose()?,
            note: input.note,
            lost_reason: input.lost_reason.map(Into::into),
            lost_notes: input.lost_notes,
            expected_version: input.expected_version,
        };
        let updated = lifecycle::transition_deal(db.as_ref(), deal_id, request, actor)
            .await
            .map_err(crm_error)?;
        Ok(updated.into())
    }

    #[graphql(name = "archiveDeal")]
    async fn archive_deal(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<DealNode> {
        let actor = current_actor(ctx)?;
        let db = database(ctx)?;
        let deal_id = parse_uuid(&id)?;
        let archived = lifecycle::archive_deal(db.as_ref(), deal_id, actor)
            .await
            .map_err(crm_error)?;
        Ok(archived.into())
    }

    #[graphql(name = "restoreDeal")]
    async fn restore_deal(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<DealNode> {
        let actor = current_actor(ctx)?;
        let db = database(ctx)?;
        let deal_id = parse_uuid(&id)?;
        let restored = lifecycle::restore_deal(db.as_ref(), deal_id, actor)
            .await
            .map_err(crm_error)?;
        Ok(restored.into())
    }

    #[graphql(name = "createTask")]
    async fn create_task(
        &self,
        ctx: &Context<'_>,
        input: NewTaskInput,
    ) -> async_graphql::Result<TaskNode> {
        let actor = current_actor(ctx)?;
        let db = database(ctx)?;
        let new_task = NewTask {
            title: input.title,
            description: input.description,
            priority: input.priority.unwrap_or_default().into(),
            due_at: input.due_at,
            related: related_target(input.company_id, input.contact_id, input.deal_id)?,
            assigned_user_id: input.assigned_user_id.as_ref().map(parse_uuid).transpose()?,
        };
        let created = activity::create_task(db.as_ref(), new_task, actor)
            .await
            .map_err(crm_error)?;
        Ok(created.into())
    }

    #[graphql(name = "completeTask")]
    async fn complete_task(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<TaskNode> {
        let actor = current_actor(ctx)?;
        let db = database(ctx)?;
        let task_id = parse_uuid(&id)?;
        let completed = activity::complete_task(db.as_ref(), task_id, actor)
            .await
            .map_err(crm_error)?;
        Ok(completed.into())
    }

    #[graphql(name = "reassignTask")]
    async fn reassign_task(
        &self,
        ctx: &Context<'_>,
        id: ID,
        #[graphql(name = "assignedUserId")] assigned_user_id: ID,
    ) -> async_graphql::Result<TaskNode> {
        let actor = current_actor(ctx)?;
        let db = database(ctx)?;
        let task_id = parse_uuid(&id)?;
        let assignee = parse_uuid(&assigned_user_id)?;
        let reassigned = activity::reassign_task(db.as_ref(), task_id, assignee, actor)
            .await
            .map_err(crm_error)?;
        Ok(reassigned.into())
    }

    #[graphql(name = "logInteraction")]
    async fn log_interaction(
        &self,
        ctx: &Context<'_>,
        input: LogInteractionInput,
    ) -> async_graphql::Result<InteractionNode> {
        let actor = current_actor(ctx)?;
        let db = database(ctx)?;
        let new_interaction = NewInteraction {
            kind: input.kind.into(),
            subject: input.subject,
            summary: input.summary,
            occurred_at: input.occurred_at,
            related: related_target(input.company_id, input.contact_id, input.deal_id)?,
        };
        let logged = activity::log_interaction(db.as_ref(), new_interaction, actor)
            .await
            .map_err(crm_error)?;
        Ok(logged.into())
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum DealStage {
    Lead,
    Qualified,
    Proposal,
    Negotiation,
    ClosedWon,
    ClosedLost,
    OnHold,
}

impl From<deal::Stage> for DealStage {
    fn from(value: deal::Stage) -> Self {
        match value {
            deal::Stage::Lead => DealStage::Lead,
            deal::Stage::Qualified => DealStage::Qualified,
            deal::Stage::Proposal => DealStage::Proposal,
            deal::Stage::Negotiation => DealStage::Negotiation,
            deal::Stage::ClosedWon => DealStage::ClosedWon,
            deal::Stage::ClosedLost => DealStage::ClosedLost,
            deal::Stage::OnHold => DealStage::OnHold,
        }
    }
}

impl From<DealStage> for deal::Stage {
    fn from(value: DealStage) -> Self {
        match value {
            DealStage::Lead => deal::Stage::Lead,
            DealStage::Qualified => deal::Stage::Qualified,
            DealStage::Proposal => deal::Stage::Proposal,
            DealStage::Negotiation => deal::Stage::Negotiation,
            DealStage::ClosedWon => deal::Stage::ClosedWon,
            DealStage::ClosedLost => deal::Stage::ClosedLost,
            DealStage::OnHold => deal::Stage::OnHold,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum ForecastCategory {
    Pipeline,
    BestCase,
    Commit,
    Closed,
}

impl From<deal::ForecastCategory> for ForecastCategory {
    fn from(value: deal::ForecastCategory) -> Self {
        match value {
            deal::ForecastCategory::Pipeline => ForecastCategory::Pipeline,
            deal::ForecastCategory::BestCase => ForecastCategory::BestCase,
            deal::ForecastCategory::Commit => ForecastCategory::Commit,
            deal::ForecastCategory::Closed => ForecastCategory::Closed,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum LostReason {
    Price,
    Competitor,
    Timing,
    Features,
    Other,
}

impl From<deal::LostReason> for LostReason {
    fn from(value: deal::LostReason) -> Self {
        match value {
            deal::LostReason::Price => LostReason::Price,
            deal::LostReason::Competitor => LostReason::Competitor,
            deal::LostReason::Timing => LostReason::Timing,
            deal::LostReason::Features => LostReason::Features,
            deal::LostReason::Other => LostReason::Other,
        }
    }
}

impl From<LostReason> for deal::LostReason {
    fn from(value: LostReason) -> Self {
        match value {
            LostReason::Price => deal::LostReason::Price,
            LostReason::Competitor => deal::LostReason::Competitor,
            LostReason::Timing => deal::LostReason::Timing,
            LostReason::Features => deal::LostReason::Features,
            LostReason::Other => deal::LostReason::Other,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Deferred,
}

impl From<task::Status> for TaskStatus {
    fn from(value: task::Status) -> Self {
        match value {
            task::Status::Pending => TaskStatus::Pending,
            task::Status::InProgress => TaskStatus::InProgress,
            task::Status::Completed => TaskStatus::Completed,
            task::Status::Cancelled => TaskStatus::Cancelled,
            task::Status::Deferred => TaskStatus::Deferred,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl From<task::Priority> for TaskPriority {
    fn from(value: task::Priority) -> Self {
        match value {
            task::Priority::Low => TaskPriority::Low,
            task::Priority::Medium => TaskPriority::Medium,
            task::Priority::High => TaskPriority::High,
            task::Priority::Urgent => TaskPriority::Urgent,
        }
    }
}

impl From<TaskPriority> for task::Priority {
    fn from(value: TaskPriority) -> Self {
        match value {
            TaskPriority::Low => task::Priority::Low,
            TaskPriority::Medium => task::Priority::Medium,
            TaskPriority::High => task::Priority::High,
            TaskPriority::Urgent => task::Priority::Urgent,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum InteractionKind {
    Call,
    Email,
    Meeting,
    Note,
    Other,
}

impl From<interaction::Kind> for InteractionKind {
    fn from(value: interaction::Kind) -> Self {
        match value {
            interaction::Kind::Call => InteractionKind::Call,
            interaction::Kind::Email => InteractionKind::Email,
            interaction::Kind::Meeting => InteractionKind::Meeting,
            interaction::Kind::Note => InteractionKind::Note,
            interaction::Kind::Other => InteractionKind::Other,
        }
    }
}

impl From<InteractionKind> for interaction::Kind {
    fn from(value: InteractionKind) -> Self {
        match value {
            InteractionKind::Call => interaction::Kind::Call,
            InteractionKind::Email => interaction::Kind::Email,
            InteractionKind::Meeting => interaction::Kind::Meeting,
            InteractionKind::Note => interaction::Kind::Note,
            InteractionKind::Other => interaction::Kind::Other,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum RelatedEntityKind {
    Company,
    Contact,
    Deal,
}

impl From<RelatedKind> for RelatedEntityKind {
    fn from(value: RelatedKind) -> Self {
        match value {
            RelatedKind::Company => RelatedEntityKind::Company,
            RelatedKind::Contact => RelatedEntityKind::Contact,
            RelatedKind::Deal => RelatedEntityKind::Deal,
        }
    }
}

#[derive(InputObject, Clone)]
pub struct NewCompanyInput {
    pub name: String,
    pub website: Option<String>,
    pub industry: Option<String>,
}

#[derive(InputObject, Clone)]
pub struct NewContactInput {
    #[graphql(name = "firstName")]
    pub first_name: String,
    #[graphql(name = "lastName")]
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    #[graphql(name = "companyId")]
    pub company_id: Option<ID>,
}

#[derive(InputObject, Clone)]
pub struct NewDealInput {
    pub title: String,
    #[graphql(name = "companyId")]
    pub company_id: ID,
    #[graphql(name = "contactId")]
    pub contact_id: Option<ID>,
    #[graphql(name = "amountCents")]
    pub amount_cents: i64,
    pub currency: Option<String>,
    pub probability: Option<i32>,
    #[graphql(name = "expectedCloseDate")]
    pub expected_close_date: Option<NaiveDate>,
    pub notes: Option<String>,
    #[graphql(name = "assignedUserId")]
    pub assigned_user_id: Option<ID>,
}

/// Omitted fields are left untouched; explicit `null` clears nullable ones.
#[derive(InputObject, Clone)]
pub struct UpdateDealInput {
    pub title: Option<String>,
    #[graphql(name = "amountCents")]
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    #[graphql(name = "expectedCloseDate")]
    pub expected_close_date: MaybeUndefined<NaiveDate>,
    #[graphql(name = "contactId")]
    pub contact_id: MaybeUndefined<ID>,
    pub notes: MaybeUndefined<String>,
    #[graphql(name = "assignedUserId")]
    pub assigned_user_id: MaybeUndefined<ID>,
    #[graphql(name = "expectedVersion")]
    pub expected_version: Option<i32>,
}

#[derive(InputObject, Clone)]
pub struct TransitionDealInput {
    /// Stage key such as `qualified` or `closed_won`.
    pub stage: String,
    pub probability: Option<i32>,
    pub note: Option<String>,
    #[graphql(name = "lostReason")]
    pub lost_reason: Option<LostReason>,
    #[graphql(name = "lostNotes")]
    pub lost_notes: Option<String>,
    #[graphql(name = "expectedVersion")]
    pub expected_version: Option<i32>,
}

#[derive(InputObject, Clone)]
pub struct NewTaskInput {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    #[graphql(name = "dueAt")]
    pub due_at: Option<DateTime<Utc>>,
    #[graphql(name = "companyId")]
    pub company_id: Option<ID>,
    #[graphql(name = "contactId")]
    pub contact_id: Option<ID>,
    #[graphql(name = "dealId")]
    pub deal_id: Option<ID>,
    #[graphql(name = "assignedUserId")]
    pub assigned_user_id: Option<ID>,
}

#[derive(InputObject, Clone)]
pub struct LogInteractionInput {
    pub kind: InteractionKind,
    pub subject: String,
    pub summary: Option<String>,
    #[graphql(name = "occurredAt")]
    pub occurred_at: Option<DateTime<Utc>>,
    #[graphql(name = "companyId")]
    pub company_id: Option<ID>,
    #[graphql(name = "contactId")]
    pub contact_id: Option<ID>,
    #[graphql(name = "dealId")]
    pub deal_id: Option<ID>,
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Company")]
pub struct CompanyNode {
    pub id: ID,
    pub name: String,
    pub website: Option<String>,
    pub industry: Option<String>,
    #[graphql(name = "isActive")]
    pub is_active: bool,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[graphql(name = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<company::Model> for CompanyNode {
    fn from(model: company::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            name: model.name,
            website: model.website,
            industry: model.industry,
            is_active: model.is_active,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Contact")]
pub struct ContactNode {
    pub id: ID,
    #[graphql(name = "firstName")]
    pub first_name: String,
    #[graphql(name = "lastName")]
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    #[graphql(name = "companyId")]
    pub company_id: Option<ID>,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<contact::Model> for ContactNode {
    fn from(model: contact::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            first_name: model.first_name,
            last_name: model.last_name,
            email: model.email,
            phone: model.phone,
            company_id: model.company_id.map(|id| ID::from(id.to_string())),
            created_at: model.created_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Deal", complex)]
pub struct DealNode {
    pub id: ID,
    #[graphql(name = "dealCode")]
    pub deal_code: String,
    pub title: String,
    #[graphql(name = "amountCents")]
    pub amount_cents: i64,
    pub currency: String,
    pub stage: DealStage,
    pub probability: i32,
    #[graphql(name = "forecastCategory")]
    pub forecast_category: ForecastCategory,
    #[graphql(name = "weightedAmountCents")]
    pub weighted_amount_cents: i64,
    #[graphql(name = "isClosed")]
    pub is_closed: bool,
    #[graphql(name = "expectedCloseDate")]
    pub expected_close_date: Option<NaiveDate>,
    #[graphql(name = "actualCloseDate")]
    pub actual_close_date: Option<NaiveDate>,
    #[graphql(name = "lostReason")]
    pub lost_reason: Option<LostReason>,
    #[graphql(name = "lostNotes")]
    pub lost_notes: Option<String>,
    #[graphql(name = "companyId")]
    pub company_id: ID,
    #[graphql(name = "contactId")]
    pub contact_id: Option<ID>,
    pub notes: Option<String>,
    #[graphql(name = "assignedUserId")]
    pub assigned_user_id: Option<ID>,
    #[graphql(name = "createdBy")]
    pub created_by: Option<ID>,
    #[graphql(name = "updatedBy")]
    pub updated_by: Option<ID>,
    pub version: i32,
    #[graphql(name = "isActive")]
    pub is_active: bool,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[graphql(name = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[ComplexObject]
impl DealNode {
    #[graphql(name = "stageLabel")]
    async fn stage_label(&self) -> String {
        rules::stage_label(self.stage.into()).to_string()
    }

    #[graphql(name = "daysInStage")]
    async fn days_in_stage(&self, ctx: &Context<'_>) -> async_graphql::Result<i64> {
        let db = database(ctx)?;
        let deal_id = parse_uuid(&self.id)?;
        lifecycle::days_in_stage(db.as_ref(), deal_id, Utc::now())
            .await
            .map_err(crm_error)
    }
}

impl From<deal::Model> for DealNode {
    fn from(model: deal::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            weighted_amount_cents: weighted_amount_cents(model.amount_cents, model.probability),
            is_closed: rules::is_terminal(model.stage),
            deal_code: model.deal_code,
            title: model.title,
            amount_cents: model.amount_cents,
            currency: model.currency,
            stage: model.stage.into(),
            probability: i32::from(model.probability),
            forecast_category: model.forecast_category.into(),
            expected_close_date: model.expected_close_date,
            actual_close_date: model.actual_close_date,
            lost_reason: model.lost_reason.map(Into::into),
            lost_notes: model.lost_notes,
            company_id: ID::from(model.company_id.to_string()),
            contact_id: model.contact_id.map(|id| ID::from(id.to_string())),
            notes: model.notes,
            assigned_user_id: model.assigned_user_id.map(|id| ID::from(id.to_string())),
            created_by: model.created_by.map(|id| ID::from(id.to_string())),
            updated_by: model.updated_by.map(|id| ID::from(id.to_string())),
            version: model.version,
            is_active: model.is_active,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "DealStageHistory")]
pub struct DealStageHistoryNode {
    pub id: ID,
    #[graphql(name = "dealId")]
    pub deal_id: ID,
    #[graphql(name = "fromStage")]
    pub from_stage: DealStage,
    #[graphql(name = "toStage")]
    pub to_stage: DealStage,
    pub note: Option<String>,
    #[graphql(name = "changedAt")]
    pub changed_at: DateTime<Utc>,
    #[graphql(name = "changedBy")]
    pub changed_by: Option<ID>,
    #[graphql(name = "dealVersion")]
    pub deal_version: i32,
}

impl From<deal_stage_history::Model> for DealStageHistoryNode {
    fn from(model: deal_stage_history::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            deal_id: ID::from(model.deal_id.to_string()),
            from_stage: model.from_stage.into(),
            to_stage: model.to_stage.into(),
            note: model.note,
            changed_at: model.changed_at.into(),
            changed_by: model.changed_by.map(|id| ID::from(id.to_string())),
            deal_version: model.deal_version,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Task")]
pub struct TaskNode {
    pub id: ID,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[graphql(name = "dueAt")]
    pub due_at: Option<DateTime<Utc>>,
    #[graphql(name = "completedAt")]
    pub completed_at: Option<DateTime<Utc>>,
    #[graphql(name = "isOverdue")]
    pub is_overdue: bool,
    #[graphql(name = "daysOverdue")]
    pub days_overdue: i64,
    #[graphql(name = "relatedKind")]
    pub related_kind: Option<RelatedEntityKind>,
    #[graphql(name = "relatedId")]
    pub related_id: Option<ID>,
    #[graphql(name = "assignedUserId")]
    pub assigned_user_id: Option<ID>,
    #[graphql(name = "createdBy")]
    pub created_by: Option<ID>,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<task::Model> for TaskNode {
    fn from(model: task::Model) -> Self {
        let related = RelatedEntityRef::from_columns(model.related_kind, model.related_id);
        let now = Utc::now();
        Self {
            id: ID::from(model.id.to_string()),
            is_overdue: activity::is_overdue(&model, now),
            days_overdue: activity::days_overdue(&model, now),
            title: model.title,
            description: model.description,
            status: model.status.into(),
            priority: model.priority.into(),
            due_at: model.due_at.map(|d| d.into()),
            completed_at: model.completed_at.map(|d| d.into()),
            related_kind: related.map(|r| r.kind.into()),
            related_id: related.map(|r| ID::from(r.id.to_string())),
            assigned_user_id: model.assigned_user_id.map(|id| ID::from(id.to_string())),
            created_by: model.created_by.map(|id| ID::from(id.to_string())),
            created_at: model.created_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Interaction")]
pub struct InteractionNode {
    pub id: ID,
    pub kind: InteractionKind,
    pub subject: String,
    pub summary: Option<String>,
    #[graphql(name = "occurredAt")]
    pub occurred_at: DateTime<Utc>,
    #[graphql(name = "relatedKind")]
    pub related_kind: Option<RelatedEntityKind>,
    #[graphql(name = "relatedId")]
    pub related_id: Option<ID>,
    #[graphql(name = "createdBy")]
    pub created_by: Option<ID>,
}

impl From<interaction::Model> for InteractionNode {
    fn from(model: interaction::Model) -> Self {
        let related = RelatedEntityRef::from_columns(model.related_kind, model.related_id);
        Self {
            id: ID::from(model.id.to_string()),
            kind: model.kind.into(),
            subject: model.subject,
            summary: model.summary,
            occurred_at: model.occurred_at.into(),
            related_kind: related.map(|r| r.kind.into()),
            related_id: related.map(|r| ID::from(r.id.to_string())),
            created_by: model.created_by.map(|id| ID::from(id.to_string())),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "StageTotals")]
pub struct StageTotalsNode {
    pub stage: DealStage,
    pub label: String,
    pub count: u64,
    #[graphql(name = "amountCents")]
    pub amount_cents: i64,
    #[graphql(name = "weightedAmountCents")]
    pub weighted_amount_cents: i64,
}

impl From<StageTotals> for StageTotalsNode {
    fn from(totals: StageTotals) -> Self {
        Self {
            stage: totals.stage.into(),
            label: rules::stage_label(totals.stage).to_string(),
            count: totals.count,
            amount_cents: totals.amount_cents,
            weighted_amount_cents: totals.weighted_amount_cents,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "ForecastWindow")]
pub struct ForecastWindowNode {
    pub days: i64,
    pub count: u64,
    #[graphql(name = "amountCents")]
    pub amount_cents: i64,
    #[graphql(name = "weightedAmountCents")]
    pub weighted_amount_cents: i64,
}

impl From<ForecastWindow> for ForecastWindowNode {
    fn from(window: ForecastWindow) -> Self {
        Self {
            days: window.days,
            count: window.count,
            amount_cents: window.amount_cents,
            weighted_amount_cents: window.weighted_amount_cents,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "CompanyStats")]
pub struct CompanyStatsNode {
    pub contacts: u64,
    pub deals: u64,
    #[graphql(name = "openDeals")]
    pub open_deals: u64,
    #[graphql(name = "amountCents")]
    pub amount_cents: i64,
    #[graphql(name = "weightedAmountCents")]
    pub weighted_amount_cents: i64,
    pub interactions: u64,
}

impl From<CompanyStats> for CompanyStatsNode {
    fn from(stats: CompanyStats) -> Self {
        Self {
            contacts: stats.contacts,
            deals: stats.deals,
            open_deals: stats.open_deals,
            amount_cents: stats.amount_cents,
            weighted_amount_cents: stats.weighted_amount_cents,
            interactions: stats.interactions,
        }
    }
}

fn database(ctx: &Context<'_>) -> async_graphql::Result<Arc<DatabaseConnection>> {
    ctx.data::<Arc<DatabaseConnection>>()
        .cloned()
        .map_err(|_| error_with_code("INTERNAL", "Missing database connection"))
}

fn current_actor(ctx: &Context<'_>) -> async_graphql::Result<Actor> {
    ctx.data::<Actor>()
        .copied()
        .map_err(|_| error_with_code("UNAUTHENTICATED", "Actor required"))
}

fn parse_uuid(id: &ID) -> async_graphql::Result<Uuid> {
    Uuid::parse_str(id.as_str()).map_err(|_| error_with_code("BAD_REQUEST", "Invalid ID"))
}

fn related_target(
    company_id: Option<ID>,
    contact_id: Option<ID>,
    deal_id: Option<ID>,
) -> async_graphql::Result<Option<RelatedEntityRef>> {
    let company_id = company_id.as_ref().map(parse_uuid).transpose()?;
    let contact_id = contact_id.as_ref().map(parse_uuid).transpose()?;
    let deal_id = deal_id.as_ref().map(parse_uuid).transpose()?;
    RelatedEntityRef::from_exclusive(company_id, contact_id, deal_id)
        .map_err(|err| crm_error(err.into()))
}

fn probability_arg(value: i32) -> async_graphql::Result<i16> {
    i16::try_from(value)
        .ok()
        .filter(|p| (0..=100).contains(p))
        .ok_or_else(|| {
            crm_error(ValidationError::Invalid("probability must be between 0 and 100".into()).into())
        })
}

fn patch<T>(value: MaybeUndefined<T>) -> Option<Option<T>> {
    match value {
        MaybeUndefined::Undefined => None,
        MaybeUndefined::Null => Some(None),
        MaybeUndefined::Value(v) => Some(Some(v)),
    }
}

fn patch_id(value: MaybeUndefined<ID>) -> async_graphql::Result<Option<Option<Uuid>>> {
    match patch(value) {
        Some(Some(id)) => Ok(Some(Some(parse_uuid(&id)?))),
        Some(None) => Ok(Some(None)),
        None => Ok(None),
    }
}

fn page_size(first: Option<i32>) -> Option<u64> {
    first.map(|n| n.clamp(1, 100) as u64)
}

fn page_offset(offset: Option<i32>) -> Option<u64> {
    offset.map(|n| n.max(0) as u64)
}

fn crm_error(err: CrmError) -> Error {
    if let CrmError::Db(inner) = &err {
        error!(error = %inner, "database error");
    }
    err.extend()
}

fn error_with_code(code: &'static str, message: impl Into<String>) -> Error {
    Error::new(message).extend_with(|_, e| e.set("code", code))
}
