//! Companies and contacts that deals and activity hang off.

use chrono::{DateTime, Utc};
use entity::{company, contact};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectionTrait, DatabaseConnection, EntityTrait,
    TransactionTrait,
};
use tracing::info;
use uuid::Uuid;

use crate::error::{CrmError, CrmResult, ValidationError};
use crate::validation::{optional_text, require_text};

const NAME_MAX: usize = 200;
const EMAIL_MAX: usize = 254;
const PHONE_MAX: usize = 20;
const URL_MAX: usize = 2048;

#[derive(Debug, Clone, Default)]
pub struct NewCompany {
    pub name: String,
    pub website: Option<String>,
    pub industry: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewContact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company_id: Option<Uuid>,
}

pub async fn create_company(
    db: &DatabaseConnection,
    input: NewCompany,
) -> CrmResult<company::Model> {
    let name = require_text("name", &input.name, NAME_MAX)?;
    let website = optional_text("website", input.website, URL_MAX)?;
    let industry = optional_text("industry", input.industry, NAME_MAX)?;
    let now: DateTimeWithTimeZone = Utc::now().into();

    let created = company::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        website: Set(website),
        industry: Set(industry),
        is_active: Set(true),
        deleted_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;
    info!(company_id = %created.id, "company created");
    Ok(created)
}

pub async fn create_contact(
    db: &DatabaseConnection,
    input: NewContact,
) -> CrmResult<contact::Model> {
    let first_name = require_text("firstName", &input.first_name, NAME_MAX)?;
    let last_name = require_text("lastName", &input.last_name, NAME_MAX)?;
    let email = normalize_email(&input.email)?;
    let phone = optional_text("phone", input.phone, PHONE_MAX)?;
    let now: DateTime<Utc> = Utc::now();

    let txn = db.begin().await?;
    if let Some(company_id) = input.company_id {
        ensure_company_active(&txn, company_id).await?;
    }
    let created = contact::ActiveModel {
        id: Set(Uuid::new_v4()),
        first_name: Set(first_name),
        last_name: Set(last_name),
        email: Set(email),
        phone: Set(phone),
        company_id: Set(input.company_id),
        is_active: Set(true),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;
    info!(contact_id = %created.id, "contact created");
    Ok(created)
}

pub async fn ensure_company_active<C>(conn: &C, id: Uuid) -> CrmResult<company::Model>
where
    C: ConnectionTrait,
{
    company::Entity::find_by_id(id)
        .one(conn)
        .await?
        .filter(|company| company.is_active)
        .ok_or(CrmError::NotFound("company"))
}

pub async fn ensure_contact_active<C>(conn: &C, id: Uuid) -> CrmResult<contact::Model>
where
    C: ConnectionTrait,
{
    contact::Entity::find_by_id(id)
        .one(conn)
        .await?
        .filter(|contact| contact.is_active)
        .ok_or(CrmError::NotFound("contact"))
}

fn normalize_email(raw: &str) -> Result<String, ValidationError> {
    let email = require_text("email", raw, EMAIL_MAX)?.to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ValidationError::Invalid(format!("{email} is not a valid email"))),
    }
}
