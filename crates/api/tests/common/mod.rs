#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use api::directory::{create_company, NewCompany};
use api::schema::{build_schema, AppSchema, MutationRoot, QueryRoot};
use api::Actor;
use async_graphql::{EmptySubscription, Request, Response, Schema, Value, Variables};
use chrono::{DateTime, TimeZone, Utc};
use entity::company;
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement,
};
use url::Url;
use uuid::Uuid;

pub type CrmSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

/// Migrated database for one test. Postgres when `TEST_DATABASE_URL` is set,
/// otherwise an in-memory SQLite database.
pub struct TestDb {
    pub db: Arc<DatabaseConnection>,
    postgres: Option<(String, String)>,
    sqlite_file: Option<PathBuf>,
}

impl TestDb {
    pub async fn new() -> Self {
        if let Some(ctx) = Self::postgres().await {
            return ctx;
        }
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&conn, None).await.unwrap();
        Self {
            db: Arc::new(conn),
            postgres: None,
            sqlite_file: None,
        }
    }

    /// Like [`TestDb::new`], but SQLite runs from a temp file behind a pool of
    /// `max_connections`, so spawned tasks really overlap.
    pub async fn pooled(max_connections: u32) -> Self {
        if let Some(ctx) = Self::postgres().await {
            return ctx;
        }
        let path = std::env::temp_dir().join(format!("deal-pipeline-{}.db", Uuid::new_v4()));
        let mut options = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
        options
            .max_connections(max_connections)
            .min_connections(1)
            .sqlx_logging(false);
        let conn = Database::connect(options).await.unwrap();
        Migrator::up(&conn, None).await.unwrap();
        Self {
            db: Arc::new(conn),
            postgres: None,
            sqlite_file: Some(path),
        }
    }

    async fn postgres() -> Option<Self> {
        let base = std::env::var("TEST_DATABASE_URL").ok()?;
        let (admin_url, db_name, test_url) = build_urls(&base)?;
        let admin = Database::connect(&admin_url).await.ok()?;
        let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE);", db_name);
        let create_sql = format!("CREATE DATABASE \"{}\";", db_name);
        let _ = admin
            .execute(Statement::from_string(DatabaseBackend::Postgres, drop_sql))
            .await;
        admin
            .execute(Statement::from_string(DatabaseBackend::Postgres, create_sql))
            .await
            .ok()?;
        let conn = Database::connect(&test_url).await.ok()?;
        Migrator::up(&conn, None).await.ok()?;
        Some(Self {
            db: Arc::new(conn),
            postgres: Some((admin_url, db_name)),
            sqlite_file: None,
        })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    pub fn schema(&self) -> CrmSchema {
        let AppSchema(schema) = build_schema(self.db.clone());
        schema
    }

    pub async fn cleanup(self) {
        let Self {
            db,
            postgres,
            sqlite_file,
        } = self;
        drop(db);
        if let Some(path) = sqlite_file {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
            }
        }
        if let Some((admin_url, db_name)) = postgres {
            if let Ok(admin) = Database::connect(&admin_url).await {
                let drop_sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE);", db_name);
                let _ = admin
                    .execute(Statement::from_string(DatabaseBackend::Postgres, drop_sql))
                    .await;
            }
        }
    }
}

fn build_urls(base: &str) -> Option<(String, String, String)> {
    let url = Url::parse(base).ok()?;
    let db_path = url.path().trim_start_matches('/').to_string();
    let base_name = if db_path.is_empty() {
        "deal_pipeline_test".to_string()
    } else {
        db_path
    };
    let db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
    let mut admin_url = url.clone();
    admin_url.set_path("/postgres");
    let mut test_url = url.clone();
    test_url.set_path(&format!("/{}", db_name));
    Some((admin_url.to_string(), db_name, test_url.to_string()))
}

pub fn actor() -> Actor {
    Actor::new(Uuid::new_v4())
}

pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

pub async fn company(db: &DatabaseConnection, name: &str) -> company::Model {
    create_company(
        db,
        NewCompany {
            name: name.into(),
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

pub async fn execute(
    schema: &CrmSchema,
    query: &str,
    variables: serde_json::Value,
    actor: Option<Actor>,
) -> Response {
    let mut request = Request::new(query).variables(Variables::from_json(variables));
    if let Some(actor) = actor {
        request = request.data(actor);
    }
    schema.execute(request).await
}

pub fn error_code(resp: &Response) -> Option<String> {
    let err = resp.errors.first()?;
    match err.extensions.as_ref()?.get("code")? {
        Value::String(code) => Some(code.clone()),
        _ => None,
    }
}

pub fn data(resp: Response) -> serde_json::Value {
    assert!(resp.errors.is_empty(), "unexpected errors: {:?}", resp.errors);
    resp.data.into_json().unwrap()
}
