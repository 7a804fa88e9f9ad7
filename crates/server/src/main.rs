mod config;
mod http;

use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Result};
use api::{
    build_schema, get_stage_history, rules, seed::seed_crm_demo, transition_deal, Actor,
    AppSchema, TransitionRequest,
};
use clap::{Parser, Subcommand, ValueEnum};
use dotenvy::dotenv;
use entity::deal::LostReason;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use tracing::{info, Level};
use uuid::Uuid;

use crate::{config::AppConfig, http::AppState};

#[derive(Parser, Debug)]
#[command(name = "deal-pipeline", version, about = "CRM deal pipeline service")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run HTTP server
    Serve {
        /// Overrides BIND from the environment
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Run migrations
    Migrate {
        #[arg(value_enum, default_value_t = MigrateAction::Up)]
        action: MigrateAction,
    },
    /// Seed sample data
    Seed,
    /// Print GraphQL SDL
    PrintSchema,
    /// Inspect or move a single deal
    #[command(subcommand)]
    Deal(DealCmd),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MigrateAction {
    Up,
    Down,
    Reset,
    Status,
}

#[derive(Subcommand, Debug)]
enum DealCmd {
    /// Move a deal to another stage
    Transition {
        id: Uuid,
        /// Target stage key, e.g. `qualified` or `closed_lost`
        stage: String,
        #[arg(long)]
        probability: Option<i16>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long, value_enum)]
        lost_reason: Option<CliLostReason>,
        #[arg(long)]
        lost_notes: Option<String>,
        #[arg(long)]
        expected_version: Option<i32>,
        /// Recorded as the actor of the change
        #[arg(long, env = "ACTOR_ID")]
        actor: Uuid,
    },
    /// Print the stage history of a deal, newest first
    History { id: Uuid },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliLostReason {
    Price,
    Competitor,
    Timing,
    Features,
    Other,
}

impl From<CliLostReason> for LostReason {
    fn from(value: CliLostReason) -> Self {
        match value {
            CliLostReason::Price => LostReason::Price,
            CliLostReason::Competitor => LostReason::Competitor,
            CliLostReason::Timing => LostReason::Timing,
            CliLostReason::Features => LostReason::Features,
            CliLostReason::Other => LostReason::Other,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let db = Arc::new(Database::connect(&config.database_url).await?);

    match cli.cmd {
        Cmd::Migrate { action } => migrate(db.as_ref(), action).await,
        Cmd::Seed => seed(db.as_ref()).await,
        Cmd::PrintSchema => {
            let AppSchema(schema) = build_schema(db);
            println!("{}", schema.sdl());
            Ok(())
        }
        Cmd::Serve { bind } => {
            let config = config.with_bind(bind);
            Migrator::up(db.as_ref(), None).await?;
            let AppSchema(schema) = build_schema(db.clone());
            let state = AppState { schema, db };
            http::serve(config.bind, &config.cors_allowed_origins, state).await
        }
        Cmd::Deal(cmd) => run_deal_command(db.as_ref(), cmd).await,
    }
}

async fn migrate(db: &DatabaseConnection, action: MigrateAction) -> Result<()> {
    match action {
        MigrateAction::Up => Migrator::up(db, None).await?,
        MigrateAction::Down => Migrator::down(db, Some(1)).await?,
        MigrateAction::Reset => Migrator::reset(db).await?,
        MigrateAction::Status => Migrator::status(db).await?,
    }
    info!(?action, "migration command finished");
    Ok(())
}

async fn seed(db: &DatabaseConnection) -> Result<()> {
    let seeded = seed_crm_demo(db)
        .await
        .map_err(|err| anyhow!("seed data failed: {}", err))?;
    info!(
        companies = seeded.companies.len(),
        contacts = seeded.contacts.len(),
        deals = seeded.deals.len(),
        "demo data ready"
    );
    Ok(())
}

async fn run_deal_command(db: &DatabaseConnection, cmd: DealCmd) -> Result<()> {
    match cmd {
        DealCmd::Transition {
            id,
            stage,
            probability,
            note,
            lost_reason,
            lost_notes,
            expected_version,
            actor,
        } => {
            let stage = rules::parse_stage(&stage.to_ascii_lowercase())?;
            let mut request = TransitionRequest::to(stage);
            request.probability = probability;
            request.note = note;
            request.lost_reason = lost_reason.map(Into::into);
            request.lost_notes = lost_notes;
            request.expected_version = expected_version;

            let deal = transition_deal(db, id, request, Actor::new(actor)).await?;
            println!(
                "{} {} {}% v{}",
                deal.deal_code,
                rules::stage_key(deal.stage),
                deal.probability,
                deal.version
            );
            Ok(())
        }
        DealCmd::History { id } => {
            for row in get_stage_history(db, id).await? {
                println!(
                    "{} {} -> {}{}",
                    row.changed_at.to_rfc3339(),
                    rules::stage_key(row.from_stage),
                    rules::stage_key(row.to_stage),
                    row.note.map(|n| format!(" ({n})")).unwrap_or_default()
                );
            }
            Ok(())
        }
    }
}
