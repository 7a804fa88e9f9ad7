//! Read-only roll-ups over active deals.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use entity::deal::{self, Stage};
use entity::related::RelatedKind;
use entity::{contact, interaction};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect};
use uuid::Uuid;

use crate::directory::ensure_company_active;
use crate::error::CrmResult;
use crate::rules::{is_terminal, weighted_amount_cents, STAGES};

/// Close-date horizons reported by [`forecast`], in days.
pub const FORECAST_WINDOWS: [i64; 3] = [30, 60, 90];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTotals {
    pub stage: Stage,
    pub count: u64,
    pub amount_cents: i64,
    pub weighted_amount_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastWindow {
    pub days: i64,
    pub count: u64,
    pub amount_cents: i64,
    pub weighted_amount_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompanyStats {
    pub contacts: u64,
    pub deals: u64,
    pub open_deals: u64,
    pub amount_cents: i64,
    pub weighted_amount_cents: i64,
    pub interactions: u64,
}

/// Headline numbers for one active company, over its active contacts and deals.
pub async fn company_stats<C>(conn: &C, company_id: Uuid) -> CrmResult<CompanyStats>
where
    C: ConnectionTrait,
{
    ensure_company_active(conn, company_id).await?;
    let contacts = contact::Entity::find()
        .filter(contact::Column::CompanyId.eq(company_id))
        .filter(contact::Column::IsActive.eq(true))
        .count(conn)
        .await?;
    let interactions = interaction::Entity::find()
        .filter(interaction::Column::RelatedKind.eq(RelatedKind::Company))
        .filter(interaction::Column::RelatedId.eq(company_id))
        .count(conn)
        .await?;
    let deals: Vec<(Stage, i64, i16)> = deal::Entity::find()
        .select_only()
        .column(deal::Column::Stage)
        .column(deal::Column::AmountCents)
        .column(deal::Column::Probability)
        .filter(deal::Column::CompanyId.eq(company_id))
        .filter(deal::Column::IsActive.eq(true))
        .into_tuple()
        .all(conn)
        .await?;

    let mut stats = tally_deals(&deals);
    stats.contacts = contacts;
    stats.interactions = interactions;
    Ok(stats)
}

pub fn tally_deals(rows: &[(Stage, i64, i16)]) -> CompanyStats {
    rows.iter()
        .fold(CompanyStats::default(), |mut stats, (stage, amount, probability)| {
            stats.deals += 1;
            if !is_terminal(*stage) {
                stats.open_deals += 1;
            }
            stats.amount_cents = stats.amount_cents.saturating_add(*amount);
            stats.weighted_amount_cents = stats
                .weighted_amount_cents
                .saturating_add(weighted_amount_cents(*amount, *probability));
            stats
        })
}

/// Totals for every stage in board order, including empty ones.
pub async fn pipeline_summary<C>(conn: &C) -> CrmResult<Vec<StageTotals>>
where
    C: ConnectionTrait,
{
    let rows: Vec<(Stage, i64, i16)> = deal::Entity::find()
        .select_only()
        .column(deal::Column::Stage)
        .column(deal::Column::AmountCents)
        .column(deal::Column::Probability)
        .filter(deal::Column::IsActive.eq(true))
        .into_tuple()
        .all(conn)
        .await?;
    Ok(summarize(&rows))
}

pub fn summarize(rows: &[(Stage, i64, i16)]) -> Vec<StageTotals> {
    let mut totals: HashMap<Stage, StageTotals> = STAGES
        .iter()
        .map(|stage| {
            (
                *stage,
                StageTotals {
                    stage: *stage,
                    count: 0,
                    amount_cents: 0,
                    weighted_amount_cents: 0,
                },
            )
        })
        .collect();
    for (stage, amount_cents, probability) in rows {
        if let Some(entry) = totals.get_mut(stage) {
            entry.count += 1;
            entry.amount_cents = entry.amount_cents.saturating_add(*amount_cents);
            entry.weighted_amount_cents = entry
                .weighted_amount_cents
                .saturating_add(weighted_amount_cents(*amount_cents, *probability));
        }
    }
    STAGES
        .iter()
        .filter_map(|stage| totals.remove(stage))
        .collect()
}

/// Open deals expected to close within each window starting `today`.
pub async fn forecast<C>(conn: &C, today: NaiveDate) -> CrmResult<Vec<ForecastWindow>>
where
    C: ConnectionTrait,
{
    let horizon = FORECAST_WINDOWS.iter().copied().max().unwrap_or(0);
    let rows: Vec<(Stage, i64, i16, NaiveDate)> = deal::Entity::find()
        .select_only()
        .column(deal::Column::Stage)
        .column(deal::Column::AmountCents)
        .column(deal::Column::Probability)
        .column(deal::Column::ExpectedCloseDate)
        .filter(deal::Column::IsActive.eq(true))
        .filter(deal::Column::Stage.is_not_in([Stage::ClosedWon, Stage::ClosedLost]))
        .filter(deal::Column::ExpectedCloseDate.gte(today))
        .filter(deal::Column::ExpectedCloseDate.lte(today + Duration::days(horizon)))
        .into_tuple()
        .all(conn)
        .await?;
    Ok(bucket(&rows, today))
}

pub fn bucket(rows: &[(Stage, i64, i16, NaiveDate)], today: NaiveDate) -> Vec<ForecastWindow> {
    FORECAST_WINDOWS
        .iter()
        .map(|days| {
            let until = today + Duration::days(*days);
            let mut window = ForecastWindow {
                days: *days,
                count: 0,
                amount_cents: 0,
                weighted_amount_cents: 0,
            };
            for (stage, amount_cents, probability, expected) in rows {
                if is_terminal(*stage) || *expected < today || *expected > until {
                    continue;
                }
                window.count += 1;
                window.amount_cents = window.amount_cents.saturating_add(*amount_cents);
                window.weighted_amount_cents = window
                    .weighted_amount_cents
                    .saturating_add(weighted_amount_cents(*amount_cents, *probability));
            }
            window
        })
        .collect()
}
