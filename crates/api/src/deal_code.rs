//! `DEAL-<year>-<seq>` allocation backed by a per-year counter row.

use chrono::Utc;
use entity::{deal, deal_code_sequence};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QuerySelect,
};
use tracing::debug;

use crate::error::{CrmError, CrmResult};

pub const DEAL_CODE_PREFIX: &str = "DEAL";

/// Formats a code, zero-padding the sequence to three digits. Sequences past
/// 999 simply widen (`DEAL-2024-1000`).
pub fn format_deal_code(year: i32, sequence: i32) -> String {
    format!("{DEAL_CODE_PREFIX}-{year}-{sequence:03}")
}

/// Extracts the sequence from a code issued for `year`.
pub fn parse_sequence(code: &str, year: i32) -> Option<i32> {
    let prefix = format!("{DEAL_CODE_PREFIX}-{year}-");
    let digits = code.strip_prefix(prefix.as_str())?;
    if digits.len() < 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Claims the next code for `year`.
///
/// Must run inside the transaction that inserts the deal: the counter update
/// holds the row lock until that transaction ends, so concurrent creators
/// queue behind it instead of reading the same maximum.
pub async fn allocate_deal_code<C>(conn: &C, year: i32) -> CrmResult<String>
where
    C: ConnectionTrait,
{
    let now: DateTimeWithTimeZone = Utc::now().into();
    if let Some(sequence) = bump_sequence(conn, year, now).await? {
        return Ok(format_deal_code(year, sequence));
    }

    // First code of the year: seed the counter from any codes already issued.
    let seed = highest_issued_sequence(conn, year).await?;
    debug!(year, seed, "seeding deal code sequence");
    deal_code_sequence::Entity::insert(deal_code_sequence::ActiveModel {
        year: Set(year),
        last_value: Set(seed),
        updated_at: Set(now),
    })
    .on_conflict(
        OnConflict::column(deal_code_sequence::Column::Year)
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await?;

    let sequence = bump_sequence(conn, year, now).await?.ok_or_else(|| {
        CrmError::Conflict(format!("deal code sequence for {year} could not be claimed"))
    })?;
    Ok(format_deal_code(year, sequence))
}

async fn bump_sequence<C>(
    conn: &C,
    year: i32,
    now: DateTimeWithTimeZone,
) -> Result<Option<i32>, DbErr>
where
    C: ConnectionTrait,
{
    let result = deal_code_sequence::Entity::update_many()
        .col_expr(
            deal_code_sequence::Column::LastValue,
            Expr::col(deal_code_sequence::Column::LastValue).add(1),
        )
        .col_expr(deal_code_sequence::Column::UpdatedAt, Expr::value(now))
        .filter(deal_code_sequence::Column::Year.eq(year))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Ok(None);
    }
    let row = deal_code_sequence::Entity::find_by_id(year).one(conn).await?;
    Ok(row.map(|row| row.last_value))
}

async fn highest_issued_sequence<C>(conn: &C, year: i32) -> Result<i32, DbErr>
where
    C: ConnectionTrait,
{
    let codes: Vec<String> = deal::Entity::find()
        .select_only()
        .column(deal::Column::DealCode)
        .filter(deal::Column::DealCode.starts_with(format!("{DEAL_CODE_PREFIX}-{year}-")))
        .into_tuple()
        .all(conn)
        .await?;
    Ok(codes
        .iter()
        .filter_map(|code| parse_sequence(code, year))
        .max()
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_three_digits_then_widens() {
        assert_eq!(format_deal_code(2024, 1), "DEAL-2024-001");
        assert_eq!(format_deal_code(2024, 42), "DEAL-2024-042");
        assert_eq!(format_deal_code(2024, 999), "DEAL-2024-999");
        assert_eq!(format_deal_code(2024, 1000), "DEAL-2024-1000");
    }

    #[test]
    fn parses_only_codes_for_the_requested_year() {
        assert_eq!(parse_sequence("DEAL-2024-007", 2024), Some(7));
        assert_eq!(parse_sequence("DEAL-2024-1000", 2024), Some(1000));
        assert_eq!(parse_sequence("DEAL-2023-007", 2024), None);
        assert_eq!(parse_sequence("DEAL-2024-07", 2024), None);
        assert_eq!(parse_sequence("DEAL-2024-00a", 2024), None);
        assert_eq!(parse_sequence("IMPORTED-17", 2024), None);
    }
}
