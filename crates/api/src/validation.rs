//! Pure checks run on a candidate state before anything is persisted.

use chrono::NaiveDate;
use entity::deal::{self, Stage};

use crate::error::ValidationError;
use crate::rules::probability_band;

pub const SUPPORTED_CURRENCIES: [&str; 5] = ["USD", "EUR", "GBP", "JPY", "CAD"];
pub const TITLE_MAX: usize = 200;
pub const NOTES_MAX: usize = 65_535;
/// Fifteen digits, two of them after the decimal point.
pub const AMOUNT_MAX_CENTS: i64 = 999_999_999_999_999;

/// Full invariant check for a deal row as it would be committed.
pub fn validate_deal(deal: &deal::Model) -> Result<(), ValidationError> {
    require_text("title", &deal.title, TITLE_MAX)?;
    if deal.amount_cents < 0 {
        return Err(ValidationError::NegativeAmount);
    }
    if deal.amount_cents > AMOUNT_MAX_CENTS {
        return Err(ValidationError::AmountTooLarge {
            max: AMOUNT_MAX_CENTS,
        });
    }
    if !SUPPORTED_CURRENCIES.contains(&deal.currency.as_str()) {
        return Err(ValidationError::UnsupportedCurrency(deal.currency.clone()));
    }
    check_probability(deal.stage, deal.probability)?;
    check_close_dates(deal.expected_close_date, deal.actual_close_date)?;
    if deal.stage == Stage::ClosedLost && deal.lost_reason.is_none() {
        return Err(ValidationError::MissingLostReason);
    }
    if let Some(notes) = &deal.notes {
        validate_length("notes", notes, NOTES_MAX)?;
    }
    if let Some(notes) = &deal.lost_notes {
        validate_length("lostNotes", notes, NOTES_MAX)?;
    }
    Ok(())
}

pub fn check_probability(stage: Stage, probability: i16) -> Result<(), ValidationError> {
    let band = probability_band(stage);
    if band.contains(&probability) {
        Ok(())
    } else {
        Err(ValidationError::ProbabilityOutOfBand {
            stage,
            probability,
            min: *band.start(),
            max: *band.end(),
        })
    }
}

pub fn check_close_dates(
    expected: Option<NaiveDate>,
    actual: Option<NaiveDate>,
) -> Result<(), ValidationError> {
    match (expected, actual) {
        (Some(expected), Some(actual)) if actual < expected => {
            Err(ValidationError::CloseBeforeExpected)
        }
        _ => Ok(()),
    }
}

/// Trims `value` and rejects it when empty or longer than `max` characters.
pub fn require_text(field: &'static str, value: &str, max: usize) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required { field });
    }
    validate_length(field, trimmed, max)?;
    Ok(trimmed.to_string())
}

/// Trims optional free text, mapping blank input to `None`.
pub fn optional_text(
    field: &'static str,
    value: Option<String>,
    max: usize,
) -> Result<Option<String>, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => {
            validate_length(field, text, max)?;
            Ok(Some(text.to_string()))
        }
        _ => Ok(None),
    }
}

pub fn validate_length(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

pub fn normalize_currency(value: &str) -> Result<String, ValidationError> {
    let code = value.trim().to_ascii_uppercase();
    if SUPPORTED_CURRENCIES.contains(&code.as_str()) {
        Ok(code)
    } else {
        Err(ValidationError::UnsupportedCurrency(value.trim().to_string()))
    }
}
