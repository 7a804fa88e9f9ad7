//! Stage tables: probability bands, defaults and forecast grouping.

use std::ops::RangeInclusive;

use entity::deal::{self, ForecastCategory, Stage};
use sea_orm::{ActiveEnum, Iterable};

use crate::error::{CrmError, TransitionError};

/// Stages in board order.
pub const STAGES: [Stage; 7] = [
    Stage::Lead,
    Stage::Qualified,
    Stage::Proposal,
    Stage::Negotiation,
    Stage::ClosedWon,
    Stage::ClosedLost,
    Stage::OnHold,
];

pub fn stage_key(stage: Stage) -> &'static str {
    match stage {
        Stage::Lead => "lead",
        Stage::Qualified => "qualified",
        Stage::Proposal => "proposal",
        Stage::Negotiation => "negotiation",
        Stage::ClosedWon => "closed_won",
        Stage::ClosedLost => "closed_lost",
        Stage::OnHold => "on_hold",
    }
}

pub fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Lead => "Lead",
        Stage::Qualified => "Qualified",
        Stage::Proposal => "Proposal",
        Stage::Negotiation => "Negotiation",
        Stage::ClosedWon => "Closed Won",
        Stage::ClosedLost => "Closed Lost",
        Stage::OnHold => "On Hold",
    }
}

/// Parses a stored/wire stage key such as `closed_won`.
pub fn parse_stage(raw: &str) -> Result<Stage, CrmError> {
    let wanted = raw.trim();
    deal::Stage::iter()
        .find(|stage| stage.to_value() == wanted)
        .ok_or_else(|| TransitionError::UnknownStage(wanted.to_string()).into())
}

/// Inclusive probability range a deal may hold while in `stage`.
pub fn probability_band(stage: Stage) -> RangeInclusive<i16> {
    match stage {
        Stage::Lead => 0..=30,
        Stage::Qualified => 30..=50,
        Stage::Proposal => 50..=70,
        Stage::Negotiation => 70..=90,
        Stage::ClosedWon => 95..=100,
        Stage::ClosedLost => 0..=5,
        Stage::OnHold => 0..=100,
    }
}

/// Probability applied by a transition when the caller does not pick one.
pub fn default_probability(stage: Stage) -> i16 {
    match stage {
        Stage::Lead => 20,
        Stage::Qualified => 40,
        Stage::Proposal => 60,
        Stage::Negotiation => 80,
        Stage::ClosedWon => 100,
        Stage::ClosedLost => 0,
        Stage::OnHold => 50,
    }
}

pub fn forecast_category(stage: Stage) -> ForecastCategory {
    match stage {
        Stage::Lead | Stage::Qualified | Stage::OnHold => ForecastCategory::Pipeline,
        Stage::Proposal => ForecastCategory::BestCase,
        Stage::Negotiation => ForecastCategory::Commit,
        Stage::ClosedWon | Stage::ClosedLost => ForecastCategory::Closed,
    }
}

pub fn is_terminal(stage: Stage) -> bool {
    matches!(stage, Stage::ClosedWon | Stage::ClosedLost)
}

/// `amount × probability / 100`, truncated to whole cents.
///
/// Computed in `i128`; results outside `i64` saturate.
pub fn weighted_amount_cents(amount_cents: i64, probability: i16) -> i64 {
    let weighted = i128::from(amount_cents) * i128::from(probability) / 100;
    i64::try_from(weighted).unwrap_or(if weighted < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_default_sits_inside_its_band() {
        for stage in STAGES {
            assert!(
                probability_band(stage).contains(&default_probability(stage)),
                "{} default escapes its band",
                stage_key(stage)
            );
        }
    }

    #[test]
    fn board_order_covers_every_stage() {
        assert_eq!(Stage::iter().count(), STAGES.len());
        for stage in Stage::iter() {
            assert!(STAGES.contains(&stage));
            assert_eq!(stage.to_value(), stage_key(stage));
        }
    }

    #[test]
    fn parse_stage_accepts_keys_and_rejects_labels() {
        assert_eq!(parse_stage("closed_won").unwrap(), Stage::ClosedWon);
        assert_eq!(parse_stage(" on_hold ").unwrap(), Stage::OnHold);
        let err = parse_stage("Closed Won").unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn only_closed_stages_are_terminal() {
        let terminal: Vec<_> = STAGES.into_iter().filter(|s| is_terminal(*s)).collect();
        assert_eq!(terminal, vec![Stage::ClosedWon, Stage::ClosedLost]);
    }

    #[test]
    fn weighted_amount_scales_by_probability() {
        assert_eq!(weighted_amount_cents(100_000, 60), 60_000);
        assert_eq!(weighted_amount_cents(1_000, 0), 0);
        assert_eq!(weighted_amount_cents(999, 50), 499);
    }

    #[test]
    fn weighted_amount_does_not_overflow_on_huge_amounts() {
        assert_eq!(weighted_amount_cents(i64::MAX, 100), i64::MAX);
        assert_eq!(weighted_amount_cents(i64::MAX / 10, 40), 368_934_881_474_191_032);
        assert_eq!(weighted_amount_cents(999_999_999_999_999, 95), 949_999_999_999_999);
        assert_eq!(weighted_amount_cents(i64::MAX, 200), i64::MAX);
    }

    #[test]
    fn forecast_groups_follow_stage() {
        assert_eq!(forecast_category(Stage::Lead), ForecastCategory::Pipeline);
        assert_eq!(forecast_category(Stage::Proposal), ForecastCategory::BestCase);
        assert_eq!(forecast_category(Stage::Negotiation), ForecastCategory::Commit);
        assert_eq!(forecast_category(Stage::ClosedLost), ForecastCategory::Closed);
    }
}
