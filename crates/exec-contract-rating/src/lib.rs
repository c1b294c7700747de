#![forbid(unsafe_code)]

use exec_contract_domain::{EventDetail, ExecutionRun};
use serde::{Deserialize, Serialize};

/// Decision literal that signals a human must intervene.
pub const ESCALATE_DECISION: &str = "ESCALATE";

/// Confidence floor at which a completed, non-escalated run rates LOW.
pub const CONFIDENT_DECISION_FLOOR: f64 = 0.7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskRating {
    Low,
    Medium,
    High,
}

impl RiskRating {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskRating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate one run from its event log alone.
///
/// Single scan in stored order: the last DECIDING event wins, completion is
/// sticky from the first COMPLETED event. The ladder, in priority order:
/// never completed rates HIGH whatever was decided; an ESCALATE decision
/// rates HIGH whatever its confidence; a missing decision or confidence
/// rates MEDIUM; confidence at or above [`CONFIDENT_DECISION_FLOOR`] rates
/// LOW, below it MEDIUM. Re-derived from scratch on every call; nothing is
/// persisted between calls.
#[must_use]
pub fn rate_execution(run: &ExecutionRun) -> RiskRating {
    let mut last_decision: Option<(&str, Option<f64>)> = None;
    let mut completed = false;

    for event in &run.events {
        match &event.detail {
            EventDetail::Deciding {
                decision,
                confidence,
                ..
            } => {
                last_decision = Some((decision.as_str(), *confidence));
            }
            EventDetail::Completed { .. } => completed = true,
            EventDetail::Received { .. } => {}
        }
    }

    if !completed {
        return RiskRating::High;
    }

    let Some((decision, confidence)) = last_decision else {
        return RiskRating::Medium;
    };

    if decision == ESCALATE_DECISION {
        return RiskRating::High;
    }

    match confidence {
        Some(value) if value >= CONFIDENT_DECISION_FLOOR => RiskRating::Low,
        _ => RiskRating::Medium,
    }
}
