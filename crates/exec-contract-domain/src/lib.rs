#![forbid(unsafe_code)]

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Naive-UTC event timestamp layout: ISO-8601 date and time with six
/// subsecond digits and no offset suffix.
pub const EVENT_TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]");

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventState {
    Received,
    Deciding,
    Completed,
}

impl EventState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Deciding => "DECIDING",
            Self::Completed => "COMPLETED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RECEIVED" => Some(Self::Received),
            "DECIDING" => Some(Self::Deciding),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State-specific payload of a trace event. Each variant carries exactly the
/// fields its lifecycle state allows, so an illegal combination (say, a
/// COMPLETED event with a `decision`) is unrepresentable once typed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventDetail {
    Received {
        input: Value,
    },
    Deciding {
        decision: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Completed {
        outcome: Value,
    },
}

impl EventDetail {
    #[must_use]
    pub fn state(&self) -> EventState {
        match self {
            Self::Received { .. } => EventState::Received,
            Self::Deciding { .. } => EventState::Deciding,
            Self::Completed { .. } => EventState::Completed,
        }
    }
}

/// One timestamped lifecycle record within a run. `step_id` is
/// caller-supplied and not verified monotonic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEvent {
    pub step_id: i64,
    pub timestamp: String,
    #[serde(flatten)]
    pub detail: EventDetail,
}

impl TraceEvent {
    /// Flat field-map form of the event — the shape the contract validator
    /// checks and serializers emit. Unset optionals are omitted, never null.
    #[must_use]
    pub fn record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("step_id".to_string(), Value::from(self.step_id));
        record.insert(
            "state".to_string(),
            Value::from(self.detail.state().as_str()),
        );
        record.insert("timestamp".to_string(), Value::from(self.timestamp.clone()));
        match &self.detail {
            EventDetail::Received { input } => {
                record.insert("input".to_string(), input.clone());
            }
            EventDetail::Deciding {
                decision,
                confidence,
                reason,
            } => {
                record.insert("decision".to_string(), Value::from(decision.clone()));
                if let Some(confidence) = confidence {
                    record.insert("confidence".to_string(), Value::from(*confidence));
                }
                if let Some(reason) = reason {
                    record.insert("reason".to_string(), Value::from(reason.clone()));
                }
            }
            EventDetail::Completed { outcome } => {
                record.insert("outcome".to_string(), outcome.clone());
            }
        }
        record
    }
}

/// One traced execution of a single agent invocation.
///
/// `parent_run_id` and `invoked_by_agent` are opaque, lookup-only
/// cross-references forming a delegation forest; nothing enforces that they
/// resolve. Both stay present (as explicit null) in the serialized form even
/// when unset. The event log is append-only and insertion-ordered, with no
/// cross-event sequencing rule.
///
/// A run is a plain mutable value with no internal synchronization;
/// concurrent appenders must be serialized by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRun {
    pub run_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub parent_run_id: Option<String>,
    #[serde(default)]
    pub invoked_by_agent: Option<String>,
    #[serde(default)]
    pub events: Vec<TraceEvent>,
}

/// Format an instant as a naive-UTC event timestamp literal.
///
/// Assembled from component accessors: the literal carries no offset suffix,
/// which the well-known formats cannot produce, and builder stamping must be
/// infallible.
#[must_use]
pub fn event_timestamp(at: OffsetDateTime) -> String {
    let utc = at.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second(),
        utc.microsecond()
    )
}

#[must_use]
pub fn now_event_timestamp() -> String {
    event_timestamp(OffsetDateTime::now_utc())
}

/// Parse a naive-UTC event timestamp literal.
///
/// # Errors
/// Returns an error when the value does not match the microsecond-precision
/// layout of [`EVENT_TIMESTAMP_FORMAT`].
pub fn parse_event_timestamp(value: &str) -> Result<PrimitiveDateTime> {
    PrimitiveDateTime::parse(value, EVENT_TIMESTAMP_FORMAT)
        .map_err(|err| anyhow!("invalid event timestamp '{value}': {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    #[test]
    fn timestamp_literal_is_naive_utc_with_micro_precision() {
        let stamped = event_timestamp(datetime!(2026-02-07 12:00:00.000123 UTC));
        assert_eq!(stamped, "2026-02-07T12:00:00.000123");
    }

    #[test]
    fn timestamp_normalizes_offset_inputs_to_utc() {
        let stamped = event_timestamp(datetime!(2026-02-07 13:30:00.5 +01:30));
        assert_eq!(stamped, "2026-02-07T12:00:00.500000");
    }

    #[test]
    fn timestamp_round_trips_through_the_shared_layout() {
        let stamped = event_timestamp(datetime!(2026-02-07 12:00:00.000123 UTC));
        let parsed = must_ok(parse_event_timestamp(&stamped));
        assert_eq!(parsed, datetime!(2026-02-07 12:00:00.000123));
    }

    #[test]
    fn now_timestamp_matches_the_shared_layout() {
        let stamped = now_event_timestamp();
        assert_eq!(stamped.len(), 26);
        let _ = must_ok(parse_event_timestamp(&stamped));
    }

    #[test]
    fn offset_suffixed_timestamps_are_rejected() {
        assert!(parse_event_timestamp("2026-02-07T12:00:00.000123Z").is_err());
        assert!(parse_event_timestamp("2026-02-07T12:00:00").is_err());
    }

    #[test]
    fn deciding_event_omits_unset_optionals() {
        let event = TraceEvent {
            step_id: 2,
            timestamp: "2026-02-07T12:00:00.000000".to_string(),
            detail: EventDetail::Deciding {
                decision: "PROCEED".to_string(),
                confidence: None,
                reason: None,
            },
        };

        let value = must_ok(serde_json::to_value(&event));
        assert_eq!(
            value,
            json!({
                "step_id": 2,
                "state": "DECIDING",
                "timestamp": "2026-02-07T12:00:00.000000",
                "decision": "PROCEED"
            })
        );
    }

    #[test]
    fn run_keeps_explicit_nulls_for_unset_cross_references() {
        let run = ExecutionRun {
            run_id: "run_root_001".to_string(),
            agent_id: "ROOT_AGENT".to_string(),
            parent_run_id: None,
            invoked_by_agent: None,
            events: Vec::new(),
        };

        let value = must_ok(serde_json::to_value(&run));
        assert_eq!(
            value,
            json!({
                "run_id": "run_root_001",
                "agent_id": "ROOT_AGENT",
                "parent_run_id": null,
                "invoked_by_agent": null,
                "events": []
            })
        );
    }

    #[test]
    fn record_matches_serde_serialization_for_every_state() {
        let details = [
            EventDetail::Received {
                input: json!({"task": "triage inbox"}),
            },
            EventDetail::Deciding {
                decision: "PROCEED".to_string(),
                confidence: Some(0.9),
                reason: Some("low blast radius".to_string()),
            },
            EventDetail::Completed {
                outcome: json!("done"),
            },
        ];

        for detail in details {
            let event = TraceEvent {
                step_id: 7,
                timestamp: "2026-02-07T12:00:00.000000".to_string(),
                detail,
            };
            assert_eq!(
                must_ok(serde_json::to_value(&event)),
                Value::Object(event.record())
            );
        }
    }

    #[test]
    fn event_state_literals_round_trip() {
        for state in [
            EventState::Received,
            EventState::Deciding,
            EventState::Completed,
        ] {
            assert_eq!(EventState::parse(state.as_str()), Some(state));
        }
        assert_eq!(EventState::parse("DELEGATING"), None);
    }
}
