#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use exec_contract_domain::{now_event_timestamp, EventDetail, ExecutionRun, TraceEvent};
use serde_json::{Map, Value};

/// Fields every event must carry regardless of state.
pub const BASE_REQUIRED_FIELDS: &[&str] = &["step_id", "state", "timestamp"];

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StateRule {
    pub state: &'static str,
    pub required: &'static [&'static str],
    pub forbidden: &'static [&'static str],
}

/// Per-state field contract. Process-wide constant; states without an entry
/// get base-field checking only.
pub const STATE_RULES: &[StateRule] = &[
    StateRule {
        state: "RECEIVED",
        required: &["input"],
        forbidden: &["decision", "outcome"],
    },
    StateRule {
        state: "DECIDING",
        required: &["decision"],
        forbidden: &["outcome"],
    },
    StateRule {
        state: "COMPLETED",
        required: &["outcome"],
        forbidden: &["decision"],
    },
];

#[must_use]
pub fn rule_for_state(state: &str) -> Option<&'static StateRule> {
    STATE_RULES.iter().find(|rule| rule.state == state)
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ContractViolation {
    #[error("event missing base field: {field}")]
    MissingBaseField { field: String },
    #[error("{state} event missing required field: {field}")]
    MissingRequiredField { state: String, field: String },
    #[error("{state} event must not include field: {field}")]
    ForbiddenFieldPresent { state: String, field: String },
}

/// Check one flat event record against the base and per-state field contract.
///
/// Presence-only: field values are not type-checked here. A record whose
/// `state` is unknown, or not a string, passes with base checking alone.
/// Pure and deterministic given the record and [`STATE_RULES`].
///
/// # Errors
/// Returns the first [`ContractViolation`] encountered.
pub fn validate_event(record: &Map<String, Value>) -> Result<(), ContractViolation> {
    for field in BASE_REQUIRED_FIELDS {
        if !record.contains_key(*field) {
            return Err(ContractViolation::MissingBaseField {
                field: (*field).to_string(),
            });
        }
    }

    let Some(state) = record.get("state").and_then(Value::as_str) else {
        return Ok(());
    };
    let Some(rule) = rule_for_state(state) else {
        return Ok(());
    };

    for field in rule.required {
        if !record.contains_key(*field) {
            return Err(ContractViolation::MissingRequiredField {
                state: state.to_string(),
                field: (*field).to_string(),
            });
        }
    }

    for field in rule.forbidden {
        if record.contains_key(*field) {
            return Err(ContractViolation::ForbiddenFieldPresent {
                state: state.to_string(),
                field: (*field).to_string(),
            });
        }
    }

    Ok(())
}

/// Allocate a run with an empty event log.
///
/// `run_id` uniqueness is the caller's responsibility; duplicates are not
/// detected here or anywhere downstream.
#[must_use]
pub fn start_run(
    run_id: &str,
    agent_id: &str,
    parent_run_id: Option<&str>,
    invoked_by_agent: Option<&str>,
) -> ExecutionRun {
    ExecutionRun {
        run_id: run_id.to_string(),
        agent_id: agent_id.to_string(),
        parent_run_id: parent_run_id.map(str::to_string),
        invoked_by_agent: invoked_by_agent.map(str::to_string),
        events: Vec::new(),
    }
}

/// Append a fully formed event after contract validation.
///
/// Validate-then-append: a rejected event leaves the run unchanged.
///
/// # Errors
/// Returns the validator's [`ContractViolation`] for the candidate record.
pub fn append_event(run: &mut ExecutionRun, event: TraceEvent) -> Result<(), ContractViolation> {
    validate_event(&event.record())?;
    run.events.push(event);
    Ok(())
}

/// Record that the agent received its input.
///
/// # Errors
/// Returns a [`ContractViolation`] when the candidate event fails the
/// contract.
pub fn record_received(
    run: &mut ExecutionRun,
    step_id: i64,
    input: Value,
) -> Result<(), ContractViolation> {
    append_event(
        run,
        TraceEvent {
            step_id,
            timestamp: now_event_timestamp(),
            detail: EventDetail::Received { input },
        },
    )
}

/// Record a decision made by the agent. Unset `confidence`/`reason` are
/// omitted from the event rather than stored as null placeholders.
///
/// # Errors
/// Returns a [`ContractViolation`] when the candidate event fails the
/// contract.
pub fn record_decision(
    run: &mut ExecutionRun,
    step_id: i64,
    decision: &str,
    confidence: Option<f64>,
    reason: Option<&str>,
) -> Result<(), ContractViolation> {
    append_event(
        run,
        TraceEvent {
            step_id,
            timestamp: now_event_timestamp(),
            detail: EventDetail::Deciding {
                decision: decision.to_string(),
                confidence,
                reason: reason.map(str::to_string),
            },
        },
    )
}

/// Record execution completion.
///
/// # Errors
/// Returns a [`ContractViolation`] when the candidate event fails the
/// contract.
pub fn record_completion(
    run: &mut ExecutionRun,
    step_id: i64,
    outcome: Value,
) -> Result<(), ContractViolation> {
    append_event(
        run,
        TraceEvent {
            step_id,
            timestamp: now_event_timestamp(),
            detail: EventDetail::Completed { outcome },
        },
    )
}

/// Validate and append one externally sourced flat event record.
///
/// A contract-valid record that still does not decode as a known lifecycle
/// state (unknown `state`, wrong value type) is an ingestion error, distinct
/// from a [`ContractViolation`]. Either way a failure leaves the run
/// unchanged.
///
/// # Errors
/// Returns the contract violation or the decode failure.
pub fn append_record(run: &mut ExecutionRun, record: Map<String, Value>) -> Result<()> {
    validate_event(&record)?;
    let event: TraceEvent = serde_json::from_value(Value::Object(record))
        .map_err(|err| anyhow!("event record does not decode as a known lifecycle state: {err}"))?;
    run.events.push(event);
    Ok(())
}

/// Decode one serialized run, validating every event record before append.
///
/// # Errors
/// Returns shape errors for non-object runs/events or non-string identity
/// fields, and contract/decode errors (with the event index) per event.
pub fn decode_run(value: &Value) -> Result<ExecutionRun> {
    let Some(object) = value.as_object() else {
        return Err(anyhow!("run must be a JSON object"));
    };

    let mut run = start_run(
        read_required_str(object, "run_id")?,
        read_required_str(object, "agent_id")?,
        read_optional_str(object, "parent_run_id")?,
        read_optional_str(object, "invoked_by_agent")?,
    );

    let events = match object.get("events") {
        None | Some(Value::Null) => &[],
        Some(Value::Array(events)) => events.as_slice(),
        Some(_) => return Err(anyhow!("run field 'events' must be an array")),
    };

    for (index, event) in events.iter().enumerate() {
        let Some(record) = event.as_object() else {
            return Err(anyhow!("events[{index}] must be a JSON object"));
        };
        append_record(&mut run, record.clone())
            .with_context(|| format!("events[{index}] rejected"))?;
    }

    Ok(run)
}

fn read_required_str<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    object
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("run field '{field}' must be a string"))
}

fn read_optional_str<'a>(object: &'a Map<String, Value>, field: &str) -> Result<Option<&'a str>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.as_str())),
        Some(_) => Err(anyhow!("run field '{field}' must be a string or null")),
    }
}
