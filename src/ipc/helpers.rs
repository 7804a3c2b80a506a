use chrono::NaiveDate;

use crate::ipc::error::HandlerErr;
use crate::model::{truncate_day, Behaviour, Session};

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a bool", key))),
    }
}

/// Incoming dates may be `YYYY-MM-DD` or a full timestamp; either way only
/// the calendar day survives.
pub fn required_day(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = required_str(params, key)?;
    truncate_day(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an ISO date", key)))
}

pub fn optional_day(params: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(raw) => truncate_day(raw)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an ISO date", key))),
    }
}

pub fn required_session(params: &serde_json::Value, key: &str) -> Result<Session, HandlerErr> {
    let raw = required_str(params, key)?;
    Session::parse_wire(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown session: {}", raw)))
}

pub fn optional_behaviour(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<Behaviour>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let raw = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key)))?;
            Behaviour::parse_wire(raw)
                .map(Some)
                .ok_or_else(|| HandlerErr::bad_params(format!("unknown behaviour: {}", raw)))
        }
    }
}
