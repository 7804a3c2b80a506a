use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    // Debounced autosave has no timer thread; deadlines are checked against
    // the wall clock whenever the loop wakes up for a request.
    handlers::marking::pump_autosave(state);

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::classes::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::engagements::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::marked::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::marking::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
