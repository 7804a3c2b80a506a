use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::cache::MarkingCache;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// The one open marking screen, if any. Holds the canonical map and the
    /// debounced persistence queue; pumped before every request.
    pub marking: Option<MarkingCache>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            workspace: None,
            db: None,
            marking: None,
        }
    }
}
