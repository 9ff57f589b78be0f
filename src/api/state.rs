//! Application state for the API server

use crate::ingest::Ingestion;

/// Shared state handed to every route handler. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub ingestion: Ingestion,
}

impl AppState {
    pub fn new(ingestion: Ingestion) -> Self {
        Self { ingestion }
    }
}
