use std::sync::Arc;

use data_store::Database;

/// Shared state injected into every route handler.
pub struct AppState {
    pub db: Arc<Database>,
}

impl AppState {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}
