//! Server application state

use modeldepot::ModelDepot;
use std::sync::Arc;

/// Shared application state for all route handlers
pub struct AppState {
    pub depot: Arc<ModelDepot>,
}
