use std::sync::Arc;

use crate::db::RecommendationStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecommendationStore>,
}

impl AppState {
    /// Creates application state around an already connected store
    pub fn new(store: Arc<dyn RecommendationStore>) -> Self {
        Self { store }
    }
}
