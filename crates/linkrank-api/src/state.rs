//! Shared router state.

use std::sync::Arc;

use linkrank_jobs::LinkSuggestionService;

/// State handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LinkSuggestionService>,
}

impl AppState {
    pub fn new(service: LinkSuggestionService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}
