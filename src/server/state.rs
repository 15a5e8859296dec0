use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<SessionStore>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, store: Arc<SessionStore>) -> Self {
        Self {
            settings: Arc::new(settings),
            store,
            start_time: Instant::now(),
        }
    }
}
