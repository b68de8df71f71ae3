pub mod handlers;
pub mod models;
pub mod routes;

use crate::config::Config;
use crate::ingest::Pipeline;
use std::sync::Arc;

pub use routes::create_router;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub config: Config,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, config: Config) -> Self {
        Self { pipeline, config }
    }
}
