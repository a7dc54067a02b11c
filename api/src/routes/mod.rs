pub mod content;
pub mod health;
pub mod moderate;

use axum::Router;
use std::sync::Arc;

use crate::AppState;

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health::routes())
        .merge(moderate::routes())
        .merge(content::routes())
}
