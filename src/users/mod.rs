use crate::state::AppState;
use axum::Router;

mod dto;
pub mod extractors;
pub mod handlers;
#[cfg(test)]
pub(crate) mod memory;
mod names;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod store;
pub mod validation;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::public_routes())
        .merge(handlers::self_service_routes())
        .merge(handlers::admin_routes())
}
