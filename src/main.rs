mod app;
mod config;
mod db;
mod error;
mod state;
mod users;

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "users_service=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "error loading config");
            return Err(e);
        }
    };

    let (state, pool) = AppState::init(config).await?;
    let app = app::build_app(state.clone());

    let served = app::serve(app, &state).await;
    pool.close().await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "server failed");
    }
    served
}
