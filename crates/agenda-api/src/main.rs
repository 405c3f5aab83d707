mod auth;
mod batch;
mod config;
mod error;
mod fanout;
mod rate_limit;
mod realtime;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use auth::JwtVerifier;
use config::AppConfig;
use routes::{app_router, AppState};

const DEV_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agenda_api=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);

    // `agenda-api issue-token <user-id>` prints a signed access token and exits.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, user_id] = args.as_slice() {
        if command == "issue-token" {
            let user_id = user_id.parse::<agenda_core::UserId>()?;
            let token = JwtVerifier::new(&config).issue(user_id, DEV_TOKEN_TTL)?;
            println!("{token}");
            return Ok(());
        }
    }

    tracing::info!("Starting agenda-api with config: {:?}", config);

    let state = AppState::from_config(config)?;
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("agenda-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
