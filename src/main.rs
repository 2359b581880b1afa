use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use tokenbroker::api::{create_auth_router, BrokerAppState};
use tokenbroker::auth::ApiKeyGate;
use tokenbroker::config::BrokerConfig;
use tokenbroker::crypto::TokenCipher;
use tokenbroker::lifecycle::TokenManager;
use tokenbroker::provider::JiraProvider;
use tokenbroker::store::{FileTokenStore, TokenStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenbroker=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Token broker starting...");

    let config = BrokerConfig::from_env().context("Invalid configuration")?;

    let cipher =
        TokenCipher::new(&config.encryption_key).context("ENCRYPTION_KEY is not usable")?;

    let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(&config.tokens_file));
    let provider = Arc::new(JiraProvider::new(&config)?);
    let manager = TokenManager::new(Arc::clone(&store), cipher, Arc::clone(&provider));
    let gate = ApiKeyGate::new(Some(config.internal_api_key.clone()));

    info!(jira_base_url = %config.jira_base_url, "Identity provider configured");
    info!(redirect_uri = %config.jira_redirect_uri, "Redirect URI configured");
    info!(tokens_file = %config.tokens_file.display(), "Token store configured");
    info!("Internal API authentication: ENABLED");

    let router = create_auth_router(BrokerAppState {
        store,
        manager,
        provider,
        gate,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .context("Failed to bind broker port")?;
    info!(port = config.port, "Auth API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Auth API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Token broker stopped");

    Ok(())
}
