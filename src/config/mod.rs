//! Broker configuration.
//!
//! All configuration comes from environment variables, read once at startup
//! into an explicit struct that is threaded into each component constructor.
//! The encryption key and internal API key are hard requirements: the broker
//! refuses to start without them rather than generating a throwaway key.

use anyhow::{Context, Result};
use std::path::PathBuf;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// OAuth client id registered with the identity provider
    pub jira_client_id: String,
    /// OAuth client secret
    pub jira_client_secret: String,
    /// Redirect URI the provider sends the authorization code to
    pub jira_redirect_uri: String,
    /// Identity provider base URL (authorize + token endpoints)
    pub jira_base_url: String,
    /// Atlassian API base URL (accessible-resources + profile endpoints)
    pub jira_api_base_url: String,
    /// Base64-encoded 32-byte key for token encryption at rest
    pub encryption_key: String,
    /// Shared secret gating the internal token-retrieval route
    pub internal_api_key: String,
    /// Path of the JSON token store
    pub tokens_file: PathBuf,
    /// HTTP listen port
    pub port: u16,
}

impl BrokerConfig {
    /// Reads configuration from the environment.
    ///
    /// Fails when a required variable is missing or malformed; optional
    /// variables fall back to their defaults.
    pub fn from_env() -> Result<Self> {
        let jira_client_id =
            std::env::var("JIRA_CLIENT_ID").context("JIRA_CLIENT_ID is required")?;
        let jira_client_secret =
            std::env::var("JIRA_CLIENT_SECRET").context("JIRA_CLIENT_SECRET is required")?;

        let encryption_key = std::env::var("ENCRYPTION_KEY").context(
            "ENCRYPTION_KEY is required (base64-encoded 32-byte key); \
             the broker does not generate one",
        )?;
        let internal_api_key = std::env::var("INTERNAL_API_KEY")
            .context("INTERNAL_API_KEY is required for internal caller authentication")?;

        let port: u16 = env_or("BROKER_PORT", "5000")
            .parse()
            .context("BROKER_PORT must be a valid port number")?;

        Ok(Self {
            jira_client_id,
            jira_client_secret,
            jira_redirect_uri: env_or(
                "JIRA_REDIRECT_URI",
                "https://www.briefchief.ai/auth/callback",
            ),
            jira_base_url: env_or("JIRA_BASE_URL", "https://auth.atlassian.com"),
            jira_api_base_url: env_or("JIRA_API_BASE_URL", "https://api.atlassian.com"),
            encryption_key,
            internal_api_key,
            tokens_file: PathBuf::from(env_or("TOKENS_FILE", "user_tokens.json")),
            port,
        })
    }
}
