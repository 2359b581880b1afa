//! Identity-provider HTTP client.
//!
//! Talks to Atlassian's OAuth 2.0 endpoints: the authorization-code and
//! refresh-token exchanges against the auth host, and the
//! accessible-resources / profile lookups against the API host. Every call
//! is a single attempt bounded by a fixed client timeout; failures surface
//! as errors for the caller to log and convert, never as hangs or retries.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::BrokerConfig;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Scopes requested during authorization
const OAUTH_SCOPES: &str = "read:jira-work read:jira-user";

/// Token endpoint response (standard OAuth 2.0).
///
/// Only `access_token` is required; providers omit the rest freely.
#[derive(Deserialize, Debug)]
pub struct ProviderTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// One entry of the accessible-resources response
#[derive(Deserialize, Debug)]
struct AccessibleResource {
    id: String,
}

/// Profile returned by the `myself` endpoint
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    account_id: String,
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

/// Provider profile metadata attached to a token record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JiraUserInfo {
    pub account_id: String,
    pub email: String,
    pub cloud_id: String,
    pub display_name: String,
}

/// HTTP client for the identity provider.
pub struct JiraProvider {
    http: reqwest::Client,
    auth_base_url: String,
    api_base_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl JiraProvider {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            auth_base_url: config.jira_base_url.clone(),
            api_base_url: config.jira_api_base_url.clone(),
            client_id: config.jira_client_id.clone(),
            client_secret: config.jira_client_secret.clone(),
            redirect_uri: config.jira_redirect_uri.clone(),
        })
    }

    /// Builds the provider's authorization URL for the given state parameter.
    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}/authorize?client_id={}&redirect_uri={}&response_type=code&prompt=consent&scope={}&state={}",
            self.auth_base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(OAUTH_SCOPES),
            urlencoding::encode(state)
        )
    }

    /// Exchanges an authorization code for a token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<ProviderTokenResponse> {
        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("redirect_uri", &self.redirect_uri);
        form.insert("client_id", &self.client_id);
        form.insert("client_secret", &self.client_secret);

        debug!(token_url = %self.token_url(), "Exchanging authorization code for token");
        self.post_token_request(&form).await
    }

    /// Exchanges a refresh token for a fresh token pair.
    ///
    /// The provider invalidates the old refresh token on success.
    pub async fn refresh(&self, refresh_token: &str) -> Result<ProviderTokenResponse> {
        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", &self.client_id);
        form.insert("client_secret", &self.client_secret);

        debug!(token_url = %self.token_url(), "Refreshing access token");
        self.post_token_request(&form).await
    }

    /// Discovers the caller's cloud id and profile.
    ///
    /// First call lists accessible resources and takes the first one as the
    /// tenant; second call fetches the profile scoped to that tenant.
    pub async fn fetch_user_info(&self, access_token: &str) -> Result<JiraUserInfo> {
        let resources: Vec<AccessibleResource> = self
            .get_json(
                &format!("{}/oauth/token/accessible-resources", self.api_base_url),
                access_token,
            )
            .await
            .context("Failed to list accessible resources")?;

        let cloud_id = resources
            .into_iter()
            .next()
            .map(|r| r.id)
            .ok_or_else(|| anyhow!("No accessible resources for this token"))?;

        let profile: ProfileResponse = self
            .get_json(
                &format!(
                    "{}/ex/jira/{}/rest/api/3/myself",
                    self.api_base_url, cloud_id
                ),
                access_token,
            )
            .await
            .context("Failed to fetch user profile")?;

        Ok(JiraUserInfo {
            account_id: profile.account_id,
            email: profile.email_address.unwrap_or_default(),
            cloud_id,
            display_name: profile.display_name.unwrap_or_default(),
        })
    }

    fn token_url(&self) -> String {
        format!("{}/oauth/token", self.auth_base_url)
    }

    async fn post_token_request(
        &self,
        form: &HashMap<&str, &str>,
    ) -> Result<ProviderTokenResponse> {
        let response = self
            .http
            .post(self.token_url())
            .form(form)
            .send()
            .await
            .context("Failed to send token request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Token request failed with status {}: {}",
                status,
                body
            ));
        }

        response
            .json()
            .await
            .context("Failed to parse token response")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            return Err(anyhow!("{} returned status {}", url, response.status()));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}
