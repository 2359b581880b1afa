//! Token lifecycle management.
//!
//! Owns the path from provider token response to encrypted stored record and
//! back: validity checking, proactive refresh ahead of expiry, and the
//! decrypted payload served to the internal caller. Refresh is lazy (only
//! when a record is read), best-effort, and single-attempt; two concurrent
//! callers may both hit the provider's refresh endpoint, and the loser's
//! failure is logged and reported, not retried.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::crypto::{CipherError, TokenCipher};
use crate::provider::{JiraProvider, JiraUserInfo, ProviderTokenResponse};
use crate::store::{TokenRecord, TokenStore};

/// Refresh once the token is within this window of its expiry
const REFRESH_WINDOW_MINUTES: i64 = 5;

/// Lifetime assumed when the provider omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// A record is valid iff it has an expiry and now is strictly before it.
pub fn is_valid(record: &TokenRecord) -> bool {
    record
        .expires_at
        .map_or(false, |expires_at| Utc::now() < expires_at)
}

/// Decrypted token response served to the internal caller.
#[derive(Serialize, Debug)]
pub struct TokenPayload {
    pub access_token: String,
    pub jira_account_id: String,
    pub jira_email: String,
    pub jira_cloud_id: String,
    #[serde(with = "crate::store::flexible_utc")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Manages token acquisition, refresh, and decryption for stored records.
#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    cipher: TokenCipher,
    provider: Arc<JiraProvider>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>, cipher: TokenCipher, provider: Arc<JiraProvider>) -> Self {
        Self {
            store,
            cipher,
            provider,
        }
    }

    /// Builds an encrypted record from a provider token response.
    ///
    /// `created_at` is `None` for a first authentication (stamped now) and
    /// the prior record's value on refresh, so the original authentication
    /// time survives token rotation. A missing refresh token is stored as
    /// the empty string, which [`refresh_if_needed`](Self::refresh_if_needed)
    /// treats as "unrefreshable".
    pub fn create_record(
        &self,
        response: &ProviderTokenResponse,
        user_info: &JiraUserInfo,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<TokenRecord, CipherError> {
        let now = Utc::now();
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        let refresh_token = match response.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => self.cipher.encrypt(token)?,
            _ => String::new(),
        };

        Ok(TokenRecord {
            access_token: self.cipher.encrypt(&response.access_token)?,
            refresh_token,
            expires_at: Some(now + Duration::seconds(expires_in)),
            token_type: response
                .token_type
                .clone()
                .unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope.clone().unwrap_or_default(),
            created_at: created_at.or(Some(now)),
            updated_at: Some(now),
            jira_account_id: user_info.account_id.clone(),
            jira_email: user_info.email.clone(),
            jira_cloud_id: user_info.cloud_id.clone(),
        })
    }

    /// Writes one user's record into the store (full read-modify-write).
    pub fn persist(&self, user_id: &str, record: &TokenRecord) -> Result<()> {
        let mut tokens = self.store.load();
        tokens.insert(user_id.to_string(), record.clone());
        self.store.save(&tokens)
    }

    /// Refreshes a record when it is expired or inside the refresh window.
    ///
    /// Returns:
    /// - `Ok(None)` when there is no refresh token, or the refresh exchange
    ///   failed (logged) — the caller falls back to the existing record;
    /// - `Ok(Some(record))` with the unchanged record when it is still
    ///   fresh, or the newly persisted record after a successful refresh;
    /// - `Err` only when the stored refresh token cannot be decrypted,
    ///   which means at-rest data is unreadable and must not be masked as
    ///   an ordinary refresh failure.
    pub async fn refresh_if_needed(
        &self,
        user_id: &str,
        record: &TokenRecord,
    ) -> Result<Option<TokenRecord>, CipherError> {
        if record.refresh_token.is_empty() {
            return Ok(None);
        }

        if let Some(expires_at) = record.expires_at {
            if Utc::now() + Duration::minutes(REFRESH_WINDOW_MINUTES) < expires_at {
                return Ok(Some(record.clone()));
            }
        }

        let refresh_token = self.cipher.decrypt(&record.refresh_token)?;

        let response = match self.provider.refresh(&refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to refresh token");
                return Ok(None);
            }
        };

        // Account metadata is not part of the refresh response; carry it
        // forward from the record being replaced.
        let user_info = JiraUserInfo {
            account_id: record.jira_account_id.clone(),
            email: record.jira_email.clone(),
            cloud_id: record.jira_cloud_id.clone(),
            display_name: String::new(),
        };

        let updated = self.create_record(&response, &user_info, record.created_at)?;

        if let Err(e) = self.persist(user_id, &updated) {
            // The refreshed token is still usable this request; the store
            // will be rewritten on the next successful save.
            error!(user_id = %user_id, error = %e, "Failed to persist refreshed token");
        }

        info!(user_id = %user_id, "Token refreshed");
        Ok(Some(updated))
    }

    /// Decrypts a record into the response served to the internal caller.
    pub fn token_payload(&self, record: &TokenRecord) -> Result<TokenPayload, CipherError> {
        Ok(TokenPayload {
            access_token: self.cipher.decrypt(&record.access_token)?,
            jira_account_id: record.jira_account_id.clone(),
            jira_email: record.jira_email.clone(),
            jira_cloud_id: record.jira_cloud_id.clone(),
            expires_at: record.expires_at,
        })
    }
}
