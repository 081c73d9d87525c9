//! API client for communicating with the nutrition backend.
//!
//! This module provides the `ApiClient` struct for making authenticated
//! requests. Every call goes through one classification path; the client
//! never retries, leaving that to callers that want it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{SessionState, TokenStore};
use crate::config::Timeouts;
use crate::models::account::{HealthResponse, LoginRequest, RegisterRequest};
use crate::models::{AuthResponse, Meal, NewMeal, Profile};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Value of `status` reported by a live backend.
const HEALTHY_STATUS: &str = "healthy";

const NO_QUERY: &[(&str, &str)] = &[];

/// API client for the nutrition backend.
///
/// Owns the bearer credential. Signing in and out through the client keeps
/// the credential and the session identity in step.
pub struct ApiClient {
    client: Client,
    base_url: Url,
    health_timeout: Duration,
    // Also serializes every credential+identity transition made here.
    credential: Mutex<Option<String>>,
    tokens: TokenStore,
    session: Arc<SessionState>,
}

impl ApiClient {
    /// Create a new API client, restoring any persisted credential.
    pub fn new(
        base_url: &str,
        timeouts: Timeouts,
        session: Arc<SessionState>,
        tokens: TokenStore,
    ) -> Result<Self> {
        let client = Client::builder()
            .read_timeout(timeouts.request)
            .timeout(timeouts.resource)
            .build()
            .context("Failed to build HTTP client")?;

        // Trailing slash so relative joins keep any path prefix.
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .with_context(|| format!("Invalid API base URL: {}", base_url))?;

        let credential = match tokens.load() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable credential");
                let _ = tokens.clear();
                None
            }
        };
        debug!(has_credential = credential.is_some(), "API client created");

        Ok(Self {
            client,
            base_url,
            health_timeout: timeouts.health,
            credential: Mutex::new(credential),
            tokens,
            session,
        })
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn has_credential(&self) -> bool {
        self.lock_credential().is_some()
    }

    fn lock_credential(&self) -> MutexGuard<'_, Option<String>> {
        self.credential.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, ApiError> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Decode(format!("Invalid request path {}: {}", path, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    // ===== Request Pipeline =====

    /// Perform one call and classify the outcome.
    ///
    /// `timeout` overrides the overall timeout for this call only.
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        timeout: Option<Duration>,
    ) -> Result<Value, ApiError> {
        self.execute(method, path, NO_QUERY, body, timeout).await
    }

    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
        timeout: Option<Duration>,
    ) -> Result<Value, ApiError> {
        let url = self.url(path, query)?;
        // Generation and token this request was issued with; a 401 is judged against them.
        let generation = self.session.generation();

        let mut request = self.client.request(method.clone(), url);
        let sent = self.lock_credential().clone();
        if let Some(ref token) = sent {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        debug!(%method, path, "Sending request");
        let response = request.send().await.map_err(|e| {
            let err = ApiError::from_transport(&e);
            warn!(%method, path, error = %err, "Request failed without a response");
            err
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::from_transport(&e))?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| {
                warn!(%method, path, error = %e, "Malformed JSON in successful response");
                ApiError::Decode(format!("Failed to parse JSON response from {}: {}", path, e))
            });
        }

        let err = ApiError::from_status(status, &text);
        debug!(%method, path, status = status.as_u16(), error = %err, "Request rejected");
        if matches!(err, ApiError::AuthRequired { .. }) {
            self.handle_unauthorized(generation, sent.as_deref());
        }
        Err(err)
    }

    fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, ApiError> {
        serde_json::from_value(value)
            .map_err(|e| ApiError::Decode(format!("Failed to parse {}: {}", what, e)))
    }

    /// Drop a credential the server rejected and end the session using it.
    ///
    /// A rejected token that is still held is cleared no matter how the
    /// session moved meanwhile. A token that was already replaced only ends
    /// the session if nothing changed since the request went out.
    fn handle_unauthorized(&self, generation: u64, sent: Option<&str>) {
        let mut credential = self.lock_credential();
        if sent.is_some() && credential.as_deref() == sent {
            self.session.logout();
        } else if !self.session.invalidate(generation) {
            debug!("Ignoring 401 for a credential that was already replaced");
            return;
        }
        warn!("Credential rejected by server, signing out");
        *credential = None;
        if let Err(e) = self.tokens.clear() {
            warn!(error = %e, "Failed to clear stored credential");
        }
    }

    // ===== Account =====

    /// Check that the backend is up, using the short liveness timeout.
    pub async fn health(&self) -> Result<bool, ApiError> {
        let value = self
            .request(Method::GET, "/health", None::<&()>, Some(self.health_timeout))
            .await?;
        let health: HealthResponse = Self::decode(value, "health response")?;
        Ok(health.status == HEALTHY_STATUS)
    }

    /// Authenticate and make the returned account the current identity.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let body = LoginRequest { email, password };
        let value = self
            .request(Method::POST, "/login", Some(&body), None)
            .await?;
        let auth: AuthResponse = Self::decode(value, "login response")?;
        self.establish(&auth)?;
        Ok(auth)
    }

    /// Create an account and sign straight into it.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ApiError> {
        let body = RegisterRequest {
            name,
            email,
            password,
        };
        let value = self
            .request(Method::POST, "/register", Some(&body), None)
            .await?;
        let auth: AuthResponse = Self::decode(value, "register response")?;
        self.establish(&auth)?;
        Ok(auth)
    }

    fn establish(&self, auth: &AuthResponse) -> Result<(), ApiError> {
        if auth.user_id.is_empty() {
            return Err(ApiError::Decode(
                "Authentication response has an empty user_id".to_string(),
            ));
        }

        let mut credential = self.lock_credential();
        // A token from a previous account must never ride along with the new one.
        *credential = auth.token.clone().filter(|t| !t.is_empty());
        let persisted = match credential.as_deref() {
            Some(token) => self.tokens.save(token),
            None => self.tokens.clear(),
        };
        if let Err(e) = persisted {
            warn!(error = %e, "Failed to persist credential");
        }
        self.session.login(&auth.user_id, &auth.name);
        info!(user_id = %auth.user_id, "Authenticated");
        Ok(())
    }

    /// Drop the credential and sign out.
    pub fn logout(&self) {
        let mut credential = self.lock_credential();
        *credential = None;
        if let Err(e) = self.tokens.clear() {
            warn!(error = %e, "Failed to clear stored credential");
        }
        self.session.logout();
    }

    // ===== Profile =====

    pub async fn get_profile(&self, user_id: &str) -> Result<Profile, ApiError> {
        let value = self
            .execute(
                Method::GET,
                "/get-profile",
                &[("user_id", user_id)],
                None::<&()>,
                None,
            )
            .await?;
        Self::decode(value, "profile")
    }

    pub async fn save_profile(&self, profile: &Profile) -> Result<(), ApiError> {
        self.request(Method::POST, "/save-profile", Some(profile), None)
            .await?;
        Ok(())
    }

    // ===== Meals =====

    pub async fn fetch_meals(&self, user_id: &str) -> Result<Vec<Meal>, ApiError> {
        let value = self
            .execute(
                Method::GET,
                "/user-meals",
                &[("user_id", user_id)],
                None::<&()>,
                None,
            )
            .await?;
        Self::decode(value, "meal list")
    }

    pub async fn save_meal(&self, meal: &NewMeal) -> Result<(), ApiError> {
        self.request(Method::POST, "/save-meal", Some(meal), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(
            base,
            Timeouts::default(),
            Arc::new(SessionState::in_memory()),
            TokenStore::in_memory(),
        )
        .unwrap()
    }

    #[test]
    fn test_url_joins_path_and_encodes_query() {
        let api = client("http://localhost:5050/");
        let url = api.url("/get-profile", &[("user_id", "a b&c")]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5050/get-profile?user_id=a+b%26c");
    }

    #[test]
    fn test_url_keeps_base_path_prefix() {
        let api = client("http://localhost:5050/api/");
        let url = api.url("/health", NO_QUERY).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5050/api/health");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = ApiClient::new(
            "not a url",
            Timeouts::default(),
            Arc::new(SessionState::in_memory()),
            TokenStore::in_memory(),
        );
        assert!(result.is_err());
    }
}
