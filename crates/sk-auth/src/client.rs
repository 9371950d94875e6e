use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::errors::{ApiErrorKind, Result, SessionError, TransportError};
use crate::models::{RefreshRequest, TokenPair, unwrap_envelope};

/// Exchanges a refresh token for a new token pair
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str, subject_id: &str) -> Result<TokenPair>;
}

/// Build the shared HTTP client from the configured timeouts
pub(crate) fn http_client(config: &SessionConfig) -> Result<Client> {
    let http = Client::builder()
        .connect_timeout(config.http_timeouts.connect)
        .timeout(config.http_timeouts.request)
        .user_agent(config.user_agent.as_deref().unwrap_or("session-keeper"))
        .build()
        .map_err(TransportError::from)?;
    Ok(http)
}

/// Refresh endpoint client
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    http: Client,
    url: Url,
}

impl HttpTokenRefresher {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        Ok(Self::with_client(http_client(config)?, config.refresh_url()?))
    }

    pub fn with_client(http: Client, url: Url) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    #[instrument(skip(self, refresh_token), fields(url = %self.url))]
    async fn refresh(&self, refresh_token: &str, subject_id: &str) -> Result<TokenPair> {
        debug!("Requesting new token pair");
        let response = self
            .http
            .post(self.url.clone())
            .json(&RefreshRequest {
                refresh_token,
                subject_id,
            })
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Refresh endpoint returned {}", status);
            return Err(SessionError::Api {
                kind: ApiErrorKind::from_status(status),
                status,
                detail: Some(body.chars().take(200).collect()),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SessionError::InvalidResponse(format!("refresh body: {e}")))?;

        let pair: TokenPair = serde_json::from_value(unwrap_envelope(body))
            .map_err(|e| SessionError::InvalidResponse(format!("refresh body: {e}")))?;

        if pair.access_token.is_empty() {
            return Err(SessionError::InvalidResponse(
                "refresh response carries no access_token".to_string(),
            ));
        }

        debug!(
            "Received access token (length {}), rotated refresh token: {}",
            pair.access_token.len(),
            pair.refresh_token.is_some()
        );
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn refresher(server: &MockServer) -> HttpTokenRefresher {
        let config = SessionConfig::new(Url::parse(&server.uri()).unwrap());
        HttpTokenRefresher::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_refresh_posts_token_and_subject() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .and(body_json(json!({"refresh_token": "R1", "subject_id": "U1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200,
                "message": "success",
                "details": {"access_token": "A2", "refresh_token": "R2"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let pair = refresher(&server).await.refresh("R1", "U1").await.unwrap();
        assert_eq!(pair.access_token, "A2");
        assert_eq!(pair.refresh_token.as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn test_refresh_accepts_bare_body_without_rotation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "A2"})))
            .mount(&server)
            .await;

        let pair = refresher(&server).await.refresh("R1", "U1").await.unwrap();
        assert_eq!(pair.access_token, "A2");
        assert_eq!(pair.refresh_token, None);
    }

    #[tokio::test]
    async fn test_refresh_rejects_missing_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 0, "details": {}})),
            )
            .mount(&server)
            .await;

        let err = refresher(&server).await.refresh("R1", "U1").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_refresh_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("refresh token revoked"))
            .mount(&server)
            .await;

        let err = refresher(&server).await.refresh("R1", "U1").await.unwrap_err();
        match err {
            SessionError::Api { kind, detail, .. } => {
                assert_eq!(kind, ApiErrorKind::Unauthorized);
                assert_eq!(detail.as_deref(), Some("refresh token revoked"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
