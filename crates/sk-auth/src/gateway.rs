use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tracing::{debug, instrument, warn};

use crate::claims;
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::credential::{Credential, CredentialCache};
use crate::errors::{ApiErrorKind, RefreshError, Result, SessionError, TransportError};
use crate::refresh::{RefreshCoordinator, RefreshOutcome};
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Per-call entry point for authenticated API requests
///
/// Attaches the current bearer token, refreshes it first when it is about
/// to expire, and replays a request rejected with 401 at most once after a
/// refresh.
#[derive(Clone)]
pub struct RequestGateway {
    config: Arc<SessionConfig>,
    cache: Arc<CredentialCache>,
    coordinator: RefreshCoordinator,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RequestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGateway")
            .field("base_url", &self.config.api_base_url.as_str())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl RequestGateway {
    pub fn new(
        config: Arc<SessionConfig>,
        cache: Arc<CredentialCache>,
        coordinator: RefreshCoordinator,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            cache,
            coordinator,
            transport,
            clock,
        }
    }

    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        request.url = self.config.resolve(&request.url)?.to_string();

        if !request.requires_auth {
            let response = self.transport.send(&request).await?;
            return into_result(response);
        }

        let credential = self.usable_credential().await?;
        let response = self.send_with(&request, &credential).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return into_result(response);
        }

        debug!("Request rejected with 401, refreshing");
        let replay_with = match self.coordinator.refresh().await {
            Ok(RefreshOutcome::Refreshed(fresh)) => fresh,
            Ok(RefreshOutcome::Skipped(fresh)) if fresh.access_token != credential.access_token => {
                debug!("Another caller already refreshed the credential");
                fresh
            }
            Ok(RefreshOutcome::Skipped(_)) => {
                warn!("Fresh credential rejected with 401");
                return into_result(response);
            }
            Err(RefreshError::SessionEnded) => return Err(SessionError::SessionEnded),
            Err(err) => {
                warn!("Refresh after 401 failed: {}", err);
                return into_result(response);
            }
        };

        let replayed = self.send_with(&request, &replay_with).await?;
        if replayed.status == StatusCode::UNAUTHORIZED {
            warn!("Replayed request rejected with 401");
        }
        into_result(replayed)
    }

    /// Stored credential, refreshed first when it is expired or unreadable
    async fn usable_credential(&self) -> Result<Credential> {
        let Some(credential) = self.cache.get().await else {
            return Err(SessionError::NotAuthenticated);
        };

        let claims = claims::inspect(&credential.access_token);
        if !claims.is_expired(self.clock.now(), self.config.expiry_margin) {
            return Ok(credential);
        }

        debug!("Access token expired or unreadable, refreshing before send");
        Ok(self.coordinator.refresh().await?.into_credential())
    }

    async fn send_with(&self, request: &ApiRequest, credential: &Credential) -> Result<ApiResponse> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", credential.access_token))
            .map_err(|_| {
                TransportError::InvalidRequest("access token is not a valid header value".into())
            })?;
        bearer.set_sensitive(true);

        let mut request = request.clone();
        request.headers.insert(AUTHORIZATION, bearer);
        Ok(self.transport.send(&request).await?)
    }
}

fn into_result(response: ApiResponse) -> Result<ApiResponse> {
    if response.is_success() {
        return Ok(response);
    }

    Err(SessionError::Api {
        kind: ApiErrorKind::from_status(response.status),
        status: response.status,
        detail: response.detail(),
    })
}
