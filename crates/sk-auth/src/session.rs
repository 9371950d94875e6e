use std::sync::Arc;

use sk_store::{DurableStore, StorageBackend};
use tracing::{info, instrument, warn};

use crate::claims::{self, Claims};
use crate::client::{HttpTokenRefresher, TokenRefresher};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::credential::{Credential, CredentialCache};
use crate::errors::{Result, SessionError};
use crate::gateway::RequestGateway;
use crate::refresh::RefreshCoordinator;
use crate::transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};

/// Owner of one credential cache, refresh coordinator and request gateway
///
/// Build one per process and share it by reference or `Arc`.
pub struct Session {
    config: Arc<SessionConfig>,
    cache: Arc<CredentialCache>,
    coordinator: RefreshCoordinator,
    gateway: RequestGateway,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Assemble a session from explicit collaborators
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn StorageBackend>,
        refresher: Arc<dyn TokenRefresher>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(DurableStore::with_policy(backend, config.storage.clone()));
        let cache = Arc::new(CredentialCache::new(store, config.keys.clone()));
        let coordinator = RefreshCoordinator::new(
            cache.clone(),
            refresher,
            clock.clone(),
            config.refresh.clone(),
        );
        let gateway = RequestGateway::new(
            config.clone(),
            cache.clone(),
            coordinator.clone(),
            transport,
            clock.clone(),
        );

        Self {
            config,
            cache,
            coordinator,
            gateway,
            clock,
        }
    }

    /// Session talking HTTP to the configured API with the system clock
    pub fn connect(config: SessionConfig, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let refresher = Arc::new(HttpTokenRefresher::new(&config)?);
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Ok(Self::new(
            config,
            backend,
            refresher,
            transport,
            Arc::new(SystemClock),
        ))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Store a freshly issued token pair
    #[instrument(skip(self, access_token, refresh_token))]
    pub async fn login(
        &self,
        access_token: &str,
        refresh_token: &str,
        subject_id: &str,
    ) -> Result<Credential> {
        for (name, value) in [
            ("access token", access_token),
            ("refresh token", refresh_token),
            ("subject id", subject_id),
        ] {
            if value.trim().is_empty() {
                return Err(SessionError::InvalidCredential(format!("{name} is empty")));
            }
        }

        let credential = Credential::new(access_token, refresh_token, subject_id, self.clock.now());
        self.coordinator.reset();
        self.cache.save(&credential).await?;

        info!("Signed in as {}", subject_id);
        Ok(credential)
    }

    /// Forget the credential and any refresh failures
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        self.coordinator.reset();
        self.cache.clear().await;
        info!("Signed out");
    }

    pub async fn credential(&self) -> Option<Credential> {
        self.cache.get().await
    }

    pub async fn is_logged_in(&self) -> bool {
        self.cache.get().await.is_some()
    }

    /// Load the persisted credential at startup
    ///
    /// Storage may not have caught up with the last write of a previous
    /// run, so the read goes through the store's retries.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Option<Credential> {
        let credential = self.cache.get().await;
        match &credential {
            Some(credential) => {
                if let Claims::Valid(claims) = claims::inspect(&credential.access_token)
                    && claims.is_expired(self.clock.now(), self.config.expiry_margin)
                {
                    warn!("Restored access token is expired, it will be refreshed on first use");
                }
                info!("Restored session for {}", credential.subject_id);
            }
            None => info!("No stored session"),
        }
        credential
    }

    /// Send a request through the gateway
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.gateway.send(request).await
    }
}
