//! Single-flight token refresh
//!
//! At most one refresh call is in flight per coordinator. Callers that
//! arrive while it runs are queued and all receive the same result when it
//! settles. Consecutive failures are counted; once the limit is reached the
//! stored credential is dropped and every caller learns the session ended.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use crate::client::TokenRefresher;
use crate::clock::Clock;
use crate::config::RefreshPolicy;
use crate::credential::{Credential, CredentialCache};
use crate::errors::RefreshError;

/// Successful answer to a refresh request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new credential was issued and stored
    Refreshed(Credential),
    /// The stored credential was saved moments ago and is returned as is
    Skipped(Credential),
}

impl RefreshOutcome {
    pub fn credential(&self) -> &Credential {
        match self {
            Self::Refreshed(credential) | Self::Skipped(credential) => credential,
        }
    }

    pub fn into_credential(self) -> Credential {
        match self {
            Self::Refreshed(credential) | Self::Skipped(credential) => credential,
        }
    }
}

type RefreshResult = Result<RefreshOutcome, RefreshError>;

#[derive(Debug, Default)]
struct RefreshState {
    in_flight: bool,
    /// Bumped by `reset`; a cycle from an older generation must not store
    generation: u64,
    attempt_count: u32,
    last_attempt_started_at: Option<DateTime<Utc>>,
    waiters: Vec<oneshot::Sender<RefreshResult>>,
}

struct Inner {
    cache: Arc<CredentialCache>,
    refresher: Arc<dyn TokenRefresher>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    state: Mutex<RefreshState>,
}

/// Serializes refresh calls for one credential cache
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("RefreshCoordinator")
            .field("policy", &self.inner.policy)
            .field("in_flight", &state.in_flight)
            .field("attempt_count", &state.attempt_count)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        cache: Arc<CredentialCache>,
        refresher: Arc<dyn TokenRefresher>,
        clock: Arc<dyn Clock>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                refresher,
                clock,
                policy,
                state: Mutex::new(RefreshState::default()),
            }),
        }
    }

    /// Obtain a fresh credential, joining the running refresh if there is one
    ///
    /// Dropping the returned future does not cancel the refresh; other
    /// callers still receive its result.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> RefreshResult {
        if let Some(credential) = self.inner.cache.get().await
            && self.inner.within_grace(&credential)
        {
            debug!("Credential saved within the grace window, skipping refresh");
            return Ok(RefreshOutcome::Skipped(credential));
        }

        let (tx, rx) = oneshot::channel();
        let start_cycle = {
            let mut state = self.inner.state();
            state.waiters.push(tx);
            if state.in_flight {
                debug!("Refresh in flight, queued ({} waiting)", state.waiters.len());
                false
            } else {
                state.in_flight = true;
                true
            }
        };

        if start_cycle {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(inner.run_cycle());
        }

        rx.await
            .unwrap_or_else(|_| Err(RefreshError::Failed("refresh task stopped".to_string())))
    }

    /// Forget previous failures and disown any refresh in flight
    ///
    /// A cycle already running still settles its waiters, but its result is
    /// neither stored nor allowed to clear the credential.
    pub fn reset(&self) {
        let mut state = self.inner.state();
        state.attempt_count = 0;
        state.generation += 1;
    }

    /// Consecutive failed refresh attempts
    pub fn attempt_count(&self) -> u32 {
        self.inner.state().attempt_count
    }

    pub fn last_attempt_started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state().last_attempt_started_at
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state().in_flight
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn within_grace(&self, credential: &Credential) -> bool {
        let elapsed = self.clock.now().signed_duration_since(credential.saved_at);
        chrono::Duration::from_std(self.policy.grace_window)
            .is_ok_and(|grace| elapsed < grace)
    }

    async fn run_cycle(self: Arc<Self>) {
        let result = self.cycle().await;

        let waiters = {
            let mut state = self.state();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };

        debug!("Refresh settled, releasing {} waiter(s)", waiters.len());
        for waiter in waiters {
            // A waiter that gave up has dropped its receiver
            let _ = waiter.send(result.clone());
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state().generation == generation
    }

    async fn cycle(&self) -> RefreshResult {
        let generation = self.state().generation;
        let Some(current) = self.cache.get().await else {
            warn!("No stored credential to refresh");
            return Err(RefreshError::NotAuthenticated);
        };

        let attempt = {
            let mut state = self.state();
            if state.generation != generation {
                return Err(RefreshError::NotAuthenticated);
            }
            state.attempt_count += 1;
            state.last_attempt_started_at = Some(self.clock.now());
            state.attempt_count
        };
        info!(
            "Refreshing access token (attempt {}/{})",
            attempt, self.policy.max_attempts
        );

        let call = self
            .refresher
            .refresh(&current.refresh_token, &current.subject_id);
        let response = match tokio::time::timeout(self.policy.timeout, call).await {
            Ok(Ok(pair)) => Ok(pair),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.policy.timeout)),
        };

        match response {
            Ok(pair) => {
                let refreshed = Credential {
                    access_token: pair.access_token,
                    refresh_token: pair.refresh_token.unwrap_or(current.refresh_token),
                    subject_id: current.subject_id,
                    saved_at: self.clock.now(),
                };

                let stored = self
                    .cache
                    .save_if(&refreshed, || self.is_current(generation))
                    .await
                    .map_err(|fault| {
                        error!("Refreshed credential could not be stored: {}", fault);
                        RefreshError::Storage(fault)
                    });
                {
                    let mut state = self.state();
                    if state.generation == generation {
                        state.attempt_count = 0;
                    }
                }
                if !stored? {
                    warn!("Session was reset during refresh, discarding new tokens");
                    return Err(RefreshError::NotAuthenticated);
                }

                info!("Access token refreshed");
                Ok(RefreshOutcome::Refreshed(refreshed))
            }
            Err(reason) => {
                warn!("Token refresh failed: {}", reason);

                let exhausted = {
                    let mut state = self.state();
                    if state.generation != generation {
                        debug!("Session was reset during refresh");
                        return Err(RefreshError::NotAuthenticated);
                    }
                    if state.attempt_count >= self.policy.max_attempts {
                        state.attempt_count = 0;
                        true
                    } else {
                        false
                    }
                };

                if exhausted {
                    error!(
                        "Token refresh failed {} times, ending session",
                        self.policy.max_attempts
                    );
                    if self.cache.clear_if(|| self.is_current(generation)).await {
                        Err(RefreshError::SessionEnded)
                    } else {
                        Err(RefreshError::NotAuthenticated)
                    }
                } else {
                    Err(RefreshError::Failed(reason))
                }
            }
        }
    }
}
