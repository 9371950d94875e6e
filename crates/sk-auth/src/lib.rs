//! Client-side bearer session management
//!
//! Keeps one valid bearer credential available to any number of concurrent
//! API calls, renews it when it expires and persists it across restarts on
//! storage that may be slow to show its own writes.
//!
//! # Components
//!
//! - [`CredentialCache`]: the credential as persisted through a
//!   [`sk_store::DurableStore`], with an in-memory backup
//! - [`RefreshCoordinator`]: at most one refresh call in flight, shared by
//!   every caller that needs it, with bounded retries
//! - [`RequestGateway`]: attaches the token, refreshes before expiry and
//!   replays a request rejected with 401 once
//! - [`Session`]: owns the three and offers login, logout and restore
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sk_auth::{ApiRequest, Session, SessionConfig};
//! use sk_store::MemoryBackend;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SessionConfig::new(Url::parse("https://api.example.com")?);
//!     let session = Session::connect(config, Arc::new(MemoryBackend::new()))?;
//!
//!     // Token pair issued by the sign-in endpoint
//!     session.login("eyJ...", "refresh-token", "user-42").await?;
//!
//!     let response = session.send(ApiRequest::get("/api/v1/users/me")).await?;
//!     println!("{}", response.body);
//!
//!     session.logout().await;
//!     Ok(())
//! }
//! ```

pub mod claims;
pub mod client;
pub mod clock;
pub mod config;
pub mod credential;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod refresh;
pub mod session;
pub mod transport;

pub use claims::{Claims, TokenClaims};
pub use client::{HttpTokenRefresher, TokenRefresher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{HttpTimeouts, RefreshPolicy, SessionConfig, StorageKeys};
pub use credential::{Credential, CredentialCache};
pub use errors::{ApiErrorKind, RefreshError, Result, SessionError, TransportError};
pub use gateway::RequestGateway;
pub use models::TokenPair;
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use session::Session;
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
