use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde_json::json;
use sk_auth::{
    ApiRequest, ApiResponse, ManualClock, Session, SessionConfig, SessionError, TokenPair,
    TokenRefresher, Transport, TransportError,
};
use sk_store::{MemoryBackend, StorageBackend};
use url::Url;

pub fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Signed-looking token whose payload carries `exp`
pub fn jwt(name: &str, exp: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({"sub": name, "exp": exp.timestamp()}).to_string());
    format!("{header}.{payload}.signature")
}

/// Memory backend that answers "not found" for the first reads of a key
#[derive(Default)]
pub struct LaggingBackend {
    pub inner: MemoryBackend,
    misses: Mutex<HashMap<String, u32>>,
    pub reads: AtomicU32,
}

impl LaggingBackend {
    #[allow(dead_code)]
    pub fn miss(&self, key: &str, times: u32) {
        self.misses.lock().unwrap().insert(key.to_string(), times);
    }
}

#[async_trait]
impl StorageBackend for LaggingBackend {
    async fn get(&self, key: &str) -> sk_store::Result<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(left) = self.misses.lock().unwrap().get_mut(key)
            && *left > 0
        {
            *left -= 1;
            return Ok(None);
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> sk_store::Result<()> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> sk_store::Result<()> {
        self.inner.remove(key).await
    }
}

/// Refresher that plays back scripted answers after a delay
pub struct ScriptedRefresher {
    answers: Mutex<VecDeque<Result<TokenPair, String>>>,
    pub calls: Mutex<Vec<(String, String)>>,
    pub delay: Duration,
}

impl ScriptedRefresher {
    pub fn new(answers: Vec<Result<TokenPair, String>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::from_millis(200),
        }
    }

    #[allow(dead_code)]
    pub fn issuing(access_token: &str, refresh_token: &str) -> Self {
        Self::new(vec![Ok(TokenPair {
            access_token: access_token.to_string(),
            refresh_token: Some(refresh_token.to_string()),
        })])
    }

    pub fn failing(times: usize) -> Self {
        Self::new((0..times).map(|_| Err("connection reset".to_string())).collect())
    }

    #[allow(dead_code)]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TokenRefresher for ScriptedRefresher {
    async fn refresh(&self, refresh_token: &str, subject_id: &str) -> sk_auth::Result<TokenPair> {
        self.calls
            .lock()
            .unwrap()
            .push((refresh_token.to_string(), subject_id.to_string()));
        tokio::time::sleep(self.delay).await;

        let answer = self.answers.lock().unwrap().pop_front();
        match answer {
            Some(Ok(pair)) => Ok(pair),
            Some(Err(reason)) => Err(SessionError::RefreshFailed(reason)),
            None => Err(SessionError::RefreshFailed("no scripted answer".into())),
        }
    }
}

/// API server stand-in: 200 for accepted tokens, 401 otherwise
#[derive(Default)]
pub struct FakeApi {
    accepted: Mutex<Vec<String>>,
    pub seen: Mutex<Vec<String>>,
}

impl FakeApi {
    #[allow(dead_code)]
    pub fn accepting(tokens: &[&str]) -> Self {
        Self {
            accepted: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeApi {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let token = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default()
            .to_string();
        self.seen.lock().unwrap().push(token.clone());

        // Yield so concurrent callers interleave
        tokio::task::yield_now().await;

        if self.accepted.lock().unwrap().contains(&token) {
            Ok(ApiResponse::new(
                StatusCode::OK,
                json!({"code": 0, "message": "ok", "details": {"url": request.url}}),
            ))
        } else {
            Ok(ApiResponse::new(
                StatusCode::UNAUTHORIZED,
                json!({"detail": "token expired"}),
            ))
        }
    }
}

// Each test binary reads a different subset of the fields
#[allow(dead_code)]
pub struct Harness {
    pub session: Arc<Session>,
    pub backend: Arc<LaggingBackend>,
    pub refresher: Arc<ScriptedRefresher>,
    pub api: Arc<FakeApi>,
    pub clock: Arc<ManualClock>,
}

#[allow(dead_code)]
pub fn harness(refresher: ScriptedRefresher, api: FakeApi) -> Harness {
    harness_over(Arc::new(LaggingBackend::default()), refresher, api)
}

pub fn harness_over(backend: Arc<LaggingBackend>, refresher: ScriptedRefresher, api: FakeApi) -> Harness {
    let refresher = Arc::new(refresher);
    let api = Arc::new(api);
    let clock = Arc::new(ManualClock::new(start()));
    let config = SessionConfig::new(Url::parse("https://api.example.com").unwrap());

    let session = Session::new(
        config,
        backend.clone(),
        refresher.clone(),
        api.clone(),
        clock.clone(),
    );

    Harness {
        session: Arc::new(session),
        backend,
        refresher,
        api,
        clock,
    }
}

impl Harness {
    /// Sign in and move past the refresh grace window
    #[allow(dead_code)]
    pub async fn signed_in(&self, access_token: &str) {
        self.session.login(access_token, "R1", "U1").await.unwrap();
        self.clock.advance(chrono::Duration::minutes(1));
    }
}
