//! Session model and the REST surface of the session service.
//!
//! All HTTP goes through a [`SessionBackend`] so the lifecycle logic can be
//! exercised against an in-memory backend; the reqwest implementation is
//! the production one.

pub mod replay;
pub mod socket;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use url::Url;

/// One remote PTY process, as known to this client.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub created_at: OffsetDateTime,
    pub command: String,
    pub args: Vec<String>,
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session={} command={}", self.id, self.command)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),

    /// The server refused to create a session (e.g. pool exhausted). A
    /// rejection, not a disconnect; surfaced as a timed notice.
    #[error("session rejected: {0}")]
    Rejected(String),

    /// Lookup returned 404: the session expired server-side.
    #[error("session expired")]
    Expired,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    base_url: Url,
}

impl SessionConfig {
    pub fn new(server_base_url: impl AsRef<str>) -> Result<Self, SessionError> {
        let mut base = server_base_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(SessionError::InvalidConfig(
                "session server base url cannot be empty".into(),
            ));
        }
        if !base.starts_with("http://") && !base.starts_with("https://") {
            base = format!("http://{base}");
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        let parsed = Url::parse(&base)
            .map_err(|err| SessionError::InvalidConfig(format!("invalid server url: {err}")))?;
        Ok(Self { base_url: parsed })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// WebSocket endpoint for a session's stream: same host, ws scheme.
    pub fn stream_url(&self, session_id: &str) -> Result<Url, SessionError> {
        let mut url = self
            .base_url
            .join(&format!("api/v1/sessions/{session_id}/stream"))
            .map_err(|err| {
                SessionError::InvalidConfig(format!("invalid stream url for {session_id}: {err}"))
            })?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| SessionError::InvalidConfig("unable to derive ws scheme".into()))?;
        Ok(url)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(rename = "tabId", skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(
        rename = "createdAt",
        default,
        with = "time::serde::rfc3339::option"
    )]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl SessionInfo {
    pub fn into_session(self) -> Session {
        Session {
            id: self.id,
            created_at: self.created_at.unwrap_or_else(OffsetDateTime::now_utc),
            command: self.command.unwrap_or_default(),
            args: self.args,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// REST operations against the session service.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn create_session(
        &self,
        base_url: &Url,
        request: &CreateSessionRequest,
    ) -> Result<SessionInfo, SessionError>;

    async fn stop_session(&self, base_url: &Url, session_id: &str) -> Result<(), SessionError>;

    async fn lookup_session(
        &self,
        base_url: &Url,
        session_id: &str,
    ) -> Result<SessionInfo, SessionError>;

    /// Fetch the NDJSON transcript. `offset` becomes a byte `Range` header
    /// when backfilling past a truncated replay.
    async fn fetch_transcript(
        &self,
        base_url: &Url,
        session_id: &str,
        offset: Option<u64>,
    ) -> Result<String, SessionError>;
}

struct ReqwestSessionBackend {
    client: reqwest::Client,
}

impl ReqwestSessionBackend {
    fn new() -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    fn endpoint(base_url: &Url, path: &str) -> Result<Url, SessionError> {
        base_url
            .join(path)
            .map_err(|err| SessionError::InvalidConfig(format!("invalid endpoint {path}: {err}")))
    }
}

#[async_trait]
impl SessionBackend for ReqwestSessionBackend {
    async fn create_session(
        &self,
        base_url: &Url,
        request: &CreateSessionRequest,
    ) -> Result<SessionInfo, SessionError> {
        let endpoint = Self::endpoint(base_url, "api/v1/sessions")?;
        let response = self.client.post(endpoint).json(request).send().await?;
        let status = response.status();
        if status == StatusCode::CONFLICT || status == StatusCode::SERVICE_UNAVAILABLE {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| "session pool is full".to_string());
            return Err(SessionError::Rejected(message));
        }
        if !status.is_success() {
            return Err(SessionError::HttpStatus(status));
        }
        Ok(response.json::<SessionInfo>().await?)
    }

    async fn stop_session(&self, base_url: &Url, session_id: &str) -> Result<(), SessionError> {
        let endpoint = Self::endpoint(base_url, &format!("api/v1/sessions/{session_id}"))?;
        let response = self.client.delete(endpoint).send().await?;
        let status = response.status();
        // A 404 on stop just means the server beat us to it.
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(SessionError::HttpStatus(status));
        }
        Ok(())
    }

    async fn lookup_session(
        &self,
        base_url: &Url,
        session_id: &str,
    ) -> Result<SessionInfo, SessionError> {
        let endpoint = Self::endpoint(base_url, &format!("api/v1/sessions/{session_id}"))?;
        let response = self.client.get(endpoint).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SessionError::Expired);
        }
        if !status.is_success() {
            return Err(SessionError::HttpStatus(status));
        }
        Ok(response.json::<SessionInfo>().await?)
    }

    async fn fetch_transcript(
        &self,
        base_url: &Url,
        session_id: &str,
        offset: Option<u64>,
    ) -> Result<String, SessionError> {
        let endpoint =
            Self::endpoint(base_url, &format!("api/v1/sessions/{session_id}/transcript"))?;
        let mut request = self.client.get(endpoint);
        if let Some(offset) = offset {
            request = request.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::HttpStatus(status));
        }
        Ok(response.text().await?)
    }
}

/// Typed client for the session REST endpoints.
#[derive(Clone)]
pub struct SessionApi {
    config: Arc<SessionConfig>,
    backend: Arc<dyn SessionBackend>,
}

impl SessionApi {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let backend = Arc::new(ReqwestSessionBackend::new()?);
        Ok(Self {
            config: Arc::new(config),
            backend,
        })
    }

    /// Construct with a custom backend; the seam tests use to script
    /// lookup/transcript behavior.
    pub fn with_backend(config: SessionConfig, backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            config: Arc::new(config),
            backend,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub async fn create(&self, request: &CreateSessionRequest) -> Result<Session, SessionError> {
        let info = self
            .backend
            .create_session(self.config.base_url(), request)
            .await?;
        if info.id.trim().is_empty() {
            return Err(SessionError::InvalidResponse(
                "created session has empty id".into(),
            ));
        }
        Ok(info.into_session())
    }

    pub async fn stop(&self, session_id: &str) -> Result<(), SessionError> {
        self.backend
            .stop_session(self.config.base_url(), session_id)
            .await
    }

    pub async fn lookup(&self, session_id: &str) -> Result<Session, SessionError> {
        let info = self
            .backend
            .lookup_session(self.config.base_url(), session_id)
            .await?;
        Ok(info.into_session())
    }

    pub async fn transcript(
        &self,
        session_id: &str,
        offset: Option<u64>,
    ) -> Result<String, SessionError> {
        self.backend
            .fetch_transcript(self.config.base_url(), session_id, offset)
            .await
    }

    pub fn stream_url(&self, session_id: &str) -> Result<Url, SessionError> {
        self.config.stream_url(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryBackend {
        sessions: Mutex<HashMap<String, SessionInfo>>,
        reject_creates: bool,
    }

    #[async_trait]
    impl SessionBackend for InMemoryBackend {
        async fn create_session(
            &self,
            _base_url: &Url,
            request: &CreateSessionRequest,
        ) -> Result<SessionInfo, SessionError> {
            if self.reject_creates {
                return Err(SessionError::Rejected("session pool is full".into()));
            }
            let id = format!("sess-{}", self.sessions.lock().unwrap().len() + 1);
            let info = SessionInfo {
                id: id.clone(),
                created_at: Some(OffsetDateTime::now_utc()),
                command: request.command.clone(),
                args: request.args.clone(),
            };
            self.sessions.lock().unwrap().insert(
                id,
                SessionInfo {
                    id: info.id.clone(),
                    created_at: info.created_at,
                    command: info.command.clone(),
                    args: info.args.clone(),
                },
            );
            Ok(info)
        }

        async fn stop_session(
            &self,
            _base_url: &Url,
            session_id: &str,
        ) -> Result<(), SessionError> {
            self.sessions.lock().unwrap().remove(session_id);
            Ok(())
        }

        async fn lookup_session(
            &self,
            _base_url: &Url,
            session_id: &str,
        ) -> Result<SessionInfo, SessionError> {
            let sessions = self.sessions.lock().unwrap();
            match sessions.get(session_id) {
                Some(info) => Ok(SessionInfo {
                    id: info.id.clone(),
                    created_at: info.created_at,
                    command: info.command.clone(),
                    args: info.args.clone(),
                }),
                None => Err(SessionError::Expired),
            }
        }

        async fn fetch_transcript(
            &self,
            _base_url: &Url,
            _session_id: &str,
            _offset: Option<u64>,
        ) -> Result<String, SessionError> {
            Ok(String::new())
        }
    }

    fn api(backend: InMemoryBackend) -> SessionApi {
        let config = SessionConfig::new("http://127.0.0.1:8080").unwrap();
        SessionApi::with_backend(config, Arc::new(backend))
    }

    #[tokio::test]
    async fn create_then_lookup_roundtrip() {
        let api = api(InMemoryBackend::default());
        let request = CreateSessionRequest {
            command: Some("bash".into()),
            args: vec!["-l".into()],
            ..CreateSessionRequest::default()
        };
        let session = api.create(&request).await.unwrap();
        assert_eq!(session.command, "bash");

        let found = api.lookup(&session.id).await.unwrap();
        assert_eq!(found.id, session.id);
    }

    #[tokio::test]
    async fn lookup_after_stop_reports_expired() {
        let api = api(InMemoryBackend::default());
        let session = api.create(&CreateSessionRequest::default()).await.unwrap();
        api.stop(&session.id).await.unwrap();
        assert!(matches!(
            api.lookup(&session.id).await,
            Err(SessionError::Expired)
        ));
    }

    #[tokio::test]
    async fn create_rejection_is_distinct_from_transport_errors() {
        let api = api(InMemoryBackend {
            reject_creates: true,
            ..InMemoryBackend::default()
        });
        assert!(matches!(
            api.create(&CreateSessionRequest::default()).await,
            Err(SessionError::Rejected(_))
        ));
    }

    #[test]
    fn config_normalizes_bare_host() {
        let config = SessionConfig::new("127.0.0.1:8080").unwrap();
        assert_eq!(config.base_url().scheme(), "http");
    }

    #[test]
    fn stream_url_maps_schemes() {
        let config = SessionConfig::new("https://terminals.example.com").unwrap();
        let url = config.stream_url("abc123").unwrap();
        assert_eq!(url.as_str(), "wss://terminals.example.com/api/v1/sessions/abc123/stream");

        let config = SessionConfig::new("http://127.0.0.1:8080").unwrap();
        let url = config.stream_url("abc123").unwrap();
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn empty_base_url_is_invalid() {
        assert!(matches!(
            SessionConfig::new("  "),
            Err(SessionError::InvalidConfig(_))
        ));
    }
}
