//! Client-side transport for the request broker.
//!
//! `call(module, function, params)` discovers the daemon endpoint, retries
//! a connection with exponential backoff, and — if the daemon is
//! unreachable at the transport layer — falls back to a one-shot
//! subprocess that speaks the same envelope over stdio. Handler-level
//! failures (`success: false` from the broker itself) are returned
//! verbatim; only transport failures trigger retry or fallback.

use bridge_core::envelope::{self, RequestEnvelope, ResponseEnvelope};
use bridge_core::BridgeError;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

#[cfg(unix)]
use tokio::net::UnixStream;
#[cfg(not(unix))]
use tokio::net::TcpStream;

/// Where to find the daemon and how hard to try before giving up on it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint_path: String,
    pub discovery_path: String,
    pub fallback_enabled: bool,
    pub fallback_binary: PathBuf,
    pub daemon_timeout: Duration,
    pub connect_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            endpoint_path: "/tmp/cpan_bridge.sock".to_string(),
            discovery_path: "cpan_bridge_socket.txt".to_string(),
            fallback_enabled: true,
            fallback_binary: PathBuf::from("bridge-daemon"),
            daemon_timeout: Duration::from_secs(30),
            connect_attempts: 3,
            backoff_base: Duration::from_millis(100),
        }
    }
}

impl ClientConfig {
    /// Applies the recognized client-side environment variables over
    /// whatever defaults or caller-supplied values are already set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("DAEMON_SOCKET") {
            self.endpoint_path = v;
        }
        if let Ok(v) = std::env::var("FALLBACK_ENABLED") {
            self.fallback_enabled = v == "1";
        }
        if let Ok(v) = std::env::var("DAEMON_MODE") {
            if v == "0" {
                self.connect_attempts = 0;
            }
        }
        if let Ok(v) = std::env::var("DAEMON_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                self.daemon_timeout = Duration::from_secs(secs);
            }
        }
        self
    }
}

/// Errors retained internally while attempting a connection; never
/// returned to callers directly — `call` always collapses failure into a
/// synthetic [`ResponseEnvelope`].
#[derive(Debug, thiserror::Error)]
enum TransportError {
    #[error("no daemon endpoint discovered")]
    NoEndpoint,
    #[error("connect failed: {0}")]
    Connect(std::io::Error),
    #[error("transport io error: {0}")]
    Io(std::io::Error),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("daemon call timed out")]
    Timeout,
}

const RETRYABLE_ERROR_CODES: &[&str] = &["timeout", "overloaded", "transient"];

pub struct Client {
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client { config }
    }

    /// Resolves the daemon endpoint per §4.9: a Unix socket path on POSIX,
    /// or `host:port` read from the discovery sidecar elsewhere.
    #[cfg(unix)]
    fn resolve_endpoint(&self) -> Option<PathBuf> {
        let path = PathBuf::from(&self.config.endpoint_path);
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    #[cfg(not(unix))]
    fn resolve_endpoint(&self) -> Option<String> {
        std::fs::read_to_string(&self.config.discovery_path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Performs one connect + half-close write + read-to-EOF round trip.
    async fn one_attempt(&self, request: &RequestEnvelope) -> Result<ResponseEnvelope, TransportError> {
        let body = envelope::encode(request).map_err(TransportError::Bridge)?;

        #[cfg(unix)]
        let mut stream = {
            let path = self.resolve_endpoint().ok_or(TransportError::NoEndpoint)?;
            UnixStream::connect(&path).await.map_err(TransportError::Connect)?
        };
        #[cfg(not(unix))]
        let mut stream = {
            let addr = self.resolve_endpoint().ok_or(TransportError::NoEndpoint)?;
            TcpStream::connect(&addr).await.map_err(TransportError::Connect)?
        };

        stream.write_all(&body).await.map_err(TransportError::Io)?;
        stream.shutdown().await.map_err(TransportError::Io)?;

        let mut response_bytes = Vec::new();
        stream.read_to_end(&mut response_bytes).await.map_err(TransportError::Io)?;
        envelope::decode_response(&response_bytes).map_err(TransportError::Bridge)
    }

    /// Attempts the daemon up to `connect_attempts` times with exponential
    /// backoff, honoring `deadline` as a hard ceiling on the whole call.
    async fn call_daemon(&self, request: &RequestEnvelope, deadline: Duration) -> Result<ResponseEnvelope, TransportError> {
        let attempt_future = async {
            let mut last_err = TransportError::NoEndpoint;
            for attempt in 0..self.config.connect_attempts {
                match self.one_attempt(request).await {
                    Ok(response) => return Ok(response),
                    Err(err) => {
                        debug!(attempt, error = %err, "daemon attempt failed");
                        last_err = err;
                        if attempt + 1 < self.config.connect_attempts {
                            let backoff = self.config.backoff_base * 2u32.pow(attempt);
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }
            Err(last_err)
        };

        match timeout(deadline, attempt_future).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Spawns the helper binary in one-shot mode and pipes the envelope
    /// over its stdin, per §4.9 step 4. The subprocess must not itself
    /// attempt a daemon connection — that is the helper binary's contract,
    /// not something enforced here.
    async fn call_fallback(&self, request: &RequestEnvelope) -> Result<ResponseEnvelope, TransportError> {
        let body = envelope::encode(request).map_err(TransportError::Bridge)?;
        let mut child = Command::new(&self.config.fallback_binary)
            .arg("once")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(TransportError::Io)?;

        {
            let stdin = child.stdin.as_mut().expect("stdin was piped");
            stdin.write_all(&body).await.map_err(TransportError::Io)?;
        }
        child.stdin = None;

        let output = child.wait_with_output().await.map_err(TransportError::Io)?;
        envelope::decode_response(&output.stdout).map_err(TransportError::Bridge)
    }

    fn is_retryable(response: &ResponseEnvelope) -> bool {
        response
            .error_code
            .as_deref()
            .map(|code| RETRYABLE_ERROR_CODES.contains(&code))
            .unwrap_or(false)
    }

    /// The public entry point: `call(module, function, params)`. Never
    /// returns `Err` — all failure is folded into a `success: false`
    /// envelope so callers never see a transport exception.
    pub async fn call(&self, module: &str, function: &str, params: Value) -> ResponseEnvelope {
        self.call_with_deadline(module, function, params, self.config.daemon_timeout).await
    }

    pub async fn call_with_deadline(
        &self,
        module: &str,
        function: &str,
        params: Value,
        deadline: Duration,
    ) -> ResponseEnvelope {
        let request = RequestEnvelope {
            module: module.to_string(),
            function: function.to_string(),
            params,
            request_id: None,
            client_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            timestamp: None,
            perl_caller: None,
        };

        match self.call_daemon(&request, deadline).await {
            Ok(response) => return response,
            Err(TransportError::Timeout) => {
                return ResponseEnvelope {
                    success: false,
                    result: None,
                    error: Some("daemon call exceeded deadline".to_string()),
                    error_code: Some("timeout".to_string()),
                    details: None,
                    request_id: None,
                    duration_ms: None,
                    daemon_error: Some(true),
                };
            }
            Err(err) => {
                warn!(error = %err, "daemon unreachable, considering fallback");
            }
        }

        if self.config.fallback_enabled {
            match self.call_fallback(&request).await {
                Ok(response) => return response,
                Err(err) => {
                    warn!(error = %err, "subprocess fallback also failed");
                    return ResponseEnvelope::daemon_unreachable(format!(
                        "daemon unreachable and fallback failed: {err}"
                    ));
                }
            }
        }

        ResponseEnvelope::daemon_unreachable("daemon unreachable and fallback is disabled")
    }
}

/// Whether a completed response should be retried by a caller that wants
/// automatic retry on top of `call` (e.g. a higher-level wrapper). `call`
/// itself does not loop on handler-level retryable codes — only on
/// transport-layer connect failures — so this is exposed for callers that
/// want to apply the §4.9 retry classification themselves.
pub fn is_retryable_response(response: &ResponseEnvelope) -> bool {
    Client::is_retryable(response)
}
