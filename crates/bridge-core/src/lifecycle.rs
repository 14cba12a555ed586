//! Daemon startup, background maintenance tasks, and graceful shutdown.

use crate::server::Broker;
use bridge_config::BridgeConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Process exit codes, matching the daemon's documented contract.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const UNEXPECTED: i32 = 1;
    pub const BIND_FAILURE: i32 = 2;
    pub const CONFIG_ERROR: i32 = 3;
}

const REAP_TICK: Duration = Duration::from_secs(30);
const SAMPLE_TICK: Duration = Duration::from_secs(1);

/// Binds the primary endpoint: a Unix domain socket on POSIX platforms
/// (mode 0600), or a loopback TCP socket plus a discovery sidecar file
/// elsewhere.
pub enum Endpoint {
    #[cfg(unix)]
    Unix { listener: tokio::net::UnixListener, path: PathBuf },
    Tcp { listener: tokio::net::TcpListener, discovery_path: PathBuf },
}

/// Returns `AddrInUse` if the existing endpoint file is still held by a
/// live daemon; callers must not steal the endpoint out from under it.
fn addr_in_use(endpoint: &Path) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::AddrInUse,
        format!("a daemon is already listening on {}", endpoint.display()),
    )
}

pub async fn bind_endpoint(config: &BridgeConfig) -> std::io::Result<Endpoint> {
    #[cfg(unix)]
    {
        let path = PathBuf::from(&config.endpoint_path);
        if path.exists() {
            if tokio::net::UnixStream::connect(&path).await.is_ok() {
                warn!(path = %path.display(), "refusing to start: endpoint already has a live listener");
                return Err(addr_in_use(&path));
            }
            // Connect failed: nothing is listening on the other end, so this
            // file is orphaned from a daemon that did not clean up after
            // itself (crash, SIGKILL). Safe to reclaim.
            info!(path = %path.display(), "removing stale socket file from an orphaned daemon");
            let _ = std::fs::remove_file(&path);
        }
        let listener = tokio::net::UnixListener::bind(&path)?;
        set_socket_permissions(&path)?;
        return Ok(Endpoint::Unix { listener, path });
    }

    #[cfg(not(unix))]
    {
        let discovery_path = PathBuf::from(&config.discovery_path);
        if discovery_path.exists() {
            if let Some(addr) = read_discovery_addr(&discovery_path) {
                if tokio::net::TcpStream::connect(&addr).await.is_ok() {
                    warn!(addr = %addr, "refusing to start: discovery sidecar points at a live listener");
                    return Err(addr_in_use(&discovery_path));
                }
            }
            info!(path = %discovery_path.display(), "removing stale discovery sidecar from an orphaned daemon");
            let _ = std::fs::remove_file(&discovery_path);
        }
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        std::fs::write(&discovery_path, format!("127.0.0.1:{}", addr.port()))?;
        Ok(Endpoint::Tcp { listener, discovery_path })
    }
}

#[cfg(not(unix))]
fn read_discovery_addr(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)
}

impl Endpoint {
    /// The file to remove at shutdown: the socket path on POSIX, the
    /// discovery sidecar elsewhere.
    fn cleanup_path(&self) -> PathBuf {
        match self {
            #[cfg(unix)]
            Endpoint::Unix { path, .. } => path.clone(),
            Endpoint::Tcp { discovery_path, .. } => discovery_path.clone(),
        }
    }
}

/// Runs the daemon to completion: binds the endpoint, starts background
/// maintenance, serves connections until a shutdown signal arrives, then
/// drains in-flight work within the configured grace period.
pub async fn run(config: Arc<BridgeConfig>, broker: Arc<Broker>) -> i32 {
    let endpoint = match bind_endpoint(&config).await {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "failed to bind endpoint");
            return exit_code::BIND_FAILURE;
        }
    };
    info!(endpoint = %config.endpoint_path, "bridge daemon listening");

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(reap_task(broker.clone(), shutdown.clone())));
    tasks.push(tokio::spawn(sample_task(broker.clone(), shutdown.clone())));

    // `endpoint` is consumed here; cleanup on the path/sidecar file happens
    // via the cloned path captured below, since the listener itself moves
    // into the accept task.
    let cleanup_path = endpoint.cleanup_path();
    let accept_task = match endpoint {
        #[cfg(unix)]
        Endpoint::Unix { listener, .. } => {
            tokio::spawn(crate::server::run_unix(listener, broker.clone(), shutdown.clone()))
        }
        Endpoint::Tcp { listener, .. } => {
            tokio::spawn(crate::server::run_tcp(listener, broker.clone(), shutdown.clone()))
        }
    };

    wait_for_signal().await;
    info!("shutdown signal received, draining connections");
    shutdown.cancel();

    let grace = Duration::from_secs(config.shutdown_grace_seconds);
    if tokio::time::timeout(grace, accept_task).await.is_err() {
        warn!("shutdown grace period elapsed before the accept loop stopped");
    }
    for task in tasks {
        task.abort();
    }
    broker.registry.evict_all().await;
    let _ = std::fs::remove_file(&cleanup_path);
    info!("bridge daemon stopped");
    exit_code::OK
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn reap_task(broker: Arc<Broker>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(REAP_TICK);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = broker.registry.reap_idle().await;
                if evicted > 0 {
                    info!(evicted, "reaped idle resource handles");
                }
            }
        }
    }
}

async fn sample_task(broker: Arc<Broker>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(SAMPLE_TICK);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => broker.pressure.sample(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn config_with_endpoint(path: &Path) -> BridgeConfig {
        BridgeConfig { endpoint_path: path.to_str().unwrap().to_string(), ..Default::default() }
    }

    #[tokio::test]
    async fn reclaims_a_stale_socket_file_left_by_a_crashed_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sock");
        // A bare file at this path with nothing listening behind it models
        // a socket left over from a daemon that never ran its own cleanup.
        std::fs::write(&path, b"").unwrap();

        let config = config_with_endpoint(&path);
        let endpoint = bind_endpoint(&config).await.expect("stale socket should be reclaimed");
        match endpoint {
            Endpoint::Unix { path: bound, .. } => assert_eq!(bound, path),
            Endpoint::Tcp { .. } => panic!("expected a unix endpoint"),
        }
    }

    #[tokio::test]
    async fn refuses_to_start_when_a_live_daemon_already_holds_the_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sock");
        let _live_listener = tokio::net::UnixListener::bind(&path).unwrap();

        let config = config_with_endpoint(&path);
        let err = bind_endpoint(&config).await.expect_err("must not steal a live endpoint");
        assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
    }
}
