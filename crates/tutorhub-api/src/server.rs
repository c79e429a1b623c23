use crate::{create_router, AppState, LoginThrottle};
use chrono::Utc;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info};
use tutorhub_core::{Result, Settings, TutorHubError};
use tutorhub_store::Database;

pub struct Server {
    state: AppState,
    addr: SocketAddr,
}

impl Server {
    pub fn new(settings: Settings) -> Result<Self> {
        let ip: IpAddr = settings.server.host.parse().map_err(|e| {
            TutorHubError::InvalidOperation(format!(
                "invalid server.host {:?}: {}",
                settings.server.host, e
            ))
        })?;
        let addr = SocketAddr::new(ip, settings.server.port);
        let state = AppState::new(settings)?;
        Ok(Self { state, addr })
    }

    pub fn from_state(state: AppState, addr: SocketAddr) -> Self {
        Self { state, addr }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> Result<()> {
        spawn_reset_purger(
            self.state.db.clone(),
            Duration::from_secs(self.state.settings.password_reset.purge_interval_secs),
        );
        spawn_throttle_pruner(
            self.state.throttle.clone(),
            Duration::from_secs(self.state.settings.security.throttle_prune_interval_secs),
        );
        let router = create_router(self.state.clone());

        let listener = {
            let socket = if self.addr.is_ipv6() {
                tokio::net::TcpSocket::new_v6()
            } else {
                tokio::net::TcpSocket::new_v4()
            }?;

            // Rebind quickly across restarts.
            let _ = socket.set_reuseaddr(true);
            let _ = socket.set_keepalive(true);

            socket.bind(self.addr)?;
            socket.listen(1024)?
        };

        info!(
            storage = self.state.db.backend_name(),
            env = %self.state.settings.env,
            "TutorHub API listening on http://{}",
            self.addr
        );
        info!("  GET  /health");
        info!("  /api/users/ /api/students/ /api/tutors/ /api/login/ /api/password-reset/");
        info!("  /api/forum/questions/ /api/forum/answers/ /api/forum/comments/ /api/forum/votes/");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("server stopped");
        Ok(())
    }
}

/// Deletes expired password-reset tokens every `interval`.
pub fn spawn_reset_purger(db: Arc<Database>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match db.delete_expired_password_resets(Utc::now()) {
                Ok(0) => debug!("no expired password resets"),
                Ok(purged) => info!(purged, "purged expired password resets"),
                Err(e) => error!(error = %e, "password reset purge failed"),
            }
        }
    })
}

/// Forgets idle login-throttle keys every `interval`.
pub fn spawn_throttle_pruner(
    throttle: Arc<LoginThrottle>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            throttle.prune();
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
