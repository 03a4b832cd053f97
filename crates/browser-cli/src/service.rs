//! Wires every component onto one bus and runs them until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use browser_askpass::{bind, create_router, serve, CredentialBroker};
use browser_core::bus::Bus;
use browser_core::dispatcher::Dispatcher;
use browser_core::logger::MessageLogger;
use browser_github::auth::jwt::Rs256Signer;
use browser_github::auth::{AppCredential, AuthConfig};
use browser_github::{
    CredentialIssuer, CredentialResponder, InstallationClientCache, RepositoryWatcher, RestClient,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::BrowserConfig;
use crate::download::{DownloadEnvironment, Downloader};
use crate::errors::ServiceError;

/// How long components get to stop after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const WATCHER: &str = "repository-watcher";

type Component = (&'static str, Result<(), ServiceError>);

/// A running service.
pub struct Service {
    bus: Bus,
    issuer: CredentialIssuer,
    clients: Arc<InstallationClientCache>,
    broker: CredentialBroker,
    broker_address: SocketAddr,
    shutdown: CancellationToken,
    tasks: JoinSet<Component>,
}

impl Service {
    /// Build every component and start it.
    ///
    /// All bus participants join before any task is spawned, so nothing is
    /// published until every subscriber is listening. Participants the
    /// caller registered on `bus` beforehand see the same traffic.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError` if the signing key, the GitHub client, the
    /// helper path or the broker listener cannot be set up.
    pub async fn start(
        config: &BrowserConfig,
        credential: AppCredential,
        bus: Bus,
    ) -> Result<Self, ServiceError> {
        let signer = Rs256Signer::new(credential.private_key())?;
        let api = RestClient::new(config.github.client_config())?;
        let served_host = credential.served_host().to_string();

        let issuer = CredentialIssuer::new(
            credential,
            Arc::new(signer),
            Arc::new(api),
            AuthConfig::default(),
        );
        let clients = Arc::new(InstallationClientCache::new(issuer.clone()));

        let helper = config
            .askpass
            .resolve_helper_path()
            .map_err(|e| ServiceError::HelperNotFound {
                message: e.to_string(),
            })?;
        if !helper.exists() {
            warn!(helper = %helper.display(), "Askpass helper not found; private module downloads will fail");
        }

        let listener = bind(&config.askpass.broker()).await?;
        let broker_address = listener
            .local_addr()
            .map_err(|e| browser_askpass::ServiceError::BindFailed {
                address: config.askpass.listen_address.to_string(),
                message: e.to_string(),
            })?;

        let logger = MessageLogger::new(&bus);
        let responder = CredentialResponder::new(&bus, issuer.clone(), clients.clone());
        let (broker, replies) = CredentialBroker::join(&bus, config.askpass.timeout());
        let (downloader, discovered) = Downloader::join(
            &bus,
            config.download.go_binary.clone(),
            DownloadEnvironment::new(&helper, broker_address, &served_host),
        );
        let watcher = RepositoryWatcher::new(&bus, issuer.clone(), clients.clone());

        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let cancel = shutdown.child_token();
        tasks.spawn(async move {
            logger.run(cancel).await;
            ("message-logger", Ok(()))
        });

        let cancel = shutdown.child_token();
        tasks.spawn(async move {
            responder.run(cancel).await;
            ("credential-responder", Ok(()))
        });

        let cancel = shutdown.child_token();
        tasks.spawn(async move {
            replies.run(cancel).await;
            ("askpass-replies", Ok(()))
        });

        let cancel = shutdown.child_token();
        let router = create_router(broker.clone());
        tasks.spawn(async move {
            let result = serve(listener, router, cancel).await;
            ("askpass-server", result.map_err(ServiceError::from))
        });

        let cancel = shutdown.child_token();
        let dispatcher =
            Dispatcher::new("module-downloader", downloader).with_workers(config.workers.downloader);
        tasks.spawn(async move {
            let result = match dispatcher.run(&cancel, discovered).await {
                Err(e) if !e.is_cancelled() => Err(ServiceError::from(e)),
                _ => Ok(()),
            };
            ("module-downloader", result)
        });

        let cancel = shutdown.child_token();
        tasks.spawn(async move {
            let result = watcher.run(cancel).await.map(|_| ());
            (WATCHER, result.map_err(ServiceError::from))
        });

        info!(
            served_host = %served_host,
            broker_address = %broker_address,
            downloaders = config.workers.downloader,
            "Module browser started"
        );

        Ok(Self {
            bus,
            issuer,
            clients,
            broker,
            broker_address,
            shutdown,
            tasks,
        })
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn issuer(&self) -> &CredentialIssuer {
        &self.issuer
    }

    /// Loopback address of the credential broker.
    pub fn broker_address(&self) -> SocketAddr {
        self.broker_address
    }

    /// Cancelling this token stops the service.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token fires or a component fails, then stop
    /// every component.
    ///
    /// Returns only after outstanding installation tokens have been revoked,
    /// or the shutdown grace period has run out.
    ///
    /// The repository watcher finishing its pass is expected. Any other
    /// component stopping on its own also stops the service.
    ///
    /// # Errors
    ///
    /// Returns the first component failure.
    pub async fn wait(mut self) -> Result<(), ServiceError> {
        let mut first_error = None;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                joined = self.tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((WATCHER, Ok(())))) => continue,
                    Some(Ok((component, Ok(())))) => {
                        warn!(component, "Component stopped; shutting down");
                        break;
                    }
                    Some(Ok((component, Err(e)))) => {
                        error!(component, error = %e, "Component failed; shutting down");
                        first_error = Some(e);
                        break;
                    }
                    Some(Err(join_err)) => {
                        error!(error = %join_err, "Component panicked; shutting down");
                        first_error = Some(ServiceError::ComponentFailed {
                            component: "unknown".to_string(),
                            message: join_err.to_string(),
                        });
                        break;
                    }
                },
            }
        }

        self.stop().await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn stop(&mut self) {
        self.shutdown.cancel();
        self.broker.shutdown();
        self.bus.close();
        self.clients.close_all();
        self.issuer.close();

        let tasks = &mut self.tasks;
        let issuer = &self.issuer;
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = tasks.join_next().await {
                if let Ok((component, Err(e))) = joined {
                    warn!(component, error = %e, "Component failed during shutdown");
                }
            }
            // Token revocations run on the issuer's monitors, not in `tasks`.
            issuer.closed().await;
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.tasks.len(),
                active_tokens = self.issuer.active_tokens(),
                grace_seconds = SHUTDOWN_GRACE.as_secs(),
                "Components did not stop in time; aborting"
            );
            self.tasks.abort_all();
        }

        info!("Module browser stopped");
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Unable to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
