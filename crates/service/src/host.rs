//! Service host: wiring and lifecycle.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::handler::Handler;
use axum::routing::{on, MethodFilter};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use thiserror::Error;

use siftd_core::{Config, ConfigError};
use siftd_security::{
    AuthModel, AuthRule, AuthTimeout, KeyCache, KeyCacheError, PolicyError, Realm,
};

/// How long in-flight requests get to drain after a shutdown signal.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    KeyCache(#[from] KeyCacheError),

    #[error("invalid listen address '{0}': the format must be http://host:port or https://host:port")]
    InvalidListenAddress(String),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

enum ListenScheme {
    Http,
    Https,
}

/// Single-process container for one noun service.
///
/// Owns the configuration, the shared [`KeyCache`], and the router. Routes
/// are registered pre-gated by an [`AuthModel`]; the key cache stays a leaf
/// (it takes its identity-service URL from configuration and holds no
/// back-reference to the host).
pub struct ServiceHost {
    config: Config,
    key_cache: Arc<KeyCache>,
    router: Router,
}

impl ServiceHost {
    /// Initialize logging, load configuration from the environment, and
    /// build the host. Configuration failures are fatal — log and exit
    /// before listening.
    pub fn new() -> Result<Self, HostError> {
        siftd_observability::init();
        let config = Config::from_env()?;
        Self::with_config(config)
    }

    /// Build the host from an explicit configuration (the test seam).
    pub fn with_config(config: Config) -> Result<Self, HostError> {
        tracing::info!(
            service = %config.service_instance_name,
            "service base - validating configuration"
        );

        let key_cache = Arc::new(KeyCache::new(&config)?);

        Ok(Self {
            config,
            key_cache,
            router: Router::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.key_cache
    }

    /// Build an auth model seeded with one policy. Add further policies
    /// directly on the returned model before registering routes with it.
    pub fn new_auth_model(
        &self,
        realm: Realm,
        rule: AuthRule,
        timeout: AuthTimeout,
    ) -> Result<AuthModel, PolicyError> {
        let mut model = AuthModel::new(Arc::clone(&self.key_cache), self.config.debug_auth);
        model.add_policy(realm, rule, timeout)?;
        Ok(model)
    }

    /// Install `handler` under `method path`, wrapped by the model's gate.
    pub fn register_route<H, T>(
        &mut self,
        method: MethodFilter,
        path: &str,
        auth_model: &AuthModel,
        handler: H,
    ) where
        H: Handler<T, ()>,
        T: 'static,
    {
        let gate_state = Arc::new(auth_model.clone());
        let route = on(method, handler).route_layer(axum::middleware::from_fn_with_state(
            gate_state,
            crate::gate::auth_gate,
        ));

        self.router = std::mem::take(&mut self.router).route(path, route);
        tracing::info!(?method, path, "service base - registered route");
    }

    /// The assembled router (tests serve this directly).
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve until SIGINT/SIGTERM, then drain for up to ten seconds.
    pub async fn listen_and_serve(self) -> Result<(), HostError> {
        let listen_address = self.config.listen_address.clone();
        let (scheme, addr) = parse_listen_address(&listen_address)?;

        let handle = Handle::new();
        let service = self.router.into_make_service();

        let server = match scheme {
            ListenScheme::Http => {
                tracing::info!(%listen_address, "service base - starting HTTP server");
                let handle = handle.clone();
                tokio::spawn(async move {
                    axum_server::bind(addr).handle(handle).serve(service).await
                })
            }
            ListenScheme::Https => {
                let resdir = self.config.resdir_path()?;
                let cert = Path::new(resdir).join(self.config.https_cert_filename()?);
                let key = Path::new(resdir).join(self.config.https_key_filename()?);
                let tls = RustlsConfig::from_pem_file(cert, key).await?;

                tracing::info!(%listen_address, "service base - starting HTTPS server");
                let handle = handle.clone();
                tokio::spawn(async move {
                    axum_server::bind_rustls(addr, tls)
                        .handle(handle)
                        .serve(service)
                        .await
                })
            }
        };

        shutdown_signal().await;
        tracing::info!(%listen_address, "service base - received shutdown signal; shutting down HTTP server");

        handle.graceful_shutdown(Some(SHUTDOWN_DRAIN));

        match server.await {
            Ok(Ok(())) => tracing::info!("service base - HTTP server shutdown complete"),
            Ok(Err(err)) => return Err(HostError::Io(err)),
            Err(err) => tracing::error!(%err, "service base - server task failed"),
        }

        Ok(())
    }
}

/// Split `http(s)://host:port` and resolve the socket address.
fn parse_listen_address(listen: &str) -> Result<(ListenScheme, SocketAddr), HostError> {
    let invalid = || HostError::InvalidListenAddress(listen.to_string());

    let (scheme, host_port) = listen.split_once("://").ok_or_else(invalid)?;
    let scheme = match scheme {
        "http" => ListenScheme::Http,
        "https" => ListenScheme::Https,
        _ => return Err(invalid()),
    };

    let addr = host_port
        .to_socket_addrs()
        .map_err(|_| invalid())?
        .next()
        .ok_or_else(invalid)?;

    Ok((scheme, addr))
}

/// Resolves on SIGINT (ctrl-c) or, on unix, SIGTERM.
async fn shutdown_signal() {
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = interrupt => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                tracing::error!(%err, "service base - failed to install SIGTERM handler");
                let _ = interrupt.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = interrupt.await;
    }
}
