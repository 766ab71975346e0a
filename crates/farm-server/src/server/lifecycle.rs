//! Server bootstrap and graceful shutdown.

use crate::server::{
    config::ServerConfig,
    service::handler::FarmService,
    tls::server_tls_config,
};
use anyhow::Context;
use core::future::Future;
use farm_core::{
    interceptor::{ServerInterceptorLayer, ServerInterceptorService},
    proto::{FILE_DESCRIPTOR_SET, farm_server::FarmServer},
    store::RecordStore,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal, sync::oneshot, task::JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::{Layer, ServiceBuilder};
use tower_http::cors::{Any, CorsLayer};

type InterceptedFarm = ServerInterceptorService<FarmServer<FarmService>>;

/// A running farm server.
///
/// Dropping the handle does not stop the server; call [`ServerHandle::stop`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    service: FarmService,
    health_reporter: HealthReporter,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl ServerHandle {
    /// Binds `config.server_addr` and starts serving `store` in the
    /// background.
    ///
    /// Binding port 0 picks a free port; see [`ServerHandle::local_addr`].
    pub async fn start(config: ServerConfig, store: Arc<RecordStore>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&config.server_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.server_addr))?;
        let local_addr = listener.local_addr()?;
        let incoming = TcpListenerStream::new(listener);
        log_startup_info(local_addr, &config, &store);

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter.set_serving::<FarmServer<FarmService>>().await;

        let reflection = Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;

        let service = FarmService::new(config.clone(), store);

        let mut builder = Server::builder();
        if let Some(tls) = server_tls_config(&config.security)? {
            builder = builder.tls_config(tls)?;
        }

        let router = builder
            .accept_http1(true)
            .http2_adaptive_window(Some(true))
            .layer(
                ServiceBuilder::new()
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    )
                    .layer(GrpcWebLayer::new()),
            )
            .add_service(health_service)
            .add_service(reflection)
            .add_service(build_farm_service(service.clone(), &config));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(router.serve_with_incoming_shutdown(incoming, async {
            let _ = shutdown_rx.await;
        }));

        Ok(Self {
            local_addr,
            service,
            health_reporter,
            shutdown_tx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn service(&self) -> &FarmService {
        &self.service
    }

    /// Stops the server gracefully.
    ///
    /// Health flips to `NOT_SERVING`, new calls are refused, in-flight
    /// streams drain (or are cancelled after the shutdown timeout) and the
    /// listener closes.
    pub async fn stop(self) -> anyhow::Result<()> {
        // 1. Publish the status
        self.health_reporter
            .set_not_serving::<FarmServer<FarmService>>()
            .await;

        // 2. Drain or cancel in-flight calls
        self.service.shutdown().await;

        // 3. Stop the transport
        let _ = self.shutdown_tx.send(());
        self.task.await??;

        tracing::info!("Service shut down successfully");
        Ok(())
    }

    /// Serves until `signal` resolves, then stops gracefully.
    ///
    /// Returns early with the transport error if the server dies on its own.
    pub async fn run_until<F>(mut self, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let exited = tokio::select! {
            () = signal => None,
            res = &mut self.task => Some(res),
        };

        match exited {
            None => self.stop().await,
            Some(res) => {
                res??;
                anyhow::bail!("server exited before a shutdown signal")
            }
        }
    }
}

fn build_farm_service(service: FarmService, config: &ServerConfig) -> InterceptedFarm {
    let server = FarmServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate);

    ServerInterceptorLayer::new(config.interceptors.clone()).layer(server)
}

fn log_startup_info(addr: SocketAddr, config: &ServerConfig, store: &RecordStore) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting farm service on {} with full config: {:#?}",
            addr,
            config
        );
    } else {
        tracing::info!(
            "Starting farm service on {} with {} records",
            addr,
            store.len()
        );
    }
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
