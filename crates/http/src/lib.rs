//! HTTP surface for log queries: server-sent event streams over axum.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod handlers;
mod params;

pub use error::{Error, ParamError};
pub use handlers::AppState;
pub use params::parse_query_params;

use std::future::IntoFuture;
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::Router;
use axum::http::Method;
use axum::routing::get;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use handlers::{health_handler, heartbeat_handler, query_handler};

/// Builds the router serving `/query`, `/heartbeat` and `/healthz`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_origin(Any);

    Router::new()
        .route("/query", get(query_handler))
        .route("/heartbeat", get(heartbeat_handler))
        .route("/healthz", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// A server that can be started once and shut down.
#[async_trait]
pub trait HttpServer: Send + Sync + 'static {
    /// Error returned when starting fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Binds and starts serving `router` in the background.
    async fn start(&self, router: Router) -> Result<JoinHandle<()>, Self::Error>;

    /// Stops serving and waits for the server task to finish.
    async fn shutdown(&self);
}

/// Plain HTTP server for log queries.
pub struct LogQueryServer {
    listen_addr: SocketAddr,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl LogQueryServer {
    /// Creates a new instance of `LogQueryServer`.
    #[must_use]
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            local_addr: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[async_trait]
impl HttpServer for LogQueryServer {
    type Error = Error;

    async fn start(&self, router: Router) -> Result<JoinHandle<()>, Self::Error> {
        let shutdown_token = self.shutdown_token.clone();

        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(Error::Bind)?;
        let local_addr = listener.local_addr().map_err(Error::Bind)?;
        *self.local_addr.lock() = Some(local_addr);

        info!(%local_addr, "http server listening");

        let handle = self.task_tracker.spawn(async move {
            tokio::select! {
                e = axum::serve(listener, router.into_make_service()).into_future() => {
                    info!("http server exited {:?}", e);
                }
                () = shutdown_token.cancelled() => {}
            };
        });

        self.task_tracker.close();

        Ok(handle)
    }

    async fn shutdown(&self) {
        info!("http server shutting down...");

        self.shutdown_token.cancel();
        self.task_tracker.wait().await;

        info!("http server shutdown");
    }
}
