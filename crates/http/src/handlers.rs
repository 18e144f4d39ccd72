//! Request handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use backscan_notify::NotificationCenter;
use backscan_query::{Batch, Error as QueryError, QueryService};
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::params::parse_query_params;

/// Messages a heartbeat subscriber may fall behind by before missing some.
const HEARTBEAT_BUFFER: usize = 16;

/// Shared state handed to every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Answers `/query` requests.
    pub service: QueryService,

    /// Source of `/heartbeat` messages.
    pub heartbeats: Arc<NotificationCenter<String>>,
}

impl AppState {
    /// Creates handler state.
    pub const fn new(service: QueryService, heartbeats: Arc<NotificationCenter<String>>) -> Self {
        Self {
            service,
            heartbeats,
        }
    }
}

/// Handler for `GET /query`.
///
/// Streams matching lines as server-sent events: one `batch` event per batch
/// with one data line per log line, then a `done` event carrying the number
/// of lines sent. A failure before the first batch is an error status; a
/// later one is an `error` event.
pub(crate) async fn query_handler(
    State(AppState { service, .. }): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Response {
    let params = match parse_query_params(raw.as_deref()) {
        Ok(params) => params,
        Err(e) => {
            debug!(error = %e, "rejected query string");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    info!(
        file_name = %params.file_name,
        last_n_events = params.last_n_events,
        include_filter = ?params.include_filter,
        "log query"
    );

    let cancel = CancellationToken::new();
    let mut rx = service.query(params, cancel.clone());

    let first = match rx.recv().await {
        Some(Ok(batch)) => batch,
        Some(Err(e)) => return error_response(&e),
        None => return error_response(&QueryError::WorkerStopped),
    };

    // Dropping the response stream (client gone) cancels the worker.
    let guard = cancel.drop_guard();

    let stream = async_stream::stream! {
        let _guard = guard;
        let mut delivered = 0usize;
        let mut item: Option<backscan_query::Result<Batch>> = Some(Ok(first));

        while let Some(current) = item {
            match current {
                Ok(batch) if batch.is_final => {
                    yield event(Event::default().event("done").data(delivered.to_string()));
                    break;
                }
                Ok(batch) => {
                    delivered += batch.lines.len();
                    yield event(batch_event(&batch));
                }
                Err(e) => {
                    warn!(error = %e, "query failed mid-stream");
                    yield event(Event::default().event("error").data(e.to_string()));
                    break;
                }
            }
            item = rx.recv().await;
        }
    };

    (
        [(header::CONNECTION, "keep-alive")],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

/// Handler for `GET /heartbeat`.
pub(crate) async fn heartbeat_handler(
    State(AppState { heartbeats, .. }): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = heartbeats.subscribe(HEARTBEAT_BUFFER);

    let stream = async_stream::stream! {
        while let Some(now) = subscription.recv().await {
            yield event(Event::default().data(now));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Handler for `GET /healthz`.
pub(crate) async fn health_handler() -> &'static str {
    "ok"
}

fn event(event: Event) -> Result<Event, Infallible> {
    Ok(event)
}

fn batch_event(batch: &Batch) -> Event {
    let data = batch
        .lines
        .iter()
        .map(|line| line.replace('\r', ""))
        .collect::<Vec<_>>()
        .join("\n");

    Event::default().event("batch").data(data)
}

fn error_response(error: &QueryError) -> Response {
    let status = match error {
        QueryError::InvalidFileName(_) => StatusCode::BAD_REQUEST,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    warn!(%status, error = %error, "query failed before streaming");
    (status, error.to_string()).into_response()
}
