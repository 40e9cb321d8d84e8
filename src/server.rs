use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{error, info, warn};
use warp::{Buf, Filter, Stream};

use crate::error::ValidationError;
use crate::response::{self, Envelope, ErrorCode, Outcome};
use crate::TallyService;

// 64KB cap on request bodies
const MAX_BODY_BYTES: usize = 64 * 1024;

pub struct TallyServer {
    service: Arc<TallyService>,
}

impl TallyServer {
    pub fn new(service: Arc<TallyService>) -> Self {
        Self { service }
    }

    pub async fn run(&self, addr: SocketAddr) {
        info!(%addr, sheet = self.service.sheet_name(), "Tally listening");
        warp::serve(routes(self.service.clone())).run(addr).await;
    }
}

pub fn routes(
    service: Arc<TallyService>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    // 1. POST /ingest
    let ingest = warp::post()
    .and(warp::path("ingest"))
    .and(warp::path::end())
    .and(warp::body::stream())
    .and(with_service(service.clone()))
    .and_then(handle_ingest);

    // 2. GET /rows
    let rows = warp::get()
    .and(warp::path("rows"))
    .and(warp::path::end())
    .and(with_service(service.clone()))
    .and_then(handle_rows);

    // 3. GET /health
    let health = warp::get()
    .and(warp::path("health"))
    .and(warp::path::end())
    .and(with_service(service))
    .map(|service: Arc<TallyService>| {
        warp::reply::json(&serde_json::json!({ "status": "ok", "sheet": service.sheet_name() }))
    });

    ingest.or(rows).or(health)
}

/// Reads the whole body, chunked or not, stopping once it passes the cap.
async fn read_body<S, B>(stream: S) -> Result<Vec<u8>, ValidationError>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    futures::pin_mut!(stream);
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let mut chunk = chunk.map_err(|e| {
            warn!(error = %e, "request body interrupted");
            ValidationError::MalformedPayload("request body could not be read".into())
        })?;
        if body.len() + chunk.remaining() > MAX_BODY_BYTES {
            return Err(ValidationError::MalformedPayload(format!(
                "request body exceeds {MAX_BODY_BYTES} bytes"
            )));
        }
        body.extend_from_slice(&chunk.copy_to_bytes(chunk.remaining()));
    }
    Ok(body)
}

async fn handle_ingest<S, B>(stream: S, service: Arc<TallyService>) -> Result<impl warp::Reply, Infallible>
where
    S: Stream<Item = Result<B, warp::Error>> + Send,
    B: Buf + Send,
{
    let envelope = match read_body(stream).await {
        Ok(body) => tokio::task::spawn_blocking(move || {
            let body = if body.is_empty() { None } else { Some(body.as_slice()) };
            service.submit(body)
        })
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "ingest task failed");
            Envelope::Error {
                message: "Internal server error".into(),
                code: ErrorCode::InternalError,
                required: None,
            }
        }),
        Err(e) => response::build(&Outcome::Rejected(e)),
    };

    Ok(warp::reply::with_header(
        warp::reply::json(&envelope),
        "content-type",
        response::CONTENT_TYPE,
    ))
}

async fn handle_rows(service: Arc<TallyService>) -> Result<impl warp::Reply, Infallible> {
    let rows = tokio::task::spawn_blocking(move || service.rows())
    .await
    .unwrap_or_else(|e| {
        error!(error = %e, "read task failed");
        Vec::new()
    });
    Ok(warp::reply::json(&rows))
}

fn with_service(service: Arc<TallyService>) -> impl Filter<Extract = (Arc<TallyService>,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}
