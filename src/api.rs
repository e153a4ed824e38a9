use crate::config::Config;
use crate::knowledge::KnowledgeBase;
use crate::model::{DiscoveryRequest, ScanEvent};
use crate::onvif::OnvifProber;
use crate::probe::StreamProber;
use crate::scanner::{EventSink, Scanner};
use crate::search::SearchEngine;
use anyhow::Result;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Buffered events per scan; a stalled client loses progress ticks, not
/// the scan itself.
const EVENT_BUFFER: usize = 256;

type LiveScanner = Scanner<StreamProber, OnvifProber>;

#[derive(Clone)]
pub struct ApiState {
    pub kb: Arc<KnowledgeBase>,
    pub search: Arc<SearchEngine>,
    pub scanner: Arc<LiveScanner>,
}

pub async fn run(cfg: Config, kb: Arc<KnowledgeBase>, scanner: Arc<LiveScanner>) -> Result<()> {
    let bind = cfg.api.bind.clone();
    let state = Arc::new(ApiState {
        search: Arc::new(SearchEngine::new(Arc::clone(&kb))),
        kb,
        scanner,
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/scan", post(scan))
        .route("/api/cameras/search", get(search_cameras))
        .route("/api/brands", get(list_brands))
        .with_state(state);

    let listener = TcpListener::bind(&bind).await?;
    info!(bind = %bind, "api listener ready");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Bounded-channel sink bridging a scan to its SSE response. Never blocks
/// the scanner: a full buffer drops the event, a hung-up client just stops
/// receiving.
pub struct ChannelSink {
    tx: mpsc::Sender<ScanEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ScanEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ScanEvent) {
        if let Err(err) = self.tx.try_send(event) {
            debug!(error = %err, "dropping scan event");
        }
    }
}

async fn health(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let brands = state.kb.list_brands().await.map(|b| b.len()).unwrap_or(0);
    Json(json!({
        "ok": true,
        "service": "camscout",
        "version": env!("CARGO_PKG_VERSION"),
        "brands": brands,
    }))
}

async fn scan(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<DiscoveryRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    let scanner = Arc::clone(&state.scanner);
    tokio::spawn(async move {
        let sink = ChannelSink::new(tx);
        if let Err(err) = scanner.scan(&request, &sink).await {
            warn!(error = %err, "scan rejected");
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| Event::default().json_data(&event));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: String,
    #[serde(default)]
    limit: usize,
}

async fn search_cameras(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<SearchParams>,
) -> Json<Value> {
    match state.search.search(&params.q, params.limit).await {
        Ok(results) => Json(json!({ "ok": true, "results": results })),
        Err(err) => Json(json!({ "ok": false, "error": err.to_string() })),
    }
}

async fn list_brands(State(state): State<Arc<ApiState>>) -> Json<Value> {
    match state.kb.list_brands().await {
        Ok(brands) => Json(json!({ "ok": true, "brands": brands })),
        Err(err) => Json(json!({ "ok": false, "error": err.to_string() })),
    }
}
