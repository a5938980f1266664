use crate::soap::{extract_action, SoapResponder};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

#[derive(Clone)]
pub struct DeviceServerState {
    pub responder: Arc<SoapResponder>,
    pub snapshot_image: Arc<PathBuf>,
}

impl DeviceServerState {
    pub fn new(responder: SoapResponder, snapshot_image: PathBuf) -> Self {
        Self {
            responder: Arc::new(responder),
            snapshot_image: Arc::new(snapshot_image),
        }
    }
}

pub fn router(state: DeviceServerState) -> Router {
    Router::new()
        .route(
            "/snapshot.png",
            get(snapshot).post(soap).fallback(not_found),
        )
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// SOAP endpoint. Always answers 200, whatever the body contains.
async fn soap(State(state): State<DeviceServerState>, uri: Uri, body: Bytes) -> Response {
    let body = String::from_utf8_lossy(&body);
    let action = extract_action(&body).unwrap_or_default();
    let response = state.responder.handle(uri.path(), &action, &body);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, SOAP_CONTENT_TYPE)],
        response,
    )
        .into_response()
}

async fn snapshot(State(state): State<DeviceServerState>) -> Response {
    match tokio::fs::read(state.snapshot_image.as_path()).await {
        Ok(image) => ([(header::CONTENT_TYPE, "image/png")], image).into_response(),
        Err(e) => {
            debug!(
                path = %state.snapshot_image.display(),
                error = %e,
                "snapshot image unavailable"
            );
            (StatusCode::NOT_FOUND, "Snapshot not found").into_response()
        }
    }
}

/// Any path accepts SOAP posts; everything else is not found
async fn fallback(state: State<DeviceServerState>, method: Method, uri: Uri, body: Bytes) -> Response {
    if method == Method::POST {
        soap(state, uri, body).await
    } else {
        not_found().await
    }
}

async fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

/// HTTP listener serving one emulated device
pub struct DeviceServer {
    listener: TcpListener,
    state: DeviceServerState,
}

impl DeviceServer {
    /// Bind on the device's advertised `hostname:server_port`
    pub async fn bind(responder: SoapResponder, snapshot_image: PathBuf) -> io::Result<Self> {
        let device = responder.device();
        let listener = TcpListener::bind((device.hostname.as_str(), device.server_port)).await?;

        info!(
            device = %device.name,
            addr = %listener.local_addr()?,
            "ONVIF server listening"
        );

        Ok(Self::with_listener(listener, responder, snapshot_image))
    }

    pub fn with_listener(
        listener: TcpListener,
        responder: SoapResponder,
        snapshot_image: PathBuf,
    ) -> Self {
        Self {
            listener,
            state: DeviceServerState::new(responder, snapshot_image),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> io::Result<()> {
        let app = router(self.state);
        axum::serve(self.listener, app.into_make_service()).await
    }
}
