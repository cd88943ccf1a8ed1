//! Router: the HMR WebSocket plus a fallback that forwards proxied paths
//! upstream and hands every other request to the module pipeline.

use crate::proxy::ProxyTable;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use kiln_core::hmr::CLIENT_QUEUE;
use kiln_core::pipeline::virtual_modules::HMR_SOCKET_PATH;
use kiln_core::{HmrThrottle, ModulePipeline, ModuleRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ModulePipeline>,
    pub throttle: HmrThrottle,
    pub proxy: Arc<ProxyTable>,
    /// Set on every response.
    pub headers: Arc<HeaderMap>,
    pub cors: bool,
}

/// Parse configured response headers. Entries that are not valid HTTP
/// header names or values are logged and skipped.
pub fn response_headers(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %name, "skipping invalid response header from config"),
        }
    }
    map
}

pub fn router(state: AppState) -> Router {
    let cors = state.cors;
    let router = Router::new()
        .route(HMR_SOCKET_PATH, get(hmr_websocket))
        .fallback(fallback)
        .layer(middleware::map_response_with_state(
            state.clone(),
            add_configured_headers,
        ));
    let router = if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };
    router.with_state(state)
}

async fn add_configured_headers(State(state): State<AppState>, mut response: Response) -> Response {
    for (name, value) in state.headers.iter() {
        response.headers_mut().insert(name.clone(), value.clone());
    }
    response
}

async fn fallback(State(state): State<AppState>, request: Request) -> Response {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), ToString::to_string);
    if let Some(upstream) = state.proxy.upstream_for(&path_and_query) {
        return state.proxy.forward(&upstream, request).await;
    }
    serve_module(&state, request.uri()).await
}

async fn serve_module(state: &AppState, uri: &Uri) -> Response {
    let request = ModuleRequest::parse(uri.path(), uri.query());
    let response = state.pipeline.respond(&request).await;
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [
            (header::CONTENT_TYPE, response.content_type),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        response.body,
    )
        .into_response()
}

async fn hmr_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_hmr_socket(socket, state.throttle))
}

/// Forward throttle output to one browser until either side goes away.
/// A closed throttle queue means the instance is shutting down.
async fn handle_hmr_socket(mut socket: WebSocket, throttle: HmrThrottle) {
    let (tx, mut rx) = mpsc::channel(CLIENT_QUEUE);
    let id = throttle.register_client(tx);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(text) = outbound else {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => match inbound {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    throttle.unregister_client(id);
    debug!(client = id, "hmr socket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_response_headers_skipped() {
        let configured = BTreeMap::from([
            ("X-Dev".to_string(), "kiln".to_string()),
            ("bad header".to_string(), "x".to_string()),
            ("X-Newline".to_string(), "a\nb".to_string()),
        ]);
        let headers = response_headers(&configured);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-dev"], "kiln");
    }
}
