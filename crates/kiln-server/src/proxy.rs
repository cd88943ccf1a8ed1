//! Forwarding of configured path prefixes to upstream servers.
//!
//! A request whose path starts with a configured prefix is replayed against
//! the prefix's upstream origin with the same method, path, query, headers
//! and body. The longest matching prefix wins. Bodies are buffered in both
//! directions.

use crate::error::ServerError;
use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Largest request body forwarded upstream.
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// Connection-scoped headers that never cross the proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProxyRule {
    prefix: String,
    origin: String,
}

/// Proxy rules of one instance plus the client that forwards with them.
#[derive(Debug, Clone)]
pub struct ProxyTable {
    rules: Vec<ProxyRule>,
    client: reqwest::Client,
}

impl ProxyTable {
    pub fn new(rules: &BTreeMap<String, String>) -> Result<Self, ServerError> {
        let mut rules: Vec<ProxyRule> = rules
            .iter()
            .map(|(prefix, origin)| ProxyRule {
                prefix: prefix.clone(),
                origin: origin.trim_end_matches('/').to_string(),
            })
            .collect();
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ServerError::Proxy)?;
        Ok(Self { rules, client })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Upstream URL for a request path (with query), if a rule matches.
    #[must_use]
    pub fn upstream_for(&self, path_and_query: &str) -> Option<String> {
        self.rules
            .iter()
            .find(|rule| path_and_query.starts_with(&rule.prefix))
            .map(|rule| format!("{}{path_and_query}", rule.origin))
    }

    /// Replay `request` against `upstream`. Upstream failures become a
    /// `502` with the error text.
    pub async fn forward(&self, upstream: &str, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY).await {
            Ok(body) => body,
            Err(e) => {
                return (StatusCode::PAYLOAD_TOO_LARGE, format!("Proxy error: {e}"))
                    .into_response()
            }
        };

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        // The upstream sees its own host, not the dev server's.
        headers.remove(header::HOST);

        debug!(method = %parts.method, %upstream, "proxying");
        let sent = self
            .client
            .request(parts.method, upstream)
            .headers(headers)
            .body(body)
            .send()
            .await;
        let upstream_response = match sent {
            Ok(response) => response,
            Err(e) => return bad_gateway(upstream, &e),
        };

        let status = upstream_response.status();
        let mut headers = upstream_response.headers().clone();
        strip_hop_by_hop(&mut headers);
        match upstream_response.bytes().await {
            Ok(bytes) => {
                let mut response = Response::new(Body::from(bytes));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            Err(e) => bad_gateway(upstream, &e),
        }
    }
}

fn bad_gateway(upstream: &str, e: &reqwest::Error) -> Response {
    error!(%upstream, error = %e, "proxy request failed");
    (StatusCode::BAD_GATEWAY, format!("Proxy error: {e}")).into_response()
}
