//! The gateway edge: accept loop and per-request dispatch.
//!
//! Dispatch order per request: ACME bypass, then search against the active
//! instance, then either a terminal status write (status only, no body) or
//! rewrite → body buffering → `X-Forwarded-For` stamping → handoff to the
//! pipeline named by the matched path.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tracing::{debug, error, info, warn};

use crate::acme::{self, AcmeResponder};
use crate::metrics;
use crate::mux::{Mux, Verdict};
use crate::pipeline::PipelineRegistry;
use crate::realip;

pub type EdgeBody = BoxBody<Bytes, Infallible>;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

pub struct EdgeServer {
    mux: Arc<Mux>,
    registry: Arc<dyn PipelineRegistry>,
    acme: Arc<dyn AcmeResponder>,
}

impl EdgeServer {
    pub fn new(
        mux: Arc<Mux>,
        registry: Arc<dyn PipelineRegistry>,
        acme: Arc<dyn AcmeResponder>,
    ) -> Self {
        Self { mux, registry, acme }
    }

    /// Accept connections and dispatch requests until the listener fails.
    pub async fn run(self: Arc<Self>, port: u16) -> Result<(), anyhow::Error> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("listening on http://{}", addr);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = Arc::clone(&self);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move {
                        Ok::<_, Infallible>(server.dispatch(req, Some(remote_addr)).await)
                    }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }

    /// Route one request. Never panics on malformed input; every exit path
    /// produces a response.
    pub async fn dispatch<B>(&self, req: Request<B>, peer: Option<SocketAddr>) -> Response<EdgeBody>
    where
        B: hyper::body::Body + Send,
        B::Data: Send,
        B::Error: std::fmt::Display,
    {
        let method = req.method().as_str().to_string();

        // HTTP-01 challenges must work on whatever server the CA reaches,
        // so the prefix bypasses the matcher entirely.
        if let Some(token) = acme::challenge_token(req.uri().path()) {
            let response = match self.acme.key_authorization(token) {
                Some(key_auth) => text_response(StatusCode::OK, key_auth),
                None => status_response(StatusCode::NOT_FOUND),
            };
            metrics::record_request(&method, response.status().as_u16());
            return response;
        }

        let instance = self.mux.instance();
        let verdict = instance.search(&req, peer);
        metrics::record_verdict(verdict.label());

        let matched = match verdict {
            Verdict::Ok(path) => path,
            terminal => {
                let status = terminal.status();
                debug!(%status, uri = %req.uri(), "request short-circuited");
                metrics::record_request(&method, status.as_u16());
                return status_response(status);
            }
        };

        let Some(pipeline) = self.registry.pipeline(matched.backend()) else {
            warn!(backend = matched.backend(), "backend not found");
            metrics::record_request(&method, StatusCode::SERVICE_UNAVAILABLE.as_u16());
            return status_response(StatusCode::SERVICE_UNAVAILABLE);
        };

        let mut req = req;
        if let Some(new_path) = matched.rewrite(req.uri().path()) {
            let rewritten = replace_path(req.uri(), &new_path);
            *req.uri_mut() = rewritten;
        }

        // Pipelines may need to read the body more than once, so it is
        // buffered in full before handoff.
        let (mut parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                debug!("failed to read request body: {}", err);
                metrics::record_request(&method, StatusCode::BAD_REQUEST.as_u16());
                return status_response(StatusCode::BAD_REQUEST);
            }
        };

        if instance.x_forwarded_for() {
            append_x_forwarded_for(&mut parts.headers, peer);
        }

        let req = Request::from_parts(parts, Full::new(body));

        let global_filter = instance
            .global_filter()
            .and_then(|name| self.registry.global_filter(name));
        let result = match global_filter {
            Some(filter) => filter.handle(req, pipeline).await,
            None => pipeline.handle(req).await,
        };

        match result {
            Ok(response) => {
                metrics::record_request(&method, response.status().as_u16());
                response.map(BoxBody::new)
            }
            Err(err) => {
                error!(backend = matched.backend(), "pipeline failed: {:#}", err);
                metrics::record_request(&method, StatusCode::INTERNAL_SERVER_ERROR.as_u16());
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

/// Serve the Prometheus endpoint on its own port.
pub async fn run_metrics(port: u16) -> Result<(), anyhow::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("metrics on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(|_req| async {
                Ok::<_, Infallible>(text_response(StatusCode::OK, metrics::gather()))
            });
            let _ = http1::Builder::new().serve_connection(io, service).await;
        });
    }
}

/// Short-circuit responses carry the status code and no body.
fn status_response(status: StatusCode) -> Response<EdgeBody> {
    let mut response = Response::new(BoxBody::new(Empty::new()));
    *response.status_mut() = status;
    response
}

fn text_response(status: StatusCode, body: String) -> Response<EdgeBody> {
    let mut response = Response::new(BoxBody::new(Full::new(Bytes::from(body))));
    *response.status_mut() = status;
    response
}

/// Swap the URI path, keeping scheme, authority, and query intact.
fn replace_path(uri: &Uri, new_path: &str) -> Uri {
    let path_and_query = match uri.query() {
        Some(query) => format!("{new_path}?{query}"),
        None => new_path.to_string(),
    };

    let mut builder = Uri::builder();
    if let Some(scheme) = uri.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = uri.authority() {
        builder = builder.authority(authority.clone());
    }
    builder
        .path_and_query(path_and_query.as_str())
        .build()
        .unwrap_or_else(|_| uri.clone())
}

/// Append the client IP: set when absent, append when not already present,
/// leave alone when the IP already appears.
fn append_x_forwarded_for(headers: &mut HeaderMap, peer: Option<SocketAddr>) {
    let Some(ip) = realip::from_request(headers, peer) else {
        return;
    };
    let ip = ip.to_string();

    let merged = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        None => ip,
        Some(existing) if !existing.contains(&ip) => format!("{existing},{ip}"),
        Some(_) => return,
    };
    if let Ok(value) = HeaderValue::from_str(&merged) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
