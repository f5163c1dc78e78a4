use crate::api::middleware::request_id::REQUEST_ID_HEADER;
use axum::{
    body::Body,
    http::{Request, Response, header},
};
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::TraceLayer;
use tracing::Span;

pub type ArchiveTraceLayer = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    fn(&Request<Body>) -> Span,
    fn(&Request<Body>, &Span),
    fn(&Response<Body>, Duration, &Span),
>;

/// Request tracing for the router. Must sit inside the request-id layer so
/// the span carries the id that is echoed to the client.
pub fn trace_layer() -> ArchiveTraceLayer {
    TraceLayer::new_for_http()
        .make_span_with(request_span as fn(&Request<Body>) -> Span)
        .on_request(log_request as fn(&Request<Body>, &Span))
        .on_response(log_response as fn(&Response<Body>, Duration, &Span))
}

fn header_str<'a>(request: &'a Request<Body>, name: &str) -> &'a str {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

fn request_span(request: &Request<Body>) -> Span {
    tracing::info_span!(
        "archive_request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %header_str(request, REQUEST_ID_HEADER),
        client = %header_str(request, header::USER_AGENT.as_str()),
    )
}

fn log_request(request: &Request<Body>, _span: &Span) {
    let length = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    tracing::info!("📥 {} {} ({} bytes)", request.method(), request.uri(), length);
}

fn log_response(response: &Response<Body>, latency: Duration, _span: &Span) {
    // For archives this is time to first byte; the body may still be streaming
    tracing::info!("📤 {} after {:?}", response.status(), latency);
}
