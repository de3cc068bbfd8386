use crate::relay::ChatEvent;
use axum::body::Body;
use axum::http::{Response, StatusCode, header};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Wrap a relay event channel as a server-sent-event response. The body
/// stream owns the receiver, so a departed client drops it and the relay
/// producer sees the channel close.
pub(super) fn sse_response(events: mpsc::Receiver<ChatEvent>) -> Response<Body> {
    let stream = ReceiverStream::new(events).map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_else(|_| String::from("{}"));
        Ok::<_, std::convert::Infallible>(format!("data: {json}\n\n"))
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/event-stream"),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    response.headers_mut().insert(
        header::CONNECTION,
        header::HeaderValue::from_static("keep-alive"),
    );
    response
}
