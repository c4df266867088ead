use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tollgate_core::{REQUEST_ID_HEADER, RequestCorrelator};

/// Attach a [`tollgate_core::RequestId`] to the request and echo it on the response
///
/// Runs outermost so that every response, including auth rejections,
/// carries the header.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = RequestCorrelator.correlate(request.headers());
    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;
    if let Some(value) = request_id.to_header_value() {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
