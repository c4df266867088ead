use std::fmt;
use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Serialize, Serializer};

/// Header used to propagate the request id in both directions
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Longest inbound request id that is accepted as-is
const MAX_INBOUND_LEN: usize = 128;

/// Correlation id attached to every inbound request
///
/// Cheap to clone; shared between the response, logs and broadcast events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    /// Mint a fresh random id
    pub fn generate() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render the id as a header value
    ///
    /// Ids are always visible ASCII, so this only fails for ids built
    /// outside [`RequestCorrelator`].
    pub fn to_header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Generates or propagates request ids
///
/// An inbound `x-request-id` is reused when it is 1-128 visible ASCII
/// characters; anything else is replaced by a UUIDv4.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestCorrelator;

impl RequestCorrelator {
    /// Pick the request id for an inbound request
    pub fn correlate(self, headers: &HeaderMap) -> RequestId {
        headers
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| is_acceptable(v))
            .map_or_else(RequestId::generate, RequestId::from)
    }
}

fn is_acceptable(value: &str) -> bool {
    !value.is_empty() && value.len() <= MAX_INBOUND_LEN && value.bytes().all(|b| b.is_ascii_graphic())
}
