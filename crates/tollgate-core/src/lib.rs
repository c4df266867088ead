//! Shared vocabulary for the Tollgate workspace
//!
//! Holds the types every other crate agrees on: the billable [`Feature`]
//! set, the authenticated [`AccountIdentity`], request correlation and the
//! [`HttpError`] seam between domain errors and the HTTP layer.

#![allow(clippy::must_use_candidate)]

mod context;
mod error;
mod feature;
mod request_id;

pub use context::{AccountIdentity, Claims, RequestContext};
pub use error::HttpError;
pub use feature::{Feature, ParseFeatureError};
pub use request_id::{REQUEST_ID_HEADER, RequestCorrelator, RequestId};
