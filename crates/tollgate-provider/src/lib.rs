//! Upstream generation provider access
//!
//! Everything that talks to, or reasons about, the external generation API:
//! the OpenAI-compatible [`Upstream`] client, model family resolution with
//! deterministic fallback, background model discovery, the failure
//! taxonomy and the [`ProviderGateway`] that bounds each call in time and
//! turns every failure into a [`StructuredError`].

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod classify;
mod demo;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod resolver;
pub mod types;
pub mod upstream;

pub use classify::{Failure, classify, redact};
pub use discovery::{ModelCatalog, start_discovery};
pub use error::{ErrorCategory, ErrorKind, ResolveError, StructuredError, WRONG_PROVIDER};
pub use gateway::{ChatStream, Completion, ProviderGateway, StreamItem};
pub use resolver::{ModelResolver, Resolution};
pub use types::{ChatMessage, ChatPayload, ImageAsset, ImagePayload, Output, Payload, Role, VideoJob, VideoPayload};
pub use upstream::{DeltaStream, OpenAiUpstream, Upstream};
