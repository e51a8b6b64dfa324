#![warn(missing_docs)]
//! # callbox-core
//!
//! Core traits and types for the callbox HTTP call orchestrator.
//!
//! This crate holds the leaf abstractions the engine in `callbox` is built from.
//! None of them schedule work or own a runtime; they describe *what* travels
//! through the pipelines:
//!
//! - **Send** a request over an opaque capability ([`Transport`])
//! - **Buffer** pending work in submission order ([`Queue`])
//! - **Describe** wire-level pieces ([`Method`], [`Headers`], [`format_url`])
//! - **Decide** which calls are cacheable and for how long ([`Strategy`], [`Strategies`])
//!
//! Transport implementations (like `callbox-reqwest`) depend on this crate
//! only, so they never see the engine internals.

pub mod headers;
pub mod method;
pub mod policy;
pub mod queue;
pub mod strategy;
pub mod transport;
pub mod url;

pub use headers::Headers;
pub use method::Method;
pub use policy::CachePolicy;
pub use queue::Queue;
pub use strategy::{Strategies, Strategy, Ttl, UrlMatcher};
pub use transport::{RawResponse, ResponseType, Transport, TransportError, TransportRequest};
pub use url::format_url;
