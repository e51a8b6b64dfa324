#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Call descriptors: identity, subscribers, abort.
///
/// A [`Call`](call::Call) latches its outcome, so subscribers attached late
/// still fire exactly once.
pub mod call;

/// Client facade and builder.
pub mod client;

/// Client defaults, per-call options and the resolved request snapshot.
pub mod config;

/// Error types for call creation.
pub mod error;

/// Metrics collection.
///
/// When the `metrics` feature is enabled, this module provides counters and
/// histograms for:
/// - Transport attempts and their duration
/// - Retries
/// - Calls dropped by debounce or throttle
/// - Delivered outcomes, by source
pub mod metrics;

/// Response descriptors and failures.
pub mod response;

mod completion;
mod dispatch;
mod engine;
mod gate;
mod pipeline;
mod retry;
mod store;
mod sync;

pub use call::{Call, CallId};
pub use client::{Client, ClientBuilder, NotSet};
pub use config::{ClientConfig, InvalidMode, Mode, RequestConfig, RequestOptions};
pub use error::Error;
pub use response::{Failure, Outcome, Response, ResponseData, ResponseSource};

pub use callbox_core::{
    CachePolicy, Headers, Method, RawResponse, ResponseType, Strategies, Strategy, Transport,
    TransportError, TransportRequest, Ttl, UrlMatcher,
};
