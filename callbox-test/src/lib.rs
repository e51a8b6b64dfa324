#![doc = include_str!("../README.md")]

pub mod mock_transport;
pub mod tracing;

pub use mock_transport::{MockTransport, Reply, SentRequest, TransportCounters};
