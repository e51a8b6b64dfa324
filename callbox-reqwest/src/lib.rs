#![doc = include_str!("../README.md")]

mod transport;

pub use transport::ReqwestTransport;

// Re-export the middleware client types for convenience
pub use reqwest_middleware::{ClientBuilder as MiddlewareBuilder, ClientWithMiddleware};

use callbox::{Client, ClientConfig};

/// A callbox client with default configuration over a default reqwest client.
pub fn client() -> Client {
    Client::new(ReqwestTransport::default())
}

/// A callbox client with `config` over a default reqwest client.
pub fn client_with(config: ClientConfig) -> Client {
    Client::builder()
        .transport(ReqwestTransport::default())
        .config(config)
        .build()
}
