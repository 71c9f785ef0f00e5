//! Upstream fare source.
//!
//! The scheduler only sees the [`PriceSource`] trait. Failures are expected
//! and never stop a sweep; they are counted and the next route is tried.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{FareQuery, FareQuote};

pub use http::HttpPriceSource;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("query timed out after {0}s")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no fares for {0}")]
    NoFares(String),
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Cheapest fare for `query`. Implementations should bound their own I/O;
    /// the scheduler additionally wraps every call in a timeout.
    async fn query(&self, query: &FareQuery) -> Result<FareQuote, ProviderError>;
}
