//! The reasoning-service boundary — the only network-facing seam in the core.

pub mod client;
pub mod error;
pub mod types;

use async_trait::async_trait;

pub use client::HttpProvider;
pub use error::ProviderError;
pub use types::{CallOutput, CallPayload};

use crate::tier::Tier;

/// A client capable of running one extraction call on a paid tier.
///
/// Implemented by [`HttpProvider`] for real traffic and by hand-rolled mocks
/// in tests. The dispatcher is the only component that invokes it.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn call(&self, tier: Tier, payload: &CallPayload) -> Result<CallOutput, ProviderError>;
}
