//! Push transport traits.

use push_core::{Payload, ProviderResponse, PushError, Target};
use tokio_util::sync::CancellationToken;

/// Delivers one built payload and returns the provider's raw reply.
///
/// Implementations own connection handling and transport-level retries;
/// classification of the reply is left to the caller.
#[trait_variant::make(Send)]
pub trait Transport: Send + Sync {
    /// Send a payload to the target's provider endpoint.
    async fn send(
        &self,
        target: &Target,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, PushError>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(
        &self,
        target: &Target,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, PushError> {
        (**self).send(target, payload, cancel).await
    }
}
