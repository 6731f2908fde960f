//! Storage traits.

use std::sync::Arc;

use crate::DeviceRow;

/// Where invalid device tokens are reported.
pub trait DeviceRegistry: Send + Sync {
    /// Mark a token inactive. Unknown or already inactive tokens are not an error.
    fn deactivate(&self, token: &str) -> color_eyre::eyre::Result<()>;
}

/// Device registration storage.
pub trait DeviceStore: DeviceRegistry {
    /// Register a token, reactivating it if it was deactivated.
    fn register(&self, token: &str, application_id: Option<&str>)
    -> color_eyre::eyre::Result<()>;

    /// Get a device by token.
    fn device(&self, token: &str) -> color_eyre::eyre::Result<Option<DeviceRow>>;

    /// Check if a token is registered and active.
    fn is_active(&self, token: &str) -> color_eyre::eyre::Result<bool> {
        Ok(self.device(token)?.is_some_and(|device| device.active))
    }

    /// Active tokens, optionally limited to one application.
    fn active_tokens(&self, application_id: Option<&str>)
    -> color_eyre::eyre::Result<Vec<String>>;
}

impl<T: DeviceRegistry + ?Sized> DeviceRegistry for Arc<T> {
    fn deactivate(&self, token: &str) -> color_eyre::eyre::Result<()> {
        (**self).deactivate(token)
    }
}
