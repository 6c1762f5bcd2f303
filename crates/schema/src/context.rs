use core::any::Any;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Whatever the provider's configurer returned, shared with every operation
pub type Meta = Arc<dyn Any + Send + Sync>;

/// Passed to every resource and data source operation
#[derive(Clone, Default)]
pub struct Context {
    meta: Option<Meta>,
    stop: CancellationToken,
}

impl Context {
    pub fn new(meta: Option<Meta>, stop: CancellationToken) -> Self {
        Self { meta, stop }
    }

    /// The provider meta, if the provider was configured and the meta is a `T`
    pub fn meta<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.meta.as_deref()?.downcast_ref::<T>()
    }

    /// Cancelled when the host asks the provider to stop. Long running operations should select
    /// on it and bail out.
    pub fn stopped(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context")
            .field("configured", &self.meta.is_some())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
