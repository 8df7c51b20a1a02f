use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Exclusive ownership of the one physical camera.
///
/// A capture session holds the permit from before it requests the stream
/// until after it releases it, so two sessions can never hold live streams
/// at once. Clones share the same camera.
#[derive(Clone, Debug)]
pub struct CameraLease {
    slot: Arc<Semaphore>,
}

/// Held while a stream is (or may become) live. Dropping it hands the camera
/// to the next waiter.
#[derive(Debug)]
pub struct CameraPermit {
    _permit: OwnedSemaphorePermit,
}

impl CameraLease {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Waits until the camera is free. Returns `None` only if the lease
    /// has been shut down.
    pub async fn acquire(&self) -> Option<CameraPermit> {
        self.slot
            .clone()
            .acquire_owned()
            .await
            .ok()
            .map(|permit| CameraPermit { _permit: permit })
    }

    pub fn try_acquire(&self) -> Option<CameraPermit> {
        self.slot
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| CameraPermit { _permit: permit })
    }

    pub fn is_held(&self) -> bool {
        self.slot.available_permits() == 0
    }
}

impl Default for CameraLease {
    fn default() -> Self {
        Self::new()
    }
}
