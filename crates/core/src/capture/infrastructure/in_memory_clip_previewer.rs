use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::capture::domain::media::{ClipPreviewer, PreviewId};
use crate::shared::clip::Clip;

/// Keeps previewable clips in memory, keyed by preview id.
///
/// Headless runtimes use this in place of a player surface; the open count
/// makes leaked previews observable.
#[derive(Default)]
pub struct InMemoryClipPreviewer {
    next_id: AtomicU64,
    open: Mutex<HashMap<PreviewId, Clip>>,
}

impl InMemoryClipPreviewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PreviewId) -> Option<Clip> {
        self.lock().get(&id).cloned()
    }

    pub fn open_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PreviewId, Clip>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClipPreviewer for InMemoryClipPreviewer {
    fn open(&self, clip: &Clip) -> PreviewId {
        let id = PreviewId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, clip.clone());
        id
    }

    fn revoke(&self, id: PreviewId) {
        if self.lock().remove(&id).is_none() {
            log::debug!("Preview {id:?} was already revoked");
        }
    }
}
