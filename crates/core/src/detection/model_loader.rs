use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use crate::detection::domain::detection_model::{ModelHandle, ModelLoadError, ModelSource};

type LoadResult = Result<ModelHandle, ModelLoadError>;

/// Process-wide face model cache.
///
/// The first `load()` starts fetching in the background; concurrent callers
/// wait on the same in-flight load and receive the same handle. A failed
/// load leaves the cache empty so the next `load()` tries again. Once ready,
/// the handle is never re-initialized.
#[derive(Clone)]
pub struct ModelLoader {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn ModelSource>,
    state: Mutex<LoadState>,
}

enum LoadState {
    Idle,
    Loading(watch::Receiver<Option<LoadResult>>),
    Ready(ModelHandle),
}

impl ModelLoader {
    pub fn new(source: Arc<dyn ModelSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                state: Mutex::new(LoadState::Idle),
            }),
        }
    }

    /// Returns the loaded model, starting or joining a load as needed.
    pub async fn load(&self) -> LoadResult {
        let mut rx = {
            let mut state = self.lock_state();
            match &*state {
                LoadState::Ready(handle) => return Ok(handle.clone()),
                LoadState::Loading(rx) => rx.clone(),
                LoadState::Idle => {
                    let (tx, rx) = watch::channel(None);
                    *state = LoadState::Loading(rx.clone());
                    self.spawn_load(tx);
                    rx
                }
            }
        };

        let result = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(ModelLoadError::Interrupted)),
            Err(_) => Err(ModelLoadError::Interrupted),
        };

        if matches!(result, Err(ModelLoadError::Interrupted)) {
            let mut state = self.lock_state();
            if matches!(*state, LoadState::Loading(_)) {
                *state = LoadState::Idle;
            }
        }
        result
    }

    /// Readiness signal: true once a load has succeeded.
    pub fn is_ready(&self) -> bool {
        matches!(*self.lock_state(), LoadState::Ready(_))
    }

    /// The loaded model, if a load has already succeeded.
    pub fn handle(&self) -> Option<ModelHandle> {
        match &*self.lock_state() {
            LoadState::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    fn spawn_load(&self, tx: watch::Sender<Option<LoadResult>>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let source = inner.source.clone();
            let result = match tokio::task::spawn_blocking(move || source.load()).await {
                Ok(loaded) => loaded.map(ModelHandle::new),
                Err(e) => Err(ModelLoadError::Init(format!("model loader panicked: {e}"))),
            };

            {
                let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
                *state = match &result {
                    Ok(handle) => {
                        log::info!("Face model ready: {}", handle.name());
                        LoadState::Ready(handle.clone())
                    }
                    Err(e) => {
                        log::error!("Face model failed to load: {e}");
                        LoadState::Idle
                    }
                };
            }
            let _ = tx.send(Some(result));
        });
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoadState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
