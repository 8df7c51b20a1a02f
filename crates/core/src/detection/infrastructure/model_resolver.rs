use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::{APP_DIR_NAME, FACE_MODEL_NAME, FACE_MODEL_URL};

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Where to look for a model file, and where to fetch it from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelLocation {
    pub name: String,
    pub url: String,
    /// Overrides the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Pre-packaged models shipped next to the application.
    pub bundled_dir: Option<PathBuf>,
}

impl Default for ModelLocation {
    fn default() -> Self {
        Self {
            name: FACE_MODEL_NAME.to_string(),
            url: FACE_MODEL_URL.to_string(),
            cache_dir: None,
            bundled_dir: None,
        }
    }
}

/// Resolve a model file, checking cache locations before downloading.
///
/// Resolution order:
/// 1. Cache directory (override or platform-specific)
/// 2. Bundled directory
/// 3. Download from URL into the cache directory
pub fn resolve(
    location: &ModelLocation,
    progress: Option<&ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    let cache_dir = match &location.cache_dir {
        Some(dir) => dir.clone(),
        None => model_cache_dir()?,
    };
    let cached_path = cache_dir.join(&location.name);
    if cached_path.exists() {
        return Ok(cached_path);
    }

    if let Some(dir) = &location.bundled_dir {
        let bundled_path = dir.join(&location.name);
        if bundled_path.exists() {
            return Ok(bundled_path);
        }
    }

    log::info!("Downloading face model {} from {}", location.name, location.url);
    fs::create_dir_all(&cache_dir).map_err(ModelResolveError::CacheDir)?;
    download(&location.url, &cached_path, progress)?;
    Ok(cached_path)
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/verifycam/models/`
/// - Linux: `$XDG_CACHE_HOME/verifycam/models/` or `~/.cache/verifycam/models/`
/// - Windows: `%LOCALAPPDATA%/verifycam/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR_NAME).join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join(APP_DIR_NAME).join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

fn download(
    url: &str,
    dest: &Path,
    progress: Option<&ProgressFn>,
) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");

    let result = download_to(url, dest, &temp_path, progress);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn download_to(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<&ProgressFn>,
) -> Result<(), ModelResolveError> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ModelResolveError::Write { path, source }
    };

    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|source| ModelResolveError::Download {
            url: url.to_string(),
            source,
        })?;

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;
    let mut file = fs::File::create(temp_path).map_err(write_err(temp_path))?;

    // Streamed in 1MB chunks so large models never sit fully in memory.
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = response.read(&mut buf).map_err(write_err(temp_path))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err(temp_path))?;
        downloaded += n as u64;
        if let Some(cb) = progress {
            cb(downloaded, total);
        }
    }

    file.flush().map_err(write_err(temp_path))?;
    drop(file);

    fs::rename(temp_path, dest).map_err(write_err(dest))
}
