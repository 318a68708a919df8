//! Remote image materialization for render requests.
//!
//! Templates may reference images by absolute HTTP(S) URL. At render time
//! each such image is assigned a deterministic local filename (a per-render
//! monotonic counter plus the extension inferred from the URL) through an
//! [`ImageSession`], then fetched through the shared [`ImageCache`] and
//! written into the render's scratch directory.
//!
//! The cache is a shared directory of content-addressed files keyed by URL
//! hash, each with a TTL sidecar. Concurrent writers stay safe through
//! write-to-temp-then-rename. Any fetch failure substitutes a 1×1 gray PNG
//! placeholder so the render still succeeds, with a non-fatal diagnostic.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use platen_cancel::CancelToken;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// User agent for image downloads.
pub const USER_AGENT: &str = concat!("platen/", env!("CARGO_PKG_VERSION"));

/// Extensions kept as-is when inferring a local filename.
pub const KNOWN_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "svg", "webp"];

/// A 1×1 gray PNG, substituted when a remote image cannot be fetched.
pub const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x00, 0x00, 0x00, 0x00, 0x3a,
    0x7e, 0x9b, 0x55, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x68,
    0x00, 0x00, 0x00, 0x82, 0x00, 0x81, 0x77, 0xcd, 0x72, 0xb6, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Whether an image source must be materialized (absolute HTTP(S) URL).
/// Anything else is treated as a local path and passed through unchanged.
pub fn is_remote(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://")
}

/// Infer the local file extension for a URL. Unrecognized extensions map
/// to `png`.
pub fn infer_extension(url: &str) -> &'static str {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or(url);

    match path.rsplit_once('.') {
        Some((_, ext)) => KNOWN_EXTENSIONS
            .iter()
            .find(|known| ext.eq_ignore_ascii_case(known))
            .copied()
            .unwrap_or("png"),
        None => "png",
    }
}

/// A remote image scheduled for materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedImage {
    pub url: String,
    pub file_name: String,
}

/// Per-render assignment of deterministic local filenames.
///
/// The lowerer allocates names while walking the tree; the renderer then
/// materializes every planned image into the scratch directory.
#[derive(Debug, Default)]
pub struct ImageSession {
    next: u32,
    by_url: HashMap<String, String>,
    planned: Vec<PlannedImage>,
}

impl ImageSession {
    pub fn new() -> ImageSession {
        ImageSession::default()
    }

    /// The local filename for `url`, allocating `img-<n>.<ext>` on first
    /// sight. Repeated URLs share one file.
    pub fn local_name(&mut self, url: &str) -> String {
        if let Some(name) = self.by_url.get(url) {
            return name.clone();
        }
        self.next += 1;
        let name = format!("img-{}.{}", self.next, infer_extension(url));
        self.by_url.insert(url.to_string(), name.clone());
        self.planned.push(PlannedImage {
            url: url.to_string(),
            file_name: name.clone(),
        });
        name
    }

    pub fn planned(&self) -> &[PlannedImage] {
        &self.planned
    }

    pub fn is_empty(&self) -> bool {
        self.planned.is_empty()
    }
}

/// Result of one fetch: bytes to write, plus a diagnostic when the
/// placeholder was substituted.
#[derive(Debug)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub diagnostic: Option<String>,
}

/// Shared disk cache for downloaded images.
#[derive(Debug)]
pub struct ImageCache {
    dir: PathBuf,
    max_age: Duration,
    client: reqwest::blocking::Client,
}

impl ImageCache {
    /// Open (creating if needed) a cache directory and sweep expired
    /// entries.
    pub fn open(dir: &Path, max_age: Duration, download_timeout: Duration) -> Result<ImageCache> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create image cache dir {}", dir.display()))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(download_timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());

        let cache = ImageCache {
            dir: dir.to_path_buf(),
            max_age,
            client,
        };
        cache.sweep();
        Ok(cache)
    }

    /// Fetch `url`, consulting the disk cache first. Failures yield the
    /// placeholder with a diagnostic instead of an error.
    pub fn fetch(&self, url: &str, cancel: &CancelToken) -> Fetched {
        if cancel.is_cancelled() {
            return placeholder(format!("download of {url} skipped: cancelled"));
        }

        let (data_path, ttl_path) = self.entry_paths(url);
        match self.read_cached(&data_path, &ttl_path) {
            Some(bytes) => {
                debug!(url, "image cache hit");
                return Fetched {
                    bytes,
                    diagnostic: None,
                };
            }
            None => debug!(url, "image cache miss"),
        }

        match self.download(url) {
            Ok(bytes) => {
                if let Err(err) = self.store(&data_path, &ttl_path, &bytes) {
                    warn!(url, error = %format!("{err:#}"), "failed to cache image");
                }
                Fetched {
                    bytes,
                    diagnostic: None,
                }
            }
            Err(err) => {
                let diagnostic = format!("image {url} unavailable, using placeholder: {err:#}");
                warn!(url, error = %format!("{err:#}"), "image download failed");
                placeholder(diagnostic)
            }
        }
    }

    /// Best-effort removal of expired entries.
    pub fn sweep(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        let now = unix_now();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ttl") {
                continue;
            }
            let expired = fs::read_to_string(&path)
                .ok()
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .is_none_or(|expiry| expiry <= now);
            if expired {
                let _ = fs::remove_file(path.with_extension("img"));
                let _ = fs::remove_file(path);
            }
        }
    }

    fn entry_paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        (
            self.dir.join(format!("{digest}.img")),
            self.dir.join(format!("{digest}.ttl")),
        )
    }

    fn read_cached(&self, data_path: &Path, ttl_path: &Path) -> Option<Vec<u8>> {
        let expiry: u64 = fs::read_to_string(ttl_path).ok()?.trim().parse().ok()?;
        if expiry <= unix_now() {
            let _ = fs::remove_file(data_path);
            let _ = fs::remove_file(ttl_path);
            return None;
        }
        fs::read(data_path).ok()
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("unexpected status {status}");
        }

        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read body from {url}"))?;
        Ok(bytes.to_vec())
    }

    /// Write-then-rename so concurrent renders never observe a torn entry.
    fn store(&self, data_path: &Path, ttl_path: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .context("failed to create temp file in image cache")?;
        tmp.write_all(bytes).context("failed to write image bytes")?;
        tmp.persist(data_path)
            .with_context(|| format!("failed to move image into {}", data_path.display()))?;

        let expiry = unix_now() + self.max_age.as_secs();
        fs::write(ttl_path, expiry.to_string())
            .with_context(|| format!("failed to write ttl sidecar {}", ttl_path.display()))?;
        Ok(())
    }
}

fn placeholder(diagnostic: String) -> Fetched {
    Fetched {
        bytes: PLACEHOLDER_PNG.to_vec(),
        diagnostic: Some(diagnostic),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Materialize every planned image into `dest_dir`, returning non-fatal
/// diagnostics for placeholder substitutions.
pub fn materialize(
    cache: &ImageCache,
    session: &ImageSession,
    dest_dir: &Path,
    cancel: &CancelToken,
) -> Result<Vec<String>> {
    let mut diagnostics = Vec::new();
    for planned in session.planned() {
        let fetched = cache.fetch(&planned.url, cancel);
        let path = dest_dir.join(&planned.file_name);
        fs::write(&path, &fetched.bytes)
            .with_context(|| format!("failed to write image {}", path.display()))?;
        if let Some(diagnostic) = fetched.diagnostic {
            diagnostics.push(diagnostic);
        }
    }
    Ok(diagnostics)
}
