// Waveform acquisition for a clip request.
//
// The pipeline only needs a decoded waveform. Getting one may involve an
// external downloader writing to disk. Each download runs in its own
// temporary directory under the scratch dir, wrapped in a `ScratchFile`
// that removes the directory (partial files included) when the acquired
// clip goes out of scope. Two requests for the same clip never share files.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;

use crate::audio::decoder::{decode_bytes, decode_to_mono, DecodeError, Waveform};
use crate::config::ServiceConfig;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("downloader exited with {status}: {stderr}")]
    Download { status: String, stderr: String },
    #[error("downloader produced no audio at {0}")]
    MissingOutput(PathBuf),
    #[error("unsupported URL: {0}")]
    InvalidUrl(String),
    #[error("refusing to fetch from non-public host {0}")]
    ForbiddenHost(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("response larger than {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to analyze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipRequest {
    /// Free-text query resolved to the first matching media item
    SearchTerm(String),
    /// Direct media URL
    Url(String),
}

impl ClipRequest {
    fn kind(&self) -> &'static str {
        match self {
            ClipRequest::SearchTerm(_) => "search",
            ClipRequest::Url(_) => "url",
        }
    }

    fn text(&self) -> &str {
        match self {
            ClipRequest::SearchTerm(text) | ClipRequest::Url(text) => text,
        }
    }

    /// Deterministic, filesystem-safe identifier for this request.
    pub fn id(&self) -> String {
        format!("{}-{:x}", self.kind(), Sha256::digest(self.text().as_bytes()))
    }
}

/// A temporary on-disk artifact removed exactly once, on drop.
///
/// Either a single file, or a private directory holding the file together
/// with anything else written next to it.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl ScratchFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dir: None,
        }
    }

    /// `file_name` inside `dir`; the whole directory goes on drop.
    pub fn in_dir(dir: TempDir, file_name: &str) -> Self {
        Self {
            path: dir.path().join(file_name),
            dir: Some(dir),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let (target, result) = match self.dir.take() {
            Some(dir) => {
                let target = dir.path().to_path_buf();
                (target, dir.close())
            }
            None => (self.path.clone(), std::fs::remove_file(&self.path)),
        };

        match result {
            Ok(()) => log::debug!("Removed scratch {}", target.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove scratch {}: {}", target.display(), e),
        }
    }
}

/// A decoded clip plus whatever temporary resource backs it.
#[derive(Debug)]
pub struct AcquiredClip {
    pub waveform: Waveform,
    scratch: Option<ScratchFile>,
}

impl AcquiredClip {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            scratch: None,
        }
    }

    pub fn with_scratch(waveform: Waveform, scratch: ScratchFile) -> Self {
        Self {
            waveform,
            scratch: Some(scratch),
        }
    }

    #[cfg(test)]
    fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(ScratchFile::path)
    }
}

/// Supplies decoded audio for a request. Implementations must release any
/// temporary resource they created when returning an error.
pub trait WaveformSource: Send + Sync {
    fn acquire(&self, request: &ClipRequest) -> Result<AcquiredClip, SourceError>;
}

/// Production source: `yt-dlp` for search terms, HTTP for URLs.
#[derive(Debug, Clone)]
pub struct RemoteAudioSource {
    scratch_dir: PathBuf,
    downloader: PathBuf,
    download_timeout: Duration,
    max_download_bytes: u64,
    allow_private_hosts: bool,
}

impl RemoteAudioSource {
    pub fn from_config(config: &ServiceConfig) -> Result<Self, SourceError> {
        std::fs::create_dir_all(&config.scratch_dir)?;
        Ok(Self {
            scratch_dir: config.scratch_dir.clone(),
            downloader: config.downloader.clone(),
            download_timeout: config.download_timeout(),
            max_download_bytes: config.max_download_bytes,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    fn fetch_search_result(&self, id: &str, term: &str) -> Result<AcquiredClip, SourceError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", id))
            .tempdir_in(&self.scratch_dir)?;
        let template = dir.path().join(format!("{}.%(ext)s", id));
        let scratch = ScratchFile::in_dir(dir, &format!("{}.wav", id));

        log::info!("Downloading search result for clip {}", id);

        let output = Command::new(&self.downloader)
            .arg(format!("ytsearch1:{}", term))
            .args(["--no-playlist", "--quiet", "--no-progress"])
            .args(["--extract-audio", "--audio-format", "wav"])
            .arg("--output")
            .arg(&template)
            .output()
            .map_err(|source| SourceError::Spawn {
                program: self.downloader.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceError::Download {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if !scratch.path().exists() {
            return Err(SourceError::MissingOutput(scratch.path().to_path_buf()));
        }

        let waveform = decode_to_mono(scratch.path())?;
        Ok(AcquiredClip::with_scratch(waveform, scratch))
    }

    fn fetch_url(&self, id: &str, url: &str) -> Result<AcquiredClip, SourceError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|_| SourceError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SourceError::InvalidUrl(url.to_string()));
        }
        if !self.allow_private_hosts {
            let addrs = parsed.socket_addrs(|| None)?;
            if addrs.is_empty() || !addrs.iter().all(is_public_addr) {
                return Err(SourceError::ForbiddenHost(
                    parsed.host_str().unwrap_or_default().to_string(),
                ));
            }
        }

        log::info!("Fetching media URL for clip {}", id);

        // Built per call: the blocking client owns its own runtime and must
        // not be created or dropped on an async worker thread.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.download_timeout)
            .build()?;
        let response = client.get(parsed.clone()).send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let limit = self.max_download_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(SourceError::TooLarge { limit });
        }

        let mut body = Vec::new();
        response.take(limit + 1).read_to_end(&mut body)?;
        if body.len() as u64 > limit {
            return Err(SourceError::TooLarge { limit });
        }

        let waveform = decode_bytes(body, extension_hint(&parsed).as_deref())?;
        Ok(AcquiredClip::new(waveform))
    }
}

impl WaveformSource for RemoteAudioSource {
    fn acquire(&self, request: &ClipRequest) -> Result<AcquiredClip, SourceError> {
        let id = request.id();
        match request {
            ClipRequest::SearchTerm(term) => self.fetch_search_result(&id, term),
            ClipRequest::Url(url) => self.fetch_url(&id, url),
        }
    }
}

/// Globally routable unicast address.
fn is_public_addr(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => {
            !(ip.is_loopback()
                || ip.is_private()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
                || ip.is_multicast()
                || ip.octets()[0] == 0)
        }
        IpAddr::V6(ip) => {
            if let Some(v4) = ip.to_ipv4_mapped() {
                return is_public_addr(&SocketAddr::from((v4, addr.port())));
            }
            let first = ip.segments()[0];
            !(ip.is_loopback()
                || ip.is_unspecified()
                || ip.is_multicast()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80)
        }
    }
}

/// File extension of the last path segment, if it looks like one.
fn extension_hint(url: &reqwest::Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    let valid = (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}
