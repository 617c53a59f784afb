//! Input resolution: decide whether the argument is a URL or a local file,
//! fetch remote videos into a private temp directory and derive the base
//! name used for every artifact of the run.

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};

/// Upper bound for any base name handed to the rest of the pipeline.
pub const MAX_BASE_NAME_LEN: usize = 80;

/// Suffix appended to downloaded titles, e.g. `20240131_235959`.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_LEN: usize = 15;

const FALLBACK_NAME: &str = "video";
const MEDIA_EXTENSIONS: [&str; 4] = ["mp4", "mov", "mkv", "webm"];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("video downloader `{0}` is not available, install it first (e.g. `pip install yt-dlp`)")]
    DownloaderUnavailable(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A video fetched by a [`Downloader`].
#[derive(Debug, Clone)]
pub struct Download {
    /// File written by the downloader, inside the destination dir
    pub path: PathBuf,
    /// Title reported by the site, empty when unknown
    pub title: String,
}

/// Capability to fetch a remote video into a local directory.
pub trait Downloader {
    fn download(&self, url: &str, dest_dir: &Path) -> Result<Download, SourceError>;
}

/// [`Downloader`] backed by the `yt-dlp` command line client.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl Downloader for YtDlp {
    fn download(&self, url: &str, dest_dir: &Path) -> Result<Download, SourceError> {
        let binary = which::which(&self.program)
            .map_err(|_| SourceError::DownloaderUnavailable(self.program.clone()))?;

        let template = dest_dir.join("%(id)s.%(ext)s");
        debug!("running {} for {}", binary.display(), url);

        // --print implies --simulate, so the download has to be forced back on.
        // The title is printed before the download, the final path after merging.
        let output = Command::new(&binary)
            .arg("--format")
            .arg("mp4/bestvideo+bestaudio/best")
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--no-simulate")
            .arg("--print")
            .arg("title")
            .arg("--print")
            .arg("after_move:filepath")
            .arg("--output")
            .arg(&template)
            .arg(url)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::DownloadFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines().map(str::trim).filter(|line| !line.is_empty());
        let title = lines.next().unwrap_or_default().to_string();
        let printed_path = lines.last().map(PathBuf::from).filter(|path| path.is_file());

        // Some extractors rename the file after printing; fall back to scanning the dir.
        let path = match printed_path {
            Some(path) => path,
            None => find_media_file(dest_dir)?.ok_or_else(|| {
                SourceError::DownloadFailed(format!("no video file found in {}", dest_dir.display()))
            })?,
        };

        Ok(Download { path, title })
    }
}

/// The local video the pipeline works on.
#[derive(Debug)]
pub struct ResolvedSource {
    /// Local video file to decode
    pub path: PathBuf,
    /// Sanitized name every output file starts with
    pub base_name: String,
    /// Temp directory holding a downloaded video; `None` for local inputs.
    pub download_dir: Option<TempDir>,
}

impl ResolvedSource {
    pub fn is_downloaded(&self) -> bool {
        self.download_dir.is_some()
    }
}

/// True for `http://` and `https://` inputs, scheme compared case-insensitively.
pub fn is_url(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Reduce `name` to word characters joined by underscores, at most `max_len` chars.
pub fn sanitize_filename(name: &str, max_len: usize) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    let joined = kept.split_whitespace().collect::<Vec<_>>().join("_");
    let truncated: String = joined.chars().take(max_len).collect();
    // a cut in the middle of a whitespace run leaves a dangling separator
    let trimmed = truncated.trim_end_matches('_');

    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Sanitized title plus a timestamp suffix, bounded by [`MAX_BASE_NAME_LEN`].
pub fn unique_base_name(title: &str) -> String {
    let title = sanitize_filename(title, MAX_BASE_NAME_LEN - TIMESTAMP_LEN - 1);
    format!("{}_{}", title, Local::now().format(TIMESTAMP_FORMAT))
}

/// Turn a path or URL into a local file plus its base name.
///
/// Surrounding whitespace is ignored for both forms.
pub fn resolve(input: &str, downloader: &dyn Downloader) -> Result<ResolvedSource, SourceError> {
    let input = input.trim();
    if is_url(input) {
        info!("⬇️  [source] downloading video from {}", input);
        let download_dir = tempfile::Builder::new().prefix("composition_").tempdir()?;
        let download = downloader.download(input, download_dir.path())?;

        let base_name = unique_base_name(&download.title);
        let extension = download
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("mp4")
            .to_string();
        let path = download_dir.path().join(format!("{}.{}", base_name, extension));
        fs::rename(&download.path, &path)?;
        info!("✅ [source] downloaded: {}", path.display());

        return Ok(ResolvedSource {
            path,
            base_name,
            download_dir: Some(download_dir),
        });
    }

    let path = PathBuf::from(input);
    if !path.is_file() {
        return Err(SourceError::NotFound(path));
    }
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(ResolvedSource {
        base_name: sanitize_filename(&stem, MAX_BASE_NAME_LEN),
        path,
        download_dir: None,
    })
}

fn find_media_file(dir: &Path) -> Result<Option<PathBuf>, SourceError> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}
