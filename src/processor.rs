use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;
use tracing::{error, info, warn};
use crate::frame_extractor::{self, FramesPerScene, SceneRecord};
use crate::metadata::SheetMetadata;
use crate::scene_detector::{self, DEFAULT_MIN_SCENE_LEN, DEFAULT_THRESHOLD};
use crate::sheet::{self, ComposedSheet, LayoutConfig};
use crate::source::{self, Downloader, ResolvedSource};
use crate::VideoProcessor;

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    /// Content threshold for cut detection, lower is more sensitive
    pub threshold: f64,
    /// Minimum scene length (frames)
    pub min_scene_len: u64,
    /// Frames taken from each scene, 1 (midpoint) or 3 (start, middle, end)
    pub frames_per_scene: FramesPerScene,
    /// Contact sheet layout
    pub layout: LayoutConfig,
    /// Where the scene folder and the sheet are written
    pub output_dir: PathBuf,
    /// Write `<base>_composition_sheet.json` next to the sheet
    pub write_metadata: bool,
    /// Download client binary used for URL inputs
    pub downloader: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_scene_len: DEFAULT_MIN_SCENE_LEN,
            frames_per_scene: FramesPerScene::Three,
            layout: LayoutConfig::default(),
            output_dir: PathBuf::from("."),
            write_metadata: false,
            downloader: "yt-dlp".to_string(),
        }
    }
}

impl ProcessConfig {
    /// Check every value before any work starts
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.threshold.is_finite() && self.threshold > 0.0,
            "threshold must be a positive number, got {}",
            self.threshold
        );
        anyhow::ensure!(self.min_scene_len > 0, "min_scene_len must be at least 1 frame");
        self.layout.validate()?;
        anyhow::ensure!(!self.downloader.trim().is_empty(), "downloader must not be empty");
        Ok(())
    }
}

/// Processing result
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Prefix of every file written for this input
    pub base_name: String,
    /// `None` when no frame could be placed on a sheet
    pub sheet_path: Option<PathBuf>,
    /// JSON sidecar, only when requested and a sheet was written
    pub metadata_path: Option<PathBuf>,
    /// Scenes found by the detector
    pub detected_scenes: usize,
    /// Scenes that made it onto the sheet
    pub scene_count: usize,
}

/// Removes the per-run scene folder and any downloaded source when dropped,
/// whether the pipeline finished or bailed out.
struct Cleanup {
    work_dir: PathBuf,
    download_dir: Option<TempDir>,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if self.work_dir.exists() {
            match fs::remove_dir_all(&self.work_dir) {
                Ok(()) => info!("🧹 [cleanup] deleted scene folder: {}", self.work_dir.display()),
                Err(e) => warn!("⚠️  [cleanup] failed to delete {}: {}", self.work_dir.display(), e),
            }
        }

        if let Some(dir) = self.download_dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => info!("🧹 [cleanup] deleted downloaded video: {}", path.display()),
                Err(e) => warn!("⚠️  [cleanup] failed to delete {}: {}", path.display(), e),
            }
        }
    }
}

/// Run the full pipeline on a local path or URL.
pub fn process_video(input: &str, config: &ProcessConfig, downloader: &dyn Downloader) -> Result<ProcessOutput> {
    config.validate().context("invalid configuration")?;

    let total_start = Instant::now();
    info!("🎬 [pipeline] processing: {}", input);

    let ResolvedSource {
        path: video_path,
        base_name,
        download_dir,
    } = source::resolve(input, downloader).map_err(|e| {
        error!("❌ [source] {}", e);
        e
    })?;

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create output directory {}", config.output_dir.display()))?;
    let work_dir = config.output_dir.join(format!("{}_scenes", base_name));
    let sheet_path = config.output_dir.join(format!("{}_composition_sheet.jpg", base_name));

    let _cleanup = Cleanup {
        work_dir: work_dir.clone(),
        download_dir,
    };

    // 1. scene detection
    let detect_start = Instant::now();
    info!(
        "🔍 [detect] detecting scenes in '{}' (threshold={:.1})",
        video_path.display(),
        config.threshold
    );
    let scenes = scene_detector::detect_scenes(&video_path, config.threshold, config.min_scene_len)
        .map_err(|e| {
            error!("❌ [detect] scene detection failed: {:#}", e);
            e
        })?;
    info!(
        "✅ [detect] detected {} scenes in {:.2}s",
        scenes.len(),
        detect_start.elapsed().as_secs_f64()
    );

    // 2. representative frames
    let extract_start = Instant::now();
    let (records, fps) = {
        let mut video = VideoProcessor::open(&video_path)?;
        let fps = video.info().fps;
        let records =
            frame_extractor::extract_scene_frames(&mut video, &scenes, &work_dir, config.frames_per_scene)
                .map_err(|e| {
                    error!("❌ [extract] frame extraction failed: {:#}", e);
                    e
                })?;
        (records, fps)
    };
    let frame_total: usize = records.iter().map(|r| r.frames.len()).sum();
    info!(
        "✅ [extract] extracted {} frames for {} scenes in {:.2}s",
        frame_total,
        records.len(),
        extract_start.elapsed().as_secs_f64()
    );

    // 3. contact sheet
    let sheet_start = Instant::now();
    let composed = sheet::compose_sheet(&records, &sheet_path, &config.layout)?;
    let drawn = match &composed {
        Some(sheet) => {
            info!("✅ [sheet] composed in {:.2}s", sheet_start.elapsed().as_secs_f64());
            drawn_records(&records, sheet)
        }
        None => Vec::new(),
    };
    let sheet_path = composed.map(|_| sheet_path);

    // 4. optional metadata sidecar
    let metadata_path = match (&sheet_path, config.write_metadata) {
        (Some(sheet), true) => Some(write_metadata(input, &base_name, fps, sheet, &drawn)?),
        _ => None,
    };

    info!(
        "🎉 [pipeline] done in {:.2}s",
        total_start.elapsed().as_secs_f64()
    );

    Ok(ProcessOutput {
        base_name,
        sheet_path,
        metadata_path,
        detected_scenes: scenes.len(),
        scene_count: drawn.len(),
    })
}

/// Records of the scenes that actually appear on `sheet`, in sheet order.
fn drawn_records(records: &[SceneRecord], sheet: &ComposedSheet) -> Vec<SceneRecord> {
    records
        .iter()
        .filter(|record| sheet.scene_indices.contains(&record.scene.index))
        .cloned()
        .collect()
}

fn write_metadata(
    input: &str,
    base_name: &str,
    fps: f64,
    sheet_path: &Path,
    records: &[SceneRecord],
) -> Result<PathBuf> {
    let sheet_file = sheet_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let metadata = SheetMetadata::from_records(input, base_name, fps, &sheet_file, records);
    let path = sheet_path.with_extension("json");
    metadata.write(&path)?;
    info!("📝 [metadata] written: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Download, SourceError};
    use std::process::Command;

    struct UnavailableDownloader;

    impl Downloader for UnavailableDownloader {
        fn download(&self, _url: &str, _dest_dir: &Path) -> Result<Download, SourceError> {
            Err(SourceError::DownloaderUnavailable("fake-dl".to_string()))
        }
    }

    fn config_in(dir: &Path) -> ProcessConfig {
        ProcessConfig {
            output_dir: dir.to_path_buf(),
            ..ProcessConfig::default()
        }
    }

    fn entries(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect()
    }

    /// Renders a solid-colour clip with the ffmpeg CLI, `None` when ffmpeg is missing.
    fn solid_color_clip(dir: &Path, seconds: u32) -> Option<PathBuf> {
        which::which("ffmpeg").ok()?;
        let path = dir.join("Solid Blue.mp4");
        let status = Command::new("ffmpeg")
            .args(["-y", "-loglevel", "error", "-f", "lavfi", "-i"])
            .arg(format!("color=c=blue:s=320x240:r=25:d={}", seconds))
            .args(["-c:v", "mpeg4", "-pix_fmt", "yuv420p"])
            .arg(&path)
            .status()
            .ok()?;
        status.success().then_some(path)
    }

    #[test]
    fn test_validate() {
        assert!(ProcessConfig::default().validate().is_ok());

        let bad_threshold = ProcessConfig {
            threshold: -1.0,
            ..ProcessConfig::default()
        };
        assert!(bad_threshold.validate().is_err());

        let nan = ProcessConfig {
            threshold: f64::NAN,
            ..ProcessConfig::default()
        };
        assert!(nan.validate().is_err());

        let mut no_columns = ProcessConfig::default();
        no_columns.layout.columns = 0;
        assert!(no_columns.validate().is_err());

        let mut no_width = ProcessConfig::default();
        no_width.layout.thumb_width = 0;
        assert!(no_width.validate().is_err());

        let mut huge_padding = ProcessConfig::default();
        huge_padding.layout.padding = 3_000_000_000;
        assert!(huge_padding.validate().is_err());

        let mut huge_thumbs = ProcessConfig::default();
        huge_thumbs.layout.thumb_width = 1_000_000;
        assert!(huge_thumbs.validate().is_err());
    }

    #[test]
    fn test_drawn_records_follow_sheet() {
        use crate::scene_detector::Scene;
        use crate::sheet::SheetGeometry;

        let record = |index: usize| SceneRecord {
            scene: Scene {
                index,
                start_frame: (index as u64 - 1) * 50,
                end_frame: index as u64 * 50,
                fps: 25.0,
            },
            duration: 2.0,
            frames: Vec::new(),
        };
        let records = vec![record(1), record(2), record(3)];
        let sheet = ComposedSheet {
            geometry: SheetGeometry::compute(&LayoutConfig::default(), 3, 2, 180).unwrap(),
            scene_indices: vec![1, 3],
        };

        let drawn = drawn_records(&records, &sheet);
        assert_eq!(drawn.iter().map(|r| r.scene.index).collect::<Vec<_>>(), vec![1, 3]);

        let metadata = SheetMetadata::from_records("clip.mp4", "clip", 25.0, "clip_composition_sheet.jpg", &drawn);
        assert_eq!(metadata.scene_count, 2);
    }

    #[test]
    fn test_url_without_downloader_fails_cleanly() {
        let out = tempfile::tempdir().unwrap();
        let err = process_video("https://example.com/watch?v=1", &config_in(out.path()), &UnavailableDownloader)
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::DownloaderUnavailable(_))
        ));
        assert!(entries(out.path()).is_empty());
    }

    #[test]
    fn test_missing_local_file() {
        let out = tempfile::tempdir().unwrap();
        let missing = out.path().join("nope.mp4");
        let err = process_video(missing.to_str().unwrap(), &config_in(out.path()), &UnavailableDownloader)
            .unwrap_err();

        assert!(matches!(err.downcast_ref::<SourceError>(), Some(SourceError::NotFound(_))));
        assert!(entries(out.path()).is_empty());
    }

    #[test]
    fn test_undecodable_file_still_cleans_up() {
        let out = tempfile::tempdir().unwrap();
        let input_dir = tempfile::tempdir().unwrap();
        let bogus = input_dir.path().join("broken.mp4");
        fs::write(&bogus, b"this is not a video").unwrap();

        let result = process_video(bogus.to_str().unwrap(), &config_in(out.path()), &UnavailableDownloader);

        assert!(result.is_err());
        assert!(!out.path().join("broken_scenes").exists());
        assert!(bogus.exists());
    }

    #[test]
    fn test_solid_color_video_end_to_end() {
        let input_dir = tempfile::tempdir().unwrap();
        let Some(clip) = solid_color_clip(input_dir.path(), 10) else {
            eprintln!("ffmpeg not available, skipping");
            return;
        };

        let scenes = scene_detector::detect_scenes(&clip, 30.0, DEFAULT_MIN_SCENE_LEN).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].start_secs(), 0.0);
        assert!((scenes[0].end_secs() - 10.0).abs() < 0.1);

        let out = tempfile::tempdir().unwrap();
        let config = ProcessConfig {
            write_metadata: true,
            ..config_in(out.path())
        };
        let output = process_video(clip.to_str().unwrap(), &config, &UnavailableDownloader).unwrap();

        assert_eq!(output.base_name, "Solid_Blue");
        assert_eq!(output.detected_scenes, 1);
        assert_eq!(output.scene_count, 1);

        let sheet = output.sheet_path.unwrap();
        assert_eq!(sheet, out.path().join("Solid_Blue_composition_sheet.jpg"));
        assert!(sheet.is_file());
        assert!(!out.path().join("Solid_Blue_scenes").exists());
        assert!(clip.exists());

        let metadata: SheetMetadata =
            serde_json::from_str(&fs::read_to_string(output.metadata_path.unwrap()).unwrap()).unwrap();
        assert_eq!(metadata.scene_count, 1);
        let frames = &metadata.scenes[0].frames;
        assert!((1..=3).contains(&frames.len()));
        assert!(frames.iter().all(|f| f.frame_number < 250));
    }

    #[test]
    fn test_single_frame_grid_end_to_end() {
        let input_dir = tempfile::tempdir().unwrap();
        let Some(clip) = solid_color_clip(input_dir.path(), 2) else {
            eprintln!("ffmpeg not available, skipping");
            return;
        };

        let out = tempfile::tempdir().unwrap();
        let mut config = config_in(out.path());
        config.frames_per_scene = FramesPerScene::One;
        config.layout.mode = sheet::LayoutMode::Grid;
        config.layout.thumb_width = 160;

        let output = process_video(clip.to_str().unwrap(), &config, &UnavailableDownloader).unwrap();
        let sheet = image::open(output.sheet_path.unwrap()).unwrap();
        // one 160x120 cell: 160 + 2 * 20 wide, 30 + 120 + 30 + 2 * 20 high
        assert_eq!((sheet.width(), sheet.height()), (200, 220));
        assert!(output.metadata_path.is_none());
    }
}
