use anyhow::{Context, Result};
use image::RgbImage;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};
use crate::scene_detector::Scene;
use crate::video_processor::VideoProcessor;

/// Where inside its scene a frame was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePosition {
    Start,
    Middle,
    End,
    /// the single midpoint frame of one-frame-per-scene sheets
    Representative,
}

impl FramePosition {
    /// Fraction of the scene length at which this frame sits.
    pub fn fraction(self) -> f64 {
        match self {
            FramePosition::Start => 0.05,
            FramePosition::Middle | FramePosition::Representative => 0.5,
            FramePosition::End => 0.95,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FramePosition::Start => "start",
            FramePosition::Middle => "middle",
            FramePosition::End => "end",
            FramePosition::Representative => "representative",
        }
    }
}

/// How many frames each scene contributes to the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramesPerScene {
    One,
    #[default]
    Three,
}

impl FramesPerScene {
    pub fn positions(self) -> &'static [FramePosition] {
        match self {
            FramesPerScene::One => &[FramePosition::Representative],
            FramesPerScene::Three => &[FramePosition::Start, FramePosition::Middle, FramePosition::End],
        }
    }

    pub fn count(self) -> usize {
        self.positions().len()
    }
}

impl FromStr for FramesPerScene {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "one" => Ok(FramesPerScene::One),
            "3" | "three" => Ok(FramesPerScene::Three),
            other => Err(format!("frames per scene must be 1 or 3, got `{}`", other)),
        }
    }
}

impl fmt::Display for FramesPerScene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count())
    }
}

/// Anything that can hand out single frames by frame number.
pub trait FrameSource {
    fn fps(&self) -> f64;
    fn read_frame(&mut self, frame_number: u64) -> Result<RgbImage>;
}

impl FrameSource for VideoProcessor {
    fn fps(&self) -> f64 {
        self.info().fps
    }

    fn read_frame(&mut self, frame_number: u64) -> Result<RgbImage> {
        VideoProcessor::read_frame(self, frame_number)
    }
}

/// A still written to disk for one scene.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFrame {
    /// Index of the owning scene
    pub scene_index: usize,
    pub position: FramePosition,
    /// Absolute frame number in the source video
    pub frame_number: u64,
    /// JPEG written for this frame
    pub path: PathBuf,
    /// `HH:MM:SS.mmm`
    pub timestamp: String,
}

/// A scene together with its extracted frames, never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneRecord {
    /// Detected scene the frames belong to
    pub scene: Scene,
    /// seconds, rounded to one decimal
    pub duration: f64,
    pub frames: Vec<ExtractedFrame>,
}

/// Frame number for `position` inside `scene`, `None` for an empty scene.
pub fn frame_offset(scene: &Scene, position: FramePosition) -> Option<u64> {
    let len = scene.frame_count();
    if len == 0 {
        return None;
    }
    let offset = ((len as f64 * position.fraction()) as u64).min(len - 1);
    Some(scene.start_frame + offset)
}

pub fn format_timestamp(frame_number: u64, fps: f64) -> String {
    let total_ms = if fps > 0.0 {
        (frame_number as f64 / fps * 1000.0).round() as u64
    } else {
        0
    };
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

/// Round a duration in seconds to one decimal place.
pub fn round_duration(secs: f64) -> f64 {
    (secs * 10.0).round() / 10.0
}

/// Extract representative frames for every scene into `output_dir`.
///
/// A frame that cannot be read is skipped; a scene left without frames is
/// dropped, so the result may be shorter than `scenes` but keeps its order.
pub fn extract_scene_frames(
    source: &mut dyn FrameSource,
    scenes: &[Scene],
    output_dir: &Path,
    frames_per_scene: FramesPerScene,
) -> Result<Vec<SceneRecord>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create frame directory {}", output_dir.display()))?;

    let fps = source.fps();
    let mut records = Vec::with_capacity(scenes.len());

    for scene in scenes {
        let mut frames = Vec::with_capacity(frames_per_scene.count());

        for (slot, &position) in frames_per_scene.positions().iter().enumerate() {
            let Some(frame_number) = frame_offset(scene, position) else {
                continue;
            };

            let image = match source.read_frame(frame_number) {
                Ok(image) => image,
                Err(e) => {
                    warn!(
                        "⚠️  [extract] scene {}: could not read frame {} ({}): {:#}",
                        scene.index,
                        frame_number,
                        position.as_str(),
                        e
                    );
                    continue;
                }
            };

            let path = output_dir.join(format!("scene_{:03}_{}.jpg", scene.index, slot + 1));
            image
                .save(&path)
                .with_context(|| format!("failed to save frame {}", path.display()))?;
            debug!("💾 [extract] saved {} (frame {})", path.display(), frame_number);

            frames.push(ExtractedFrame {
                scene_index: scene.index,
                position,
                frame_number,
                path,
                timestamp: format_timestamp(frame_number, fps),
            });
        }

        if frames.is_empty() {
            warn!("⚠️  [extract] scene {}: no frames extracted, dropping it", scene.index);
            continue;
        }

        records.push(SceneRecord {
            scene: *scene,
            duration: round_duration(scene.duration_secs()),
            frames,
        });
    }

    Ok(records)
}
