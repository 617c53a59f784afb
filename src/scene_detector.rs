use anyhow::{Context, Result};
use image::RgbImage;
use std::path::Path;
use tracing::debug;
use crate::video_processor::VideoProcessor;

/// Default content threshold, lower values cut more often.
pub const DEFAULT_THRESHOLD: f64 = 30.0;
/// Default minimum scene length in frames.
pub const DEFAULT_MIN_SCENE_LEN: u64 = 15;

/// Frames are downscaled to this width before scoring.
const DETECT_MAX_WIDTH: u32 = 256;

/// A contiguous range of frames `[start_frame, end_frame)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scene {
    /// 1-based position in detection order
    pub index: usize,
    /// First frame of the scene
    pub start_frame: u64,
    /// First frame after the scene (exclusive)
    pub end_frame: u64,
    /// Frame rate of the source, used for the time conversions
    pub fps: f64,
}

impl Scene {
    /// Number of frames in the scene
    pub fn frame_count(&self) -> u64 {
        self.end_frame.saturating_sub(self.start_frame)
    }

    /// Start time (seconds)
    pub fn start_secs(&self) -> f64 {
        self.start_frame as f64 / self.fps
    }

    /// End time (seconds)
    pub fn end_secs(&self) -> f64 {
        self.end_frame as f64 / self.fps
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_secs() - self.start_secs()
    }
}

/// Decides, frame by frame, where a new scene starts.
pub trait CutDetector {
    /// Returns true when `frame_num` is the first frame of a new scene.
    fn process_frame(&mut self, frame_num: u64, frame: &RgbImage) -> bool;
}

/// Content-difference detector.
///
/// Each frame is converted to HSV (hue on the 0-180 scale, saturation and
/// value on 0-255). The score between two consecutive frames is the mean of
/// the average absolute hue, saturation and value deltas. A cut is reported
/// when the score reaches `threshold` and at least `min_scene_len` frames
/// have passed since the previous cut.
pub struct ContentDetector {
    threshold: f64,
    min_scene_len: u64,
    last_frame: Option<HsvPlanes>,
    last_cut: u64,
}

impl ContentDetector {
    pub fn new(threshold: f64, min_scene_len: u64) -> Self {
        Self {
            threshold,
            min_scene_len,
            last_frame: None,
            last_cut: 0,
        }
    }

    /// Content score between two frames, 0.0 for identical frames.
    pub fn content_score(&self, frame1: &RgbImage, frame2: &RgbImage) -> f64 {
        HsvPlanes::from_image(frame1).delta(&HsvPlanes::from_image(frame2))
    }
}

impl Default for ContentDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_MIN_SCENE_LEN)
    }
}

impl CutDetector for ContentDetector {
    fn process_frame(&mut self, frame_num: u64, frame: &RgbImage) -> bool {
        let current = HsvPlanes::from_image(frame);
        let mut is_cut = false;

        if let Some(previous) = &self.last_frame {
            let score = previous.delta(&current);
            if score >= self.threshold && frame_num.saturating_sub(self.last_cut) >= self.min_scene_len {
                debug!("cut at frame {} (score {:.2})", frame_num, score);
                self.last_cut = frame_num;
                is_cut = true;
            }
        }

        self.last_frame = Some(current);
        is_cut
    }
}

/// Per-pixel HSV channels of one frame.
struct HsvPlanes {
    hue: Vec<f64>,
    saturation: Vec<f64>,
    value: Vec<f64>,
}

impl HsvPlanes {
    fn from_image(image: &RgbImage) -> Self {
        let len = (image.width() * image.height()) as usize;
        let mut planes = Self {
            hue: Vec::with_capacity(len),
            saturation: Vec::with_capacity(len),
            value: Vec::with_capacity(len),
        };

        for pixel in image.pixels() {
            let (h, s, v) = rgb_to_hsv(pixel[0], pixel[1], pixel[2]);
            planes.hue.push(h / 2.0);
            planes.saturation.push(s * 255.0);
            planes.value.push(v * 255.0);
        }

        planes
    }

    fn delta(&self, other: &HsvPlanes) -> f64 {
        if self.hue.len() != other.hue.len() || self.hue.is_empty() {
            // frame size changed mid-stream
            return 255.0;
        }

        let mean_abs_diff = |a: &[f64], b: &[f64]| {
            a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f64>() / a.len() as f64
        };

        let hue = mean_abs_diff(&self.hue, &other.hue);
        let saturation = mean_abs_diff(&self.saturation, &other.saturation);
        let value = mean_abs_diff(&self.value, &other.value);

        (hue + saturation + value) / 3.0
    }
}

/// RGB to HSV, hue in degrees, saturation and value in 0.0-1.0.
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let r = f64::from(r) / 255.0;
    let g = f64::from(g) / 255.0;
    let b = f64::from(b) / 255.0;

    let max = r.max(g.max(b));
    let min = r.min(g.min(b));
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let s = if max == 0.0 { 0.0 } else { delta / max };

    (h, s, max)
}

/// Turn cut frame numbers into contiguous scenes covering `[0, total_frames)`.
///
/// Cuts outside the stream, at frame 0, or out of order are ignored. With no
/// usable cuts the whole stream is a single scene.
pub fn scenes_from_cuts(cuts: &[u64], total_frames: u64, fps: f64) -> Vec<Scene> {
    if total_frames == 0 {
        return Vec::new();
    }

    let mut boundaries = vec![0u64];
    for &cut in cuts {
        if cut > *boundaries.last().unwrap_or(&0) && cut < total_frames {
            boundaries.push(cut);
        }
    }
    boundaries.push(total_frames);

    boundaries
        .windows(2)
        .enumerate()
        .map(|(i, pair)| Scene {
            index: i + 1,
            start_frame: pair[0],
            end_frame: pair[1],
            fps,
        })
        .collect()
}

/// Detect scenes in a video file by decoding it once from start to end.
///
/// Decode failures are returned as errors; a video without any decodable
/// frame yields an empty list.
pub fn detect_scenes(video_path: impl AsRef<Path>, threshold: f64, min_scene_len: u64) -> Result<Vec<Scene>> {
    let video_path = video_path.as_ref();
    let mut processor = VideoProcessor::open(video_path)?;
    let fps = processor.info().fps;

    let mut detector = ContentDetector::new(threshold, min_scene_len);
    let mut cuts = Vec::new();
    let total_frames = processor
        .for_each_frame(DETECT_MAX_WIDTH, |frame_num, frame| {
            if detector.process_frame(frame_num, frame) {
                cuts.push(frame_num);
            }
        })
        .with_context(|| format!("failed to decode {}", video_path.display()))?;

    debug!("decoded {} frames, {} cuts", total_frames, cuts.len());
    Ok(scenes_from_cuts(&cuts, total_frames, fps))
}
