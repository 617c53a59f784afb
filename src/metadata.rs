use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::frame_extractor::SceneRecord;

/// One frame shown on the sheet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameMetadata {
    /// start / middle / end / representative
    pub position: String,
    pub frame_number: u64,
    pub timestamp: String,
}

/// Metadata of a single scene
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneMetadata {
    /// Scene number, starting at 1
    pub scene: usize,
    /// Start time (seconds)
    pub start_time: f64,
    /// End time (seconds)
    pub end_time: f64,
    /// Duration (seconds, one decimal)
    pub duration: f64,
    pub frames: Vec<FrameMetadata>,
}

/// Sidecar describing a generated contact sheet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SheetMetadata {
    /// Input as given on the command line (path or URL)
    pub input: String,
    pub base_name: String,
    pub fps: f64,
    /// Sheet file name
    pub sheet_file: String,
    pub scene_count: usize,
    pub scenes: Vec<SceneMetadata>,
}

impl SheetMetadata {
    pub fn from_records(input: &str, base_name: &str, fps: f64, sheet_file: &str, records: &[SceneRecord]) -> Self {
        let scenes: Vec<SceneMetadata> = records
            .iter()
            .map(|record| SceneMetadata {
                scene: record.scene.index,
                start_time: record.scene.start_secs(),
                end_time: record.scene.end_secs(),
                duration: record.duration,
                frames: record
                    .frames
                    .iter()
                    .map(|frame| FrameMetadata {
                        position: frame.position.as_str().to_string(),
                        frame_number: frame.frame_number,
                        timestamp: frame.timestamp.clone(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            input: input.to_string(),
            base_name: base_name.to_string(),
            fps,
            sheet_file: sheet_file.to_string(),
            scene_count: scenes.len(),
            scenes,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize sheet metadata")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write metadata file {}", path.display()))?;
        Ok(())
    }
}
