pub mod source;
pub mod video_processor;
pub mod scene_detector;
pub mod frame_extractor;
pub mod sheet;
pub mod metadata;
pub mod processor;
pub mod config;

pub use source::{Downloader, ResolvedSource, SourceError, YtDlp};
pub use video_processor::VideoProcessor;
pub use scene_detector::{ContentDetector, CutDetector, Scene};
pub use frame_extractor::{ExtractedFrame, FramePosition, FrameSource, FramesPerScene, SceneRecord};
pub use sheet::{ComposedSheet, LabelStyle, LayoutConfig, LayoutMode, SheetGeometry};
pub use metadata::{SceneMetadata, SheetMetadata};
pub use processor::{ProcessConfig, ProcessOutput, process_video};
pub use config::{CliOverrides, ConfigLoader};
