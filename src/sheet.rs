//! Contact sheet composition.
//!
//! Thumbnails are laid out on a fixed grid of equally sized cells. Each cell
//! holds a title band (scene label, drawn once per scene), the bordered
//! thumbnail, and a caption band (frame timestamp):
//!
//! ```text
//! cell_width  = thumb_width + 2 * border_width
//! cell_height = title_band + max_thumb_height + 2 * border_width + caption_band
//! width       = columns * cell_width  + (columns + 1) * padding
//! height      = rows    * cell_height + (rows + 1)    * padding
//! ```

use anyhow::{Context, Result};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};
use crate::frame_extractor::SceneRecord;

/// Fonts tried, in order, when no font path is configured or it fails to load.
const FONT_CANDIDATES: &[&str] = &[
    "Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

/// Side of a glyph in the built-in bitmap font.
const GLYPH_SIZE: u32 = 8;

/// Vertical gap between a thumbnail and its caption.
const CAPTION_GAP: u32 = 5;

/// Largest width or height the JPEG encoder accepts.
pub const MAX_SHEET_DIMENSION: u32 = 65_535;

const MAX_THUMB_WIDTH: u32 = 4096;
const MAX_COLUMNS: u32 = 64;
/// Bound for padding, border width and the label bands.
const MAX_SPACING: u32 = 1024;
const MAX_FONT_SIZE: f32 = 512.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutMode {
    /// one row per scene, one column per extracted frame
    #[default]
    Rows,
    /// cells flow left to right over a fixed number of columns
    Grid,
}

impl FromStr for LayoutMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rows" | "row" => Ok(LayoutMode::Rows),
            "grid" => Ok(LayoutMode::Grid),
            other => Err(format!("layout must be `rows` or `grid`, got `{}`", other)),
        }
    }
}

impl fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutMode::Rows => write!(f, "rows"),
            LayoutMode::Grid => write!(f, "grid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelStyle {
    /// `Scene 3 (4.2s)`
    #[default]
    Full,
    /// `Scene 3`
    Minimal,
}

impl LabelStyle {
    pub fn scene_title(self, record: &SceneRecord) -> String {
        match self {
            LabelStyle::Full => format!("Scene {} ({:.1}s)", record.scene.index, record.duration),
            LabelStyle::Minimal => format!("Scene {}", record.scene.index),
        }
    }
}

impl FromStr for LabelStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(LabelStyle::Full),
            "minimal" => Ok(LabelStyle::Minimal),
            other => Err(format!("label style must be `full` or `minimal`, got `{}`", other)),
        }
    }
}

/// Contact sheet layout settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConfig {
    /// Width every thumbnail is scaled to, height follows the source aspect ratio.
    pub thumb_width: u32,
    pub mode: LayoutMode,
    /// Columns in grid mode. Rows mode uses one column per extracted frame.
    pub columns: u32,
    /// Space around and between cells.
    pub padding: u32,
    /// Solid frame drawn around each thumbnail, 0 disables it.
    pub border_width: u32,
    pub background: [u8; 3],
    pub border_color: [u8; 3],
    pub title_color: [u8; 3],
    pub caption_color: [u8; 3],
    /// Preferred TrueType font, tried before the system candidates.
    pub font_path: Option<PathBuf>,
    /// Font size in pixels.
    pub font_size: f32,
    pub label_style: LabelStyle,
    /// Height reserved above each thumbnail for the scene title.
    pub title_band: u32,
    /// Height reserved below each thumbnail for the timestamp.
    pub caption_band: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            thumb_width: 320,
            mode: LayoutMode::Rows,
            columns: 4,
            padding: 20,
            border_width: 0,
            background: [20, 20, 20],
            border_color: [90, 90, 90],
            title_color: [255, 255, 255],
            caption_color: [220, 220, 220],
            font_path: None,
            font_size: 22.0,
            label_style: LabelStyle::Full,
            title_band: 30,
            caption_band: 30,
        }
    }
}

impl LayoutConfig {
    /// Reject values that cannot produce a sheet of sane size.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (1..=MAX_THUMB_WIDTH).contains(&self.thumb_width),
            "thumb_width must be between 1 and {}, got {}",
            MAX_THUMB_WIDTH,
            self.thumb_width
        );
        anyhow::ensure!(
            (1..=MAX_COLUMNS).contains(&self.columns),
            "columns must be between 1 and {}, got {}",
            MAX_COLUMNS,
            self.columns
        );
        for (name, value) in [
            ("padding", self.padding),
            ("border_width", self.border_width),
            ("title_band", self.title_band),
            ("caption_band", self.caption_band),
        ] {
            anyhow::ensure!(
                value <= MAX_SPACING,
                "{} must be at most {}, got {}",
                name,
                MAX_SPACING,
                value
            );
        }
        anyhow::ensure!(
            self.font_size.is_finite() && self.font_size > 0.0 && self.font_size <= MAX_FONT_SIZE,
            "font_size must be a positive number up to {}, got {}",
            MAX_FONT_SIZE,
            self.font_size
        );
        Ok(())
    }
}

/// Resolved canvas geometry of one sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetGeometry {
    pub columns: u32,
    pub rows: u32,
    /// Space around and between cells
    pub padding: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
}

impl SheetGeometry {
    /// Lay out `columns` x `rows` cells, failing when a size does not fit in `u32`.
    pub fn compute(layout: &LayoutConfig, columns: u32, rows: u32, max_thumb_height: u32) -> Result<Self> {
        let overflow = || {
            anyhow::anyhow!(
                "a sheet of {}x{} cells with these layout settings is too large to lay out",
                columns,
                rows
            )
        };
        let padding = layout.padding;
        let border = layout.border_width.checked_mul(2).ok_or_else(overflow)?;
        let cell_width = layout.thumb_width.checked_add(border).ok_or_else(overflow)?;
        let cell_height = [layout.title_band, max_thumb_height, border, layout.caption_band]
            .into_iter()
            .try_fold(0u32, u32::checked_add)
            .ok_or_else(overflow)?;

        Ok(Self {
            columns,
            rows,
            padding,
            cell_width,
            cell_height,
            width: span(columns, cell_width, padding).ok_or_else(overflow)?,
            height: span(rows, cell_height, padding).ok_or_else(overflow)?,
        })
    }

    /// Top-left corner of the cell at `column`, `row`.
    pub fn cell_origin(&self, column: u32, row: u32) -> (u32, u32) {
        (
            self.padding + column * (self.cell_width + self.padding),
            self.padding + row * (self.cell_height + self.padding),
        )
    }
}

/// `count` cells of `cell` pixels with padding on both sides of each.
fn span(count: u32, cell: u32, padding: u32) -> Option<u32> {
    count
        .checked_mul(cell)?
        .checked_add(count.checked_add(1)?.checked_mul(padding)?)
}

/// A sheet written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedSheet {
    pub geometry: SheetGeometry,
    /// Indices of the scenes actually drawn, in sheet order
    pub scene_indices: Vec<usize>,
}

struct Thumbnail {
    image: RgbImage,
    caption: String,
}

struct SceneThumbnails {
    index: usize,
    title: String,
    thumbnails: Vec<Thumbnail>,
}

/// Compose all scene records into a single image at `output_path`.
///
/// Returns `Ok(None)` without touching the filesystem when there is nothing
/// to draw: no records, or no frame file that still exists and decodes.
/// Scenes whose frames all failed to load are left off the sheet and out of
/// [`ComposedSheet::scene_indices`]. A canvas larger than
/// [`MAX_SHEET_DIMENSION`] is rejected before it is allocated.
pub fn compose_sheet(
    records: &[SceneRecord],
    output_path: &Path,
    layout: &LayoutConfig,
) -> Result<Option<ComposedSheet>> {
    layout.validate()?;

    if records.is_empty() {
        warn!("⚠️  [sheet] no scene data found, skipping contact sheet");
        return Ok(None);
    }

    let scenes: Vec<SceneThumbnails> = records
        .iter()
        .filter_map(|record| load_thumbnails(record, layout))
        .collect();
    if scenes.is_empty() {
        warn!("⚠️  [sheet] no valid frames to display, skipping contact sheet");
        return Ok(None);
    }

    let geometry = plan(&scenes, layout)?;
    if geometry.width > MAX_SHEET_DIMENSION || geometry.height > MAX_SHEET_DIMENSION {
        anyhow::bail!(
            "contact sheet for {} scenes in {} layout would be {}x{} px, above the {} px image limit; \
             try `--layout grid` or a smaller `--thumb-width`",
            scenes.len(),
            layout.mode,
            geometry.width,
            geometry.height,
            MAX_SHEET_DIMENSION
        );
    }

    let typeface = Typeface::load(layout);
    let canvas = render(&scenes, layout, &typeface, &geometry);

    canvas
        .save(output_path)
        .with_context(|| format!("failed to write contact sheet {}", output_path.display()))?;
    info!(
        "✅ [sheet] contact sheet saved: {} ({}x{}, {} scenes)",
        output_path.display(),
        geometry.width,
        geometry.height,
        scenes.len()
    );

    Ok(Some(ComposedSheet {
        geometry,
        scene_indices: scenes.iter().map(|scene| scene.index).collect(),
    }))
}

fn load_thumbnails(record: &SceneRecord, layout: &LayoutConfig) -> Option<SceneThumbnails> {
    let mut thumbnails = Vec::with_capacity(record.frames.len());

    for frame in &record.frames {
        if !frame.path.exists() {
            debug!("frame file {} is gone, skipping", frame.path.display());
            continue;
        }
        let source = match image::open(&frame.path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                warn!("⚠️  [sheet] cannot open {}: {}", frame.path.display(), e);
                continue;
            }
        };
        thumbnails.push(Thumbnail {
            image: resize_to_width(&source, layout.thumb_width),
            caption: frame.timestamp.clone(),
        });
    }

    if thumbnails.is_empty() {
        return None;
    }
    Some(SceneThumbnails {
        index: record.scene.index,
        title: layout.label_style.scene_title(record),
        thumbnails,
    })
}

/// Scale `image` to `width`, keeping its aspect ratio.
fn resize_to_width(image: &RgbImage, width: u32) -> RgbImage {
    let height = if image.width() == 0 {
        1
    } else {
        ((u64::from(width) * u64::from(image.height())) / u64::from(image.width())).max(1) as u32
    };
    imageops::resize(image, width, height, FilterType::Triangle)
}

fn grid_shape(layout: &LayoutConfig, scenes: &[SceneThumbnails]) -> (u32, u32) {
    match layout.mode {
        LayoutMode::Rows => {
            let columns = scenes.iter().map(|s| s.thumbnails.len()).max().unwrap_or(1) as u32;
            (columns, scenes.len() as u32)
        }
        LayoutMode::Grid => {
            let cells = scenes.iter().map(|s| s.thumbnails.len()).sum::<usize>() as u32;
            let columns = layout.columns.min(cells).max(1);
            (columns, cells.div_ceil(columns))
        }
    }
}

fn plan(scenes: &[SceneThumbnails], layout: &LayoutConfig) -> Result<SheetGeometry> {
    let max_thumb_height = scenes
        .iter()
        .flat_map(|scene| &scene.thumbnails)
        .map(|thumb| thumb.image.height())
        .max()
        .unwrap_or(0);
    let (columns, rows) = grid_shape(layout, scenes);
    SheetGeometry::compute(layout, columns, rows, max_thumb_height)
}

fn render(scenes: &[SceneThumbnails], layout: &LayoutConfig, typeface: &Typeface, geometry: &SheetGeometry) -> RgbImage {
    let columns = geometry.columns;
    let mut canvas = RgbImage::from_pixel(geometry.width, geometry.height, Rgb(layout.background));
    let border = layout.border_width;
    let mut cell = 0u32;

    for (scene_row, scene) in scenes.iter().enumerate() {
        for (slot, thumb) in scene.thumbnails.iter().enumerate() {
            let (column, row) = match layout.mode {
                LayoutMode::Rows => (slot as u32, scene_row as u32),
                LayoutMode::Grid => (cell % columns, cell / columns),
            };
            cell += 1;
            let (x, y) = geometry.cell_origin(column, row);

            if slot == 0 {
                let (_, text_height) = typeface.measure(&scene.title);
                let title_y = y + layout.title_band.saturating_sub(text_height) / 2;
                typeface.draw(&mut canvas, x, title_y, Rgb(layout.title_color), &scene.title);
            }

            let thumb_y = y + layout.title_band;
            if border > 0 {
                let rect = Rect::at(x as i32, thumb_y as i32)
                    .of_size(thumb.image.width() + 2 * border, thumb.image.height() + 2 * border);
                draw_filled_rect_mut(&mut canvas, rect, Rgb(layout.border_color));
            }
            imageops::overlay(&mut canvas, &thumb.image, i64::from(x + border), i64::from(thumb_y + border));

            let caption_y = thumb_y + thumb.image.height() + 2 * border + CAPTION_GAP;
            typeface.draw(&mut canvas, x, caption_y, Rgb(layout.caption_color), &thumb.caption);
        }
    }

    canvas
}

/// Label font: a TrueType face when one can be loaded, the built-in 8x8
/// bitmap font otherwise.
enum Typeface {
    TrueType { font: Font<'static>, scale: Scale },
    Bitmap { scale: u32 },
}

impl Typeface {
    fn load(layout: &LayoutConfig) -> Self {
        let candidates = layout
            .font_path
            .iter()
            .cloned()
            .chain(FONT_CANDIDATES.iter().map(PathBuf::from));

        for path in candidates {
            let Ok(bytes) = fs::read(&path) else {
                continue;
            };
            match Font::try_from_vec(bytes) {
                Some(font) => {
                    debug!("using font {}", path.display());
                    return Typeface::TrueType {
                        font,
                        scale: Scale::uniform(layout.font_size),
                    };
                }
                None => warn!("⚠️  [sheet] {} is not a usable TrueType font", path.display()),
            }
        }

        debug!("no TrueType font found, using the built-in bitmap font");
        Self::bitmap(layout.font_size)
    }

    fn bitmap(font_size: f32) -> Self {
        let scale = (font_size / GLYPH_SIZE as f32).round().max(1.0) as u32;
        Typeface::Bitmap { scale }
    }

    fn measure(&self, text: &str) -> (u32, u32) {
        match self {
            Typeface::TrueType { font, scale } => {
                let (width, height) = text_size(*scale, font, text);
                (width.max(0) as u32, height.max(0) as u32)
            }
            Typeface::Bitmap { scale } => {
                let glyph = GLYPH_SIZE * scale;
                (text.chars().count() as u32 * glyph, glyph)
            }
        }
    }

    fn draw(&self, canvas: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>, text: &str) {
        match self {
            Typeface::TrueType { font, scale } => {
                draw_text_mut(canvas, color, x as i32, y as i32, *scale, font, text);
            }
            Typeface::Bitmap { scale } => draw_bitmap_text(canvas, x, y, *scale, color, text),
        }
    }
}

fn draw_bitmap_text(canvas: &mut RgbImage, x: u32, y: u32, scale: u32, color: Rgb<u8>, text: &str) {
    let advance = GLYPH_SIZE * scale;

    for (i, ch) in text.chars().enumerate() {
        let glyph = BASIC_FONTS
            .get(ch)
            .or_else(|| BASIC_FONTS.get('?'))
            .unwrap_or([0; 8]);
        let origin_x = x + i as u32 * advance;

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                // least significant bit is the leftmost pixel
                if bits & (1 << col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = origin_x + col * scale + dx;
                        let py = y + row as u32 * scale + dy;
                        if px < canvas.width() && py < canvas.height() {
                            canvas.put_pixel(px, py, color);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_extractor::{ExtractedFrame, FramePosition};
    use crate::scene_detector::Scene;
    use image::ImageBuffer;

    /// Writes `count` 64x36 frames per scene and returns matching records.
    fn records(dir: &Path, scenes: usize, count: usize) -> Vec<SceneRecord> {
        let positions = [FramePosition::Start, FramePosition::Middle, FramePosition::End];
        (1..=scenes)
            .map(|index| {
                let frames = (0..count)
                    .map(|slot| {
                        let path = dir.join(format!("scene_{:03}_{}.jpg", index, slot + 1));
                        let shade = (index * 40 + slot * 10) as u8;
                        let image: RgbImage = ImageBuffer::from_fn(64, 36, |_, _| Rgb([shade, 80, 160]));
                        image.save(&path).unwrap();
                        ExtractedFrame {
                            scene_index: index,
                            position: positions[slot % 3],
                            frame_number: slot as u64,
                            path,
                            timestamp: format!("00:00:0{}.000", slot),
                        }
                    })
                    .collect();
                SceneRecord {
                    scene: Scene {
                        index,
                        start_frame: 0,
                        end_frame: 100,
                        fps: 25.0,
                    },
                    duration: 4.0,
                    frames,
                }
            })
            .collect()
    }

    fn small_layout() -> LayoutConfig {
        LayoutConfig {
            thumb_width: 32,
            ..LayoutConfig::default()
        }
    }

    #[test]
    fn test_rows_layout_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("sheet.jpg");
        let records = records(dir.path(), 2, 3);

        let geometry = compose_sheet(&records, &output, &small_layout()).unwrap().unwrap().geometry;

        // thumbs are 32x18; cell 32 x (30 + 18 + 30)
        assert_eq!((geometry.columns, geometry.rows), (3, 2));
        assert_eq!(geometry.width, 3 * 32 + 4 * 20);
        assert_eq!(geometry.height, 2 * 78 + 3 * 20);

        let written = image::open(&output).unwrap();
        assert_eq!((written.width(), written.height()), (geometry.width, geometry.height));
    }

    #[test]
    fn test_grid_layout_dimensions_with_border() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("sheet.jpg");
        let records = records(dir.path(), 3, 1);
        let layout = LayoutConfig {
            mode: LayoutMode::Grid,
            columns: 2,
            border_width: 2,
            ..small_layout()
        };

        let geometry = compose_sheet(&records, &output, &layout).unwrap().unwrap().geometry;

        assert_eq!((geometry.columns, geometry.rows), (2, 2));
        assert_eq!(geometry.cell_width, 36);
        assert_eq!(geometry.cell_height, 30 + 18 + 4 + 30);
        assert_eq!(geometry.width, 2 * 36 + 3 * 20);
        assert_eq!(geometry.height, 2 * 82 + 3 * 20);
    }

    #[test]
    fn test_grid_never_wider_than_its_cells() {
        let dir = tempfile::tempdir().unwrap();
        let records = records(dir.path(), 1, 1);
        let layout = LayoutConfig {
            mode: LayoutMode::Grid,
            columns: 6,
            ..small_layout()
        };
        let geometry = compose_sheet(&records, &dir.path().join("one.jpg"), &layout)
            .unwrap()
            .unwrap()
            .geometry;
        assert_eq!((geometry.columns, geometry.rows), (1, 1));
    }

    #[test]
    fn test_geometry_formula() {
        let layout = LayoutConfig {
            thumb_width: 320,
            padding: 10,
            border_width: 3,
            title_band: 24,
            caption_band: 26,
            ..LayoutConfig::default()
        };
        let geometry = SheetGeometry::compute(&layout, 4, 5, 180).unwrap();
        assert_eq!(geometry.cell_width, 326);
        assert_eq!(geometry.cell_height, 24 + 180 + 6 + 26);
        assert_eq!(geometry.width, 4 * 326 + 5 * 10);
        assert_eq!(geometry.height, 5 * 236 + 6 * 10);
        assert_eq!(geometry.cell_origin(0, 0), (10, 10));
        assert_eq!(geometry.cell_origin(2, 1), (10 + 2 * 336, 10 + 246));
    }

    #[test]
    fn test_compose_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let records = records(dir.path(), 2, 3);
        let layout = small_layout();

        let first = compose_sheet(&records, &dir.path().join("a.jpg"), &layout).unwrap();
        let second = compose_sheet(&records, &dir.path().join("b.jpg"), &layout).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_records_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("sheet.jpg");
        assert_eq!(compose_sheet(&[], &output, &small_layout()).unwrap(), None);
        assert!(!output.exists());
    }

    #[test]
    fn test_missing_frame_files_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let records = records(dir.path(), 2, 2);
        for record in &records {
            for frame in &record.frames {
                fs::remove_file(&frame.path).unwrap();
            }
        }
        let output = dir.path().join("sheet.jpg");
        assert_eq!(compose_sheet(&records, &output, &small_layout()).unwrap(), None);
        assert!(!output.exists());
    }

    #[test]
    fn test_partial_rows_use_widest_scene() {
        let dir = tempfile::tempdir().unwrap();
        let mut records = records(dir.path(), 3, 3);
        // scene 2 loses two of its frames
        records[1].frames.truncate(1);
        let sheet = compose_sheet(&records, &dir.path().join("sheet.jpg"), &small_layout())
            .unwrap()
            .unwrap();
        assert_eq!((sheet.geometry.columns, sheet.geometry.rows), (3, 3));
        assert_eq!(sheet.scene_indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_unloadable_scene_is_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        let records = records(dir.path(), 3, 2);
        for frame in &records[1].frames {
            fs::remove_file(&frame.path).unwrap();
        }

        let sheet = compose_sheet(&records, &dir.path().join("sheet.jpg"), &small_layout())
            .unwrap()
            .unwrap();

        assert_eq!(sheet.scene_indices, vec![1, 3]);
        assert_eq!(sheet.geometry.rows, 2);
    }

    #[test]
    fn test_layout_bounds() {
        assert!(LayoutConfig::default().validate().is_ok());

        let cases = [
            LayoutConfig { padding: 3_000_000_000, ..LayoutConfig::default() },
            LayoutConfig { border_width: MAX_SPACING + 1, ..LayoutConfig::default() },
            LayoutConfig { title_band: u32::MAX, ..LayoutConfig::default() },
            LayoutConfig { caption_band: MAX_SPACING + 1, ..LayoutConfig::default() },
            LayoutConfig { thumb_width: 100_000, ..LayoutConfig::default() },
            LayoutConfig { thumb_width: 0, ..LayoutConfig::default() },
            LayoutConfig { columns: 0, ..LayoutConfig::default() },
            LayoutConfig { columns: MAX_COLUMNS + 1, ..LayoutConfig::default() },
            LayoutConfig { font_size: f32::INFINITY, ..LayoutConfig::default() },
        ];
        for layout in &cases {
            assert!(layout.validate().is_err(), "{:?} should be rejected", layout);
        }
    }

    #[test]
    fn test_huge_padding_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let records = records(dir.path(), 1, 1);
        let layout = LayoutConfig {
            padding: 3_000_000_000,
            ..small_layout()
        };
        let output = dir.path().join("sheet.jpg");

        assert!(compose_sheet(&records, &output, &layout).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_geometry_overflow_is_an_error() {
        let layout = LayoutConfig {
            padding: 3_000_000_000,
            ..LayoutConfig::default()
        };
        assert!(SheetGeometry::compute(&layout, 1, 1, 18).is_err());

        let layout = LayoutConfig {
            border_width: u32::MAX,
            ..LayoutConfig::default()
        };
        assert!(SheetGeometry::compute(&layout, 1, 1, 18).is_err());

        assert!(SheetGeometry::compute(&LayoutConfig::default(), u32::MAX, 1, 180).is_err());
    }

    #[test]
    fn test_oversized_sheet_rejected_before_rendering() {
        let dir = tempfile::tempdir().unwrap();
        // default rows layout: 300 rows of 240 px cells plus padding
        let records = records(dir.path(), 300, 1);
        let output = dir.path().join("sheet.jpg");

        let err = compose_sheet(&records, &output, &LayoutConfig::default()).unwrap_err();
        let message = err.to_string();

        assert!(message.contains("65535"), "{}", message);
        assert!(message.contains("300 scenes"), "{}", message);
        assert!(message.contains("rows layout"), "{}", message);
        assert!(message.contains("--layout grid"), "{}", message);
        assert!(!output.exists());

        // the same scenes fit once they flow over a grid
        let grid = LayoutConfig {
            mode: LayoutMode::Grid,
            columns: 20,
            thumb_width: 64,
            ..LayoutConfig::default()
        };
        let sheet = compose_sheet(&records, &output, &grid).unwrap().unwrap();
        assert_eq!(sheet.scene_indices.len(), 300);
        assert!(sheet.geometry.height <= MAX_SHEET_DIMENSION);
    }

    const RED: [u8; 3] = [220, 30, 30];
    const GREEN: [u8; 3] = [30, 200, 60];
    const BLUE: [u8; 3] = [40, 60, 230];

    fn solid_scene(index: usize, color: [u8; 3], frames: usize) -> SceneThumbnails {
        SceneThumbnails {
            index,
            title: format!("Scene {}", index),
            thumbnails: (0..frames)
                .map(|_| Thumbnail {
                    image: RgbImage::from_pixel(64, 36, Rgb(color)),
                    caption: String::new(),
                })
                .collect(),
        }
    }

    fn render_layout(mode: LayoutMode) -> LayoutConfig {
        LayoutConfig {
            mode,
            thumb_width: 64,
            columns: 2,
            padding: 10,
            border_width: 2,
            // bitmap glyphs at scale 1 keep "Scene N" inside one cell
            font_size: 8.0,
            ..LayoutConfig::default()
        }
    }

    fn render_scenes(scenes: &[SceneThumbnails], layout: &LayoutConfig) -> (RgbImage, SheetGeometry) {
        let geometry = plan(scenes, layout).unwrap();
        let canvas = render(scenes, layout, &Typeface::bitmap(layout.font_size), &geometry);
        (canvas, geometry)
    }

    /// Colour at the centre of the thumbnail slot of a cell.
    fn thumb_color(canvas: &RgbImage, geometry: &SheetGeometry, layout: &LayoutConfig, column: u32, row: u32) -> [u8; 3] {
        let (x, y) = geometry.cell_origin(column, row);
        canvas
            .get_pixel(x + layout.border_width + 32, y + layout.title_band + layout.border_width + 18)
            .0
    }

    fn title_band_has_ink(canvas: &RgbImage, geometry: &SheetGeometry, layout: &LayoutConfig, column: u32, row: u32) -> bool {
        let (x, y) = geometry.cell_origin(column, row);
        (x..x + geometry.cell_width)
            .any(|px| (y..y + layout.title_band).any(|py| canvas.get_pixel(px, py).0 != layout.background))
    }

    #[test]
    fn test_rows_render_in_record_order() {
        let layout = render_layout(LayoutMode::Rows);
        let scenes = [solid_scene(1, RED, 3), solid_scene(2, GREEN, 1), solid_scene(3, BLUE, 2)];
        let (canvas, geometry) = render_scenes(&scenes, &layout);
        let bg = layout.background;

        assert_eq!((geometry.columns, geometry.rows), (3, 3));
        let expected = [[RED, RED, RED], [GREEN, bg, bg], [BLUE, BLUE, bg]];
        for (row, colors) in expected.iter().enumerate() {
            for (column, color) in colors.iter().enumerate() {
                assert_eq!(
                    thumb_color(&canvas, &geometry, &layout, column as u32, row as u32),
                    *color,
                    "cell ({}, {})",
                    column,
                    row
                );
            }
        }

        // border frames drawn thumbnails only
        let (x, y) = geometry.cell_origin(0, 1);
        assert_eq!(canvas.get_pixel(x, y + layout.title_band).0, layout.border_color);
        let (x, y) = geometry.cell_origin(1, 1);
        assert_eq!(canvas.get_pixel(x, y + layout.title_band).0, bg);

        // one title per scene, above its first cell
        for row in 0..3 {
            assert!(title_band_has_ink(&canvas, &geometry, &layout, 0, row));
            for column in 1..3 {
                assert!(!title_band_has_ink(&canvas, &geometry, &layout, column, row));
            }
        }
    }

    #[test]
    fn test_grid_render_in_record_order() {
        let layout = render_layout(LayoutMode::Grid);
        let scenes = [solid_scene(1, RED, 3), solid_scene(2, GREEN, 1), solid_scene(3, BLUE, 2)];
        let (canvas, geometry) = render_scenes(&scenes, &layout);

        // six cells flowing over two columns
        assert_eq!((geometry.columns, geometry.rows), (2, 3));
        let cells = [
            ((0, 0), RED, true),
            ((1, 0), RED, false),
            ((0, 1), RED, false),
            ((1, 1), GREEN, true),
            ((0, 2), BLUE, true),
            ((1, 2), BLUE, false),
        ];
        for ((column, row), color, titled) in cells {
            assert_eq!(thumb_color(&canvas, &geometry, &layout, column, row), color, "cell ({}, {})", column, row);
            assert_eq!(
                title_band_has_ink(&canvas, &geometry, &layout, column, row),
                titled,
                "title of cell ({}, {})",
                column,
                row
            );
        }
    }

    #[test]
    fn test_scene_titles() {
        let dir = tempfile::tempdir().unwrap();
        let record = &records(dir.path(), 1, 1)[0];
        assert_eq!(LabelStyle::Full.scene_title(record), "Scene 1 (4.0s)");
        assert_eq!(LabelStyle::Minimal.scene_title(record), "Scene 1");
    }

    #[test]
    fn test_parse_layout_options() {
        assert_eq!("Grid".parse::<LayoutMode>().unwrap(), LayoutMode::Grid);
        assert_eq!("rows".parse::<LayoutMode>().unwrap(), LayoutMode::Rows);
        assert!("mosaic".parse::<LayoutMode>().is_err());
        assert_eq!("minimal".parse::<LabelStyle>().unwrap(), LabelStyle::Minimal);
        assert!("loud".parse::<LabelStyle>().is_err());
    }

    #[test]
    fn test_bitmap_font_fallback_draws() {
        let typeface = Typeface::bitmap(16.0);
        assert_eq!(typeface.measure("Scene 1"), (7 * 16, 16));

        let mut canvas = RgbImage::new(200, 40);
        typeface.draw(&mut canvas, 2, 2, Rgb([255, 255, 255]), "Scene 1");
        assert!(canvas.pixels().any(|p| p.0 == [255, 255, 255]));

        // glyphs clipped at the canvas edge must not panic
        typeface.draw(&mut canvas, 190, 35, Rgb([255, 0, 0]), "XYZ");
    }

    #[test]
    fn test_unreadable_font_path_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.ttf");
        fs::write(&bogus, b"definitely not a font").unwrap();
        let layout = LayoutConfig {
            font_path: Some(bogus),
            ..LayoutConfig::default()
        };
        // either a system font or the bitmap face, never a panic
        let typeface = Typeface::load(&layout);
        assert!(typeface.measure("00:00:01.000").0 > 0);
    }

    #[test]
    fn test_resize_keeps_aspect() {
        let image: RgbImage = ImageBuffer::new(1920, 1080);
        let thumb = resize_to_width(&image, 320);
        assert_eq!((thumb.width(), thumb.height()), (320, 180));
    }
}
