use ffmpeg_next as ffmpeg;
use anyhow::{Context, Result};
use image::RgbImage;
use std::path::Path;
use tracing::debug;

/// Frame rate assumed when the container does not report one.
const DEFAULT_FPS: f64 = 30.0;

/// Basic facts about the best video stream of a file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Container duration in seconds, 0.0 when unknown.
    pub duration: f64,
}

/// Video processor, owns the demuxer and decoder of one input file.
///
/// The handle is released when the processor is dropped.
pub struct VideoProcessor {
    ictx: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    info: VideoInfo,
}

impl VideoProcessor {
    pub fn open(input_path: impl AsRef<Path>) -> Result<Self> {
        ffmpeg::init().context("failed to initialise FFmpeg")?;
        // only surface real errors from libav*
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);

        let input_path = input_path.as_ref();
        let ictx = ffmpeg::format::input(&input_path)
            .with_context(|| format!("failed to open video file {}", input_path.display()))?;

        let (stream_index, time_base, fps, decoder) = {
            let stream = ictx
                .streams()
                .best(ffmpeg::media::Type::Video)
                .context("no video stream found")?;

            let fps = rational_to_fps(stream.avg_frame_rate())
                .or_else(|| rational_to_fps(stream.rate()))
                .unwrap_or(DEFAULT_FPS);

            let decoder_context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .context("failed to create decoder context")?;
            let decoder = decoder_context
                .decoder()
                .video()
                .context("failed to create video decoder")?;

            (stream.index(), stream.time_base(), fps, decoder)
        };

        let duration = if ictx.duration() > 0 {
            ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64
        } else {
            0.0
        };

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .context("failed to create scaler")?;

        let info = VideoInfo {
            fps,
            width: decoder.width(),
            height: decoder.height(),
            duration,
        };
        debug!(
            "opened {}: {}x{} @ {:.3} fps, {:.2}s",
            input_path.display(),
            info.width,
            info.height,
            info.fps,
            info.duration
        );

        Ok(Self {
            ictx,
            stream_index,
            time_base,
            decoder,
            scaler,
            info,
        })
    }

    pub fn info(&self) -> VideoInfo {
        self.info
    }

    /// Decode every frame from the current position to the end of the stream.
    ///
    /// Frames are downscaled to at most `max_width` pixels wide and handed to
    /// `on_frame` together with their zero-based frame number. Returns the
    /// number of decoded frames. Any decode error aborts the pass.
    pub fn for_each_frame<F>(&mut self, max_width: u32, mut on_frame: F) -> Result<u64>
    where
        F: FnMut(u64, &RgbImage),
    {
        let (width, height) = scaled_dimensions(self.info.width, self.info.height, max_width);
        let mut scaler = ffmpeg::software::scaling::Context::get(
            self.decoder.format(),
            self.info.width,
            self.info.height,
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::Flags::FAST_BILINEAR,
        )
        .context("failed to create scaler")?;

        let mut next_frame = 0u64;
        let stream_index = self.stream_index;

        for (stream, packet) in self.ictx.packets() {
            if stream.index() != stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .with_context(|| format!("failed to decode packet near frame {}", next_frame))?;
            receive_frames(&mut self.decoder, &mut scaler, &mut next_frame, &mut on_frame)?;
        }

        self.decoder.send_eof().context("failed to flush decoder")?;
        receive_frames(&mut self.decoder, &mut scaler, &mut next_frame, &mut on_frame)?;

        Ok(next_frame)
    }

    /// Seek to `frame_number` and decode a single full-resolution frame.
    ///
    /// The demuxer seeks to the nearest keyframe before the target and decodes
    /// forward; if the stream ends first, the last decoded frame is returned.
    pub fn read_frame(&mut self, frame_number: u64) -> Result<RgbImage> {
        let target_secs = frame_number as f64 / self.info.fps;
        let timestamp = (target_secs * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
        let tolerance = 0.5 / self.info.fps;
        let time_base = f64::from(self.time_base.numerator()) / f64::from(self.time_base.denominator());

        self.ictx
            .seek(timestamp, ..timestamp)
            .with_context(|| format!("failed to seek to frame {}", frame_number))?;
        self.decoder.flush();

        let stream_index = self.stream_index;
        let mut decoded = ffmpeg::frame::Video::empty();
        let mut last_seen: Option<ffmpeg::frame::Video> = None;
        let reached = |frame: &ffmpeg::frame::Video| {
            frame
                .timestamp()
                .map(|ts| ts as f64 * time_base + tolerance >= target_secs)
                .unwrap_or(true)
        };

        for (stream, packet) in self.ictx.packets() {
            if stream.index() != stream_index {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                // damaged packet, keep reading
                continue;
            }
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if reached(&decoded) {
                    return convert_frame(&mut self.scaler, &decoded);
                }
                last_seen = Some(decoded.clone());
            }
        }

        if self.decoder.send_eof().is_ok() {
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if reached(&decoded) {
                    return convert_frame(&mut self.scaler, &decoded);
                }
                last_seen = Some(decoded.clone());
            }
        }

        match last_seen {
            Some(frame) => convert_frame(&mut self.scaler, &frame),
            None => anyhow::bail!("no frame decoded at frame {}", frame_number),
        }
    }
}

fn receive_frames<F>(
    decoder: &mut ffmpeg::codec::decoder::Video,
    scaler: &mut ffmpeg::software::scaling::Context,
    next_frame: &mut u64,
    on_frame: &mut F,
) -> Result<()>
where
    F: FnMut(u64, &RgbImage),
{
    let mut decoded = ffmpeg::frame::Video::empty();
    while decoder.receive_frame(&mut decoded).is_ok() {
        let image = convert_frame(scaler, &decoded)?;
        on_frame(*next_frame, &image);
        *next_frame += 1;
    }
    Ok(())
}

fn convert_frame(
    scaler: &mut ffmpeg::software::scaling::Context,
    frame: &ffmpeg::frame::Video,
) -> Result<RgbImage> {
    let mut rgb_frame = ffmpeg::frame::Video::empty();
    scaler.run(frame, &mut rgb_frame).context("failed to convert frame to RGB")?;
    frame_to_image(&rgb_frame)
}

/// Copy a packed RGB24 frame into an `RgbImage`, dropping the row padding.
fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let stride = frame.stride(0);
    let data = frame.data(0);
    let row_len = width as usize * 3;

    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        let row = data
            .get(start..start + row_len)
            .context("frame buffer shorter than expected")?;
        pixels.extend_from_slice(row);
    }

    RgbImage::from_raw(width, height, pixels).context("failed to build image from frame")
}

fn rational_to_fps(rate: ffmpeg::Rational) -> Option<f64> {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        Some(f64::from(rate.numerator()) / f64::from(rate.denominator()))
    } else {
        None
    }
}

/// Fit `width` x `height` into `max_width`, keeping the aspect ratio.
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || width == 0 {
        return (width, height);
    }
    let scaled_height = (u64::from(height) * u64::from(max_width) / u64::from(width)).max(1);
    (max_width, scaled_height as u32)
}
