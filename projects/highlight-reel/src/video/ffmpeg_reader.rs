use super::{FrameRate, MediaError, MediaResult, SourceVideo, VideoReader};
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::Path;

use ffmpeg_next::ffi;

fn init() -> MediaResult<()> {
    ffmpeg_next::init().map_err(|e| MediaError::Probe(format!("FFmpeg init failed: {}", e)))?;
    // Failures surface through return codes
    ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Error);
    Ok(())
}

/// Read frame rate, duration and frame count from container metadata.
pub fn probe_video(path: &Path) -> MediaResult<SourceVideo> {
    init()?;

    if !path.exists() {
        return Err(MediaError::Probe(format!(
            "video file not found: {}",
            path.display()
        )));
    }

    let input_ctx = ffmpeg_next::format::input(path)
        .map_err(|e| MediaError::Probe(format!("failed to open {}: {}", path.display(), e)))?;
    let stream = input_ctx
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or_else(|| MediaError::Probe(format!("no video stream in {}", path.display())))?;

    let avg = stream.avg_frame_rate();
    let mut frame_rate = FrameRate::new(avg.numerator(), avg.denominator());
    if !frame_rate.is_valid() {
        let real = stream.rate();
        frame_rate = FrameRate::new(real.numerator(), real.denominator());
    }
    if !frame_rate.is_valid() {
        return Err(MediaError::Probe(format!(
            "could not determine frame rate of {}",
            path.display()
        )));
    }

    let duration_secs = if input_ctx.duration() > 0 {
        input_ctx.duration() as f64 / ffi::AV_TIME_BASE as f64
    } else {
        let tb = stream.time_base();
        stream.duration().max(0) as f64 * tb.numerator() as f64 / tb.denominator().max(1) as f64
    };

    let frame_count = stream.frames().max(0) as u64;

    tracing::info!(
        "Probed {}: duration={:.2}s, fps={}/{} ({:.3}), frames={}",
        path.display(),
        duration_secs,
        frame_rate.num,
        frame_rate.den,
        frame_rate.as_f64(),
        frame_count
    );

    Ok(SourceVideo {
        path: path.to_path_buf(),
        duration_secs,
        frame_rate,
        frame_count,
    })
}

/// Sequential RGB frame reader backed by ffmpeg-next.
pub struct FfmpegReader {
    input_ctx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    video_stream_index: usize,
    /// Lazily created on first frame (source format is only known then).
    scaler: Option<ffmpeg_next::software::scaling::Context>,
    width: u32,
    height: u32,
    total_frames: usize,
    /// Persistent packet object to avoid allocations.
    reuse_packet: ffmpeg_next::codec::packet::Packet,
    /// Whether we've sent EOF to the decoder.
    eof_sent: bool,
}

impl FfmpegReader {
    pub fn new(path: &Path) -> Result<Self> {
        init()?;

        if !path.exists() {
            return Err(anyhow!("Video file not found: {}", path.display()));
        }

        let input_ctx = ffmpeg_next::format::input(path).context("Failed to open video file")?;

        let video_stream = input_ctx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| anyhow!("No video stream found in {}", path.display()))?;

        let video_stream_index = video_stream.index();
        let total_frames = video_stream.frames().max(0) as usize;

        let decoder_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(video_stream.parameters())
                .context("Failed to create decoder context")?;
        let decoder = decoder_ctx
            .decoder()
            .video()
            .context("Failed to open video decoder")?;

        let width = decoder.width();
        let height = decoder.height();

        tracing::info!(
            "FfmpegReader: opened {} ({}x{}, {} frames)",
            path.display(),
            width,
            height,
            total_frames
        );

        Ok(Self {
            input_ctx,
            decoder,
            video_stream_index,
            scaler: None,
            width,
            height,
            total_frames,
            reuse_packet: ffmpeg_next::codec::packet::Packet::empty(),
            eof_sent: false,
        })
    }

    /// Pull the next decoded frame, feeding packets as needed.
    /// Returns `Ok(false)` once the decoder is drained.
    fn decode_loop(&mut self, target_frame: &mut ffmpeg_next::util::frame::Video) -> Result<bool> {
        loop {
            match self.decoder.receive_frame(target_frame) {
                Ok(()) => return Ok(true),
                Err(ffmpeg_next::Error::Other { errno: ffi::EAGAIN }) => {
                    if self.eof_sent {
                        return Ok(false);
                    }
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(false),
                Err(e) => return Err(anyhow!("Decoder error: {}", e)),
            }

            let mut found_packet = false;
            while self.reuse_packet.read(&mut self.input_ctx).is_ok() {
                if self.reuse_packet.stream() == self.video_stream_index {
                    self.decoder
                        .send_packet(&self.reuse_packet)
                        .context("Failed to send packet to decoder")?;
                    found_packet = true;
                    break;
                }
            }

            if !found_packet {
                self.decoder
                    .send_eof()
                    .context("Failed to send EOF to decoder")?;
                self.eof_sent = true;
            }
        }
    }

    fn get_or_create_scaler(
        &mut self,
        src_format: ffmpeg_next::format::Pixel,
    ) -> Result<&mut ffmpeg_next::software::scaling::Context> {
        if self.scaler.is_none() {
            let scaler = ffmpeg_next::software::scaling::Context::get(
                src_format,
                self.width,
                self.height,
                ffmpeg_next::format::Pixel::RGB24,
                self.width,
                self.height,
                ffmpeg_next::software::scaling::Flags::BILINEAR,
            )
            .context("Failed to create scaler")?;
            self.scaler = Some(scaler);
        }
        self.scaler
            .as_mut()
            .ok_or_else(|| anyhow!("Scaler unavailable"))
    }
}

/// Copy an RGB24 frame into an owned image, dropping row padding.
fn rgb_frame_to_image(frame: &ffmpeg_next::util::frame::Video) -> Result<RgbImage> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let data = frame.data(0);
    let stride = frame.stride(0);

    let mut buffer = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row_start = y * stride;
        let row = data
            .get(row_start..row_start + width * 3)
            .ok_or_else(|| anyhow!("Frame buffer shorter than expected"))?;
        buffer.extend_from_slice(row);
    }

    RgbImage::from_raw(width as u32, height as u32, buffer)
        .ok_or_else(|| anyhow!("Failed to create RgbImage from frame data"))
}

impl VideoReader for FfmpegReader {
    fn frame_count(&self) -> usize {
        self.total_frames
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg_next::util::frame::Video::empty();
        if !self.decode_loop(&mut decoded)? {
            return Ok(None);
        }

        let scaler = self.get_or_create_scaler(decoded.format())?;
        let mut rgb = ffmpeg_next::util::frame::Video::empty();
        scaler.run(&decoded, &mut rgb).context("Scaler failed")?;

        rgb_frame_to_image(&rgb).map(Some)
    }
}
