//! Local file decoding and encoding using FFmpeg.
//!
//! Sources decode the best video stream to RGB24. Seeking jumps to the
//! keyframe at or before the target and decodes forward, discarding frames
//! that precede it, so the frame returned after a seek is the first frame at
//! or after the requested position. Frame indices are derived from each
//! decoded frame's presentation timestamp.
//!
//! Sinks encode RGB frames to the codec named by a FourCC tag. An unknown tag
//! or a missing encoder is a write failure; no other codec is substituted.

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::{CodecTag, Frame, VideoBackend, VideoProperties, VideoSink, VideoSource};
use crate::error::{AnalysisError, AnalysisResult};

const AV_TIME_BASE: f64 = 1_000_000.0;

/// FFmpeg-backed video I/O.
pub struct FfmpegBackend {
    _private: (),
}

impl FfmpegBackend {
    pub fn new() -> AnalysisResult<Self> {
        ffmpeg::init().map_err(|e| AnalysisError::io("ffmpeg", format!("initialize ffmpeg: {e}")))?;
        Ok(Self { _private: () })
    }
}

impl VideoBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn open(&self, path: &Path) -> AnalysisResult<Box<dyn VideoSource>> {
        Ok(Box::new(FfmpegSource::open(path)?))
    }

    fn create_writer(
        &self,
        path: &Path,
        codec: CodecTag,
        fps: f64,
        width: u32,
        height: u32,
    ) -> AnalysisResult<Box<dyn VideoSink>> {
        Ok(Box::new(FfmpegSink::create(path, codec, fps, width, height)?))
    }
}

struct FfmpegSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    props: VideoProperties,
    /// After a seek, frames earlier than this (seconds) are decoded and dropped.
    skip_until: Option<f64>,
    eof_sent: bool,
    next_index: u64,
}

impl FfmpegSource {
    fn open(path: &Path) -> AnalysisResult<Self> {
        let input = ffmpeg::format::input(&path)
            .map_err(|e| AnalysisError::io(path, format!("open input: {e}")))?;

        let (stream_index, time_base, fps, stream_frames, stream_duration, parameters) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| AnalysisError::io(path, "file has no video track"))?;
            (
                stream.index(),
                stream.time_base(),
                f64::from(stream.avg_frame_rate()),
                stream.frames(),
                stream.duration(),
                stream.parameters(),
            )
        };

        let context = ffmpeg::codec::context::Context::from_parameters(parameters)
            .map_err(|e| AnalysisError::io(path, format!("load decoder parameters: {e}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| AnalysisError::io(path, format!("open video decoder: {e}")))?;

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| AnalysisError::io(path, format!("create scaler: {e}")))?;

        if !(fps.is_finite() && fps > 0.0) {
            return Err(AnalysisError::io(path, format!("invalid frame rate {fps}")));
        }

        let duration_secs = if stream_duration > 0 {
            stream_duration as f64 * f64::from(time_base)
        } else if input.duration() > 0 {
            input.duration() as f64 / AV_TIME_BASE
        } else {
            0.0
        };
        let frame_count = if stream_frames > 0 {
            stream_frames as u64
        } else {
            (duration_secs * fps).round() as u64
        };
        if frame_count == 0 {
            return Err(AnalysisError::io(path, "video reports zero frames"));
        }

        let props = VideoProperties {
            fps,
            frame_count,
            width: decoder.width(),
            height: decoder.height(),
        };
        log::info!(
            "FfmpegSource: opened {} ({}x{}, {:.2} fps, {} frames)",
            path.display(),
            props.width,
            props.height,
            props.fps,
            props.frame_count
        );

        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            time_base,
            decoder,
            scaler,
            props,
            skip_until: None,
            eof_sent: false,
            next_index: 0,
        })
    }

    fn seek_seconds(&mut self, seconds: f64) -> AnalysisResult<()> {
        let target = (seconds.max(0.0) * AV_TIME_BASE) as i64;
        self.input
            .seek(target, ..target)
            .map_err(|e| AnalysisError::io(&self.path, format!("seek to {seconds:.3}s: {e}")))?;
        self.decoder.flush();
        self.eof_sent = false;
        // Half a frame of slack absorbs timestamp rounding.
        self.skip_until = Some(seconds - 0.5 / self.props.fps);
        self.next_index = self.props.frame_at(seconds);
        Ok(())
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        for (stream, packet) in self.input.packets() {
            if stream.index() == self.stream_index {
                return Some(packet);
            }
        }
        None
    }

    fn to_frame(&mut self, decoded: &ffmpeg::frame::Video, index: u64) -> AnalysisResult<Frame> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .map_err(|e| AnalysisError::io(&self.path, format!("scale frame to RGB: {e}")))?;
        let image = frame_to_image(&rgb)
            .ok_or_else(|| AnalysisError::io(&self.path, "decoded frame row is out of bounds"))?;
        Ok(Frame { index, image })
    }
}

impl VideoSource for FfmpegSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn properties(&self) -> VideoProperties {
        self.props
    }

    fn seek_frame(&mut self, index: u64) -> AnalysisResult<()> {
        let seconds = self.props.timestamp_of(index);
        self.seek_seconds(seconds)
    }

    fn seek_millis(&mut self, millis: u64) -> AnalysisResult<()> {
        self.seek_seconds(millis as f64 / 1000.0)
    }

    fn read(&mut self) -> AnalysisResult<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let seconds = decoded
                    .timestamp()
                    .or_else(|| decoded.pts())
                    .map(|ts| ts as f64 * f64::from(self.time_base));
                if let Some(skip_until) = self.skip_until {
                    if seconds.is_some_and(|s| s < skip_until) {
                        continue;
                    }
                    self.skip_until = None;
                }
                let index = seconds
                    .map(|s| (s * self.props.fps).round().max(0.0) as u64)
                    .unwrap_or(self.next_index);
                self.next_index = index + 1;
                return self.to_frame(&decoded, index).map(Some);
            }

            if self.eof_sent {
                return Ok(None);
            }

            match self.next_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .map_err(|e| AnalysisError::io(&self.path, format!("decode packet: {e}")))?,
                None => {
                    self.decoder
                        .send_eof()
                        .map_err(|e| AnalysisError::io(&self.path, format!("flush decoder: {e}")))?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

struct FfmpegSink {
    path: PathBuf,
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
    next_pts: i64,
}

impl FfmpegSink {
    fn create(
        path: &Path,
        tag: CodecTag,
        fps: f64,
        width: u32,
        height: u32,
    ) -> AnalysisResult<Self> {
        let codec_id = codec_id_for(tag)
            .ok_or_else(|| AnalysisError::write(path, format!("unsupported codec tag '{tag}'")))?;
        let codec = ffmpeg::encoder::find(codec_id).ok_or_else(|| {
            AnalysisError::write(path, format!("no encoder available for codec tag '{tag}'"))
        })?;

        let mut output = ffmpeg::format::output(&path)
            .map_err(|e| AnalysisError::write(path, format!("open output: {e}")))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let frame_rate = ffmpeg::Rational::from(fps);
        let time_base = frame_rate.invert();

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| AnalysisError::write(path, format!("create encoder: {e}")))?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(ffmpeg::format::Pixel::YUV420P);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(frame_rate));
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder.open_as(codec).map_err(|e| {
            AnalysisError::write(path, format!("open encoder for codec tag '{tag}': {e}"))
        })?;

        let stream_index = {
            let mut stream = output
                .add_stream(codec)
                .map_err(|e| AnalysisError::write(path, format!("add output stream: {e}")))?;
            stream.set_time_base(time_base);
            stream.set_parameters(&encoder);
            stream.index()
        };
        output
            .write_header()
            .map_err(|e| AnalysisError::write(path, format!("write header: {e}")))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .unwrap_or(time_base);

        let scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::format::Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| AnalysisError::write(path, format!("create scaler: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base: time_base,
            stream_time_base,
            width,
            height,
            next_pts: 0,
        })
    }

    fn drain_packets(&mut self) -> AnalysisResult<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|e| AnalysisError::write(&self.path, format!("write packet: {e}")))?;
        }
        Ok(())
    }
}

impl VideoSink for FfmpegSink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, image: &RgbImage) -> AnalysisResult<()> {
        if image.width() != self.width || image.height() != self.height {
            return Err(AnalysisError::write(
                &self.path,
                format!(
                    "frame size {}x{} does not match encoder {}x{}",
                    image.width(),
                    image.height(),
                    self.width,
                    self.height
                ),
            ));
        }

        let mut rgb = ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGB24, self.width, self.height);
        let stride = rgb.stride(0);
        unpack_rows(image, rgb.data_mut(0), stride);

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .map_err(|e| AnalysisError::write(&self.path, format!("convert frame: {e}")))?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv)
            .map_err(|e| AnalysisError::write(&self.path, format!("encode frame: {e}")))?;
        self.drain_packets()
    }

    fn finish(mut self: Box<Self>) -> AnalysisResult<()> {
        self.encoder
            .send_eof()
            .map_err(|e| AnalysisError::write(&self.path, format!("flush encoder: {e}")))?;
        self.drain_packets()?;
        self.output
            .write_trailer()
            .map_err(|e| AnalysisError::write(&self.path, format!("write trailer: {e}")))
    }
}

fn codec_id_for(tag: CodecTag) -> Option<ffmpeg::codec::Id> {
    match &tag.bytes() {
        b"avc1" | b"H264" | b"h264" | b"X264" | b"x264" => Some(ffmpeg::codec::Id::H264),
        b"hvc1" | b"hev1" | b"HEVC" => Some(ffmpeg::codec::Id::HEVC),
        b"mp4v" | b"MP4V" => Some(ffmpeg::codec::Id::MPEG4),
        b"MJPG" | b"mjpg" => Some(ffmpeg::codec::Id::MJPEG),
        _ => None,
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Option<RgbImage> {
    pack_rows(frame.data(0), frame.stride(0), frame.width(), frame.height())
}

/// Copies `height` rows of packed RGB out of a buffer whose rows are
/// `stride` bytes apart. `None` when the buffer is too short.
fn pack_rows(data: &[u8], stride: usize, width: u32, height: u32) -> Option<RgbImage> {
    let row_bytes = width as usize * 3;
    if stride < row_bytes {
        return None;
    }
    if stride == row_bytes {
        let len = row_bytes * height as usize;
        return RgbImage::from_raw(width, height, data.get(..len)?.to_vec());
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(data.get(start..start + row_bytes)?);
    }
    RgbImage::from_raw(width, height, pixels)
}

/// Inverse of `pack_rows`: spreads packed rows into a strided buffer.
fn unpack_rows(image: &RgbImage, data: &mut [u8], stride: usize) {
    let row_bytes = image.width() as usize * 3;
    for (row, chunk) in image.as_raw().chunks_exact(row_bytes).enumerate() {
        let start = row * stride;
        data[start..start + row_bytes].copy_from_slice(chunk);
    }
}
