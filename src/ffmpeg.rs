use std::path::Path;

use ffmpeg::format::{self, Pixel};
use ffmpeg::software::scaling::{Context as ScalingContext, Flags};
use ffmpeg::util::error::EAGAIN;
use ffmpeg::{codec, frame, media, Error, Packet};
use tracing::debug;

use crate::error::{QualityError, Result};
use crate::frame::LumaFrame;

struct Scaler {
    context: ScalingContext,
    source: (Pixel, u32, u32),
}

/// Formats whose first plane already holds 8-bit luma samples.
const fn has_luma8_plane(format: Pixel) -> bool {
    matches!(
        format,
        Pixel::GRAY8
            | Pixel::NV12
            | Pixel::NV21
            | Pixel::YUV410P
            | Pixel::YUV411P
            | Pixel::YUV420P
            | Pixel::YUV422P
            | Pixel::YUV440P
            | Pixel::YUV444P
            | Pixel::YUVJ420P
            | Pixel::YUVJ422P
            | Pixel::YUVJ440P
            | Pixel::YUVJ444P
    )
}

/// Decodes the best video stream of a container with FFmpeg and yields its luma planes.
///
/// 8-bit YUV frames have their luma plane copied as is, matching the y4m reader sample for
/// sample. Other formats are scaled to `GRAY8`. Every frame keeps the dimensions of the first
/// decoded frame, so a mid-stream resolution change does not break pairwise comparisons.
pub struct FfmpegDecoder {
    input: format::context::Input,
    decoder: codec::decoder::Video,
    stream_index: usize,
    scaler: Option<Scaler>,
    output_size: Option<(u32, u32)>,
    input_finished: bool,
    done: bool,
}

impl FfmpegDecoder {
    pub fn open(path: &Path) -> Result<Self> {
        let input = format::input(&path).map_err(|err| QualityError::video_open(path, err))?;

        let (stream_index, decoder) = {
            let stream = input
                .streams()
                .best(media::Type::Video)
                .ok_or_else(|| QualityError::video_open(path, Error::StreamNotFound))?;

            let decoder_context = codec::context::Context::from_parameters(stream.parameters())
                .map_err(|err| QualityError::video_open(path, err))?;

            let decoder = decoder_context
                .decoder()
                .video()
                .map_err(|err| QualityError::video_open(path, err))?;

            (stream.index(), decoder)
        };

        Ok(Self {
            input,
            decoder,
            stream_index,
            scaler: None,
            output_size: None,
            input_finished: false,
            done: false,
        })
    }

    fn feed(&mut self) -> Result<()> {
        loop {
            let mut packet = Packet::empty();

            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }

                    match self.decoder.send_packet(&packet) {
                        Ok(()) => return Ok(()),
                        Err(err) => debug!("Skipping undecodable packet: {err}"),
                    }
                }
                Err(Error::Eof) => {
                    self.decoder
                        .send_eof()
                        .map_err(|err| QualityError::Decode(err.to_string()))?;
                    self.input_finished = true;

                    return Ok(());
                }
                Err(err) => return Err(QualityError::Decode(err.to_string())),
            }
        }
    }

    fn read_frame(&mut self) -> Result<Option<LumaFrame>> {
        let mut decoded = frame::Video::empty();

        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => return self.convert(&decoded).map(Some),
                Err(Error::Eof) => return Ok(None),
                Err(Error::Other { errno }) if errno == EAGAIN => {
                    if self.input_finished {
                        return Ok(None);
                    }
                }
                Err(err) => return Err(QualityError::Decode(err.to_string())),
            }

            self.feed()?;
        }
    }

    fn convert(&mut self, decoded: &frame::Video) -> Result<LumaFrame> {
        let (width, height) = *self
            .output_size
            .get_or_insert((decoded.width(), decoded.height()));

        let to_usize = |value: u32| {
            usize::try_from(value)
                .map_err(|_err| QualityError::Decode(format!("Frame dimension {value} too large")))
        };

        let source = (decoded.format(), decoded.width(), decoded.height());

        if has_luma8_plane(source.0) && (source.1, source.2) == (width, height) {
            return LumaFrame::from_strided(
                to_usize(width)?,
                to_usize(height)?,
                decoded.stride(0),
                decoded.data(0),
            );
        }

        if self
            .scaler
            .as_ref()
            .map_or(true, |scaler| scaler.source != source)
        {
            let context = ScalingContext::get(
                source.0,
                source.1,
                source.2,
                Pixel::GRAY8,
                width,
                height,
                Flags::BILINEAR,
            )
            .map_err(|err| QualityError::Decode(format!("Unable to create scaler: {err}")))?;

            self.scaler = Some(Scaler { context, source });
        }

        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| QualityError::Decode("Scaler unexpectedly missing".to_owned()))?;

        let mut gray = frame::Video::empty();
        scaler
            .context
            .run(decoded, &mut gray)
            .map_err(|err| QualityError::Decode(format!("Unable to convert frame: {err}")))?;

        LumaFrame::from_strided(
            to_usize(width)?,
            to_usize(height)?,
            gray.stride(0),
            gray.data(0),
        )
    }
}

impl Iterator for FfmpegDecoder {
    type Item = Result<LumaFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
