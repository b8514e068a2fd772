//! JPEG decode session: header, negotiation, decode and error accounting for
//! one continuous stream of frames.

use std::sync::Mutex;

use jpegbridge_core::prelude::*;
use tracing::{debug, error, info, warn};

use crate::config::DecoderConfig;
use crate::engine::{DecodeEngine, validate_destination};
use crate::header::{FrameHeader, HeaderReader};
use crate::negotiate::{DecoderState, FALLBACK_FORMAT, Negotiator};
use crate::planes::resolve_planes;
use crate::recovery::ErrorTracker;
use crate::resample::{ConversionState, convert_native};
use crate::{Codec, CodecDescriptor, CodecError, CodecKind, CodecStats};

/// Consumer of decoded frames.
///
/// Answers capability queries, accepts or refuses a format, and supplies the
/// buffers frames are decoded into.
pub trait Downstream {
    /// Formats the consumer accepts, `None` if it cannot tell.
    fn allowed_formats(&mut self) -> Option<Vec<VideoFormat>>;

    /// Announce the format and geometry of the frames that follow.
    fn renegotiate(&mut self, info: &VideoInfo) -> Result<(), String>;

    /// Supply a frame to decode into.
    fn allocate(&mut self, info: &VideoInfo) -> Result<FrameLease, String>;
}

/// [`Downstream`] backed by a [`BufferPool`], with a fixed capability list.
pub struct PoolDownstream {
    pool: BufferPool,
    formats: Option<Vec<VideoFormat>>,
    align: usize,
    current: Option<VideoInfo>,
}

impl PoolDownstream {
    /// `formats` of `None` makes capability queries fail (and negotiation fall back).
    pub fn new(formats: Option<Vec<VideoFormat>>, align: usize) -> Self {
        Self::with_pool(formats, align, BufferPool::with_limits(2, 1 << 20, 4))
    }

    pub fn with_pool(formats: Option<Vec<VideoFormat>>, align: usize, pool: BufferPool) -> Self {
        Self {
            pool,
            formats,
            align,
            current: None,
        }
    }

    /// Frame description accepted by the last successful handshake.
    pub fn current(&self) -> Option<&VideoInfo> {
        self.current.as_ref()
    }
}

impl Downstream for PoolDownstream {
    fn allowed_formats(&mut self) -> Option<Vec<VideoFormat>> {
        self.formats.clone()
    }

    fn renegotiate(&mut self, info: &VideoInfo) -> Result<(), String> {
        if let Some(formats) = &self.formats
            && !formats.is_empty()
            && !formats.contains(&info.format)
        {
            return Err(format!("{} not in {formats:?}", info.format));
        }
        self.current = Some(info.clone());
        Ok(())
    }

    fn allocate(&mut self, info: &VideoInfo) -> Result<FrameLease, String> {
        let info = VideoInfo::new(info.format, info.resolution, self.align);
        FrameLease::for_info(&self.pool, &info, 0).map_err(|e| e.to_string())
    }
}

/// How a frame's pixels reached the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePath {
    /// One interleaved plane (RGB family or GRAY8).
    Packed,
    /// YUV decoded in place, each plane through its own pointer and stride.
    Direct,
    /// Decoded to scratch and copied; chroma geometry matched but the
    /// destination planes do not cover libjpeg-turbo's padded plane sizes.
    Staged,
    /// Decoded to scratch and chroma resampled.
    Resampled,
}

/// Per-frame details for a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeReport {
    pub header: FrameHeader,
    pub format: VideoFormat,
    pub path: DecodePath,
}

/// Result of handing one compressed frame to the session.
#[derive(Debug)]
pub enum FrameOutcome {
    Decoded {
        frame: FrameLease,
        report: DecodeReport,
    },
    /// The frame was skipped; the session continues.
    Dropped {
        error: CodecError,
        consecutive: u32,
    },
}

impl FrameOutcome {
    pub fn is_decoded(&self) -> bool {
        matches!(self, FrameOutcome::Decoded { .. })
    }
}

/// Decode session for one stream.
///
/// Frames must be fed in order. Soft failures drop the frame; once
/// [`DecoderConfig::max_errors`] consecutive frames fail the session returns
/// [`CodecError::TooManyConsecutiveErrors`].
pub struct JpegDecoder {
    config: DecoderConfig,
    reader: HeaderReader,
    engine: DecodeEngine,
    negotiator: Negotiator,
    tracker: ErrorTracker,
}

impl JpegDecoder {
    pub fn new(config: DecoderConfig) -> Result<Self, CodecError> {
        let config = config.sanitized();
        let decoder = Self {
            reader: HeaderReader::new()?,
            engine: DecodeEngine::new()?,
            negotiator: Negotiator::new(config.output_align),
            tracker: ErrorTracker::new(config.max_errors),
            config,
        };
        info!(
            max_errors = config.max_errors,
            output_align = config.output_align,
            "jpeg decoder session created"
        );
        Ok(decoder)
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode one compressed frame into a buffer supplied by `downstream`.
    ///
    /// Returns `Err` only for fatal errors; per-frame failures come back as
    /// [`FrameOutcome::Dropped`].
    pub fn handle_frame<D>(
        &mut self,
        data: &[u8],
        timestamp: u64,
        downstream: &mut D,
    ) -> Result<FrameOutcome, CodecError>
    where
        D: Downstream + ?Sized,
    {
        match self.decode_frame(data, timestamp, downstream) {
            Ok((frame, report)) => {
                self.tracker.record_success();
                Ok(FrameOutcome::Decoded { frame, report })
            }
            Err(err) if err.is_fatal() => {
                error!(kind = err.kind(), error = %err, "fatal decoder error");
                Err(err)
            }
            Err(err) => match self.tracker.record_failure() {
                Ok(consecutive) => {
                    warn!(
                        kind = err.kind(),
                        error = %err,
                        consecutive,
                        max = self.tracker.max(),
                        "dropping frame"
                    );
                    Ok(FrameOutcome::Dropped {
                        error: err,
                        consecutive,
                    })
                }
                Err(fatal) => {
                    error!(kind = err.kind(), cause = %err, error = %fatal, "giving up on stream");
                    Err(fatal)
                }
            },
        }
    }

    fn decode_frame<D>(
        &mut self,
        data: &[u8],
        timestamp: u64,
        downstream: &mut D,
    ) -> Result<(FrameLease, DecodeReport), CodecError>
    where
        D: Downstream + ?Sized,
    {
        let header = self.reader.read_header(data)?;
        let (format, info) = {
            let state = self.negotiator.ensure(&header, downstream)?;
            (state.format, state.info.clone())
        };

        let mut frame = downstream
            .allocate(&info)
            .map_err(|e| CodecError::Conversion(format!("output allocation failed: {e}")))?;
        frame.meta_mut().timestamp = timestamp;

        let resolved = resolve_planes(format, header.width, header.height, header.subsampling);
        validate_destination(&frame, &resolved)?;

        let conversion = ConversionState::default().plan(&resolved);
        let (path, resampled) = if !format.is_yuv() {
            self.engine
                .decode_packed(data, &header, format, &mut frame)?;
            (DecodePath::Packed, false)
        } else if conversion == ConversionState::NeedsDirectDecode
            && self.engine.fits_in_place(&header, &resolved, &frame)
        {
            self.engine
                .decode_planar_direct(data, &header, &resolved, &mut frame)?;
            (DecodePath::Direct, false)
        } else {
            let native = self.engine.decode_native(data, &header)?;
            if convert_native(&native, &resolved, &mut frame)? {
                (DecodePath::Resampled, true)
            } else {
                (DecodePath::Staged, false)
            }
        };
        let conversion = conversion.finish(resampled)?;
        debug!(
            %format,
            ?path,
            ?conversion,
            subsampling = %header.subsampling,
            width = header.width,
            height = header.height,
            "decoded frame"
        );
        Ok((
            frame,
            DecodeReport {
                header,
                format,
                path,
            },
        ))
    }

    /// Current run of failed frames.
    pub fn consecutive_errors(&self) -> u32 {
        self.tracker.consecutive()
    }

    /// Handshakes performed with downstream so far.
    pub fn negotiations(&self) -> u64 {
        self.negotiator.negotiations()
    }

    pub fn state(&self) -> Option<&DecoderState> {
        self.negotiator.state()
    }

    /// Forget the negotiated format and the error run, e.g. after a seek.
    pub fn reset(&mut self) {
        self.negotiator.reset();
        self.tracker.record_success();
        info!("jpeg decoder session reset");
    }
}

/// [`Codec`] adapter: JPEG frames in, frames in the negotiated raw format out.
///
/// Dropped frames surface as [`CodecError::Dropped`].
pub struct TurbojpegDecoder {
    descriptor: CodecDescriptor,
    session: Mutex<JpegDecoder>,
    downstream: Mutex<PoolDownstream>,
    stats: CodecStats,
}

impl TurbojpegDecoder {
    /// `formats` is the consumer capability list, `None` to accept the fallback.
    pub fn new(
        config: DecoderConfig,
        formats: Option<Vec<VideoFormat>>,
    ) -> Result<Self, CodecError> {
        let config = config.sanitized();
        let output = formats
            .as_deref()
            .and_then(|f| crate::negotiate::negotiate(1, 1, Some(f)).ok())
            .unwrap_or(FALLBACK_FORMAT);
        Ok(Self {
            descriptor: CodecDescriptor {
                kind: CodecKind::Decoder,
                input: MJPG,
                output: output.fourcc(),
                name: "mjpeg",
                impl_name: "turbojpeg",
            },
            session: Mutex::new(JpegDecoder::new(config)?),
            downstream: Mutex::new(PoolDownstream::new(formats, config.output_align)),
            stats: CodecStats::default(),
        })
    }

    pub fn stats(&self) -> &CodecStats {
        &self.stats
    }
}

impl Codec for TurbojpegDecoder {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn process(&self, input: FrameLease) -> Result<FrameLease, CodecError> {
        let code = input.meta().format.code;
        if code != MJPG && code != JPEG {
            return Err(CodecError::FormatMismatch {
                expected: self.descriptor.input,
                actual: code,
            });
        }
        let plane = input
            .planes()
            .into_iter()
            .next()
            .ok_or_else(|| CodecError::InvalidBitstream("jpeg frame missing plane".into()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| CodecError::Codec("decoder session lock poisoned".into()))?;
        let mut downstream = self
            .downstream
            .lock()
            .map_err(|_| CodecError::Codec("downstream lock poisoned".into()))?;

        match session.handle_frame(plane.data(), input.meta().timestamp, &mut *downstream) {
            Ok(FrameOutcome::Decoded { frame, .. }) => {
                self.stats.inc_processed();
                Ok(frame)
            }
            Ok(FrameOutcome::Dropped { error, .. }) => {
                self.stats.inc_dropped();
                Err(CodecError::Dropped(Box::new(error)))
            }
            Err(err) => {
                self.stats.inc_errors();
                Err(err)
            }
        }
    }
}
