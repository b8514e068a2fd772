//! Output format selection against the consumer's capabilities.

use jpegbridge_core::prelude::*;
use tracing::debug;

use crate::CodecError;
use crate::decoder::Downstream;
use crate::header::FrameHeader;

/// Output formats in order of preference.
///
/// Planar I420 first: it is what libjpeg-turbo produces for the common 4:2:0
/// camera stream, so it usually decodes in place.
pub const PREFERENCE: [VideoFormat; 11] = [
    VideoFormat::I420,
    VideoFormat::Rgb,
    VideoFormat::Yv12,
    VideoFormat::Y42b,
    VideoFormat::Y444,
    VideoFormat::Bgr,
    VideoFormat::Rgbx,
    VideoFormat::Bgrx,
    VideoFormat::Xrgb,
    VideoFormat::Xbgr,
    VideoFormat::Gray8,
];

/// Used when the consumer cannot say what it accepts.
pub const FALLBACK_FORMAT: VideoFormat = VideoFormat::I420;

/// Pick the output format for a `width` x `height` stream.
///
/// `allowed` is the consumer's capability set; `None` (query failed) and an
/// empty set both fall back to [`FALLBACK_FORMAT`].
///
/// # Example
/// ```rust
/// use jpegbridge_codec::negotiate::negotiate;
/// use jpegbridge_core::prelude::VideoFormat;
///
/// let picked = negotiate(640, 480, Some(&[VideoFormat::Gray8, VideoFormat::Bgr])).unwrap();
/// assert_eq!(picked, VideoFormat::Bgr);
/// assert_eq!(negotiate(640, 480, None).unwrap(), VideoFormat::I420);
/// ```
pub fn negotiate(
    width: u32,
    height: u32,
    allowed: Option<&[VideoFormat]>,
) -> Result<VideoFormat, CodecError> {
    if width == 0 || height == 0 {
        return Err(CodecError::NegotiationFailed(format!(
            "cannot negotiate for {width}x{height}"
        )));
    }
    let allowed = match allowed {
        Some(allowed) if !allowed.is_empty() => allowed,
        _ => return Ok(FALLBACK_FORMAT),
    };
    PREFERENCE
        .into_iter()
        .find(|format| allowed.contains(format))
        .ok_or_else(|| {
            CodecError::NegotiationFailed(format!("no supported format in {allowed:?}"))
        })
}

/// Format and frame description agreed with the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderState {
    pub format: VideoFormat,
    pub info: VideoInfo,
}

impl DecoderState {
    pub fn width(&self) -> u32 {
        self.info.width()
    }

    pub fn height(&self) -> u32 {
        self.info.height()
    }
}

/// Caches the negotiated [`DecoderState`] and renegotiates on dimension changes.
#[derive(Debug)]
pub struct Negotiator {
    state: Option<DecoderState>,
    negotiations: u64,
    align: usize,
}

impl Negotiator {
    /// `align` is the row alignment requested for frames described by the state.
    pub fn new(align: usize) -> Self {
        Self {
            state: None,
            negotiations: 0,
            align,
        }
    }

    /// Return the state for `header`, negotiating first if none is cached or
    /// the dimensions changed.
    ///
    /// A rejected handshake clears the cache and is returned as
    /// [`CodecError::NegotiationFailed`].
    pub fn ensure<D>(
        &mut self,
        header: &FrameHeader,
        downstream: &mut D,
    ) -> Result<&DecoderState, CodecError>
    where
        D: Downstream + ?Sized,
    {
        let cached = self
            .state
            .as_ref()
            .is_some_and(|s| header.same_dimensions(s.width(), s.height()));
        if !cached {
            self.state = None;
            let state = self.handshake(header, downstream)?;
            self.state = Some(state);
        }
        self.state
            .as_ref()
            .ok_or_else(|| CodecError::NegotiationFailed("no negotiated state".into()))
    }

    fn handshake<D>(
        &mut self,
        header: &FrameHeader,
        downstream: &mut D,
    ) -> Result<DecoderState, CodecError>
    where
        D: Downstream + ?Sized,
    {
        let allowed = downstream.allowed_formats();
        if allowed.is_none() {
            debug!("capability query failed, falling back to {FALLBACK_FORMAT}");
        }
        let format = negotiate(header.width, header.height, allowed.as_deref())?;
        let resolution = header.resolution().ok_or_else(|| {
            CodecError::NegotiationFailed(format!(
                "invalid resolution {}x{}",
                header.width, header.height
            ))
        })?;
        let info = VideoInfo::new(format, resolution, self.align);

        self.negotiations += 1;
        downstream.renegotiate(&info).map_err(|reason| {
            CodecError::NegotiationFailed(format!(
                "consumer rejected {format} at {}x{}: {reason}",
                header.width, header.height
            ))
        })?;
        debug!(
            %format,
            width = header.width,
            height = header.height,
            subsampling = %header.subsampling,
            negotiations = self.negotiations,
            "negotiated output format"
        );
        Ok(DecoderState { format, info })
    }

    pub fn state(&self) -> Option<&DecoderState> {
        self.state.as_ref()
    }

    /// Drop the cached state; the next frame renegotiates.
    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Handshakes attempted so far.
    pub fn negotiations(&self) -> u64 {
        self.negotiations
    }
}
