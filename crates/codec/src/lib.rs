#![doc = include_str!("../README.md")]

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use jpegbridge_core::prelude::*;

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod engine;
pub mod header;
pub mod negotiate;
pub mod planes;
pub mod recovery;
pub mod resample;
#[cfg(test)]
pub(crate) mod testing;

pub mod prelude {
    pub use crate::{
        Codec, CodecDescriptor, CodecError, CodecKind, CodecStats,
        config::{DecoderConfig, EncoderConfig},
        decoder::{
            DecodePath, DecodeReport, Downstream, FrameOutcome, JpegDecoder, PoolDownstream,
            TurbojpegDecoder,
        },
        encoder::{JpegEncoder, TurbojpegEncoder},
        header::{FrameHeader, HeaderReader, JpegColorspace, check_bitstream},
        negotiate::{DecoderState, Negotiator, negotiate},
        planes::{LogicalPlane, NativeGeometry, ResolvedPlanes, resolve_planes},
        recovery::ErrorTracker,
        resample::ConversionState,
    };
    pub use jpegbridge_core::prelude::*;
}

/// Encoders/decoders share the same entry-point; the kind distinguishes behavior.
///
/// # Example
/// ```rust
/// use jpegbridge_codec::CodecKind;
///
/// let kind = CodecKind::Decoder;
/// assert_eq!(kind, CodecKind::Decoder);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CodecKind {
    /// Encodes raw frames into JPEG payloads.
    Encoder,
    /// Decodes JPEG payloads into raw frames.
    Decoder,
}

/// Descriptor for a codec implementation.
///
/// # Example
/// ```rust
/// use jpegbridge_codec::{CodecDescriptor, CodecKind};
/// use jpegbridge_core::prelude::FourCc;
///
/// let desc = CodecDescriptor {
///     kind: CodecKind::Decoder,
///     input: FourCc::new(*b"MJPG"),
///     output: FourCc::new(*b"I420"),
///     name: "mjpeg",
///     impl_name: "turbojpeg",
/// };
/// assert_eq!(desc.name, "mjpeg");
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CodecDescriptor {
    /// Encoder or decoder.
    pub kind: CodecKind,
    /// Expected input FourCc.
    pub input: FourCc,
    /// Output FourCc produced. For the decoder this is the preferred format;
    /// the negotiated one is carried in each frame's metadata.
    pub output: FourCc,
    /// Algorithm family.
    pub name: &'static str,
    /// Implementation/backend identifier.
    pub impl_name: &'static str,
}

/// Role interface shared by the decoder and the encoder.
///
/// # Example
/// ```rust,ignore
/// use jpegbridge_codec::prelude::*;
///
/// let decoder = TurbojpegDecoder::new(DecoderConfig::default(), None)?;
/// let raw = decoder.process(jpeg_frame)?;
/// ```
pub trait Codec: Send + Sync + 'static {
    /// Describes what this codec expects and produces.
    fn descriptor(&self) -> &CodecDescriptor;

    /// Process a frame and return the transformed frame.
    fn process(&self, input: FrameLease) -> Result<FrameLease, CodecError>;
}

/// Errors emitted by codecs.
///
/// Soft errors affect a single frame; fatal errors end the session. See
/// [`CodecError::is_fatal`].
///
/// # Example
/// ```rust
/// use jpegbridge_codec::CodecError;
///
/// let err = CodecError::TooManyConsecutiveErrors { observed: 5, max: 5 };
/// assert!(err.is_fatal());
/// assert!(!CodecError::Decode("premature end of data".into()).is_fatal());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Input did not match the expected FourCc.
    #[error("format mismatch: expected {expected}, got {actual}")]
    FormatMismatch {
        /// Expected input FourCc.
        expected: FourCc,
        /// Actual FourCc encountered.
        actual: FourCc,
    },
    /// Buffer too short or missing the JPEG start-of-image marker.
    #[error("invalid jpeg bitstream: {0}")]
    InvalidBitstream(String),
    /// The codec rejected the JPEG header.
    #[error("jpeg header parse failed: {0}")]
    HeaderParse(String),
    /// Downstream accepts none of our formats, or rejected the handshake.
    #[error("format negotiation failed: {0}")]
    NegotiationFailed(String),
    /// The codec rejected the entropy-coded body.
    #[error("jpeg decode failed: {0}")]
    Decode(String),
    /// Scratch or output allocation failed while converting planes.
    #[error("plane conversion failed: {0}")]
    Conversion(String),
    /// The destination frame violates the plane/stride contract.
    #[error("invalid output buffer: {0}")]
    InvalidOutputBuffer(String),
    /// Consecutive per-frame failures reached the configured ceiling.
    #[error("too many consecutive decode errors: {observed} observed, max {max}")]
    TooManyConsecutiveErrors {
        /// Consecutive failures seen, including the last one.
        observed: u32,
        /// Configured ceiling.
        max: u32,
    },
    /// A soft error caused the frame to be dropped; the session continues.
    #[error("frame dropped: {0}")]
    Dropped(#[source] Box<CodecError>),
    /// Backend failure outside the per-frame taxonomy (handle setup, encoding).
    #[error("codec error: {0}")]
    Codec(String),
}

impl CodecError {
    /// Whether the error terminates the session instead of dropping one frame.
    pub fn is_fatal(&self) -> bool {
        match self {
            CodecError::FormatMismatch { .. }
            | CodecError::NegotiationFailed(_)
            | CodecError::InvalidOutputBuffer(_)
            | CodecError::TooManyConsecutiveErrors { .. }
            | CodecError::Codec(_) => true,
            CodecError::InvalidBitstream(_)
            | CodecError::HeaderParse(_)
            | CodecError::Decode(_)
            | CodecError::Conversion(_)
            | CodecError::Dropped(_) => false,
        }
    }

    /// Short stable name of the failure kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CodecError::FormatMismatch { .. } => "format-mismatch",
            CodecError::InvalidBitstream(_) => "invalid-bitstream",
            CodecError::HeaderParse(_) => "header-parse",
            CodecError::NegotiationFailed(_) => "negotiation-failed",
            CodecError::Decode(_) => "decode",
            CodecError::Conversion(_) => "conversion",
            CodecError::InvalidOutputBuffer(_) => "invalid-output-buffer",
            CodecError::TooManyConsecutiveErrors { .. } => "too-many-consecutive-errors",
            CodecError::Dropped(_) => "dropped",
            CodecError::Codec(_) => "codec",
        }
    }
}

/// Basic stats for codec processing.
///
/// # Example
/// ```rust
/// use jpegbridge_codec::CodecStats;
///
/// let stats = CodecStats::default();
/// stats.inc_processed();
/// assert_eq!(stats.processed(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CodecStats {
    processed: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl CodecStats {
    /// Increment processed count.
    pub fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment fatal error count.
    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment dropped frame count.
    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of processed frames.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Snapshot of errors.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Snapshot of dropped frames.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
