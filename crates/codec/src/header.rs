//! JPEG header inspection without a full decode.

use jpegbridge_core::prelude::{ChromaSubsampling, ColorSpace, Resolution};
use turbojpeg::{Colorspace, Decompressor, Subsamp};

use crate::CodecError;

/// Largest width or height accepted from a JPEG header.
pub const MAX_DIMENSION: u32 = 32768;

const SOI: [u8; 2] = [0xFF, 0xD8];
const MIN_LEN: usize = 4;

/// Colorspace of the JPEG's coded components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JpegColorspace {
    Rgb,
    YCbCr,
    Gray,
    Cmyk,
    Ycck,
}

impl JpegColorspace {
    /// Color hint for frames decoded from this colorspace.
    pub fn color_hint(self) -> ColorSpace {
        match self {
            JpegColorspace::YCbCr | JpegColorspace::Gray => ColorSpace::Jfif,
            JpegColorspace::Rgb => ColorSpace::Srgb,
            JpegColorspace::Cmyk | JpegColorspace::Ycck => ColorSpace::Unknown,
        }
    }
}

/// Metadata read from a JPEG frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub width: u32,
    pub height: u32,
    pub subsampling: ChromaSubsampling,
    pub colorspace: JpegColorspace,
}

impl FrameHeader {
    pub fn resolution(&self) -> Option<Resolution> {
        Resolution::new(self.width, self.height)
    }

    /// Whether the header describes a `width` x `height` image.
    pub fn same_dimensions(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

/// Reject buffers that cannot be a JPEG image before touching the codec.
///
/// # Example
/// ```rust
/// use jpegbridge_codec::header::check_bitstream;
///
/// assert!(check_bitstream(&[0xFF, 0xD8, 0xFF, 0xE0]).is_ok());
/// assert!(check_bitstream(&[0xFF, 0xD8]).is_err());
/// ```
pub fn check_bitstream(data: &[u8]) -> Result<(), CodecError> {
    if data.len() < MIN_LEN {
        return Err(CodecError::InvalidBitstream(format!(
            "buffer of {} bytes is shorter than the {MIN_LEN}-byte minimum",
            data.len()
        )));
    }
    if data[..2] != SOI {
        return Err(CodecError::InvalidBitstream(format!(
            "missing start-of-image marker (found {:02X} {:02X})",
            data[0], data[1]
        )));
    }
    Ok(())
}

/// Header-only reader with its own decompressor handle.
///
/// Kept apart from the decode handles so header peeks never queue behind a
/// full decode.
pub struct HeaderReader {
    handle: Decompressor,
}

impl HeaderReader {
    pub fn new() -> Result<Self, CodecError> {
        let handle = Decompressor::new()
            .map_err(|e| CodecError::Codec(format!("header handle init failed: {e}")))?;
        Ok(Self { handle })
    }

    /// Read width, height, subsampling and colorspace of one JPEG image.
    pub fn read_header(&mut self, data: &[u8]) -> Result<FrameHeader, CodecError> {
        check_bitstream(data)?;
        let header = self
            .handle
            .read_header(data)
            .map_err(|e| CodecError::HeaderParse(e.to_string()))?;

        let width = u32::try_from(header.width).unwrap_or(u32::MAX);
        let height = u32::try_from(header.height).unwrap_or(u32::MAX);
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(CodecError::HeaderParse(format!(
                "unsupported jpeg dimensions {width}x{height}"
            )));
        }
        let subsampling = from_tj_subsamp(header.subsamp).ok_or_else(|| {
            CodecError::HeaderParse(format!(
                "unsupported chroma subsampling {:?}",
                header.subsamp
            ))
        })?;
        let colorspace = from_tj_colorspace(header.colorspace).ok_or_else(|| {
            CodecError::HeaderParse(format!(
                "unsupported jpeg colorspace {:?}",
                header.colorspace
            ))
        })?;

        Ok(FrameHeader {
            width,
            height,
            subsampling,
            colorspace,
        })
    }
}

#[allow(unreachable_patterns)]
pub(crate) fn from_tj_subsamp(subsamp: Subsamp) -> Option<ChromaSubsampling> {
    match subsamp {
        Subsamp::None => Some(ChromaSubsampling::Yuv444),
        Subsamp::Sub2x1 => Some(ChromaSubsampling::Yuv422),
        Subsamp::Sub2x2 => Some(ChromaSubsampling::Yuv420),
        Subsamp::Gray => Some(ChromaSubsampling::Gray),
        Subsamp::Sub1x2 => Some(ChromaSubsampling::Yuv440),
        _ => None,
    }
}

pub(crate) fn to_tj_subsamp(subsampling: ChromaSubsampling) -> Subsamp {
    match subsampling {
        ChromaSubsampling::Yuv444 => Subsamp::None,
        ChromaSubsampling::Yuv422 => Subsamp::Sub2x1,
        ChromaSubsampling::Yuv420 => Subsamp::Sub2x2,
        ChromaSubsampling::Gray => Subsamp::Gray,
        ChromaSubsampling::Yuv440 => Subsamp::Sub1x2,
    }
}

#[allow(unreachable_patterns)]
fn from_tj_colorspace(colorspace: Colorspace) -> Option<JpegColorspace> {
    match colorspace {
        Colorspace::RGB => Some(JpegColorspace::Rgb),
        Colorspace::YCbCr => Some(JpegColorspace::YCbCr),
        Colorspace::Gray => Some(JpegColorspace::Gray),
        Colorspace::CMYK => Some(JpegColorspace::Cmyk),
        Colorspace::YCCK => Some(JpegColorspace::Ycck),
        _ => None,
    }
}
