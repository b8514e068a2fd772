//! Nearest-neighbor chroma fallback for frames whose native subsampling
//! differs from the negotiated format.

use jpegbridge_core::prelude::*;

use crate::CodecError;
use crate::engine::NativePlanes;
use crate::planes::{LogicalPlane, ResolvedPlanes};

/// Chroma value for neutral (colorless) samples.
pub const NEUTRAL_CHROMA: u8 = 128;

/// Per-frame conversion progress.
///
/// Starts at `NeedsDirectDecode`. A frame whose chroma does not match the
/// destination moves through `NeedsConversion`; every successful frame ends
/// in `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversionState {
    #[default]
    NeedsDirectDecode,
    NeedsConversion,
    Done,
}

impl ConversionState {
    /// Advance from `NeedsDirectDecode` once the destination planes are known.
    pub fn plan(self, resolved: &ResolvedPlanes) -> Self {
        match self {
            ConversionState::NeedsDirectDecode if resolved.needs_conversion => {
                ConversionState::NeedsConversion
            }
            other => other,
        }
    }

    /// Close out a frame. `resampled` is what [`convert_native`] reported, or
    /// `false` when nothing was converted.
    ///
    /// The plan and the work done must agree: chroma planned for resampling
    /// that was only copied (or the reverse) is a [`CodecError::Conversion`].
    pub fn finish(self, resampled: bool) -> Result<Self, CodecError> {
        match (self, resampled) {
            (ConversionState::NeedsConversion, false) => Err(CodecError::Conversion(
                "chroma planned for resampling was copied unchanged".into(),
            )),
            (ConversionState::NeedsDirectDecode, true) => Err(CodecError::Conversion(
                "chroma was resampled although the geometry matched".into(),
            )),
            _ => Ok(ConversionState::Done),
        }
    }
}

/// Copy native planes into the destination frame, resampling chroma where
/// the sizes differ.
///
/// Returns `true` when at least one chroma plane was resampled or filled.
pub fn convert_native(
    native: &NativePlanes,
    resolved: &ResolvedPlanes,
    frame: &mut FrameLease,
) -> Result<bool, CodecError> {
    let mut planes = frame.planes_mut();
    let luma = resolved.luma();
    let (src, src_stride) = native
        .plane(0)
        .ok_or_else(|| CodecError::Conversion("native luma plane missing".into()))?;
    let dst = planes
        .get_mut(luma.slot)
        .ok_or_else(|| CodecError::Conversion("destination luma plane missing".into()))?;
    let dst_stride = dst.stride();
    copy_plane(
        src,
        src_stride,
        dst.data(),
        dst_stride,
        luma.width as usize,
        luma.height as usize,
    )?;

    let mut resampled = false;
    for (logical, native_index) in [(LogicalPlane::U, 1), (LogicalPlane::V, 2)] {
        let Some(geometry) = resolved.get(logical) else {
            continue;
        };
        let dst = planes.get_mut(geometry.slot).ok_or_else(|| {
            CodecError::Conversion(format!("destination plane {} missing", geometry.slot))
        })?;
        let dst_stride = dst.stride();
        let (dst_w, dst_h) = (geometry.width as usize, geometry.height as usize);

        match (native.plane(native_index), resolved.native_chroma) {
            (Some((src, src_stride)), Some((src_w, src_h)))
                if (src_w, src_h) == (geometry.width, geometry.height) =>
            {
                copy_plane(src, src_stride, dst.data(), dst_stride, dst_w, dst_h)?;
            }
            (Some((src, src_stride)), Some((src_w, src_h))) => {
                resample_nearest(
                    src,
                    src_stride,
                    (src_w as usize, src_h as usize),
                    dst.data(),
                    dst_stride,
                    (dst_w, dst_h),
                )?;
                resampled = true;
            }
            _ => {
                fill_plane(dst.data(), dst_stride, dst_w, dst_h, NEUTRAL_CHROMA)?;
                resampled = true;
            }
        }
    }
    Ok(resampled)
}

/// Row-by-row copy between planes of identical visible size.
pub fn copy_plane(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    width: usize,
    height: usize,
) -> Result<(), CodecError> {
    for y in 0..height {
        let src_row = row(src, src_stride, y, width)?;
        row_mut(dst, dst_stride, y, width)?.copy_from_slice(src_row);
    }
    Ok(())
}

/// Nearest-neighbor resample: `dst[y][x] = src[y * sh / dh][x * sw / dw]`.
///
/// # Example
/// ```rust
/// use jpegbridge_codec::resample::resample_nearest;
///
/// let src = [1u8, 2, 3, 4];
/// let mut dst = [0u8; 1];
/// resample_nearest(&src, 2, (2, 2), &mut dst, 1, (1, 1)).unwrap();
/// assert_eq!(dst, [1]);
/// ```
pub fn resample_nearest(
    src: &[u8],
    src_stride: usize,
    (src_w, src_h): (usize, usize),
    dst: &mut [u8],
    dst_stride: usize,
    (dst_w, dst_h): (usize, usize),
) -> Result<(), CodecError> {
    if src_w == 0 || src_h == 0 {
        return Err(CodecError::Conversion("empty source plane".into()));
    }
    for y in 0..dst_h {
        let sy = (y * src_h / dst_h).min(src_h - 1);
        let src_row = row(src, src_stride, sy, src_w)?;
        let dst_row = row_mut(dst, dst_stride, y, dst_w)?;
        for (x, out) in dst_row.iter_mut().enumerate() {
            let sx = (x * src_w / dst_w).min(src_w - 1);
            *out = src_row[sx];
        }
    }
    Ok(())
}

pub fn fill_plane(
    dst: &mut [u8],
    stride: usize,
    width: usize,
    height: usize,
    value: u8,
) -> Result<(), CodecError> {
    for y in 0..height {
        row_mut(dst, stride, y, width)?.fill(value);
    }
    Ok(())
}

fn row(buf: &[u8], stride: usize, y: usize, width: usize) -> Result<&[u8], CodecError> {
    let start = y * stride;
    buf.get(start..start + width)
        .ok_or_else(|| CodecError::Conversion(format!("source row {y} out of bounds")))
}

fn row_mut(buf: &mut [u8], stride: usize, y: usize, width: usize) -> Result<&mut [u8], CodecError> {
    let start = y * stride;
    buf.get_mut(start..start + width)
        .ok_or_else(|| CodecError::Conversion(format!("destination row {y} out of bounds")))
}
