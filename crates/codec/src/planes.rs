//! Plane geometry on both sides of a decode: what libjpeg-turbo produces
//! natively for a subsampling mode, and what the negotiated format expects.

use jpegbridge_core::prelude::{ChromaSubsampling, PlaneLayout, VideoFormat};
use smallvec::SmallVec;

/// Logical component of a YUV image, independent of physical storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalPlane {
    Y,
    U,
    V,
}

/// Where a logical plane lives in the destination frame and how big it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    pub plane: LogicalPlane,
    /// Physical plane index in the destination frame.
    pub slot: usize,
    pub width: u32,
    pub height: u32,
}

/// Destination plane geometry for one negotiated format, plus how it relates
/// to the JPEG's native chroma layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlanes {
    pub format: VideoFormat,
    pub native: ChromaSubsampling,
    /// Logical planes in Y, U, V order (one entry for packed formats).
    pub planes: SmallVec<[PlaneGeometry; 3]>,
    /// Codec-native chroma size, `None` for grayscale JPEGs.
    pub native_chroma: Option<(u32, u32)>,
    /// Chroma must be resampled rather than copied or decoded in place.
    pub needs_conversion: bool,
}

impl ResolvedPlanes {
    pub fn get(&self, plane: LogicalPlane) -> Option<PlaneGeometry> {
        self.planes.iter().copied().find(|p| p.plane == plane)
    }

    pub fn slot_of(&self, plane: LogicalPlane) -> Option<usize> {
        self.get(plane).map(|p| p.slot)
    }

    pub fn luma(&self) -> PlaneGeometry {
        self.planes[0]
    }

    /// Destination chroma size, `None` for single-plane formats.
    pub fn dest_chroma(&self) -> Option<(u32, u32)> {
        self.get(LogicalPlane::U).map(|p| (p.width, p.height))
    }
}

/// Compute destination plane slots and sizes for `format` at `width` x `height`.
///
/// Chroma size follows the destination format's nominal subsampling, not the
/// JPEG's; `needs_conversion` flags the mismatch.
///
/// # Example
/// ```rust
/// use jpegbridge_codec::planes::{resolve_planes, LogicalPlane};
/// use jpegbridge_core::prelude::{ChromaSubsampling, VideoFormat};
///
/// let planes = resolve_planes(VideoFormat::Yv12, 64, 48, ChromaSubsampling::Yuv444);
/// assert_eq!(planes.slot_of(LogicalPlane::V), Some(1));
/// assert_eq!(planes.dest_chroma(), Some((32, 24)));
/// assert!(planes.needs_conversion);
/// ```
pub fn resolve_planes(
    format: VideoFormat,
    width: u32,
    height: u32,
    native: ChromaSubsampling,
) -> ResolvedPlanes {
    let native_chroma = native.chroma_dims(width, height);
    let mut planes = SmallVec::new();
    planes.push(PlaneGeometry {
        plane: LogicalPlane::Y,
        slot: 0,
        width,
        height,
    });

    let dest_chroma = if format.is_yuv() {
        format
            .subsampling()
            .and_then(|s| s.chroma_dims(width, height))
    } else {
        None
    };

    if let Some((cw, ch)) = dest_chroma {
        let (u_slot, v_slot) = format.chroma_slots();
        planes.push(PlaneGeometry {
            plane: LogicalPlane::U,
            slot: u_slot,
            width: cw,
            height: ch,
        });
        planes.push(PlaneGeometry {
            plane: LogicalPlane::V,
            slot: v_slot,
            width: cw,
            height: ch,
        });
    }

    let needs_conversion = match dest_chroma {
        Some(dest) => native_chroma != Some(dest),
        None => false,
    };

    ResolvedPlanes {
        format,
        native,
        planes,
        native_chroma,
        needs_conversion,
    }
}

/// Plane sizes libjpeg-turbo uses when decoding to YUV for a subsampling mode.
///
/// Luma is padded to a whole number of chroma samples (e.g. even width and
/// height for 4:2:0); chroma is `ceil(size / divisor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeGeometry {
    pub subsampling: ChromaSubsampling,
    pub luma: (usize, usize),
    pub chroma: Option<(usize, usize)>,
}

impl NativeGeometry {
    pub fn new(subsampling: ChromaSubsampling, width: u32, height: u32) -> Self {
        let (hdiv, vdiv) = subsampling.divisors().unwrap_or((1, 1));
        let luma_w = (width as usize).div_ceil(hdiv as usize) * hdiv as usize;
        let luma_h = (height as usize).div_ceil(vdiv as usize) * vdiv as usize;
        let chroma = subsampling
            .divisors()
            .map(|(h, v)| (luma_w / h as usize, luma_h / v as usize));
        Self {
            subsampling,
            luma: (luma_w, luma_h),
            chroma,
        }
    }

    pub fn plane_count(&self) -> usize {
        if self.chroma.is_some() { 3 } else { 1 }
    }

    /// Padded plane sizes in Y, U, V order.
    pub fn plane_dims(&self) -> SmallVec<[(usize, usize); 3]> {
        let mut dims = SmallVec::new();
        dims.push(self.luma);
        if let Some(chroma) = self.chroma {
            dims.push(chroma);
            dims.push(chroma);
        }
        dims
    }

    /// Contiguous Y, U, V layout with rows padded to `align` (a power of two),
    /// matching libjpeg-turbo's single-buffer YUV output.
    pub fn layouts(&self, align: usize) -> SmallVec<[PlaneLayout; 3]> {
        let mut offset = 0;
        self.plane_dims()
            .into_iter()
            .map(|(w, h)| {
                let stride = w.div_ceil(align) * align;
                let layout = PlaneLayout {
                    offset,
                    len: stride * h,
                    stride,
                };
                offset += layout.len;
                layout
            })
            .collect()
    }

    /// Bytes needed by [`NativeGeometry::layouts`] at `align`.
    pub fn buffer_len(&self, align: usize) -> usize {
        self.layouts(align)
            .last()
            .map(|l| l.offset + l.len)
            .unwrap_or(0)
    }
}

/// Bytes libjpeg-turbo touches in a `w` x `h` plane stored at `stride`:
/// every row but the last is a full stride.
///
/// `None` when a row does not fit in the stride or the size overflows.
pub fn plane_span(stride: usize, (w, h): (usize, usize)) -> Option<usize> {
    if stride < w || w == 0 || h == 0 {
        return None;
    }
    stride.checked_mul(h - 1)?.checked_add(w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yv12_stores_v_before_u() {
        let planes = resolve_planes(VideoFormat::Yv12, 16, 16, ChromaSubsampling::Yuv420);
        assert_eq!(planes.slot_of(LogicalPlane::Y), Some(0));
        assert_eq!(planes.slot_of(LogicalPlane::V), Some(1));
        assert_eq!(planes.slot_of(LogicalPlane::U), Some(2));
    }

    #[test]
    fn other_yuv_formats_store_u_before_v() {
        for format in [VideoFormat::I420, VideoFormat::Y42b, VideoFormat::Y444] {
            let planes = resolve_planes(format, 16, 16, ChromaSubsampling::Yuv420);
            assert_eq!(planes.slot_of(LogicalPlane::Y), Some(0));
            assert_eq!(planes.slot_of(LogicalPlane::U), Some(1));
            assert_eq!(planes.slot_of(LogicalPlane::V), Some(2));
        }
    }

    #[test]
    fn packed_formats_have_one_plane() {
        let planes = resolve_planes(VideoFormat::Bgrx, 33, 17, ChromaSubsampling::Yuv444);
        assert_eq!(planes.planes.len(), 1);
        assert_eq!(planes.luma().width, 33);
        assert_eq!(planes.luma().height, 17);
        assert!(!planes.needs_conversion);
        assert_eq!(planes.dest_chroma(), None);
    }

    #[test]
    fn hd_420_to_i420_matches_natively() {
        let planes = resolve_planes(VideoFormat::I420, 1920, 1080, ChromaSubsampling::Yuv420);
        assert_eq!(planes.dest_chroma(), Some((960, 540)));
        assert_eq!(planes.native_chroma, Some((960, 540)));
        assert!(!planes.needs_conversion);
    }

    #[test]
    fn hd_444_to_i420_needs_conversion() {
        let planes = resolve_planes(VideoFormat::I420, 1920, 1080, ChromaSubsampling::Yuv444);
        assert_eq!(planes.dest_chroma(), Some((960, 540)));
        assert_eq!(planes.native_chroma, Some((1920, 1080)));
        assert!(planes.needs_conversion);
    }

    #[test]
    fn gray_source_needs_conversion_for_yuv() {
        let planes = resolve_planes(VideoFormat::I420, 8, 8, ChromaSubsampling::Gray);
        assert_eq!(planes.native_chroma, None);
        assert!(planes.needs_conversion);
    }

    #[test]
    fn native_geometry_pads_luma_to_chroma_multiple() {
        let geom = NativeGeometry::new(ChromaSubsampling::Yuv420, 7, 5);
        assert_eq!(geom.luma, (8, 6));
        assert_eq!(geom.chroma, Some((4, 3)));

        let geom = NativeGeometry::new(ChromaSubsampling::Yuv440, 7, 5);
        assert_eq!(geom.luma, (7, 6));
        assert_eq!(geom.chroma, Some((7, 3)));

        let gray = NativeGeometry::new(ChromaSubsampling::Gray, 7, 5);
        assert_eq!(gray.luma, (7, 5));
        assert_eq!(gray.plane_count(), 1);
    }

    #[test]
    fn native_layout_is_contiguous_and_aligned() {
        let geom = NativeGeometry::new(ChromaSubsampling::Yuv422, 10, 3);
        let layouts = geom.layouts(4);
        assert_eq!(layouts[0].stride, 12);
        assert_eq!(layouts[1].offset, 36);
        assert_eq!(layouts[1].stride, 8);
        assert_eq!(layouts[2].offset, 36 + 24);
        assert_eq!(geom.buffer_len(4), 36 + 48);
    }

    #[test]
    fn plane_span_covers_padded_rows() {
        assert_eq!(plane_span(48, (34, 18)), Some(48 * 17 + 34));
        assert_eq!(plane_span(33, (34, 18)), None);
        assert_eq!(plane_span(16, (0, 4)), None);
        let geom = NativeGeometry::new(ChromaSubsampling::Yuv420, 33, 17);
        assert_eq!(geom.plane_dims().as_slice(), &[(34, 18), (17, 9), (17, 9)]);
    }
}
