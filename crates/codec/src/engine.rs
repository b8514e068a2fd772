//! Calls into libjpeg-turbo for the pixel-producing half of a decode.

use std::{ffi::CStr, ptr};

use jpegbridge_core::prelude::*;
use smallvec::SmallVec;
use turbojpeg::{Decompressor, Image, PixelFormat, YuvImage, libc, raw};

use crate::CodecError;
use crate::header::{FrameHeader, to_tj_subsamp};
use crate::planes::{LogicalPlane, NativeGeometry, ResolvedPlanes, plane_span};

const COMPONENTS: [LogicalPlane; 3] = [LogicalPlane::Y, LogicalPlane::U, LogicalPlane::V];

/// Decompressor handles for the three decode call-sites.
///
/// Packed, scratch YUV and in-place YUV decodes each own a handle; none
/// shares state with the header reader. Handles are released when the engine
/// is dropped.
pub struct DecodeEngine {
    packed: Decompressor,
    yuv: Decompressor,
    planes: PlanesDecompressor,
}

/// Decompress handle for `tj3DecompressToYUVPlanes8`, which writes each
/// component through its own pointer and stride. The `turbojpeg` wrapper only
/// exposes the single-buffer variant.
struct PlanesDecompressor {
    handle: raw::tjhandle,
}

// The handle is exclusively owned and only used through `&mut self`.
unsafe impl Send for PlanesDecompressor {}

impl PlanesDecompressor {
    fn new() -> Result<Self, CodecError> {
        // SAFETY: tj3Init has no preconditions; a null handle is rejected below.
        let handle = unsafe { raw::tj3Init(raw::TJINIT_TJINIT_DECOMPRESS as libc::c_int) };
        if handle.is_null() {
            return Err(CodecError::Codec(format!(
                "planes decode handle init failed: {}",
                last_error(handle)
            )));
        }
        Ok(Self { handle })
    }

    /// Decode `data` through one `(pointer, stride)` target per component,
    /// in Y, U, V order.
    ///
    /// # Safety
    /// Each pointer must be valid for writes of [`plane_span`] bytes of the
    /// JPEG's padded native plane at the given stride, and the targets must
    /// not overlap.
    unsafe fn decompress(
        &mut self,
        data: &[u8],
        targets: [(*mut u8, libc::c_int); 3],
    ) -> Result<(), CodecError> {
        let len: raw::size_t = data
            .len()
            .try_into()
            .map_err(|_| CodecError::Decode(format!("{} byte frame too large", data.len())))?;
        let mut planes = targets.map(|(plane, _)| plane);
        let mut strides = targets.map(|(_, stride)| stride);
        // SAFETY: the handle is live and the caller guarantees the targets.
        let res = unsafe {
            raw::tj3DecompressToYUVPlanes8(
                self.handle,
                data.as_ptr(),
                len,
                planes.as_mut_ptr(),
                strides.as_mut_ptr(),
            )
        };
        if res != 0 {
            return Err(CodecError::Decode(last_error(self.handle)));
        }
        Ok(())
    }
}

impl Drop for PlanesDecompressor {
    fn drop(&mut self) {
        // SAFETY: the handle came from tj3Init and is destroyed exactly once.
        unsafe { raw::tj3Destroy(self.handle) }
    }
}

fn last_error(handle: raw::tjhandle) -> String {
    // SAFETY: tj3GetErrorStr accepts any handle, null included, and returns a
    // NUL-terminated message.
    unsafe { CStr::from_ptr(raw::tj3GetErrorStr(handle)) }
        .to_string_lossy()
        .into_owned()
}

/// Codec-native Y/U/V planes held in a frame-local scratch buffer.
pub struct NativePlanes {
    data: Vec<u8>,
    layouts: SmallVec<[PlaneLayout; 3]>,
    geometry: NativeGeometry,
}

impl NativePlanes {
    pub fn geometry(&self) -> &NativeGeometry {
        &self.geometry
    }

    /// Plane bytes and stride, `None` past the last plane (gray has one).
    pub fn plane(&self, index: usize) -> Option<(&[u8], usize)> {
        let layout = self.layouts.get(index)?;
        let data = self.data.get(layout.offset..layout.offset + layout.len)?;
        Some((data, layout.stride))
    }
}

impl DecodeEngine {
    pub fn new() -> Result<Self, CodecError> {
        let packed = Decompressor::new()
            .map_err(|e| CodecError::Codec(format!("packed decode handle init failed: {e}")))?;
        let yuv = Decompressor::new()
            .map_err(|e| CodecError::Codec(format!("yuv decode handle init failed: {e}")))?;
        Ok(Self {
            packed,
            yuv,
            planes: PlanesDecompressor::new()?,
        })
    }

    /// Decode into the single interleaved plane of a packed or GRAY8 frame.
    pub fn decode_packed(
        &mut self,
        data: &[u8],
        header: &FrameHeader,
        format: VideoFormat,
        frame: &mut FrameLease,
    ) -> Result<(), CodecError> {
        let pixel_format = tj_pixel_format(format).ok_or_else(|| {
            CodecError::InvalidOutputBuffer(format!("{format} is not a packed layout"))
        })?;
        let width = header.width as usize;
        let height = header.height as usize;

        let mut planes = frame.planes_mut();
        let plane = planes
            .first_mut()
            .ok_or_else(|| CodecError::InvalidOutputBuffer("frame has no planes".into()))?;
        check_plane(
            0,
            plane.as_slice().len(),
            plane.stride(),
            width * format.bytes_per_pixel(),
            height,
        )?;
        let pitch = plane.stride();
        let image = Image {
            pixels: plane.data(),
            width,
            pitch,
            height,
            format: pixel_format,
        };
        self.packed
            .decompress(data, image)
            .map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// Whether libjpeg-turbo can write this JPEG straight into `frame`.
    ///
    /// The chroma geometry must match and every destination plane must hold
    /// the padded native plane at its own stride. Slot order (YV12) and
    /// foreign strides are fine.
    pub fn fits_in_place(
        &self,
        header: &FrameHeader,
        resolved: &ResolvedPlanes,
        frame: &FrameLease,
    ) -> bool {
        let sizes: SmallVec<[(usize, usize); 3]> = frame
            .planes()
            .iter()
            .map(|p| (p.data().len(), p.stride()))
            .collect();
        in_place_slots(header, resolved, &sizes).is_some()
    }

    /// Decode straight into the planes of a frame accepted by
    /// [`DecodeEngine::fits_in_place`].
    pub fn decode_planar_direct(
        &mut self,
        data: &[u8],
        header: &FrameHeader,
        resolved: &ResolvedPlanes,
        frame: &mut FrameLease,
    ) -> Result<(), CodecError> {
        // The targets are sized from `header`, so it must describe `data`.
        let actual = self
            .packed
            .read_header(data)
            .map_err(|e| CodecError::HeaderParse(e.to_string()))?;
        if (actual.width, actual.height) != (header.width as usize, header.height as usize)
            || actual.subsamp != to_tj_subsamp(header.subsampling)
        {
            return Err(CodecError::HeaderParse(format!(
                "stream is {}x{} {:?}, expected {}x{} {}",
                actual.width,
                actual.height,
                actual.subsamp,
                header.width,
                header.height,
                header.subsampling
            )));
        }

        let mut planes = frame.planes_mut();
        let sizes: SmallVec<[(usize, usize); 3]> = planes
            .iter()
            .map(|p| (p.as_slice().len(), p.stride()))
            .collect();
        let slots = in_place_slots(header, resolved, &sizes).ok_or_else(|| {
            CodecError::InvalidOutputBuffer(format!(
                "{} frame cannot hold {} planes of {}x{} in place",
                resolved.format, header.subsampling, header.width, header.height
            ))
        })?;

        let mut targets = [(ptr::null_mut(), 0); 3];
        for (slot, plane) in planes.iter_mut().enumerate() {
            let Some(component) = slots.iter().position(|&s| s == slot) else {
                continue;
            };
            let stride = libc::c_int::try_from(plane.stride()).map_err(|_| {
                CodecError::InvalidOutputBuffer(format!("plane {slot} stride out of range"))
            })?;
            targets[component] = (plane.data().as_mut_ptr(), stride);
        }
        // SAFETY: in_place_slots checked each target against the padded native
        // plane, and planes_mut hands out disjoint slices that outlive the call.
        unsafe { self.planes.decompress(data, targets) }
    }

    /// Decode into freshly allocated scratch planes at the JPEG's native subsampling.
    pub fn decode_native(
        &mut self,
        data: &[u8],
        header: &FrameHeader,
    ) -> Result<NativePlanes, CodecError> {
        let geometry = NativeGeometry::new(header.subsampling, header.width, header.height);
        let len = geometry.buffer_len(1);
        let mut scratch = Vec::new();
        scratch.try_reserve_exact(len).map_err(|e| {
            CodecError::Conversion(format!("scratch allocation of {len} bytes failed: {e}"))
        })?;
        scratch.resize(len, 0);

        let image = YuvImage {
            pixels: scratch.as_mut_slice(),
            width: header.width as usize,
            align: 1,
            height: header.height as usize,
            subsamp: to_tj_subsamp(header.subsampling),
        };
        self.yuv
            .decompress_to_yuv(data, image)
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        Ok(NativePlanes {
            data: scratch,
            layouts: geometry.layouts(1),
            geometry,
        })
    }
}

/// Destination slot for each native component (Y, U, V), when every slot
/// holds its padded native plane. `sizes` is `(len, stride)` per slot.
fn in_place_slots(
    header: &FrameHeader,
    resolved: &ResolvedPlanes,
    sizes: &[(usize, usize)],
) -> Option<[usize; 3]> {
    if !resolved.format.is_yuv() || resolved.needs_conversion {
        return None;
    }
    let geometry = NativeGeometry::new(header.subsampling, header.width, header.height);
    let dims = geometry.plane_dims();
    if dims.len() != COMPONENTS.len() {
        return None;
    }
    let mut slots = [0; 3];
    for ((slot, component), dims) in slots.iter_mut().zip(COMPONENTS).zip(dims) {
        *slot = resolved.slot_of(component)?;
        let (len, stride) = sizes.get(*slot).copied()?;
        if plane_span(stride, dims)? > len {
            return None;
        }
    }
    Some(slots)
}

/// Check every destination plane against the resolved geometry before the codec runs.
pub fn validate_destination(frame: &FrameLease, resolved: &ResolvedPlanes) -> Result<(), CodecError> {
    let planes = frame.planes();
    let expected = resolved.format.plane_count();
    if planes.len() < expected {
        return Err(CodecError::InvalidOutputBuffer(format!(
            "{} needs {expected} planes, frame has {}",
            resolved.format,
            planes.len()
        )));
    }
    let bpp = if resolved.format.is_yuv() {
        1
    } else {
        resolved.format.bytes_per_pixel()
    };
    for geometry in &resolved.planes {
        let plane = &planes[geometry.slot];
        check_plane(
            geometry.slot,
            plane.data().len(),
            plane.stride(),
            geometry.width as usize * bpp,
            geometry.height as usize,
        )?;
    }
    Ok(())
}

fn check_plane(
    slot: usize,
    len: usize,
    stride: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<(), CodecError> {
    if stride == 0 || len == 0 {
        return Err(CodecError::InvalidOutputBuffer(format!(
            "plane {slot} is empty or has zero stride"
        )));
    }
    if stride < row_bytes {
        return Err(CodecError::InvalidOutputBuffer(format!(
            "plane {slot} stride {stride} is below the {row_bytes}-byte row"
        )));
    }
    let required = stride.checked_mul(rows).ok_or_else(|| {
        CodecError::InvalidOutputBuffer(format!("plane {slot} size overflow"))
    })?;
    if len < required {
        return Err(CodecError::InvalidOutputBuffer(format!(
            "plane {slot} holds {len} bytes, {required} required"
        )));
    }
    Ok(())
}

fn tj_pixel_format(format: VideoFormat) -> Option<PixelFormat> {
    match format {
        VideoFormat::Rgb => Some(PixelFormat::RGB),
        VideoFormat::Bgr => Some(PixelFormat::BGR),
        VideoFormat::Rgbx => Some(PixelFormat::RGBX),
        VideoFormat::Bgrx => Some(PixelFormat::BGRX),
        VideoFormat::Xrgb => Some(PixelFormat::XRGB),
        VideoFormat::Xbgr => Some(PixelFormat::XBGR),
        VideoFormat::Gray8 => Some(PixelFormat::GRAY),
        VideoFormat::I420 | VideoFormat::Yv12 | VideoFormat::Y42b | VideoFormat::Y444 => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HeaderReader;
    use crate::planes::resolve_planes;
    use crate::testing::encode_gradient;

    fn frame_for(format: VideoFormat, w: u32, h: u32, align: usize) -> FrameLease {
        let pool = BufferPool::with_capacity(1, 0);
        let info = VideoInfo::new(format, Resolution::new(w, h).unwrap(), align);
        FrameLease::for_info(&pool, &info, 0).unwrap()
    }

    #[test]
    fn packed_rgb_decode_is_close_to_source() {
        let jpeg = encode_gradient(32, 16, ChromaSubsampling::Yuv444);
        let header = HeaderReader::new().unwrap().read_header(&jpeg).unwrap();
        let mut engine = DecodeEngine::new().unwrap();
        let mut frame = frame_for(VideoFormat::Rgb, 32, 16, 16);
        engine
            .decode_packed(&jpeg, &header, VideoFormat::Rgb, &mut frame)
            .unwrap();
        let planes = frame.planes();
        let px = &planes[0].data()[..3];
        // Top-left pixel of the gradient is (0, 0, 0).
        assert!(px.iter().all(|&c| c < 16), "{px:?}");
    }

    #[test]
    fn short_stride_is_rejected_before_decode() {
        let resolved = resolve_planes(VideoFormat::Rgbx, 8, 8, ChromaSubsampling::Yuv420);
        let pool = BufferPool::with_capacity(1, 0);
        let meta = FrameMeta::new(
            MediaFormat::new(
                VideoFormat::Rgbx.fourcc(),
                Resolution::new(8, 8).unwrap(),
                ColorSpace::Srgb,
            ),
            0,
        );
        let frame = FrameLease::single_plane(meta, pool.lease(), 8 * 24, 24);
        let err = validate_destination(&frame, &resolved).unwrap_err();
        assert!(matches!(err, CodecError::InvalidOutputBuffer(_)), "{err}");
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_planes_are_rejected() {
        let resolved = resolve_planes(VideoFormat::I420, 8, 8, ChromaSubsampling::Yuv420);
        let frame = frame_for(VideoFormat::Gray8, 8, 8, 1);
        let err = validate_destination(&frame, &resolved).unwrap_err();
        assert!(matches!(err, CodecError::InvalidOutputBuffer(_)));
    }

    /// Frame whose planes hold exactly `w` x `h` luma and nominal chroma,
    /// packed back to back with no padding.
    fn tight_frame(format: VideoFormat, w: u32, h: u32) -> FrameLease {
        let info = VideoInfo::new(format, Resolution::new(w, h).unwrap(), 1);
        let mut offset = 0;
        let layouts: SmallVec<[PlaneLayout; 3]> = (0..format.plane_count())
            .map(|slot| {
                let (pw, ph) = info.plane_dims(slot);
                let layout = PlaneLayout {
                    offset,
                    len: (pw * ph) as usize,
                    stride: pw as usize,
                };
                offset += layout.len;
                layout
            })
            .collect();
        let pool = BufferPool::with_capacity(1, 0);
        FrameLease::with_layouts(FrameMeta::new(info.media_format(), 0), pool.lease(), layouts)
            .unwrap()
    }

    fn assert_rows_match(native: &NativePlanes, index: usize, dst: Plane<'_>, (w, h): (usize, usize)) {
        let (src, src_stride) = native.plane(index).unwrap();
        for y in 0..h {
            assert_eq!(
                &src[y * src_stride..][..w],
                &dst.data()[y * dst.stride()..][..w],
                "native plane {index} row {y}"
            );
        }
    }

    #[test]
    fn in_place_fit_follows_geometry_not_slot_order() {
        let jpeg = encode_gradient(40, 30, ChromaSubsampling::Yuv420);
        let header = HeaderReader::new().unwrap().read_header(&jpeg).unwrap();
        let engine = DecodeEngine::new().unwrap();
        let fits = |format: VideoFormat, frame: &FrameLease| {
            let resolved = resolve_planes(format, 40, 30, header.subsampling);
            engine.fits_in_place(&header, &resolved, frame)
        };
        assert!(fits(VideoFormat::I420, &frame_for(VideoFormat::I420, 40, 30, 16)));
        assert!(fits(VideoFormat::I420, &frame_for(VideoFormat::I420, 40, 30, 1)));
        assert!(fits(VideoFormat::Yv12, &frame_for(VideoFormat::Yv12, 40, 30, 64)));
        assert!(!fits(VideoFormat::Y444, &frame_for(VideoFormat::Y444, 40, 30, 16)));
        assert!(!fits(VideoFormat::Rgb, &frame_for(VideoFormat::Rgb, 40, 30, 16)));
    }

    #[test]
    fn odd_sizes_fit_only_with_padded_planes() {
        let jpeg = encode_gradient(33, 17, ChromaSubsampling::Yuv420);
        let header = HeaderReader::new().unwrap().read_header(&jpeg).unwrap();
        let engine = DecodeEngine::new().unwrap();
        let resolved = resolve_planes(VideoFormat::I420, 33, 17, header.subsampling);
        let padded = frame_for(VideoFormat::I420, 33, 17, 16);
        assert!(engine.fits_in_place(&header, &resolved, &padded));
        let tight = tight_frame(VideoFormat::I420, 33, 17);
        assert!(!engine.fits_in_place(&header, &resolved, &tight));
    }

    #[test]
    fn direct_decode_into_tight_frame_is_refused() {
        let jpeg = encode_gradient(33, 17, ChromaSubsampling::Yuv420);
        let header = HeaderReader::new().unwrap().read_header(&jpeg).unwrap();
        let mut engine = DecodeEngine::new().unwrap();
        let resolved = resolve_planes(VideoFormat::I420, 33, 17, header.subsampling);
        let mut tight = tight_frame(VideoFormat::I420, 33, 17);
        let err = engine
            .decode_planar_direct(&jpeg, &header, &resolved, &mut tight)
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidOutputBuffer(_)), "{err}");
    }

    #[test]
    fn direct_decode_rejects_header_of_another_stream() {
        let large = encode_gradient(64, 64, ChromaSubsampling::Yuv420);
        let small = encode_gradient(32, 32, ChromaSubsampling::Yuv420);
        let header = HeaderReader::new().unwrap().read_header(&large).unwrap();
        let mut engine = DecodeEngine::new().unwrap();
        let resolved = resolve_planes(VideoFormat::I420, 64, 64, header.subsampling);
        let mut frame = frame_for(VideoFormat::I420, 64, 64, 16);
        assert!(engine.fits_in_place(&header, &resolved, &frame));

        let err = engine
            .decode_planar_direct(&small, &header, &resolved, &mut frame)
            .unwrap_err();
        assert!(matches!(err, CodecError::HeaderParse(_)), "{err}");
        engine
            .decode_planar_direct(&large, &header, &resolved, &mut frame)
            .unwrap();
    }

    #[test]
    fn native_decode_matches_direct_decode() {
        let jpeg = encode_gradient(33, 17, ChromaSubsampling::Yuv420);
        let header = HeaderReader::new().unwrap().read_header(&jpeg).unwrap();
        let mut engine = DecodeEngine::new().unwrap();
        let native = engine.decode_native(&jpeg, &header).unwrap();
        assert_eq!(native.geometry().chroma, Some((17, 9)));

        let resolved = resolve_planes(VideoFormat::I420, 33, 17, header.subsampling);
        let mut frame = frame_for(VideoFormat::I420, 33, 17, 16);
        engine
            .decode_planar_direct(&jpeg, &header, &resolved, &mut frame)
            .unwrap();
        let planes = frame.planes();
        assert_rows_match(&native, 0, planes[0], (33, 17));
        assert_rows_match(&native, 1, planes[1], (17, 9));
        assert_rows_match(&native, 2, planes[2], (17, 9));
    }

    #[test]
    fn yv12_direct_decode_writes_v_into_slot_one() {
        let jpeg = encode_gradient(48, 32, ChromaSubsampling::Yuv420);
        let header = HeaderReader::new().unwrap().read_header(&jpeg).unwrap();
        let mut engine = DecodeEngine::new().unwrap();
        let native = engine.decode_native(&jpeg, &header).unwrap();

        let resolved = resolve_planes(VideoFormat::Yv12, 48, 32, header.subsampling);
        let mut frame = frame_for(VideoFormat::Yv12, 48, 32, 32);
        engine
            .decode_planar_direct(&jpeg, &header, &resolved, &mut frame)
            .unwrap();
        let planes = frame.planes();
        assert_rows_match(&native, 0, planes[0], (48, 32));
        assert_rows_match(&native, 2, planes[1], (24, 16));
        assert_rows_match(&native, 1, planes[2], (24, 16));
    }

    /// Keep everything up to and including the start-of-scan header, then end
    /// the image: the frame parses but carries no entropy-coded data.
    fn without_scan_data(jpeg: &[u8]) -> Vec<u8> {
        let mut pos = 2;
        loop {
            assert_eq!(jpeg[pos], 0xFF, "marker expected at {pos}");
            let marker = jpeg[pos + 1];
            let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
            pos += 2 + len;
            if marker == 0xDA {
                break;
            }
        }
        let mut out = jpeg[..pos].to_vec();
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    #[test]
    fn missing_scan_data_is_a_decode_error() {
        let jpeg = without_scan_data(&encode_gradient(64, 64, ChromaSubsampling::Yuv420));
        let header = HeaderReader::new().unwrap().read_header(&jpeg).unwrap();
        assert_eq!((header.width, header.height), (64, 64));

        let mut engine = DecodeEngine::new().unwrap();
        let err = engine.decode_native(&jpeg, &header).err().unwrap();
        assert!(matches!(err, CodecError::Decode(_)), "{err}");

        let resolved = resolve_planes(VideoFormat::I420, 64, 64, header.subsampling);
        let mut frame = frame_for(VideoFormat::I420, 64, 64, 16);
        let err = engine
            .decode_planar_direct(&jpeg, &header, &resolved, &mut frame)
            .unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)), "{err}");
        assert!(!err.is_fatal());
    }
}
