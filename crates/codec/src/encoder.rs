use std::sync::Mutex;

use jpegbridge_core::prelude::*;
use smallvec::SmallVec;
use tracing::debug;
use turbojpeg::{Compressor, Image, PixelFormat, YuvPlanesImage};

use crate::config::EncoderConfig;
use crate::header::to_tj_subsamp;
use crate::planes::{NativeGeometry, plane_span};
use crate::{Codec, CodecDescriptor, CodecError, CodecKind, CodecStats};

/// JPEG encoder over a libjpeg-turbo compressor handle.
pub struct JpegEncoder {
    compressor: Compressor,
    config: EncoderConfig,
}

impl JpegEncoder {
    pub fn new(config: EncoderConfig) -> Result<Self, CodecError> {
        let config = config.sanitized();
        let mut compressor = Compressor::new()
            .map_err(|e| CodecError::Codec(format!("compressor init failed: {e}")))?;
        compressor
            .set_quality(config.quality)
            .map_err(|e| setting_failed("quality", e))?;
        compressor
            .set_optimize(config.optimize_huffman)
            .map_err(|e| setting_failed("optimized huffman", e))?;
        compressor
            .set_progressive(config.progressive)
            .map_err(|e| setting_failed("progressive", e))?;
        debug!(
            quality = config.quality,
            subsampling = %config.subsampling,
            optimize_huffman = config.optimize_huffman,
            progressive = config.progressive,
            "jpeg encoder created"
        );
        Ok(Self { compressor, config })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Compress `frame`, whose pixels are laid out as `format`.
    pub fn encode(&mut self, frame: &FrameLease, format: VideoFormat) -> Result<Vec<u8>, CodecError> {
        let resolution = frame.meta().format.resolution;
        let width = resolution.width.get() as usize;
        let height = resolution.height.get() as usize;
        let jpeg = if format.is_yuv() {
            self.encode_planar(frame, format, resolution)?
        } else {
            self.encode_packed(frame, format, width, height)?
        };
        debug!(%format, width, height, bytes = jpeg.len(), "encoded frame");
        Ok(jpeg)
    }

    fn encode_packed(
        &mut self,
        frame: &FrameLease,
        format: VideoFormat,
        width: usize,
        height: usize,
    ) -> Result<Vec<u8>, CodecError> {
        let planes = frame.planes();
        let plane = planes
            .first()
            .ok_or_else(|| CodecError::InvalidOutputBuffer("frame has no planes".into()))?;
        let stride = plane.stride();
        if stride < width * format.bytes_per_pixel() {
            return Err(CodecError::InvalidOutputBuffer(format!(
                "stride {stride} too small for {width}px of {format}"
            )));
        }
        let pixels = plane.data().get(..stride * height).ok_or_else(|| {
            CodecError::InvalidOutputBuffer(format!(
                "plane holds {} bytes, {} required",
                plane.data().len(),
                stride * height
            ))
        })?;

        let (pixel_format, subsampling) = match format {
            VideoFormat::Rgb => (PixelFormat::RGB, self.config.subsampling),
            VideoFormat::Bgr => (PixelFormat::BGR, self.config.subsampling),
            VideoFormat::Rgbx => (PixelFormat::RGBX, self.config.subsampling),
            VideoFormat::Bgrx => (PixelFormat::BGRX, self.config.subsampling),
            VideoFormat::Xrgb => (PixelFormat::XRGB, self.config.subsampling),
            VideoFormat::Xbgr => (PixelFormat::XBGR, self.config.subsampling),
            VideoFormat::Gray8 => (PixelFormat::GRAY, ChromaSubsampling::Gray),
            other => {
                return Err(CodecError::Codec(format!("{other} is not a packed format")));
            }
        };
        self.compressor
            .set_subsamp(to_tj_subsamp(subsampling))
            .map_err(|e| setting_failed("subsampling", e))?;
        self.compressor
            .compress_to_vec(Image {
                pixels,
                width,
                pitch: stride,
                height,
                format: pixel_format,
            })
            .map_err(|e| CodecError::Codec(e.to_string()))
    }

    /// Compress the frame's own Y, U and V planes; the codec reads them in place.
    ///
    /// Each plane must cover the padded size libjpeg-turbo reads for the
    /// format's subsampling (luma rounded up to whole chroma samples).
    fn encode_planar(
        &mut self,
        frame: &FrameLease,
        format: VideoFormat,
        resolution: Resolution,
    ) -> Result<Vec<u8>, CodecError> {
        let subsampling = format
            .subsampling()
            .ok_or_else(|| CodecError::Codec(format!("{format} has no chroma layout")))?;
        let (width, height) = (resolution.width.get(), resolution.height.get());
        let geometry = NativeGeometry::new(subsampling, width, height);
        let planes = frame.planes();
        if planes.len() < 3 {
            return Err(CodecError::InvalidOutputBuffer(format!(
                "{format} needs 3 planes, frame has {}",
                planes.len()
            )));
        }

        let (u_slot, v_slot) = format.chroma_slots();
        let mut sources: SmallVec<[(&[u8], usize); 3]> = SmallVec::new();
        for (slot, dims) in [0, u_slot, v_slot].into_iter().zip(geometry.plane_dims()) {
            let plane = planes[slot];
            let stride = plane.stride();
            let data = plane_span(stride, dims)
                .and_then(|span| plane.data().get(..span))
                .ok_or_else(|| {
                    CodecError::InvalidOutputBuffer(format!(
                        "plane {slot} ({} bytes, stride {stride}) does not cover {}x{} samples",
                        plane.data().len(),
                        dims.0,
                        dims.1
                    ))
                })?;
            sources.push((data, stride));
        }
        let [(y_plane, y_stride), (u_plane, u_stride), (v_plane, v_stride)] = sources.as_slice()
        else {
            return Err(CodecError::Codec(format!("{format} has no chroma planes")));
        };

        self.compressor
            .compress_yuv_planes_to_vec(&YuvPlanesImage {
                y_plane: *y_plane,
                u_plane: *u_plane,
                v_plane: *v_plane,
                width: width as usize,
                height: height as usize,
                y_stride: *y_stride,
                u_stride: *u_stride,
                v_stride: *v_stride,
                subsamp: to_tj_subsamp(subsampling),
            })
            .map_err(|e| CodecError::Codec(e.to_string()))
    }
}

fn setting_failed(setting: &str, err: turbojpeg::Error) -> CodecError {
    CodecError::Codec(format!("failed to apply {setting} setting: {err}"))
}

/// [`Codec`] adapter: raw frames in, `MJPG` frames out.
pub struct TurbojpegEncoder {
    descriptor: CodecDescriptor,
    encoder: Mutex<JpegEncoder>,
    pool: BufferPool,
    stats: CodecStats,
}

impl TurbojpegEncoder {
    /// `input` is the advertised raw format; any raw format is accepted.
    pub fn new(input: VideoFormat, config: EncoderConfig) -> Result<Self, CodecError> {
        Self::with_pool(input, config, BufferPool::with_limits(2, 1 << 20, 4))
    }

    pub fn with_pool(
        input: VideoFormat,
        config: EncoderConfig,
        pool: BufferPool,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            descriptor: CodecDescriptor {
                kind: CodecKind::Encoder,
                input: input.fourcc(),
                output: MJPG,
                name: "mjpeg",
                impl_name: "turbojpeg",
            },
            encoder: Mutex::new(JpegEncoder::new(config)?),
            pool,
            stats: CodecStats::default(),
        })
    }

    pub fn stats(&self) -> &CodecStats {
        &self.stats
    }
}

impl Codec for TurbojpegEncoder {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn process(&self, input: FrameLease) -> Result<FrameLease, CodecError> {
        let meta = input.meta();
        let format =
            VideoFormat::from_fourcc(meta.format.code).ok_or(CodecError::FormatMismatch {
                expected: self.descriptor.input,
                actual: meta.format.code,
            })?;

        let jpeg = {
            let mut encoder = self
                .encoder
                .lock()
                .map_err(|_| CodecError::Codec("encoder lock poisoned".into()))?;
            encoder.encode(&input, format)
        };
        let jpeg = match jpeg {
            Ok(jpeg) => jpeg,
            Err(err) => {
                self.stats.inc_errors();
                return Err(err);
            }
        };

        let len = jpeg.len();
        let mut buf = self.pool.lease();
        buf.replace_owned(jpeg);
        self.stats.inc_processed();
        // Stride is not meaningful for a compressed payload.
        Ok(FrameLease::single_plane(
            FrameMeta::new(
                MediaFormat::new(MJPG, meta.format.resolution, ColorSpace::Jfif),
                meta.timestamp,
            ),
            buf,
            len,
            len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HeaderReader;
    use crate::testing::gradient_rgb;

    fn rgb_frame(width: u32, height: u32) -> FrameLease {
        let pool = BufferPool::with_capacity(1, 0);
        let info = VideoInfo::new(VideoFormat::Rgb, Resolution::new(width, height).unwrap(), 1);
        let mut frame = FrameLease::for_info(&pool, &info, 5).unwrap();
        frame
            .buffer_mut()
            .copy_from_slice(&gradient_rgb(width as usize, height as usize));
        frame
    }

    /// Planar frame with a luma ramp and distinct constant U and V planes.
    fn planar_frame(format: VideoFormat, width: u32, height: u32) -> FrameLease {
        let pool = BufferPool::with_capacity(1, 0);
        let info = VideoInfo::new(format, Resolution::new(width, height).unwrap(), 16);
        let mut frame = FrameLease::for_info(&pool, &info, 0).unwrap();
        let (u_slot, v_slot) = format.chroma_slots();
        let mut planes = frame.planes_mut();
        for (slot, plane) in planes.iter_mut().enumerate() {
            let value = match slot {
                0 => None,
                s if s == u_slot => Some(90u8),
                s if s == v_slot => Some(170u8),
                _ => unreachable!(),
            };
            let stride = plane.stride();
            for (i, byte) in plane.data().iter_mut().enumerate() {
                *byte = value.unwrap_or(((i % stride) * 4) as u8);
            }
        }
        drop(planes);
        frame
    }

    #[test]
    fn rgb_uses_configured_subsampling() {
        let mut encoder = JpegEncoder::new(EncoderConfig {
            subsampling: ChromaSubsampling::Yuv422,
            ..EncoderConfig::default()
        })
        .unwrap();
        let jpeg = encoder.encode(&rgb_frame(30, 20), VideoFormat::Rgb).unwrap();
        let header = HeaderReader::new().unwrap().read_header(&jpeg).unwrap();
        assert_eq!((header.width, header.height), (30, 20));
        assert_eq!(header.subsampling, ChromaSubsampling::Yuv422);
    }

    #[test]
    fn gray8_encodes_single_component() {
        let pool = BufferPool::with_capacity(1, 0);
        let info = VideoInfo::new(VideoFormat::Gray8, Resolution::new(16, 8).unwrap(), 4);
        let frame = FrameLease::for_info(&pool, &info, 0).unwrap();
        let mut encoder = JpegEncoder::new(EncoderConfig::default()).unwrap();
        let jpeg = encoder.encode(&frame, VideoFormat::Gray8).unwrap();
        let header = HeaderReader::new().unwrap().read_header(&jpeg).unwrap();
        assert_eq!(header.subsampling, ChromaSubsampling::Gray);
    }

    #[test]
    fn planar_input_keeps_its_subsampling() {
        let mut encoder = JpegEncoder::new(EncoderConfig::default()).unwrap();
        let mut reader = HeaderReader::new().unwrap();
        for (format, expected) in [
            (VideoFormat::I420, ChromaSubsampling::Yuv420),
            (VideoFormat::Y42b, ChromaSubsampling::Yuv422),
            (VideoFormat::Y444, ChromaSubsampling::Yuv444),
        ] {
            let jpeg = encoder.encode(&planar_frame(format, 33, 17), format).unwrap();
            let header = reader.read_header(&jpeg).unwrap();
            assert_eq!((header.width, header.height), (33, 17));
            assert_eq!(header.subsampling, expected, "{format}");
        }
    }

    #[test]
    fn yv12_matches_i420_with_swapped_planes() {
        let mut encoder = JpegEncoder::new(EncoderConfig::default()).unwrap();
        let i420 = encoder
            .encode(&planar_frame(VideoFormat::I420, 32, 16), VideoFormat::I420)
            .unwrap();
        let yv12 = encoder
            .encode(&planar_frame(VideoFormat::Yv12, 32, 16), VideoFormat::Yv12)
            .unwrap();
        assert_eq!(i420, yv12);
    }

    #[test]
    fn packed_subsampling_is_reapplied_after_planar_input() {
        let mut encoder = JpegEncoder::new(EncoderConfig {
            subsampling: ChromaSubsampling::Yuv422,
            ..EncoderConfig::default()
        })
        .unwrap();
        let mut reader = HeaderReader::new().unwrap();
        let planar = encoder
            .encode(&planar_frame(VideoFormat::Y444, 32, 16), VideoFormat::Y444)
            .unwrap();
        assert_eq!(
            reader.read_header(&planar).unwrap().subsampling,
            ChromaSubsampling::Yuv444
        );
        let packed = encoder.encode(&rgb_frame(32, 16), VideoFormat::Rgb).unwrap();
        assert_eq!(
            reader.read_header(&packed).unwrap().subsampling,
            ChromaSubsampling::Yuv422
        );
    }

    #[test]
    fn quality_setting_changes_output() {
        let frame = rgb_frame(64, 64);
        let encode_at = |quality| {
            JpegEncoder::new(EncoderConfig {
                quality,
                ..EncoderConfig::default()
            })
            .unwrap()
            .encode(&frame, VideoFormat::Rgb)
            .unwrap()
        };
        assert!(encode_at(10).len() < encode_at(100).len());
    }

    #[test]
    fn progressive_setting_is_honoured() {
        let frame = rgb_frame(48, 32);
        let baseline = JpegEncoder::new(EncoderConfig::default())
            .unwrap()
            .encode(&frame, VideoFormat::Rgb)
            .unwrap();
        assert!(!turbojpeg::read_header(&baseline).unwrap().is_progressive);

        let mut encoder = JpegEncoder::new(EncoderConfig {
            progressive: true,
            ..EncoderConfig::default()
        })
        .unwrap();
        let progressive = encoder.encode(&frame, VideoFormat::Rgb).unwrap();
        assert!(turbojpeg::read_header(&progressive).unwrap().is_progressive);
        let planar = encoder
            .encode(&planar_frame(VideoFormat::I420, 48, 32), VideoFormat::I420)
            .unwrap();
        assert!(turbojpeg::read_header(&planar).unwrap().is_progressive);
    }

    #[test]
    fn planar_input_without_padded_rows_is_rejected() {
        // 33x17 I420 needs 34x18 luma and 17x9 chroma; this frame stores 33x17.
        let pool = BufferPool::with_capacity(1, 0);
        let layouts: SmallVec<[PlaneLayout; 3]> = [
            PlaneLayout { offset: 0, len: 33 * 17, stride: 33 },
            PlaneLayout { offset: 33 * 17, len: 17 * 9, stride: 17 },
            PlaneLayout { offset: 33 * 17 + 17 * 9, len: 17 * 9, stride: 17 },
        ]
        .into_iter()
        .collect();
        let meta = FrameMeta::new(
            MediaFormat::new(
                VideoFormat::I420.fourcc(),
                Resolution::new(33, 17).unwrap(),
                ColorSpace::Jfif,
            ),
            0,
        );
        let frame = FrameLease::with_layouts(meta, pool.lease(), layouts).unwrap();
        let mut encoder = JpegEncoder::new(EncoderConfig::default()).unwrap();
        let err = encoder.encode(&frame, VideoFormat::I420).unwrap_err();
        assert!(matches!(err, CodecError::InvalidOutputBuffer(_)), "{err}");
    }

    #[test]
    fn short_packed_plane_is_rejected() {
        let pool = BufferPool::with_capacity(1, 0);
        let meta = FrameMeta::new(
            MediaFormat::new(
                VideoFormat::Rgb.fourcc(),
                Resolution::new(8, 8).unwrap(),
                ColorSpace::Srgb,
            ),
            0,
        );
        let frame = FrameLease::single_plane(meta, pool.lease(), 24 * 4, 24);
        let mut encoder = JpegEncoder::new(EncoderConfig::default()).unwrap();
        let err = encoder.encode(&frame, VideoFormat::Rgb).unwrap_err();
        assert!(matches!(err, CodecError::InvalidOutputBuffer(_)), "{err}");
    }

    #[test]
    fn codec_adapter_emits_mjpg() {
        let codec = TurbojpegEncoder::new(VideoFormat::Rgb, EncoderConfig::default()).unwrap();
        let out = codec.process(rgb_frame(16, 16)).unwrap();
        assert_eq!(out.meta().format.code, MJPG);
        assert_eq!(out.meta().timestamp, 5);
        assert_eq!(&out.planes()[0].data()[..2], &[0xFF, 0xD8]);
        assert_eq!(codec.stats().processed(), 1);

        let pool = BufferPool::with_capacity(1, 0);
        let meta = FrameMeta::new(
            MediaFormat::new(MJPG, Resolution::new(16, 16).unwrap(), ColorSpace::Jfif),
            0,
        );
        let err = codec
            .process(FrameLease::single_plane(meta, pool.lease(), 4, 4))
            .unwrap_err();
        assert!(matches!(err, CodecError::FormatMismatch { .. }));
    }
}
