use std::{fmt, num::NonZeroU32, str::FromStr};

use smallvec::SmallVec;

use crate::buffer::PlaneLayout;

/// Four-character code describing a pixel/stream format.
///
/// # Example
/// ```rust
/// use jpegbridge_core::prelude::FourCc;
///
/// let fcc = FourCc::new(*b"MJPG");
/// assert_eq!(fcc.to_string(), "MJPG");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// Construct from raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Little-endian u32 encoding.
    pub fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Try to convert to a printable string.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<u32> for FourCc {
    fn from(value: u32) -> Self {
        Self(value.to_le_bytes())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.as_str() {
            write!(f, "{s}")
        } else {
            write!(f, "0x{:08x}", self.to_u32())
        }
    }
}

impl FromStr for FourCc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 {
            return Err("fourcc must be four ASCII bytes".into());
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(FourCc(arr))
    }
}

/// FourCc for a stream of baseline/progressive JPEG images.
pub const MJPG: FourCc = FourCc::new(*b"MJPG");
/// FourCc for a single JPEG image.
pub const JPEG: FourCc = FourCc::new(*b"JPEG");

/// Resolution of a frame.
///
/// # Example
/// ```rust
/// use jpegbridge_core::prelude::Resolution;
///
/// let res = Resolution::new(640, 480).unwrap();
/// assert_eq!(res.width.get(), 640);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resolution {
    /// Width in pixels (non-zero).
    pub width: NonZeroU32,
    /// Height in pixels (non-zero).
    pub height: NonZeroU32,
}

impl Resolution {
    /// Create a resolution, returning `None` if width or height are zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }
}

/// Basic color space hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColorSpace {
    /// Standard sRGB.
    Srgb,
    /// Full-range BT.601 YCbCr, as stored by JFIF.
    Jfif,
    /// Unspecified/unknown.
    Unknown,
}

/// Media format including code and geometry.
///
/// # Example
/// ```rust
/// use jpegbridge_core::prelude::{ColorSpace, FourCc, MediaFormat, Resolution};
///
/// let res = Resolution::new(1920, 1080).unwrap();
/// let fmt = MediaFormat::new(FourCc::new(*b"I420"), res, ColorSpace::Jfif);
/// assert_eq!(fmt.code.to_string(), "I420");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MediaFormat {
    /// FourCc code describing pixel layout.
    pub code: FourCc,
    /// Resolution of the frame.
    pub resolution: Resolution,
    /// Color space hint.
    pub color: ColorSpace,
}

impl MediaFormat {
    /// Build a new format.
    pub fn new(code: FourCc, resolution: Resolution, color: ColorSpace) -> Self {
        Self {
            code,
            resolution,
            color,
        }
    }
}

/// Chroma subsampling of a YUV image, relative to its luma plane.
///
/// # Example
/// ```rust
/// use jpegbridge_core::prelude::ChromaSubsampling;
///
/// assert_eq!(ChromaSubsampling::Yuv420.divisors(), Some((2, 2)));
/// assert_eq!(ChromaSubsampling::Gray.divisors(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChromaSubsampling {
    /// Full-resolution chroma.
    Yuv444,
    /// Chroma halved horizontally.
    Yuv422,
    /// Chroma halved in both axes.
    Yuv420,
    /// Luma only.
    Gray,
    /// Chroma halved vertically.
    Yuv440,
}

impl ChromaSubsampling {
    /// Horizontal and vertical chroma divisors, `None` for grayscale.
    pub const fn divisors(self) -> Option<(u32, u32)> {
        match self {
            ChromaSubsampling::Yuv444 => Some((1, 1)),
            ChromaSubsampling::Yuv422 => Some((2, 1)),
            ChromaSubsampling::Yuv420 => Some((2, 2)),
            ChromaSubsampling::Yuv440 => Some((1, 2)),
            ChromaSubsampling::Gray => None,
        }
    }

    /// Chroma plane size for a luma plane of `width` x `height`.
    pub fn chroma_dims(self, width: u32, height: u32) -> Option<(u32, u32)> {
        self.divisors()
            .map(|(h, v)| (width.div_ceil(h), height.div_ceil(v)))
    }
}

impl fmt::Display for ChromaSubsampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChromaSubsampling::Yuv444 => "4:4:4",
            ChromaSubsampling::Yuv422 => "4:2:2",
            ChromaSubsampling::Yuv420 => "4:2:0",
            ChromaSubsampling::Gray => "gray",
            ChromaSubsampling::Yuv440 => "4:4:0",
        };
        f.write_str(s)
    }
}

/// Raw output pixel layouts understood by the codecs.
///
/// Packed formats and [`VideoFormat::Gray8`] carry a single plane; the YUV
/// formats carry three planes, physically ordered per [`VideoFormat::chroma_slots`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VideoFormat {
    Rgb,
    Bgr,
    Rgbx,
    Bgrx,
    Xrgb,
    Xbgr,
    /// Planar 4:2:0, Y then U then V.
    I420,
    /// Planar 4:2:0, Y then V then U.
    Yv12,
    /// Planar 4:2:2.
    Y42b,
    /// Planar 4:4:4.
    Y444,
    Gray8,
}

impl VideoFormat {
    pub const ALL: [VideoFormat; 11] = [
        VideoFormat::Rgb,
        VideoFormat::Bgr,
        VideoFormat::Rgbx,
        VideoFormat::Bgrx,
        VideoFormat::Xrgb,
        VideoFormat::Xbgr,
        VideoFormat::I420,
        VideoFormat::Yv12,
        VideoFormat::Y42b,
        VideoFormat::Y444,
        VideoFormat::Gray8,
    ];

    /// FourCc tag carried in frame metadata.
    pub const fn fourcc(self) -> FourCc {
        match self {
            VideoFormat::Rgb => FourCc::new(*b"RG24"),
            VideoFormat::Bgr => FourCc::new(*b"BG24"),
            VideoFormat::Rgbx => FourCc::new(*b"RGBX"),
            VideoFormat::Bgrx => FourCc::new(*b"BGRX"),
            VideoFormat::Xrgb => FourCc::new(*b"XRGB"),
            VideoFormat::Xbgr => FourCc::new(*b"XBGR"),
            VideoFormat::I420 => FourCc::new(*b"I420"),
            VideoFormat::Yv12 => FourCc::new(*b"YV12"),
            VideoFormat::Y42b => FourCc::new(*b"Y42B"),
            VideoFormat::Y444 => FourCc::new(*b"Y444"),
            VideoFormat::Gray8 => FourCc::new(*b"GREY"),
        }
    }

    /// Reverse of [`VideoFormat::fourcc`].
    pub fn from_fourcc(code: FourCc) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.fourcc() == code)
    }

    /// True for the three-plane YUV layouts.
    pub const fn is_yuv(self) -> bool {
        matches!(
            self,
            VideoFormat::I420 | VideoFormat::Yv12 | VideoFormat::Y42b | VideoFormat::Y444
        )
    }

    pub const fn plane_count(self) -> usize {
        if self.is_yuv() { 3 } else { 1 }
    }

    /// Bytes per pixel of the single plane of packed/gray formats; 1 for YUV planes.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            VideoFormat::Rgb | VideoFormat::Bgr => 3,
            VideoFormat::Rgbx | VideoFormat::Bgrx | VideoFormat::Xrgb | VideoFormat::Xbgr => 4,
            _ => 1,
        }
    }

    /// Nominal chroma layout implied by the format, `None` for packed formats.
    pub const fn subsampling(self) -> Option<ChromaSubsampling> {
        match self {
            VideoFormat::I420 | VideoFormat::Yv12 => Some(ChromaSubsampling::Yuv420),
            VideoFormat::Y42b => Some(ChromaSubsampling::Yuv422),
            VideoFormat::Y444 => Some(ChromaSubsampling::Yuv444),
            VideoFormat::Gray8 => Some(ChromaSubsampling::Gray),
            _ => None,
        }
    }

    /// Physical slots of the (U, V) planes. YV12 stores V before U.
    pub const fn chroma_slots(self) -> (usize, usize) {
        match self {
            VideoFormat::Yv12 => (2, 1),
            _ => (1, 2),
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VideoFormat::Rgb => "RGB",
            VideoFormat::Bgr => "BGR",
            VideoFormat::Rgbx => "RGBx",
            VideoFormat::Bgrx => "BGRx",
            VideoFormat::Xrgb => "xRGB",
            VideoFormat::Xbgr => "xBGR",
            VideoFormat::I420 => "I420",
            VideoFormat::Yv12 => "YV12",
            VideoFormat::Y42b => "Y42B",
            VideoFormat::Y444 => "Y444",
            VideoFormat::Gray8 => "GRAY8",
        };
        f.write_str(s)
    }
}

impl FromStr for VideoFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown video format {s:?}"))
    }
}

/// Geometry of a raw video frame: format, size and per-plane layout inside one buffer.
///
/// # Example
/// ```rust
/// use jpegbridge_core::prelude::{Resolution, VideoFormat, VideoInfo};
///
/// let info = VideoInfo::new(VideoFormat::I420, Resolution::new(5, 3).unwrap(), 4);
/// assert_eq!(info.plane_dims(1), (3, 2));
/// assert_eq!(info.layouts[1].stride, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    pub format: VideoFormat,
    pub resolution: Resolution,
    pub color: ColorSpace,
    /// Plane layouts in physical slot order.
    pub layouts: SmallVec<[PlaneLayout; 3]>,
}

impl VideoInfo {
    /// Build a frame description with every row padded to `align` bytes
    /// (rounded up to a power of two, minimum 1).
    ///
    /// Luma rows are padded vertically to the format's chroma divisor so
    /// planar frames can hold whole chroma rows.
    pub fn new(format: VideoFormat, resolution: Resolution, align: usize) -> Self {
        let align = align.max(1).next_power_of_two();
        let width = resolution.width.get();
        let height = resolution.height.get();
        let color = if format.is_yuv() || format == VideoFormat::Gray8 {
            ColorSpace::Jfif
        } else {
            ColorSpace::Srgb
        };

        let mut layouts = SmallVec::new();
        match format.subsampling().and_then(|s| s.divisors()) {
            Some((hdiv, vdiv)) if format.is_yuv() => {
                let luma_w = round_up(width as usize, hdiv as usize);
                let luma_h = round_up(height as usize, vdiv as usize);
                let chroma_w = luma_w / hdiv as usize;
                let chroma_h = luma_h / vdiv as usize;
                let mut offset = 0;
                for (w, h) in [(luma_w, luma_h), (chroma_w, chroma_h), (chroma_w, chroma_h)] {
                    let stride = round_up(w, align);
                    let len = stride * h;
                    layouts.push(PlaneLayout {
                        offset,
                        len,
                        stride,
                    });
                    offset += len;
                }
            }
            _ => {
                let stride = round_up(width as usize * format.bytes_per_pixel(), align);
                layouts.push(PlaneLayout {
                    offset: 0,
                    len: stride * height as usize,
                    stride,
                });
            }
        }

        Self {
            format,
            resolution,
            color,
            layouts,
        }
    }

    pub fn width(&self) -> u32 {
        self.resolution.width.get()
    }

    pub fn height(&self) -> u32 {
        self.resolution.height.get()
    }

    /// Total bytes needed to back every plane.
    pub fn size(&self) -> usize {
        self.layouts
            .iter()
            .map(|l| l.offset + l.len)
            .max()
            .unwrap_or(0)
    }

    /// Visible sample dimensions of the plane stored at `slot`.
    pub fn plane_dims(&self, slot: usize) -> (u32, u32) {
        let (w, h) = (self.width(), self.height());
        if slot == 0 {
            return (w, h);
        }
        self.format
            .subsampling()
            .and_then(|s| s.chroma_dims(w, h))
            .unwrap_or((0, 0))
    }

    /// Media format used for frame metadata.
    pub fn media_format(&self) -> MediaFormat {
        MediaFormat::new(self.format.fourcc(), self.resolution, self.color)
    }
}

fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

#[cfg(feature = "serde")]
impl serde::Serialize for FourCc {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let encoded = self.as_str().unwrap_or("FFFF");
        serializer.serialize_str(encoded)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for FourCc {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct FourCcVisitor;

        impl<'de> serde::de::Visitor<'de> for FourCcVisitor {
            type Value = FourCc;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a 4-character FourCc string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                FourCc::from_str(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(FourCcVisitor)
    }
}
