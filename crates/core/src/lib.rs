#![doc = include_str!("../README.md")]

pub mod buffer;
pub mod format;
pub mod metrics;

pub mod prelude {
    pub use crate::{
        buffer::{
            BufferLease, BufferPool, BufferPoolMetrics, FrameLease, FrameMeta, LayoutError, Plane,
            PlaneLayout, PlaneMut, validate_layouts,
        },
        format::{
            ChromaSubsampling, ColorSpace, FourCc, JPEG, MJPG, MediaFormat, Resolution,
            VideoFormat, VideoInfo,
        },
        metrics::Metrics,
    };
}
