//! Fixtures shared by the unit tests.

use jpegbridge_core::prelude::*;
use turbojpeg::{Compressor, Image, PixelFormat};

use crate::decoder::{Downstream, PoolDownstream};
use crate::header::to_tj_subsamp;

pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// RGB24 image whose channels vary independently along x and y.
pub(crate) fn gradient_rgb(width: usize, height: usize) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            rgb.push((x * 255 / width.max(1)) as u8);
            rgb.push((y * 255 / height.max(1)) as u8);
            rgb.push(((x * 7 + y * 13) % 256) as u8);
        }
    }
    rgb
}

/// Encode [`gradient_rgb`] at high quality with the given subsampling.
pub(crate) fn encode_gradient(width: usize, height: usize, subsampling: ChromaSubsampling) -> Vec<u8> {
    let rgb = gradient_rgb(width, height);
    let mut compressor = Compressor::new().expect("compressor");
    compressor.set_quality(95).expect("fixture quality");
    compressor
        .set_subsamp(to_tj_subsamp(subsampling))
        .expect("fixture subsampling");
    compressor
        .compress_to_vec(Image {
            pixels: rgb.as_slice(),
            width,
            pitch: width * 3,
            height,
            format: PixelFormat::RGB,
        })
        .expect("encode fixture")
}

/// `PoolDownstream` that counts capability queries and handshakes.
pub(crate) struct CountingDownstream {
    pub inner: PoolDownstream,
    pub queries: usize,
    pub handshakes: usize,
    pub reject_handshake: bool,
}

impl CountingDownstream {
    pub fn new(formats: Option<Vec<VideoFormat>>) -> Self {
        Self {
            inner: PoolDownstream::new(formats, 16),
            queries: 0,
            handshakes: 0,
            reject_handshake: false,
        }
    }
}

impl Downstream for CountingDownstream {
    fn allowed_formats(&mut self) -> Option<Vec<VideoFormat>> {
        self.queries += 1;
        self.inner.allowed_formats()
    }

    fn renegotiate(&mut self, info: &VideoInfo) -> Result<(), String> {
        self.handshakes += 1;
        if self.reject_handshake {
            return Err("peer refused caps".into());
        }
        self.inner.renegotiate(info)
    }

    fn allocate(&mut self, info: &VideoInfo) -> Result<FrameLease, String> {
        self.inner.allocate(info)
    }
}
