use jpegbridge_core::prelude::ChromaSubsampling;

/// Default ceiling on consecutive failed frames before the session aborts.
pub const DEFAULT_MAX_ERRORS: u32 = 5;
/// Default row alignment for frames allocated by [`crate::decoder::PoolDownstream`].
pub const DEFAULT_OUTPUT_ALIGN: usize = 16;
/// Default JPEG quality.
pub const DEFAULT_QUALITY: i32 = 80;

/// Decoder session settings.
///
/// # Example
/// ```rust
/// use jpegbridge_codec::config::DecoderConfig;
///
/// let cfg = DecoderConfig { max_errors: 10, ..DecoderConfig::default() };
/// assert_eq!(cfg.output_align, 16);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DecoderConfig {
    /// Consecutive failed frames tolerated; reaching it is fatal. 0 makes the
    /// first failure fatal.
    pub max_errors: u32,
    /// Row alignment used when the decoder allocates its own output frames.
    pub output_align: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_errors: DEFAULT_MAX_ERRORS,
            output_align: DEFAULT_OUTPUT_ALIGN,
        }
    }
}

impl DecoderConfig {
    pub fn sanitized(self) -> Self {
        Self {
            max_errors: self.max_errors,
            output_align: self.output_align.clamp(1, 64).next_power_of_two(),
        }
    }
}

/// Encoder settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EncoderConfig {
    /// 1..=100, higher is better.
    pub quality: i32,
    /// Chroma subsampling for packed input. Planar input keeps its own layout.
    pub subsampling: ChromaSubsampling,
    /// Compute optimal Huffman tables (slower, smaller output).
    pub optimize_huffman: bool,
    /// Emit a multi-scan progressive JPEG instead of a baseline one.
    pub progressive: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            subsampling: ChromaSubsampling::Yuv420,
            optimize_huffman: false,
            progressive: false,
        }
    }
}

impl EncoderConfig {
    pub fn sanitized(self) -> Self {
        Self {
            quality: self.quality.clamp(1, 100),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_clamps_ranges() {
        let dec = DecoderConfig {
            max_errors: 0,
            output_align: 24,
        }
        .sanitized();
        assert_eq!(dec.output_align, 32);
        assert_eq!(dec.max_errors, 0);

        let enc = EncoderConfig {
            quality: 250,
            ..EncoderConfig::default()
        }
        .sanitized();
        assert_eq!(enc.quality, 100);
        assert!(!enc.progressive);
    }
}
