use crate::CodecError;

/// Counts consecutive per-frame failures and escalates once the ceiling is reached.
///
/// # Example
/// ```rust
/// use jpegbridge_codec::recovery::ErrorTracker;
///
/// let mut tracker = ErrorTracker::new(2);
/// assert_eq!(tracker.record_failure().unwrap(), 1);
/// assert!(tracker.record_failure().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorTracker {
    consecutive: u32,
    max: u32,
}

impl ErrorTracker {
    pub fn new(max: u32) -> Self {
        Self { consecutive: 0, max }
    }

    /// Count a failed frame.
    ///
    /// Returns the new consecutive count while below the ceiling, otherwise
    /// [`CodecError::TooManyConsecutiveErrors`].
    pub fn record_failure(&mut self) -> Result<u32, CodecError> {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive >= self.max {
            return Err(CodecError::TooManyConsecutiveErrors {
                observed: self.consecutive,
                max: self.max,
            });
        }
        Ok(self.consecutive)
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}
