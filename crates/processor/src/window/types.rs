//! Window specification and bounds

use crate::error::{ValidationError, ValidationResult};
use crate::watermark::Watermark;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Window shape: tumbling when `slide_ms` is absent, sliding otherwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowSpec {
    pub size_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_ms: Option<u64>,
}

impl WindowSpec {
    pub fn tumbling(size_ms: u64) -> Self {
        Self {
            size_ms,
            slide_ms: None,
        }
    }

    pub fn sliding(size_ms: u64, slide_ms: u64) -> Self {
        Self {
            size_ms,
            slide_ms: Some(slide_ms),
        }
    }

    pub fn is_tumbling(&self) -> bool {
        self.slide_ms.is_none()
    }

    /// Reject empty windows and slides that would leave gaps
    pub fn validate(&self) -> ValidationResult<()> {
        if self.size_ms == 0 || self.size_ms > i64::MAX as u64 {
            return Err(ValidationError::InvalidWindowSize { size: self.size_ms });
        }

        if let Some(slide) = self.slide_ms {
            if slide == 0 || slide > self.size_ms {
                return Err(ValidationError::InvalidSlideSize {
                    slide,
                    window: self.size_ms,
                });
            }
        }

        Ok(())
    }

    pub(crate) fn size(&self) -> i64 {
        i64::try_from(self.size_ms).unwrap_or(i64::MAX)
    }

    pub(crate) fn slide(&self) -> i64 {
        i64::try_from(self.slide_ms.unwrap_or(self.size_ms)).unwrap_or(i64::MAX)
    }
}

/// Half-open event-time interval `[start, end)` in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowBounds {
    pub start: i64,
    pub end: i64,
}

impl WindowBounds {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn duration_ms(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }

    /// Check if a timestamp falls within this window
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// A window is complete once the watermark reaches its end
    pub fn is_complete(&self, watermark: Watermark) -> bool {
        watermark.timestamp >= self.end
    }
}

impl fmt::Display for WindowBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
