//! Window assignment: which window(s) an event timestamp belongs to

use super::types::{WindowBounds, WindowSpec};
use crate::error::ValidationResult;
use serde::{Deserialize, Serialize};

/// How sliding windows assign events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlidingMembership {
    /// Every window containing the event, starts aligned to the slide
    #[default]
    Overlapping,
    /// Only the window starting at `timestamp - timestamp mod size_ms`
    Aligned,
}

/// Assigns timestamps to windows for one [`WindowSpec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAssigner {
    spec: WindowSpec,
    membership: SlidingMembership,
}

impl WindowAssigner {
    /// Create an assigner; fails if the `WindowSpec` is invalid
    pub fn new(spec: WindowSpec, membership: SlidingMembership) -> ValidationResult<Self> {
        spec.validate()?;
        Ok(Self { spec, membership })
    }

    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    pub fn membership(&self) -> SlidingMembership {
        self.membership
    }

    /// Windows containing `timestamp`, ordered by start
    pub fn assign(&self, timestamp: i64) -> Vec<WindowBounds> {
        let size = self.spec.size();

        if self.spec.is_tumbling() || self.membership == SlidingMembership::Aligned {
            let start = timestamp.saturating_sub(timestamp.rem_euclid(size));
            return vec![WindowBounds::new(start, start.saturating_add(size))];
        }

        let slide = self.spec.slide();
        let lowest = timestamp.saturating_sub(size - 1);

        let mut windows = Vec::with_capacity((size / slide).clamp(1, 64) as usize);
        let mut current_start = lowest.div_euclid(slide).saturating_mul(slide);
        while current_start <= timestamp {
            let bounds = WindowBounds::new(current_start, current_start.saturating_add(size));
            if bounds.contains(timestamp) {
                windows.push(bounds);
            }
            match current_start.checked_add(slide) {
                Some(next) => current_start = next,
                None => break,
            }
        }

        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starts(assigner: &WindowAssigner, ts: i64) -> Vec<i64> {
        assigner.assign(ts).iter().map(|w| w.start).collect()
    }

    #[test]
    fn test_tumbling_assignment() {
        let assigner =
            WindowAssigner::new(WindowSpec::tumbling(5_000), SlidingMembership::default()).unwrap();

        assert_eq!(assigner.assign(0), vec![WindowBounds::new(0, 5_000)]);
        assert_eq!(assigner.assign(4_999), vec![WindowBounds::new(0, 5_000)]);
        assert_eq!(assigner.assign(5_000), vec![WindowBounds::new(5_000, 10_000)]);
        assert_eq!(assigner.assign(12_345), vec![WindowBounds::new(10_000, 15_000)]);
    }

    #[test]
    fn test_tumbling_negative_timestamp() {
        let assigner =
            WindowAssigner::new(WindowSpec::tumbling(1_000), SlidingMembership::default()).unwrap();
        assert_eq!(assigner.assign(-1), vec![WindowBounds::new(-1_000, 0)]);
    }

    #[test]
    fn test_sliding_overlapping() {
        let assigner = WindowAssigner::new(
            WindowSpec::sliding(10_000, 5_000),
            SlidingMembership::Overlapping,
        )
        .unwrap();

        assert_eq!(starts(&assigner, 7_000), vec![0, 5_000]);
        assert_eq!(starts(&assigner, 10_000), vec![5_000, 10_000]);
        assert_eq!(starts(&assigner, 1_000), vec![-5_000, 0]);

        for window in assigner.assign(7_000) {
            assert!(window.contains(7_000));
            assert_eq!(window.duration_ms(), 10_000);
        }
    }

    #[test]
    fn test_sliding_uneven_slide() {
        let assigner = WindowAssigner::new(
            WindowSpec::sliding(10_000, 3_000),
            SlidingMembership::Overlapping,
        )
        .unwrap();

        assert_eq!(starts(&assigner, 9_500), vec![0, 3_000, 6_000, 9_000]);
    }

    #[test]
    fn test_sliding_aligned() {
        let assigner =
            WindowAssigner::new(WindowSpec::sliding(10_000, 5_000), SlidingMembership::Aligned)
                .unwrap();

        assert_eq!(assigner.assign(7_000), vec![WindowBounds::new(0, 10_000)]);
        assert_eq!(assigner.assign(12_000), vec![WindowBounds::new(10_000, 20_000)]);
    }

    #[test]
    fn test_slide_equal_to_size_is_tumbling() {
        let assigner = WindowAssigner::new(
            WindowSpec::sliding(5_000, 5_000),
            SlidingMembership::Overlapping,
        )
        .unwrap();

        assert_eq!(assigner.assign(7_000), vec![WindowBounds::new(5_000, 10_000)]);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let sliding =
            WindowAssigner::new(WindowSpec::sliding(10, 5), SlidingMembership::Overlapping)
                .unwrap();
        let near_max = sliding.assign(i64::MAX - 2);
        assert!(!near_max.is_empty());
        assert!(near_max.iter().all(|w| w.contains(i64::MAX - 2)));
        assert!(!sliding.assign(i64::MIN).is_empty());

        let tumbling =
            WindowAssigner::new(WindowSpec::tumbling(5_000), SlidingMembership::default()).unwrap();
        assert!(tumbling.assign(i64::MIN)[0].start == i64::MIN);
        assert_eq!(tumbling.assign(i64::MAX - 1).len(), 1);
    }

    #[test]
    fn test_invalid_spec_rejected() {
        let spec = WindowSpec::tumbling(0);
        assert!(WindowAssigner::new(spec, SlidingMembership::default()).is_err());
    }
}
