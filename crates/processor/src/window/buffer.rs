//! Per-partition window contents

use super::types::WindowBounds;
use crate::watermark::Watermark;
use std::collections::BTreeMap;
use stream_engine_types::StreamEvent;
use tracing::debug;

/// A completed window removed from the buffer
pub type FiredWindow = (WindowBounds, Vec<StreamEvent>);

/// Open windows of one stream on one partition, keyed by window start.
///
/// All windows in a buffer have the same size, so ordering by start is also
/// ordering by end and completed windows are always a prefix of the map.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    size_ms: i64,
    windows: BTreeMap<i64, Vec<StreamEvent>>,
}

impl WindowBuffer {
    pub fn new(size_ms: u64) -> Self {
        Self {
            size_ms: i64::try_from(size_ms).unwrap_or(i64::MAX),
            windows: BTreeMap::new(),
        }
    }

    /// Append an event to a window
    pub fn add(&mut self, bounds: WindowBounds, event: StreamEvent) {
        self.windows.entry(bounds.start).or_default().push(event);
    }

    /// Remove and return every window the watermark has passed
    pub fn take_completed(&mut self, watermark: Watermark) -> Vec<FiredWindow> {
        let mut fired = Vec::new();

        while let Some(entry) = self.windows.first_entry() {
            let bounds = window_bounds(*entry.key(), self.size_ms);
            if !bounds.is_complete(watermark) {
                break;
            }
            let events = entry.remove();
            debug!(
                window_start = bounds.start,
                window_end = bounds.end,
                events = events.len(),
                "window complete"
            );
            fired.push((bounds, events));
        }

        fired
    }

    /// Remove and return every open window, regardless of the watermark
    pub fn drain_all(&mut self) -> Vec<FiredWindow> {
        let size_ms = self.size_ms;
        std::mem::take(&mut self.windows)
            .into_iter()
            .map(|(start, events)| (window_bounds(start, size_ms), events))
            .collect()
    }

    /// Put fired windows back, undoing [`take_completed`](Self::take_completed)
    pub fn restore_fired(&mut self, fired: Vec<FiredWindow>) {
        for (bounds, mut events) in fired {
            let slot = self.windows.entry(bounds.start).or_default();
            events.append(slot);
            *slot = events;
        }
    }

    /// Remove the most recently appended event of a window, undoing [`add`](Self::add)
    pub fn undo_add(&mut self, bounds: WindowBounds) -> Option<StreamEvent> {
        let events = self.windows.get_mut(&bounds.start)?;
        let event = events.pop();
        if events.is_empty() {
            self.windows.remove(&bounds.start);
        }
        event
    }

    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn buffered_events(&self) -> usize {
        self.windows.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

fn window_bounds(start: i64, size_ms: i64) -> WindowBounds {
    WindowBounds::new(start, start.saturating_add(size_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(ts: i64) -> StreamEvent {
        StreamEvent::new("k", json!(ts), ts)
    }

    fn window(start: i64) -> WindowBounds {
        WindowBounds::new(start, start + 5_000)
    }

    #[test]
    fn test_no_emission_before_watermark() {
        let mut buffer = WindowBuffer::new(5_000);
        buffer.add(window(0), event(0));
        buffer.add(window(0), event(1_000));
        buffer.add(window(0), event(4_000));

        assert!(buffer.take_completed(Watermark::new(4_999)).is_empty());
        assert_eq!(buffer.buffered_events(), 3);
    }

    #[test]
    fn test_take_completed_prefix() {
        let mut buffer = WindowBuffer::new(5_000);
        buffer.add(window(0), event(0));
        buffer.add(window(0), event(4_000));
        buffer.add(window(5_000), event(6_000));
        buffer.add(window(10_000), event(11_000));

        let fired = buffer.take_completed(Watermark::new(10_000));

        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].0, window(0));
        assert_eq!(fired[0].1.len(), 2);
        assert_eq!(fired[1].0, window(5_000));
        assert_eq!(buffer.open_windows(), 1);
    }

    #[test]
    fn test_drain_all() {
        let mut buffer = WindowBuffer::new(5_000);
        buffer.add(window(0), event(0));
        buffer.add(window(50_000), event(50_000));

        let fired = buffer.drain_all();
        assert_eq!(fired.len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_rollback_restores_contents() {
        let mut buffer = WindowBuffer::new(5_000);
        buffer.add(window(0), event(0));
        buffer.add(window(0), event(1_000));

        buffer.add(window(0), event(2_000));
        let fired = buffer.take_completed(Watermark::new(5_000));
        assert_eq!(fired.len(), 1);

        buffer.restore_fired(fired);
        let undone = buffer.undo_add(window(0)).unwrap();
        assert_eq!(undone.timestamp(), 2_000);

        let timestamps: Vec<i64> = buffer
            .drain_all()
            .into_iter()
            .flat_map(|(_, events)| events)
            .map(|e| e.timestamp())
            .collect();
        assert_eq!(timestamps, vec![0, 1_000]);
    }

    #[test]
    fn test_undo_removes_empty_window() {
        let mut buffer = WindowBuffer::new(5_000);
        buffer.add(window(0), event(0));
        buffer.undo_add(window(0));

        assert!(buffer.is_empty());
        assert!(buffer.undo_add(window(0)).is_none());
    }
}
