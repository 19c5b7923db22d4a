//! Event-time windowing
//!
//! # Window Types
//!
//! ## Tumbling Windows
//! Fixed-size, non-overlapping windows. Each event belongs to exactly one window.
//!
//! ```text
//! Time:     0----5----10---15---20---25---30
//! Windows:  [----][----][----][----][----]
//! ```
//!
//! ## Sliding Windows
//! Fixed-size windows advancing by `slide_ms`. With
//! [`SlidingMembership::Overlapping`] an event is appended to every window
//! whose `[start, start + size)` contains it:
//!
//! ```text
//! Time:     0----5----10---15---20---25---30
//! Windows:  [----------]
//!                [----------]
//!                     [----------]
//! ```
//!
//! [`SlidingMembership::Aligned`] keeps the single-window assignment
//! `timestamp - timestamp mod size_ms`.
//!
//! # Completion
//!
//! A window `[start, end)` is complete once the watermark reaches `end`.
//! [`WindowBuffer::take_completed`] hands completed windows to the caller and
//! forgets them. Events that land in a window whose end the watermark already
//! passed are still accepted; they simply complete on the next check.

pub mod assigner;
pub mod buffer;
pub mod types;

pub use assigner::{SlidingMembership, WindowAssigner};
pub use buffer::{FiredWindow, WindowBuffer};
pub use types::{WindowBounds, WindowSpec};
