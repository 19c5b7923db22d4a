//! Core types for the stream engine
//!
//! This crate holds the event model shared by producers, output sinks and the
//! `stream-processor` engine.

pub mod events;

pub use events::StreamEvent;
