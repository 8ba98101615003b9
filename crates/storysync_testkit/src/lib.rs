//! # Storysync Testkit
//!
//! Test utilities for storysync.
//!
//! This crate provides:
//! - Entity builders and canned fixtures
//! - An in-memory tracker implementing the tracker port, with
//!   scriptable failures and call recording
//! - A scripted remote backend for executor and limiter tests
//! - Property-based test generators using proptest

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod fixtures;
pub mod generators;
pub mod tracker;

pub use backend::ScriptedBackend;
pub use fixtures::{epic, sample_epic, story, EpicBuilder, StoryBuilder};
pub use tracker::MemoryTracker;
