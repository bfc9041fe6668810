//! Local (headless Chromium) implementation of the transcript acquisition pipeline.
//!
//! The pipeline itself only talks to `tubescribe_core::{BrowserEngine, PageSession}`;
//! [`chromium`] is the production engine.

pub mod capture;
pub mod chromium;
pub mod config;
pub mod interact;
pub mod metadata;
pub mod payload;
pub mod pipeline;
pub mod traffic;

pub use chromium::{ChromiumEngine, ChromiumOptions};
pub use pipeline::Acquirer;
pub use traffic::TrafficPolicy;
