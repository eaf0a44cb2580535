//! Frame-rate measurement engine.
//!
//! The engine estimates the effective refresh rate of a display and delivers it,
//! rounded, to a sink, about once per second. It has two measurement strategies:
//!
//! - **node polling**: the display driver exposes the measured frame rate in a text node
//!   (e.g. `/sys/class/drm/sde-crtc-0/measured_fps`), which is read on a fixed interval;
//! - **frame sampling**: the compositor notifies every rendered frame; frames are counted
//!   per window of one second, and the refreshes that have been missed by the application
//!   are inferred from the gaps between frame timestamps.
//!
//! The strategy is chosen once, at construction: node polling if the node is readable,
//! frame sampling otherwise.
//!
//! # Example
//!
//! ```no_run
//! use fpsmeter::{Config, FpsMeter};
//!
//! # async fn run(compositor: std::sync::Arc<dyn fpsmeter::frame::Compositor>) -> anyhow::Result<()> {
//! let mut meter = FpsMeter::builder(Config::default())
//!     .with_display(|| Some(120.0f32))
//!     .with_compositor(compositor)
//!     .build(|fps: &str| println!("{fps} fps"))?;
//!
//! meter.set_enabled(true);
//! while meter.dispatch_next().await {}
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod format;
pub mod frame;
pub mod meter;
pub mod node;

#[cfg(any(test, feature = "test"))]
pub mod test;

pub use config::Config;
pub use controller::{Mode, SourceKind};
pub use format::{FpsSink, format_fps};
pub use meter::FpsMeter;
