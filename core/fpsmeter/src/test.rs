//! Test doubles for the collaborators of the engine.
//!
//! Enabled with the `test` feature.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicI64, AtomicUsize, Ordering},
};

use crate::{
    display::DisplayModes,
    format::FpsSink,
    frame::{Clock, Compositor, FrameCallback},
};

/// A compositor whose frames are produced by the test.
#[derive(Debug, Default)]
pub struct ManualCompositor {
    pending: Mutex<Vec<FrameCallback>>,
    posted: AtomicUsize,
    removals: AtomicUsize,
}

impl ManualCompositor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of callbacks waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Total number of callbacks that have been posted.
    pub fn posted(&self) -> usize {
        self.posted.load(Ordering::Relaxed)
    }

    /// Number of calls to `remove_frame_callbacks`.
    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::Relaxed)
    }

    /// Takes the pending callbacks without invoking them, as if they were in flight.
    pub fn take_pending(&self) -> Vec<FrameCallback> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }

    /// Renders a frame at `frame_time_nanos`: invokes the pending callbacks.
    ///
    /// Returns the number of callbacks invoked.
    pub fn render(&self, frame_time_nanos: i64) -> usize {
        let callbacks = self.take_pending();
        let n = callbacks.len();
        for callback in callbacks {
            callback.do_frame(frame_time_nanos);
        }
        n
    }
}

impl Compositor for ManualCompositor {
    fn post_frame_callback(&self, callback: FrameCallback) {
        self.posted.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().unwrap().push(callback);
    }

    fn remove_frame_callbacks(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().unwrap().clear();
    }
}

/// A clock that only moves when the test says so.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::Relaxed);
    }

    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::Relaxed)
    }
}

/// A display with a fixed refresh rate, or without any mode.
#[derive(Debug, Clone, Copy)]
pub struct FixedDisplay(pub Option<f32>);

impl DisplayModes for FixedDisplay {
    fn max_refresh_rate(&self) -> Option<f32> {
        self.0
    }
}

/// A sink that records the delivered values.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    values: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> Vec<String> {
        self.values.lock().unwrap().clone()
    }
}

impl FpsSink for RecordingSink {
    fn deliver(&mut self, fps: &str) {
        self.values.lock().unwrap().push(fps.to_owned());
    }
}
