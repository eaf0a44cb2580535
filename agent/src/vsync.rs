//! Simulated compositor.
//!
//! A dedicated thread ticks at the refresh rate of a simulated display. The simulated
//! application renders a frame every `render_every` vsync, and each rendered frame
//! invokes the frame callbacks that were registered since the previous one.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::Context;
use fpsmeter::frame::{Compositor, FrameCallback};

use crate::config::SimulationConfig;

/// Compositor side of the simulation: holds the registered frame callbacks.
#[derive(Default)]
pub struct VsyncCompositor {
    pending: Mutex<Vec<FrameCallback>>,
    stopped: AtomicBool,
}

/// Handle to the vsync thread. The thread stops when the handle is dropped.
pub struct Vsync {
    compositor: Arc<VsyncCompositor>,
    thread: Option<JoinHandle<()>>,
}

impl VsyncCompositor {
    fn lock_pending(&self) -> MutexGuard<'_, Vec<FrameCallback>> {
        // a panicking callback must not stop the display
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invokes the callbacks registered before this frame.
    ///
    /// The callbacks registered during the invocation are kept for the next frame.
    fn render(&self, frame_time_nanos: i64) -> usize {
        let callbacks = std::mem::take(&mut *self.lock_pending());
        let n = callbacks.len();
        for callback in callbacks {
            callback.do_frame(frame_time_nanos);
        }
        n
    }
}

impl Compositor for VsyncCompositor {
    fn post_frame_callback(&self, callback: FrameCallback) {
        self.lock_pending().push(callback);
    }

    fn remove_frame_callbacks(&self) {
        self.lock_pending().clear();
    }
}

impl Vsync {
    /// Starts the vsync thread.
    pub fn spawn(settings: &SimulationConfig) -> anyhow::Result<Self> {
        let period_nanos = (1e9 / f64::from(settings.refresh_rate)).round() as u64;
        anyhow::ensure!(
            period_nanos > 0 && settings.render_every > 0,
            "invalid simulation settings {settings:?}"
        );
        let render_every = u64::from(settings.render_every);

        let compositor = Arc::new(VsyncCompositor::default());
        let thread = thread::Builder::new()
            .name(String::from("vsync"))
            .spawn({
                let compositor = compositor.clone();
                move || run_vsync(&compositor, period_nanos, render_every)
            })
            .context("failed to spawn the vsync thread")?;
        log::debug!(
            "Simulated display: {} Hz, rendering every {render_every} vsync",
            settings.refresh_rate
        );
        Ok(Self {
            compositor,
            thread: Some(thread),
        })
    }

    pub fn compositor(&self) -> Arc<VsyncCompositor> {
        self.compositor.clone()
    }

    /// Stops the vsync thread and waits for it to finish.
    pub fn stop(&mut self) {
        self.compositor.stopped.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("the vsync thread panicked");
            }
        }
    }
}

impl Drop for Vsync {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_vsync(compositor: &VsyncCompositor, period_nanos: u64, render_every: u64) {
    let origin = Instant::now();
    let mut vsync: u64 = 0;
    while !compositor.stopped.load(Ordering::Relaxed) {
        vsync += 1;
        let vsync_nanos = period_nanos.saturating_mul(vsync);
        let deadline = origin + Duration::from_nanos(vsync_nanos);
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        if vsync % render_every == 0 {
            let frame_time_nanos = i64::try_from(vsync_nanos).unwrap_or(i64::MAX);
            let n = compositor.render(frame_time_nanos);
            log::trace!("vsync {vsync}: frame rendered, {n} callback(s)");
        }
    }
    log::debug!("vsync thread stopped after {vsync} vsync");
}
