//! Frame rate estimated from the frame callbacks of the compositor.
//!
//! The compositor invokes a callback once per *rendered* frame, on its own thread.
//! When the application misses a refresh, no callback is invoked for it: the
//! number of missed refreshes is estimated from the gap between two consecutive
//! frame timestamps, and added to the frame count of the current window.
//!
//! A [`FrameCallback`] is one-shot. After each invocation, the sampler registers a new
//! one for the next frame, until it is deactivated.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::{Duration, Instant},
};

use tokio::{runtime, sync::mpsc};
use tokio_util::sync::CancellationToken;

use crate::format::Sample;

/// Minimum duration of a sample window, in milliseconds.
pub const WINDOW_MILLIS: i64 = 1000;

/// Source of the wall-clock time that delimits the sample windows.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds, from an arbitrary origin.
    fn now_millis(&self) -> i64;
}

/// A [`Clock`] based on [`std::time::Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

/// The display compositor, which notifies rendered frames.
pub trait Compositor: Send + Sync {
    /// Registers a callback to invoke, once, on the next rendered frame.
    ///
    /// The callback must be invoked later, from the compositor's own context,
    /// never synchronously from `post_frame_callback`.
    fn post_frame_callback(&self, callback: FrameCallback);

    /// Unregisters the callbacks that have been posted and not invoked yet.
    fn remove_frame_callbacks(&self);
}

/// Returns the number of refreshes that have been missed between two frames.
///
/// With `T = 1e9 / refresh_rate` the frame period in nanoseconds and `Δ` the gap between
/// the two frames, the result is `0` if `Δ < T` and `floor(Δ / T) - 1` otherwise.
/// The `- 1` applies to every gap of at least one period, including gaps that are
/// not an exact multiple of `T`: a gap of `1.9 T` counts as no drop.
pub fn dropped_frames(previous_frame_nanos: i64, current_frame_nanos: i64, refresh_rate: f32) -> u32 {
    let frame_period = 1_000_000_000.0 / f64::from(refresh_rate);
    let frame_duration = current_frame_nanos.saturating_sub(previous_frame_nanos) as f64;
    if frame_duration < frame_period {
        0
    } else {
        // the quotient is >= 1 here
        (frame_duration / frame_period) as u32 - 1
    }
}

/// Frames counted during the current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleWindow {
    last_frame_nanos: Option<i64>,
    frame_count: u32,
    window_start_millis: i64,
}

impl SampleWindow {
    pub fn new(start_millis: i64) -> Self {
        Self {
            last_frame_nanos: None,
            frame_count: 0,
            window_start_millis: start_millis,
        }
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn last_frame_nanos(&self) -> Option<i64> {
        self.last_frame_nanos
    }

    pub fn window_start_millis(&self) -> i64 {
        self.window_start_millis
    }

    /// Records a rendered frame.
    ///
    /// Returns the frame rate of the window if it has lasted at least [`WINDOW_MILLIS`],
    /// in which case a new window starts at `now_millis`.
    pub fn record(&mut self, frame_time_nanos: i64, now_millis: i64, refresh_rate: f32) -> Option<f32> {
        let previous = self.last_frame_nanos.replace(frame_time_nanos)?;
        let dropped = dropped_frames(previous, frame_time_nanos, refresh_rate);
        self.frame_count = self.frame_count.saturating_add(1).saturating_add(dropped);

        let elapsed_millis = now_millis - self.window_start_millis;
        if elapsed_millis >= WINDOW_MILLIS {
            let rate = self.frame_count as f32 * 1000.0 / elapsed_millis as f32;
            self.frame_count = 0;
            self.window_start_millis = now_millis;
            Some(rate)
        } else {
            None
        }
    }
}

/// A one-shot registration for the next rendered frame.
pub struct FrameCallback {
    sampler: Weak<SamplerShared>,
    generation: u64,
    ticket: u64,
}

impl FrameCallback {
    /// Session of the sampler that registered this callback.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Notifies the sampler that a frame has been rendered at `frame_time_nanos` (monotonic clock).
    ///
    /// If the session that registered the callback has ended, the frame is ignored
    /// and no new callback is registered.
    pub fn do_frame(self, frame_time_nanos: i64) {
        match self.sampler.upgrade() {
            Some(sampler) => sampler.on_frame(self.generation, self.ticket, frame_time_nanos),
            None => log::trace!("frame callback {} invoked after the sampler was dropped", self.generation),
        }
    }
}

impl fmt::Debug for FrameCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCallback")
            .field("generation", &self.generation)
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

struct Session {
    generation: u64,
    ceiling: f32,
    window: SampleWindow,
    /// Ticket of the only callback that may count the next frame.
    armed: u64,
}

/// State shared between the owner of the sampler and the compositor's context.
struct SamplerShared {
    session: Mutex<Option<Session>>,
    compositor: Arc<dyn Compositor>,
    clock: Arc<dyn Clock>,
    tx: mpsc::UnboundedSender<Sample>,
}

impl SamplerShared {
    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| {
            log::error!("frame sampler lock poisoned, recovering the session");
            e.into_inner()
        })
    }

    /// Posts the callback for the next frame. Must be called with the session lock held,
    /// so that a deactivation cannot slip between the check of the session and the registration.
    ///
    /// The previous callbacks of the session are superseded: at most one callback chain is alive.
    fn rearm(self: &Arc<Self>, session: &mut Session) {
        session.armed += 1;
        self.compositor.post_frame_callback(FrameCallback {
            sampler: Arc::downgrade(self),
            generation: session.generation,
            ticket: session.armed,
        });
    }

    fn on_frame(self: &Arc<Self>, generation: u64, ticket: u64, frame_time_nanos: i64) {
        let mut guard = self.lock_session();
        let Some(session) = guard.as_mut().filter(|s| s.generation == generation) else {
            log::trace!("discarding late frame callback of session {generation}");
            return;
        };
        if session.armed != ticket {
            log::trace!("discarding superseded frame callback {ticket} of session {generation}");
            return;
        }

        let now_millis = self.clock.now_millis();
        if let Some(rate) = session.window.record(frame_time_nanos, now_millis, session.ceiling) {
            log::trace!("frame window closed: {rate} fps");
            if self.tx.send(Sample { generation, rate }).is_err() {
                log::trace!("fps meter dropped, frame sample lost");
            }
        }
        self.rearm(session);
    }
}

/// Counts the frames notified by the compositor, per window of one second.
pub struct FrameSampler {
    shared: Arc<SamplerShared>,
    rt: runtime::Handle,
    kick_delay: Option<Duration>,
    kick_token: Option<CancellationToken>,
}

impl FrameSampler {
    pub fn new(
        compositor: Arc<dyn Compositor>,
        clock: Arc<dyn Clock>,
        tx: mpsc::UnboundedSender<Sample>,
        rt: runtime::Handle,
        kick_delay: Option<Duration>,
    ) -> Self {
        Self {
            shared: Arc::new(SamplerShared {
                session: Mutex::new(None),
                compositor,
                clock,
                tx,
            }),
            rt,
            kick_delay,
            kick_token: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock_session().is_some()
    }

    /// Returns a copy of the current window, if the sampler is active.
    pub fn window(&self) -> Option<SampleWindow> {
        self.shared.lock_session().as_ref().map(|s| s.window.clone())
    }

    /// Starts counting frames and registers the first frame callback.
    ///
    /// `ceiling` is the maximum refresh rate of the display, used to estimate dropped frames.
    /// Does nothing if the sampler is already active.
    pub fn activate(&mut self, generation: u64, ceiling: f32) {
        {
            let mut guard = self.shared.lock_session();
            if guard.is_some() {
                return;
            }
            let session = guard.insert(Session {
                generation,
                ceiling,
                window: SampleWindow::new(self.shared.clock.now_millis()),
                armed: 0,
            });
            self.shared.rearm(session);
        }
        log::debug!("frame sampler activated (generation {generation}, ceiling {ceiling} Hz)");

        if let Some(delay) = self.kick_delay {
            let token = CancellationToken::new();
            self.rt.spawn(kick_registration(
                Arc::downgrade(&self.shared),
                generation,
                delay,
                token.clone(),
            ));
            self.kick_token = Some(token);
        }
    }

    /// Unregisters the frame callback and discards the current window.
    ///
    /// Does nothing if the sampler is not active.
    pub fn deactivate(&mut self) {
        if let Some(token) = self.kick_token.take() {
            token.cancel();
        }
        let mut guard = self.shared.lock_session();
        if let Some(session) = guard.take() {
            self.shared.compositor.remove_frame_callbacks();
            log::debug!("frame sampler deactivated (generation {})", session.generation);
        }
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Registers the frame callback again after `delay`, if the session is still active.
async fn kick_registration(sampler: Weak<SamplerShared>, generation: u64, delay: Duration, token: CancellationToken) {
    tokio::select! {
        biased;

        _ = token.cancelled() => return,
        _ = tokio::time::sleep(delay) => (),
    }
    let Some(sampler) = sampler.upgrade() else {
        return;
    };
    let mut guard = sampler.lock_session();
    if let Some(session) = guard.as_mut().filter(|s| s.generation == generation) {
        log::trace!("registering the frame callback of session {generation} again");
        sampler.compositor.remove_frame_callbacks();
        sampler.rearm(session);
    }
}
