//! Owner-side interface of the measurement engine.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio::{
    runtime,
    sync::mpsc::{self, error::TryRecvError},
};

use crate::{
    config::Config,
    controller::{MeasurementSource, Mode, ModeController, SourceKind},
    display::DisplayModes,
    error::NodeError,
    format::{FpsSink, OutputFormatter, Sample},
    frame::{Clock, Compositor, FrameSampler, MonotonicClock},
    node::{FpsNode, NodePoller},
};

/// Measures the frame rate of a display and delivers it to a sink.
///
/// The meter belongs to one thread (typically the UI thread): activation, deactivation
/// and delivery happen on that thread. The measurement strategies run in the background
/// and send their samples to the meter, which delivers them when [`dispatch_pending`](Self::dispatch_pending)
/// or [`dispatch_next`](Self::dispatch_next) is called.
///
/// Samples produced by a session that has been stopped in the meantime are discarded.
pub struct FpsMeter {
    controller: ModeController,
    rx: mpsc::UnboundedReceiver<Sample>,
    formatter: OutputFormatter,
    detached: bool,
}

/// Builder for [`FpsMeter`].
pub struct Builder {
    config: Config,
    display: Option<Box<dyn DisplayModes>>,
    compositor: Option<Arc<dyn Compositor>>,
    clock: Option<Arc<dyn Clock>>,
    rt: Option<runtime::Handle>,
}

impl Builder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            display: None,
            compositor: None,
            clock: None,
            rt: None,
        }
    }

    /// Sets the display whose refresh rate is used as the ceiling.
    ///
    /// Without a display, the ceiling is [`DEFAULT_REFRESH_RATE`](crate::display::DEFAULT_REFRESH_RATE).
    pub fn with_display(mut self, display: impl DisplayModes + 'static) -> Self {
        self.display = Some(Box::new(display));
        self
    }

    /// Sets the compositor, required when the fps node is not available.
    pub fn with_compositor(mut self, compositor: Arc<dyn Compositor>) -> Self {
        self.compositor = Some(compositor);
        self
    }

    /// Sets the clock that delimits the frame windows. Defaults to [`MonotonicClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the runtime that runs the background tasks. Defaults to the current runtime.
    pub fn with_runtime(mut self, rt: runtime::Handle) -> Self {
        self.rt = Some(rt);
        self
    }

    /// Chooses the measurement strategy and builds the meter.
    ///
    /// The meter is idle until it is activated.
    pub fn build(self, sink: impl FpsSink + 'static) -> anyhow::Result<FpsMeter> {
        self.config.validate().context("invalid config")?;
        let rt = match self.rt {
            Some(rt) => rt,
            None => runtime::Handle::try_current().context("the fps meter must be built inside a tokio runtime")?,
        };
        let display: Box<dyn DisplayModes> = match self.display {
            Some(display) => display,
            None => Box::new(|| None::<f32>),
        };
        let (tx, rx) = mpsc::unbounded_channel();

        let source = match open_node(&self.config) {
            Ok(node) => {
                log::info!("Reading the frame rate from {:?}", node.path());
                MeasurementSource::NodeBacked(NodePoller::new(node, self.config.poll_interval, rt, tx))
            }
            Err(e) => {
                log::warn!("Cannot use the fps node ({e:#}), falling back to frame callbacks");
                let compositor = self
                    .compositor
                    .ok_or_else(|| anyhow!("no compositor to fall back to, the fps node is not available"))?;
                let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
                let sampler = FrameSampler::new(compositor, clock, tx, rt, self.config.registration_kick_delay);
                MeasurementSource::CallbackBacked(sampler)
            }
        };

        Ok(FpsMeter {
            controller: ModeController::new(source, display),
            rx,
            formatter: OutputFormatter::new(Box::new(sink)),
            detached: false,
        })
    }
}

fn open_node(config: &Config) -> Result<FpsNode, NodeError> {
    let path = config.node_path.as_deref().ok_or(NodeError::NotConfigured)?;
    FpsNode::open(path)
}

impl FpsMeter {
    pub fn builder(config: Config) -> Builder {
        Builder::new(config)
    }

    pub fn mode(&self) -> Mode {
        self.controller.mode()
    }

    pub fn source_kind(&self) -> SourceKind {
        self.controller.source_kind()
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Applies the "measurement enabled" signal.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.activate();
        } else {
            self.deactivate();
        }
    }

    /// Starts measuring. Does nothing if the measurement is already active.
    pub fn activate(&mut self) {
        if self.detached {
            log::warn!("fps meter is detached, ignoring activation");
            return;
        }
        self.controller.activate();
    }

    /// Stops measuring. Does nothing if the measurement is not active.
    pub fn deactivate(&mut self) {
        if self.controller.deactivate() {
            self.discard_pending();
        }
    }

    /// Tears the meter down: stops the measurement for good.
    pub fn detach(&mut self) {
        if !self.detached {
            self.deactivate();
            self.detached = true;
            log::debug!("fps meter detached");
        }
    }

    /// Delivers the samples that are ready, without waiting.
    ///
    /// Returns the number of values delivered to the sink.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            match self.rx.try_recv() {
                Ok(sample) => {
                    if self.dispatch(sample) {
                        delivered += 1;
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        delivered
    }

    /// Waits for the next sample of the active session and delivers it.
    ///
    /// Stale samples are skipped. Returns `false` if no more samples can be produced:
    /// an idle or detached meter returns immediately.
    pub async fn dispatch_next(&mut self) -> bool {
        if self.controller.mode() == Mode::Idle {
            log::debug!("fps meter is not measuring, no sample to wait for");
            return false;
        }
        while let Some(sample) = self.rx.recv().await {
            if self.dispatch(sample) {
                return true;
            }
        }
        false
    }

    fn dispatch(&mut self, sample: Sample) -> bool {
        match self.controller.ceiling_of(sample.generation) {
            Some(ceiling) => {
                self.formatter.deliver(sample.rate, ceiling);
                true
            }
            None => {
                log::trace!("discarding stale sample {sample:?}");
                false
            }
        }
    }

    fn discard_pending(&mut self) {
        while let Ok(sample) = self.rx.try_recv() {
            log::trace!("discarding sample {sample:?} of a stopped session");
        }
    }
}

impl Drop for FpsMeter {
    fn drop(&mut self) {
        self.detach();
    }
}
