//! Selection and lifecycle of the measurement strategy.

use std::fmt;

use crate::{
    display::{DisplayModes, refresh_ceiling},
    frame::FrameSampler,
    node::NodePoller,
};

/// The strategy chosen at construction, depending on the availability of the fps node.
pub enum MeasurementSource {
    /// The fps node is readable: poll it.
    NodeBacked(NodePoller),
    /// No usable fps node: count the frames notified by the compositor.
    CallbackBacked(FrameSampler),
}

/// Kind of a [`MeasurementSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Node,
    FrameCallbacks,
}

/// Current state of the [`ModeController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    NodePolling,
    FrameSampling,
}

impl MeasurementSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            MeasurementSource::NodeBacked(_) => SourceKind::Node,
            MeasurementSource::CallbackBacked(_) => SourceKind::FrameCallbacks,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Node => f.write_str("fps node"),
            SourceKind::FrameCallbacks => f.write_str("frame callbacks"),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Idle => f.write_str("idle"),
            Mode::NodePolling => f.write_str("node polling"),
            Mode::FrameSampling => f.write_str("frame sampling"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveSession {
    generation: u64,
    ceiling: f32,
}

/// Starts and stops the measurement strategy.
///
/// At most one session is active at a time. Each session gets a new generation number,
/// which tags the samples that it produces.
pub struct ModeController {
    source: MeasurementSource,
    display: Box<dyn DisplayModes>,
    session: Option<ActiveSession>,
    last_generation: u64,
}

impl ModeController {
    pub fn new(source: MeasurementSource, display: Box<dyn DisplayModes>) -> Self {
        Self {
            source,
            display,
            session: None,
            last_generation: 0,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    pub fn mode(&self) -> Mode {
        match (&self.session, &self.source) {
            (None, _) => Mode::Idle,
            (Some(_), MeasurementSource::NodeBacked(_)) => Mode::NodePolling,
            (Some(_), MeasurementSource::CallbackBacked(_)) => Mode::FrameSampling,
        }
    }

    /// Starts a new session, unless one is already active.
    ///
    /// Returns `true` if a session has been started.
    pub fn activate(&mut self) -> bool {
        if self.session.is_some() {
            log::trace!("measurement already active");
            return false;
        }
        self.last_generation += 1;
        let generation = self.last_generation;
        let ceiling = refresh_ceiling(self.display.as_ref());
        match &mut self.source {
            MeasurementSource::NodeBacked(poller) => poller.start(generation),
            MeasurementSource::CallbackBacked(sampler) => sampler.activate(generation, ceiling),
        }
        self.session = Some(ActiveSession { generation, ceiling });
        log::info!("fps measurement started: {} (ceiling {ceiling} Hz)", self.mode());
        true
    }

    /// Stops the active session, if any.
    ///
    /// Returns `true` if a session has been stopped.
    pub fn deactivate(&mut self) -> bool {
        if self.session.take().is_none() {
            return false;
        }
        match &mut self.source {
            MeasurementSource::NodeBacked(poller) => poller.stop(),
            MeasurementSource::CallbackBacked(sampler) => sampler.deactivate(),
        }
        log::info!("fps measurement stopped");
        true
    }

    /// Returns the refresh ceiling of the session `generation`, if it is the active session.
    pub fn ceiling_of(&self, generation: u64) -> Option<f32> {
        self.session
            .filter(|s| s.generation == generation)
            .map(|s| s.ceiling)
    }

    pub fn source(&self) -> &MeasurementSource {
        &self.source
    }
}
