//! Formatting and delivery of the measured frame rate.

/// A raw frame rate produced by a measurement strategy.
///
/// Samples are produced on the strategy's own context (poll task or compositor thread)
/// and sent to the owner of the [`FpsMeter`](crate::FpsMeter), which formats and delivers them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Session that produced the sample.
    ///
    /// Samples of a session that is no longer active are discarded on delivery.
    pub generation: u64,
    /// Frame rate, in frames per second, or [`UNAVAILABLE`](crate::node::UNAVAILABLE).
    pub rate: f32,
}

/// Receives the formatted frame rate.
///
/// The sink is only ever called on the thread that owns the [`FpsMeter`](crate::FpsMeter).
/// It does not need to be `Send`.
pub trait FpsSink {
    fn deliver(&mut self, fps: &str);
}

impl<F: FnMut(&str)> FpsSink for F {
    fn deliver(&mut self, fps: &str) {
        self(fps)
    }
}

/// Clamps `rate` to `ceiling` and formats it as an integer, rounding half to even.
///
/// The sentinel value `-1.0` formats to `"-1"`.
pub fn format_fps(rate: f32, ceiling: f32) -> String {
    let clamped = rate.min(ceiling);
    let rounded = clamped.round_ties_even() as i64;
    rounded.to_string()
}

/// Formats samples and hands them to the sink.
pub(crate) struct OutputFormatter {
    sink: Box<dyn FpsSink>,
}

impl OutputFormatter {
    pub fn new(sink: Box<dyn FpsSink>) -> Self {
        Self { sink }
    }

    pub fn deliver(&mut self, rate: f32, ceiling: f32) {
        let text = format_fps(rate, ceiling);
        log::trace!("delivering fps {text} (raw {rate}, ceiling {ceiling})");
        self.sink.deliver(&text);
    }
}
