//! Display capabilities.

/// Ceiling used when the display does not report any mode.
pub const DEFAULT_REFRESH_RATE: f32 = 60.0;

/// Queries the capabilities of the display that is being measured.
pub trait DisplayModes: Send {
    /// Returns the refresh rate of the current display mode, in Hz,
    /// or `None` if no display mode is available.
    fn max_refresh_rate(&self) -> Option<f32>;
}

impl<F: Fn() -> Option<f32> + Send> DisplayModes for F {
    fn max_refresh_rate(&self) -> Option<f32> {
        self()
    }
}

/// Returns the refresh rate ceiling of the display, falling back to [`DEFAULT_REFRESH_RATE`].
pub fn refresh_ceiling(display: &dyn DisplayModes) -> f32 {
    match display.max_refresh_rate() {
        Some(rate) if rate.is_finite() && rate > 0.0 => rate,
        Some(rate) => {
            log::warn!("Display reported an invalid refresh rate {rate}, using {DEFAULT_REFRESH_RATE} Hz");
            DEFAULT_REFRESH_RATE
        }
        None => {
            log::warn!("No display mode available, using {DEFAULT_REFRESH_RATE} Hz");
            DEFAULT_REFRESH_RATE
        }
    }
}
