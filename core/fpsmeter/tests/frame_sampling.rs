use std::{sync::Arc, thread, time::Duration};

use fpsmeter::{
    Config, FpsMeter, Mode, SourceKind,
    test::{FixedDisplay, ManualClock, ManualCompositor, RecordingSink},
};
use pretty_assertions::assert_eq;

const MS: i64 = 1_000_000;

fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

fn no_node_config() -> Config {
    Config {
        node_path: None,
        poll_interval: Duration::from_secs(1),
        registration_kick_delay: None,
    }
}

struct Setup {
    meter: FpsMeter,
    compositor: Arc<ManualCompositor>,
    clock: Arc<ManualClock>,
    sink: RecordingSink,
}

fn setup(ceiling: Option<f32>) -> anyhow::Result<Setup> {
    let compositor = ManualCompositor::new();
    let clock = ManualClock::new();
    let sink = RecordingSink::new();
    let meter = FpsMeter::builder(no_node_config())
        .with_display(FixedDisplay(ceiling))
        .with_compositor(compositor.clone())
        .with_clock(clock.clone())
        .build(sink.clone())?;
    Ok(Setup {
        meter,
        compositor,
        clock,
        sink,
    })
}

/// Renders frames every `gap_ms` milliseconds in `[start_ms, end_ms]`,
/// with the wall clock following the frame timestamps.
fn render_frames(setup: &Setup, start_ms: i64, end_ms: i64, gap_ms: i64) {
    let mut t = start_ms;
    while t <= end_ms {
        setup.clock.set(t);
        assert_eq!(setup.compositor.render(t * MS), 1, "frame at {t}ms should have a callback");
        t += gap_ms;
    }
}

#[tokio::test]
async fn dense_callbacks_are_clamped() -> anyhow::Result<()> {
    init_logger();
    let mut s = setup(Some(60.0))?;
    assert_eq!(s.meter.source_kind(), SourceKind::FrameCallbacks);

    s.meter.set_enabled(true);
    assert_eq!(s.meter.mode(), Mode::FrameSampling);

    // 8ms between frames, faster than the 16.67ms period: no frame is dropped,
    // the window closes at 1002ms with 119 frames
    render_frames(&s, 50, 1050, 8);
    assert_eq!(s.meter.dispatch_pending(), 1);
    assert_eq!(s.sink.values(), vec!["60"]);
    Ok(())
}

#[tokio::test]
async fn dense_callbacks_below_ceiling() -> anyhow::Result<()> {
    init_logger();
    let mut s = setup(Some(144.0))?;
    s.meter.set_enabled(true);
    render_frames(&s, 50, 1050, 8);
    assert_eq!(s.meter.dispatch_pending(), 1);
    assert_eq!(s.sink.values(), vec!["119"]);
    Ok(())
}

#[tokio::test]
async fn dropped_frames_are_counted() -> anyhow::Result<()> {
    init_logger();
    // 50 Hz display, the application renders every other refresh
    let mut s = setup(Some(50.0))?;
    s.meter.set_enabled(true);

    render_frames(&s, 0, 1000, 40);
    assert_eq!(s.meter.dispatch_pending(), 1);
    render_frames(&s, 1040, 2000, 40);
    assert_eq!(s.meter.dispatch_pending(), 1);
    // a naive count would report 25
    assert_eq!(s.sink.values(), vec!["50", "50"]);
    Ok(())
}

#[tokio::test]
async fn no_display_mode_uses_default_ceiling() -> anyhow::Result<()> {
    init_logger();
    let mut s = setup(None)?;
    s.meter.set_enabled(true);
    render_frames(&s, 0, 1000, 5);
    s.meter.dispatch_pending();
    assert_eq!(s.sink.values(), vec!["60"]);
    Ok(())
}

#[tokio::test]
async fn deactivation_unregisters_and_discards() -> anyhow::Result<()> {
    init_logger();
    let mut s = setup(Some(60.0))?;
    s.meter.set_enabled(true);
    s.meter.set_enabled(true);
    assert_eq!(s.compositor.pending(), 1);
    assert_eq!(s.compositor.posted(), 1);

    // a window closes, but the meter is deactivated before delivering it
    render_frames(&s, 0, 1008, 16);
    s.meter.set_enabled(false);
    assert_eq!(s.meter.mode(), Mode::Idle);
    assert_eq!(s.compositor.pending(), 0);
    assert_eq!(s.meter.dispatch_pending(), 0);
    assert!(s.sink.values().is_empty());

    // the mode does not change across sessions
    s.meter.set_enabled(true);
    assert_eq!(s.meter.mode(), Mode::FrameSampling);
    assert_eq!(s.compositor.pending(), 1);
    Ok(())
}

#[tokio::test]
async fn callbacks_from_compositor_thread() -> anyhow::Result<()> {
    init_logger();
    let mut s = setup(Some(60.0))?;
    s.meter.set_enabled(true);

    // the compositor runs on its own thread, the samples are delivered on this one
    let compositor = s.compositor.clone();
    let clock = s.clock.clone();
    thread::spawn(move || {
        for i in 0..=60 {
            clock.set(i * 17);
            compositor.render(i * 17 * MS);
        }
    })
    .join()
    .expect("compositor thread panicked");

    assert!(s.meter.dispatch_next().await);
    assert_eq!(s.sink.values(), vec!["59"]);
    Ok(())
}
