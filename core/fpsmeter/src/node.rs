//! Frame rate read from a text node exposed by the display driver.
//!
//! ## Expected content
//!
//! The node contains one line, which is either a bare number or a labelled value:
//! ```txt
//! 59.94
//! fps: 59.94
//! ```

use std::{
    fs::File,
    io::{BufRead, BufReader, Seek},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{runtime, sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{NodeError, ParseFpsError, ReadError},
    format::Sample,
};

/// Value emitted when the node could not be read or parsed.
pub const UNAVAILABLE: f32 = -1.0;

/// An opened fps node.
#[derive(Debug)]
pub struct FpsNode {
    path: PathBuf,
    reader: BufReader<File>,
    buf: String,
}

impl FpsNode {
    /// Opens the node at `path`, failing if it does not exist or is not readable.
    ///
    /// The node is read once: an I/O error makes it unavailable (e.g. `path` is a directory),
    /// but content that does not parse yet is accepted.
    pub fn open(path: &Path) -> Result<Self, NodeError> {
        let file = File::open(path).map_err(|e| NodeError::Unavailable(path.to_path_buf(), e))?;
        let mut node = Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            buf: String::with_capacity(32),
        };
        match node.read_fps() {
            Ok(_) => Ok(node),
            Err(ReadError::Parse(_, e)) => {
                log::debug!("fps node {path:?} is readable but its content is not valid yet: {e}");
                Ok(node)
            }
            Err(ReadError::Io(path, e)) => Err(NodeError::Unavailable(path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current frame rate from the beginning of the node.
    pub fn read_fps(&mut self) -> Result<f32, ReadError> {
        self.buf.clear();
        self.reader
            .rewind()
            .and_then(|_| self.reader.read_line(&mut self.buf))
            .map_err(|e| ReadError::Io(self.path.clone(), e))?;
        parse_fps(&self.buf).map_err(|e| ReadError::Parse(self.path.clone(), e))
    }

    /// Reads the current frame rate, or returns [`UNAVAILABLE`] if it cannot be read.
    pub fn read_fps_or_sentinel(&mut self) -> f32 {
        match self.read_fps() {
            Ok(fps) => fps,
            Err(e) => {
                log::error!("Failed to read the frame rate (will retry): {e:#}");
                UNAVAILABLE
            }
        }
    }
}

/// Parses one line of a fps node: `"59.94"` or `"label: 59.94"`.
///
/// For a labelled value, the first token that follows `": "` is parsed.
pub fn parse_fps(line: &str) -> Result<f32, ParseFpsError> {
    let line = line.trim();
    let value = match line.split_once(": ") {
        Some((_label, rest)) => rest.split_whitespace().next().unwrap_or_default(),
        None => line,
    };
    if value.is_empty() {
        return Err(ParseFpsError::Empty);
    }
    let fps: f32 = value
        .parse()
        .map_err(|e| ParseFpsError::NotANumber(value.to_owned(), e))?;
    if !fps.is_finite() {
        return Err(ParseFpsError::NotFinite(value.to_owned()));
    }
    Ok(fps)
}

/// Reads the node on a fixed interval, in a background task.
pub struct NodePoller {
    node: Arc<Mutex<FpsNode>>,
    poll_interval: Duration,
    rt: runtime::Handle,
    tx: mpsc::UnboundedSender<Sample>,
    /// Generation of the active session, `0` if none.
    active: Arc<AtomicU64>,
    task: Option<PollTask>,
}

struct PollTask {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl NodePoller {
    pub fn new(
        node: FpsNode,
        poll_interval: Duration,
        rt: runtime::Handle,
        tx: mpsc::UnboundedSender<Sample>,
    ) -> Self {
        Self {
            node: Arc::new(Mutex::new(node)),
            poll_interval,
            rt,
            tx,
            active: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Starts polling the node, emitting samples tagged with `generation`.
    ///
    /// Does nothing if the poller is already running.
    pub fn start(&mut self, generation: u64) {
        if self.task.is_some() {
            return;
        }
        let token = CancellationToken::new();
        self.active.store(generation, Ordering::Release);
        let handle = self.rt.spawn(run_poller(
            self.node.clone(),
            self.poll_interval,
            generation,
            self.active.clone(),
            token.clone(),
            self.tx.clone(),
        ));
        log::debug!("node poller started (generation {generation}, every {:?})", self.poll_interval);
        self.task = Some(PollTask {
            generation,
            token,
            handle,
        });
    }

    /// Stops polling. Does nothing if the poller is not running.
    ///
    /// A read that is in progress completes, but its sample is not sent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            self.active.store(0, Ordering::Release);
            task.token.cancel();
            log::debug!("node poller stopped (generation {})", task.generation);
            // detached: the task exits on cancellation
            drop(task.handle);
        }
    }
}

impl Drop for NodePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_poller(
    node: Arc<Mutex<FpsNode>>,
    poll_interval: Duration,
    generation: u64,
    active: Arc<AtomicU64>,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<Sample>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,
            _ = interval.tick() => (),
        }

        let rate = node.lock().unwrap_or_else(PoisonError::into_inner).read_fps_or_sentinel();

        // The session may have ended during the read.
        if token.is_cancelled() || active.load(Ordering::Acquire) != generation {
            log::trace!("discarding fps {rate} read after the poller was stopped");
            break;
        }
        if tx.send(Sample { generation, rate }).is_err() {
            // the meter has been dropped
            break;
        }
    }
    log::trace!("node poller task {generation} stops");
}
