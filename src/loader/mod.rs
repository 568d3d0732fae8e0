//! Streaming loader: opens a status source, detects its layout and hands
//! snapshots to the caller as they are parsed.
//!
//! # Lifecycle
//!
//! ```text
//! Unopened ──open──▶ Detecting ──layout found──▶ Streaming ──EOF / fault / cancel──▶ Closed
//!     │                   │
//!     └── LoaderError::Open   └── LoaderError::Format
//! ```
//!
//! Opening and detection happen on the caller's thread, so both failures are
//! returned synchronously by [`Loader::fetch_status`]. Everything after that
//! runs on a producer thread and is reported through [`SnapshotStream`].
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use myqstat::loader::{Loader, Source};
//!
//! let loader = Loader::new(
//!     Duration::from_secs(1),
//!     Source::File("mysqladmin.lots".into()),
//!     None,
//! );
//! for snapshot in loader.fetch_status().unwrap() {
//!     println!("uptime {}", snapshot.uptime().unwrap());
//! }
//! ```

mod sequencer;
mod source;
mod stream;

pub use stream::{CloseReason, Next, SnapshotStream, StreamSummary};

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::parser::{FormatError, detect_layout};

/// Default number of snapshots buffered between producer and consumer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Default number of non-blank lines inspected for layout detection.
pub const DEFAULT_DETECT_LIMIT: usize = 64;

/// Where status text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Previously captured status output, replayed once.
    File(PathBuf),
    /// Status command whose standard output is read live.
    Command(String),
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::File(path) => write!(f, "file '{}'", path.display()),
            Source::Command(program) => write!(f, "command '{}'", program),
        }
    }
}

/// Errors returned before any snapshot is produced.
#[derive(Debug)]
pub enum LoaderError {
    /// Source missing, unreadable or could not be started.
    Open { source: String, error: io::Error },
    /// Input matches neither supported layout.
    Format(FormatError),
}

impl std::fmt::Display for LoaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderError::Open { source, error } => write!(f, "Cannot open {}: {}", source, error),
            LoaderError::Format(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoaderError::Open { error, .. } => Some(error),
            LoaderError::Format(e) => Some(e),
        }
    }
}

impl From<FormatError> for LoaderError {
    fn from(e: FormatError) -> Self {
        LoaderError::Format(e)
    }
}

/// Loader configuration for one source.
///
/// Construction does no I/O. Each call to [`fetch_status`](Self::fetch_status)
/// opens the source afresh and yields an independent stream.
///
/// By default every snapshot must carry an integer `uptime`, which orders
/// the stream and filters repeated samples. Dumps without it, such as
/// `SHOW VARIABLES` output, stream nothing but malformed units unless
/// [`with_uptime_required(false)`](Self::with_uptime_required) is set. A
/// tabular dump is only recognised when its header has an `uptime` column.
#[derive(Debug, Clone)]
pub struct Loader {
    interval: Duration,
    source: Source,
    argument: Option<String>,
    queue_capacity: usize,
    detect_limit: usize,
    require_uptime: bool,
}

impl Loader {
    /// Creates a loader.
    ///
    /// # Arguments
    /// * `interval` - Sampling interval; only used to build live command arguments
    /// * `source` - File to replay or command to run
    /// * `argument` - Extra command argument, ignored for files
    pub fn new(interval: Duration, source: Source, argument: Option<String>) -> Self {
        Self {
            interval,
            source,
            argument,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            detect_limit: DEFAULT_DETECT_LIMIT,
            require_uptime: true,
        }
    }

    /// Sets how many snapshots may wait in the hand-off queue. Zero makes
    /// every hand-off a rendezvous.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets how many non-blank leading lines may be inspected before the
    /// input is declared unrecognisable.
    pub fn with_detect_limit(mut self, limit: usize) -> Self {
        self.detect_limit = limit.max(1);
        self
    }

    /// When `false`, units without an integer `uptime` are emitted as they
    /// come and only units that do carry one are checked for repeats.
    pub fn with_uptime_required(mut self, required: bool) -> Self {
        self.require_uptime = required;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn uptime_required(&self) -> bool {
        self.require_uptime
    }

    /// Opens the source, detects its layout and starts streaming.
    ///
    /// Fails synchronously if the source cannot be opened or its layout is
    /// not recognised. Later problems close the stream instead; see
    /// [`SnapshotStream::summary`].
    pub fn fetch_status(&self) -> Result<SnapshotStream, LoaderError> {
        let argument = match self.source {
            Source::File(_) => None,
            Source::Command(_) => self.argument.as_deref(),
        };
        let mut opened = source::open(&self.source, self.interval, argument)?;

        let detected = match detect_layout(&mut *opened.reader, self.detect_limit) {
            Ok(Ok(detected)) => detected,
            Ok(Err(e)) => {
                opened.abandon();
                return Err(e.into());
            }
            Err(error) => {
                opened.abandon();
                return Err(LoaderError::Open {
                    source: self.source.to_string(),
                    error,
                });
            }
        };
        info!(
            "{}: {} layout detected at line {}",
            self.source, detected.layout, detected.line_no
        );

        SnapshotStream::spawn(
            opened,
            detected,
            self.queue_capacity,
            self.require_uptime,
            self.source.to_string(),
        )
    }
}
