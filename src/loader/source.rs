//! Opening status sources: replay files and live commands.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::{LoaderError, Source};

/// Placeholder in the command argument replaced by the interval in seconds.
const INTERVAL_TOKEN: &str = "{interval}";

/// Pause between exit checks while reaping a live command.
const REAP_POLL: Duration = Duration::from_millis(20);

/// An opened source: a line reader plus the child process feeding it, if any.
pub(crate) struct OpenedSource {
    pub reader: Box<dyn BufRead + Send>,
    pub child: Option<Arc<Mutex<Child>>>,
}

impl OpenedSource {
    /// Kills a live command that is no longer needed and reaps it.
    pub fn abandon(self) {
        if let Some(child) = self.child {
            if let Ok(mut child) = child.lock() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

/// Opens `source` for reading.
pub(crate) fn open(
    source: &Source,
    interval: Duration,
    argument: Option<&str>,
) -> Result<OpenedSource, LoaderError> {
    match source {
        Source::File(path) => {
            let file = File::open(path).map_err(|error| LoaderError::Open {
                source: source.to_string(),
                error,
            })?;
            debug!("Opened {}", source);
            Ok(OpenedSource {
                reader: Box::new(BufReader::new(file)),
                child: None,
            })
        }
        Source::Command(program) => {
            let args = command_args(argument, interval);
            let mut child = Command::new(program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|error| LoaderError::Open {
                    source: source.to_string(),
                    error,
                })?;

            let Some(stdout) = child.stdout.take() else {
                let _ = child.kill();
                let _ = child.wait();
                return Err(LoaderError::Open {
                    source: source.to_string(),
                    error: io::Error::other("child stdout not captured"),
                });
            };

            debug!("Started {} {:?} (pid {})", source, args, child.id());
            Ok(OpenedSource {
                reader: Box::new(BufReader::new(stdout)),
                child: Some(Arc::new(Mutex::new(child))),
            })
        }
    }
}

/// Builds the command line arguments from the optional extra argument.
///
/// The argument is split on whitespace and every `{interval}` token is
/// replaced by the interval in whole seconds (at least 1).
pub(crate) fn command_args(argument: Option<&str>, interval: Duration) -> Vec<String> {
    let secs = interval.as_secs().max(1).to_string();
    argument
        .unwrap_or_default()
        .split_whitespace()
        .map(|arg| arg.replace(INTERVAL_TOKEN, &secs))
        .collect()
}

/// Shared stop signal between a stream handle and its producer.
pub(crate) struct CancelToken {
    cancelled: AtomicBool,
    child: Option<Arc<Mutex<Child>>>,
}

impl CancelToken {
    pub fn new(child: Option<Arc<Mutex<Child>>>) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            child,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Marks the stream cancelled and kills a live command so that a
    /// producer blocked on its output sees end of input.
    ///
    /// Never waits: if the producer holds the handle it is reaping, and it
    /// kills the command itself once it sees the flag.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(child) = &self.child else {
            return;
        };
        match child.try_lock() {
            Ok(mut child) => {
                if let Err(e) = child.kill() {
                    debug!("Kill of status command failed: {}", e);
                }
            }
            Err(TryLockError::WouldBlock) => debug!("Status command is being reaped"),
            Err(TryLockError::Poisoned(_)) => warn!("Status command handle poisoned; not killed"),
        }
    }

    /// Reaps a live command once the producer is done with it.
    ///
    /// Polls for exit with the handle unlocked between checks. The command is
    /// killed if `kill` is set or the stream gets cancelled while waiting.
    /// Returns the exit status, or `None` for file sources.
    pub fn reap(&self, kill: bool) -> Option<io::Result<ExitStatus>> {
        let handle = self.child.as_ref()?;
        let mut killed = false;
        loop {
            {
                let Ok(mut child) = handle.lock() else {
                    warn!("Status command handle poisoned; not reaped");
                    return None;
                };
                match child.try_wait() {
                    Ok(Some(status)) => return Some(Ok(status)),
                    Ok(None) => {}
                    Err(e) => return Some(Err(e)),
                }
                if !killed && (kill || self.is_cancelled()) {
                    killed = true;
                    if let Err(e) = child.kill() {
                        debug!("Kill of status command failed: {}", e);
                    }
                }
            }
            thread::sleep(REAP_POLL);
        }
    }
}
