//! Producer thread and the consumer-side stream handle.
//!
//! ```text
//!   source ──lines──▶ GroupParser ──units──▶ Sequencer ──▶ sync_channel ──▶ SnapshotStream
//!   (producer thread)                                       (bounded)        (consumer)
//! ```
//!
//! The producer blocks on a full queue, so parsing never runs ahead of the
//! consumer by more than the queue capacity. Dropping or cancelling the
//! stream closes the queue; the producer notices on its next send or line.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TryRecvError, sync_channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::LoaderError;
use super::sequencer::Sequencer;
use super::source::{CancelToken, OpenedSource};
use crate::parser::{
    Detection, GroupParser, Layout, MalformedReason, ParsedUnit, TextLine, parser_for,
    read_text_line,
};
use crate::sample::Snapshot;

/// Why a stream stopped producing.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// Source exhausted normally.
    Exhausted,
    /// Consumer cancelled or dropped the stream.
    Cancelled,
    /// I/O error on the source or failing live command.
    Fault(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Exhausted => write!(f, "exhausted"),
            CloseReason::Cancelled => write!(f, "cancelled"),
            CloseReason::Fault(msg) => write!(f, "fault: {}", msg),
        }
    }
}

/// Final accounting of a closed stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub reason: CloseReason,
    /// Snapshots handed to the consumer's queue.
    pub produced: usize,
    /// Rows/blocks skipped as malformed.
    pub malformed: usize,
    /// Snapshots dropped for repeating the previous uptime.
    pub duplicates: usize,
}

/// Result of a non-blocking or bounded wait on a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Snapshot(Snapshot),
    /// Producer still active, nothing queued yet.
    Pending,
    /// No more snapshots will arrive.
    Closed,
}

/// Ordered, lazily produced sequence of snapshots.
///
/// Iterating blocks until the next snapshot is available and ends when the
/// source is exhausted. [`summary`](Self::summary) tells how it ended.
pub struct SnapshotStream {
    layout: Layout,
    rx: Option<Receiver<Snapshot>>,
    token: Arc<CancelToken>,
    producer: Option<JoinHandle<StreamSummary>>,
    summary: Option<StreamSummary>,
    delivered: usize,
}

impl SnapshotStream {
    pub(crate) fn spawn(
        opened: OpenedSource,
        detected: Detection,
        capacity: usize,
        require_uptime: bool,
        label: String,
    ) -> Result<Self, LoaderError> {
        let (tx, rx) = sync_channel(capacity);
        let token = Arc::new(CancelToken::new(opened.child.clone()));
        let layout = detected.layout;

        let producer = Producer {
            reader: opened.reader,
            parser: parser_for(layout),
            tx,
            token: token.clone(),
            sequencer: Sequencer::new(require_uptime),
            produced: 0,
            line_no: detected.line_no,
            label: label.clone(),
        };

        let handle = thread::Builder::new()
            .name("myqstat-producer".to_string())
            .spawn(move || producer.run(detected.line))
            .map_err(|error| LoaderError::Open {
                source: label,
                error,
            })?;

        Ok(Self {
            layout,
            rx: Some(rx),
            token,
            producer: Some(handle),
            summary: None,
            delivered: 0,
        })
    }

    /// Layout detected for this source.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn is_closed(&self) -> bool {
        self.summary.is_some()
    }

    /// How the stream ended; `None` while it is still open.
    pub fn summary(&self) -> Option<&StreamSummary> {
        self.summary.as_ref()
    }

    /// Returns a queued snapshot without blocking.
    pub fn try_next(&mut self) -> Next {
        let Some(rx) = &self.rx else {
            return Next::Closed;
        };
        match rx.try_recv() {
            Ok(snapshot) => self.deliver(snapshot),
            Err(TryRecvError::Empty) => Next::Pending,
            Err(TryRecvError::Disconnected) => {
                self.finish();
                Next::Closed
            }
        }
    }

    /// Waits at most `timeout` for the next snapshot.
    pub fn next_timeout(&mut self, timeout: Duration) -> Next {
        let Some(rx) = &self.rx else {
            return Next::Closed;
        };
        match rx.recv_timeout(timeout) {
            Ok(snapshot) => self.deliver(snapshot),
            Err(RecvTimeoutError::Timeout) => Next::Pending,
            Err(RecvTimeoutError::Disconnected) => {
                self.finish();
                Next::Closed
            }
        }
    }

    /// Stops the producer and releases the source.
    ///
    /// Queued snapshots are discarded. Blocks until the producer has exited.
    pub fn cancel(&mut self) {
        if self.summary.is_some() {
            return;
        }
        self.token.cancel();
        self.rx = None;
        self.finish();
    }

    fn deliver(&mut self, snapshot: Snapshot) -> Next {
        self.delivered += 1;
        Next::Snapshot(snapshot)
    }

    fn finish(&mut self) {
        self.rx = None;
        let summary = match self.producer.take().map(JoinHandle::join) {
            Some(Ok(summary)) => summary,
            Some(Err(_)) => StreamSummary {
                reason: CloseReason::Fault("producer thread panicked".to_string()),
                produced: self.delivered,
                malformed: 0,
                duplicates: 0,
            },
            None => return,
        };
        self.summary = Some(summary);
    }
}

impl Iterator for SnapshotStream {
    type Item = Snapshot;

    fn next(&mut self) -> Option<Snapshot> {
        let rx = self.rx.as_ref()?;
        match rx.recv() {
            Ok(snapshot) => {
                self.delivered += 1;
                Some(snapshot)
            }
            Err(_) => {
                self.finish();
                None
            }
        }
    }
}

impl Drop for SnapshotStream {
    fn drop(&mut self) {
        // The producer exits on its own once the queue is gone; not joined
        // here so that dropping never blocks.
        if self.summary.is_none() {
            self.token.cancel();
        }
    }
}

struct Producer {
    reader: Box<dyn BufRead + Send>,
    parser: Box<dyn GroupParser>,
    tx: SyncSender<Snapshot>,
    token: Arc<CancelToken>,
    sequencer: Sequencer,
    produced: usize,
    line_no: usize,
    label: String,
}

impl Producer {
    fn run(mut self, first_line: String) -> StreamSummary {
        let reason = self.pump(first_line);
        let reason = self.release(reason);

        let summary = StreamSummary {
            reason,
            produced: self.produced,
            malformed: self.sequencer.malformed,
            duplicates: self.sequencer.duplicates,
        };
        info!(
            "{}: stream {} after {} lines ({} snapshots, {} malformed, {} duplicates)",
            self.label,
            summary.reason,
            self.line_no,
            summary.produced,
            summary.malformed,
            summary.duplicates
        );
        summary
    }

    fn pump(&mut self, first_line: String) -> CloseReason {
        if let Some(unit) = self.parser.push_line(self.line_no, &first_line) {
            if !self.deliver(unit) {
                return CloseReason::Cancelled;
            }
        }

        let mut buf = Vec::new();
        loop {
            if self.token.is_cancelled() {
                return CloseReason::Cancelled;
            }

            let unit = match read_text_line(&mut *self.reader, &mut buf) {
                Ok(TextLine::End) => break,
                Ok(TextLine::Text(line)) => {
                    self.line_no += 1;
                    self.parser.push_line(self.line_no, line)
                }
                Ok(TextLine::NotUtf8) => {
                    self.line_no += 1;
                    self.parser.reject_line(self.line_no, MalformedReason::InvalidEncoding)
                }
                Err(e) => {
                    return CloseReason::Fault(format!(
                        "read error after line {}: {}",
                        self.line_no, e
                    ));
                }
            };
            if let Some(unit) = unit {
                if !self.deliver(unit) {
                    return CloseReason::Cancelled;
                }
            }
        }

        // A killed command also ends in EOF.
        if self.token.is_cancelled() {
            return CloseReason::Cancelled;
        }
        if let Some(unit) = self.parser.finish() {
            if !self.deliver(unit) {
                return CloseReason::Cancelled;
            }
        }
        CloseReason::Exhausted
    }

    /// Returns `false` once the consumer is gone.
    fn deliver(&mut self, unit: ParsedUnit) -> bool {
        let Some(snapshot) = self.sequencer.accept(unit) else {
            return true;
        };
        if self.tx.send(snapshot).is_err() {
            debug!("{}: consumer went away", self.label);
            return false;
        }
        self.produced += 1;
        true
    }

    fn release(&self, reason: CloseReason) -> CloseReason {
        let kill = reason != CloseReason::Exhausted;
        let reaped = self.token.reap(kill);
        if reason != CloseReason::Exhausted {
            return reason;
        }
        // Cancelled while waiting for a command that had closed its output.
        if self.token.is_cancelled() {
            return CloseReason::Cancelled;
        }
        match reaped {
            Some(Ok(status)) if !status.success() => {
                CloseReason::Fault(format!("status command exited with {}", status))
            }
            Some(Err(e)) => {
                warn!("{}: failed to reap status command: {}", self.label, e);
                reason
            }
            _ => reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ColumnRule, VerticalStyle};
    use std::io::Cursor;

    fn stream_over_bytes(input: Vec<u8>, layout: Layout, capacity: usize) -> SnapshotStream {
        let mut reader = Cursor::new(input);
        let mut first = String::new();
        reader.read_line(&mut first).unwrap();

        let opened = OpenedSource {
            reader: Box::new(reader),
            child: None,
        };
        let detected = Detection {
            layout,
            line_no: 1,
            line: first.trim_end().to_string(),
        };
        SnapshotStream::spawn(opened, detected, capacity, true, "test".to_string()).unwrap()
    }

    fn stream_over(input: &str, layout: Layout, capacity: usize) -> SnapshotStream {
        stream_over_bytes(input.as_bytes().to_vec(), layout, capacity)
    }

    fn tabular(rows: usize) -> String {
        let mut input = String::from("uptime\tconnections\n");
        for i in 0..rows {
            input.push_str(&format!("{}\t{}\n", i + 1, i * 2));
        }
        input
    }

    #[test]
    fn test_stream_yields_in_order() {
        let mut stream = stream_over(&tabular(5), Layout::Tabular(ColumnRule::Tab), 2);
        let uptimes: Vec<i64> = stream.by_ref().map(|s| s.uptime().unwrap()).collect();
        assert_eq!(uptimes, vec![1, 2, 3, 4, 5]);

        let summary = stream.summary().unwrap();
        assert_eq!(summary.reason, CloseReason::Exhausted);
        assert_eq!(summary.produced, 5);
        assert!(stream.is_closed());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_rendezvous_queue_still_delivers_everything() {
        let stream = stream_over(&tabular(20), Layout::Tabular(ColumnRule::Tab), 0);
        assert_eq!(stream.count(), 20);
    }

    #[test]
    fn test_next_timeout_reports_closed() {
        let mut stream = stream_over(&tabular(1), Layout::Tabular(ColumnRule::Tab), 4);
        let first = stream.next_timeout(Duration::from_secs(5));
        assert!(matches!(first, Next::Snapshot(_)));
        assert_eq!(stream.next_timeout(Duration::from_secs(5)), Next::Closed);
        assert_eq!(stream.try_next(), Next::Closed);
    }

    #[test]
    fn test_cancel_stops_producer_early() {
        let mut stream = stream_over(&tabular(10_000), Layout::Tabular(ColumnRule::Tab), 1);
        assert!(stream.next().is_some());
        stream.cancel();

        let summary = stream.summary().unwrap();
        assert_eq!(summary.reason, CloseReason::Cancelled);
        assert!(summary.produced < 10_000);
        assert!(stream.next().is_none());
        assert_eq!(stream.try_next(), Next::Closed);
    }

    #[test]
    fn test_vertical_stream_counts_malformed() {
        let input = "\
Variable_name\tValue
Uptime\t1
Variable_name\tValue
broken line
Uptime\t2
Variable_name\tValue
Uptime\t3
";
        let mut stream = stream_over(input, Layout::Vertical(VerticalStyle::Batch), 4);
        assert_eq!(stream.by_ref().count(), 2);
        let summary = stream.summary().unwrap();
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.produced, 2);
    }

    #[test]
    fn test_undecodable_row_is_skipped() {
        let mut bytes = b"uptime\tconnections\n1\t1\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        bytes.extend_from_slice(b"2\t2\n3\t3\n");

        let mut stream = stream_over_bytes(bytes, Layout::Tabular(ColumnRule::Tab), 4);
        let uptimes: Vec<i64> = stream.by_ref().map(|s| s.uptime().unwrap()).collect();
        assert_eq!(uptimes, vec![1, 2, 3]);

        let summary = stream.summary().unwrap();
        assert_eq!(summary.reason, CloseReason::Exhausted);
        assert_eq!(summary.malformed, 1);
    }

    #[test]
    fn test_undecodable_value_skips_only_its_block() {
        let mut bytes = Vec::new();
        for uptime in 1..=9 {
            bytes.extend_from_slice(b"Variable_name\tValue\n");
            if uptime == 2 {
                bytes.extend_from_slice(b"Ssl_cipher\tcaf\xe9\n");
            }
            bytes.extend_from_slice(format!("Uptime\t{}\n", uptime).as_bytes());
        }

        let mut stream = stream_over_bytes(bytes, Layout::Vertical(VerticalStyle::Batch), 4);
        assert_eq!(stream.by_ref().count(), 8);

        let summary = stream.summary().unwrap();
        assert_eq!(summary.reason, CloseReason::Exhausted);
        assert_eq!(summary.produced, 8);
        assert_eq!(summary.malformed, 1);
    }

    #[test]
    fn test_produced_counts_only_handed_over_snapshots() {
        let mut stream = stream_over(&tabular(10), Layout::Tabular(ColumnRule::Tab), 0);
        assert!(stream.next().is_some());
        assert!(stream.next().is_some());
        stream.cancel();

        let summary = stream.summary().unwrap();
        assert_eq!(summary.reason, CloseReason::Cancelled);
        assert_eq!(summary.produced, 2);
    }
}
