//! Turns parsed units into the ordered snapshot sequence.

use tracing::{debug, warn};

use crate::parser::{MalformedReason, MalformedUnit, ParsedUnit};
use crate::sample::Snapshot;

/// Assembles snapshots and enforces the stream rules.
///
/// - units without an integer `uptime` are malformed, unless uptime is optional;
/// - a unit repeating the previous snapshot's `uptime` is dropped;
/// - metrics that vanish between consecutive snapshots are reported.
#[derive(Debug)]
pub(crate) struct Sequencer {
    require_uptime: bool,
    previous: Option<Snapshot>,
    pub malformed: usize,
    pub duplicates: usize,
}

impl Sequencer {
    pub fn new(require_uptime: bool) -> Self {
        Self {
            require_uptime,
            previous: None,
            malformed: 0,
            duplicates: 0,
        }
    }

    /// Returns the snapshot to emit for this unit, if any.
    pub fn accept(&mut self, unit: ParsedUnit) -> Option<Snapshot> {
        let group = match unit {
            Ok(group) => group,
            Err(err) => {
                self.reject(err);
                return None;
            }
        };

        let line = group.line;
        let snapshot = Snapshot::from_raw(group);
        let uptime = snapshot.uptime().ok();
        if uptime.is_none() && self.require_uptime {
            self.reject(MalformedUnit {
                line,
                reason: MalformedReason::MissingUptime,
            });
            return None;
        }

        if let Some(prev) = &self.previous {
            if uptime.is_some() && prev.uptime().ok() == uptime {
                self.duplicates += 1;
                debug!("Dropping snapshot at line {}: uptime repeated", line);
                return None;
            }

            let missing = prev.missing_from(&snapshot);
            if !missing.is_empty() {
                warn!(
                    "Snapshot at line {} lost {} metrics: {}",
                    line,
                    missing.len(),
                    missing.join(", ")
                );
            }
        }

        self.previous = Some(snapshot.clone());
        Some(snapshot)
    }

    fn reject(&mut self, err: MalformedUnit) {
        self.malformed += 1;
        warn!("Skipping {}", err);
    }
}
