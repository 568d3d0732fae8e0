//! myqstat - typed snapshot streams from MySQL status output.
//!
//! Provides:
//! - `sample` — typed values, type inference and the `Snapshot` accessors
//! - `parser` — layout detection and the vertical/tabular splitters
//! - `loader` — source opening and the ordered, cancellable snapshot stream

pub mod loader;
pub mod parser;
pub mod sample;

pub use loader::{Loader, LoaderError, SnapshotStream, Source};
pub use sample::{SampleError, Snapshot, Value};
