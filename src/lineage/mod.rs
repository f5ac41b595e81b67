//! Lineage reconstruction
//!
//! `LineageWalker` rebuilds the history of one organism from the ledger,
//! `scan_lineages` runs many walks side by side.

mod entry;
pub mod scan;
mod walker;

pub use entry::{GenerationEntry, LineageTrace};
pub use scan::{scan_lineages, ScanReport};
pub use walker::{LineageWalker, TraceHalted};
