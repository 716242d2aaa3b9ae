//! The `mnet` command: run the packet-path engine as one of its driver revisions and report the
//! counters.
#![forbid(unsafe_code)]

pub mod config;
pub mod profile;
pub mod run;

pub use config::{Config, OutputFormat};
pub use profile::Profile;
pub use run::{run, RunReport, TxTally};
