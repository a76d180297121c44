//! # Pipeline Steps
//!
//! The units of work queued on a [`Pipeline`](crate::engine::pipeline::Pipeline) over an
//! [`MdContext`](crate::engine::context::MdContext).
//!
//! ## Overview
//!
//! Every step reads the context's current topology and run selections, performs one
//! action, and writes its result back into the context (or to the data directory).
//! Steps never call each other; the routines in [`crate::workflows`] decide the order.
//!
//! ## Architecture
//!
//! - **Selection** ([`selection`]) - Choosing the current topology and run, and merging
//!   every topology into one aggregate
//! - **Structure I/O** ([`structure`]) - Reading topologies and coordinates, writing
//!   parameter and coordinate files through the context's structure collaborator
//! - **Run Options** ([`options`]) - Copying and rewriting engine option files
//! - **Scripts** ([`scripts`]) - `md.run` blocks and the `md.slurm` batch script
//! - **Progress** ([`check`]) - Reading engine logs and updating the ledger

pub mod check;
pub mod options;
pub mod scripts;
pub mod selection;
pub mod structure;

pub use check::CheckProgress;
pub use options::PrepareMdOptions;
pub use scripts::{RunMd, RunSlurm};
pub use selection::{FindRunConfig, FindTopolConfig, MergeTopologies, SelectRun, SelectTopology};
pub use structure::{ReadCoordinates, ReadTopology, WriteCoordinates, WriteParameters};
