//! # Core Module
//!
//! Stateless building blocks shared by the engine and the workflows.
//!
//! ## Architecture
//!
//! - **Campaign Records** ([`config`]) - Bracket-format parser and the typed section records
//! - **Job Ledger** ([`ledger`]) - CSV-backed table of simulation attempts with atomic saves
//! - **Structure Boundary** ([`structure`]) - Minimal molecular model and the `StructureIo` trait
//! - **Remote Execution** ([`remote`]) - `RemoteShell` trait, SSH implementation, Slurm output parsing
//! - **Site Profile** ([`site`]) - Cluster-specific executables, module lines and polling defaults

pub mod config;
pub mod ledger;
pub mod remote;
pub mod site;
pub mod structure;
