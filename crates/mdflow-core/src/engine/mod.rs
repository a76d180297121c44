//! # Engine Module
//!
//! The mutable state of a campaign and the steps that act on it.
//!
//! ## Overview
//!
//! An [`context::MdContext`] is built once from a parsed campaign configuration. It owns
//! four single-responsibility managers (environment directories, the job ledger, the
//! optional Slurm connection, and the topology/run records with their current
//! selections). Steps from [`steps`] are queued on a [`pipeline::Pipeline`] and run in
//! order against that context; each may halt the rest of the pipeline.
//!
//! ## Architecture
//!
//! - **Context** ([`context`], [`managers`]) - Aggregate root and its managers
//! - **Pipeline** ([`pipeline`]) - Iterative step dispatcher with explicit halting
//! - **Steps** ([`steps`]) - Selection, structure I/O, option preparation, script
//!   generation, and progress checking
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress events
//! - **Error Handling** ([`error`]) - The engine-wide error type wrapping every lower layer
//!
//! A context whose pipeline failed part-way is not rolled back and should be dropped.

pub mod context;
pub mod error;
pub mod managers;
pub mod pipeline;
pub mod progress;
pub mod steps;
