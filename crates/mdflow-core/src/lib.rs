//! # mdflow Core Library
//!
//! Orchestration of molecular-dynamics simulation campaigns: configuration ingestion,
//! input preparation, run-script generation for Amber and GROMACS, submission and
//! monitoring of Slurm jobs over SSH, and a persisted ledger of every simulation attempt.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture.
//!
//! - **[`core`]: The Foundation.** Typed campaign records and their parser, the job
//!   ledger, the structure I/O boundary, the remote shell abstraction and the site
//!   profile. Nothing here knows about pipelines.
//!
//! - **[`engine`]: The Logic Core.** The mutable [`engine::context::MdContext`] and its
//!   managers, the iterative [`engine::pipeline::Pipeline`], and the individual steps
//!   (selection, structure reading and writing, option preparation, script generation,
//!   progress checking).
//!
//! - **[`workflows`]: The Public API.** Complete routines built from engine steps:
//!   topology setup and save, run-script generation, remote submission, log download,
//!   and the polling loop that watches a submitted job.

pub mod core;
pub mod engine;
pub mod workflows;

#[cfg(test)]
pub(crate) mod testing;
