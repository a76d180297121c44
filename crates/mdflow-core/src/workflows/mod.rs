//! # Workflows Module
//!
//! Complete routines over an [`MdContext`](crate::engine::context::MdContext), each
//! assembling engine steps into a pipeline and running it.
//!
//! ## Overview
//!
//! Workflows are the entry points the command-line tool calls. A typical campaign runs
//! [`setup::topology_setup`] and [`setup::topology_save`] to stage inputs, [`run::run`]
//! to generate scripts, [`remote::submit`] to hand the batch script to Slurm, and
//! finally [`watch::watch`] to follow the job until it ends.
//!
//! ## Architecture
//!
//! - **Setup** ([`setup`]) - Reading, merging and writing topologies and coordinates
//! - **Run** ([`run`]) - Run-script generation, regeneration for unfinished
//!   simulations, and log checking
//! - **Remote** ([`remote`]) - Submission, job-id recovery, and downloads
//! - **Watch** ([`watch`]) - The cancellable polling loop over `sacct`

pub mod remote;
pub mod run;
pub mod setup;
pub mod watch;
