//! Single-responsibility managers owned by [`MdContext`](crate::engine::context::MdContext).
//!
//! Managers never reference each other; anything that needs two of them lives on the
//! context.

mod database;
mod environment;
mod simulation;
mod slurm;

pub use database::DatabaseManager;
pub use environment::EnvironmentManager;
pub use simulation::SimulationManager;
pub use slurm::SlurmManager;
