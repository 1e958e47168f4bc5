//! Apply engine
//!
//! 1. Planning - split hosts into the local phase and the scheduled phase
//! 2. Scheduling - apply remote hosts in parallel, in dependency order
//! 3. Executing - drive one worker session per host
//! 4. Reporting - print task diffs and the run summary

pub mod differ;
pub mod executor;
pub mod planner;
pub mod scheduler;

pub use executor::apply;
pub use planner::ExecutionPlan;
