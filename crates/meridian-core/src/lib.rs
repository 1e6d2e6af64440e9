//! Meridian Core -- shared data model for the multi-map tick runtime.
//!
//! This crate holds everything the power solver and the scheduler agree on:
//! identifiers, deterministic fixed-point helpers, the structural edit
//! counter, the connectivity graph and the partitioner that splits a map
//! into independently simulatable SubUnits.
//!
//! # Partitioning
//!
//! ```rust,ignore
//! let graph = ConnectivityGraph::build(&machines, &links);
//! let partition = Partitioner::new(config.min_work_per_unit).partition(&graph, edits.current());
//! for unit in partition.sub_units() {
//!     // one work item per SubUnit
//! }
//! ```
//!
//! # Key Types
//!
//! - [`graph::ConnectivityGraph`] -- Undirected CSR adjacency over machines.
//! - [`partition::Partitioner`] -- Union-find components plus
//!   smallest-first merging of undersized components.
//! - [`partition::Partition`] -- SubUnits tagged with the edit counter they
//!   were built for.
//! - [`dirty::EditCounter`] -- Monotonic structural-edit signal.
//! - [`stats::StatRegister`] -- Atomic counters shared by concurrent
//!   SubUnits.
//! - [`config::SimConfig`] -- Scheduling and partitioning options.

pub mod config;
pub mod dirty;
pub mod fixed;
pub mod graph;
pub mod hash;
pub mod id;
pub mod partition;
pub mod stats;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
