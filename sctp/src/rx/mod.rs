//! Receive path: TSN tracking and message reassembly.

pub mod data_tracker;
pub mod reassembly_queue;

pub use data_tracker::{DataTracker, TsnStatus};
pub use reassembly_queue::ReassemblyQueue;
