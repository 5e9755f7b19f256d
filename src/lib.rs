//! FlameIQ - statistical sampling profiler
//!
//! This library launches a target command as a child process, samples
//! the call stacks of its threads on a fixed cadence via ptrace-based
//! remote unwinding, folds the samples into a collapsed-stack frequency
//! table, and returns the table together with session metadata.

pub mod aggregator;
pub mod capture;
pub mod cli;
pub mod error;
pub mod events;
pub mod report;
pub mod sample;
pub mod sampler;
pub mod session;
pub mod symbolize;
pub mod unwind;
