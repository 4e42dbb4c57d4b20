//! Agent-based simulation of an epidemic among agents wandering in a
//! rectangular arena.
//!
//! [`engine::Simulation`] is the entry point for drivers and renderers;
//! [`manager::Manager`] runs batches of simulations from a directory.

pub mod analysis;
pub mod config;
pub mod engine;
pub mod manager;
pub mod model;
pub mod motion;
pub mod stats;
