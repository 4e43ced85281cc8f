//! Test utilities for the warden workspace
//!
//! This crate provides a supervisor harness driven by a recording fake
//! launcher, polling helpers for state transitions, and the integration
//! tests for loading, lifecycle, restarts and real process supervision.

pub mod helpers;

pub use helpers::fake_launcher::{FakeLauncher, LaunchRecord};
pub use helpers::harness::TestSupervisorHarness;
pub use helpers::wait_utils::{WaitError, wait_for_launches, wait_for_status};
