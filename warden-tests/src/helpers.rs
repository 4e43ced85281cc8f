pub mod fake_launcher;
pub mod harness;
pub mod wait_utils;
