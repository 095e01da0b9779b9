//! Testing utilities and harness for Trellis

pub mod testing;

pub use testing::*;
