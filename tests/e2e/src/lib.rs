//! Shared harness for the end-to-end suite. Tests need Docker and are ignored by default.

pub mod harness;
