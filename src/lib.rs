//! Bloatprobe - bufferbloat test server
//!
//! Serves a latency probe, an unbounded download stream and a
//! rate-governed upload sink so a client can measure latency under load.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod absorber;
pub mod config;
pub mod error;
pub mod probe;
pub mod saturator;
pub mod server;
pub mod shutdown;
pub mod stats;

pub use error::{BloatError, Result};
