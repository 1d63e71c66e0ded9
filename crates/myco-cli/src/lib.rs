//! `run-myco`: start the two services in order, run the latency client
//! against them, and tear everything down again.
//!
//! The binary in `main.rs` only wires things up; the state machine lives in
//! [`controller`].

#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Used by the binaries only
use anyhow as _;
use dotenvy as _;
use serde_json as _;
use tracing_subscriber as _;

pub mod bootstrap;
pub mod client;
pub mod controller;
pub mod parser;
pub mod signals;

pub use bootstrap::{config_from_cli, verify_preconditions};
pub use client::{spawn_client, wait_client};
pub use controller::RunController;
pub use parser::Cli;
pub use signals::spawn_signal_listener;
