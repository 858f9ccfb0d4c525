//! deskctl - command-line client for the desk daemon.

pub mod cli;
pub mod client;
pub mod output;
