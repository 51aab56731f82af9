//! # sshmux-loopback: Channel Layer Demo
//!
//! Runs a full client session from `sshmux-core` against an in-process echo
//! peer: opens channels, pushes data through both flow-control windows and
//! checks that every byte comes back.
//!
//! ## Modes
//!
//! - **SSH-2** (default): any number of windowed channels.
//! - **SSH-1** (`--legacy`): the single windowless session channel.

pub mod config;
pub mod driver;
