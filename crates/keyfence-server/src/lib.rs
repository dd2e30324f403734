//! # keyfence-server
//!
//! HTTP server library for the keyfence geofenced unlock service.
//!
//! This library provides the API handlers and session state for keyfence.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
