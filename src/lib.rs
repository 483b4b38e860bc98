//! Throttle Suite - In-process admission control
//!
//! This crate decides, per inbound request, whether a call may proceed.
//! Requests are matched against an ordered list of controller instances;
//! each instance pairs a scope (which paths, methods and clients it covers)
//! with a rate controller keyed by an opaque request signature. The first
//! in-scope controller that rejects the call blocks it.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod scope;
pub mod suite;
