//! Core types and trait definitions for the loam retail integration hub.
//!
//! This crate is deliberately free of HTTP and database dependencies. It holds
//! the entity model, the status envelope returned by every data-access helper,
//! the sanitizer, configuration, the per-subsystem log/error substrate, and
//! the traits behind which the storefront, the durable queue, and the
//! notification providers live.

// Native `async fn` in traits; the store-like traits spell out `Send` futures.
#![allow(async_fn_in_trait)]

pub mod config;
pub mod envelope;
pub mod error;
pub mod log;
pub mod mapping;
pub mod model;
pub mod notify;
pub mod pos;
pub mod queue;
pub mod remote;
pub mod sanitize;
pub mod storefront;

pub use error::{Error, Result};
