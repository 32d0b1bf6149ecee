//! Core types and the aggregation pipeline for Tally.
//!
//! This crate is deliberately free of HTTP and database dependencies. Storage
//! backends implement the traits in [`store`]; the HTTP layer drives the
//! [`dispatch::Dispatcher`] and the [`query::AggregateReader`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod access;
pub mod aggregate;
pub mod aggregator;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod memory;
pub mod pipeline;
pub mod query;
pub mod record;
pub mod store;

pub use error::{BoxError, Error, Result};
