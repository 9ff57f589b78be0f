//! # taskq
//!
//! Priority task scheduler. Tasks are accepted over HTTP, recorded in a
//! status store, published on a durable priority transport, and executed by
//! a pool of workers that drive each task through
//! `Pending → Running → {Completed, Failed}`.
//!
//! Delivery is at-least-once. Per-delivery exclusivity comes from the
//! transport's prefetch discipline; status races resolve by
//! last-writer-wins in the store.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod model;
pub mod store;
pub mod telemetry;
pub mod transport;
