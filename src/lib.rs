//! Offline-support layer for the FieldSales dashboard.
//!
//! The worker intercepts every outgoing request from the page, classifies
//! it, and fulfills it through one of four strategies backed by named,
//! versioned cache partitions. Mutating API calls that fail due to
//! connectivity loss land in a durable write queue and are replayed when a
//! background-sync event fires; per-item results are broadcast back to the
//! page clients.
//!
//! The embedding host delivers platform events through [`worker::Worker`];
//! the `fieldsync` binary operates the shared stores out-of-band (precache
//! warmup, partition purge, queue drain, status).

pub mod cache;
pub mod config;
pub mod event;
pub mod fetch;
pub mod notify;
pub mod queue;
pub mod router;
pub mod strategy;
pub mod sync;
pub mod worker;
