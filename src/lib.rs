//! Offline-first client for periodic electrical-equipment inspections.
//!
//! Inspections are captured into a durable local store and pushed to the
//! central server whenever connectivity allows; client-generated UUIDs
//! keep resubmission idempotent.

pub mod auth;
pub mod catalog;
pub mod client;
pub mod config;
pub mod lifecycle;
pub mod models;
pub mod store;
pub mod sync;
