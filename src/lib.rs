//! Marketplace sync job queue
//!
//! Resilient job-queue and failure-isolation layer for syncing with
//! third-party marketplace APIs: batch and job lifecycle tracking, a
//! per-platform circuit breaker, a backoff retry executor and a
//! dead-letter store with bulk recovery and cleanup.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
