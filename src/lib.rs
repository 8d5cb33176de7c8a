//! Offerforge PDF rendering worker
//!
//! This library implements the asynchronous PDF rendering worker: it renders
//! offer HTML into a PDF through a headless browser, uploads the artifact to
//! object storage, and debits the per-user and per-device monthly usage
//! counters, rolling everything back when a downstream step fails.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
