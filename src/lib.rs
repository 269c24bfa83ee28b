//! Roleta API Library
//!
//! Per-unit lead distribution queue: a round-robin of sales agents that hands each incoming
//! lead to exactly one agent, skips agents on leave, and keeps an audit trail of every
//! assignment.
//!
//! # Modules
//!
//! - `api`: API-layer namespace (handlers, trigger, routes).
//! - `core`: Domain-layer namespace (rotation engine, store traits, models, errors).
//! - `config`: Configuration management.
//! - `db`: Database connection, pool and migrations.
//! - `db_storage`: PostgreSQL-backed store.
//! - `errors`: Error handling types.
//! - `handlers`: Management HTTP handlers and shared state.
//! - `memory_store`: In-process store used by tests and local runs.
//! - `models`: Core data models.
//! - `openapi`: Generated API document and docs page.
//! - `rotation`: Selection and reordering rule.
//! - `routes`: Router assembly.
//! - `store`: Storage traits and shared validation.
//! - `unit_lock`: Per-unit serialization of queue writes.
//! - `webhook_handler`: Lead-arrival trigger.
//! - `webhook_models`: Trigger request/response models.

pub mod api;
pub mod core;

pub mod config;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod memory_store;
pub mod models;
pub mod openapi;
pub mod rotation;
pub mod routes;
pub mod store;
pub mod unit_lock;
pub mod webhook_handler;
pub mod webhook_models;
