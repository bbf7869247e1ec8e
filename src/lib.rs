//! Asset inventory and allocation ledger
//!
//! Tracks fungible equipment pools, serialized units and who holds what as
//! items move between stock, custody, repair and scrap. Every operation runs
//! as a command inside one database transaction.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod cache;
pub mod collaborators;
pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod migrator;
pub mod queries;
pub mod repositories;
pub mod services;

pub use errors::ServiceError;
