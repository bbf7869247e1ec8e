//! Prometheus counters for ledger operations.
//!
//! Everything is registered into one crate registry; the presentation layer
//! scrapes it through [`gather`] or [`render`].

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::errors::ServiceError;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    static ref ASSET_OPERATIONS: IntCounterVec = register(IntCounterVec::new(
        Opts::new("asset_operations_total", "Committed asset ledger operations"),
        &["operation"]
    ));
    static ref ASSET_OPERATION_FAILURES: IntCounterVec = register(IntCounterVec::new(
        Opts::new(
            "asset_operation_failures_total",
            "Asset ledger operations that were rejected or rolled back"
        ),
        &["operation", "error_type"]
    ));
    static ref ASSET_QUANTITY_MOVED: IntCounterVec = register(IntCounterVec::new(
        Opts::new(
            "asset_quantity_moved_total",
            "Units moved by committed asset ledger operations"
        ),
        &["operation"]
    ));
}

fn register(counter: prometheus::Result<IntCounterVec>) -> IntCounterVec {
    let counter = counter.expect("metric can be created");
    // Registration only fails on duplicate names, which the statics rule out
    let _ = REGISTRY.register(Box::new(counter.clone()));
    counter
}

pub fn record_success(operation: &str, quantity: i32) {
    ASSET_OPERATIONS.with_label_values(&[operation]).inc();
    if quantity > 0 {
        ASSET_QUANTITY_MOVED
            .with_label_values(&[operation])
            .inc_by(quantity as u64);
    }
}

pub fn record_failure(operation: &str, error: &ServiceError) {
    ASSET_OPERATION_FAILURES
        .with_label_values(&[operation, error.code()])
        .inc();
}

pub fn operations_total(operation: &str) -> u64 {
    ASSET_OPERATIONS.with_label_values(&[operation]).get()
}

pub fn failures_total(operation: &str, error_type: &str) -> u64 {
    ASSET_OPERATION_FAILURES
        .with_label_values(&[operation, error_type])
        .get()
}

pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

/// Text exposition format
pub fn render() -> Result<String, ServiceError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&gather(), &mut buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics are not utf-8: {}", e)))
}
