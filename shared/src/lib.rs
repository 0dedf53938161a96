pub mod admin_service;
pub mod http;
pub mod metrics_defs;

// Re-exported so the metric macros resolve in crates that only depend on `shared`.
pub use metrics;
