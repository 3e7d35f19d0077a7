// Infrastructure layer (shared components)
pub mod config;
pub mod metrics;
pub mod telemetry;

// Data access layer
pub mod cache;
pub mod entity;
pub mod store;

// Eventing and dispatch
pub mod beacon;
pub mod notification;
