mod service;

pub use service::{CacheOptions, CreateManyError, EntityError, EntityService};
