mod settings;

pub use settings::{BeaconSettings, CacheSettings, RedisConfig, Settings};
