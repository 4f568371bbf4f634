pub mod platform;
pub mod registry;
pub mod result_cache;
