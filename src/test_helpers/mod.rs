// Test Helpers Module - shared fixtures for unit and integration tests
//
// Builds a fully in-memory pipeline core on a manual clock so tests can seed entities,
// drive time forward and inspect the stores directly.

pub mod fixtures;
pub mod test_utils;

pub use fixtures::TestPipeline;
pub use test_utils::{get_test_database_url, get_test_redis_url};
