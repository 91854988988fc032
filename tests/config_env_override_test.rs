//! Environment variable overrides. Kept in its own test binary because it mutates the
//! process environment.

use pipeline_core::config::ConfigManager;
use std::path::PathBuf;

#[test]
fn test_prefixed_environment_variables_win_over_files() {
    std::env::set_var("PIPELINE__MONITOR__INTERVAL_SECONDS", "7");
    std::env::set_var("PIPELINE__STATE_TRACKER__HISTORY_LIMIT", "250");

    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config");
    let manager = ConfigManager::load_from_directory_with_env(Some(dir), "test").unwrap();

    std::env::remove_var("PIPELINE__MONITOR__INTERVAL_SECONDS");
    std::env::remove_var("PIPELINE__STATE_TRACKER__HISTORY_LIMIT");

    assert_eq!(manager.config().monitor.interval_seconds, 7);
    assert_eq!(manager.config().state_tracker.history_limit, 250);
}
