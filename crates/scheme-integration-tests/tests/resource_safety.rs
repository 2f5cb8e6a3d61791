//! Failed bootstraps must not leave processes behind.
//!
//! Kept as the only test in this binary so that no other test's children are
//! counted.

#![cfg(target_os = "linux")]

use scheme_integration_tests::live_children;
use scheme_plugin_api::{bootstrap, BootstrapError};
use tokio::task::JoinSet;

const WRONG_COOKIE: &str = env!("CARGO_BIN_EXE_wrong-cookie-scheme");
const WRONG_VERSION: &str = env!("CARGO_BIN_EXE_wrong-version-scheme");

const ATTEMPTS: usize = 1000;
const CONCURRENCY: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_bootstraps_leave_no_processes() {
    assert_eq!(live_children(), 0);

    let mut completed = 0;
    while completed < ATTEMPTS {
        let batch = CONCURRENCY.min(ATTEMPTS - completed);
        let mut tasks = JoinSet::new();
        for i in 0..batch {
            // Alternate between a plugin that exits and one that has to be killed.
            let path = if (completed + i) % 2 == 0 {
                WRONG_COOKIE
            } else {
                WRONG_VERSION
            };
            tasks.spawn(bootstrap(path));
        }

        while let Some(joined) = tasks.join_next().await {
            let err = joined.unwrap().unwrap_err();
            assert!(matches!(err, BootstrapError::Handshake { .. }), "unexpected error: {err}");
        }
        completed += batch;
    }

    assert_eq!(live_children(), 0);
}
