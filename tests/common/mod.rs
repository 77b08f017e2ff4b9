/*!
 * Shared test harness
 *
 * One runtime per test process; every test in a binary uses the same
 * backend, so the idempotent setup() path is exercised on each call.
 */

use threadmill::{setup, Config, Runtime};

pub fn runtime(config: Config) -> &'static Runtime {
    let _ = env_logger::builder().is_test(true).try_init();
    setup(config).expect("runtime setup failed")
}
