//! Must stay in its own test binary: it installs the global subscriber.

use engine_runtime::{error::RuntimeError, logging::init_tracing};

#[test]
fn second_install_is_reported_not_panicked() {
    let _ = init_tracing("info");
    assert!(matches!(
        init_tracing("debug"),
        Err(RuntimeError::Logging(_))
    ));
}
