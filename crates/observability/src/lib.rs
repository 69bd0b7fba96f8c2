//! Shared tracing setup for binaries and tests that embed the ODM.

/// Subscriber configuration (filters, formats).
pub mod tracing;

/// Install the process-wide JSON subscriber.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Install a human-readable subscriber that writes through the test harness,
/// so log lines show up only for failing tests.
pub fn init_for_tests() {
    tracing::init_for_tests();
}
