//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

use std::time::Duration;

/// Poll interval used by every scenario; time is paused so it costs nothing.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Generous deadline for scenarios that are expected to finish.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Worker slots for scenario orchestrators.
pub const WORKERS: usize = 4;
