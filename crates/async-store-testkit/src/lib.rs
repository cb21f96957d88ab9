//! Async Store Testing Infrastructure
//!
//! Shared setup for store tests: tracing initialisation, a diagnostic sink
//! that records what it receives, a will-change waiter, timing assertions and
//! common fixtures.
//!
//! ```rust,ignore
//! use async_store_testkit::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn sets_value() {
//!     init_test_tracing();
//!     let store = test_store();
//!     store.receive(Effect::set(|s: &mut TestState| s.value = "x".into()));
//! }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod assertions;
pub mod fixtures;
pub mod logging;
pub mod sink;
pub mod waiter;

pub use assertions::*;
pub use fixtures::*;
pub use logging::init_test_tracing;
pub use sink::{RecordedDiagnostic, RecordingSink};
pub use waiter::StoreWaiter;

// Re-export the store API so suites only need the testkit import.
pub use async_store::*;
