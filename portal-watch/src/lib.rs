// Portal monitor library (shared between the daemon and the CLI)

pub mod monitor;

// Async polling helpers for tests
pub mod test_utils;
