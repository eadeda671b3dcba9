#![allow(dead_code)]

pub use procpool_test_utils::{init_tracing, with_timeout};
