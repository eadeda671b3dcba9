#![allow(dead_code)]

use std::time::Duration;

use procpool::pool::PoolSettings;

/// Builder for `PoolSettings` to simplify test setup.
///
/// Defaults to fast sleeps so pool tests finish quickly.
pub struct PoolSettingsBuilder {
    settings: PoolSettings,
}

impl PoolSettingsBuilder {
    pub fn new(key: &str) -> Self {
        let mut settings = PoolSettings::new(key);
        settings.cycle_sleep = Duration::from_millis(10);
        settings.wait_sleep = Duration::from_millis(20);
        Self { settings }
    }

    pub fn min_workers(mut self, n: usize) -> Self {
        self.settings.min_workers = n;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.settings.max_workers = n;
        self
    }

    pub fn cycle_sleep(mut self, d: Duration) -> Self {
        self.settings.cycle_sleep = d;
        self
    }

    pub fn wait_sleep(mut self, d: Duration) -> Self {
        self.settings.wait_sleep = d;
        self
    }

    pub fn wait_for_finish(mut self, val: bool) -> Self {
        self.settings.wait_for_finish = val;
        self
    }

    pub fn worker_timeout(mut self, d: Duration) -> Self {
        self.settings.worker_timeout = Some(d);
        self
    }

    pub fn build(self) -> PoolSettings {
        self.settings
    }
}

/// Work values "item-0".."item-(n-1)".
pub fn work_values(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("item-{i}")).collect()
}
