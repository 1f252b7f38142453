use std::sync::Arc;
use std::time::Duration;
use log::info;
use serde_json::json;
use crate::core::Result;
use crate::storage::OptionStore;

/// Recurring tick registrations.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, name: &str, interval: Duration) -> Result<()>;

    fn unschedule(&self, name: &str) -> Result<()>;

    fn interval(&self, name: &str) -> Result<Option<Duration>>;

    fn is_scheduled(&self, name: &str) -> Result<bool> {
        Ok(self.interval(name)?.is_some())
    }
}

/// Registrations stored in an [`OptionStore`]; a worker loop polls
/// [`Scheduler::interval`] and fires the tick while it is registered.
pub struct IntervalScheduler {
    options: Arc<dyn OptionStore>,
}

impl IntervalScheduler {
    pub fn new(options: Arc<dyn OptionStore>) -> Self {
        Self { options }
    }

    fn key(name: &str) -> String {
        format!("schedule_{}", name)
    }
}

impl Scheduler for IntervalScheduler {
    fn schedule(&self, name: &str, interval: Duration) -> Result<()> {
        info!("Scheduling '{}' every {}s", name, interval.as_secs());
        self.options
            .set(&Self::key(name), json!({ "interval_secs": interval.as_secs() }), None)
    }

    fn unschedule(&self, name: &str) -> Result<()> {
        if self.options.delete(&Self::key(name))? {
            info!("Unscheduled '{}'", name);
        }
        Ok(())
    }

    fn interval(&self, name: &str) -> Result<Option<Duration>> {
        Ok(self
            .options
            .get(&Self::key(name))?
            .and_then(|v| v["interval_secs"].as_u64())
            .map(Duration::from_secs))
    }
}
