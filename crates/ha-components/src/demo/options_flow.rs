//! Options of a configured demo device

use async_trait::async_trait;
use ha_config_entries::{
    ConfigEntry, ConfigFlow, FlowContext, FlowError, FlowInput, FlowStep, FormField,
    STEP_INIT,
};
use serde_json::Value;
use std::ops::RangeInclusive;
use std::time::Duration;

pub const CONF_SCAN_INTERVAL: &str = "scan_interval";

pub const ERROR_INVALID_SCAN_INTERVAL: &str = "invalid_scan_interval";

/// Accepted polling interval, in seconds
pub const SCAN_INTERVAL_RANGE: RangeInclusive<u64> = 5..=3600;

/// Polling interval chosen in the options, if any
pub fn scan_interval_option(entry: &ConfigEntry) -> Option<Duration> {
    entry
        .options
        .get(CONF_SCAN_INTERVAL)
        .and_then(Value::as_u64)
        .filter(|secs| SCAN_INTERVAL_RANGE.contains(secs))
        .map(Duration::from_secs)
}

pub struct DemoOptionsFlow {
    default_interval: Duration,
}

impl DemoOptionsFlow {
    /// `default_interval` is shown when the entry has no option yet
    pub fn new(default_interval: Duration) -> Self {
        Self { default_interval }
    }

    fn form(&self, entry: Option<&ConfigEntry>) -> FlowStep {
        let current = entry
            .and_then(scan_interval_option)
            .unwrap_or(self.default_interval);
        FlowStep::form(
            STEP_INIT,
            vec![FormField::optional(CONF_SCAN_INTERVAL).with_default(current.as_secs())],
        )
    }
}

#[async_trait]
impl ConfigFlow for DemoOptionsFlow {
    async fn step(
        &mut self,
        ctx: &mut FlowContext,
        step_id: &str,
        input: Option<FlowInput>,
    ) -> Result<FlowStep, FlowError> {
        if step_id != STEP_INIT {
            return Err(ctx.unknown_step(step_id));
        }
        let Some(input) = input else {
            return Ok(self.form(ctx.options_entry()));
        };

        let mut options = ctx
            .options_entry()
            .map(|entry| entry.options.clone())
            .unwrap_or_default();
        match input.get(CONF_SCAN_INTERVAL) {
            None | Some(Value::Null) => {
                options.remove(CONF_SCAN_INTERVAL);
            }
            Some(value) => match value.as_u64() {
                Some(secs) if SCAN_INTERVAL_RANGE.contains(&secs) => {
                    options.insert(CONF_SCAN_INTERVAL.to_string(), Value::from(secs));
                }
                _ => {
                    return Ok(self
                        .form(ctx.options_entry())
                        .with_error(CONF_SCAN_INTERVAL, ERROR_INVALID_SCAN_INTERVAL))
                }
            },
        }
        Ok(FlowStep::create_entry("", options))
    }
}
