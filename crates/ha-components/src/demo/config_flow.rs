//! Setup wizard of the demo integration

use async_trait::async_trait;
use ha_config_entries::{
    ConfigEntrySource, ConfigFlow, EntryData, FlowContext, FlowError, FlowInput, FlowStep,
    FormField,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::client::{self, ClientError, Connector, DeviceClient};

pub const CONF_HOST: &str = "host";
pub const CONF_PASSWORD: &str = "password";

pub const ERROR_CANNOT_CONNECT: &str = "cannot_connect";
pub const ERROR_INVALID_AUTH: &str = "invalid_auth";
pub const ABORT_UNIQUE_ID_MISMATCH: &str = "unique_id_mismatch";

pub struct DemoConfigFlow {
    connector: Arc<dyn Connector>,
}

impl DemoConfigFlow {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// One real connection with the submitted credentials
    async fn validate(&self, host: &str, password: &str) -> Result<String, &'static str> {
        match client::open(self.connector.as_ref(), host, password).await {
            Ok((client, details)) => {
                close(client).await;
                Ok(details.serial)
            }
            Err(err) => {
                debug!("Validation against {} failed: {}", host, err);
                Err(error_key(&err))
            }
        }
    }

    /// `user` and `import`: a new device. Imports have no form to show, so
    /// validation errors abort them.
    async fn step_new_device(
        &self,
        ctx: &mut FlowContext,
        input: Option<FlowInput>,
    ) -> Result<FlowStep, FlowError> {
        let Some(input) = input else {
            return Ok(user_form());
        };
        let host = field(&input, CONF_HOST);
        let password = field(&input, CONF_PASSWORD);

        let serial = match self.validate(host, password).await {
            Ok(serial) => serial,
            Err(error) if ctx.source() == ConfigEntrySource::Import => {
                return Err(FlowError::abort(error))
            }
            Err(error) => return Ok(user_form().with_error("base", error)),
        };

        ctx.set_unique_id(serial)?;
        ctx.abort_if_unique_id_configured()?;
        Ok(FlowStep::create_entry(host, credentials(host, password)))
    }

    async fn step_reauth_confirm(
        &self,
        ctx: &mut FlowContext,
        input: Option<FlowInput>,
    ) -> Result<FlowStep, FlowError> {
        let Some(entry) = ctx.reauth_entry().cloned() else {
            return Err(ctx.unknown_step("reauth_confirm"));
        };
        let form = FlowStep::form(
            "reauth_confirm",
            vec![FormField::required(CONF_PASSWORD).secret()],
        )
        .with_placeholder("name", entry.title.clone());

        let Some(input) = input else {
            return Ok(form);
        };
        let host = entry.data_str(CONF_HOST).unwrap_or_default();
        let password = field(&input, CONF_PASSWORD);

        let serial = match self.validate(host, password).await {
            Ok(serial) => serial,
            Err(error) => return Ok(form.with_error("base", error)),
        };
        if entry.unique_id.as_deref().is_some_and(|id| id != serial) {
            return Err(FlowError::abort(ABORT_UNIQUE_ID_MISMATCH));
        }

        let mut data = entry.data.clone();
        data.insert(CONF_PASSWORD.to_string(), Value::from(password));
        Ok(FlowStep::create_entry(entry.title, data))
    }
}

#[async_trait]
impl ConfigFlow for DemoConfigFlow {
    async fn step(
        &mut self,
        ctx: &mut FlowContext,
        step_id: &str,
        input: Option<FlowInput>,
    ) -> Result<FlowStep, FlowError> {
        match step_id {
            "user" | "import" => self.step_new_device(ctx, input).await,
            // Started with the entry's data; ask for the new password
            "reauth" => self.step_reauth_confirm(ctx, None).await,
            "reauth_confirm" => self.step_reauth_confirm(ctx, input).await,
            other => Err(ctx.unknown_step(other)),
        }
    }
}

fn user_form() -> FlowStep {
    FlowStep::form(
        "user",
        vec![
            FormField::required(CONF_HOST),
            FormField::required(CONF_PASSWORD).secret(),
        ],
    )
}

fn field<'a>(input: &'a FlowInput, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn credentials(host: &str, password: &str) -> EntryData {
    EntryData::from([
        (CONF_HOST.to_string(), Value::from(host)),
        (CONF_PASSWORD.to_string(), Value::from(password)),
    ])
}

fn error_key(err: &ClientError) -> &'static str {
    if err.is_auth() {
        ERROR_INVALID_AUTH
    } else {
        ERROR_CANNOT_CONNECT
    }
}

async fn close(client: Arc<dyn DeviceClient>) {
    if let Err(err) = client.disconnect().await {
        warn!("Error closing validation connection: {}", err);
    }
}
