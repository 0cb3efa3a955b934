//! Config flows
//!
//! A config flow is the short wizard that produces a config entry: show a
//! form, validate the input with one real connection, then create the
//! entry or show the form again with errors. Flows are driven by
//! [`ConfigEntries`], which keeps the in-progress flows and commits the
//! result.
//!
//! Options flows use the same [`ConfigFlow`] trait. They start at step
//! `init` for an existing entry and end by replacing the entry's options.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntrySource, ConfigEntryUpdate, EntryData};
use crate::manager::{ConfigEntries, ConfigEntriesError};

/// User input submitted to a step
pub type FlowInput = EntryData;

pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";
pub const ABORT_ALREADY_IN_PROGRESS: &str = "already_in_progress";
pub const ABORT_REAUTH_SUCCESSFUL: &str = "reauth_successful";

/// First step of every options flow
pub const STEP_INIT: &str = "init";

#[derive(Debug, Error)]
pub enum FlowError {
    /// Raised from inside a step to end the flow
    #[error("Flow aborted: {0}")]
    Abort(String),

    #[error("Flow not found: {0}")]
    UnknownFlow(String),

    #[error("No config flow for integration {0}")]
    UnknownHandler(String),

    #[error("Handler {handler} doesn't support step {step_id}")]
    UnknownStep { handler: String, step_id: String },

    #[error(transparent)]
    Entries(#[from] ConfigEntriesError),
}

impl FlowError {
    pub fn abort(reason: impl Into<String>) -> Self {
        FlowError::Abort(reason.into())
    }
}

/// One input of a form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub name: String,
    pub required: bool,
    /// Rendered masked, never echoed back
    pub secret: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FormField {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            secret: false,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// What a flow step asks the manager to do next
#[derive(Debug, Clone, PartialEq)]
pub enum FlowStep {
    /// Show a form; its submission runs `step_id`
    Form {
        step_id: String,
        schema: Vec<FormField>,
        errors: HashMap<String, String>,
        placeholders: HashMap<String, String>,
    },
    CreateEntry {
        title: String,
        data: EntryData,
        options: EntryData,
    },
    Abort { reason: String },
}

impl FlowStep {
    pub fn form(step_id: impl Into<String>, schema: Vec<FormField>) -> Self {
        FlowStep::Form {
            step_id: step_id.into(),
            schema,
            errors: HashMap::new(),
            placeholders: HashMap::new(),
        }
    }

    /// Attach an error to a form field (`base` for the whole form)
    pub fn with_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        if let FlowStep::Form { errors, .. } = &mut self {
            errors.insert(field.into(), error.into());
        }
        self
    }

    pub fn with_placeholder(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let FlowStep::Form { placeholders, .. } = &mut self {
            placeholders.insert(key.into(), value.into());
        }
        self
    }

    pub fn create_entry(title: impl Into<String>, data: EntryData) -> Self {
        FlowStep::CreateEntry {
            title: title.into(),
            data,
            options: EntryData::new(),
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        FlowStep::Abort {
            reason: reason.into(),
        }
    }
}

/// The wizard of one integration.
///
/// `step` is called with the source name (`user`, `reauth`, ...) and no
/// input first, then with each form submission and the step id that form
/// named.
#[async_trait]
pub trait ConfigFlow: Send {
    async fn step(
        &mut self,
        ctx: &mut FlowContext,
        step_id: &str,
        input: Option<FlowInput>,
    ) -> Result<FlowStep, FlowError>;
}

/// What a flow knows about itself and about already configured devices
#[derive(Debug, Clone)]
pub struct FlowContext {
    flow_id: String,
    handler: String,
    source: ConfigEntrySource,
    unique_id: Option<String>,
    reauth_entry: Option<ConfigEntry>,
    options_entry: Option<ConfigEntry>,
    /// Unique ids of the handler's entries, refreshed before every step
    configured_ids: HashSet<String>,
    /// Unique ids claimed by the handler's other flows
    in_progress_ids: HashSet<String>,
}

impl FlowContext {
    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn source(&self) -> ConfigEntrySource {
        self.source
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    /// Claim a device identity for this flow.
    ///
    /// Aborts with `already_in_progress` when another flow of the same
    /// integration already claimed it.
    pub fn set_unique_id(&mut self, unique_id: impl Into<String>) -> Result<(), FlowError> {
        let unique_id = unique_id.into();
        if self.in_progress_ids.contains(&unique_id) {
            return Err(FlowError::abort(ABORT_ALREADY_IN_PROGRESS));
        }
        self.unique_id = Some(unique_id);
        Ok(())
    }

    /// Abort with `already_configured` if an entry has this flow's unique id
    pub fn abort_if_unique_id_configured(&self) -> Result<(), FlowError> {
        match &self.unique_id {
            Some(unique_id) if self.configured_ids.contains(unique_id) => {
                Err(FlowError::abort(ABORT_ALREADY_CONFIGURED))
            }
            _ => Ok(()),
        }
    }

    /// The entry being re-authenticated, for `reauth` flows
    pub fn reauth_entry(&self) -> Option<&ConfigEntry> {
        self.reauth_entry.as_ref()
    }

    /// The entry whose options are edited, for options flows
    pub fn options_entry(&self) -> Option<&ConfigEntry> {
        self.options_entry.as_ref()
    }

    /// Error for a step id the flow does not implement
    pub fn unknown_step(&self, step_id: &str) -> FlowError {
        FlowError::UnknownStep {
            handler: self.handler.clone(),
            step_id: step_id.to_string(),
        }
    }
}

/// Flow outcome as seen by the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowResult {
    pub flow_id: String,
    pub handler: String,
    #[serde(flatten)]
    pub outcome: FlowOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowOutcome {
    Form {
        step_id: String,
        data_schema: Vec<FormField>,
        errors: HashMap<String, String>,
        description_placeholders: HashMap<String, String>,
    },
    CreateEntry {
        entry_id: String,
        title: String,
    },
    Abort {
        reason: String,
    },
}

impl FlowResult {
    /// Abort reason, if the flow ended in an abort
    pub fn abort_reason(&self) -> Option<&str> {
        match &self.outcome {
            FlowOutcome::Abort { reason } => Some(reason),
            _ => None,
        }
    }

    /// Entry id, if the flow created an entry
    pub fn entry_id(&self) -> Option<&str> {
        match &self.outcome {
            FlowOutcome::CreateEntry { entry_id, .. } => Some(entry_id),
            _ => None,
        }
    }

    /// Step id of the form waiting for input
    pub fn form_step(&self) -> Option<&str> {
        match &self.outcome {
            FlowOutcome::Form { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    /// Errors shown on the form
    pub fn form_errors(&self) -> Option<&HashMap<String, String>> {
        match &self.outcome {
            FlowOutcome::Form { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

/// Summary of a flow waiting for input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowProgress {
    pub flow_id: String,
    pub handler: String,
    pub source: ConfigEntrySource,
    pub step_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// Entry a reauth flow belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
}

pub(crate) struct FlowState {
    flow: Box<dyn ConfigFlow>,
    ctx: FlowContext,
    step_id: String,
}

pub(crate) type SharedFlow = Arc<Mutex<FlowState>>;

impl ConfigEntries {
    /// Start a flow of `domain`'s integration from `source`
    pub async fn flow_init(
        &self,
        domain: &str,
        source: ConfigEntrySource,
        data: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        self.start_flow(domain, source, data, None).await
    }

    /// Ask the user for new credentials for `entry_id`.
    ///
    /// Returns `None` when a reauth flow for the entry is already running.
    pub async fn start_reauth(&self, entry_id: &str) -> Result<Option<FlowResult>, FlowError> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        let running = self.flow_progress.iter().any(|p| {
            p.source == ConfigEntrySource::Reauth && p.entry_id.as_deref() == Some(entry_id)
        });
        if running {
            debug!("Reauth flow for {} already in progress", entry_id);
            return Ok(None);
        }

        info!(
            "Config entry '{}' for {} requires reauthentication",
            entry.title, entry.domain
        );
        let data = entry.data.clone();
        let domain = entry.domain.clone();
        self.start_flow(&domain, ConfigEntrySource::Reauth, Some(data), Some(entry))
            .await
            .map(Some)
    }

    /// Submit `input` to the form a flow is showing
    pub async fn flow_configure(
        &self,
        flow_id: &str,
        input: FlowInput,
    ) -> Result<FlowResult, FlowError> {
        if self.options_flows.contains_key(flow_id) {
            return Err(FlowError::UnknownFlow(flow_id.to_string()));
        }
        let flow = self.shared_flow(flow_id)?;
        self.run_step(flow_id, &flow, Some(input)).await
    }

    /// Start editing the options of `entry_id`
    pub async fn options_flow_init(&self, entry_id: &str) -> Result<FlowResult, FlowError> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        let flow = self
            .integration(&entry.domain)
            .and_then(|integration| integration.options_flow())
            .ok_or_else(|| FlowError::UnknownHandler(entry.domain.clone()))?;

        let ctx = FlowContext {
            flow_id: ulid::Ulid::new().to_string(),
            handler: entry.domain.clone(),
            source: entry.source,
            unique_id: entry.unique_id.clone(),
            reauth_entry: None,
            options_entry: Some(entry),
            configured_ids: HashSet::new(),
            in_progress_ids: HashSet::new(),
        };
        self.options_flows
            .insert(ctx.flow_id.clone(), entry_id.to_string());
        debug!("Started options flow {} for {}", ctx.flow_id, entry_id);
        self.launch(flow, ctx, STEP_INIT.to_string(), None).await
    }

    /// Submit `input` to the form an options flow is showing
    pub async fn options_flow_configure(
        &self,
        flow_id: &str,
        input: FlowInput,
    ) -> Result<FlowResult, FlowError> {
        if !self.options_flows.contains_key(flow_id) {
            return Err(FlowError::UnknownFlow(flow_id.to_string()));
        }
        let flow = self.shared_flow(flow_id)?;
        self.run_step(flow_id, &flow, Some(input)).await
    }

    fn shared_flow(&self, flow_id: &str) -> Result<SharedFlow, FlowError> {
        self.flows
            .get(flow_id)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }

    pub fn flow_abort(&self, flow_id: &str) -> Result<(), FlowError> {
        if !self.remove_flow(flow_id) {
            return Err(FlowError::UnknownFlow(flow_id.to_string()));
        }
        debug!("Aborted flow {}", flow_id);
        Ok(())
    }

    pub fn flows_in_progress(&self) -> Vec<FlowProgress> {
        self.flow_progress.iter().map(|p| p.value().clone()).collect()
    }

    async fn start_flow(
        &self,
        domain: &str,
        source: ConfigEntrySource,
        data: Option<FlowInput>,
        reauth_entry: Option<ConfigEntry>,
    ) -> Result<FlowResult, FlowError> {
        let flow = self
            .integration(domain)
            .and_then(|integration| integration.config_flow())
            .ok_or_else(|| FlowError::UnknownHandler(domain.to_string()))?;

        let flow_id = ulid::Ulid::new().to_string();
        let step_id = source.as_str().to_string();
        let ctx = FlowContext {
            flow_id: flow_id.clone(),
            handler: domain.to_string(),
            source,
            unique_id: reauth_entry.as_ref().and_then(|e| e.unique_id.clone()),
            reauth_entry,
            options_entry: None,
            configured_ids: HashSet::new(),
            in_progress_ids: HashSet::new(),
        };

        self.flow_progress.insert(
            flow_id.clone(),
            FlowProgress {
                flow_id: flow_id.clone(),
                handler: domain.to_string(),
                source,
                step_id: step_id.clone(),
                unique_id: ctx.unique_id.clone(),
                entry_id: ctx.reauth_entry.as_ref().map(|e| e.entry_id.clone()),
            },
        );
        debug!("Started {} flow {} for {}", source, flow_id, domain);
        self.launch(flow, ctx, step_id, data).await
    }

    async fn launch(
        &self,
        flow: Box<dyn ConfigFlow>,
        ctx: FlowContext,
        step_id: String,
        data: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let flow_id = ctx.flow_id.clone();
        let state = Arc::new(Mutex::new(FlowState { flow, ctx, step_id }));
        self.flows.insert(flow_id.clone(), Arc::clone(&state));
        self.run_step(&flow_id, &state, data).await
    }

    async fn run_step(
        &self,
        flow_id: &str,
        flow: &SharedFlow,
        input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let mut guard = flow.lock().await;
        if !self.flows.contains_key(flow_id) {
            return Err(FlowError::UnknownFlow(flow_id.to_string()));
        }

        let FlowState { flow, ctx, step_id } = &mut *guard;
        ctx.configured_ids = self.configured_unique_ids(&ctx.handler);
        ctx.in_progress_ids = self.claimed_unique_ids(&ctx.handler, flow_id);

        let step = match flow.step(ctx, step_id.as_str(), input).await {
            Ok(step) => step,
            Err(FlowError::Abort(reason)) => FlowStep::Abort { reason },
            Err(err) => {
                self.remove_flow(flow_id);
                return Err(err);
            }
        };

        let result = |outcome| FlowResult {
            flow_id: flow_id.to_string(),
            handler: ctx.handler.clone(),
            outcome,
        };

        match step {
            FlowStep::Form {
                step_id: next,
                schema,
                errors,
                placeholders,
            } => {
                *step_id = next.clone();
                if let Some(mut progress) = self.flow_progress.get_mut(flow_id) {
                    progress.step_id = next.clone();
                    progress.unique_id = ctx.unique_id.clone();
                }
                Ok(result(FlowOutcome::Form {
                    step_id: next,
                    data_schema: schema,
                    errors,
                    description_placeholders: placeholders,
                }))
            }
            FlowStep::Abort { reason } => {
                self.remove_flow(flow_id);
                debug!("Flow {} aborted: {}", flow_id, reason);
                Ok(result(FlowOutcome::Abort { reason }))
            }
            FlowStep::CreateEntry {
                title,
                data,
                options,
            } => {
                self.remove_flow(flow_id);
                let outcome = self.finish_flow(ctx, title, data, options).await?;
                Ok(result(outcome))
            }
        }
    }

    /// Commit a flow's result: a new entry, new credentials for a
    /// reauthenticated one, or new options
    async fn finish_flow(
        &self,
        ctx: &FlowContext,
        title: String,
        data: EntryData,
        options: EntryData,
    ) -> Result<FlowOutcome, FlowError> {
        if let Some(entry) = ctx.options_entry() {
            let entry = self.update_options(&entry.entry_id, data).await?;
            info!("Updated options of '{}'", entry.title);
            return Ok(FlowOutcome::CreateEntry {
                entry_id: entry.entry_id,
                title: entry.title,
            });
        }

        if let Some(entry) = ctx.reauth_entry() {
            self.update(&entry.entry_id, ConfigEntryUpdate::new().data(data))
                .await?;
            info!("Updated credentials of '{}', reloading", entry.title);
            if let Err(err) = self.reload(&entry.entry_id).await {
                warn!("Reload of '{}' after reauth failed: {}", entry.title, err);
            }
            return Ok(FlowOutcome::Abort {
                reason: ABORT_REAUTH_SUCCESSFUL.to_string(),
            });
        }

        let (version, minor_version) = self
            .integration(ctx.handler())
            .map(|integration| integration.version())
            .unwrap_or((1, 1));
        let mut entry = ConfigEntry::new(ctx.handler(), title)
            .with_data(data)
            .with_options(options)
            .with_source(ctx.source())
            .with_version(version, minor_version);
        if let Some(unique_id) = ctx.unique_id() {
            entry = entry.with_unique_id(unique_id);
        }

        let entry = match self.add(entry).await {
            Ok(entry) => entry,
            Err(ConfigEntriesError::AlreadyExists { .. }) => {
                return Ok(FlowOutcome::Abort {
                    reason: ABORT_ALREADY_CONFIGURED.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        if let Err(err) = self.setup(&entry.entry_id).await {
            debug!("Entry '{}' created but not loaded: {}", entry.title, err);
        }
        Ok(FlowOutcome::CreateEntry {
            entry_id: entry.entry_id,
            title: entry.title,
        })
    }

    fn configured_unique_ids(&self, domain: &str) -> HashSet<String> {
        self.get_by_domain(domain)
            .into_iter()
            .filter_map(|entry| entry.unique_id)
            .collect()
    }

    fn claimed_unique_ids(&self, domain: &str, except_flow: &str) -> HashSet<String> {
        self.flow_progress
            .iter()
            .filter(|p| p.handler == domain && p.flow_id != except_flow)
            .filter_map(|p| p.unique_id.clone())
            .collect()
    }

    /// Drop a flow; true if it was in progress
    pub(crate) fn remove_flow(&self, flow_id: &str) -> bool {
        self.flow_progress.remove(flow_id);
        self.options_flows.remove(flow_id);
        self.flows.remove(flow_id).is_some()
    }

    /// Drop flows attached to a removed entry
    pub(crate) fn abort_entry_flows(&self, entry_id: &str) {
        let mut flow_ids: Vec<String> = self
            .flow_progress
            .iter()
            .filter(|p| p.entry_id.as_deref() == Some(entry_id))
            .map(|p| p.flow_id.clone())
            .collect();
        flow_ids.extend(
            self.options_flows
                .iter()
                .filter(|r| r.value() == entry_id)
                .map(|r| r.key().clone()),
        );
        for flow_id in flow_ids {
            self.remove_flow(&flow_id);
        }
    }
}
