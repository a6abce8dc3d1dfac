//! Tool registry and dispatcher.
//!
//! A tool is a named capability with a declared input schema. Tools are
//! registered explicitly at startup; [`ToolRegistry::dispatch`] enforces the
//! declared contract before any implementation runs.

mod config_manager;
mod core_api;
mod http;
mod openalex;
mod orkg;
mod web;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::LitScoutError;
use crate::config::{ProviderKind, SearchDefaults, SharedConfig};

pub use config_manager::ConfigManagerTool;
pub use core_api::CoreSearchTool;
pub use http::{RetryPolicy, build_http_client};
pub use openalex::OpenAlexSearchTool;
pub use orkg::OrkgSearchTool;
pub use web::{WebFetchTool, WebPage};

/// Name the generic web fetcher is registered under.
pub const WEB_FETCH_TOOL: &str = "web_fetch";
/// Name the configuration command tool is registered under.
pub const CONFIG_MANAGER_TOOL: &str = "config_manager";

/// A callable capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Canonical name; must equal the name of the spec it is registered with.
    fn name(&self) -> &str;

    /// Run the tool with arguments already checked against its spec.
    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<String, LitScoutError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

/// Declarative descriptor for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn required(self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.param(name, kind, true, description)
    }

    pub fn optional(self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.param(name, kind, false, description)
    }

    fn param(mut self, name: &str, kind: ParamKind, required: bool, description: &str) -> Self {
        self.parameters.push(ParamSpec {
            name: name.to_string(),
            kind,
            required,
            description: description.to_string(),
        });
        self
    }

    /// Check the spec itself is well formed.
    pub fn validate(&self) -> Result<(), LitScoutError> {
        if self.name.trim().is_empty() {
            return Err(LitScoutError::Configuration(
                "tool spec is missing a name".into(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(LitScoutError::Configuration(format!(
                "tool spec `{}` is missing a description",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if param.name.trim().is_empty() {
                return Err(LitScoutError::Configuration(format!(
                    "tool spec `{}` declares a parameter without a name",
                    self.name
                )));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(LitScoutError::Configuration(format!(
                    "tool spec `{}` declares parameter `{}` twice",
                    self.name, param.name
                )));
            }
        }
        Ok(())
    }

    /// Check call arguments against the declared parameters.
    pub fn check_arguments<'a>(
        &self,
        arguments: &'a Value,
    ) -> Result<&'a Map<String, Value>, LitScoutError> {
        let Some(object) = arguments.as_object() else {
            return Err(LitScoutError::validation(
                &self.name,
                "arguments must be a JSON object",
            ));
        };

        for param in &self.parameters {
            match object.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(LitScoutError::validation(
                        &self.name,
                        format!("missing required argument `{}`", param.name),
                    ));
                }
                Some(value) if !value.is_null() && !param.kind.accepts(value) => {
                    return Err(LitScoutError::validation(
                        &self.name,
                        format!("argument `{}` must be of type {}", param.name, param.kind),
                    ));
                }
                _ => {}
            }
        }

        for key in object.keys() {
            if !self.parameters.iter().any(|param| &param.name == key) {
                debug!(tool = %self.name, argument = %key, "ignoring undeclared argument");
            }
        }

        Ok(object)
    }

    /// JSON-schema style definition for agent-facing layers.
    pub fn to_definition(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|param| {
                (
                    param.name.clone(),
                    json!({ "type": param.kind.as_str(), "description": param.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|param| param.required)
            .map(|param| param.name.as_str())
            .collect();

        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }
}

/// A structured request to run a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failure,
}

/// Outcome of an invoked tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub status: ToolStatus,
    pub content: String,
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

struct Registration {
    spec: ToolSpec,
    tool: Arc<dyn Tool>,
}

/// Mapping from tool name to implementation.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Registration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool: the three bibliographic providers,
    /// the web fetcher and the configuration manager.
    pub fn with_default_tools(
        config: SharedConfig,
        client: reqwest::Client,
    ) -> Result<Self, LitScoutError> {
        let mut registry = Self::new();
        registry.register(
            OpenAlexSearchTool::spec(),
            Arc::new(OpenAlexSearchTool::new(config.clone(), client.clone())),
        )?;
        registry.register(
            CoreSearchTool::spec(),
            Arc::new(CoreSearchTool::new(config.clone(), client.clone())),
        )?;
        registry.register(
            OrkgSearchTool::spec(),
            Arc::new(OrkgSearchTool::new(config.clone(), client.clone())),
        )?;
        registry.register(WebFetchTool::spec(), Arc::new(WebFetchTool::new(client)))?;
        registry.register(
            ConfigManagerTool::spec(),
            Arc::new(ConfigManagerTool::new(config)),
        )?;
        Ok(registry)
    }

    /// Register a tool under its spec. Fails on name mismatch, malformed spec or
    /// duplicate registration.
    pub fn register(&mut self, spec: ToolSpec, tool: Arc<dyn Tool>) -> Result<(), LitScoutError> {
        spec.validate()?;
        if spec.name != tool.name() {
            return Err(LitScoutError::Configuration(format!(
                "tool spec `{}` does not match implementation name `{}`",
                spec.name,
                tool.name()
            )));
        }
        if self.tools.contains_key(&spec.name) {
            return Err(LitScoutError::Configuration(format!(
                "tool `{}` is already registered",
                spec.name
            )));
        }
        debug!(tool = %spec.name, params = spec.parameters.len(), "registered tool");
        self.tools.insert(spec.name.clone(), Registration { spec, tool });
        Ok(())
    }

    /// Route a call to its implementation.
    ///
    /// Unknown names and arguments that violate the spec are errors and never
    /// reach the implementation. Implementation errors come back as a
    /// `Failure` result.
    #[instrument(
        name = "tool.dispatch",
        skip(self, call),
        fields(tool = %call.name, call_id = %call.id)
    )]
    pub async fn dispatch(&self, call: ToolCall) -> Result<ToolResult, LitScoutError> {
        let registration = self
            .tools
            .get(&call.name)
            .ok_or_else(|| LitScoutError::NotFound(call.name.clone()))?;
        let arguments = registration.spec.check_arguments(&call.arguments)?;

        match registration.tool.invoke(arguments).await {
            Ok(content) => Ok(ToolResult {
                call_id: call.id,
                status: ToolStatus::Success,
                content,
            }),
            Err(err) => {
                warn!(error = %err, "tool invocation failed");
                Ok(ToolResult {
                    call_id: call.id,
                    status: ToolStatus::Failure,
                    content: err.to_string(),
                })
            }
        }
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|registration| &registration.spec)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions of every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<Value> {
        self.tool_names()
            .iter()
            .filter_map(|name| self.spec(name))
            .map(ToolSpec::to_definition)
            .collect()
    }
}

/// Arguments shared by the bibliographic search tools.
fn search_spec(kind: ProviderKind, description: &str) -> ToolSpec {
    ToolSpec::new(kind.tool_name(), description)
        .required(
            "topic",
            ParamKind::String,
            "The research topic or keywords to search for",
        )
        .optional(
            "max_results",
            ParamKind::Integer,
            "Maximum number of papers to return",
        )
        .optional(
            "min_year",
            ParamKind::Integer,
            "Minimum publication year",
        )
}

struct SearchArgs {
    topic: String,
    max_results: usize,
    min_year: i32,
}

impl SearchArgs {
    /// Read the shared search arguments; integers that do not fit are rejected.
    fn from_arguments(
        tool: &str,
        arguments: &Map<String, Value>,
        defaults: &SearchDefaults,
    ) -> Result<Self, LitScoutError> {
        let max_results = match arguments.get("max_results").and_then(Value::as_u64) {
            Some(n) => usize::try_from(n).map_err(|_| {
                LitScoutError::validation(tool, format!("max_results {n} is out of range"))
            })?,
            None => 0,
        };
        let min_year = match arguments.get("min_year").and_then(Value::as_i64) {
            Some(year) => i32::try_from(year).map_err(|_| {
                LitScoutError::validation(tool, format!("min_year {year} is out of range"))
            })?,
            None => defaults.min_year,
        };
        Ok(Self {
            topic: arguments
                .get("topic")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string(),
            max_results: if max_results > 0 {
                max_results
            } else {
                defaults.max_results
            },
            min_year,
        })
    }
}
