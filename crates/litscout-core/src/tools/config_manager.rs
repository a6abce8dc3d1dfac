use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{CONFIG_MANAGER_TOOL, ParamKind, Tool, ToolSpec};
use crate::LitScoutError;
use crate::commands;
use crate::config::SharedConfig;

/// Applies natural-language configuration commands to the shared config.
pub struct ConfigManagerTool {
    config: SharedConfig,
}

impl ConfigManagerTool {
    pub fn new(config: SharedConfig) -> Self {
        Self { config }
    }

    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            CONFIG_MANAGER_TOOL,
            "Manage research assistant settings: enable or disable providers, set timeouts \
             and retries, show the configuration.",
        )
        .required(
            "command",
            ParamKind::String,
            "Command such as 'disable orkg', 'set timeout to 60' or 'show config'",
        )
    }
}

#[async_trait]
impl Tool for ConfigManagerTool {
    fn name(&self) -> &str {
        CONFIG_MANAGER_TOOL
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<String, LitScoutError> {
        let command = arguments
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut config = self.config.write().await;
        Ok(commands::execute(&mut config, command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolCall, ToolRegistry};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn commands_update_shared_config() {
        let config = crate::Config::default().into_shared();
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ConfigManagerTool::spec(),
                Arc::new(ConfigManagerTool::new(config.clone())),
            )
            .unwrap();

        let result = registry
            .dispatch(ToolCall::new(
                CONFIG_MANAGER_TOOL,
                json!({ "command": "disable core" }),
            ))
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.content, "CORE tool disabled");
        assert!(!config.read().await.sources.core.enabled);
    }
}
