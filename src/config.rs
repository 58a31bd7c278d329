use crate::approval::ApprovalFlow;
use crate::error::Result as WorkflowResult;
use crate::flow::StaticFlows;
use crate::sweeper::SweeperSettings;
use crate::workflow::ApprovalRoutes;
use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Main configuration for the order workflow service
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub sweeper: SweeperSettings,
    /// Flow ids guarding cancellation, suspension and resumption
    pub approval: ApprovalRoutes,
    pub logging: LoggingSettings,
    /// Flows defined inline. When empty, flows are read from the store instead.
    pub flows: Vec<ApprovalFlow>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Directory of the sled database
    pub path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: "order-workflow.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Load configuration with precedence:
    /// 1. Default values (anything the sources below leave out)
    /// 2. The settings file (`order-workflow.toml` unless a path is given)
    /// 3. Environment variables prefixed with ORDER_WORKFLOW__
    pub fn load(path: Option<&str>) -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(path.unwrap_or("order-workflow")).required(path.is_some()))
            .add_source(
                Environment::with_prefix("ORDER_WORKFLOW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    pub fn static_flows(&self) -> WorkflowResult<StaticFlows> {
        StaticFlows::new(self.flows.iter().cloned())
    }
}
