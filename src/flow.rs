//! Where approval flow definitions come from
//!
//! Flows are tenant configuration. The engine asks the repository for the flow on
//! every operation rather than holding on to a copy, so a redefined flow applies
//! to the next decision without a restart.
use crate::approval::ApprovalFlow;
use crate::error::{Result, WorkflowError};
use crate::store::Store;
use std::collections::HashMap;

pub trait FlowRepository: Send + Sync {
    fn load_flow(&self, tenant_id: &str, flow_id: &str) -> Result<ApprovalFlow>;
}

impl FlowRepository for Store {
    fn load_flow(&self, tenant_id: &str, flow_id: &str) -> Result<ApprovalFlow> {
        self.get_flow(tenant_id, flow_id)?
            .ok_or_else(|| WorkflowError::FlowNotFound(flow_id.to_string()))
    }
}

/// Fixed set of flows, typically built from the settings file.
#[derive(Debug, Default, Clone)]
pub struct StaticFlows {
    flows: HashMap<(String, String), ApprovalFlow>,
}

impl StaticFlows {
    pub fn new(flows: impl IntoIterator<Item = ApprovalFlow>) -> Result<Self> {
        let mut map = HashMap::new();
        for flow in flows {
            flow.validate()?;
            map.insert((flow.tenant_id.clone(), flow.id.clone()), flow);
        }
        Ok(Self { flows: map })
    }
}

impl FlowRepository for StaticFlows {
    fn load_flow(&self, tenant_id: &str, flow_id: &str) -> Result<ApprovalFlow> {
        self.flows
            .get(&(tenant_id.to_string(), flow_id.to_string()))
            .cloned()
            .ok_or_else(|| WorkflowError::FlowNotFound(flow_id.to_string()))
    }
}
