//! Approval flow configuration and the records an approval run leaves behind
use crate::error::{Result, WorkflowError};
use crate::order::TimeStamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the sweeper does with a step that outlived its deadline.
#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "snake_case")]
#[cbor(index_only)]
pub enum TimeoutAction {
    #[n(0)]
    AutoApprove,
    #[n(1)]
    AutoReject,
    #[n(2)]
    Escalate,
}

impl TimeoutAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutAction::AutoApprove => "auto_approve",
            TimeoutAction::AutoReject => "auto_reject",
            TimeoutAction::Escalate => "escalate",
        }
    }
}

impl fmt::Display for TimeoutAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeoutAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto_approve" => Ok(TimeoutAction::AutoApprove),
            "auto_reject" => Ok(TimeoutAction::AutoReject),
            "escalate" => Ok(TimeoutAction::Escalate),
            other => Err(format!("unknown timeout action: {other}")),
        }
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq,
)]
pub struct TimeoutConfig {
    #[n(0)]
    pub timeout_hours: u32,
    #[n(1)]
    pub action: TimeoutAction,
    #[n(2)]
    #[serde(default)]
    pub escalate_to_role: Option<String>,
}

#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq,
)]
pub struct ApprovalStep {
    #[n(0)]
    pub step_order: u32,
    #[n(1)]
    pub approver_role: String,
    #[n(2)]
    #[serde(default)]
    pub timeout: Option<TimeoutConfig>,
}

#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq,
)]
pub struct ApprovalFlow {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub tenant_id: String,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub default_timeout_minutes: u32,
    #[n(4)]
    pub auto_escalate: bool,
    #[n(5)]
    pub steps: Vec<ApprovalStep>,
}

impl ApprovalFlow {
    fn misconfigured(&self, reason: impl Into<String>) -> WorkflowError {
        WorkflowError::FlowConfigurationError {
            flow_id: self.id.clone(),
            reason: reason.into(),
        }
    }

    /// Steps must exist and be numbered in strictly ascending order.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(self.misconfigured("flow has no steps"));
        }
        if self.steps.windows(2).any(|w| w[0].step_order >= w[1].step_order) {
            return Err(self.misconfigured("step orders are not strictly ascending"));
        }
        for step in &self.steps {
            if let Some(TimeoutConfig {
                action: TimeoutAction::Escalate,
                escalate_to_role: None,
                ..
            }) = step.timeout
            {
                return Err(self.misconfigured(format!(
                    "step {} escalates without an escalate_to_role",
                    step.step_order
                )));
            }
        }
        Ok(())
    }

    pub fn first_step(&self) -> Result<&ApprovalStep> {
        self.steps
            .first()
            .ok_or_else(|| self.misconfigured("flow has no steps"))
    }

    pub fn step(&self, step_order: u32) -> Result<&ApprovalStep> {
        if self.steps.is_empty() {
            return Err(self.misconfigured("flow has no steps"));
        }
        self.steps
            .iter()
            .find(|s| s.step_order == step_order)
            .ok_or_else(|| self.misconfigured(format!("step {step_order} does not exist")))
    }

    /// The step following `step_order`, or `None` when it is the last one.
    pub fn next_step(&self, step_order: u32) -> Result<Option<&ApprovalStep>> {
        let position = self
            .steps
            .iter()
            .position(|s| s.step_order == step_order)
            .ok_or_else(|| self.misconfigured(format!("step {step_order} does not exist")))?;

        Ok(self.steps.get(position + 1))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
#[cbor(index_only)]
pub enum RequestStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    // pulled back by the requester before a final decision
    #[n(3)]
    Withdrawn,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub tenant_id: String,
    #[n(2)]
    pub flow_id: String,
    #[n(3)]
    pub requester_id: String,
    #[n(4)]
    pub entity_type: String,
    #[n(5)]
    pub entity_id: String,
    #[n(6)]
    pub status: RequestStatus,
    #[n(7)]
    pub current_step_order: u32,
    #[n(8)]
    pub due_at: TimeStamp<Utc>,
    #[n(9)]
    pub auto_escalate: bool,
    #[n(10)]
    pub timeout_minutes: u32,
    #[n(11)]
    pub assigned_role: Option<String>, // set once the current step has been escalated
    #[n(12)]
    pub escalation_count: u32,
    #[n(13)]
    pub version: u64,
    #[n(14)]
    pub created_at: TimeStamp<Utc>,
    #[n(15)]
    pub completed_at: Option<TimeStamp<Utc>>,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Role that may act on the current step right now.
    pub fn effective_role<'a>(&'a self, step: &'a ApprovalStep) -> &'a str {
        self.assigned_role.as_deref().unwrap_or(&step.approver_role)
    }

    /// Deadline for a step: its own timeout when configured, otherwise the request's.
    pub fn due_for(&self, step: &ApprovalStep, from: &TimeStamp<Utc>) -> TimeStamp<Utc> {
        let minutes = step
            .timeout
            .as_ref()
            .map(|t| i64::from(t.timeout_hours) * 60)
            .unwrap_or(i64::from(self.timeout_minutes));
        from.plus_minutes(minutes)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
#[cbor(index_only)]
pub enum Decision {
    #[n(0)]
    Approve,
    #[n(1)]
    Reject,
}

// Append-only decision log entry. Stored under the sha256 of its encoding.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalAction {
    #[n(0)]
    pub request_id: String,
    #[n(1)]
    pub step_order: u32,
    #[n(2)]
    pub actor_id: String,
    #[n(3)]
    pub action: Decision,
    #[n(4)]
    pub comment: Option<String>,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
}

impl ApprovalAction {
    pub fn build(&self) -> Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}
