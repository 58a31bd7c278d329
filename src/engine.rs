//! Multi-step approval requests
//!
//! A request walks the steps of its flow one at a time. Each decision is written
//! to the action log before the request row itself changes, and the row change
//! is a compare-and-swap, so two approvers acting on the same step cannot both
//! advance it. Callers that decided from an earlier read (the sweeper) pass the
//! version they saw and lose cleanly if the request has moved since.
//! The engine never touches orders; it only reports outcomes.
use crate::approval::{
    ApprovalAction, ApprovalFlow, ApprovalRequest, ApprovalStep, Decision, RequestStatus,
    TimeoutAction,
};
use crate::error::{Result, WorkflowError};
use crate::flow::FlowRepository;
use crate::order::TimeStamp;
use crate::principal::Principal;
use crate::sinks::{Notification, NotificationSink};
use crate::store::{Store, Versioned};
use crate::utils::{REQUEST_PREFIX, new_id};
use chrono::Utc;
use std::sync::Arc;

/// Most follow-on steps one approve call clears for an approver who also holds
/// the next step's role.
pub const MAX_AUTO_APPROVE_DEPTH: usize = 10;

const SELF_APPROVE_COMMENT: &str = "approved automatically, approver also signed the previous step";

/// Result of an approve or reject call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub status: RequestStatus,
    /// Step now awaiting a decision, while the request is still pending.
    pub next_step: Option<u32>,
}

pub struct ApprovalEngine {
    store: Store,
    flows: Arc<dyn FlowRepository>,
    notifier: Arc<dyn NotificationSink>,
}

impl ApprovalEngine {
    pub fn new(
        store: Store,
        flows: Arc<dyn FlowRepository>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            flows,
            notifier,
        }
    }

    /// Open a request for `entity` against the named flow.
    ///
    /// `timeout_minutes` and `auto_escalate` fall back to the flow's defaults.
    /// Only one request may be open per entity at a time. The row is written
    /// before the entity is claimed, so a claim always names a stored request.
    #[allow(clippy::too_many_arguments)]
    pub fn create_request(
        &self,
        tenant_id: &str,
        flow_id: &str,
        requester_id: &str,
        entity_type: &str,
        entity_id: &str,
        timeout_minutes: Option<u32>,
        auto_escalate: Option<bool>,
    ) -> Result<ApprovalRequest> {
        let flow = self.load_flow(tenant_id, flow_id)?;
        let first = flow.first_step()?;

        let now = TimeStamp::new();
        let timeout_minutes = timeout_minutes.unwrap_or(flow.default_timeout_minutes);
        let request = ApprovalRequest {
            id: new_id(REQUEST_PREFIX)?,
            tenant_id: tenant_id.to_string(),
            flow_id: flow.id.clone(),
            requester_id: requester_id.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            status: RequestStatus::Pending,
            current_step_order: first.step_order,
            due_at: now.plus_minutes(i64::from(timeout_minutes)),
            auto_escalate: auto_escalate.unwrap_or(flow.auto_escalate),
            timeout_minutes,
            assigned_role: None,
            escalation_count: 0,
            version: 0,
            created_at: now,
            completed_at: None,
        };

        if !self.store.insert_request(&request)? {
            return Err(WorkflowError::VersionConflict {
                entity: "approval_request",
                id: request.id,
                expected: 0,
                found: None,
            });
        }

        match self
            .store
            .claim_entity(tenant_id, entity_type, entity_id, &request.id)
        {
            Ok(Ok(())) => {}
            Ok(Err(holder)) => {
                self.discard(&request);
                return Err(WorkflowError::ApprovalAlreadyOpen {
                    entity_type: entity_type.to_string(),
                    entity_id: entity_id.to_string(),
                    request_id: holder,
                });
            }
            Err(e) => {
                self.discard(&request);
                return Err(e);
            }
        }

        tracing::info!(
            request_id = %request.id,
            flow_id,
            entity_type,
            entity_id,
            requester_id,
            step = request.current_step_order,
            "approval request opened"
        );

        Ok(request)
    }

    pub fn load_request(&self, tenant_id: &str, request_id: &str) -> Result<ApprovalRequest> {
        Ok(self.load_versioned(tenant_id, request_id)?.value)
    }

    /// Decision log of a request, oldest first.
    pub fn actions(&self, tenant_id: &str, request_id: &str) -> Result<Vec<ApprovalAction>> {
        self.store.actions(tenant_id, request_id)
    }

    /// Pending requests across all tenants whose deadline is before `now`.
    pub fn overdue(&self, now: &TimeStamp<Utc>) -> Result<Vec<ApprovalRequest>> {
        Ok(self
            .store
            .all_requests()?
            .into_iter()
            .filter(|r| r.is_pending() && r.due_at < *now)
            .collect())
    }

    /// Approve the current step. The last step closes the request as approved,
    /// any other step hands it to the next one with a fresh deadline.
    ///
    /// When the approver also holds the next step's role that step is approved
    /// in the same call, up to [`MAX_AUTO_APPROVE_DEPTH`] steps. The system
    /// principal only ever clears the step it was called for.
    ///
    /// With `expected_version` set the call fails with `VersionConflict` unless
    /// the request is still at that version.
    pub fn approve(
        &self,
        request_id: &str,
        actor: &Principal,
        comment: Option<&str>,
        expected_version: Option<u64>,
    ) -> Result<ApprovalOutcome> {
        let mut current = self.load_open(&actor.tenant_id, request_id, expected_version)?;
        let flow = self.load_flow(&current.value.tenant_id, &current.value.flow_id)?;
        let mut comment = comment;
        let mut depth = 0;

        loop {
            let request = &current.value;
            let step = self.current_step(&flow, request)?;
            authorize(actor, request, step)?;

            self.log_decision(request, step, actor, Decision::Approve, comment)?;

            let now = TimeStamp::new();
            let (next, outcome) = match flow.next_step(step.step_order)? {
                None => (
                    ApprovalRequest {
                        status: RequestStatus::Approved,
                        completed_at: Some(now),
                        version: request.version + 1,
                        ..request.clone()
                    },
                    ApprovalOutcome {
                        status: RequestStatus::Approved,
                        next_step: None,
                    },
                ),
                Some(next_step) => (
                    ApprovalRequest {
                        current_step_order: next_step.step_order,
                        due_at: request.due_for(next_step, &now),
                        assigned_role: None,
                        version: request.version + 1,
                        ..request.clone()
                    },
                    ApprovalOutcome {
                        status: RequestStatus::Pending,
                        next_step: Some(next_step.step_order),
                    },
                ),
            };

            self.commit(&current, &next)?;

            tracing::info!(
                request_id,
                actor_id = %actor.user_id,
                step = step.step_order,
                next_step = ?outcome.next_step,
                "approval step approved"
            );

            if outcome.status == RequestStatus::Approved {
                self.close(&next)?;
                self.notify(
                    &next,
                    "Approval granted",
                    format!("Your {} request was approved", next.entity_type),
                );
                return Ok(outcome);
            }

            let following = flow.step(next.current_step_order)?;
            if actor.is_system()
                || !actor.has_role(&following.approver_role)
                || depth >= MAX_AUTO_APPROVE_DEPTH
            {
                return Ok(outcome);
            }

            depth += 1;
            tracing::info!(
                request_id,
                actor_id = %actor.user_id,
                step = following.step_order,
                depth,
                "approver holds the next step's role, approving it as well"
            );
            current = self.load_open(&next.tenant_id, &next.id, Some(next.version))?;
            comment = Some(SELF_APPROVE_COMMENT);
        }
    }

    /// Reject the request outright, whatever step it is on.
    pub fn reject(
        &self,
        request_id: &str,
        actor: &Principal,
        comment: Option<&str>,
        expected_version: Option<u64>,
    ) -> Result<ApprovalOutcome> {
        let current = self.load_open(&actor.tenant_id, request_id, expected_version)?;
        let request = &current.value;
        let flow = self.load_flow(&request.tenant_id, &request.flow_id)?;
        let step = self.current_step(&flow, request)?;
        authorize(actor, request, step)?;

        self.log_decision(request, step, actor, Decision::Reject, comment)?;

        let next = ApprovalRequest {
            status: RequestStatus::Rejected,
            completed_at: Some(TimeStamp::new()),
            version: request.version + 1,
            ..request.clone()
        };
        self.commit(&current, &next)?;
        self.close(&next)?;

        tracing::info!(
            request_id,
            actor_id = %actor.user_id,
            step = step.step_order,
            "approval request rejected"
        );

        let reason = comment.unwrap_or("no reason given");
        self.notify(
            &next,
            "Approval rejected",
            format!("Your {} request was rejected: {reason}", next.entity_type),
        );

        Ok(ApprovalOutcome {
            status: RequestStatus::Rejected,
            next_step: None,
        })
    }

    /// Pull a pending request back. Only its requester (or the system) may.
    pub fn withdraw(
        &self,
        request_id: &str,
        actor: &Principal,
        reason: Option<&str>,
    ) -> Result<ApprovalRequest> {
        let current = self.load_open(&actor.tenant_id, request_id, None)?;
        let request = &current.value;
        if !actor.is_system() && actor.user_id != request.requester_id {
            return Err(WorkflowError::NotRequester {
                actor_id: actor.user_id.clone(),
                request_id: request_id.to_string(),
            });
        }

        let next = ApprovalRequest {
            status: RequestStatus::Withdrawn,
            completed_at: Some(TimeStamp::new()),
            version: request.version + 1,
            ..request.clone()
        };
        self.commit(&current, &next)?;
        self.close(&next)?;

        tracing::info!(
            request_id,
            actor_id = %actor.user_id,
            step = next.current_step_order,
            reason = reason.unwrap_or_default(),
            "approval request withdrawn"
        );

        Ok(next)
    }

    /// Hand the current step to the escalation role configured on it and restart
    /// its deadline from `now`. Step and status stay as they are.
    pub fn escalate(
        &self,
        tenant_id: &str,
        request_id: &str,
        now: &TimeStamp<Utc>,
        expected_version: Option<u64>,
    ) -> Result<ApprovalRequest> {
        let current = self.load_open(tenant_id, request_id, expected_version)?;
        let request = &current.value;
        let flow = self.load_flow(&request.tenant_id, &request.flow_id)?;
        let step = self.current_step(&flow, request)?;

        let role = match &step.timeout {
            Some(t) if t.action == TimeoutAction::Escalate => t.escalate_to_role.clone(),
            _ => None,
        }
        .ok_or_else(|| WorkflowError::FlowConfigurationError {
            flow_id: flow.id.clone(),
            reason: format!("step {} has no escalation target", step.step_order),
        })?;

        let next = ApprovalRequest {
            assigned_role: Some(role.clone()),
            escalation_count: request.escalation_count + 1,
            due_at: request.due_for(step, now),
            version: request.version + 1,
            ..request.clone()
        };
        self.commit(&current, &next)?;

        tracing::info!(
            request_id,
            step = step.step_order,
            role = %role,
            escalations = next.escalation_count,
            "approval step escalated"
        );
        self.notify(
            &next,
            "Approval escalated",
            format!(
                "Step {} of your {} request was escalated to {role}",
                step.step_order, next.entity_type
            ),
        );

        Ok(next)
    }

    /// The flow and the current step of a request, for callers that act on timeouts.
    pub fn current_step_of(&self, request: &ApprovalRequest) -> Result<ApprovalStep> {
        let flow = self.load_flow(&request.tenant_id, &request.flow_id)?;
        Ok(self.current_step(&flow, request)?.clone())
    }

    fn load_versioned(&self, tenant_id: &str, request_id: &str) -> Result<Versioned<ApprovalRequest>> {
        self.store.load_request(tenant_id, request_id)?.ok_or_else(|| {
            tracing::error!(request_id, tenant_id, "approval request not found");
            WorkflowError::RequestNotFound(request_id.to_string())
        })
    }

    fn load_open(
        &self,
        tenant_id: &str,
        request_id: &str,
        expected_version: Option<u64>,
    ) -> Result<Versioned<ApprovalRequest>> {
        let current = self.load_versioned(tenant_id, request_id)?;
        match expected_version {
            Some(expected) if expected != current.value.version => {
                tracing::warn!(
                    request_id,
                    expected,
                    found = current.value.version,
                    "approval request moved since it was read"
                );
                return Err(WorkflowError::VersionConflict {
                    entity: "approval_request",
                    id: request_id.to_string(),
                    expected,
                    found: Some(current.value.version),
                });
            }
            _ => {}
        }
        if !current.value.is_pending() {
            return Err(WorkflowError::RequestClosed(request_id.to_string()));
        }
        Ok(current)
    }

    // re-read on every call so configuration edits take effect immediately
    fn load_flow(&self, tenant_id: &str, flow_id: &str) -> Result<ApprovalFlow> {
        let flow = self.flows.load_flow(tenant_id, flow_id)?;
        if let Err(e) = flow.validate() {
            tracing::error!(flow_id, tenant_id, error = %e, "approval flow misconfigured");
            return Err(e);
        }
        Ok(flow)
    }

    fn current_step<'f>(
        &self,
        flow: &'f ApprovalFlow,
        request: &ApprovalRequest,
    ) -> Result<&'f ApprovalStep> {
        flow.step(request.current_step_order).inspect_err(|e| {
            tracing::error!(request_id = %request.id, error = %e, "current approval step missing");
        })
    }

    fn log_decision(
        &self,
        request: &ApprovalRequest,
        step: &ApprovalStep,
        actor: &Principal,
        action: Decision,
        comment: Option<&str>,
    ) -> Result<()> {
        let entry = ApprovalAction {
            request_id: request.id.clone(),
            step_order: step.step_order,
            actor_id: actor.user_id.clone(),
            action,
            comment: comment.map(str::to_string),
            created_at: TimeStamp::new(),
        };
        self.store.append_action(&request.tenant_id, &entry)?;
        Ok(())
    }

    fn commit(
        &self,
        current: &Versioned<ApprovalRequest>,
        next: &ApprovalRequest,
    ) -> Result<()> {
        if self.store.swap_request(&current.raw, next)? {
            return Ok(());
        }

        let found = self
            .store
            .load_request(&next.tenant_id, &next.id)?
            .map(|r| r.value.version);
        tracing::warn!(request_id = %next.id, expected = current.value.version, ?found, "lost approval write race");
        Err(WorkflowError::VersionConflict {
            entity: "approval_request",
            id: next.id.clone(),
            expected: current.value.version,
            found,
        })
    }

    // the row is unreachable without its claim, dropping it only tidies up
    fn discard(&self, request: &ApprovalRequest) {
        if let Err(e) = self.store.remove_request(&request.tenant_id, &request.id) {
            tracing::warn!(request_id = %request.id, error = %e, "unclaimed request left behind");
        }
    }

    fn close(&self, request: &ApprovalRequest) -> Result<()> {
        self.store.release_entity(
            &request.tenant_id,
            &request.entity_type,
            &request.entity_id,
            &request.id,
        )
    }

    fn notify(&self, request: &ApprovalRequest, title: &str, content: String) {
        let notification = Notification {
            user_id: request.requester_id.clone(),
            title: title.to_string(),
            content,
            kind: "approval".into(),
            related_entity_type: request.entity_type.clone(),
            related_entity_id: request.entity_id.clone(),
        };
        if let Err(e) = self.notifier.notify(notification) {
            tracing::warn!(request_id = %request.id, error = %e, "notification delivery failed");
        }
    }
}

fn authorize(actor: &Principal, request: &ApprovalRequest, step: &ApprovalStep) -> Result<()> {
    if actor.is_system() {
        return Ok(());
    }
    let role = request.effective_role(step);
    if actor.has_role(role) {
        return Ok(());
    }
    Err(WorkflowError::Unauthorized {
        actor_id: actor.user_id.clone(),
        step_order: step.step_order,
        role: role.to_string(),
    })
}
