//! Periodic pass that pushes stale orders and overdue approvals forward
//!
//! It also finishes transitions whose request closed but whose order write never
//! happened, e.g. when the process died between the two.
//! Nothing here schedules itself: something external calls [`StaleOrderSweeper::run`].
//! Each record is handled on its own through the same version-checked paths as
//! interactive callers, so a record that loses a race or fails is written down
//! in the report and picked up again on the next run.
use crate::approval::{ApprovalRequest, Decision, TimeoutAction};
use crate::error::Result;
use crate::order::{Order, TimeStamp};
use crate::principal::{Principal, SYSTEM_USER_ID};
use crate::status::OrderStatus;
use crate::store::Store;
use crate::workflow::OrderWorkflow;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperSettings {
    /// How long an order may sit in `auto_close_from` before it is closed.
    pub grace_days: u32,
    pub auto_close_from: OrderStatus,
    pub auto_close_to: OrderStatus,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            grace_days: 7,
            auto_close_from: OrderStatus::InstallingPendingConfirmation,
            auto_close_to: OrderStatus::Delivered,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    AutoClose,
    AutoApprove,
    AutoReject,
    Escalate,
    /// Re-ran the order side of a request that already closed.
    Settle,
    Skipped,
    /// The request's flow or step could not be looked up.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub id: String,
    pub tenant_id: String,
    pub action: SweepAction,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub orders: Vec<RecordOutcome>,
    pub approvals: Vec<RecordOutcome>,
    pub intents: Vec<RecordOutcome>,
}

impl SweepReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes().filter(|o| !o.success).count()
    }

    fn outcomes(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.orders
            .iter()
            .chain(self.approvals.iter())
            .chain(self.intents.iter())
    }
}

fn outcome<T>(
    id: &str,
    tenant_id: &str,
    action: SweepAction,
    result: Result<T>,
) -> RecordOutcome {
    let (success, error) = match result {
        Ok(_) => (true, None),
        Err(e) => {
            if e.is_conflict() {
                tracing::warn!(id, error = %e, "sweep lost a race, retrying next cycle");
            } else {
                tracing::error!(id, error = %e, "sweep failed on record");
            }
            (false, Some(e.to_string()))
        }
    };
    RecordOutcome {
        id: id.to_string(),
        tenant_id: tenant_id.to_string(),
        action,
        success,
        error,
    }
}

pub struct StaleOrderSweeper {
    store: Store,
    workflow: Arc<OrderWorkflow>,
    settings: SweeperSettings,
}

impl StaleOrderSweeper {
    pub fn new(store: Store, workflow: Arc<OrderWorkflow>, settings: SweeperSettings) -> Self {
        Self {
            store,
            workflow,
            settings,
        }
    }

    /// One full pass: order auto-close first, then transitions left behind by
    /// earlier runs, then approval timeouts.
    pub fn run(&self, now: &TimeStamp<Utc>) -> Result<SweepReport> {
        let stale = self.find_stale_orders(now)?;
        let orders = self.close_orders(&stale);

        let intents = self.settle_closed()?;

        let overdue = self.workflow.engine().overdue(now)?;
        let approvals = self.resolve_overdue(&overdue, now);

        let report = SweepReport {
            orders,
            approvals,
            intents,
        };
        tracing::info!(
            orders = report.orders.len(),
            approvals = report.approvals.len(),
            intents = report.intents.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "sweep finished"
        );
        Ok(report)
    }

    /// Orders parked in the auto-close status since before the grace window.
    pub fn find_stale_orders(&self, now: &TimeStamp<Utc>) -> Result<Vec<Order>> {
        let cutoff = now.plus_minutes(-i64::from(self.settings.grace_days) * 24 * 60);
        Ok(self
            .store
            .all_orders()?
            .into_iter()
            .filter(|o| o.status == self.settings.auto_close_from && o.updated_at < cutoff)
            .collect())
    }

    /// Close each order against the version it was read at.
    pub fn close_orders(&self, orders: &[Order]) -> Vec<RecordOutcome> {
        orders
            .iter()
            .map(|order| {
                let result = self.workflow.mutator().apply(
                    &order.id,
                    &order.tenant_id,
                    self.settings.auto_close_to,
                    order.version,
                    SYSTEM_USER_ID,
                );
                outcome(&order.id, &order.tenant_id, SweepAction::AutoClose, result)
            })
            .collect()
    }

    /// Settle every parked transition whose request is no longer pending.
    pub fn settle_closed(&self) -> Result<Vec<RecordOutcome>> {
        let mut outcomes = Vec::new();
        for intent in self.store.all_intents()? {
            let request = self
                .workflow
                .engine()
                .load_request(&intent.tenant_id, &intent.request_id);
            if request.as_ref().is_ok_and(|r| r.is_pending()) {
                continue;
            }

            let result = request.and_then(|_| {
                self.workflow
                    .settle(&intent.tenant_id, &intent.request_id, SYSTEM_USER_ID)
            });
            outcomes.push(outcome(
                &intent.request_id,
                &intent.tenant_id,
                SweepAction::Settle,
                result,
            ));
        }
        Ok(outcomes)
    }

    /// Apply each overdue request's timeout action for its current step.
    pub fn resolve_overdue(
        &self,
        requests: &[ApprovalRequest],
        now: &TimeStamp<Utc>,
    ) -> Vec<RecordOutcome> {
        requests
            .iter()
            .map(|request| self.resolve_one(request, now))
            .collect()
    }

    fn resolve_one(&self, request: &ApprovalRequest, now: &TimeStamp<Utc>) -> RecordOutcome {
        let skipped = |reason: &str| {
            tracing::debug!(request_id = %request.id, reason, "overdue request left alone");
            RecordOutcome {
                id: request.id.clone(),
                tenant_id: request.tenant_id.clone(),
                action: SweepAction::Skipped,
                success: true,
                error: None,
            }
        };

        if !request.auto_escalate {
            return skipped("automatic handling disabled");
        }

        let step = match self.workflow.engine().current_step_of(request) {
            Ok(step) => step,
            Err(e) => {
                return outcome::<()>(
                    &request.id,
                    &request.tenant_id,
                    SweepAction::Unresolved,
                    Err(e),
                );
            }
        };
        let Some(timeout) = step.timeout else {
            return skipped("step has no timeout policy");
        };

        // every write is pinned to the version this scan read; a human decision
        // landing in between wins and the sweep reports a conflict
        let system = Principal::system(&request.tenant_id);
        let seen = Some(request.version);
        let (action, result) = match timeout.action {
            TimeoutAction::AutoApprove => (
                SweepAction::AutoApprove,
                self.workflow
                    .decide(
                        &request.id,
                        &system,
                        Decision::Approve,
                        Some("approved automatically after timeout"),
                        seen,
                    )
                    .map(|_| ()),
            ),
            TimeoutAction::AutoReject => (
                SweepAction::AutoReject,
                self.workflow
                    .decide(
                        &request.id,
                        &system,
                        Decision::Reject,
                        Some("rejected automatically after timeout"),
                        seen,
                    )
                    .map(|_| ()),
            ),
            TimeoutAction::Escalate => (
                SweepAction::Escalate,
                self.workflow
                    .engine()
                    .escalate(&request.tenant_id, &request.id, now, seen)
                    .map(|_| ()),
            ),
        };

        outcome(&request.id, &request.tenant_id, action, result)
    }
}
