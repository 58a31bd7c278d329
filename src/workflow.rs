//! Order transitions end to end
//!
//! Ordinary moves go straight to the mutator. Moves that need sign-off open an
//! approval request, park a [`TransitionIntent`] next to it and hold the order
//! for that request. The status only changes once the request is approved; the
//! hold and the intent go away however it closes.
use crate::approval::{ApprovalRequest, Decision, RequestStatus};
use crate::engine::{ApprovalEngine, ApprovalOutcome};
use crate::error::{Result, WorkflowError};
use crate::flow::FlowRepository;
use crate::graph::{can_transition_to, requires_approval};
use crate::mutator::{ORDER_ENTITY, OrderMutator};
use crate::order::Order;
use crate::principal::Principal;
use crate::sinks::{AuditSink, NotificationSink};
use crate::status::OrderStatus;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// settling retries this many times if something bumped the version meanwhile
const SETTLE_ATTEMPTS: usize = 3;

/// A status change waiting on the approval request it is stored under.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct TransitionIntent {
    #[n(0)]
    pub request_id: String,
    #[n(1)]
    pub tenant_id: String,
    #[n(2)]
    pub order_id: String,
    #[n(3)]
    pub from: OrderStatus,
    #[n(4)]
    pub to: OrderStatus,
    #[n(5)]
    pub requested_by: String,
}

/// Which approval flow guards which kind of exception transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalRoutes {
    pub cancel: String,
    pub suspend: String,
    pub resume: String,
}

impl Default for ApprovalRoutes {
    fn default() -> Self {
        Self {
            cancel: "order_cancel".into(),
            suspend: "order_suspend".into(),
            resume: "order_resume".into(),
        }
    }
}

impl ApprovalRoutes {
    pub fn flow_for(&self, from: OrderStatus, to: OrderStatus) -> &str {
        match (from, to) {
            (OrderStatus::Suspended, OrderStatus::Cancelled) => &self.cancel,
            (OrderStatus::Suspended, _) => &self.resume,
            (_, OrderStatus::Suspended) => &self.suspend,
            _ => &self.cancel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied { version: u64 },
    /// The order is held by `request` and now sits at `version`.
    AwaitingApproval { request: ApprovalRequest, version: u64 },
}

pub struct OrderWorkflow {
    store: Store,
    mutator: Arc<OrderMutator>,
    engine: Arc<ApprovalEngine>,
    routes: ApprovalRoutes,
}

impl OrderWorkflow {
    pub fn new(
        store: Store,
        mutator: Arc<OrderMutator>,
        engine: Arc<ApprovalEngine>,
        routes: ApprovalRoutes,
    ) -> Self {
        Self {
            store,
            mutator,
            engine,
            routes,
        }
    }

    /// Wire a mutator and an engine over one store.
    pub fn assemble(
        store: Store,
        flows: Arc<dyn FlowRepository>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationSink>,
        routes: ApprovalRoutes,
    ) -> Self {
        let mutator = Arc::new(OrderMutator::new(store.clone(), audit));
        let engine = Arc::new(ApprovalEngine::new(store.clone(), flows, notifier));
        Self::new(store, mutator, engine, routes)
    }

    pub fn mutator(&self) -> &OrderMutator {
        &self.mutator
    }

    pub fn engine(&self) -> &ApprovalEngine {
        &self.engine
    }

    pub fn create_order(&self, actor: &Principal) -> Result<Order> {
        self.mutator.create(&actor.tenant_id, &actor.user_id)
    }

    pub fn load_order(&self, actor: &Principal, order_id: &str) -> Result<Order> {
        self.mutator.load(&actor.tenant_id, order_id)
    }

    /// Ask for `order_id` to move to `target`.
    ///
    /// Legality and the version are checked up front either way. Transitions
    /// that need sign-off come back as `AwaitingApproval`: the status is
    /// untouched but the order row now carries the request's hold, written with
    /// the same compare-and-swap as any status change.
    pub fn request_transition(
        &self,
        actor: &Principal,
        order_id: &str,
        target: OrderStatus,
        expected_version: u64,
    ) -> Result<TransitionOutcome> {
        let order = self.mutator.load(&actor.tenant_id, order_id)?;

        if !requires_approval(order.status, target) {
            let version = self.mutator.apply(
                order_id,
                &actor.tenant_id,
                target,
                expected_version,
                &actor.user_id,
            )?;
            return Ok(TransitionOutcome::Applied { version });
        }

        if order.version != expected_version {
            return Err(WorkflowError::VersionConflict {
                entity: ORDER_ENTITY,
                id: order_id.to_string(),
                expected: expected_version,
                found: Some(order.version),
            });
        }
        if !can_transition_to(order.status, target) {
            return Err(WorkflowError::InvalidTransition {
                from: order.status,
                to: target,
            });
        }

        let flow_id = self.routes.flow_for(order.status, target);
        let request = self.engine.create_request(
            &actor.tenant_id,
            flow_id,
            &actor.user_id,
            ORDER_ENTITY,
            order_id,
            None,
            None,
        )?;

        let intent = TransitionIntent {
            request_id: request.id.clone(),
            tenant_id: actor.tenant_id.clone(),
            order_id: order_id.to_string(),
            from: order.status,
            to: target,
            requested_by: actor.user_id.clone(),
        };
        if let Err(e) = self.store.save_intent(&intent) {
            self.abandon(&intent, "intent could not be stored");
            return Err(e);
        }

        let version = match self.mutator.hold(
            order_id,
            &actor.tenant_id,
            &request.id,
            expected_version,
        ) {
            Ok(version) => version,
            Err(e) => {
                self.abandon(&intent, "order moved before it could be held");
                return Err(e);
            }
        };

        tracing::info!(
            order_id,
            request_id = %request.id,
            from = %order.status,
            to = %target,
            version,
            "transition awaiting approval"
        );

        Ok(TransitionOutcome::AwaitingApproval { request, version })
    }

    // withdraw a request whose transition never got parked on the order
    fn abandon(&self, intent: &TransitionIntent, reason: &str) {
        let system = Principal::system(&intent.tenant_id);
        if let Err(e) = self.engine.withdraw(&intent.request_id, &system, Some(reason)) {
            tracing::error!(request_id = %intent.request_id, error = %e, "failed to withdraw abandoned request");
        }
        if let Err(e) = self.store.remove_intent(&intent.tenant_id, &intent.request_id) {
            tracing::warn!(request_id = %intent.request_id, error = %e, "failed to drop abandoned intent");
        }
    }

    /// Ask to put a suspended order back where it was before the suspension.
    pub fn resume(
        &self,
        actor: &Principal,
        order_id: &str,
        expected_version: u64,
    ) -> Result<TransitionOutcome> {
        let order = self.mutator.load(&actor.tenant_id, order_id)?;
        let target = match (order.status, order.previous_status) {
            (OrderStatus::Suspended, Some(previous)) => previous,
            _ => return Err(WorkflowError::NotSuspended(order_id.to_string())),
        };
        self.request_transition(actor, order_id, target, expected_version)
    }

    /// Record a decision on the current step and settle the parked transition
    /// once the request closes.
    ///
    /// `expected_version` pins the request version the decision was made
    /// against; `None` acts on whatever is current.
    pub fn decide(
        &self,
        request_id: &str,
        actor: &Principal,
        decision: Decision,
        comment: Option<&str>,
        expected_version: Option<u64>,
    ) -> Result<ApprovalOutcome> {
        let outcome = match decision {
            Decision::Approve => {
                self.engine
                    .approve(request_id, actor, comment, expected_version)?
            }
            Decision::Reject => {
                self.engine
                    .reject(request_id, actor, comment, expected_version)?
            }
        };
        if outcome.status != RequestStatus::Pending {
            self.settle(&actor.tenant_id, request_id, &actor.user_id)?;
        }
        Ok(outcome)
    }

    /// Approve the current step; on the final step the parked transition is applied.
    pub fn approve(
        &self,
        request_id: &str,
        actor: &Principal,
        comment: Option<&str>,
    ) -> Result<ApprovalOutcome> {
        self.decide(request_id, actor, Decision::Approve, comment, None)
    }

    /// Reject the request; the parked transition is discarded.
    pub fn reject(
        &self,
        request_id: &str,
        actor: &Principal,
        comment: Option<&str>,
    ) -> Result<ApprovalOutcome> {
        self.decide(request_id, actor, Decision::Reject, comment, None)
    }

    /// The requester pulls their request back; the order is released untouched.
    pub fn withdraw(
        &self,
        request_id: &str,
        actor: &Principal,
        reason: Option<&str>,
    ) -> Result<ApprovalRequest> {
        let request = self.engine.withdraw(request_id, actor, reason)?;
        self.settle(&actor.tenant_id, request_id, &actor.user_id)?;
        Ok(request)
    }

    /// Apply or discard the transition parked under a closed request.
    ///
    /// Safe to call repeatedly: returns the new order version the first time an
    /// approved transition lands and `None` once there is nothing left to do.
    /// An approved transition is only applied while the order is still in the
    /// status it was requested from.
    pub fn settle(&self, tenant_id: &str, request_id: &str, actor_id: &str) -> Result<Option<u64>> {
        let Some(intent) = self.store.load_intent(tenant_id, request_id)? else {
            return Ok(None);
        };

        let request = self.engine.load_request(tenant_id, request_id)?;
        match request.status {
            RequestStatus::Pending => return Ok(None),
            RequestStatus::Rejected | RequestStatus::Withdrawn => {
                retry_on_conflict(|| self.mutator.release(&intent.order_id, tenant_id, request_id))?;
                self.store.remove_intent(tenant_id, request_id)?;
                tracing::info!(
                    order_id = %intent.order_id,
                    request_id,
                    status = ?request.status,
                    "parked transition discarded"
                );
                return Ok(None);
            }
            RequestStatus::Approved => {}
        }

        let landed = retry_on_conflict(|| {
            self.mutator.complete(
                &intent.order_id,
                tenant_id,
                request_id,
                intent.from,
                intent.to,
                actor_id,
            )
        });

        match landed {
            Ok(version) => {
                self.store.remove_intent(tenant_id, request_id)?;
                Ok(Some(version))
            }
            Err(e @ WorkflowError::InvalidTransition { .. }) => {
                // the order left `from` while the request was open, nothing to apply
                tracing::error!(
                    order_id = %intent.order_id,
                    request_id,
                    from = %intent.from,
                    to = %intent.to,
                    error = %e,
                    "approved transition no longer applies"
                );
                retry_on_conflict(|| self.mutator.release(&intent.order_id, tenant_id, request_id))?;
                self.store.remove_intent(tenant_id, request_id)?;
                Err(e)
            }
            Err(e) => {
                tracing::error!(
                    order_id = %intent.order_id,
                    request_id,
                    error = %e,
                    "approved transition could not be applied"
                );
                Err(e)
            }
        }
    }
}

// order writes are validated against the row as it is now, so a lost race is retried
fn retry_on_conflict<T>(mut write: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match write() {
            Err(e) if e.is_conflict() && attempt < SETTLE_ATTEMPTS => continue,
            other => return other,
        }
    }
}
