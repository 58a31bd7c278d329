//! Single-row status changes under optimistic concurrency
use crate::error::{Result, WorkflowError};
use crate::graph::can_transition_to;
use crate::order::{Order, TimeStamp};
use crate::sinks::{AuditEvent, AuditSink};
use crate::status::OrderStatus;
use crate::store::{Store, Versioned};
use crate::utils::{ORDER_PREFIX, new_id};
use std::sync::Arc;

/// Entity type under which approval requests reference orders.
pub const ORDER_ENTITY: &str = "order";

pub struct OrderMutator {
    store: Store,
    audit: Arc<dyn AuditSink>,
}

impl OrderMutator {
    pub fn new(store: Store, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Create a new order in the first lead status at version 0.
    pub fn create(&self, tenant_id: &str, actor_id: &str) -> Result<Order> {
        let order = Order::new(new_id(ORDER_PREFIX)?, tenant_id.to_string());

        if !self.store.insert_order(&order)? {
            return Err(WorkflowError::VersionConflict {
                entity: ORDER_ENTITY,
                id: order.id,
                expected: 0,
                found: None,
            });
        }

        tracing::info!(order_id = %order.id, tenant_id, actor_id, "order created");
        self.emit(AuditEvent {
            entity: ORDER_ENTITY.into(),
            entity_id: order.id.clone(),
            action: "created".into(),
            actor_id: actor_id.into(),
            diff: format!("-> {}", order.status),
            timestamp: order.created_at.clone(),
        });

        Ok(order)
    }

    pub fn load(&self, tenant_id: &str, order_id: &str) -> Result<Order> {
        Ok(self.load_versioned(tenant_id, order_id)?.value)
    }

    fn load_versioned(&self, tenant_id: &str, order_id: &str) -> Result<Versioned<Order>> {
        self.store
            .load_order(tenant_id, order_id)?
            .ok_or_else(|| WorkflowError::OrderNotFound(order_id.to_string()))
    }

    /// Id of the pending approval request that currently holds this order, if any.
    pub fn open_request(&self, tenant_id: &str, order_id: &str) -> Result<Option<String>> {
        let order = self.load(tenant_id, order_id)?;
        self.live_hold(&order)
    }

    // a hold outlives its request when a resolution was interrupted; those don't count
    fn live_hold(&self, order: &Order) -> Result<Option<String>> {
        let Some(request_id) = order.held_by.clone() else {
            return Ok(None);
        };
        let pending = self
            .store
            .load_request(&order.tenant_id, &request_id)?
            .is_some_and(|r| r.value.is_pending());

        Ok(pending.then_some(request_id))
    }

    /// Move one order to `target`, provided nobody has written it since `expected_version`.
    ///
    /// The write is a compare-and-swap on the row that was validated, so a
    /// concurrent writer makes this call fail with `VersionConflict` instead of
    /// being overwritten. Returns the new version.
    pub fn apply(
        &self,
        order_id: &str,
        tenant_id: &str,
        target: OrderStatus,
        expected_version: u64,
        actor_id: &str,
    ) -> Result<u64> {
        let current = self.load_versioned(tenant_id, order_id)?;
        let from = current.value.status;

        check_version(&current.value, expected_version)?;

        if !can_transition_to(from, target) {
            return Err(WorkflowError::InvalidTransition { from, to: target });
        }

        if let Some(request_id) = self.live_hold(&current.value)? {
            return Err(WorkflowError::ApprovalInFlight {
                order_id: order_id.to_string(),
                request_id,
            });
        }

        self.advance(&current, target, actor_id)
    }

    /// Mark the order as owned by `request_id`. From here until the hold is
    /// released direct writes fail with `ApprovalInFlight`. Returns the new version.
    pub fn hold(
        &self,
        order_id: &str,
        tenant_id: &str,
        request_id: &str,
        expected_version: u64,
    ) -> Result<u64> {
        let current = self.load_versioned(tenant_id, order_id)?;
        check_version(&current.value, expected_version)?;

        if let Some(holder) = self.live_hold(&current.value)? {
            if holder != request_id {
                return Err(WorkflowError::ApprovalInFlight {
                    order_id: order_id.to_string(),
                    request_id: holder,
                });
            }
        }

        let next = current.value.with_hold(Some(request_id));
        self.swap(&current, &next)?;
        tracing::debug!(order_id, request_id, version = next.version, "order held for approval");
        Ok(next.version)
    }

    /// Drop the hold of `request_id`, if it still has one. Returns the new version
    /// when something was written.
    pub fn release(&self, order_id: &str, tenant_id: &str, request_id: &str) -> Result<Option<u64>> {
        let current = self.load_versioned(tenant_id, order_id)?;
        if current.value.held_by.as_deref() != Some(request_id) {
            return Ok(None);
        }

        let next = current.value.with_hold(None);
        self.swap(&current, &next)?;
        tracing::debug!(order_id, request_id, version = next.version, "order hold released");
        Ok(Some(next.version))
    }

    /// Land the transition `from -> to` approved under `request_id`.
    ///
    /// The order must still be in `from`; an order that already sits in `to`
    /// with the hold gone means an earlier call landed it and its version is
    /// returned unchanged.
    pub fn complete(
        &self,
        order_id: &str,
        tenant_id: &str,
        request_id: &str,
        from: OrderStatus,
        to: OrderStatus,
        actor_id: &str,
    ) -> Result<u64> {
        let current = self.load_versioned(tenant_id, order_id)?;
        let order = &current.value;
        let held_here = order.held_by.as_deref() == Some(request_id);

        if !held_here && order.status == to {
            return Ok(order.version);
        }
        if order.status != from || !can_transition_to(from, to) {
            return Err(WorkflowError::InvalidTransition {
                from: order.status,
                to,
            });
        }
        if !held_here {
            if let Some(holder) = self.live_hold(order)? {
                return Err(WorkflowError::ApprovalInFlight {
                    order_id: order_id.to_string(),
                    request_id: holder,
                });
            }
        }

        self.advance(&current, to, actor_id)
    }

    fn advance(&self, current: &Versioned<Order>, target: OrderStatus, actor_id: &str) -> Result<u64> {
        let from = current.value.status;
        let now = TimeStamp::new();
        let next = current.value.advanced_to(target, now.clone());
        self.swap(current, &next)?;

        tracing::info!(
            order_id = %next.id,
            tenant_id = %next.tenant_id,
            actor_id,
            %from,
            to = %target,
            version = next.version,
            "order status changed"
        );

        self.emit(AuditEvent {
            entity: ORDER_ENTITY.into(),
            entity_id: next.id.clone(),
            action: "status_changed".into(),
            actor_id: actor_id.to_string(),
            diff: format!("{from} -> {target}"),
            timestamp: now,
        });

        Ok(next.version)
    }

    fn swap(&self, current: &Versioned<Order>, next: &Order) -> Result<()> {
        if self.store.swap_order(&current.raw, next)? {
            return Ok(());
        }

        let found = self
            .store
            .load_order(&next.tenant_id, &next.id)?
            .map(|o| o.value.version);
        tracing::warn!(
            order_id = %next.id,
            expected_version = current.value.version,
            ?found,
            "lost order write race"
        );
        Err(WorkflowError::VersionConflict {
            entity: ORDER_ENTITY,
            id: next.id.clone(),
            expected: current.value.version,
            found,
        })
    }

    // the status change is already committed, a lost audit entry only gets logged
    fn emit(&self, event: AuditEvent) {
        let entity_id = event.entity_id.clone();
        if let Err(e) = self.audit.record(event) {
            tracing::warn!(order_id = %entity_id, error = %e, "audit delivery failed");
        }
    }
}

fn check_version(order: &Order, expected_version: u64) -> Result<()> {
    if order.version == expected_version {
        return Ok(());
    }
    tracing::warn!(
        order_id = %order.id,
        expected_version,
        found = order.version,
        "stale order version"
    );
    Err(WorkflowError::VersionConflict {
        entity: ORDER_ENTITY,
        id: order.id.clone(),
        expected: expected_version,
        found: Some(order.version),
    })
}
