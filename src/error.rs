use crate::status::OrderStatus;

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("Transition {from} -> {to} is not allowed")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Version conflict on {entity} {id}: expected {expected}, found {found:?}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
        // None when the compare-and-swap lost without a readable winner
        found: Option<u64>,
    },
    #[error("Order {0} not found")]
    OrderNotFound(String),
    #[error("Approval request {0} not found")]
    RequestNotFound(String),
    #[error("Approval flow {0} not found")]
    FlowNotFound(String),
    #[error("Approval flow {flow_id} is misconfigured: {reason}")]
    FlowConfigurationError { flow_id: String, reason: String },
    #[error("Approval request {0} is already closed")]
    RequestClosed(String),
    #[error("Order {order_id} has an open approval request {request_id}")]
    ApprovalInFlight { order_id: String, request_id: String },
    #[error("{entity_type} {entity_id} already has an open approval request {request_id}")]
    ApprovalAlreadyOpen {
        entity_type: String,
        entity_id: String,
        request_id: String,
    },
    #[error("User {actor_id} may not act on step {step_order}, requires role {role}")]
    Unauthorized {
        actor_id: String,
        step_order: u32,
        role: String,
    },
    #[error("User {actor_id} did not raise approval request {request_id}")]
    NotRequester { actor_id: String, request_id: String },
    #[error("Order {0} is not suspended")]
    NotSuspended(String),
    #[error("Failed to generate identifier: {0}")]
    Identifier(String),
    #[error(transparent)]
    Storage(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encode(String),
    #[error(transparent)]
    Decode(#[from] minicbor::decode::Error),
}

impl WorkflowError {
    /// Conflicts are expected under contention; everything else is a hard failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WorkflowError::VersionConflict { .. })
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for WorkflowError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        WorkflowError::Encode(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
