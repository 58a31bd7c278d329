//! The order status catalog
//!
//! Every status an order can hold, the stage it belongs to, and the set of
//! statuses reachable from it in one hop. Each table below is an exhaustive
//! `match`, so adding a status without giving it a category and an outgoing
//! set does not compile.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cbor(index_only)]
pub enum StatusCategory {
    #[n(0)]
    Lead,
    #[n(1)]
    Order,
    #[n(2)]
    Finance,
    #[n(3)]
    Exception,
}

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cbor(index_only)]
pub enum OrderStatus {
    // lead stage
    #[n(0)]
    PendingAssignment,
    #[n(1)]
    PendingFollowUp,
    #[n(2)]
    FollowingUp,
    #[n(3)]
    DraftSigned,
    // measurement, production and installation
    #[n(4)]
    PendingMeasurement,
    #[n(5)]
    MeasuringPendingAssignment,
    #[n(6)]
    MeasuringAssigning,
    #[n(7)]
    MeasuringPendingVisit,
    #[n(8)]
    MeasuringPendingConfirmation,
    #[n(9)]
    PlanPendingConfirmation,
    #[n(10)]
    PendingPush,
    #[n(11)]
    PendingOrder,
    #[n(12)]
    InProduction,
    #[n(13)]
    StockPrepared,
    #[n(14)]
    PendingShipment,
    #[n(15)]
    Shipped,
    #[n(16)]
    InstallingPendingAssignment,
    #[n(17)]
    InstallingAssigning,
    #[n(18)]
    InstallingPendingVisit,
    #[n(19)]
    InstallingPendingConfirmation,
    #[n(20)]
    Delivered,
    // finance
    #[n(21)]
    PendingReconciliation,
    #[n(22)]
    PendingInvoice,
    #[n(23)]
    PendingPayment,
    #[n(24)]
    Completed,
    // exceptions
    #[n(25)]
    Suspended,
    #[n(26)]
    Cancelled,
    #[n(27)]
    Expired,
    #[n(28)]
    Exception,
}

/// Read-only view of one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMetadata {
    pub status: OrderStatus,
    pub name: &'static str,
    pub description: &'static str,
    pub category: StatusCategory,
    pub sort_order: u8,
    pub next_statuses: &'static [OrderStatus],
}

use OrderStatus::*;

// Where a suspended order may be resumed to. COMPLETED and EXPIRED are never
// entered from a suspension.
const RESUME_TARGETS: &[OrderStatus] = &[
    PendingAssignment,
    PendingFollowUp,
    FollowingUp,
    DraftSigned,
    PendingMeasurement,
    MeasuringPendingAssignment,
    MeasuringAssigning,
    MeasuringPendingVisit,
    MeasuringPendingConfirmation,
    PlanPendingConfirmation,
    PendingPush,
    PendingOrder,
    InProduction,
    StockPrepared,
    PendingShipment,
    Shipped,
    InstallingPendingAssignment,
    InstallingAssigning,
    InstallingPendingVisit,
    InstallingPendingConfirmation,
    Delivered,
    PendingReconciliation,
    PendingInvoice,
    PendingPayment,
    Cancelled,
];

impl OrderStatus {
    pub const COUNT: usize = 29;

    /// All statuses in catalog order.
    pub const ALL: [OrderStatus; Self::COUNT] = [
        PendingAssignment,
        PendingFollowUp,
        FollowingUp,
        DraftSigned,
        PendingMeasurement,
        MeasuringPendingAssignment,
        MeasuringAssigning,
        MeasuringPendingVisit,
        MeasuringPendingConfirmation,
        PlanPendingConfirmation,
        PendingPush,
        PendingOrder,
        InProduction,
        StockPrepared,
        PendingShipment,
        Shipped,
        InstallingPendingAssignment,
        InstallingAssigning,
        InstallingPendingVisit,
        InstallingPendingConfirmation,
        Delivered,
        PendingReconciliation,
        PendingInvoice,
        PendingPayment,
        Completed,
        Suspended,
        Cancelled,
        Expired,
        Exception,
    ];

    /// Status every new order starts in.
    pub const INITIAL: OrderStatus = PendingAssignment;

    /// Position in [`OrderStatus::ALL`], used as the graph index.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn category(self) -> StatusCategory {
        match self {
            PendingAssignment | PendingFollowUp | FollowingUp | DraftSigned => StatusCategory::Lead,
            PendingMeasurement
            | MeasuringPendingAssignment
            | MeasuringAssigning
            | MeasuringPendingVisit
            | MeasuringPendingConfirmation
            | PlanPendingConfirmation
            | PendingPush
            | PendingOrder
            | InProduction
            | StockPrepared
            | PendingShipment
            | Shipped
            | InstallingPendingAssignment
            | InstallingAssigning
            | InstallingPendingVisit
            | InstallingPendingConfirmation
            | Delivered => StatusCategory::Order,
            PendingReconciliation | PendingInvoice | PendingPayment | Completed => {
                StatusCategory::Finance
            }
            Suspended | Cancelled | Expired | Exception => StatusCategory::Exception,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Completed | Cancelled | Expired)
    }

    /// Statuses reachable in a single hop, in the order path search visits them.
    pub fn next_statuses(self) -> &'static [OrderStatus] {
        match self {
            PendingAssignment => &[PendingFollowUp, Cancelled, Expired, Suspended],
            PendingFollowUp => &[FollowingUp, Cancelled, Expired, Suspended],
            FollowingUp => &[DraftSigned, Cancelled, Expired, Suspended],
            DraftSigned => &[PendingMeasurement, Cancelled, Expired, Suspended],
            PendingMeasurement => &[MeasuringPendingAssignment, Cancelled, Suspended],
            MeasuringPendingAssignment => &[MeasuringAssigning, Cancelled, Suspended],
            MeasuringAssigning => &[
                MeasuringPendingVisit,
                MeasuringPendingAssignment,
                Cancelled,
                Suspended,
            ],
            MeasuringPendingVisit => &[MeasuringPendingConfirmation, Cancelled, Suspended],
            MeasuringPendingConfirmation => &[
                PlanPendingConfirmation,
                MeasuringPendingAssignment,
                Cancelled,
                Suspended,
            ],
            PlanPendingConfirmation => &[
                PendingPush,
                MeasuringPendingConfirmation,
                Cancelled,
                Suspended,
            ],
            PendingPush => &[PendingOrder, Cancelled, Suspended],
            PendingOrder => &[InProduction, Cancelled, Suspended],
            InProduction => &[StockPrepared, Cancelled, Suspended, Exception],
            StockPrepared => &[PendingShipment, Cancelled, Suspended, Exception],
            PendingShipment => &[Shipped, Cancelled, Suspended, Exception],
            Shipped => &[InstallingPendingAssignment, Cancelled, Suspended],
            InstallingPendingAssignment => &[InstallingAssigning, Cancelled, Suspended],
            InstallingAssigning => &[
                InstallingPendingVisit,
                InstallingPendingAssignment,
                Cancelled,
                Suspended,
            ],
            InstallingPendingVisit => &[InstallingPendingConfirmation, Cancelled, Suspended],
            InstallingPendingConfirmation => &[
                Delivered,
                InstallingPendingVisit,
                Cancelled,
                Suspended,
            ],
            Delivered => &[PendingReconciliation, Cancelled, Suspended],
            PendingReconciliation => &[PendingInvoice, Cancelled, Suspended],
            PendingInvoice => &[PendingPayment, Cancelled, Suspended],
            PendingPayment => &[Completed, Cancelled, Suspended],
            Completed => &[],
            Suspended => RESUME_TARGETS,
            Cancelled => &[],
            Expired => &[],
            Exception => &[FollowingUp, Cancelled, Suspended],
        }
    }

    /// Display label and description.
    fn labels(self) -> (&'static str, &'static str) {
        match self {
            PendingAssignment => ("Pending assignment", "Lead waiting for a sales owner"),
            PendingFollowUp => ("Pending follow-up", "Assigned, waiting for first contact"),
            FollowingUp => ("Following up", "Sales is working the lead"),
            DraftSigned => ("Draft signed", "Draft agreement signed, ready for order stage"),
            PendingMeasurement => ("Pending measurement", "Waiting to schedule a site survey"),
            MeasuringPendingAssignment => (
                "Measuring - pending assignment",
                "Waiting for a surveyor to be assigned",
            ),
            MeasuringAssigning => ("Measuring - assigning", "Surveyor assignment in progress"),
            MeasuringPendingVisit => ("Measuring - pending visit", "Surveyor scheduled to visit"),
            MeasuringPendingConfirmation => (
                "Measuring - pending confirmation",
                "Survey done, waiting for sales confirmation",
            ),
            PlanPendingConfirmation => ("Plan pending confirmation", "Plan waiting for customer sign-off"),
            PendingPush => ("Pending push", "Plan confirmed, waiting to push to the supplier"),
            PendingOrder => ("Pending order", "Purchase requirements confirmed, waiting to order"),
            InProduction => ("In production", "Production orders placed"),
            StockPrepared => ("Stock prepared", "All production orders stocked"),
            PendingShipment => ("Pending shipment", "Stock ready, waiting to ship"),
            Shipped => ("Shipped", "Goods dispatched"),
            InstallingPendingAssignment => (
                "Installing - pending assignment",
                "Waiting for an installer to be assigned",
            ),
            InstallingAssigning => ("Installing - assigning", "Installer assignment in progress"),
            InstallingPendingVisit => ("Installing - pending visit", "Installer scheduled to visit"),
            InstallingPendingConfirmation => (
                "Installing - pending confirmation",
                "Install done, waiting for final confirmation",
            ),
            Delivered => ("Delivered", "Installation confirmed and handed over"),
            PendingReconciliation => ("Pending reconciliation", "Waiting for account reconciliation"),
            PendingInvoice => ("Pending invoice", "Waiting for finance to issue the invoice"),
            PendingPayment => ("Pending payment", "Invoice issued, waiting for payment"),
            Completed => ("Completed", "Paid in full, order closed"),
            Suspended => ("Suspended", "Work on the order is halted"),
            Cancelled => ("Cancelled", "Order cancelled"),
            Expired => ("Expired", "Lead lapsed without conversion"),
            Exception => ("Exception", "Operational anomaly needs handling"),
        }
    }

    pub fn name(self) -> &'static str {
        self.labels().0
    }

    pub fn metadata(self) -> StatusMetadata {
        let (name, description) = self.labels();
        StatusMetadata {
            status: self,
            name,
            description,
            category: self.category(),
            sort_order: self.index() as u8 + 1,
            next_statuses: self.next_statuses(),
        }
    }

    /// Stable code used in configuration, logs and audit diffs.
    pub fn code(self) -> &'static str {
        match self {
            PendingAssignment => "PENDING_ASSIGNMENT",
            PendingFollowUp => "PENDING_FOLLOW_UP",
            FollowingUp => "FOLLOWING_UP",
            DraftSigned => "DRAFT_SIGNED",
            PendingMeasurement => "PENDING_MEASUREMENT",
            MeasuringPendingAssignment => "MEASURING_PENDING_ASSIGNMENT",
            MeasuringAssigning => "MEASURING_ASSIGNING",
            MeasuringPendingVisit => "MEASURING_PENDING_VISIT",
            MeasuringPendingConfirmation => "MEASURING_PENDING_CONFIRMATION",
            PlanPendingConfirmation => "PLAN_PENDING_CONFIRMATION",
            PendingPush => "PENDING_PUSH",
            PendingOrder => "PENDING_ORDER",
            InProduction => "IN_PRODUCTION",
            StockPrepared => "STOCK_PREPARED",
            PendingShipment => "PENDING_SHIPMENT",
            Shipped => "SHIPPED",
            InstallingPendingAssignment => "INSTALLING_PENDING_ASSIGNMENT",
            InstallingAssigning => "INSTALLING_ASSIGNING",
            InstallingPendingVisit => "INSTALLING_PENDING_VISIT",
            InstallingPendingConfirmation => "INSTALLING_PENDING_CONFIRMATION",
            Delivered => "DELIVERED",
            PendingReconciliation => "PENDING_RECONCILIATION",
            PendingInvoice => "PENDING_INVOICE",
            PendingPayment => "PENDING_PAYMENT",
            Completed => "COMPLETED",
            Suspended => "SUSPENDED",
            Cancelled => "CANCELLED",
            Expired => "EXPIRED",
            Exception => "EXCEPTION",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown order status code: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
