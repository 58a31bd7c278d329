//! Order record and the timestamp type shared by every stored record
use crate::status::OrderStatus;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// `None` when the fields do not name a valid instant.
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn plus_minutes(&self, minutes: i64) -> Self {
        Self(self.0 + Duration::minutes(minutes))
    }
}

// Utc itself is not ordered, so the derive would not apply
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DateTime<Utc>> for TimeStamp<Utc> {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

// One sales order's position in the lifecycle. Only the mutator writes it.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Order {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub tenant_id: String,
    #[n(2)]
    pub status: OrderStatus,
    #[n(3)]
    pub version: u64,
    #[n(4)]
    pub previous_status: Option<OrderStatus>, // status held before suspension
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    #[n(6)]
    pub updated_at: TimeStamp<Utc>,
    #[n(7)]
    pub held_by: Option<String>, // approval request that owns the next status change
}

impl Order {
    pub fn new(id: String, tenant_id: String) -> Self {
        let now = TimeStamp::new();
        Self {
            id,
            tenant_id,
            status: OrderStatus::INITIAL,
            version: 0,
            previous_status: None,
            created_at: now.clone(),
            updated_at: now,
            held_by: None,
        }
    }

    /// The row as it looks after moving to `target`. Version and timestamp advance,
    /// the pre-suspension status is remembered or forgotten as needed and any
    /// approval hold is dropped.
    pub fn advanced_to(&self, target: OrderStatus, at: TimeStamp<Utc>) -> Self {
        let previous_status = match (self.status, target) {
            (OrderStatus::Suspended, _) => None,
            (from, OrderStatus::Suspended) => Some(from),
            _ => self.previous_status,
        };

        Self {
            status: target,
            version: self.version + 1,
            previous_status,
            updated_at: at,
            held_by: None,
            ..self.clone()
        }
    }

    /// The row with its hold set to `request_id` (or cleared). Status and
    /// `updated_at` stay put; only the version moves.
    pub fn with_hold(&self, request_id: Option<&str>) -> Self {
        Self {
            version: self.version + 1,
            held_by: request_id.map(str::to_string),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn timestamps_order_by_instant() {
        let earlier = TimeStamp::new_with(2024, 6, 15, 10, 30, 0).unwrap();
        let later = earlier.plus_minutes(1);

        assert!(earlier < later);
        assert_eq!(later.cmp(&earlier), Ordering::Greater);
        assert_eq!(TimeStamp::new_with(2024, 2, 30, 0, 0, 0), None);
    }

    #[test]
    fn holding_keeps_status_and_clock() {
        let order = Order::new("order_1".into(), "acme".into());
        let held = order.with_hold(Some("apr_1"));

        assert_eq!(held.status, order.status);
        assert_eq!(held.updated_at, order.updated_at);
        assert_eq!(held.version, 1);
        assert_eq!(held.held_by.as_deref(), Some("apr_1"));

        let moved = held.advanced_to(OrderStatus::PendingFollowUp, TimeStamp::new());
        assert_eq!(moved.held_by, None);
    }

    #[test]
    fn suspension_remembers_and_resume_forgets() {
        let order = Order::new("order_1".into(), "acme".into());
        let order = order.advanced_to(OrderStatus::PendingFollowUp, TimeStamp::new());
        let suspended = order.advanced_to(OrderStatus::Suspended, TimeStamp::new());

        assert_eq!(suspended.previous_status, Some(OrderStatus::PendingFollowUp));
        assert_eq!(suspended.version, 2);

        let resumed = suspended.advanced_to(OrderStatus::PendingFollowUp, TimeStamp::new());
        assert_eq!(resumed.previous_status, None);
        assert_eq!(resumed.version, 3);
    }
}
