use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain event channels consumed by analytics and webhooks downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "seats.held")]
    SeatsHeld,
    #[serde(rename = "seats.released")]
    SeatsReleased,
    #[serde(rename = "seats.sold")]
    SeatsSold,
    #[serde(rename = "seats.expired")]
    SeatsExpired,
    #[serde(rename = "seats.blocked")]
    SeatsBlocked,
    #[serde(rename = "seats.unblocked")]
    SeatsUnblocked,
    #[serde(rename = "dp.price.updated")]
    PriceUpdated,
    #[serde(rename = "dp.override.applied")]
    OverrideApplied,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::SeatsHeld => "seats.held",
            Topic::SeatsReleased => "seats.released",
            Topic::SeatsSold => "seats.sold",
            Topic::SeatsExpired => "seats.expired",
            Topic::SeatsBlocked => "seats.blocked",
            Topic::SeatsUnblocked => "seats.unblocked",
            Topic::PriceUpdated => "dp.price.updated",
            Topic::OverrideApplied => "dp.override.applied",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatingEvent {
    pub topic: Topic,
    pub event_seating_id: i64,
    pub seat_uids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Hold deadline, set on `seats.held`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

impl SeatingEvent {
    pub fn new(topic: Topic, event_seating_id: i64, seat_uids: Vec<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            topic,
            event_seating_id,
            seat_uids,
            session_id: None,
            price_cents: None,
            reason: None,
            expires_at: None,
            occurred_at,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_price(mut self, price_cents: i64) -> Self {
        self.price_cents = Some(price_cents);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Partition key: all events of one seating map land on the same partition.
    pub fn key(&self) -> String {
        self.event_seating_id.to_string()
    }
}
