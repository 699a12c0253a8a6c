use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SeatingError;

pub const MAX_SEAT_UID_LEN: usize = 32;
pub const MAX_SESSION_ID_LEN: usize = 128;

/// A seat inside one event's seating map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeatKey {
    pub event_seating_id: i64,
    pub seat_uid: String,
}

impl SeatKey {
    pub fn new(event_seating_id: i64, seat_uid: impl Into<String>) -> Self {
        Self {
            event_seating_id,
            seat_uid: seat_uid.into(),
        }
    }

    /// Builds a key from client input, rejecting empty or oversized uids.
    pub fn parse(event_seating_id: i64, seat_uid: &str) -> Result<Self, SeatingError> {
        let uid = seat_uid.trim();
        if uid.is_empty() {
            return Err(SeatingError::Validation("seat uid must not be empty".into()));
        }
        if uid.len() > MAX_SEAT_UID_LEN {
            return Err(SeatingError::Validation(format!(
                "seat uid longer than {} characters",
                MAX_SEAT_UID_LEN
            )));
        }
        Ok(Self::new(event_seating_id, uid))
    }
}

impl fmt::Display for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.event_seating_id, self.seat_uid)
    }
}

impl FromStr for SeatKey {
    type Err = SeatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (event, uid) = s
            .split_once(':')
            .ok_or_else(|| SeatingError::Validation(format!("malformed seat key: {}", s)))?;
        let event_seating_id = event
            .parse::<i64>()
            .map_err(|_| SeatingError::Validation(format!("malformed seat key: {}", s)))?;
        SeatKey::parse(event_seating_id, uid)
    }
}

/// Client session identifier bound from cookie or header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self, SeatingError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > MAX_SESSION_ID_LEN {
            return Err(SeatingError::Validation("invalid session id length".into()));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SeatingError::Validation("invalid characters in session id".into()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    Held,
    Confirmed,
    Released,
    Expired,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Held => "held",
            HoldStatus::Confirmed => "confirmed",
            HoldStatus::Released => "released",
            HoldStatus::Expired => "expired",
        }
    }
}

impl FromStr for HoldStatus {
    type Err = SeatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "held" => Ok(HoldStatus::Held),
            "confirmed" => Ok(HoldStatus::Confirmed),
            "released" => Ok(HoldStatus::Released),
            "expired" => Ok(HoldStatus::Expired),
            other => Err(SeatingError::Store(format!("unknown hold status: {}", other))),
        }
    }
}

/// Temporary claim on one seat by one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatHold {
    pub seat: SeatKey,
    pub session_id: SessionId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: HoldStatus,
}

impl SeatHold {
    pub fn new(seat: SeatKey, session_id: SessionId, acquired_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            seat,
            session_id,
            acquired_at,
            expires_at: acquired_at + ttl,
            status: HoldStatus::Held,
        }
    }

    /// A live hold blocks the seat for every other session.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            HoldStatus::Confirmed => true,
            HoldStatus::Held => now < self.expires_at,
            HoldStatus::Released | HoldStatus::Expired => false,
        }
    }

    pub fn is_owned_by(&self, session: &SessionId) -> bool {
        &self.session_id == session
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        if self.status != HoldStatus::Held || now >= self.expires_at {
            Duration::zero()
        } else {
            self.expires_at - now
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingStrategyKind {
    TimeBased,
    Velocity,
    Threshold,
    Custom,
}

impl PricingStrategyKind {
    pub const ALL: [PricingStrategyKind; 4] = [
        PricingStrategyKind::TimeBased,
        PricingStrategyKind::Velocity,
        PricingStrategyKind::Threshold,
        PricingStrategyKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PricingStrategyKind::TimeBased => "time_based",
            PricingStrategyKind::Velocity => "velocity",
            PricingStrategyKind::Threshold => "threshold",
            PricingStrategyKind::Custom => "custom",
        }
    }
}

impl FromStr for PricingStrategyKind {
    type Err = SeatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PricingStrategyKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| SeatingError::Validation(format!("unknown pricing strategy: {}", s)))
    }
}

/// Where a quote's price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "strategy")]
pub enum PriceSource {
    Strategy(PricingStrategyKind),
    Override,
}

/// Price of a seat at one point in time. Superseded, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub seat: SeatKey,
    pub source: PriceSource,
    pub price_cents: i64,
    pub previous_cents: Option<i64>,
    pub floor_cents: Option<i64>,
    pub ceiling_cents: Option<i64>,
    pub computed_at: DateTime<Utc>,
    #[serde(default)]
    pub from_fallback: bool,
}

impl PriceQuote {
    pub fn as_fallback(&self) -> Self {
        Self {
            from_fallback: true,
            ..self.clone()
        }
    }
}
