use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use std::collections::HashMap;
use tracing::{debug, info};

use seating_core::{
    AcquireOutcome, ConfirmOutcome, HoldStatus, HoldStore, RateLimitStore, ReleaseOutcome, SeatHold,
    SeatKey, SeatState, SeatingError, SeatingResult, SessionId,
};

use crate::keys;

// Seat records are hashes {session, status, acquired_at, expires_at} with the
// timestamps in epoch milliseconds. Held records expire natively at
// `expires_at`; confirmed records are persisted.

const ACQUIRE_SCRIPT: &str = r#"
local now = tonumber(ARGV[5])
local sid = ARGV[2]

local reason = redis.call('HGET', KEYS[3], ARGV[8])
if reason then
    return {'blocked', reason}
end

for _, member in ipairs(redis.call('SMEMBERS', KEYS[2])) do
    local h = redis.call('HMGET', ARGV[9] .. ':seat:' .. member, 'session', 'status', 'expires_at')
    if h[1] ~= sid or h[2] ~= 'held' or tonumber(h[3]) <= now then
        redis.call('SREM', KEYS[2], member)
    end
end

local cur = redis.call('HMGET', KEYS[1], 'session', 'status', 'acquired_at', 'expires_at')
if cur[1] then
    if cur[2] == 'confirmed' then
        return {'sold'}
    end
    if cur[2] == 'held' and tonumber(cur[4]) > now then
        if cur[1] == sid then
            return {'owned', cur[3], cur[4]}
        end
        return {'contended', cur[1]}
    end
end

local count = redis.call('SCARD', KEYS[2])
if count >= tonumber(ARGV[6]) then
    return {'full', tostring(count)}
end

redis.call('DEL', KEYS[1])
redis.call('HSET', KEYS[1], 'session', sid, 'status', 'held', 'acquired_at', ARGV[3], 'expires_at', ARGV[4])
redis.call('PEXPIREAT', KEYS[1], ARGV[4])
redis.call('SADD', KEYS[2], ARGV[1])
redis.call('PEXPIRE', KEYS[2], ARGV[7])
return {'acquired'}
"#;

const RELEASE_SCRIPT: &str = r#"
local cur = redis.call('HMGET', KEYS[1], 'session', 'status', 'acquired_at', 'expires_at')
local live = cur[2] == 'confirmed' or (cur[2] == 'held' and tonumber(cur[4]) > tonumber(ARGV[3]))
if not cur[1] or not live then
    redis.call('SREM', KEYS[2], ARGV[1])
    return {'not_found'}
end
if cur[1] ~= ARGV[2] then
    return {'not_owner', cur[1]}
end
if cur[2] == 'confirmed' then
    return {'confirmed'}
end
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[2], ARGV[1])
return {'released', cur[3], cur[4]}
"#;

const CONFIRM_SCRIPT: &str = r#"
local cur = redis.call('HMGET', KEYS[1], 'session', 'status', 'acquired_at', 'expires_at')
if not cur[1] then
    return {'not_found'}
end
local live = cur[2] == 'confirmed' or (cur[2] == 'held' and tonumber(cur[4]) > tonumber(ARGV[3]))
if cur[1] ~= ARGV[2] then
    if live then
        return {'not_owner', cur[1]}
    end
    return {'not_found'}
end
if cur[2] == 'confirmed' then
    return {'already', cur[3], cur[4]}
end
redis.call('SREM', KEYS[2], ARGV[1])
if not live then
    return {'expired'}
end
redis.call('HSET', KEYS[1], 'status', 'confirmed')
redis.call('PERSIST', KEYS[1])
return {'confirmed', cur[3], cur[4]}
"#;

const BLOCK_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local blocked = {}
for i = 4, #ARGV do
    local uid = ARGV[i]
    local h = redis.call('HMGET', ARGV[3] .. ':' .. uid, 'status', 'expires_at')
    local live = h[1] == 'confirmed' or (h[1] == 'held' and tonumber(h[2]) > now)
    if not live and redis.call('HSETNX', KEYS[1], uid, ARGV[2]) == 1 then
        table.insert(blocked, uid)
    end
end
return blocked
"#;

/// Hold store backed by Redis. Seat expiry is native (`PEXPIREAT`), so the
/// sweep job has nothing to do against this backend.
#[derive(Clone)]
pub struct RedisHoldStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisHoldStore {
    pub async fn connect(connection_string: &str, prefix: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(prefix, "Connected to Redis hold store");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    pub fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    fn map_err(e: redis::RedisError) -> SeatingError {
        SeatingError::Store(format!("Redis error: {}", e))
    }

    fn seat_member(seat: &SeatKey) -> String {
        seat.to_string()
    }

    async fn read_hold(&self, seat: &SeatKey) -> RedisResult<Option<HashMap<String, String>>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(keys::seat(&self.prefix, seat)).await?;
        Ok(if fields.is_empty() { None } else { Some(fields) })
    }
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn parse_millis(raw: &str) -> SeatingResult<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| SeatingError::Store(format!("invalid timestamp in hold record: {}", raw)))
}

fn parse_session(raw: &str) -> SeatingResult<SessionId> {
    SessionId::parse(raw).map_err(|_| SeatingError::Store(format!("invalid session in hold record: {}", raw)))
}

fn hold_from_fields(seat: &SeatKey, fields: &HashMap<String, String>) -> SeatingResult<SeatHold> {
    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| SeatingError::Store(format!("hold record {} missing field {}", seat, name)))
    };

    Ok(SeatHold {
        seat: seat.clone(),
        session_id: parse_session(field("session")?)?,
        acquired_at: parse_millis(field("acquired_at")?)?,
        expires_at: parse_millis(field("expires_at")?)?,
        status: field("status")?.parse()?,
    })
}

/// Rebuilds a hold from a script reply of the form `[tag, acquired_at, expires_at]`.
fn hold_from_reply(
    seat: &SeatKey,
    session: &SessionId,
    reply: &[String],
    status: HoldStatus,
) -> SeatingResult<SeatHold> {
    match (reply.get(1), reply.get(2)) {
        (Some(acquired), Some(expires)) => Ok(SeatHold {
            seat: seat.clone(),
            session_id: session.clone(),
            acquired_at: parse_millis(acquired)?,
            expires_at: parse_millis(expires)?,
            status,
        }),
        _ => Err(SeatingError::Store(format!("short script reply for {}", seat))),
    }
}

fn reply_tag(reply: &[String]) -> &str {
    reply.first().map(String::as_str).unwrap_or("")
}

#[async_trait]
impl HoldStore for RedisHoldStore {
    async fn acquire(
        &self,
        hold: &SeatHold,
        max_per_session: usize,
        session_ttl: Duration,
        now: DateTime<Utc>,
    ) -> SeatingResult<AcquireOutcome> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = redis::Script::new(ACQUIRE_SCRIPT)
            .key(keys::seat(&self.prefix, &hold.seat))
            .key(keys::session(&self.prefix, &hold.session_id))
            .key(keys::blocked(&self.prefix, hold.seat.event_seating_id))
            .arg(Self::seat_member(&hold.seat))
            .arg(hold.session_id.as_str())
            .arg(millis(hold.acquired_at))
            .arg(millis(hold.expires_at))
            .arg(millis(now))
            .arg(max_per_session)
            .arg(session_ttl.num_milliseconds())
            .arg(&hold.seat.seat_uid)
            .arg(&self.prefix)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        match reply_tag(&reply) {
            "acquired" => {
                debug!(seat = %hold.seat, session = %hold.session_id, "Seat hold written");
                Ok(AcquireOutcome::Acquired(hold.clone()))
            }
            "owned" => Ok(AcquireOutcome::AlreadyOwned(hold_from_reply(
                &hold.seat,
                &hold.session_id,
                &reply,
                HoldStatus::Held,
            )?)),
            "contended" => {
                let owner = reply.get(1).map(String::as_str).unwrap_or_default();
                Ok(AcquireOutcome::Contended {
                    owner: parse_session(owner)?,
                })
            }
            "sold" => Ok(AcquireOutcome::Sold),
            "full" => {
                let count = reply.get(1).and_then(|c| c.parse().ok()).unwrap_or(max_per_session);
                Ok(AcquireOutcome::SessionFull { count })
            }
            "blocked" => Ok(AcquireOutcome::Blocked {
                reason: reply.get(1).cloned().unwrap_or_default(),
            }),
            other => Err(SeatingError::Store(format!("unexpected acquire reply: {}", other))),
        }
    }

    async fn get(&self, seat: &SeatKey) -> SeatingResult<Option<SeatHold>> {
        match self.read_hold(seat).await.map_err(Self::map_err)? {
            Some(fields) => Ok(Some(hold_from_fields(seat, &fields)?)),
            None => Ok(None),
        }
    }

    async fn seat_state(&self, seat: &SeatKey, now: DateTime<Utc>) -> SeatingResult<SeatState> {
        let mut conn = self.conn.clone();
        let reason: Option<String> = conn
            .hget(keys::blocked(&self.prefix, seat.event_seating_id), &seat.seat_uid)
            .await
            .map_err(Self::map_err)?;
        if let Some(reason) = reason {
            return Ok(SeatState::Blocked { reason });
        }

        Ok(match self.get(seat).await? {
            Some(h) if h.is_live(now) && h.status == HoldStatus::Confirmed => SeatState::Sold(h),
            Some(h) if h.is_live(now) => SeatState::Held(h),
            _ => SeatState::Free,
        })
    }

    async fn release(
        &self,
        seat: &SeatKey,
        session: &SessionId,
        now: DateTime<Utc>,
    ) -> SeatingResult<ReleaseOutcome> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = redis::Script::new(RELEASE_SCRIPT)
            .key(keys::seat(&self.prefix, seat))
            .key(keys::session(&self.prefix, session))
            .arg(Self::seat_member(seat))
            .arg(session.as_str())
            .arg(millis(now))
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        match reply_tag(&reply) {
            "released" => Ok(ReleaseOutcome::Released(hold_from_reply(
                seat,
                session,
                &reply,
                HoldStatus::Released,
            )?)),
            "not_found" => Ok(ReleaseOutcome::NotFound),
            "not_owner" => Ok(ReleaseOutcome::NotOwner {
                owner: parse_session(reply.get(1).map(String::as_str).unwrap_or_default())?,
            }),
            "confirmed" => Ok(ReleaseOutcome::Confirmed),
            other => Err(SeatingError::Store(format!("unexpected release reply: {}", other))),
        }
    }

    async fn confirm(
        &self,
        seat: &SeatKey,
        session: &SessionId,
        now: DateTime<Utc>,
    ) -> SeatingResult<ConfirmOutcome> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = redis::Script::new(CONFIRM_SCRIPT)
            .key(keys::seat(&self.prefix, seat))
            .key(keys::session(&self.prefix, session))
            .arg(Self::seat_member(seat))
            .arg(session.as_str())
            .arg(millis(now))
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        match reply_tag(&reply) {
            "confirmed" => Ok(ConfirmOutcome::Confirmed(hold_from_reply(
                seat,
                session,
                &reply,
                HoldStatus::Confirmed,
            )?)),
            "already" => Ok(ConfirmOutcome::AlreadyConfirmed(hold_from_reply(
                seat,
                session,
                &reply,
                HoldStatus::Confirmed,
            )?)),
            "not_found" => Ok(ConfirmOutcome::NotFound),
            "not_owner" => Ok(ConfirmOutcome::NotOwner {
                owner: parse_session(reply.get(1).map(String::as_str).unwrap_or_default())?,
            }),
            "expired" => Ok(ConfirmOutcome::Expired),
            other => Err(SeatingError::Store(format!("unexpected confirm reply: {}", other))),
        }
    }

    async fn session_seats(&self, session: &SessionId, now: DateTime<Utc>) -> SeatingResult<Vec<SeatHold>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .smembers(keys::session(&self.prefix, session))
            .await
            .map_err(Self::map_err)?;

        let mut holds = Vec::with_capacity(members.len());
        for member in members {
            let Ok(seat) = member.parse::<SeatKey>() else {
                continue;
            };
            if let Some(hold) = self.get(&seat).await? {
                if hold.status == HoldStatus::Held && hold.is_live(now) && hold.is_owned_by(session) {
                    holds.push(hold);
                }
            }
        }
        holds.sort_by(|a, b| a.seat.cmp(&b.seat));
        Ok(holds)
    }

    async fn session_count(&self, session: &SessionId, now: DateTime<Utc>) -> SeatingResult<usize> {
        Ok(self.session_seats(session, now).await?.len())
    }

    async fn touch_session(&self, session: &SessionId, ttl: Duration, _now: DateTime<Utc>) -> SeatingResult<()> {
        // Redis has no empty sets; an absent key is an empty session.
        let mut conn = self.conn.clone();
        let _: bool = conn
            .pexpire(keys::session(&self.prefix, session), ttl.num_milliseconds())
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn block(&self, seats: &[SeatKey], reason: &str, now: DateTime<Utc>) -> SeatingResult<Vec<SeatKey>> {
        let mut out = Vec::new();
        let mut by_event: HashMap<i64, Vec<&SeatKey>> = HashMap::new();
        for seat in seats {
            by_event.entry(seat.event_seating_id).or_default().push(seat);
        }

        let script = redis::Script::new(BLOCK_SCRIPT);
        let mut conn = self.conn.clone();
        for (event_seating_id, event_seats) in by_event {
            let mut call = script.key(keys::blocked(&self.prefix, event_seating_id));
            call.arg(millis(now))
                .arg(reason)
                .arg(format!("{}:seat:{}", self.prefix, event_seating_id));
            for seat in &event_seats {
                call.arg(&seat.seat_uid);
            }
            let blocked: Vec<String> = call.invoke_async(&mut conn).await.map_err(Self::map_err)?;
            out.extend(blocked.into_iter().map(|uid| SeatKey::new(event_seating_id, uid)));
        }

        out.sort();
        Ok(out)
    }

    async fn unblock(&self, seats: &[SeatKey]) -> SeatingResult<Vec<SeatKey>> {
        let mut conn = self.conn.clone();
        let mut out = Vec::new();
        for seat in seats {
            let removed: i64 = conn
                .hdel(keys::blocked(&self.prefix, seat.event_seating_id), &seat.seat_uid)
                .await
                .map_err(Self::map_err)?;
            if removed > 0 {
                out.push(seat.clone());
            }
        }
        Ok(out)
    }

    async fn blocked(&self, event_seating_id: i64) -> SeatingResult<Vec<(SeatKey, String)>> {
        let mut conn = self.conn.clone();
        let entries: HashMap<String, String> = conn
            .hgetall(keys::blocked(&self.prefix, event_seating_id))
            .await
            .map_err(Self::map_err)?;
        let mut seats: Vec<(SeatKey, String)> = entries
            .into_iter()
            .map(|(uid, reason)| (SeatKey::new(event_seating_id, uid), reason))
            .collect();
        seats.sort();
        Ok(seats)
    }

    async fn sweep(&self, _now: DateTime<Utc>) -> SeatingResult<Vec<SeatHold>> {
        Ok(Vec::new())
    }

    fn ttl_native(&self) -> bool {
        true
    }
}

/// Fixed-window rate limiter on `INCR` + `EXPIRE NX`.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: MultiplexedConnection,
}

impl RedisRateLimiter {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimiter {
    async fn hit(&self, key: &str, limit: u32, window: std::time::Duration) -> SeatingResult<bool> {
        let mut conn = self.conn.clone();

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window.as_secs().max(1))
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(RedisHoldStore::map_err)?;

        Ok(count <= i64::from(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_from_fields() {
        let seat = SeatKey::new(3, "C4");
        let acquired = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let fields: HashMap<String, String> = [
            ("session", "sess-9"),
            ("status", "held"),
            ("acquired_at", "1700000000000"),
            ("expires_at", "1700000900000"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let hold = hold_from_fields(&seat, &fields).unwrap();
        assert_eq!(hold.session_id.as_str(), "sess-9");
        assert_eq!(hold.acquired_at, acquired);
        assert_eq!(hold.expires_at - hold.acquired_at, Duration::seconds(900));
        assert_eq!(hold.status, HoldStatus::Held);
    }

    #[test]
    fn test_hold_from_fields_rejects_corrupt_records() {
        let seat = SeatKey::new(3, "C4");
        let mut fields = HashMap::new();
        fields.insert("session".to_string(), "sess-9".to_string());
        assert!(matches!(hold_from_fields(&seat, &fields), Err(SeatingError::Store(_))));
    }

    #[test]
    fn test_reply_parsing() {
        let seat = SeatKey::new(1, "A1");
        let session = SessionId::parse("s1").unwrap();
        let reply = vec!["owned".to_string(), "1000".to_string(), "901000".to_string()];
        assert_eq!(reply_tag(&reply), "owned");

        let hold = hold_from_reply(&seat, &session, &reply, HoldStatus::Held).unwrap();
        assert_eq!(hold.expires_at.timestamp(), 901);
        assert!(hold_from_reply(&seat, &session, &reply[..1], HoldStatus::Held).is_err());
        assert_eq!(reply_tag(&[]), "");
    }
}
