use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::gate::{Gate, GateError};

const RPM_WINDOW_SECS: i64 = 60;
const RPM_STALE_SECS: i64 = 120;

/// `Gate` backed by a shared Redis-compatible KV, for deployments running
/// more than one gateway process. Sorted sets give the RPM window its
/// purge-by-score semantics for free; the IP and token locks each use a
/// small Lua script so the check-and-set stays atomic across round trips.
pub struct RedisGate {
    conn: ConnectionManager,
}

impl RedisGate {
    pub async fn connect(url: &str) -> Result<Self, GateError> {
        let client =
            redis::Client::open(url).map_err(|e| GateError::Unavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| GateError::Unavailable(e.to_string()))?;
        Ok(Self { conn })
    }
}

// KEYS[1] = lock key, ARGV[1] = candidate value, ARGV[2] = ttl millis.
// Writes the key (arming the lock) only when it's absent; an existing
// matching key admits without touching its TTL, since the lock is meant
// to be written once and left alone until Redis expires it on its own.
const IP_LOCK_SCRIPT: &str = r#"
local current = redis.call("GET", KEYS[1])
if current == false then
    redis.call("SET", KEYS[1], ARGV[1], "PX", ARGV[2])
    return 1
end
if current == ARGV[1] then
    return 1
end
return 0
"#;

// KEYS[1] = lock key, ARGV[1] = candidate value, ARGV[2] = ttl millis.
// Admits (returns 1) if the key is absent or already equals ARGV[1];
// always refreshes the TTL on admission, since the token lock is meant
// to keep extending as long as the same key keeps using the candidate.
const TOKEN_LOCK_SCRIPT: &str = r#"
local current = redis.call("GET", KEYS[1])
if current == false or current == ARGV[1] then
    redis.call("SET", KEYS[1], ARGV[1], "PX", ARGV[2])
    return 1
end
return 0
"#;

#[async_trait]
impl Gate for RedisGate {
    async fn rpm_check_admit(&self, provider_id: &str, limit: i64) -> Result<bool, GateError> {
        if limit <= 0 {
            return Ok(true);
        }
        let key = format!("gwayrs:rpm:{provider_id}");
        let mut conn = self.conn.clone();
        let now_ms = now_millis();
        let cutoff = now_ms - RPM_WINDOW_SECS * 1000;
        conn.zrembyscore::<_, _, _, ()>(&key, 0, cutoff)
            .await
            .map_err(|e| GateError::Unavailable(e.to_string()))?;
        let count: i64 = conn
            .zcard(&key)
            .await
            .map_err(|e| GateError::Unavailable(e.to_string()))?;
        Ok(count < limit)
    }

    async fn rpm_record(&self, provider_id: &str) -> Result<(), GateError> {
        let key = format!("gwayrs:rpm:{provider_id}");
        let mut conn = self.conn.clone();
        let now_ms = now_millis();
        conn.zadd::<_, _, _, ()>(&key, now_ms, now_ms)
            .await
            .map_err(|e| GateError::Unavailable(e.to_string()))?;
        conn.expire::<_, ()>(&key, RPM_STALE_SECS)
            .await
            .map_err(|e| GateError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn ip_check_and_touch(
        &self,
        provider_id: &str,
        client_ip: IpAddr,
        lock_minutes: i64,
    ) -> Result<bool, GateError> {
        if lock_minutes <= 0 {
            return Ok(true);
        }
        let key = format!("gwayrs:iplock:{provider_id}");
        let ttl_ms = lock_minutes * 60 * 1000;
        let admitted: i64 = redis::Script::new(IP_LOCK_SCRIPT)
            .key(&key)
            .arg(client_ip.to_string())
            .arg(ttl_ms)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| GateError::Unavailable(e.to_string()))?;
        Ok(admitted == 1)
    }

    async fn token_check_and_touch(
        &self,
        candidate_id: &str,
        auth_key_id: &str,
        ttl: Duration,
    ) -> Result<bool, GateError> {
        let key = format!("gwayrs:tokenlock:{candidate_id}");
        let admitted: i64 = redis::Script::new(TOKEN_LOCK_SCRIPT)
            .key(&key)
            .arg(auth_key_id)
            .arg(ttl.as_millis() as i64)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| GateError::Unavailable(e.to_string()))?;
        Ok(admitted == 1)
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
