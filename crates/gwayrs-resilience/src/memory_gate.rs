use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::gate::{Gate, GateError};

const RPM_WINDOW: Duration = Duration::from_secs(60);
const RPM_STALE_AFTER: Duration = Duration::from_secs(120);

struct IpLockEntry {
    first_ip: IpAddr,
    lock_until: Instant,
}

struct TokenLockEntry {
    auth_key_id: String,
    expires_at: Instant,
}

/// In-process fallback for the `Gate` contract: a mutex-guarded map of
/// per-provider RPM windows, plus separate maps for IP and token-affinity
/// locks. Used whenever no shared KV is configured, and by the test suite
/// to exercise the same semantics the KV-backed implementation promises.
#[derive(Default)]
pub struct MemoryGate {
    rpm: RwLock<HashMap<String, Vec<Instant>>>,
    ip_locks: Mutex<HashMap<String, IpLockEntry>>,
    token_locks: Mutex<HashMap<String, TokenLockEntry>>,
}

impl MemoryGate {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Gate for MemoryGate {
    async fn rpm_check_admit(&self, provider_id: &str, limit: i64) -> Result<bool, GateError> {
        if limit <= 0 {
            return Ok(true);
        }
        let now = Instant::now();
        let guard = self.rpm.read().await;
        let count = guard
            .get(provider_id)
            .map(|timestamps| {
                timestamps
                    .iter()
                    .filter(|t| now.saturating_duration_since(**t) < RPM_WINDOW)
                    .count()
            })
            .unwrap_or(0);
        Ok((count as i64) < limit)
    }

    async fn rpm_record(&self, provider_id: &str) -> Result<(), GateError> {
        let now = Instant::now();
        let mut guard = self.rpm.write().await;
        let timestamps = guard.entry(provider_id.to_string()).or_default();
        timestamps.retain(|t| now.saturating_duration_since(*t) < RPM_STALE_AFTER);
        timestamps.push(now);
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
        let now = Instant::now();
        let mut guard = self.ip_locks.lock().await;
        match guard.get(provider_id) {
            Some(entry) if entry.lock_until > now => Ok(entry.first_ip == client_ip),
            _ => {
                guard.insert(
                    provider_id.to_string(),
                    IpLockEntry {
                        first_ip: client_ip,
                        lock_until: now + Duration::from_secs(lock_minutes as u64 * 60),
                    },
                );
                Ok(true)
            }
        }
    }

    async fn token_check_and_touch(
        &self,
        candidate_id: &str,
        auth_key_id: &str,
        ttl: Duration,
    ) -> Result<bool, GateError> {
        let now = Instant::now();
        let mut guard = self.token_locks.lock().await;
        match guard.get(candidate_id) {
            Some(entry) if entry.expires_at > now && entry.auth_key_id != auth_key_id => {
                Ok(false)
            }
            _ => {
                guard.insert(
                    candidate_id.to_string(),
                    TokenLockEntry {
                        auth_key_id: auth_key_id.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }
}
