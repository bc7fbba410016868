use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

/// RPM/IP/token-lock gates share one contract so the retry pipeline doesn't
/// care whether it's talking to the in-process fallback or a shared KV.
/// Every operation is meant to be atomic at the storage layer: a backend
/// that can't guarantee that for a given call must say so by erroring, not
/// by silently racing.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("gate backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Gate: Send + Sync {
    /// Sliding 60s window admission check for `provider_id`. `limit <= 0`
    /// always admits without touching storage.
    async fn rpm_check_admit(&self, provider_id: &str, limit: i64) -> Result<bool, GateError>;

    /// Record one admitted request against the provider's RPM window.
    async fn rpm_record(&self, provider_id: &str) -> Result<(), GateError>;

    /// First-IP affinity for `provider_id`. `lock_minutes <= 0` disables
    /// the check (always admits). On the first call after the lock is
    /// expired or absent, `client_ip` becomes the locked IP.
    async fn ip_check_and_touch(
        &self,
        provider_id: &str,
        client_ip: IpAddr,
        lock_minutes: i64,
    ) -> Result<bool, GateError>;

    /// Exclusive (candidate, auth-key) affinity with a refreshing TTL.
    /// Admits if the lock is absent or already held by `auth_key_id`;
    /// rejects if held by a different key.
    async fn token_check_and_touch(
        &self,
        candidate_id: &str,
        auth_key_id: &str,
        ttl: Duration,
    ) -> Result<bool, GateError>;
}
