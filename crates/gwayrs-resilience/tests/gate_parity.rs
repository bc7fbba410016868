//! Exercises the `Gate` contract against every backend that implements it.
//! `MemoryGate` always runs; `RedisGate` only runs under `--features
//! redis-backend -- --ignored` against a local Redis instance, per the
//! design note that both backends must satisfy identical semantics.

use std::net::IpAddr;
use std::time::Duration;

use gwayrs_resilience::{Gate, MemoryGate};

async fn exercise(gate: &impl Gate, provider: &str, candidate: &str) {
    assert!(gate.rpm_check_admit(provider, 2).await.unwrap());
    gate.rpm_record(provider).await.unwrap();
    assert!(gate.rpm_check_admit(provider, 2).await.unwrap());
    gate.rpm_record(provider).await.unwrap();
    assert!(!gate.rpm_check_admit(provider, 2).await.unwrap());

    let ip_a: IpAddr = "192.0.2.1".parse().unwrap();
    let ip_b: IpAddr = "192.0.2.2".parse().unwrap();
    assert!(gate.ip_check_and_touch(provider, ip_a, 5).await.unwrap());
    // Same IP again must still admit, and must not re-arm the lock for a
    // different first IP later — the lock is written once, not refreshed.
    assert!(gate.ip_check_and_touch(provider, ip_a, 5).await.unwrap());
    assert!(!gate.ip_check_and_touch(provider, ip_b, 5).await.unwrap());

    let ttl = Duration::from_secs(60);
    assert!(gate.token_check_and_touch(candidate, "keyA", ttl).await.unwrap());
    assert!(gate.token_check_and_touch(candidate, "keyA", ttl).await.unwrap());
    assert!(!gate.token_check_and_touch(candidate, "keyB", ttl).await.unwrap());
}

#[tokio::test]
async fn memory_gate_satisfies_contract() {
    let gate = MemoryGate::new();
    exercise(&gate, "provider-a", "candidate-a").await;
}

#[cfg(feature = "redis-backend")]
#[tokio::test]
#[ignore]
async fn redis_gate_satisfies_contract() {
    let gate = gwayrs_resilience::RedisGate::connect("redis://127.0.0.1/")
        .await
        .unwrap();
    exercise(&gate, "provider-b", "candidate-b").await;
}
