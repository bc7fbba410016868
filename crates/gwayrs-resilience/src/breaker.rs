use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::balancer::{Balancer, BalancerError};

const DEFAULT_MAX_FAILURES: u32 = 5;
const DEFAULT_SLEEP_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_MAX_REQUESTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Node {
    state: State,
    fails: u32,
    successes: u32,
    expiry_at: Option<Instant>,
}

impl Node {
    fn closed() -> Self {
        Self {
            state: State::Closed,
            fails: 0,
            successes: 0,
            expiry_at: None,
        }
    }
}

/// Per-candidate failure isolation, process-global and shared across
/// requests (unlike the balancer it wraps, which is per-request). Nodes
/// live in a plain mutex-guarded map: decisions are cheap and infrequent
/// enough that fine-grained per-node locking isn't worth the complexity.
pub struct CircuitBreaker {
    max_failures: u32,
    sleep_window: Duration,
    max_requests: u32,
    nodes: Arc<Mutex<HashMap<String, Node>>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_thresholds(DEFAULT_MAX_FAILURES, DEFAULT_SLEEP_WINDOW, DEFAULT_MAX_REQUESTS)
    }

    pub fn with_thresholds(max_failures: u32, sleep_window: Duration, max_requests: u32) -> Self {
        Self {
            max_failures,
            sleep_window,
            max_requests,
            nodes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wrap a request-scoped balancer: any candidate currently `open` (and
    /// not yet eligible to probe) is evicted from the inner balancer before
    /// a single `pop` happens, so this request never sees it. A candidate
    /// whose sleep window has elapsed moves to `half-open` instead and is
    /// left in the inner balancer to be probed.
    pub fn wrap(&self, mut inner: Box<dyn Balancer>, known_ids: &[String]) -> Box<dyn Balancer> {
        let now = Instant::now();
        let mut nodes = self.nodes.lock().expect("breaker mutex poisoned");
        for id in known_ids {
            let node = nodes.entry(id.clone()).or_insert_with(Node::closed);
            if node.state == State::Open {
                if node.expiry_at.is_some_and(|at| now >= at) {
                    node.state = State::HalfOpen;
                    node.successes = 0;
                } else {
                    inner.delete(id);
                }
            }
        }
        drop(nodes);
        Box::new(BreakerBalancer {
            inner,
            nodes: self.nodes.clone(),
            max_failures: self.max_failures,
            sleep_window: self.sleep_window,
            max_requests: self.max_requests,
        })
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

struct BreakerBalancer {
    inner: Box<dyn Balancer>,
    nodes: Arc<Mutex<HashMap<String, Node>>>,
    max_failures: u32,
    sleep_window: Duration,
    max_requests: u32,
}

impl BreakerBalancer {
    fn record_failure(&self, id: &str) {
        let mut nodes = self.nodes.lock().expect("breaker mutex poisoned");
        let node = nodes.entry(id.to_string()).or_insert_with(Node::closed);
        match node.state {
            State::Closed => {
                node.fails += 1;
                if node.fails >= self.max_failures {
                    node.state = State::Open;
                    node.expiry_at = Some(Instant::now() + self.sleep_window);
                }
            }
            State::HalfOpen => {
                node.state = State::Open;
                node.expiry_at = Some(Instant::now() + self.sleep_window);
                node.successes = 0;
            }
            State::Open => {}
        }
    }
}

impl Balancer for BreakerBalancer {
    fn pop(&mut self) -> Result<String, BalancerError> {
        let id = self.inner.pop()?;
        let mut nodes = self.nodes.lock().expect("breaker mutex poisoned");
        nodes.entry(id.clone()).or_insert_with(Node::closed);
        Ok(id)
    }

    fn success(&mut self, id: &str) {
        let mut nodes = self.nodes.lock().expect("breaker mutex poisoned");
        let node = nodes.entry(id.to_string()).or_insert_with(Node::closed);
        if node.state == State::HalfOpen {
            node.successes += 1;
            if node.successes >= self.max_requests {
                node.state = State::Closed;
                node.fails = 0;
                node.successes = 0;
                node.expiry_at = None;
            }
        }
        drop(nodes);
        self.inner.success(id);
    }

    fn reduce(&mut self, id: &str) {
        self.record_failure(id);
        self.inner.reduce(id);
    }

    fn delete(&mut self, id: &str) {
        self.record_failure(id);
        self.inner.delete(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::Lottery;

    fn ids(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    fn fresh_lottery(id: &str) -> Box<dyn Balancer> {
        Box::new(Lottery::new([(id.to_string(), 1)]))
    }

    #[test]
    fn opens_after_max_failures_consecutive() {
        let breaker = CircuitBreaker::with_thresholds(3, Duration::from_secs(60), 2);
        let mut wrapped = breaker.wrap(fresh_lottery("c1"), &ids(&["c1"]));
        wrapped.delete("c1");
        wrapped.delete("c1");
        wrapped.delete("c1");

        let reopened = breaker.wrap(fresh_lottery("c1"), &ids(&["c1"]));
        assert_eq!(reopened.pop().unwrap_err(), BalancerError::NoItems);
    }

    #[test]
    fn stays_closed_below_threshold() {
        let breaker = CircuitBreaker::with_thresholds(3, Duration::from_secs(60), 2);
        let mut wrapped = breaker.wrap(fresh_lottery("c1"), &ids(&["c1"]));
        wrapped.delete("c1");
        wrapped.delete("c1");

        let still_open_for_probing = breaker.wrap(fresh_lottery("c1"), &ids(&["c1"]));
        assert!(still_open_for_probing.pop().is_ok());
    }

    #[test]
    fn half_open_single_failure_reopens() {
        let breaker = CircuitBreaker::with_thresholds(1, Duration::from_millis(1), 2);
        let mut wrapped = breaker.wrap(fresh_lottery("c1"), &ids(&["c1"]));
        wrapped.delete("c1");
        std::thread::sleep(Duration::from_millis(5));

        let mut probing = breaker.wrap(fresh_lottery("c1"), &ids(&["c1"]));
        assert!(probing.pop().is_ok(), "half-open candidate should be probed");
        probing.delete("c1");

        let after_probe_failure = breaker.wrap(fresh_lottery("c1"), &ids(&["c1"]));
        assert_eq!(after_probe_failure.pop().unwrap_err(), BalancerError::NoItems);
    }

    #[test]
    fn half_open_closes_after_max_requests_successes() {
        let breaker = CircuitBreaker::with_thresholds(1, Duration::from_millis(1), 2);
        let mut wrapped = breaker.wrap(fresh_lottery("c1"), &ids(&["c1"]));
        wrapped.delete("c1");
        std::thread::sleep(Duration::from_millis(5));

        let mut probing = breaker.wrap(fresh_lottery("c1"), &ids(&["c1"]));
        assert!(probing.pop().is_ok());
        probing.success("c1");
        probing.success("c1");

        let closed_again = breaker.wrap(fresh_lottery("c1"), &ids(&["c1"]));
        assert!(closed_again.pop().is_ok());
    }
}
