use rand::Rng;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BalancerError {
    #[error("no items left in balancer")]
    NoItems,
}

/// A mutable multiset of `(id, weight)` pairs that candidate selection
/// draws from. Per-request and private: a fresh balancer is built for each
/// inbound request from the candidates C2 resolved, so there is no
/// cross-request interference here (unlike the breaker, which is shared).
pub trait Balancer: Send {
    /// Pick one id without necessarily removing it (that's strategy-defined).
    fn pop(&mut self) -> Result<String, BalancerError>;
    /// Report a successful dispatch. Neither strategy changes its own state
    /// on success; this exists so a wrapping breaker can observe it through
    /// the same trait object the retry loop already holds.
    fn success(&mut self, _id: &str) {}
    /// Demote `id` after a soft failure (e.g. HTTP 429, a rejected gate).
    fn reduce(&mut self, id: &str);
    /// Evict `id` after a hard failure (e.g. transport error, HTTP 5xx).
    fn delete(&mut self, id: &str);
}

struct Entry {
    id: String,
    weight: i64,
}

/// Weighted random selection. `pop` draws uniformly over the total weight
/// and returns whichever entry that draw lands in; it does not remove the
/// entry, so the same id can be drawn again on a later `pop` unless
/// `delete`d or `reduce`d away. `reduce` shrinks the weight by a third,
/// converging a repeatedly-failing candidate toward eviction odds.
pub struct Lottery {
    entries: Vec<Entry>,
}

impl Lottery {
    pub fn new(weights: impl IntoIterator<Item = (String, i64)>) -> Self {
        Self {
            entries: weights
                .into_iter()
                .map(|(id, weight)| Entry { id, weight })
                .collect(),
        }
    }

    fn total_weight(&self) -> i64 {
        self.entries.iter().map(|e| e.weight).sum()
    }
}

impl Balancer for Lottery {
    fn pop(&mut self) -> Result<String, BalancerError> {
        let total = self.total_weight();
        if self.entries.is_empty() || total <= 0 {
            return Err(BalancerError::NoItems);
        }
        let mut r = rand::rng().random_range(0..total);
        for entry in &self.entries {
            if r < entry.weight {
                return Ok(entry.id.clone());
            }
            r -= entry.weight;
        }
        // Unreachable if total_weight is computed correctly, but guards
        // against float/overflow drift by falling back to the last entry.
        Ok(self.entries.last().expect("checked non-empty above").id.clone())
    }

    fn reduce(&mut self, id: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            // Ceiling division so a weight of 1 or 2 still shrinks each
            // call instead of stalling just above zero.
            entry.weight -= entry.weight.div_ceil(3);
        }
    }

    fn delete(&mut self, id: &str) {
        self.entries.retain(|e| e.id != id);
    }
}

/// Round-robin with demotion-by-order. `pop` always returns the head
/// without removing it (the retry loop must `reduce` or `delete` it
/// itself to make progress). `reduce` moves the entry to the tail instead
/// of touching its weight; `delete` removes it outright.
pub struct Rotor {
    entries: Vec<Entry>,
}

impl Rotor {
    pub fn new(weights: impl IntoIterator<Item = (String, i64)>) -> Self {
        let mut entries: Vec<Entry> = weights
            .into_iter()
            .map(|(id, weight)| Entry { id, weight })
            .collect();
        entries.sort_by(|a, b| b.weight.cmp(&a.weight));
        Self { entries }
    }
}

impl Balancer for Rotor {
    fn pop(&mut self) -> Result<String, BalancerError> {
        self.entries
            .first()
            .map(|e| e.id.clone())
            .ok_or(BalancerError::NoItems)
    }

    fn reduce(&mut self, id: &str) {
        if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
            let entry = self.entries.remove(pos);
            self.entries.push(entry);
        }
    }

    fn delete(&mut self, id: &str) {
        self.entries.retain(|e| e.id != id);
    }
}
