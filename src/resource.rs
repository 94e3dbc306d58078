//! ResourceAlgebra: componentwise operations over heterogeneous resource
//! lists (cpu, memory, ephemeral-storage, vendor-keyed GPU counts, ...).

use std::collections::BTreeMap;

use crate::quantity::Quantity;

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";
pub const EPHEMERAL_STORAGE: &str = "ephemeral-storage";
pub const SHARED_MEMORY: &str = "shared-memory";

/// A finite mapping from resource-name to [`Quantity`]. Iteration order is
/// the insertion order of the *requester* side of a `contains` check, which
/// is what makes the deficient-key tie-break in the Admitter deterministic:
/// callers build requester resource lists with [`ResourceList::new`] and
/// [`ResourceList::with`] in the order they want checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceList {
    order: Vec<String>,
    values: BTreeMap<String, Quantity>,
}

impl ResourceList {
    pub fn new() -> Self {
        ResourceList::default()
    }

    pub fn with(mut self, key: impl Into<String>, quantity: Quantity) -> Self {
        self.insert(key, quantity);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, quantity: Quantity) {
        let key = key.into();
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.values.insert(key, quantity);
    }

    pub fn get(&self, key: &str) -> Option<Quantity> {
        self.values.get(key).copied()
    }

    /// Iterates in the order keys were first inserted.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Quantity)> {
        self.order
            .iter()
            .map(move |k| (k.as_str(), self.values[k]))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Componentwise add. Keys present in only one operand pass through
    /// unchanged; keys present in both are summed (families must match,
    /// enforced by [`Quantity::add`]'s debug assertion).
    pub fn add(&self, other: &ResourceList) -> ResourceList {
        let mut out = self.clone();
        for (key, qty) in other.iter() {
            let combined = match out.get(key) {
                Some(existing) => existing + qty,
                None => qty,
            };
            out.insert(key, combined);
        }
        out
    }

    /// Componentwise subtract, clamped at zero on absent keys: a key present
    /// in `other` but not `self` is treated as zero-available, not negative.
    pub fn subtract(&self, other: &ResourceList) -> ResourceList {
        let mut out = self.clone();
        for (key, qty) in other.iter() {
            let existing = out.get(key).unwrap_or_else(|| Quantity::zero(qty.family()));
            out.insert(key, existing.saturating_sub(&qty));
        }
        out
    }

    /// Equality tolerant of unit-encoding differences: two lists are equal
    /// iff every key present in either has an equal quantity in the other
    /// (absent keys compare as a zero quantity of the present side's family).
    pub fn approx_eq(&self, other: &ResourceList) -> bool {
        let mut keys: Vec<&str> = self.keys().chain(other.keys()).collect();
        keys.sort_unstable();
        keys.dedup();
        keys.iter().all(|k| {
            let a = self.get(k);
            let b = other.get(k);
            match (a, b) {
                (Some(a), Some(b)) => a == b,
                (Some(a), None) => a.is_zero(),
                (None, Some(b)) => b.is_zero(),
                (None, None) => true,
            }
        })
    }

    /// `self.contains(respondent)`: true iff for every key in `self` (the
    /// requester), `respondent`'s quantity is >= the requester's. On failure
    /// returns the first deficient key in requester iteration order.
    pub fn contains_within(&self, respondent: &ResourceList) -> (bool, Option<String>) {
        for (key, requested) in self.iter() {
            let available = respondent
                .get(key)
                .unwrap_or_else(|| Quantity::zero(requested.family()));
            if available.raw() < requested.raw() {
                return (false, Some(key.to_string()));
            }
        }
        (true, None)
    }

    pub fn gpu_count(&self, vendor_key: &str) -> i64 {
        self.get(vendor_key).map(|q| q.raw()).unwrap_or(0)
    }

    pub fn cpu_millicores(&self) -> i64 {
        self.get(CPU).map(|q| q.raw()).unwrap_or(0)
    }

    pub fn memory_kib(&self) -> i64 {
        self.get(MEMORY).map(|q| q.raw()).unwrap_or(0)
    }
}

/// GPU keys are vendor-namespaced (`nvidia.com/gpu`, `amd.com/gpu`, ...) and
/// NEVER fungible across vendors: a request for `amd.com/gpu` is never
/// satisfied by available `nvidia.com/gpu` capacity, because `ResourceList`
/// treats each string key as its own dimension — no special-casing needed
/// here, the algebra above is already vendor-blind by construction.
pub fn gpu_key(vendor: &str) -> String {
    format!("{vendor}/gpu")
}

pub fn count(n: i64) -> Quantity {
    Quantity::count(n)
}

pub fn decimal_millis(n: i64) -> Quantity {
    Quantity::decimal_millis(n)
}

pub fn binary_kib(n: i64) -> Quantity {
    Quantity::binary_kib(n)
}
