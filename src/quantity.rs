//! A tagged-sum resource quantity.
//!
//! The upstream representation this engine replaces used untyped
//! string-keyed dictionaries where a `4Gi` memory value and a `500m` cpu
//! value lived in the same map with no guard against cross-family
//! arithmetic. Here every [`Quantity`] carries its own [`UnitFamily`] so
//! `cpu + memory` is a type error waiting to happen rather than a silent
//! miscalculation.

use std::fmt;
use std::ops::{Add, Sub};

use crate::error::{Result, SchedulerError};

/// The unit family a quantity was expressed in. Values are normalized to a
/// family-specific base unit on parse so that `Add`/`Sub`/`Cmp` never need to
/// rescale: decimal (SI, e.g. cpu millicores) and binary (e.g. Ki/Mi/Gi
/// memory) never compare equal to the same raw number in the other family,
/// and `Count` (GPUs, replicas — dimensionless) never compares to either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnitFamily {
    /// Decimal SI, normalized to thousandths of the named unit (e.g.
    /// millicores for cpu).
    Decimal,
    /// Binary SI, normalized to kibibytes.
    Binary,
    /// A bare dimensionless count (GPU count, replica count).
    Count,
}

/// A signed quantity tagged with the family it was parsed in. `value` is
/// always expressed in the family's normalized base unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity {
    value: i64,
    family: UnitFamily,
}

impl Quantity {
    pub fn zero(family: UnitFamily) -> Self {
        Quantity { value: 0, family }
    }

    pub fn count(n: i64) -> Self {
        Quantity {
            value: n,
            family: UnitFamily::Count,
        }
    }

    /// Construct directly from a millicore value already in `Decimal` scale.
    pub fn decimal_millis(n: i64) -> Self {
        Quantity {
            value: n,
            family: UnitFamily::Decimal,
        }
    }

    /// Construct directly from a kibibyte value already in `Binary` scale.
    pub fn binary_kib(n: i64) -> Self {
        Quantity {
            value: n,
            family: UnitFamily::Binary,
        }
    }

    pub fn family(&self) -> UnitFamily {
        self.family
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Raw value in the family's normalized base unit (millicores for
    /// `Decimal`, kibibytes for `Binary`, the count itself for `Count`).
    pub fn raw(&self) -> i64 {
        self.value
    }

    /// Parse a Kubernetes-style resource string: a bare decimal, a
    /// decimal SI suffix (`m`, `k`, `M`, `G`, `T`), or a binary SI suffix
    /// (`Ki`, `Mi`, `Gi`, `Ti`). Mirrors the conversions a scheduler
    /// normally needs from the wire format into comparable integers.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SchedulerError::malformed("quantity", "empty string"));
        }

        if let Some(prefix) = raw.strip_suffix("Ki") {
            return Self::binary_suffixed(prefix, 1, raw);
        }
        if let Some(prefix) = raw.strip_suffix("Mi") {
            return Self::binary_suffixed(prefix, 1024, raw);
        }
        if let Some(prefix) = raw.strip_suffix("Gi") {
            return Self::binary_suffixed(prefix, 1024 * 1024, raw);
        }
        if let Some(prefix) = raw.strip_suffix("Ti") {
            return Self::binary_suffixed(prefix, 1024 * 1024 * 1024, raw);
        }

        if let Some(prefix) = raw.strip_suffix('m') {
            let whole: f64 = prefix
                .parse()
                .map_err(|_| SchedulerError::malformed("quantity", raw.to_string()))?;
            return Ok(Quantity {
                value: whole.round() as i64,
                family: UnitFamily::Decimal,
            });
        }
        if let Some(prefix) = raw.strip_suffix('k') {
            return Self::decimal_suffixed(prefix, 1_000_000, raw);
        }
        if let Some(prefix) = raw.strip_suffix('M') {
            return Self::decimal_suffixed(prefix, 1_000_000_000, raw);
        }
        if let Some(prefix) = raw.strip_suffix('G') {
            return Self::decimal_suffixed(prefix, 1_000_000_000_000, raw);
        }
        if let Some(prefix) = raw.strip_suffix('T') {
            return Self::decimal_suffixed(prefix, 1_000_000_000_000_000, raw);
        }

        // Bare number: decimal SI at whole-unit scale (e.g. "2" cpu cores,
        // "1" GPU). Normalize to millicores so it composes with "500m".
        let whole: f64 = raw
            .parse()
            .map_err(|_| SchedulerError::malformed("quantity", raw.to_string()))?;
        Ok(Quantity {
            value: (whole * 1000.0).round() as i64,
            family: UnitFamily::Decimal,
        })
    }

    fn binary_suffixed(prefix: &str, kib_multiplier: i64, raw: &str) -> Result<Self> {
        let whole: f64 = prefix
            .parse()
            .map_err(|_| SchedulerError::malformed("quantity", raw.to_string()))?;
        Ok(Quantity {
            value: (whole * kib_multiplier as f64).round() as i64,
            family: UnitFamily::Binary,
        })
    }

    fn decimal_suffixed(prefix: &str, millis_multiplier: i64, raw: &str) -> Result<Self> {
        let whole: f64 = prefix
            .parse()
            .map_err(|_| SchedulerError::malformed("quantity", raw.to_string()))?;
        Ok(Quantity {
            value: (whole * millis_multiplier as f64).round() as i64,
            family: UnitFamily::Decimal,
        })
    }

    /// Saturating subtraction clamped at zero — never goes negative, mirroring
    /// the "unused capacity can't be negative" invariant leftover accounting
    /// depends on.
    pub fn saturating_sub(&self, other: &Quantity) -> Quantity {
        debug_assert_eq!(
            self.family, other.family,
            "quantity family mismatch: {:?} vs {:?}",
            self.family, other.family
        );
        Quantity {
            value: (self.value - other.value).max(0),
            family: self.family,
        }
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        debug_assert_eq!(
            self.family, rhs.family,
            "quantity family mismatch: {:?} vs {:?}",
            self.family, rhs.family
        );
        Quantity {
            value: self.value + rhs.value,
            family: self.family,
        }
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Quantity) -> Quantity {
        debug_assert_eq!(
            self.family, rhs.family,
            "quantity family mismatch: {:?} vs {:?}",
            self.family, rhs.family
        );
        Quantity {
            value: self.value - rhs.value,
            family: self.family,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            UnitFamily::Decimal => write!(f, "{}m", self.value),
            UnitFamily::Binary => write!(f, "{}Ki", self.value),
            UnitFamily::Count => write!(f, "{}", self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("500m", UnitFamily::Decimal, 500)]
    #[case("2", UnitFamily::Decimal, 2000)]
    #[case("4Gi", UnitFamily::Binary, 4 * 1024 * 1024)]
    #[case("1Ki", UnitFamily::Binary, 1)]
    #[case("1G", UnitFamily::Decimal, 1_000_000_000_000)]
    fn parses_expected_scale(#[case] raw: &str, #[case] family: UnitFamily, #[case] value: i64) {
        let q = Quantity::parse(raw).unwrap();
        assert_eq!(q.family(), family);
        assert_eq!(q.raw(), value);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Quantity::parse("").is_err());
        assert!(Quantity::parse("banana").is_err());
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        let a = Quantity::parse("500m").unwrap();
        let b = Quantity::parse("2").unwrap();
        assert_eq!(a.saturating_sub(&b).raw(), 0);
    }

    #[test]
    fn count_is_its_own_family() {
        let gpus = Quantity::count(4);
        assert_eq!(gpus.family(), UnitFamily::Count);
        assert_eq!(gpus.raw(), 4);
    }
}
