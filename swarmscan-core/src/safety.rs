//! Verdict lattice and weighted averaging of evidence.

use serde::{Deserialize, Serialize};

/// A (confident, malicious) verdict.
///
/// The four combinations form the lattice used by the decision policies:
/// benign, possibly benign, possibly malicious and malicious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Safety {
    /// Whether the verdict is backed by enough evidence.
    pub confident: bool,
    /// Whether the object is considered malicious.
    pub malicious: bool,
}

impl Safety {
    pub const BENIGN: Safety = Safety::new(true, false);
    pub const POSSIBLY_BENIGN: Safety = Safety::new(false, false);
    pub const POSSIBLY_MALICIOUS: Safety = Safety::new(false, true);
    pub const MALICIOUS: Safety = Safety::new(true, true);

    /// Create a verdict.
    pub const fn new(confident: bool, malicious: bool) -> Self {
        Self { confident, malicious }
    }

    /// Maliciousness score of this verdict: +1, +0.2, -0.2 or -1.
    pub fn weight(&self) -> f64 {
        match (self.confident, self.malicious) {
            (true, true) => 1.0,
            (false, true) => 0.2,
            (false, false) => -0.2,
            (true, false) => -1.0,
        }
    }
}

/// Running weighted average of evidence scores.
#[derive(Debug, Clone, Default)]
pub struct WeightedAverager {
    total: f64,
    total_weight: f64,
    count: usize,
}

impl WeightedAverager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value with the given influence.
    pub fn add(&mut self, value: f64, weight: f64) {
        self.total += weight * value;
        self.total_weight += weight;
        self.count += 1;
    }

    /// Current average, 0 when nothing has been added.
    pub fn average(&self) -> f64 {
        if self.total_weight == 0.0 {
            0.0
        } else {
            self.total / self.total_weight
        }
    }

    /// Number of values added so far.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lattice_weights() {
        assert_eq!(Safety::MALICIOUS.weight(), 1.0);
        assert_eq!(Safety::POSSIBLY_MALICIOUS.weight(), 0.2);
        assert_eq!(Safety::POSSIBLY_BENIGN.weight(), -0.2);
        assert_eq!(Safety::BENIGN.weight(), -1.0);
    }

    #[test]
    fn test_empty_average_is_zero() {
        let avg = WeightedAverager::new();
        assert_eq!(avg.average(), 0.0);
        assert!(avg.is_empty());
    }

    #[test]
    fn test_weighted_average() {
        let mut avg = WeightedAverager::new();
        avg.add(1.0, 0.8);
        avg.add(-1.0, 1.0);
        // (0.8 - 1.0) / 1.8
        assert!((avg.average() - (-0.2 / 1.8)).abs() < 1e-12);
        assert_eq!(avg.len(), 2);
    }
}
