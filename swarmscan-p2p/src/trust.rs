//! Peer trust as social distance.
//!
//! Lower distance means more trust. The real distance comes from an external
//! trust-score source; the perceived distance starts equal to it, grows when a
//! peer is caught supplying false data and decays back over time.

use serde::{Deserialize, Serialize};

/// Factor applied to a peer's perceived distance when it supplied tainted data.
pub const DEFAULT_PUNISHMENT: f64 = 1.5;

/// Our trust relationship with one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub peer: String,
    /// Ground-truth distance from the trust-score source.
    pub real_distance: f64,
    /// Distance after punishment and redemption.
    pub perceived_distance: f64,
}

impl Relationship {
    /// Create a relationship at its real distance.
    pub fn new(peer: impl Into<String>, real_distance: f64) -> Self {
        Self {
            peer: peer.into(),
            real_distance,
            perceived_distance: real_distance,
        }
    }

    /// Worsen trust: perceived = perceived * factor.
    pub fn punish(&mut self, factor: f64) {
        self.perceived_distance *= factor;
    }

    /// Pull trust back toward the real distance:
    /// perceived = fraction * real + (1 - fraction) * perceived
    pub fn redeem(&mut self, fraction: f64) {
        self.perceived_distance =
            fraction * self.real_distance + (1.0 - fraction) * self.perceived_distance;
    }

    /// Update the real distance from the trust-score source, keeping any outstanding punishment.
    pub fn set_real_distance(&mut self, real_distance: f64) {
        if self.perceived_distance < real_distance || self.perceived_distance == self.real_distance {
            self.perceived_distance = real_distance;
        }
        self.real_distance = real_distance;
    }

    /// Whether the peer is trusted enough for exchanges bounded by `max_distance`.
    pub fn within(&self, max_distance: f64) -> bool {
        self.perceived_distance <= max_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punish_strictly_increases() {
        let mut rel = Relationship::new("bob", 2.0);
        rel.punish(DEFAULT_PUNISHMENT);
        assert!(rel.perceived_distance > 2.0);
        assert_eq!(rel.real_distance, 2.0);
    }

    #[test]
    fn test_redeem_converges_without_overshoot() {
        let mut rel = Relationship::new("bob", 2.0);
        rel.punish(4.0);
        let mut previous = rel.perceived_distance;
        for _ in 0..50 {
            rel.redeem(0.1);
            assert!(rel.perceived_distance <= previous);
            assert!(rel.perceived_distance >= rel.real_distance);
            previous = rel.perceived_distance;
        }
        assert!((rel.perceived_distance - 2.0).abs() < 0.05);
    }

    #[test]
    fn test_redeem_at_real_distance_is_stable() {
        let mut rel = Relationship::new("bob", 3.0);
        rel.redeem(0.5);
        assert_eq!(rel.perceived_distance, 3.0);
    }

    #[test]
    fn test_within() {
        let mut rel = Relationship::new("bob", 4.0);
        assert!(rel.within(5.0));
        rel.punish(DEFAULT_PUNISHMENT);
        assert!(!rel.within(5.0));
    }

    #[test]
    fn test_set_real_distance_keeps_punishment() {
        let mut rel = Relationship::new("bob", 2.0);
        rel.set_real_distance(3.0);
        assert_eq!(rel.perceived_distance, 3.0);

        rel.punish(2.0);
        rel.set_real_distance(1.0);
        assert_eq!(rel.perceived_distance, 6.0);
        assert_eq!(rel.real_distance, 1.0);
    }
}
