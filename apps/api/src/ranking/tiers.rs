//! Tier Classifier: total score + protection flag → one of six tiers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::scored::Tier;

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("tier thresholds must be finite")]
    NotFinite,
    #[error("tier thresholds must be strictly ascending: {0:?}")]
    NotAscending([f64; 4]),
    #[error("expected 4 comma-separated thresholds, got '{0}'")]
    Malformed(String),
}

/// Lower bounds of the four non-bottom bands. Strictly ascending, so the bands
/// `(-inf, likely_remove)`, `[likely_remove, borderline)`, ... `[definite_keep, inf)`
/// partition the score axis with no gaps or overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierThresholds {
    likely_remove: f64,
    borderline: f64,
    strong_keep: f64,
    definite_keep: f64,
}

impl TierThresholds {
    pub fn new(
        likely_remove: f64,
        borderline: f64,
        strong_keep: f64,
        definite_keep: f64,
    ) -> Result<Self, ThresholdError> {
        let cuts = [likely_remove, borderline, strong_keep, definite_keep];
        if cuts.iter().any(|c| !c.is_finite()) {
            return Err(ThresholdError::NotFinite);
        }
        if cuts.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ThresholdError::NotAscending(cuts));
        }
        Ok(Self {
            likely_remove,
            borderline,
            strong_keep,
            definite_keep,
        })
    }

    /// Parses `"-10,10,30,50"` as used by the `TIER_THRESHOLDS` env var.
    pub fn parse(raw: &str) -> Result<Self, ThresholdError> {
        let parts: Vec<f64> = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| ThresholdError::Malformed(raw.to_string()))?;
        match parts.as_slice() {
            [a, b, c, d] => Self::new(*a, *b, *c, *d),
            _ => Err(ThresholdError::Malformed(raw.to_string())),
        }
    }

    pub fn cuts(&self) -> [f64; 4] {
        [
            self.likely_remove,
            self.borderline,
            self.strong_keep,
            self.definite_keep,
        ]
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            likely_remove: -10.0,
            borderline: 10.0,
            strong_keep: 30.0,
            definite_keep: 50.0,
        }
    }
}

impl<'de> Deserialize<'de> for TierThresholds {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            likely_remove: f64,
            borderline: f64,
            strong_keep: f64,
            definite_keep: f64,
        }
        let raw = Raw::deserialize(deserializer)?;
        Self::new(raw.likely_remove, raw.borderline, raw.strong_keep, raw.definite_keep)
            .map_err(serde::de::Error::custom)
    }
}

pub fn assign_tier(total: f64, is_protected: bool, thresholds: &TierThresholds) -> Tier {
    if is_protected {
        return Tier::Protected;
    }
    if total < thresholds.likely_remove {
        Tier::DefiniteRemove
    } else if total < thresholds.borderline {
        Tier::LikelyRemove
    } else if total < thresholds.strong_keep {
        Tier::Borderline
    } else if total < thresholds.definite_keep {
        Tier::StrongKeep
    } else {
        Tier::DefiniteKeep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_scores() -> Vec<f64> {
        let mut scores: Vec<f64> = (-200..=200).map(|i| i as f64 * 0.5).collect();
        scores.extend([f64::MIN, f64::MAX, -10.0, 10.0, 30.0, 50.0, 9.999_999, 10.000_001]);
        scores
    }

    #[test]
    fn test_default_bands() {
        let t = TierThresholds::default();
        assert_eq!(assign_tier(-50.0, false, &t), Tier::DefiniteRemove);
        assert_eq!(assign_tier(-10.0, false, &t), Tier::LikelyRemove);
        assert_eq!(assign_tier(0.0, false, &t), Tier::LikelyRemove);
        assert_eq!(assign_tier(10.0, false, &t), Tier::Borderline);
        assert_eq!(assign_tier(29.9, false, &t), Tier::Borderline);
        assert_eq!(assign_tier(30.0, false, &t), Tier::StrongKeep);
        assert_eq!(assign_tier(50.0, false, &t), Tier::DefiniteKeep);
    }

    #[test]
    fn test_protection_dominates_every_score() {
        let t = TierThresholds::default();
        for s in sample_scores() {
            assert_eq!(assign_tier(s, true, &t), Tier::Protected);
        }
    }

    #[test]
    fn test_bands_are_monotonic_for_any_valid_thresholds() {
        let configs = [
            TierThresholds::default(),
            TierThresholds::new(-1.0, 0.0, 1.0, 2.0).unwrap(),
            TierThresholds::new(-100.0, -50.0, 75.0, 76.0).unwrap(),
        ];
        let order = |t: Tier| Tier::ALL.iter().position(|x| *x == t).unwrap();
        for t in configs {
            let mut scores = sample_scores();
            scores.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let tiers: Vec<Tier> = scores.iter().map(|s| assign_tier(*s, false, &t)).collect();
            // Never protected without the flag, and never steps backwards.
            assert!(tiers.iter().all(|x| *x != Tier::Protected));
            assert!(tiers.windows(2).all(|w| order(w[0]) <= order(w[1])));
            // Each cut point is the first score of the next band.
            let [a, b, c, d] = t.cuts();
            assert_eq!(assign_tier(a, false, &t), Tier::LikelyRemove);
            assert_eq!(assign_tier(b, false, &t), Tier::Borderline);
            assert_eq!(assign_tier(c, false, &t), Tier::StrongKeep);
            assert_eq!(assign_tier(d, false, &t), Tier::DefiniteKeep);
        }
    }

    #[test]
    fn test_rejects_non_ascending() {
        assert!(matches!(
            TierThresholds::new(0.0, 0.0, 1.0, 2.0),
            Err(ThresholdError::NotAscending(_))
        ));
        assert!(TierThresholds::new(5.0, 1.0, 2.0, 3.0).is_err());
    }

    #[test]
    fn test_rejects_nan() {
        assert_eq!(
            TierThresholds::new(f64::NAN, 1.0, 2.0, 3.0),
            Err(ThresholdError::NotFinite)
        );
    }

    #[test]
    fn test_parse_env_value() {
        let t = TierThresholds::parse(" -5, 5 ,20,40").unwrap();
        assert_eq!(t.cuts(), [-5.0, 5.0, 20.0, 40.0]);
        assert!(TierThresholds::parse("1,2,3").is_err());
        assert!(TierThresholds::parse("a,b,c,d").is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let bad = r#"{"likely_remove": 3, "borderline": 2, "strong_keep": 4, "definite_keep": 5}"#;
        assert!(serde_json::from_str::<TierThresholds>(bad).is_err());
        let good = r#"{"likely_remove": 1, "borderline": 2, "strong_keep": 4, "definite_keep": 5}"#;
        assert!(serde_json::from_str::<TierThresholds>(good).is_ok());
    }
}
