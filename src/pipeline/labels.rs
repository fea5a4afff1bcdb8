//! Label decision engine — maps a score to the labels that should be applied.

use crate::config::{LabelNames, Thresholds};
use crate::pipeline::types::Score;
use crate::pipeline::types::category::ORDERS;

/// Pure threshold rules over a [`Score`].
#[derive(Debug, Clone)]
pub struct LabelDecisionEngine {
    thresholds: Thresholds,
    labels: LabelNames,
}

impl LabelDecisionEngine {
    pub fn new(thresholds: Thresholds, labels: LabelNames) -> Self {
        Self { thresholds, labels }
    }

    /// Labels for a message, in application order:
    ///
    /// 1. orders/shipping when the category is `orders`
    /// 2. exactly one importance tier (high, medium, low)
    /// 3. likely-spam when `spam_score >= spam`
    /// 4. needs-review when `confidence < confidence`
    pub fn decide(&self, category: &str, score: &Score) -> Vec<String> {
        let t = &self.thresholds;
        let l = &self.labels;
        let mut decided = Vec::with_capacity(4);

        if category == ORDERS {
            decided.push(l.orders_shipping.clone());
        }

        let tier = if score.importance_score >= t.importance_high {
            &l.high_importance
        } else if score.importance_score >= t.importance_medium {
            &l.medium_importance
        } else {
            &l.low_importance
        };
        decided.push(tier.clone());

        if score.spam_score >= t.spam {
            decided.push(l.likely_spam.clone());
        }

        if score.confidence < t.confidence {
            decided.push(l.needs_review.clone());
        }

        decided
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> LabelDecisionEngine {
        LabelDecisionEngine::new(Thresholds::default(), LabelNames::default())
    }

    fn score(importance: f64, spam: f64, cat: &str, confidence: f64) -> Score {
        Score {
            importance_score: importance,
            spam_score: spam,
            category: cat.into(),
            reasoning: String::new(),
            confidence,
        }
    }

    #[test]
    fn orders_then_medium_tier() {
        let s = score(6.5, 0.0, "orders", 0.8);
        assert_eq!(
            engine().decide(&s.category, &s),
            vec!["EmailScorer/Orders-Shipping", "EmailScorer/Medium-Importance"]
        );
    }

    #[test]
    fn fallback_score_goes_to_review() {
        let s = Score::fallback("empty response");
        assert_eq!(
            engine().decide(&s.category, &s),
            vec!["EmailScorer/Medium-Importance", "EmailScorer/Needs-Review"]
        );
    }

    #[test]
    fn tier_boundaries_are_inclusive() {
        let e = engine();
        let high = score(8.0, 0.0, "work", 0.9);
        let medium = score(5.0, 0.0, "work", 0.9);
        let low = score(4.99, 0.0, "work", 0.9);
        assert_eq!(e.decide("work", &high), vec!["EmailScorer/High-Importance"]);
        assert_eq!(e.decide("work", &medium), vec!["EmailScorer/Medium-Importance"]);
        assert_eq!(e.decide("work", &low), vec!["EmailScorer/Low-Importance"]);
    }

    #[test]
    fn spam_combines_with_tier() {
        let s = score(2.0, 7.0, "promotion", 0.95);
        assert_eq!(
            engine().decide(&s.category, &s),
            vec!["EmailScorer/Low-Importance", "EmailScorer/Likely-Spam"]
        );
    }

    #[test]
    fn review_threshold_is_strict() {
        let e = engine();
        assert_eq!(e.decide("work", &score(9.0, 0.0, "work", 0.6)).len(), 1);
        assert!(
            e.decide("work", &score(9.0, 0.0, "work", 0.59))
                .contains(&"EmailScorer/Needs-Review".to_string())
        );
    }

    #[test]
    fn all_four_rules_can_fire() {
        let s = score(9.0, 8.0, "orders", 0.2);
        assert_eq!(
            engine().decide(&s.category, &s),
            vec![
                "EmailScorer/Orders-Shipping",
                "EmailScorer/High-Importance",
                "EmailScorer/Likely-Spam",
                "EmailScorer/Needs-Review",
            ]
        );
    }

    #[test]
    fn out_of_range_scores_are_tolerated() {
        let e = engine();
        assert_eq!(
            e.decide("work", &score(42.0, -3.0, "work", 1.5)),
            vec!["EmailScorer/High-Importance"]
        );
        assert_eq!(
            e.decide("work", &score(-1.0, 0.0, "work", 0.9)),
            vec!["EmailScorer/Low-Importance"]
        );
    }

    #[test]
    fn decide_is_repeatable() {
        let e = engine();
        for s in [
            score(9.0, 8.0, "orders", 0.2),
            score(5.0, 0.0, "work", 0.6),
            Score::fallback("no JSON found"),
        ] {
            let first = e.decide(&s.category, &s);
            let second = e.decide(&s.category, &s);
            assert_eq!(first, second);
            assert!(!first.is_empty());
        }
    }

    #[test]
    fn category_match_is_exact() {
        let s = score(6.0, 0.0, "Orders", 0.9);
        assert_eq!(
            engine().decide(&s.category, &s),
            vec!["EmailScorer/Medium-Importance"]
        );
    }

    #[test]
    fn custom_thresholds_and_names() {
        let thresholds = Thresholds {
            importance_high: 9.0,
            importance_medium: 6.0,
            spam: 5.0,
            confidence: 0.8,
        };
        let labels = LabelNames {
            medium_importance: "Scorer/Mid".into(),
            likely_spam: "Scorer/Spam".into(),
            ..LabelNames::default()
        };
        let e = LabelDecisionEngine::new(thresholds, labels);
        assert_eq!(
            e.decide("work", &score(8.5, 5.0, "work", 0.9)),
            vec!["Scorer/Mid", "Scorer/Spam"]
        );
    }
}
