//! Percentage-based traffic splitting.
//!
//! Split rules are evaluated before the config's selection policy. The first
//! rule whose condition matches draws a uniform percentile and walks the
//! rule's cumulative percentages; a draw beyond the rule's total, or a hit on
//! an unavailable backend, falls through to normal policy selection so split
//! traffic degrades gracefully instead of erroring.

use std::sync::Arc;

use rand::Rng;

use crate::config::{RuleCondition, TrafficSplitRule};
use crate::core::Backend;
use crate::policies::RequestContext;

/// Whether a rule's condition matches the request. No condition matches all.
pub fn condition_matches(condition: Option<&RuleCondition>, ctx: &RequestContext) -> bool {
    let Some(condition) = condition else {
        return true;
    };

    if let Some(prefix) = &condition.path_prefix {
        if !ctx.path.starts_with(prefix.as_str()) {
            return false;
        }
    }
    if let Some((name, expected)) = &condition.header {
        let matched = ctx
            .headers
            .get(name.as_str())
            .and_then(|v| v.to_str().ok())
            .map(|v| v == expected)
            .unwrap_or(false);
        if !matched {
            return false;
        }
    }
    true
}

/// Evaluate split rules against a request.
///
/// Returns the backend chosen by the first matching rule, or `None` when no
/// rule matched, the draw fell into the fall-through share, or the chosen
/// backend cannot take traffic.
pub fn select_split_backend(
    rules: &[TrafficSplitRule],
    backends: &[Arc<Backend>],
    ctx: &RequestContext,
) -> Option<Arc<Backend>> {
    let rule = rules
        .iter()
        .find(|rule| condition_matches(rule.condition.as_ref(), ctx))?;

    pick_from_rule(rule, backends, rand::rng().random_range(0..100))
}

/// Deterministic core of rule evaluation: map a percentile draw in 0..100 to
/// a rule target.
fn pick_from_rule(
    rule: &TrafficSplitRule,
    backends: &[Arc<Backend>],
    draw: u32,
) -> Option<Arc<Backend>> {
    let mut cumulative = 0u32;
    for (id, &percentage) in rule.backends.iter().zip(&rule.percentages) {
        cumulative += percentage;
        if draw < cumulative {
            return backends
                .iter()
                .find(|b| b.id() == id && b.is_available())
                .cloned();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::test_backend;

    fn rule(backends: &[&str], percentages: &[u32]) -> TrafficSplitRule {
        TrafficSplitRule {
            id: "r1".to_string(),
            condition: None,
            backends: backends.iter().map(|s| s.to_string()).collect(),
            percentages: percentages.to_vec(),
        }
    }

    #[test]
    fn test_draw_maps_to_cumulative_ranges() {
        let backends = vec![test_backend("b1"), test_backend("b2")];
        let r = rule(&["b1", "b2"], &[30, 70]);

        assert_eq!(pick_from_rule(&r, &backends, 0).unwrap().id(), "b1");
        assert_eq!(pick_from_rule(&r, &backends, 29).unwrap().id(), "b1");
        assert_eq!(pick_from_rule(&r, &backends, 30).unwrap().id(), "b2");
        assert_eq!(pick_from_rule(&r, &backends, 99).unwrap().id(), "b2");
    }

    #[test]
    fn test_partial_split_falls_through() {
        let backends = vec![test_backend("b1")];
        let r = rule(&["b1"], &[10]);

        assert!(pick_from_rule(&r, &backends, 9).is_some());
        assert!(pick_from_rule(&r, &backends, 10).is_none());
        assert!(pick_from_rule(&r, &backends, 99).is_none());
    }

    #[test]
    fn test_unavailable_target_falls_through() {
        let backends = vec![test_backend("b1")];
        backends[0].set_healthy(false);
        let r = rule(&["b1"], &[100]);

        assert!(pick_from_rule(&r, &backends, 50).is_none());
    }

    #[test]
    fn test_path_prefix_condition() {
        let condition = RuleCondition {
            path_prefix: Some("/api/v2".to_string()),
            header: None,
        };
        assert!(condition_matches(
            Some(&condition),
            &RequestContext::new("/api/v2/users")
        ));
        assert!(!condition_matches(
            Some(&condition),
            &RequestContext::new("/api/v1/users")
        ));
    }

    #[test]
    fn test_header_condition() {
        let condition = RuleCondition {
            path_prefix: None,
            header: Some(("x-canary".to_string(), "true".to_string())),
        };
        let hit = RequestContext::new("/").with_header("x-canary", "true");
        let miss_value = RequestContext::new("/").with_header("x-canary", "false");
        let miss_absent = RequestContext::new("/");

        assert!(condition_matches(Some(&condition), &hit));
        assert!(!condition_matches(Some(&condition), &miss_value));
        assert!(!condition_matches(Some(&condition), &miss_absent));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let backends = vec![test_backend("b1"), test_backend("b2")];
        let mut first = rule(&["b1"], &[100]);
        first.condition = Some(RuleCondition {
            path_prefix: Some("/api".to_string()),
            header: None,
        });
        let second = rule(&["b2"], &[100]);
        let rules = vec![first, second];

        let ctx = RequestContext::new("/api/x");
        let picked = select_split_backend(&rules, &backends, &ctx).unwrap();
        assert_eq!(picked.id(), "b1");

        let ctx = RequestContext::new("/other");
        let picked = select_split_backend(&rules, &backends, &ctx).unwrap();
        assert_eq!(picked.id(), "b2");
    }

    #[test]
    fn test_split_ratio_over_many_draws() {
        let backends = vec![test_backend("b1"), test_backend("b2")];
        let r = rule(&["b1", "b2"], &[25, 75]);
        let rules = vec![r];
        let ctx = RequestContext::new("/");

        let mut b1 = 0;
        for _ in 0..2000 {
            if select_split_backend(&rules, &backends, &ctx).unwrap().id() == "b1" {
                b1 += 1;
            }
        }
        // 25% +/- generous tolerance.
        assert!((300..=700).contains(&b1), "b1 got {b1} of 2000");
    }
}
