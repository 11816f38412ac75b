//! The closed vocabulary of routing decision tags (§9, supplemented from
//! `examples/original_source/codegen/lb_codegen.py`).
//!
//! Every request that reaches the selector records exactly one
//! [`RoutingDecision`], surfaced in the access log and traffic entries so
//! operators can see *why* a target was chosen without re-deriving it from
//! raw factors.

use std::fmt;

/// Why the router/selector picked (or didn't pick) a particular alias/target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// A category signal matched; carries the category name.
    CategoryHit(String),
    /// A threshold rule matched; carries the rule name.
    RuleHit(String),
    /// No category or rule matched; the configured `default_model` was used.
    NoRule,
    /// The router is disabled in config.
    Disabled,
    /// The requested model isn't in `activation_models`, so routing is a no-op.
    NotActivated,
    /// A thinking-mode sticky session locked onto a cross-model signature target.
    ThinkingStickyCrossModelLocked,
    /// The current sticky session's target itself satisfies the thinking lock.
    StickySessionModelThinkingLocked,
    /// No sticky session yet; locked onto the primary thinking-capable target.
    ThinkingPrimaryLocked,
    /// Thinking-primary lock, but no session key was present to stick to.
    ThinkingPrimaryLockedNoSession,
    /// Thinking-primary lock attempted, but every candidate target is cooling down.
    ThinkingPrimaryLockedAllTargetsInCooldown,
    /// A non-thinking sticky session resolved to its previously selected target.
    StickySessionModel,
    /// No sticky session; a target was chosen by weighted-random selection.
    WeightedRandom,
    /// Weighted-random selection ran with no session key to stick for next time.
    WeightedRandomNoSession,
    /// Weighted-random selection found every candidate target cooling down.
    WeightedRandomAllTargetsInCooldown,
    /// The resolved alias had no selectable target at all; fell through to the
    /// gateway's configured default origin.
    DefaultTargetNoSelected,
    /// Signature-group retry recovered the request onto a sibling model;
    /// carries the signature group key (e.g. `"claude"`).
    RetryOnSignatureGroup(String),
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CategoryHit(name) => write!(f, "category_hit_{name}"),
            Self::RuleHit(name) => write!(f, "rule_hit_{name}"),
            Self::NoRule => write!(f, "no_rule"),
            Self::Disabled => write!(f, "disabled"),
            Self::NotActivated => write!(f, "not_activated"),
            Self::ThinkingStickyCrossModelLocked => write!(f, "thinking_sticky_cross_model_locked"),
            Self::StickySessionModelThinkingLocked => {
                write!(f, "sticky_session_model_thinking_locked")
            }
            Self::ThinkingPrimaryLocked => write!(f, "thinking_primary_locked"),
            Self::ThinkingPrimaryLockedNoSession => {
                write!(f, "thinking_primary_locked_no_session")
            }
            Self::ThinkingPrimaryLockedAllTargetsInCooldown => {
                write!(f, "thinking_primary_locked_all_targets_in_cooldown")
            }
            Self::StickySessionModel => write!(f, "sticky_session_model"),
            Self::WeightedRandom => write!(f, "weighted_random"),
            Self::WeightedRandomNoSession => write!(f, "weighted_random_no_session"),
            Self::WeightedRandomAllTargetsInCooldown => {
                write!(f, "weighted_random_all_targets_in_cooldown")
            }
            Self::DefaultTargetNoSelected => write!(f, "default_target_no_selected"),
            Self::RetryOnSignatureGroup(group) => write!(f, "retry_on_signature_group_{group}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_hit_formats_with_name() {
        assert_eq!(
            RoutingDecision::CategoryHit("short-chat".to_string()).to_string(),
            "category_hit_short-chat"
        );
    }

    #[test]
    fn signature_retry_formats_with_group() {
        assert_eq!(
            RoutingDecision::RetryOnSignatureGroup("claude".to_string()).to_string(),
            "retry_on_signature_group_claude"
        );
    }

    #[test]
    fn static_variants_match_vocabulary() {
        assert_eq!(RoutingDecision::NoRule.to_string(), "no_rule");
        assert_eq!(RoutingDecision::NotActivated.to_string(), "not_activated");
        assert_eq!(
            RoutingDecision::WeightedRandomAllTargetsInCooldown.to_string(),
            "weighted_random_all_targets_in_cooldown"
        );
    }
}
