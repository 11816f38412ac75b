//! C5 Target Selector: picks a concrete [`Target`] from an alias's target
//! pool, honoring thinking-mode signature locks, session stickiness, and
//! weighted-random load balancing (§4.4).
//!
//! Three independent concerns stack here:
//! 1. **Thinking lock** — once a session starts a thinking-mode
//!    conversation, every subsequent turn must stay within the same
//!    signature group (switching models mid-thinking-conversation breaks
//!    the provider's continuation semantics), picked by
//!    [`crate::config::signature_group_of`].
//! 2. **Stickiness** — non-thinking sessions prefer their previous target
//!    when it's still healthy, for cache-locality on the provider side.
//! 3. **Weighted random** — the fallback/default distribution policy,
//!    roulette-wheel over `weight`.

use rand::Rng;

use crate::config::{RouteTable, Target, TargetIdentity};
use crate::decision::RoutingDecision;
use crate::state::StateStore;

pub struct SelectionResult {
    /// `None` means no target could be selected at all — the caller should
    /// fall back to the gateway's configured default origin.
    pub target: Option<Target>,
    /// The alias actually used for this attempt — equal to the resolved
    /// alias passed into [`select`] except under a cross-model thinking
    /// lock (§4.4), where it's overridden to the locked alias.
    pub chosen_alias: String,
    pub decision: RoutingDecision,
    /// When `Some`, the caller should persist this sticky binding after a
    /// successful forward.
    pub sticky_update: Option<StickyUpdate>,
}

pub struct StickyUpdate {
    pub session_key: String,
    pub alias: String,
    pub target: TargetIdentity,
    pub thinking_locked: bool,
}

pub fn select(
    route_table: &RouteTable,
    state: &StateStore,
    alias: &str,
    thinking_requested: bool,
    session_key: Option<&str>,
) -> SelectionResult {
    if thinking_requested {
        if let Some(key) = session_key {
            // Pre-step (§4.4): scan every alias's sticky slot for this
            // session, ignoring cooldown — the first live thinking-locked
            // entry wins, overriding the router's resolved alias outright.
            if let Some((sticky_alias, sticky_identity)) = state.find_thinking_locked_sticky(key) {
                if sticky_alias != alias {
                    if let Some(target) = route_table
                        .targets(&sticky_alias)
                        .iter()
                        .find(|t| t.identity() == sticky_identity)
                    {
                        return SelectionResult {
                            target: Some(target.clone()),
                            chosen_alias: sticky_alias.clone(),
                            decision: RoutingDecision::ThinkingStickyCrossModelLocked,
                            sticky_update: Some(StickyUpdate {
                                session_key: key.to_string(),
                                alias: sticky_alias,
                                target: sticky_identity,
                                thinking_locked: true,
                            }),
                        };
                    }
                }
            }
        }
    }

    let targets = route_table.targets(alias);
    if targets.is_empty() {
        return SelectionResult {
            target: None,
            chosen_alias: alias.to_string(),
            decision: RoutingDecision::DefaultTargetNoSelected,
            sticky_update: None,
        };
    }

    let available: Vec<&Target> =
        targets.iter().filter(|t| !state.is_cooling_down(alias, &t.identity())).collect();

    if thinking_requested {
        select_thinking(state, alias, targets, &available, session_key)
    } else {
        select_non_thinking(alias, targets, &available, session_key, state)
    }
}

fn select_thinking(
    state: &StateStore,
    alias: &str,
    targets: &[Target],
    available: &[&Target],
    session_key: Option<&str>,
) -> SelectionResult {
    if let Some(key) = session_key {
        if let Some((sticky_identity, thinking_locked)) = state.get_sticky(key, alias) {
            if thinking_locked {
                if let Some(target) = targets.iter().find(|t| t.identity() == sticky_identity) {
                    return SelectionResult {
                        target: Some(target.clone()),
                        chosen_alias: alias.to_string(),
                        decision: RoutingDecision::StickySessionModelThinkingLocked,
                        sticky_update: Some(StickyUpdate {
                            session_key: key.to_string(),
                            alias: alias.to_string(),
                            target: sticky_identity,
                            thinking_locked: true,
                        }),
                    };
                }
            }
        }
    }
    pick_primary_thinking(alias, targets, available, session_key)
}

/// Primary target = highest weight, ties broken by declaration order.
fn pick_primary_thinking(
    alias: &str,
    targets: &[Target],
    available: &[&Target],
    session_key: Option<&str>,
) -> SelectionResult {
    let (pool, all_cooling) = if available.is_empty() {
        (targets.iter().collect::<Vec<_>>(), true)
    } else {
        (available.to_vec(), false)
    };

    let primary = pool.iter().max_by_key(|t| t.weight).copied();
    let Some(primary) = primary else {
        return SelectionResult {
            target: None,
            chosen_alias: alias.to_string(),
            decision: RoutingDecision::DefaultTargetNoSelected,
            sticky_update: None,
        };
    };

    let decision = if all_cooling {
        RoutingDecision::ThinkingPrimaryLockedAllTargetsInCooldown
    } else if session_key.is_none() {
        RoutingDecision::ThinkingPrimaryLockedNoSession
    } else {
        RoutingDecision::ThinkingPrimaryLocked
    };

    let sticky_update = session_key.map(|key| StickyUpdate {
        session_key: key.to_string(),
        alias: alias.to_string(),
        target: primary.identity(),
        thinking_locked: true,
    });

    SelectionResult { target: Some(primary.clone()), chosen_alias: alias.to_string(), decision, sticky_update }
}

fn select_non_thinking(
    alias: &str,
    targets: &[Target],
    available: &[&Target],
    session_key: Option<&str>,
    state: &StateStore,
) -> SelectionResult {
    if let Some(key) = session_key {
        if let Some((sticky_identity, _)) = state.get_sticky(key, alias) {
            if let Some(target) = available.iter().find(|t| t.identity() == sticky_identity) {
                return SelectionResult {
                    target: Some((*target).clone()),
                    chosen_alias: alias.to_string(),
                    decision: RoutingDecision::StickySessionModel,
                    sticky_update: Some(StickyUpdate {
                        session_key: key.to_string(),
                        alias: alias.to_string(),
                        target: sticky_identity,
                        thinking_locked: false,
                    }),
                };
            }
        }
    }

    weighted_random(alias, targets, available, session_key)
}

fn weighted_random(
    alias: &str,
    targets: &[Target],
    available: &[&Target],
    session_key: Option<&str>,
) -> SelectionResult {
    let (pool, all_cooling) = if available.is_empty() {
        (targets.iter().collect::<Vec<_>>(), true)
    } else {
        (available.to_vec(), false)
    };
    if pool.is_empty() {
        return SelectionResult {
            target: None,
            chosen_alias: alias.to_string(),
            decision: RoutingDecision::DefaultTargetNoSelected,
            sticky_update: None,
        };
    }

    let total_weight: u64 = pool.iter().map(|t| t.weight.max(1) as u64).sum();
    let mut cursor = rand::thread_rng().gen_range(0..total_weight.max(1));
    let mut chosen = *pool.last().unwrap();
    for target in &pool {
        let w = target.weight.max(1) as u64;
        if cursor < w {
            chosen = target;
            break;
        }
        cursor -= w;
    }

    let decision = if all_cooling {
        RoutingDecision::WeightedRandomAllTargetsInCooldown
    } else if session_key.is_none() {
        RoutingDecision::WeightedRandomNoSession
    } else {
        RoutingDecision::WeightedRandom
    };

    let sticky_update = session_key.map(|key| StickyUpdate {
        session_key: key.to_string(),
        alias: alias.to_string(),
        target: chosen.identity(),
        thinking_locked: false,
    });

    SelectionResult { target: Some(chosen.clone()), chosen_alias: alias.to_string(), decision, sticky_update }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RouteTable, TargetConfig, TargetParams};
    use std::collections::HashMap;
    use std::time::Duration;

    fn table_with(targets: Vec<TargetConfig>) -> RouteTable {
        let mut raw = HashMap::new();
        raw.insert("auto".to_string(), targets);
        RouteTable::build(raw).unwrap()
    }

    fn target_cfg(url: &str, model: &str, weight: u32) -> TargetConfig {
        TargetConfig {
            backend_url: url.to_string(),
            upstream_model: model.to_string(),
            weight,
            provider_tag: None,
            provider_instance: None,
            params: TargetParams::default(),
        }
    }

    #[test]
    fn empty_alias_falls_back_to_default() {
        let table = RouteTable::default();
        let state = StateStore::new();
        let result = select(&table, &state, "missing", false, None);
        assert!(result.target.is_none());
        assert_eq!(result.decision, RoutingDecision::DefaultTargetNoSelected);
    }

    #[test]
    fn non_thinking_no_session_uses_weighted_random_no_session_tag() {
        let table = table_with(vec![target_cfg("https://a", "claude-x", 1)]);
        let state = StateStore::new();
        let result = select(&table, &state, "auto", false, None);
        assert!(result.target.is_some());
        assert_eq!(result.decision, RoutingDecision::WeightedRandomNoSession);
        assert!(result.sticky_update.is_none());
    }

    #[test]
    fn non_thinking_sticky_session_reuses_prior_target() {
        let table = table_with(vec![
            target_cfg("https://a", "claude-x", 1),
            target_cfg("https://b", "claude-y", 1),
        ]);
        let state = StateStore::new();
        let first = select(&table, &state, "auto", false, Some("session-1"));
        let update = first.sticky_update.expect("should propose a sticky update");
        state.set_sticky(
            update.session_key.clone(),
            update.alias.clone(),
            update.target.clone(),
            update.thinking_locked,
            Duration::from_secs(60),
            500,
        );

        let second = select(&table, &state, "auto", false, Some("session-1"));
        assert_eq!(second.decision, RoutingDecision::StickySessionModel);
        assert_eq!(second.target.unwrap().identity(), update.target);
    }

    #[test]
    fn thinking_no_session_locks_to_primary_without_sticky_update() {
        let table = table_with(vec![
            target_cfg("https://a", "claude-x", 5),
            target_cfg("https://b", "claude-y", 1),
        ]);
        let state = StateStore::new();
        let result = select(&table, &state, "auto", true, None);
        assert_eq!(result.decision, RoutingDecision::ThinkingPrimaryLockedNoSession);
        assert_eq!(result.target.unwrap().backend_url, "https://a");
    }

    #[test]
    fn thinking_session_locks_and_persists() {
        let table = table_with(vec![
            target_cfg("https://a", "claude-x", 5),
            target_cfg("https://b", "claude-y", 1),
        ]);
        let state = StateStore::new();
        let first = select(&table, &state, "auto", true, Some("session-2"));
        assert_eq!(first.decision, RoutingDecision::ThinkingPrimaryLocked);
        let update = first.sticky_update.unwrap();
        state.set_sticky(
            update.session_key.clone(),
            update.alias.clone(),
            update.target.clone(),
            true,
            Duration::from_secs(60),
            500,
        );

        let second = select(&table, &state, "auto", true, Some("session-2"));
        assert_eq!(second.decision, RoutingDecision::StickySessionModelThinkingLocked);
    }

    #[test]
    fn all_targets_in_cooldown_still_selects_via_fallback() {
        let table = table_with(vec![target_cfg("https://a", "claude-x", 1)]);
        let state = StateStore::new();
        let identity = table.targets("auto")[0].identity();
        state.set_cooldown("auto", identity, crate::state::CooldownKind::Auth, Duration::from_secs(60));

        let result = select(&table, &state, "auto", false, Some("session-3"));
        assert_eq!(result.decision, RoutingDecision::WeightedRandomAllTargetsInCooldown);
        assert!(result.target.is_some());
    }

    #[test]
    fn thinking_cross_model_lock_overrides_resolved_alias() {
        let mut raw = HashMap::new();
        raw.insert(
            "auto".to_string(),
            vec![target_cfg("https://a", "claude-opus-4", 1)],
        );
        raw.insert(
            "strong".to_string(),
            vec![target_cfg("https://b", "claude-sonnet-4-5", 1)],
        );
        let table = RouteTable::build(raw).unwrap();
        let state = StateStore::new();

        let sticky_identity = table.targets("strong")[0].identity();
        state.set_sticky(
            "session-4".to_string(),
            "strong".to_string(),
            sticky_identity,
            true,
            Duration::from_secs(60),
            500,
        );

        let result = select(&table, &state, "auto", true, Some("session-4"));
        assert_eq!(result.decision, RoutingDecision::ThinkingStickyCrossModelLocked);
        assert_eq!(result.chosen_alias, "strong");
        assert_eq!(result.target.unwrap().backend_url, "https://b");
    }
}
