//! C4 Auto-Upgrade: an orthogonal post-router rewrite that bumps a resolved
//! alias to a stronger one when the request looks demanding enough to
//! warrant it, independent of whatever category/rule matched in C3.
//!
//! Trigger is a union (any one condition is enough): long conversations,
//! heavy tool use, a recent run of failures against the current alias, or
//! (when `signature_upgrade` is set) a thinking-mode request that the
//! mapped alias's targets can satisfy but the original alias's targets
//! cannot.

use crate::config::{AutoUpgradeConfig, RouteTable};
use crate::factors::Factors;

/// Apply auto-upgrade to an already-routed alias.
///
/// `failure_streak` is the number of consecutive classifier failures
/// recorded against `alias` recently (tracked by the caller, not this
/// module); pass `0` when unknown.
pub fn apply(
    config: &AutoUpgradeConfig,
    route_table: &RouteTable,
    alias: &str,
    factors: &Factors,
    failure_streak: u64,
) -> Option<String> {
    if !config.enabled {
        return None;
    }
    let Some(upgraded) = config.mappings.get(alias) else {
        return None;
    };
    if !route_table.contains_alias(upgraded) {
        return None;
    }

    let triggered = config
        .messages_threshold
        .is_some_and(|t| factors.messages_count as u64 >= t)
        || config
            .tools_threshold
            .is_some_and(|t| tool_signal_count(factors) >= t)
        || config
            .failure_streak_threshold
            .is_some_and(|t| failure_streak >= t)
        || (config.signature_upgrade && factors.has_thinking_signature);

    if triggered {
        Some(upgraded.clone())
    } else {
        None
    }
}

fn tool_signal_count(factors: &Factors) -> u64 {
    match factors.tool_profile {
        crate::factors::ToolProfile::None => 0,
        crate::factors::ToolProfile::Read => 1,
        crate::factors::ToolProfile::Explore => 1,
        crate::factors::ToolProfile::Ops => 2,
        crate::factors::ToolProfile::Coding => 2,
        crate::factors::ToolProfile::Multi => 3,
    }
}
