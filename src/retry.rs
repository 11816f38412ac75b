//! C10 Retry Controller: decides whether a failed attempt should be retried
//! against another target within the same request (§4.9), either as an
//! ordinary same-alias retry or, once per request, as a cross-alias
//! signature-group recovery.

use crate::classify::{Classification, FailureKind};
use crate::config::{RouteTable, Target, TargetIdentity, Tunables};
use crate::decision::RoutingDecision;
use crate::state::StateStore;

/// Per-request retry bookkeeping, owned by the request pipeline — not
/// shared across requests or tasks (§9 Design Notes).
#[derive(Debug, Default)]
pub struct RetryState {
    pub retry_count: u32,
    pub tried_targets: std::collections::HashSet<TargetIdentity>,
    pub signature_recovery_used: bool,
}

/// Whether to attempt an ordinary retry against the same alias's remaining
/// targets (§4.9). Requires: not SSE, POST method, under the retry budget,
/// an auth/transient classification, and — for auth — either a 401/403
/// status or `retry_auth_on_5xx` with a 5xx status. Never retries once any
/// response bytes have reached the client.
pub fn should_retry_ordinary(
    classification: &Classification,
    is_post: bool,
    is_sse: bool,
    status: u16,
    retry_state: &RetryState,
    tunables: &Tunables,
    headers_sent: bool,
) -> bool {
    if headers_sent || is_sse || !is_post {
        return false;
    }
    if retry_state.retry_count >= tunables.max_target_retries {
        return false;
    }
    match classification.kind {
        FailureKind::Auth => {
            status == 401 || status == 403 || (tunables.retry_auth_on_5xx && status >= 500)
        }
        FailureKind::Transient => true,
        _ => false,
    }
}

/// Pick the next untried target within `alias`, excluding targets already
/// attempted this request. Returns `None` when every target has been tried
/// (the caller should give up and respond to the client).
pub fn next_target(route_table: &RouteTable, alias: &str, retry_state: &RetryState) -> Option<Target> {
    route_table
        .targets(alias)
        .iter()
        .find(|t| !retry_state.tried_targets.contains(&t.identity()))
        .cloned()
}

/// Attempt cross-alias signature-group recovery (§4.9, once per request):
/// on a `signature` classification, find another alias whose targets share
/// the request's signature group and pick its highest-weight available
/// target. `group` is extracted from the request body's own thinking
/// signature (the prefix before `#`, see
/// [`crate::factors::extract_thinking_signature_group`]) — not derived from
/// the failing target's model name, which only feeds the RouteTable's
/// reverse `group → aliases` index.
pub fn attempt_signature_recovery(
    route_table: &RouteTable,
    state: &StateStore,
    group: &str,
    current_alias: &str,
    retry_state: &RetryState,
) -> Option<(String, Target, RoutingDecision)> {
    if retry_state.signature_recovery_used {
        return None;
    }
    let candidate_aliases = route_table.aliases_for_signature_group(group);

    let mut best: Option<(String, Target)> = None;
    for alias in candidate_aliases {
        if alias == current_alias {
            continue;
        }
        let targets = route_table.targets(alias);
        let pick = targets
            .iter()
            .filter(|t| !state.is_cooling_down(alias, &t.identity()) && !retry_state.tried_targets.contains(&t.identity()))
            .max_by_key(|t| t.weight);
        if let Some(pick) = pick {
            let better = best.as_ref().map(|(_, b)| pick.weight > b.weight).unwrap_or(true);
            if better {
                best = Some((alias.clone(), pick.clone()));
            }
        }
    }

    best.map(|(alias, target)| (alias, target, RoutingDecision::RetryOnSignatureGroup(group.to_string())))
}
