//! C3 Model Router: resolves an incoming `model` alias to a routed alias by
//! evaluating categories (signal-based), then threshold rules
//! (condition-based), then falling back to `default_model`.
//!
//! Pure function over `(&RouterConfig, &Factors)` — no I/O, no shared state,
//! unit-testable in isolation. `route()` never panics on a malformed regex;
//! a `regex` condition/signal that fails to compile is treated as `false`
//! with the failure logged (§4.2), not propagated as an error.

use regex::Regex;
use serde_json::Value;

use crate::config::{CategoryConfig, Condition, ConditionOp, MatchMode, RouteTable, RouterConfig, Signal, SignalKind};
use crate::decision::RoutingDecision;
use crate::factors::{Factors, SystemPromptTag, ToolProfile};

/// Outcome of routing a single request through the category/rule DSL.
pub struct RouteResult {
    pub alias: String,
    pub decision: RoutingDecision,
}

/// Resolve the routed alias for a request.
///
/// `requested_alias` is the `model` field from the request body (or whatever
/// the caller resolved it to already); it is returned unchanged whenever the
/// router is disabled, not activated for this model, or has no matching
/// category/rule/default.
pub fn route(
    config: &RouterConfig,
    route_table: &RouteTable,
    requested_alias: &str,
    factors: &Factors,
) -> RouteResult {
    if !config.enabled {
        return RouteResult {
            alias: requested_alias.to_string(),
            decision: RoutingDecision::Disabled,
        };
    }
    if !config.activation_models.contains(requested_alias) {
        return RouteResult {
            alias: requested_alias.to_string(),
            decision: RoutingDecision::NotActivated,
        };
    }

    for category in &config.categories {
        if category_matches(category, factors) && route_table.contains_alias(&category.target_model) {
            return RouteResult {
                alias: category.target_model.clone(),
                decision: RoutingDecision::CategoryHit(category.name.clone()),
            };
        }
    }

    for rule in &config.rules {
        if rule_matches(rule.match_mode, &rule.when, factors) && route_table.contains_alias(&rule.target_model) {
            return RouteResult {
                alias: rule.target_model.clone(),
                decision: RoutingDecision::RuleHit(rule.name.clone()),
            };
        }
    }

    match &config.default_model {
        Some(default) => RouteResult {
            alias: default.clone(),
            decision: RoutingDecision::NoRule,
        },
        None => RouteResult {
            alias: requested_alias.to_string(),
            decision: RoutingDecision::NoRule,
        },
    }
}

/// Signals within a category scan in order; the first one that matches the
/// request fixes the decision (§4.2) — this is an any-match, not all-match.
fn category_matches(category: &CategoryConfig, factors: &Factors) -> bool {
    category.signals.iter().any(|s| signal_matches(s, factors))
}

fn signal_matches(signal: &Signal, factors: &Factors) -> bool {
    match signal.kind {
        SignalKind::Keyword => compile_regex(&signal.value)
            .map(|re| re.is_match(&factors.full_text))
            .unwrap_or_else(|| {
                tracing::warn!(pattern = %signal.value, "keyword signal regex failed to compile");
                false
            }),
        SignalKind::TaskCategory => {
            factors.task_category.as_deref() == Some(signal.value.as_str())
        }
        SignalKind::ToolProfile => tool_profile_name(factors.tool_profile) == signal.value,
        SignalKind::HasCodeContext => {
            parse_bool(&signal.value).map(|b| b == factors.has_code_context).unwrap_or(false)
        }
        SignalKind::SystemPromptType => factors
            .system_prompt_type
            .iter()
            .any(|tag| system_prompt_tag_name(*tag) == signal.value),
        SignalKind::ConversationDepth => {
            compare_numeric_eq_or_threshold(&signal.value, factors.conversation_depth as f64)
        }
        SignalKind::MessagesCount => {
            compare_numeric_eq_or_threshold(&signal.value, factors.messages_count as f64)
        }
        SignalKind::PromptChars => {
            compare_numeric_eq_or_threshold(&signal.value, factors.prompt_chars as f64)
        }
    }
}

/// Numeric signal values support a leading comparator (`>=40`, `<10`) or a
/// bare number for exact match.
fn compare_numeric_eq_or_threshold(spec: &str, actual: f64) -> bool {
    let spec = spec.trim();
    for (prefix, op) in [
        (">=", ConditionOp::Ge),
        ("<=", ConditionOp::Le),
        (">", ConditionOp::Gt),
        ("<", ConditionOp::Lt),
        ("!=", ConditionOp::Ne),
        ("==", ConditionOp::Eq),
    ] {
        if let Some(rest) = spec.strip_prefix(prefix) {
            return rest
                .trim()
                .parse::<f64>()
                .map(|threshold| apply_numeric_op(op, actual, threshold))
                .unwrap_or(false);
        }
    }
    spec.parse::<f64>().map(|n| (actual - n).abs() < f64::EPSILON).unwrap_or(false)
}

fn apply_numeric_op(op: ConditionOp, lhs: f64, rhs: f64) -> bool {
    match op {
        ConditionOp::Eq => (lhs - rhs).abs() < f64::EPSILON,
        ConditionOp::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        ConditionOp::Lt => lhs < rhs,
        ConditionOp::Le => lhs <= rhs,
        ConditionOp::Gt => lhs > rhs,
        ConditionOp::Ge => lhs >= rhs,
        _ => false,
    }
}

fn tool_profile_name(profile: ToolProfile) -> &'static str {
    match profile {
        ToolProfile::None => "none",
        ToolProfile::Coding => "coding",
        ToolProfile::Read => "read",
        ToolProfile::Explore => "explore",
        ToolProfile::Ops => "ops",
        ToolProfile::Multi => "multi",
    }
}

fn system_prompt_tag_name(tag: SystemPromptTag) -> &'static str {
    match tag {
        SystemPromptTag::PlanMode => "plan_mode",
        SystemPromptTag::Review => "review",
        SystemPromptTag::Long => "long",
        SystemPromptTag::Short => "short",
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn rule_matches(mode: MatchMode, conditions: &[Condition], factors: &Factors) -> bool {
    if conditions.is_empty() {
        return true;
    }
    match mode {
        MatchMode::All => conditions.iter().all(|c| condition_matches(c, factors)),
        MatchMode::Any => conditions.iter().any(|c| condition_matches(c, factors)),
    }
}

fn condition_matches(condition: &Condition, factors: &Factors) -> bool {
    let actual = field_value(&condition.field, factors);
    match condition.op {
        ConditionOp::Exists => !matches!(actual, Value::Null),
        ConditionOp::NotExists => matches!(actual, Value::Null),
        ConditionOp::Regex => {
            let (Some(haystack), Some(pattern)) = (actual.as_str(), condition.value.as_str())
            else {
                return false;
            };
            compile_regex(pattern)
                .map(|re| re.is_match(haystack))
                .unwrap_or_else(|| {
                    tracing::warn!(field = %condition.field, pattern, "rule regex failed to compile");
                    false
                })
        }
        ConditionOp::In => as_array_contains(&condition.value, &actual),
        ConditionOp::NotIn => !as_array_contains(&condition.value, &actual),
        ConditionOp::Contains => match (actual.as_str(), condition.value.as_str()) {
            (Some(haystack), Some(needle)) => haystack.contains(needle),
            _ => false,
        },
        ConditionOp::NotContains => match (actual.as_str(), condition.value.as_str()) {
            (Some(haystack), Some(needle)) => !haystack.contains(needle),
            _ => true,
        },
        ConditionOp::Eq | ConditionOp::Ne | ConditionOp::Lt | ConditionOp::Le | ConditionOp::Gt
        | ConditionOp::Ge => compare_coerced(condition.op, &actual, &condition.value),
    }
}

fn as_array_contains(haystack: &Value, needle: &Value) -> bool {
    haystack.as_array().map(|arr| arr.contains(needle)).unwrap_or(false)
}

/// Field-name → factor-value lookup. Unknown fields yield `Value::Null`,
/// which makes every comparison op except `not_exists` evaluate to `false`.
fn field_value(field: &str, factors: &Factors) -> Value {
    match field {
        "messages_count" => Value::from(factors.messages_count),
        "prompt_chars" => Value::from(factors.prompt_chars),
        "conversation_depth" => Value::from(factors.conversation_depth),
        "has_code_context" => Value::from(factors.has_code_context),
        "thinking_requested" => Value::from(factors.thinking_requested),
        "has_thinking_signature" => Value::from(factors.has_thinking_signature),
        "stream" => Value::from(factors.stream),
        "tool_profile" => Value::from(tool_profile_name(factors.tool_profile)),
        "system_prompt_type" => Value::from(
            factors
                .system_prompt_type
                .iter()
                .map(|tag| system_prompt_tag_name(*tag))
                .collect::<Vec<_>>(),
        ),
        "task_category" => factors.task_category.clone().map(Value::from).unwrap_or(Value::Null),
        "requested_model" => factors.requested_model.clone().map(Value::from).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Type coercion for threshold comparisons (§4.2): numbers compare
/// numerically, everything else compares as its string representation.
fn compare_coerced(op: ConditionOp, actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return apply_numeric_op(op, a, b);
    }
    let a = value_as_string(actual);
    let b = value_as_string(expected);
    match op {
        ConditionOp::Eq => a == b,
        ConditionOp::Ne => a != b,
        ConditionOp::Lt => a < b,
        ConditionOp::Le => a <= b,
        ConditionOp::Gt => a > b,
        ConditionOp::Ge => a >= b,
        _ => false,
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn compile_regex(pattern: &str) -> Option<Regex> {
    Regex::new(pattern).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoryConfig, MatchMode, RuleConfig, TargetConfig, TargetParams};
    use std::collections::{HashMap, HashSet};

    fn route_table_with(aliases: &[&str]) -> RouteTable {
        let mut raw = HashMap::new();
        for alias in aliases {
            raw.insert(
                alias.to_string(),
                vec![TargetConfig {
                    backend_url: "https://example".to_string(),
                    upstream_model: "model".to_string(),
                    weight: 1,
                    provider_tag: None,
                    provider_instance: None,
                    params: TargetParams::default(),
                }],
            );
        }
        RouteTable::build(raw).unwrap()
    }

    fn base_config() -> RouterConfig {
        RouterConfig {
            enabled: true,
            shadow_only: false,
            log_factors: false,
            activation_models: HashSet::from(["auto".to_string()]),
            default_model: Some("auto".to_string()),
            categories: vec![],
            rules: vec![],
            auto_upgrade: crate::config::AutoUpgradeConfig {
                enabled: false,
                mappings: Default::default(),
                messages_threshold: None,
                tools_threshold: None,
                failure_streak_threshold: None,
                signature_upgrade: false,
            },
        }
    }

    fn factors_with_text(text: &str) -> Factors {
        let mut factors = crate::factors::extract(&serde_json::json!({}));
        factors.full_text = text.to_string();
        factors
    }

    #[test]
    fn disabled_router_passes_through() {
        let mut config = base_config();
        config.enabled = false;
        let table = route_table_with(&["auto"]);
        let result = route(&config, &table, "auto", &factors_with_text(""));
        assert_eq!(result.alias, "auto");
        assert_eq!(result.decision, RoutingDecision::Disabled);
    }

    #[test]
    fn unactivated_model_passes_through() {
        let config = base_config();
        let table = route_table_with(&["auto"]);
        let result = route(&config, &table, "gpt-4", &factors_with_text(""));
        assert_eq!(result.decision, RoutingDecision::NotActivated);
    }

    #[test]
    fn category_signal_keyword_match_wins() {
        let mut config = base_config();
        config.categories.push(CategoryConfig {
            name: "refactor".to_string(),
            priority: 10,
            target_model: "claude-opus".to_string(),
            signals: vec![Signal { kind: SignalKind::Keyword, value: "(?i)refactor".to_string() }],
        });
        let table = route_table_with(&["auto", "claude-opus"]);
        let result = route(&config, &table, "auto", &factors_with_text("please refactor this"));
        assert_eq!(result.alias, "claude-opus");
        assert_eq!(result.decision, RoutingDecision::CategoryHit("refactor".to_string()));
    }

    #[test]
    fn rule_threshold_match_with_all_mode() {
        let mut config = base_config();
        config.rules.push(RuleConfig {
            name: "deep-context".to_string(),
            priority: 5,
            target_model: "claude-opus".to_string(),
            match_mode: MatchMode::All,
            when: vec![Condition {
                field: "messages_count".to_string(),
                op: ConditionOp::Ge,
                value: serde_json::json!(10),
            }],
        });
        let mut factors = factors_with_text("");
        factors.messages_count = 12;
        let table = route_table_with(&["auto", "claude-opus"]);
        let result = route(&config, &table, "auto", &factors);
        assert_eq!(result.alias, "claude-opus");
        assert_eq!(result.decision, RoutingDecision::RuleHit("deep-context".to_string()));
    }

    #[test]
    fn falls_back_to_default_model() {
        let config = base_config();
        let table = route_table_with(&["auto"]);
        let result = route(&config, &table, "auto", &factors_with_text("anything"));
        assert_eq!(result.alias, "auto");
        assert_eq!(result.decision, RoutingDecision::NoRule);
    }

    #[test]
    fn invalid_regex_signal_does_not_match_and_does_not_panic() {
        let mut config = base_config();
        config.categories.push(CategoryConfig {
            name: "bad".to_string(),
            priority: 1,
            target_model: "x".to_string(),
            signals: vec![Signal { kind: SignalKind::Keyword, value: "(unterminated".to_string() }],
        });
        let table = route_table_with(&["auto", "x"]);
        let result = route(&config, &table, "auto", &factors_with_text("anything"));
        assert_eq!(result.decision, RoutingDecision::NoRule);
    }

    #[test]
    fn category_hit_rejected_when_target_model_missing_from_route_table() {
        let mut config = base_config();
        config.categories.push(CategoryConfig {
            name: "refactor".to_string(),
            priority: 10,
            target_model: "claude-opus".to_string(),
            signals: vec![Signal { kind: SignalKind::Keyword, value: "(?i)refactor".to_string() }],
        });
        let table = route_table_with(&["auto"]);
        let result = route(&config, &table, "auto", &factors_with_text("please refactor this"));
        assert_eq!(result.alias, "auto");
        assert_eq!(result.decision, RoutingDecision::NoRule);
    }

    #[test]
    fn category_signal_is_any_not_all() {
        let mut config = base_config();
        config.categories.push(CategoryConfig {
            name: "either".to_string(),
            priority: 10,
            target_model: "claude-opus".to_string(),
            signals: vec![
                Signal { kind: SignalKind::TaskCategory, value: "never-matches".to_string() },
                Signal { kind: SignalKind::Keyword, value: "(?i)refactor".to_string() },
            ],
        });
        let table = route_table_with(&["auto", "claude-opus"]);
        let result = route(&config, &table, "auto", &factors_with_text("please refactor this"));
        assert_eq!(result.alias, "claude-opus");
    }

    #[test]
    fn rule_with_empty_when_is_vacuously_true() {
        let mut config = base_config();
        config.rules.push(RuleConfig {
            name: "catch-all".to_string(),
            priority: 1,
            target_model: "claude-opus".to_string(),
            match_mode: MatchMode::All,
            when: vec![],
        });
        let table = route_table_with(&["auto", "claude-opus"]);
        let result = route(&config, &table, "auto", &factors_with_text("anything"));
        assert_eq!(result.alias, "claude-opus");
        assert_eq!(result.decision, RoutingDecision::RuleHit("catch-all".to_string()));
    }

    #[test]
    fn categories_take_priority_over_rules() {
        let mut config = base_config();
        config.categories.push(CategoryConfig {
            name: "cat".to_string(),
            priority: 1,
            target_model: "cat-model".to_string(),
            signals: vec![Signal { kind: SignalKind::TaskCategory, value: "quick".to_string() }],
        });
        config.rules.push(RuleConfig {
            name: "rule".to_string(),
            priority: 100,
            target_model: "rule-model".to_string(),
            match_mode: MatchMode::Any,
            when: vec![Condition {
                field: "stream".to_string(),
                op: ConditionOp::Eq,
                value: serde_json::json!(false),
            }],
        });
        let mut factors = factors_with_text("");
        factors.task_category = Some("quick".to_string());
        let table = route_table_with(&["auto", "cat-model", "rule-model"]);
        let result = route(&config, &table, "auto", &factors);
        assert_eq!(result.alias, "cat-model");
    }
}
