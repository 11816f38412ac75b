//! C8 Response Classifier: maps an upstream HTTP status + error body into an
//! internal failure kind, a cooldown assignment, and a sticky-clear
//! decision (§4.7). Runs only after the full (non-streaming) response, or
//! after SSE stream end — never mid-stream.
//!
//! Precedence is significant and fixed: validation → quota → auth →
//! signature → transient → client → other. Validation and quota are both
//! reported as the `Auth` kind (with a longer, reason-specific cooldown) —
//! the classifier's client-facing taxonomy has only six kinds, per §2/§4.7.
//! A response can match more than one heuristic (e.g. a 429 that also
//! mentions "quota"); the first matching rule in this order wins.

use std::time::Duration;

use serde_json::Value;

use crate::state::CooldownKind;

/// The classifier's client-facing taxonomy (§2, §4.7) is exactly these six
/// kinds — `validation`/`quota` are cooldown *reasons*, not separate kinds;
/// both collapse into `Auth` with a longer cooldown duration than a plain
/// auth failure. `Transient` likewise covers both the "heavy" (429/503) and
/// "light" (everything else in the transient status set) cases; only the
/// cooldown duration differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Success,
    Auth,
    Signature,
    Transient,
    Client,
    Other,
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: FailureKind,
    /// `None` means "success" or "no cooldown warranted" — see §4.7.
    pub cooldown: Option<(CooldownKind, CooldownDuration)>,
    pub clear_sticky: bool,
    /// Ordinary-retry eligibility is narrower than "has a cooldown kind";
    /// `classify` only flags the kinds the retry controller (C10) is
    /// allowed to act on without inspecting status/kind itself again.
    pub retriable_kind: bool,
}

/// Tag for which tunable duration to apply; resolved by the caller against
/// [`crate::config::Tunables`] so this module stays config-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDuration {
    Auth,
    Validation,
    Quota,
    TransientLight,
    TransientHeavy,
    Signature,
}

const VALIDATION_HINTS: &[&str] = &["validation_required", "verify your account", "validation_url"];
const QUOTA_HINTS: &[&str] = &[
    "insufficient_quota",
    "quota exceeded",
    "quote_exceeded",
    "subscription quota",
    "quota limit",
    "quota refresh",
];
const AUTH_HINTS: &[&str] = &["auth_unavailable", "auth_not_found"];
const SIGNATURE_HINTS: &[&str] = &["signature"];
const TRANSIENT_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Classify a completed (non-2xx) upstream response (§4.7). `summary` must
/// already be lower-cased (see [`summarize`]) — this function does no
/// further normalization. `had_thinking_signature` carries whether the
/// originating request already carried a thinking signature, since a
/// `signature` classification requires that context, not just a status code.
pub fn classify(status: u16, summary: &str, had_thinking_signature: bool) -> Classification {
    if (200..300).contains(&status) {
        return Classification { kind: FailureKind::Success, cooldown: None, clear_sticky: false, retriable_kind: false };
    }

    if status == 403 && VALIDATION_HINTS.iter().any(|h| summary.contains(h)) {
        return Classification {
            kind: FailureKind::Auth,
            cooldown: Some((CooldownKind::Validation, CooldownDuration::Validation)),
            clear_sticky: true,
            retriable_kind: true,
        };
    }

    if QUOTA_HINTS.iter().any(|h| summary.contains(h)) {
        return Classification {
            kind: FailureKind::Auth,
            cooldown: Some((CooldownKind::Quota, CooldownDuration::Quota)),
            clear_sticky: true,
            retriable_kind: true,
        };
    }

    if status == 401 || status == 403 || AUTH_HINTS.iter().any(|h| summary.contains(h)) {
        return Classification {
            kind: FailureKind::Auth,
            cooldown: Some((CooldownKind::Auth, CooldownDuration::Auth)),
            clear_sticky: true,
            retriable_kind: true,
        };
    }

    if had_thinking_signature
        && matches!(status, 400 | 422 | 500)
        && SIGNATURE_HINTS.iter().any(|h| summary.contains(h))
    {
        return Classification {
            kind: FailureKind::Signature,
            cooldown: Some((CooldownKind::Signature, CooldownDuration::Signature)),
            clear_sticky: true,
            retriable_kind: false,
        };
    }

    if TRANSIENT_STATUSES.contains(&status) {
        let heavy = status == 429 || status == 503;
        return Classification {
            kind: FailureKind::Transient,
            cooldown: Some(if heavy {
                (CooldownKind::TransientHeavy, CooldownDuration::TransientHeavy)
            } else {
                (CooldownKind::Transient, CooldownDuration::TransientLight)
            }),
            clear_sticky: true,
            retriable_kind: true,
        };
    }

    if status == 400 || status == 422 {
        return Classification { kind: FailureKind::Client, cooldown: None, clear_sticky: false, retriable_kind: false };
    }

    // Other: clear sticky always; cooldown (light) only for 5xx.
    let cooldown = if status >= 500 {
        Some((CooldownKind::Other, CooldownDuration::TransientLight))
    } else {
        None
    };
    Classification { kind: FailureKind::Other, cooldown, clear_sticky: status >= 500, retriable_kind: false }
}

/// Build the lower-cased summary string classification matches against, from
/// `message|code|type|status|reason` and nested `details[].reason|domain`
/// fields of a parsed error body (mirrors the original JS `classifyResponse`).
pub fn summarize(body: &Value) -> String {
    let mut parts = Vec::new();

    if let Some(error) = body.get("error") {
        push_str_field(&mut parts, error, "message");
        push_str_field(&mut parts, error, "code");
        push_str_field(&mut parts, error, "type");
        push_str_field(&mut parts, error, "status");
        push_str_field(&mut parts, error, "reason");
    }
    push_str_field(&mut parts, body, "message");
    push_str_field(&mut parts, body, "code");
    push_str_field(&mut parts, body, "type");
    push_str_field(&mut parts, body, "status");
    push_str_field(&mut parts, body, "reason");

    if let Some(details) = body.get("details").and_then(Value::as_array) {
        for detail in details {
            push_str_field(&mut parts, detail, "reason");
            push_str_field(&mut parts, detail, "domain");
        }
    }

    parts.join(" ").to_lowercase()
}

fn push_str_field(parts: &mut Vec<String>, value: &Value, field: &str) {
    if let Some(s) = value.get(field).and_then(Value::as_str) {
        parts.push(s.to_string());
    }
}

/// Heuristic error-body normalization (§4.6): when the upstream error body
/// is unreadable (decode failure, binary noise), replace it with a
/// client-safe message rather than forwarding raw bytes.
pub fn normalize_error_body(raw: &[u8], is_quota_like: bool) -> Option<String> {
    let looks_binary = raw.starts_with(&[0x1f, 0x8b]) // gzip magic
        || raw.iter().filter(|b| b.is_ascii_control() && **b != b'\n' && **b != b'\t').count() >= 3
        || String::from_utf8_lossy(raw).matches('\u{fffd}').count() >= 3;

    if !looks_binary {
        return None;
    }

    Some(if is_quota_like {
        "upstream quota exhausted; please switch account/key or wait for quota reset".to_string()
    } else {
        "upstream returned unreadable compressed error details".to_string()
    })
}
