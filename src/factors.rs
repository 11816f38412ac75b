//! C2 Factor Extractor: a pure function from a parsed chat-completion request
//! body to a [`Factors`] record. No I/O, no shared state — every field here
//! is derived solely from the JSON body, which makes this module trivial to
//! unit test exhaustively and safe to call speculatively (e.g. in shadow
//! mode, §4.1) without side effects.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse bucket describing what kind of tools (if any) a request declares.
/// `Coding` dominates `Read` when a tool list carries both (a coding tool
/// implies read access too); any other overlap of two or more categories
/// collapses to `Multi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolProfile {
    /// No `tools` array, or an empty one, or no declared tool name matched
    /// any known category.
    None,
    /// Edit/write/patch-style tools (`edit`, `write`, `apply_patch`, names
    /// containing `update`/`create`/`insert`/`replace`/`code`).
    Coding,
    /// Read-only tools (`read`, `glob`, `grep`, `find`, names starting with
    /// `search` or containing `list`/`query`/`fetch`) with no coding tool
    /// present.
    Read,
    /// Task/research tools (`task`, `websearch`, `webfetch`, names
    /// containing `browse`/`crawl`/`research`).
    Explore,
    /// Shell/deploy tools (`bash`, `shell`, `terminal`, `exec_command`,
    /// `write_stdin`, names containing `git`/`deploy`/`pm2`).
    Ops,
    /// Two or more of the above categories present at once.
    Multi,
}

/// A tag describing one aspect of the request's system prompt. The full
/// `system_prompt_type` factor is a set of these, not a single bucket — a
/// system prompt can be e.g. both `review` and `long` at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPromptTag {
    /// Mentions plan mode (`plan mode`, `plan_mode`, `enterplanmode`).
    PlanMode,
    /// Mentions review/audit (`review`, `audit`, `code review`).
    Review,
    /// System prompt text longer than 5000 characters.
    Long,
    /// System prompt text no longer than 500 characters.
    Short,
}

/// Derived signals used by the category/rule DSL (C3) and the auto-upgrade
/// trigger (C4). Entirely derived from the request body — no state-store or
/// network access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factors {
    pub requested_model: Option<String>,
    pub stream: bool,
    pub messages_count: usize,
    pub prompt_chars: usize,
    /// Equal to `messages_count` (the original's `buildModelRouterFactors`
    /// aliases the two) — kept as a distinct field since the signal DSL and
    /// threshold rules address it under its own name.
    pub conversation_depth: usize,
    pub has_code_context: bool,
    pub tool_profile: ToolProfile,
    /// Tags describing the system prompt; a prompt can carry any subset of
    /// [`SystemPromptTag`] at once (e.g. `review` and `long` together).
    pub system_prompt_type: Vec<SystemPromptTag>,
    pub thinking_requested: bool,
    /// Whether any prior message already carries a non-empty `thinking`
    /// block signature — distinct from `thinking_requested`, which only
    /// asks whether *this* call asked for thinking mode. A conversation
    /// already carrying a signature must stay pinned to its signature
    /// group even on a turn that doesn't request thinking itself.
    pub has_thinking_signature: bool,
    /// Task category for the `task_category:` signal: the caller-supplied
    /// hint (`body.task_category` or `body.metadata.task_category`) when
    /// present, else a keyword classification of the last user turn via
    /// [`classify_task_category`].
    pub task_category: Option<String>,
    /// Concatenation of every message's text content, used for `keyword:`
    /// signal regex matching. Not persisted; transient to the request.
    pub full_text: String,
}

/// Extract routing factors from a parsed request body. Tolerant of missing
/// or malformed fields — absence just yields the "no signal" value rather
/// than an error, since factor extraction must never block forwarding.
pub fn extract(body: &Value) -> Factors {
    let requested_model = body.get("model").and_then(Value::as_str).map(str::to_owned);
    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let thinking_requested = detect_thinking(body);
    let has_thinking_signature = detect_thinking_signature(body);

    let messages = body.get("messages").and_then(Value::as_array);
    let mut prompt_chars = 0usize;
    let mut messages_count = 0usize;
    let mut full_text = String::new();

    if let Some(messages) = messages {
        messages_count = messages.len();
        for message in messages {
            let text = message_text(message);
            prompt_chars += text.chars().count();
            full_text.push_str(&text);
            full_text.push('\n');
        }
    }
    let conversation_depth = messages_count;
    let has_code_context = detect_code_context(messages);

    let system_prompt_type = system_prompt_tags(body, messages);
    let tool_profile = tool_profile(body);
    let task_category = body
        .get("task_category")
        .or_else(|| body.get("metadata").and_then(|m| m.get("task_category")))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| Some(classify_task_category(last_user_text(messages).as_deref().unwrap_or(""))));

    Factors {
        requested_model,
        stream,
        messages_count,
        prompt_chars,
        conversation_depth,
        has_code_context,
        tool_profile,
        system_prompt_type,
        thinking_requested,
        has_thinking_signature,
        task_category,
        full_text,
    }
}

fn message_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Scans only the last 5 messages for a code-shaped pattern (fenced block,
/// import/require, a `class`/`function`/`def` declaration). Mirrors the
/// original `detectCodeContext(body)`'s bounded-window contract exactly —
/// older messages in a long conversation don't count.
fn detect_code_context(messages: Option<&Vec<Value>>) -> bool {
    let Some(messages) = messages else { return false };
    let code_pattern =
        Regex::new(r"```|import\s+|require\s*\(|from\s+\S+\s+import|class\s+\w+|function\s+\w+|def\s+\w+")
            .expect("static code-context pattern is valid");
    let start = messages.len().saturating_sub(5);
    messages[start..].iter().any(|message| {
        let text = message_text(message);
        !text.is_empty() && code_pattern.is_match(&text)
    })
}

/// Derives the system-prompt tag set from `body.system` (string or array of
/// text blocks) plus any `role: "system"` message, matching the original
/// `classifySystemPromptType(body)` exactly: `plan_mode`/`review` by keyword,
/// `long`/`short` by character-count thresholds on the same concatenated text.
fn system_prompt_tags(body: &Value, messages: Option<&Vec<Value>>) -> Vec<SystemPromptTag> {
    let mut text = String::new();
    match body.get("system") {
        Some(Value::String(s)) => text.push_str(s),
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(s) => text.push_str(s),
                    _ => {
                        if let Some(t) = item.get("text").and_then(Value::as_str) {
                            text.push_str(t);
                        }
                    }
                }
            }
        }
        _ => {}
    }
    if let Some(messages) = messages {
        for message in messages {
            if message.get("role").and_then(Value::as_str) == Some("system") {
                if let Some(s) = message.get("content").and_then(Value::as_str) {
                    text.push_str(s);
                }
            }
        }
    }
    if text.is_empty() {
        return Vec::new();
    }

    let lower = text.to_lowercase();
    let mut tags = Vec::new();
    if lower.contains("plan mode") || lower.contains("plan_mode") || lower.contains("enterplanmode") {
        tags.push(SystemPromptTag::PlanMode);
    }
    if lower.contains("review") || lower.contains("audit") || lower.contains("code review") {
        tags.push(SystemPromptTag::Review);
    }
    let len = text.chars().count();
    if len > 5000 {
        tags.push(SystemPromptTag::Long);
    }
    if len <= 500 {
        tags.push(SystemPromptTag::Short);
    }
    tags
}

/// Classifies the request's declared tools into a [`ToolProfile`], matching
/// the original `classifyToolProfile(body)`: collect every tool's name from
/// `function.name`/`name`/`type`, then bucket by pattern, with `coding`
/// dominating `read` and any other multi-category overlap collapsing to
/// `multi`.
fn tool_profile(body: &Value) -> ToolProfile {
    let Some(tools) = body.get("tools").and_then(Value::as_array) else {
        return ToolProfile::None;
    };
    if tools.is_empty() {
        return ToolProfile::None;
    }

    let mut names: std::collections::HashSet<String> = std::collections::HashSet::new();
    for tool in tools {
        for candidate in tool_name_candidates(tool) {
            let normalized = candidate.trim().to_lowercase();
            if !normalized.is_empty() {
                names.insert(normalized);
            }
        }
    }
    if names.is_empty() {
        return ToolProfile::None;
    }

    let has_coding = names.iter().any(|n| {
        matches!(n.as_str(), "edit" | "write" | "notebookedit" | "apply_patch")
            || ["update", "create", "insert", "replace", "code"].iter().any(|h| n.contains(h))
    });
    let has_read = names.iter().any(|n| {
        matches!(n.as_str(), "read" | "glob" | "grep" | "find")
            || n.starts_with("search")
            || ["list", "query", "fetch"].iter().any(|h| n.contains(h))
    });
    let has_explore = names.iter().any(|n| {
        matches!(n.as_str(), "task" | "websearch" | "webfetch")
            || ["browse", "crawl", "research"].iter().any(|h| n.contains(h))
    });
    let has_ops = names.iter().any(|n| {
        matches!(n.as_str(), "bash" | "shell" | "terminal" | "exec_command" | "write_stdin")
            || ["git", "deploy", "pm2"].iter().any(|h| n.contains(h))
    });

    let mut categories = Vec::new();
    if has_coding {
        categories.push(ToolProfile::Coding);
    }
    if has_read && !has_coding {
        categories.push(ToolProfile::Read);
    }
    if has_explore {
        categories.push(ToolProfile::Explore);
    }
    if has_ops {
        categories.push(ToolProfile::Ops);
    }

    match categories.len() {
        0 => ToolProfile::None,
        1 => categories[0],
        _ => ToolProfile::Multi,
    }
}

fn tool_name_candidates(tool: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(name) = tool.get("function").and_then(|f| f.get("name")).and_then(Value::as_str) {
        out.push(name.to_string());
    }
    if let Some(name) = tool.get("name").and_then(Value::as_str) {
        out.push(name.to_string());
    }
    if let Some(kind) = tool.get("type").and_then(Value::as_str) {
        out.push(kind.to_string());
    }
    out
}

fn last_user_text(messages: Option<&Vec<Value>>) -> Option<String> {
    messages?
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        .map(message_text)
}

const GREETING_HINTS: &[&str] = &["hi", "hello", "hey", "thanks", "thank you", "yo", "sup", "ok", "cool"];

/// Fixed-priority keyword classification of the last user turn into a coarse
/// task category (architecture > code-review > visual-coding > coding >
/// explore > ops > quick > unknown), used when the caller hasn't supplied an
/// explicit `task_category` hint via `body.task_category`/`body.metadata.task_category`.
pub fn classify_task_category(text: &str) -> String {
    let lower = text.to_lowercase();
    let trimmed = lower.trim();

    const BUCKETS: &[(&str, &[&str])] = &[
        ("architecture", &["architecture", "system design", "design doc", "high-level design", "scalab"]),
        ("code-review", &["code review", "review this pr", "review my code", "pull request", "diff review"]),
        ("visual-coding", &["css", "layout", "component", "frontend", "react", "design this screen", "ui for"]),
        ("coding", &["```", "function", "stack trace", "implement", "refactor", "compile", "exception", "bug in"]),
        ("explore", &["what is", "explain", "how does", "why does", "tell me about"]),
        ("ops", &["deploy", "kubernetes", "docker", "pipeline", "infrastructure", "terraform", "ci/cd"]),
    ];

    for (name, hints) in BUCKETS {
        if hints.iter().any(|h| trimmed.contains(h)) {
            return name.to_string();
        }
    }

    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    if trimmed.chars().count() <= 20 && GREETING_HINTS.iter().any(|h| trimmed.contains(h)) {
        return "quick".to_string();
    }

    "unknown".to_string()
}

/// Derive the request's session key (§3/§4.4): prefer `body.metadata.user_id`,
/// else the first of `x-session-id` / `x-conversation-id` /
/// `anthropic-conversation-id` that carries a non-empty value. Each candidate
/// is tagged with its source so two different clients can't collide on the
/// same raw value from different fields.
pub fn session_key(headers: &http::HeaderMap, body: &Value) -> Option<String> {
    if let Some(user_id) = body.pointer("/metadata/user_id").and_then(Value::as_str) {
        let trimmed = user_id.trim();
        if !trimmed.is_empty() {
            return Some(format!("metadata:{trimmed}"));
        }
    }
    const HEADER_CANDIDATES: &[&str] = &["x-session-id", "x-conversation-id", "anthropic-conversation-id"];
    for name in HEADER_CANDIDATES {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(format!("{name}:{trimmed}"));
            }
        }
    }
    None
}

/// Hash a session key down to a short, opaque identifier for the model
/// health map (§3), so raw session identifiers never sit in memory twice.
pub fn hash_session_key(session_key: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(session_key.as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

fn detect_thinking(body: &Value) -> bool {
    if let Some(thinking) = body.get("thinking") {
        if let Some(t) = thinking.as_str() {
            return t != "disabled" && t != "off";
        }
        if thinking.get("type").and_then(Value::as_str) == Some("enabled") {
            return true;
        }
        if thinking.is_object() {
            return true;
        }
    }
    if let Some(effort) = body.get("reasoning_effort").and_then(Value::as_str) {
        return effort != "none" && effort != "minimal";
    }
    false
}

/// Whether any message already carries a `thinking`-typed content block
/// with a non-empty `signature` string. Mirrors the original
/// `hasThinkingSignature(body)`: a prior turn's signature, not this turn's
/// requested thinking level, is what must stay pinned to a signature group.
fn detect_thinking_signature(body: &Value) -> bool {
    let Some(messages) = body.get("messages").and_then(Value::as_array) else {
        return false;
    };
    messages.iter().any(|message| {
        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            return false;
        };
        blocks.iter().any(|block| {
            block.get("type").and_then(Value::as_str) == Some("thinking")
                && block
                    .get("signature")
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.is_empty())
        })
    })
}

/// Extract the signature group (prefix before the first `#`) from the most
/// recent `thinking` block signature found in `body.messages`. Returns
/// `None` when no message carries a thinking signature at all. Mirrors the
/// original `extractThinkingSignatureGroup(body)`; this is the lookup key
/// used at cross-alias signature recovery time (§4.9), distinct from
/// [`crate::config::signature_group_of`], which groups by *target model
/// name* when building the route table's reverse index.
pub fn extract_thinking_signature_group(body: &Value) -> Option<String> {
    let messages = body.get("messages").and_then(Value::as_array)?;
    let mut found = None;
    for message in messages {
        let Some(blocks) = message.get("content").and_then(Value::as_array) else { continue };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("thinking") {
                continue;
            }
            if let Some(sig) = block.get("signature").and_then(Value::as_str) {
                if !sig.is_empty() {
                    found = Some(sig.to_string());
                }
            }
        }
    }
    found.map(|sig| sig.split('#').next().unwrap_or("").to_string())
}
