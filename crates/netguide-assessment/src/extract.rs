//! Reply extraction: turns loosely-typed service replies into a question or
//! a completion verdict.
//!
//! Replies are inspected through a tagged [`ReplyShape`] view and decoded by
//! an ordered chain of fallible strategies. The first strategy yielding a
//! non-empty question wins:
//!
//! 1. direct field (`question`, `next_question`, `output`, ...)
//! 2. nested field (objects/arrays under the same keys or `result`/`data`)
//! 3. first element of an array
//! 4. fenced or embedded JSON inside a string
//! 5. first non-empty line of a string

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Nesting depth at which extraction gives up.
const MAX_DEPTH: usize = 6;

/// Keys that may directly hold the next question.
const QUESTION_KEYS: &[&str] = &[
    "question",
    "next_question",
    "nextQuestion",
    "generatedResponse",
    "output",
    "response",
    "message",
    "text",
    "content",
];

/// Keys that may wrap the real payload one level down.
const CONTAINER_KEYS: &[&str] = &["result", "data", "questions", "payload"];

const COMPLETION_FLAG_KEYS: &[&str] = &[
    "done",
    "complete",
    "completed",
    "is_complete",
    "isComplete",
    "finished",
];

const ANALYSIS_KEYS: &[&str] = &["analysis", "assessment_analysis", "assessmentAnalysis"];

/// Weaker analysis keys, consulted only when no candidate has one of
/// [`ANALYSIS_KEYS`].
const FALLBACK_ANALYSIS_KEYS: &[&str] = &["results", "result"];

const COMPLETION_WRAPPER_KEYS: &[&str] = &["output", "result", "data"];

// =============================================================================
// Compiled patterns
// =============================================================================

static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("Invalid fenced block regex")
});

static LEADING_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*```[A-Za-z0-9_-]*[ \t]*\r?\n?").expect("Invalid leading fence regex")
});

static TRAILING_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n?```\s*$").expect("Invalid trailing fence regex"));

static LIST_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*\u{2022}]\s+|\d+[.)]\s+)").expect("Invalid list marker regex")
});

// =============================================================================
// ReplyShape
// =============================================================================

/// Tagged view over a loosely-typed reply.
#[derive(Debug, Clone, Copy)]
pub enum ReplyShape<'a> {
    Text(&'a str),
    Object(&'a Map<String, Value>),
    List(&'a [Value]),
    /// Null, booleans and numbers never carry a question.
    Scalar,
}

impl<'a> ReplyShape<'a> {
    pub fn of(value: &'a Value) -> Self {
        match value {
            Value::String(s) => ReplyShape::Text(s),
            Value::Object(map) => ReplyShape::Object(map),
            Value::Array(items) => ReplyShape::List(items),
            _ => ReplyShape::Scalar,
        }
    }
}

type Strategy = fn(ReplyShape<'_>, usize) -> Option<String>;

/// The extraction chain, in priority order.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("direct_field", direct_field),
    ("nested_field", nested_field),
    ("first_element", first_element),
    ("embedded_json", embedded_json),
    ("first_line", first_line),
];

/// Extract the next question from a service reply.
///
/// Returns `None` when no strategy yields a non-empty question; the caller
/// falls back to the positional default prompt.
pub fn extract_question(reply: &Value) -> Option<String> {
    extract_at(reply, 0)
}

fn extract_at(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_DEPTH {
        return None;
    }
    let shape = ReplyShape::of(value);
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let found = strategy(shape, depth)?;
        tracing::trace!(strategy = *name, depth, "Question extracted");
        Some(found)
    })
}

fn direct_field(shape: ReplyShape<'_>, depth: usize) -> Option<String> {
    let ReplyShape::Object(map) = shape else {
        return None;
    };
    QUESTION_KEYS.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(s)) => question_from_text(s, depth + 1),
        _ => None,
    })
}

fn nested_field(shape: ReplyShape<'_>, depth: usize) -> Option<String> {
    let ReplyShape::Object(map) = shape else {
        return None;
    };
    QUESTION_KEYS
        .iter()
        .chain(CONTAINER_KEYS)
        .find_map(|key| match map.get(*key) {
            Some(child @ (Value::Object(_) | Value::Array(_))) => extract_at(child, depth + 1),
            _ => None,
        })
}

fn first_element(shape: ReplyShape<'_>, depth: usize) -> Option<String> {
    let ReplyShape::List(items) = shape else {
        return None;
    };
    items.iter().find_map(|item| extract_at(item, depth + 1))
}

fn embedded_json(shape: ReplyShape<'_>, depth: usize) -> Option<String> {
    let ReplyShape::Text(text) = shape else {
        return None;
    };
    let parsed = parse_embedded_json(text)?;
    // A bare JSON string would only re-enter this strategy.
    if parsed.is_string() {
        return parsed.as_str().and_then(first_meaningful_line);
    }
    extract_at(&parsed, depth + 1)
}

fn first_line(shape: ReplyShape<'_>, _depth: usize) -> Option<String> {
    let ReplyShape::Text(text) = shape else {
        return None;
    };
    first_meaningful_line(text)
}

/// Strings run through the JSON strategy first, then the line strategy.
fn question_from_text(text: &str, depth: usize) -> Option<String> {
    extract_at(&Value::String(text.to_string()), depth)
}

fn first_meaningful_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .map(clean_question)
        .find(|q| !q.is_empty())
}

fn clean_question(line: &str) -> String {
    let line = LIST_MARKER_RE.replace(line, "");
    line.trim()
        .trim_matches(['"', '\''])
        .trim()
        .to_string()
}

// =============================================================================
// Fenced / embedded JSON
// =============================================================================

/// Remove a leading and a trailing code-fence marker, if present.
pub fn strip_code_fences(text: &str) -> String {
    let without_leading = LEADING_FENCE_RE.replace(text, "");
    TRAILING_FENCE_RE.replace(&without_leading, "").into_owned()
}

/// Parse JSON from a string that may wrap it in a markdown fence or in
/// surrounding prose.
pub fn parse_embedded_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(caps) = FENCED_BLOCK_RE.captures(trimmed) {
        if let Some(body) = caps.get(1) {
            if let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim()) {
                return Some(value);
            }
        }
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') || trimmed.starts_with('"') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Some(value);
        }
    }

    let mut spans: Vec<(usize, &str)> = [('[', ']'), ('{', '}')]
        .iter()
        .filter_map(|(open, close)| embedded_span(trimmed, *open, *close))
        .collect();
    spans.sort_by_key(|(start, _)| *start);
    spans
        .into_iter()
        .find_map(|(_, span)| serde_json::from_str::<Value>(span).ok())
}

fn embedded_span(text: &str, open: char, close: char) -> Option<(usize, &str)> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| (start, &text[start..=end]))
}

// =============================================================================
// Completion
// =============================================================================

/// The verdict decoded from a `done` reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionReply {
    /// A truthy completion flag was found.
    pub complete: bool,
    /// Non-empty analysis object, if one was found.
    pub analysis: Option<Value>,
    /// Recommendations taken from the analysis or the reply's top level.
    pub recommendations: Option<Value>,
}

impl CompletionReply {
    /// Decode a completion reply. Never fails: unusable replies decode to a
    /// verdict with `complete == false` or `analysis == None`.
    pub fn parse(reply: &Value) -> Self {
        let candidates = completion_candidates(reply, 0);
        let mut verdict = CompletionReply {
            complete: candidates.iter().any(has_completion_flag),
            analysis: candidates
                .iter()
                .find_map(|c| find_analysis(c, ANALYSIS_KEYS))
                .or_else(|| {
                    candidates
                        .iter()
                        .find_map(|c| find_analysis(c, FALLBACK_ANALYSIS_KEYS))
                }),
            recommendations: candidates
                .iter()
                .find_map(|c| non_null(c.get("recommendations"))),
        };

        if let Some(Value::Object(analysis)) = &verdict.analysis {
            if let Some(recs) = non_null(analysis.get("recommendations")) {
                verdict.recommendations = Some(recs);
            }
        }
        verdict
    }

    /// Both a completion flag and a usable analysis are present.
    pub fn is_usable(&self) -> bool {
        self.complete && self.analysis.is_some()
    }
}

/// Objects that may carry the completion verdict: the reply itself and the
/// payload under the usual wrapper keys, with JSON-in-string unwrapped.
fn completion_candidates(reply: &Value, depth: usize) -> Vec<Map<String, Value>> {
    if depth > MAX_DEPTH {
        return Vec::new();
    }
    match ReplyShape::of(reply) {
        ReplyShape::Object(map) => {
            let mut found = vec![map.clone()];
            for key in COMPLETION_WRAPPER_KEYS {
                if let Some(child) = map.get(*key) {
                    if child.is_object() || child.is_string() {
                        found.extend(completion_candidates(child, depth + 1));
                    }
                }
            }
            found
        }
        ReplyShape::Text(text) => parse_embedded_json(text)
            .filter(|v| !v.is_string())
            .map(|v| completion_candidates(&v, depth + 1))
            .unwrap_or_default(),
        ReplyShape::List(items) => items
            .first()
            .map(|first| completion_candidates(first, depth + 1))
            .unwrap_or_default(),
        ReplyShape::Scalar => Vec::new(),
    }
}

fn has_completion_flag(map: &Map<String, Value>) -> bool {
    let flagged = COMPLETION_FLAG_KEYS
        .iter()
        .any(|key| map.get(*key).is_some_and(is_truthy));
    let status_done = map
        .get("status")
        .and_then(Value::as_str)
        .map(|s| {
            let s = s.trim().to_ascii_lowercase();
            s == "done" || s == "completed" || s == "complete"
        })
        .unwrap_or(false);
    flagged || status_done
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}

fn find_analysis(map: &Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::Object(obj) if !obj.is_empty() => Some(Value::Object(obj.clone())),
        Value::String(s) => match parse_embedded_json(s)? {
            Value::Object(obj) if !obj.is_empty() => Some(Value::Object(obj)),
            _ => None,
        },
        _ => None,
    })
}

fn non_null(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| !v.is_null()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =====================================================================
    // Question extraction
    // =====================================================================

    #[test]
    fn test_direct_field() {
        let reply = json!({"question": "How do mornings usually go?"});
        assert_eq!(
            extract_question(&reply).as_deref(),
            Some("How do mornings usually go?")
        );
    }

    #[test]
    fn test_direct_field_priority() {
        let reply = json!({"output": "From output", "question": "From question"});
        assert_eq!(extract_question(&reply).as_deref(), Some("From question"));
    }

    #[test]
    fn test_nested_field() {
        let reply = json!({"result": {"output": {"generatedResponse": "Nested?"}}});
        assert_eq!(extract_question(&reply).as_deref(), Some("Nested?"));
    }

    #[test]
    fn test_first_element_of_array() {
        let reply = json!(["First?", "Second?"]);
        assert_eq!(extract_question(&reply).as_deref(), Some("First?"));

        let reply = json!({"questions": [{"question": "Q-a"}, {"question": "Q-b"}]});
        assert_eq!(extract_question(&reply).as_deref(), Some("Q-a"));
    }

    #[test]
    fn test_fenced_json_array_in_string() {
        let reply = json!("```json\n[\"Q1\",\"Q2\"]\n```");
        assert_eq!(extract_question(&reply).as_deref(), Some("Q1"));
    }

    #[test]
    fn test_fenced_json_inside_field() {
        let reply = json!({"output": "Here you go:\n```json\n{\"question\": \"Inner?\"}\n```"});
        assert_eq!(extract_question(&reply).as_deref(), Some("Inner?"));
    }

    #[test]
    fn test_embedded_json_without_fence() {
        let reply = json!("Sure! {\"next_question\": \"What helps at school?\"} Thanks.");
        assert_eq!(
            extract_question(&reply).as_deref(),
            Some("What helps at school?")
        );
    }

    #[test]
    fn test_first_non_empty_line() {
        let reply = json!("\n\n  What calms them down?  \nSecond line");
        assert_eq!(
            extract_question(&reply).as_deref(),
            Some("What calms them down?")
        );
    }

    #[test]
    fn test_list_markers_and_quotes_are_stripped() {
        assert_eq!(
            extract_question(&json!("1. \"Which subjects feel easiest?\"")).as_deref(),
            Some("Which subjects feel easiest?")
        );
        assert_eq!(
            extract_question(&json!("- Bullet?")).as_deref(),
            Some("Bullet?")
        );
    }

    #[test]
    fn test_braces_in_prose_fall_back_to_line() {
        let reply = json!("Tell me about {their} week.");
        assert_eq!(
            extract_question(&reply).as_deref(),
            Some("Tell me about {their} week.")
        );
    }

    #[test]
    fn test_nothing_extractable() {
        assert_eq!(extract_question(&json!(null)), None);
        assert_eq!(extract_question(&json!(42)), None);
        assert_eq!(extract_question(&json!({})), None);
        assert_eq!(extract_question(&json!([])), None);
        assert_eq!(extract_question(&json!("   \n  ")), None);
        assert_eq!(extract_question(&json!({"question": ""})), None);
        assert_eq!(extract_question(&json!("```\n```")), None);
    }

    #[test]
    fn test_deeply_nested_reply_gives_up() {
        let mut reply = json!({"question": "Too deep?"});
        for _ in 0..20 {
            reply = json!({"data": reply});
        }
        assert_eq!(extract_question(&reply), None);
    }

    #[test]
    fn test_reply_shape_tags() {
        assert!(matches!(ReplyShape::of(&json!("x")), ReplyShape::Text("x")));
        assert!(matches!(ReplyShape::of(&json!({})), ReplyShape::Object(_)));
        assert!(matches!(ReplyShape::of(&json!([1])), ReplyShape::List(_)));
        assert!(matches!(ReplyShape::of(&json!(true)), ReplyShape::Scalar));
    }

    // =====================================================================
    // Fences
    // =====================================================================

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```html\n<p>Hi</p>\n```"), "<p>Hi</p>");
        assert_eq!(strip_code_fences("<p>Hi</p>"), "<p>Hi</p>");
        assert_eq!(strip_code_fences("```\n<p>Hi</p>"), "<p>Hi</p>");
    }

    #[test]
    fn test_parse_embedded_json_prefers_earliest_block() {
        assert_eq!(
            parse_embedded_json("answer: [1, 2] and {\"a\": 1}"),
            Some(json!([1, 2]))
        );
        assert_eq!(
            parse_embedded_json("see {\"a\": [1]} here"),
            Some(json!({"a": [1]}))
        );
        assert_eq!(parse_embedded_json("no json here"), None);
    }

    // =====================================================================
    // Completion
    // =====================================================================

    #[test]
    fn test_completion_with_flag_and_analysis() {
        let reply = json!({
            "done": true,
            "analysis": {"summary": "Strong verbal reasoning", "recommendations": ["Extra time"]}
        });
        let verdict = CompletionReply::parse(&reply);
        assert!(verdict.is_usable());
        assert_eq!(verdict.analysis.unwrap()["summary"], "Strong verbal reasoning");
        assert_eq!(verdict.recommendations, Some(json!(["Extra time"])));
    }

    #[test]
    fn test_completion_status_done_and_alternate_keys() {
        let reply = json!({"status": "completed", "assessmentAnalysis": {"score": 2}});
        let verdict = CompletionReply::parse(&reply);
        assert!(verdict.is_usable());
        assert_eq!(verdict.analysis, Some(json!({"score": 2})));
    }

    #[test]
    fn test_completion_wrapped_in_output_string() {
        let reply = json!({
            "output": "```json\n{\"isComplete\": \"true\", \"results\": {\"focus\": \"low\"}}\n```",
            "recommendations": ["Short breaks"]
        });
        let verdict = CompletionReply::parse(&reply);
        assert!(verdict.is_usable());
        assert_eq!(verdict.analysis, Some(json!({"focus": "low"})));
        assert_eq!(verdict.recommendations, Some(json!(["Short breaks"])));
    }

    #[test]
    fn test_analysis_recommendations_win_over_top_level() {
        let reply = json!({
            "complete": 1,
            "recommendations": ["top"],
            "analysis": {"recommendations": ["inner"]}
        });
        let verdict = CompletionReply::parse(&reply);
        assert_eq!(verdict.recommendations, Some(json!(["inner"])));
    }

    #[test]
    fn test_explicit_analysis_key_beats_result_wrapper() {
        let reply = json!({"done": true, "result": {"analysis": {"summary": "inner"}}});
        let verdict = CompletionReply::parse(&reply);
        assert_eq!(verdict.analysis, Some(json!({"summary": "inner"})));

        let reply = json!({"done": true, "result": {"summary": "bare"}});
        let verdict = CompletionReply::parse(&reply);
        assert_eq!(verdict.analysis, Some(json!({"summary": "bare"})));
    }

    #[test]
    fn test_completion_without_flag_is_not_usable() {
        let verdict = CompletionReply::parse(&json!({"analysis": {"summary": "x"}}));
        assert!(!verdict.complete);
        assert!(!verdict.is_usable());
    }

    #[test]
    fn test_completion_with_empty_analysis_is_not_usable() {
        let verdict = CompletionReply::parse(&json!({"done": true, "analysis": {}}));
        assert!(verdict.complete);
        assert!(verdict.analysis.is_none());
        assert!(!verdict.is_usable());
    }

    #[test]
    fn test_completion_garbage() {
        for reply in [json!(null), json!("plain text"), json!([]), json!(false)] {
            assert_eq!(CompletionReply::parse(&reply), CompletionReply::default());
        }
    }
}
