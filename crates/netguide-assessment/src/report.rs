//! Report materializer: fetches the report of a completed session and turns
//! it into markup that is safe to display.

use std::fmt;
use std::sync::{Arc, LazyLock};

use netguide_core::types::SessionStatus;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AssessmentError;
use crate::extract::{parse_embedded_json, strip_code_fences};
use crate::service::ReasoningService;
use crate::synchronizer::LedgerSynchronizer;

/// Fields that may hold the report, in lookup order. `output.html` is
/// reached by descending into `output`.
const REPORT_KEYS: &[&str] = &["html", "output", "report", "result", "data", "content"];

const MAX_UNWRAP_DEPTH: usize = 8;

// =============================================================================
// Compiled patterns
// =============================================================================

struct MarkupPatterns {
    body: Regex,
    head: Regex,
    document_shell: Regex,
    style: Regex,
    script: Regex,
    page_break_element: Regex,
    page_break_comment: Regex,
}

static MARKUP_PATTERNS: LazyLock<MarkupPatterns> = LazyLock::new(|| {
    let mk = |pat: &str| Regex::new(pat).expect("Invalid markup regex");
    MarkupPatterns {
        body: mk(r"(?is)<body\b[^>]*>(.*?)</body\s*>"),
        head: mk(r"(?is)<head\b[^>]*>.*?</head\s*>"),
        document_shell: mk(r"(?i)<!doctype[^>]*>|</?html\b[^>]*>|</?body\b[^>]*>"),
        style: mk(r"(?is)<style\b[^>]*>.*?</style\s*>"),
        script: mk(r"(?is)<script\b[^>]*>.*?</script\s*>"),
        // Empty or void marker elements only; containers that carry a
        // page-break style keep their content and closing tag.
        page_break_element: mk(concat!(
            r"(?is)<div\b[^>]*page-break[^>]*>\s*</div\s*>",
            r"|<span\b[^>]*page-break[^>]*>\s*</span\s*>",
            r"|<p\b[^>]*page-break[^>]*>\s*</p\s*>",
            r"|<(?:div|span|p)\b[^>]*page-break[^>]*/>",
            r"|<(?:hr|br)\b[^>]*page-break[^>]*/?>",
        )),
        page_break_comment: mk(r"(?is)<!--\s*page[-_ ]?break\s*-->"),
    }
});

/// Report markup with fences, document shell, styles, scripts and page-break
/// markers removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedMarkup(String);

impl SanitizedMarkup {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap the markup into a minimal standalone HTML document.
    pub fn to_document(&self, title: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
            escape_html(title),
            self.0
        )
    }
}

impl fmt::Display for SanitizedMarkup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct ReportMaterializer {
    synchronizer: Arc<LedgerSynchronizer>,
    service: Arc<dyn ReasoningService>,
}

impl ReportMaterializer {
    pub fn new(synchronizer: Arc<LedgerSynchronizer>, service: Arc<dyn ReasoningService>) -> Self {
        Self {
            synchronizer,
            service,
        }
    }

    /// Fetch and sanitize the report of a completed session.
    pub async fn materialize(&self, session_id: Uuid) -> Result<SanitizedMarkup, AssessmentError> {
        let session = self.synchronizer.session(session_id).await?;
        if session.status != SessionStatus::Completed {
            return Err(AssessmentError::SessionIncomplete(session_id));
        }

        let payload = self.service.fetch_report(session_id).await?;
        let markup = sanitize_report(&payload)?;
        info!(session_id = %session_id, bytes = markup.as_str().len(), "Report materialized");
        Ok(markup)
    }
}

/// Unwrap a loosely-typed report payload and sanitize its markup.
pub fn sanitize_report(payload: &Value) -> Result<SanitizedMarkup, AssessmentError> {
    let raw = unwrap_payload(payload, 0).ok_or(AssessmentError::EmptyReport)?;
    let markup = sanitize_markup(&raw);
    if markup.is_empty() {
        return Err(AssessmentError::EmptyReport);
    }
    Ok(SanitizedMarkup(markup))
}

/// Find the report text inside the payload. `None` means the payload is
/// empty; unrecognized shapes render as text.
fn unwrap_payload(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_UNWRAP_DEPTH {
        return Some(value.to_string());
    }
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => {
            let trimmed = strip_code_fences(s.trim());
            let trimmed = trimmed.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                if let Some(parsed) = parse_embedded_json(trimmed) {
                    debug!(depth, "Report string held JSON");
                    return unwrap_payload(&parsed, depth + 1);
                }
            }
            Some(trimmed.to_string())
        }
        Value::Array(items) => items.first().and_then(|first| unwrap_payload(first, depth + 1)),
        Value::Object(map) => {
            if map.is_empty() {
                return None;
            }
            let known: Vec<&Value> = REPORT_KEYS.iter().filter_map(|k| map.get(*k)).collect();
            if known.is_empty() {
                return serde_json::to_string_pretty(value).ok();
            }
            known
                .into_iter()
                .find_map(|child| unwrap_payload(child, depth + 1))
        }
    }
}

fn sanitize_markup(raw: &str) -> String {
    let patterns = &*MARKUP_PATTERNS;
    let text = strip_code_fences(raw.trim());

    let inner = match patterns.body.captures(&text).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str().to_string(),
        None => {
            let without_head = patterns.head.replace_all(&text, "");
            patterns
                .document_shell
                .replace_all(&without_head, "")
                .into_owned()
        }
    };

    let cleaned = patterns.style.replace_all(&inner, "");
    let cleaned = patterns.script.replace_all(&cleaned, "");
    let cleaned = patterns.page_break_element.replace_all(&cleaned, "");
    let cleaned = patterns.page_break_comment.replace_all(&cleaned, "");
    cleaned.trim().to_string()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
