//! Backend error documents.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Sentinel classification of a backend error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    NotFound,
    Unauthorized,
    Forbidden,
    BadRequest,
    Opaque,
}

// Exact, case-insensitive matches only.
const CODE_TABLE: &[(&str, ApiErrorKind)] = &[
    ("NOT_FOUND", ApiErrorKind::NotFound),
    ("NOT_AUTHORIZED", ApiErrorKind::Unauthorized),
    ("UNAUTHORIZED", ApiErrorKind::Unauthorized),
    ("FORBIDDEN", ApiErrorKind::Forbidden),
    ("FORBIDDEN_ERROR", ApiErrorKind::Forbidden),
    ("BAD_REQUEST", ApiErrorKind::BadRequest),
    ("PARAMETER_ERROR.INVALID", ApiErrorKind::BadRequest),
    ("PARAMETER_ERROR.REQUIRED", ApiErrorKind::BadRequest),
    ("ENTITY_ERROR.ATTRIBUTE.INVALID", ApiErrorKind::BadRequest),
];

impl ApiErrorKind {
    /// Classify by error code, then by HTTP status.
    pub fn classify(code: Option<&str>, status: u16) -> Self {
        if let Some(code) = code
            && let Some((_, kind)) = CODE_TABLE
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(code.trim()))
        {
            return *kind;
        }

        match status {
            404 => ApiErrorKind::NotFound,
            401 => ApiErrorKind::Unauthorized,
            403 => ApiErrorKind::Forbidden,
            400 | 422 => ApiErrorKind::BadRequest,
            _ => ApiErrorKind::Opaque,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    errors: Vec<EnvelopeEntry>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeEntry {
    code: Option<String>,
    title: Option<String>,
    detail: Option<String>,
}

/// Non-success response from the backend.
///
/// Text fields are sanitized on construction, so rendering one to a
/// terminal never emits control sequences supplied by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub code: Option<String>,
    pub title: String,
    pub detail: Option<String>,
    pub kind: ApiErrorKind,
    /// Further errors in the same envelope.
    pub additional: usize,
    /// Server-requested delay before retrying.
    pub retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(
        status: u16,
        code: Option<&str>,
        title: impl AsRef<str>,
        detail: Option<&str>,
    ) -> Self {
        let code = code.map(sanitize).filter(|c| !c.is_empty());
        Self {
            status,
            kind: ApiErrorKind::classify(code.as_deref(), status),
            code,
            title: sanitize(title.as_ref()),
            detail: detail.map(sanitize).filter(|d| !d.is_empty()),
            additional: 0,
            retry_after: None,
        }
    }

    /// Parse a JSON:API error envelope.
    ///
    /// Bodies that are not an envelope still produce an error carrying the
    /// status and a generic title.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let envelope = serde_json::from_slice::<Envelope>(body).ok();
        let Some(mut entries) = envelope.map(|e| e.errors).filter(|e| !e.is_empty()) else {
            let detail = String::from_utf8_lossy(body);
            let detail = detail.trim();
            let detail = (!detail.is_empty() && detail.len() <= 512).then_some(detail);
            return Self::new(status, None, generic_title(status), detail);
        };

        let additional = entries.len() - 1;
        let first = entries.swap_remove(0);
        let title = first
            .title
            .unwrap_or_else(|| generic_title(status).to_string());
        let mut error = Self::new(status, first.code.as_deref(), title, first.detail.as_deref());
        error.additional = additional;
        error
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Rate limited or a server-side failure.
    pub fn is_transient(&self) -> bool {
        self.status == 429 || (500..=599).contains(&self.status)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API error {}", self.status)?;
        if let Some(code) = &self.code {
            write!(f, " ({})", code)?;
        }
        write!(f, ": {}", self.title)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        if self.additional > 0 {
            write!(f, " (+{} more)", self.additional)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

fn generic_title(status: u16) -> &'static str {
    match status {
        400 => "Bad request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not found",
        409 => "Conflict",
        422 => "Unprocessable entity",
        429 => "Rate limit exceeded",
        500..=599 => "Server error",
        _ => "Request failed",
    }
}

/// Strip control characters, dropping ANSI escape sequences whole.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => match chars.peek() {
                // CSI: parameters and intermediates up to a final byte in @..~
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            break;
                        }
                    }
                }
                // OSC: up to BEL or ST
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\u{07}' {
                            break;
                        }
                        if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                Some(_) => {
                    chars.next();
                }
                None => {}
            },
            '\n' | '\r' | '\t' => out.push(' '),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    out.trim().to_string()
}
