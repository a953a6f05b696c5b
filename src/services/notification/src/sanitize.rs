//! Request validation and content sanitization
//!
//! Pure functions over request content: no I/O. Recipient shape is validated
//! per channel; message content is screened for script injection and
//! SQL-shaped payloads. The configured policy decides whether unsafe content
//! is rejected outright or stripped and flagged.

use courier_shared::ChannelKind;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{SanitizerConfig, SanitizerPolicy};
use crate::error::{EngineError, Result};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("email regex")
});

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[\d\s()\-]+$").expect("phone regex"));

static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));

static SCRIPT_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script[^>]*>").expect("script regex"));

static SCRIPT_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<script[^>]*>?").expect("script open regex"));

static JS_URI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)javascript\s*:[^\s'\x22>]*").expect("js uri regex"));

static EVENT_HANDLER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bon[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).expect("handler regex")
});

static SQL_INJECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\bdrop\s+table\b|\bunion\s+select\b|\bor\s+1\s*=\s*1\b|;\s*--|--\s*$)")
        .expect("sql regex")
});

/// Raw message content as received from a caller
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub channel: ChannelKind,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Validated and (possibly) cleaned message content
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    /// True when the clean policy stripped something from the content
    pub content_modified: bool,
    /// True when the recipient was rewritten during cleaning
    pub recipient_modified: bool,
}

/// Stateless validator/sanitizer over request content
#[derive(Debug, Clone)]
pub struct Sanitizer {
    config: SanitizerConfig,
}

impl Sanitizer {
    pub fn new(config: SanitizerConfig) -> Self {
        Self { config }
    }

    /// Validate a raw message and apply the configured content policy
    pub fn validate(&self, raw: &RawMessage) -> Result<Sanitized> {
        if raw.recipient.trim().is_empty() {
            return Err(EngineError::validation("recipient", "recipient is required"));
        }
        if raw.body.trim().is_empty() {
            return Err(EngineError::validation("content", "content is required"));
        }
        if raw.body.len() > self.config.max_content_length {
            return Err(EngineError::validation(
                "content",
                format!(
                    "content exceeds maximum length of {} bytes",
                    self.config.max_content_length
                ),
            ));
        }
        if let Some(subject) = &raw.subject {
            if subject.len() > self.config.max_subject_length {
                return Err(EngineError::validation(
                    "subject",
                    format!(
                        "subject exceeds maximum length of {} characters",
                        self.config.max_subject_length
                    ),
                ));
            }
        }

        let (recipient, recipient_modified) = self.validate_recipient(raw.channel, &raw.recipient)?;

        let (body, body_modified) = self.apply_content_policy("content", &raw.body)?;
        let (subject, subject_modified) = match &raw.subject {
            Some(s) => {
                let (cleaned, modified) = self.apply_content_policy("subject", s)?;
                (Some(cleaned), modified)
            }
            None => (None, false),
        };

        Ok(Sanitized {
            recipient,
            subject,
            body,
            content_modified: body_modified || subject_modified,
            recipient_modified,
        })
    }

    /// Check the recipient against the channel's expected shape
    fn validate_recipient(&self, channel: ChannelKind, recipient: &str) -> Result<(String, bool)> {
        let stripped = HTML_TAG_RE.replace_all(recipient, "").trim().to_string();
        let modified = stripped != recipient;

        if modified && self.config.policy == SanitizerPolicy::Reject {
            return Err(EngineError::security_validation(
                "recipient",
                "recipient contains markup",
            ));
        }

        match channel {
            ChannelKind::Email => {
                if !EMAIL_RE.is_match(&stripped) {
                    return Err(EngineError::validation(
                        "recipient",
                        "invalid email address",
                    ));
                }
            }
            ChannelKind::Sms | ChannelKind::Whatsapp => {
                let digits = stripped.chars().filter(|c| c.is_ascii_digit()).count();
                if !PHONE_RE.is_match(&stripped) || !(6..=15).contains(&digits) {
                    return Err(EngineError::validation(
                        "recipient",
                        "invalid phone number",
                    ));
                }
            }
        }

        Ok((stripped, modified))
    }

    /// Screen content for unsafe patterns; reject or strip per policy
    fn apply_content_policy(&self, field: &str, content: &str) -> Result<(String, bool)> {
        let has_unsafe = SCRIPT_OPEN_RE.is_match(content)
            || JS_URI_RE.is_match(content)
            || EVENT_HANDLER_RE.is_match(content)
            || SQL_INJECTION_RE.is_match(content);

        if !has_unsafe {
            return Ok((content.to_string(), false));
        }

        match self.config.policy {
            SanitizerPolicy::Reject => Err(EngineError::security_validation(
                field,
                "content contains potentially unsafe patterns",
            )),
            SanitizerPolicy::Clean => {
                let cleaned = SCRIPT_BLOCK_RE.replace_all(content, "");
                let cleaned = SCRIPT_OPEN_RE.replace_all(&cleaned, "");
                let cleaned = JS_URI_RE.replace_all(&cleaned, "");
                let cleaned = EVENT_HANDLER_RE.replace_all(&cleaned, "");
                let cleaned = SQL_INJECTION_RE.replace_all(&cleaned, "").to_string();
                Ok((cleaned, true))
            }
        }
    }
}
