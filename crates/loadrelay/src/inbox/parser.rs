//! Email parsing and attachment extraction.

use std::path::Path;

use glob::Pattern;
use log::debug;
use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};

use super::error::{InboxError, Result};
use super::{Attachment, AttachmentFilter};
use crate::model::parse_timestamp;

/// Sender, subject and ids shared by every attachment of one message.
#[derive(Debug, Clone, Default)]
struct EmailInfo {
    message_id: Option<String>,
    subject: String,
    from: String,
    date: Option<String>,
}

/// Extracts the attachments of a message that pass a tenant's filter.
pub struct EmailParser {
    filter: AttachmentFilter,
    filename_include_patterns: Vec<Pattern>,
    filename_exclude_patterns: Vec<Pattern>,
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| InboxError::InvalidPattern {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

impl EmailParser {
    pub fn new(filter: &AttachmentFilter) -> Result<Self> {
        Ok(Self {
            filename_include_patterns: compile(&filter.filename_include)?,
            filename_exclude_patterns: compile(&filter.filename_exclude)?,
            filter: filter.clone(),
        })
    }

    /// Extracts filtered attachments from a raw message. `origin` is where
    /// the message came from and is carried on each attachment.
    pub fn extract_attachments(&self, raw_email: &[u8], origin: &Path) -> Result<Vec<Attachment>> {
        let message = MessageParser::default()
            .parse(raw_email)
            .ok_or_else(|| InboxError::ParseError {
                origin: origin.display().to_string(),
                reason: "not a valid email message".to_string(),
            })?;

        let info = extract_email_info(&message);
        if !self.passes_message_filter(&info.from, &info.subject) {
            debug!(
                "Message {} from '{}' filtered out",
                origin.display(),
                info.from
            );
            return Ok(Vec::new());
        }

        let received_time = info.date.as_deref().and_then(parse_timestamp);
        let mut attachments = Vec::new();
        for part in message.parts.iter() {
            if !is_attachment(part) {
                continue;
            }

            let content = match &part.body {
                PartType::Binary(data) | PartType::InlineBinary(data) => data.to_vec(),
                PartType::Text(text) => text.as_bytes().to_vec(),
                PartType::Html(html) => html.as_bytes().to_vec(),
                _ => continue,
            };

            let filename = attachment_filename(part);
            let mime_type = attachment_mime_type(part, &filename);

            if !self.passes_filters(&filename, &mime_type, content.len() as u64) {
                debug!("Attachment '{}' ({}) filtered out", filename, mime_type);
                continue;
            }

            debug!(
                "Found attachment: {} ({}, {} bytes)",
                filename,
                mime_type,
                content.len()
            );
            attachments.push(Attachment {
                filename,
                content,
                mime_type,
                sender: info.from.clone(),
                subject: info.subject.clone(),
                received_time,
                message_id: info.message_id.clone(),
                origin: Some(origin.to_path_buf()),
            });
        }
        Ok(attachments)
    }

    fn passes_message_filter(&self, sender: &str, subject: &str) -> bool {
        contains_any(sender, &self.filter.sender_contains)
            && contains_any(subject, &self.filter.subject_contains)
    }

    /// Whether an attachment passes the size, MIME and filename filters.
    pub fn passes_filters(&self, filename: &str, mime_type: &str, size: u64) -> bool {
        if size < self.filter.min_size {
            debug!("Attachment '{}' too small: {} bytes", filename, size);
            return false;
        }
        if self.filter.max_size.is_some_and(|max| size > max) {
            debug!("Attachment '{}' too large: {} bytes", filename, size);
            return false;
        }
        self.passes_mime_filter(mime_type) && self.passes_filename_filter(filename)
    }

    fn passes_mime_filter(&self, mime_type: &str) -> bool {
        if self
            .filter
            .mime_exclude
            .iter()
            .any(|pattern| mime_matches(mime_type, pattern))
        {
            return false;
        }
        self.filter.mime_include.is_empty()
            || self
                .filter
                .mime_include
                .iter()
                .any(|pattern| mime_matches(mime_type, pattern))
    }

    fn passes_filename_filter(&self, filename: &str) -> bool {
        if self
            .filename_exclude_patterns
            .iter()
            .any(|pattern| pattern.matches(filename))
        {
            return false;
        }
        self.filename_include_patterns.is_empty()
            || self
                .filename_include_patterns
                .iter()
                .any(|pattern| pattern.matches(filename))
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    if needles.is_empty() {
        return true;
    }
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .any(|needle| haystack.contains(&needle.to_lowercase()))
}

fn extract_email_info(message: &Message) -> EmailInfo {
    EmailInfo {
        message_id: message.message_id().map(|s| s.to_string()),
        subject: message.subject().unwrap_or_default().to_string(),
        from: message
            .from()
            .and_then(|addr| addr.first().map(format_address))
            .unwrap_or_default(),
        date: message.date().map(|d| d.to_rfc3339()),
    }
}

fn is_attachment(part: &MessagePart) -> bool {
    if part
        .content_disposition()
        .is_some_and(|d| d.ctype() == "attachment")
    {
        return true;
    }
    if part.attachment_name().is_some() {
        return true;
    }
    // Non-text leaf parts are attachments even without a disposition.
    part.content_type().is_some_and(|ct| {
        let ctype = ct.ctype();
        ctype != "text" && ctype != "multipart" && ctype != "message" && ct.subtype().is_some()
    })
}

fn attachment_filename(part: &MessagePart) -> String {
    let raw = part
        .attachment_name()
        .or_else(|| part.content_type().and_then(|ct| ct.attribute("name")))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "attachment".to_string());
    sanitize_filename(&raw)
}

/// Declared content type, or a guess from the filename when the sender only
/// said `application/octet-stream`.
fn attachment_mime_type(part: &MessagePart, filename: &str) -> String {
    let declared = part.content_type().map(|ct| match ct.subtype() {
        Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
        None => ct.ctype().to_string(),
    });
    match declared {
        Some(mime) if mime != "application/octet-stream" => mime.to_lowercase(),
        _ => mime_guess::from_path(filename)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}

fn format_address(addr: &mail_parser::Addr) -> String {
    match addr.name() {
        Some(name) => format!("{} <{}>", name, addr.address().unwrap_or_default()),
        None => addr.address().unwrap_or_default().to_string(),
    }
}

/// Matches a MIME type against a pattern such as `text/csv` or `image/*`.
fn mime_matches(mime_type: &str, pattern: &str) -> bool {
    if pattern == "*/*" {
        return true;
    }
    match (mime_type.split_once('/'), pattern.split_once('/')) {
        (Some((ty, sub)), Some((pty, psub))) => {
            (pty == "*" || pty.eq_ignore_ascii_case(ty))
                && (psub == "*" || psub.eq_ignore_ascii_case(sub))
        }
        _ => false,
    }
}

/// Replaces anything but alphanumerics, `.`, `-`, `_` and spaces.
pub(crate) fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        "attachment".to_string()
    } else {
        trimmed.chars().take(255).collect()
    }
}
