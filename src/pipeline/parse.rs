//! Message parsing: raw RFC 5322 bytes → owned [`ParsedMessage`].
//!
//! `mail-parser` does the MIME work (transfer decoding, charset conversion,
//! text→HTML body fallback). This module copies what the pipeline needs into
//! owned types so the message outlives the input buffer and can be handed to
//! a spawned task.

use crate::error::Eml2PdfError;
use crate::pipeline::classify::{classify, AttachmentKind};
use mail_parser::{Addr, Address, MessageParser, MimeHeaders};
use serde::Serialize;
use tracing::debug;

/// Content type assumed for parts that do not declare one.
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A display name and/or address from a `From`/`To` header.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: Option<String>,
}

impl Mailbox {
    pub fn new(name: Option<&str>, address: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            address: address.map(str::to_string),
        }
    }
}

/// One attachment, fully decoded.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Decoded content (transfer encoding already removed).
    pub content: Vec<u8>,
    /// Declared content type, lower-cased `type/subtype`.
    pub content_type: String,
    /// Original filename, or `attachment{position}` when none was given.
    pub filename: String,
}

impl Attachment {
    pub fn kind(&self) -> AttachmentKind {
        classify(&self.content_type, &self.filename)
    }
}

/// The parts of an email the pipeline renders and converts.
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    pub message_id: Option<String>,
    pub from: Vec<Mailbox>,
    pub to: Vec<Mailbox>,
    pub subject: String,
    /// HTML body; plain-text bodies arrive already converted to HTML.
    pub html_body: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Log identity of a message without a `Message-ID` header.
pub const NO_MESSAGE_ID: &str = "<no message-id>";

impl ParsedMessage {
    /// Identity used in log records.
    pub fn identity(&self) -> &str {
        self.message_id.as_deref().unwrap_or(NO_MESSAGE_ID)
    }
}

/// Parse raw message bytes.
///
/// `source_name` only labels the error (usually the input path).
///
/// # Errors
/// [`Eml2PdfError::ParseFailed`] when the bytes are empty or carry none of
/// the header fields that make them an email.
pub fn parse_email(raw: &[u8], source_name: &str) -> Result<ParsedMessage, Eml2PdfError> {
    let parse_failed = |detail: &str| Eml2PdfError::ParseFailed {
        source_name: source_name.to_string(),
        detail: detail.to_string(),
    };

    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(parse_failed("input is empty"));
    }

    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| parse_failed("not an RFC 5322 message"))?;

    if message.from().is_none()
        && message.to().is_none()
        && message.subject().is_none()
        && message.message_id().is_none()
        && message.date().is_none()
    {
        return Err(parse_failed(
            "no From, To, Subject, Message-ID or Date header found",
        ));
    }

    let attachments: Vec<Attachment> = message
        .attachments()
        .enumerate()
        .map(|(i, part)| {
            let content_type = MimeHeaders::content_type(part)
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .map(|ct| ct.to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
            let filename = MimeHeaders::attachment_name(part)
                .map(str::to_string)
                .unwrap_or_else(|| format!("attachment{}", i + 1));
            Attachment {
                content: part.contents().to_vec(),
                content_type,
                filename,
            }
        })
        .collect();

    let parsed = ParsedMessage {
        message_id: message.message_id().map(str::to_string),
        from: mailboxes(message.from()),
        to: mailboxes(message.to()),
        subject: message.subject().unwrap_or_default().to_string(),
        html_body: message.body_html(0).map(|b| b.into_owned()),
        attachments,
    };

    debug!(
        "Parsed message {}: {} attachments, html body: {}",
        parsed.identity(),
        parsed.attachments.len(),
        parsed.html_body.is_some()
    );

    Ok(parsed)
}

/// Flatten an address header (lists and groups alike) into mailboxes.
fn mailboxes(addr: Option<&Address>) -> Vec<Mailbox> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        Address::List(addrs) => addrs.iter().map(to_mailbox).collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().map(to_mailbox))
            .collect(),
    }
}

fn to_mailbox(addr: &Addr) -> Mailbox {
    Mailbox::new(addr.name.as_deref(), addr.address.as_deref())
}
