//! Header-block rendering: [`ParsedMessage`] → HTML fragment for the body PDF.
//!
//! The fragment is backend-independent; wrapping it in a full document
//! (doctype, charset) is the backend's job. Header values are inserted as
//! the parser returned them.

use crate::pipeline::parse::{Mailbox, ParsedMessage};

/// Render the header block followed by the message body.
///
/// Layout, in order: padding element, `from`, `to`, `subject`, then the HTML
/// body (empty when the message has none). Never fails.
pub fn render_html(message: &ParsedMessage) -> String {
    format!(
        "<div>\n  \
         <div style=\"height: 1em\"></div>\n  \
         <div><b>from: </b>{from}</div>\n  \
         <div><b>to: </b>{to}</div>\n  \
         <div><b>subject: </b>{subject}</div>\n\
         </div><br>{body}",
        from = format_mailboxes(&message.from),
        to = format_mailboxes(&message.to),
        subject = message.subject,
        body = message.html_body.as_deref().unwrap_or(""),
    )
}

/// `Name <addr>` with the address as a mailto link, comma-separated.
fn format_mailboxes(mailboxes: &[Mailbox]) -> String {
    mailboxes
        .iter()
        .map(|m| match (&m.name, &m.address) {
            (Some(name), Some(addr)) => {
                format!("{name} &lt;<a href=\"mailto:{addr}\">{addr}</a>&gt;")
            }
            (None, Some(addr)) => format!("<a href=\"mailto:{addr}\">{addr}</a>"),
            (Some(name), None) => name.clone(),
            (None, None) => String::new(),
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: Option<&str>) -> ParsedMessage {
        ParsedMessage {
            message_id: Some("1@x.com".into()),
            from: vec![Mailbox::new(Some("Alice"), Some("a@x.com"))],
            to: vec![
                Mailbox::new(None, Some("b@y.com")),
                Mailbox::new(Some("Undisclosed"), None),
            ],
            subject: "Hi".into(),
            html_body: body.map(str::to_string),
            attachments: vec![],
        }
    }

    #[test]
    fn header_lines_precede_body_in_order() {
        let html = render_html(&message(Some("<p>hello</p>")));
        let from = html.find("from: ").unwrap();
        let to = html.find("to: ").unwrap();
        let subject = html.find("subject: ").unwrap();
        let body = html.find("<p>hello</p>").unwrap();
        assert!(from < to && to < subject && subject < body, "{html}");
        assert!(html.starts_with("<div>\n  <div style=\"height: 1em\"></div>"));
    }

    #[test]
    fn absent_body_renders_empty_section() {
        let html = render_html(&message(None));
        assert!(html.contains("<b>from: </b>"));
        assert!(html.contains("<b>to: </b>"));
        assert!(html.contains("<b>subject: </b>Hi"));
        assert!(html.ends_with("</div><br>"), "{html}");
    }

    #[test]
    fn mailboxes_are_linked_and_joined() {
        let html = render_html(&message(None));
        assert!(html.contains("Alice &lt;<a href=\"mailto:a@x.com\">a@x.com</a>&gt;"));
        assert!(html.contains("<a href=\"mailto:b@y.com\">b@y.com</a>, Undisclosed"));
    }

    #[test]
    fn subject_passes_through_unchanged() {
        let mut msg = message(None);
        msg.subject = "Q3 <draft> & notes".into();
        assert!(render_html(&msg).contains("<b>subject: </b>Q3 <draft> & notes</div>"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let msg = message(Some("<p>x</p>"));
        assert_eq!(render_html(&msg), render_html(&msg));
    }
}
