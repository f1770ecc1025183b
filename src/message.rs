//! Raw RFC 5322 message import.
//!
//! Parses a raw email into the fields the resolver needs. Unsubscribe
//! headers are read verbatim (unfolded) rather than through the parser's
//! structured address view, since extraction works on the raw value.

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;

use crate::store::NewMessage;

/// Fields of an imported email relevant to unsubscribing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEmail {
    pub sender: String,
    /// First `To` address; the subscriber's own address.
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub list_unsubscribe: Option<String>,
    pub list_unsubscribe_post: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl ParsedEmail {
    /// Parse a raw message. Returns `None` if the input is not an email.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;

        let sender = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".into());

        let recipient = parsed
            .to()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string());

        let date = parsed
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0));

        Some(Self {
            sender,
            recipient,
            subject: parsed.subject().map(|s| s.to_string()),
            list_unsubscribe: raw_header(&parsed, "List-Unsubscribe"),
            list_unsubscribe_post: raw_header(&parsed, "List-Unsubscribe-Post"),
            body_text: parsed.body_text(0).map(|t| t.into_owned()),
            body_html: parsed.body_html(0).map(|h| h.into_owned()),
            date,
        })
    }

    /// Convert into a storable message owned by `user_id`.
    pub fn into_new_message(self, user_id: &str) -> NewMessage {
        NewMessage {
            user_id: user_id.to_string(),
            sender: self.sender,
            subject: self.subject,
            user_email: self.recipient,
            list_unsubscribe: self.list_unsubscribe,
            list_unsubscribe_post: self.list_unsubscribe_post,
            body_text: self.body_text,
            body_html: self.body_html,
            received_at: self.date,
        }
    }
}

/// Raw value of the first header named `name` (case-insensitive), unfolded.
fn raw_header(parsed: &mail_parser::Message, name: &str) -> Option<String> {
    let raw = parsed.raw_message();
    let header = parsed
        .headers()
        .iter()
        .find(|h| h.name().eq_ignore_ascii_case(name))?;
    let bytes = raw.get(header.offset_start as usize..header.offset_end as usize)?;
    let value = unfold(&String::from_utf8_lossy(bytes));
    (!value.is_empty()).then_some(value)
}

/// Join folded header lines into one line.
fn unfold(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEWSLETTER: &str = "From: Shop News <news@shop.example>\r\n\
To: Me <me@example.com>\r\n\
Subject: Weekly deals\r\n\
Date: Tue, 1 Oct 2024 10:00:00 +0000\r\n\
List-Unsubscribe: <https://shop.example/u/abc>,\r\n\
 <mailto:unsub@shop.example?subject=unsubscribe>\r\n\
List-Unsubscribe-Post: List-Unsubscribe=One-Click\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Great deals this week.\r\n\
To stop receiving these, visit https://shop.example/unsubscribe?id=abc\r\n";

    #[test]
    fn parses_unsubscribe_headers_and_recipient() {
        let email = ParsedEmail::parse(NEWSLETTER.as_bytes()).unwrap();
        assert_eq!(email.sender, "news@shop.example");
        assert_eq!(email.recipient.as_deref(), Some("me@example.com"));
        assert_eq!(email.subject.as_deref(), Some("Weekly deals"));
        assert_eq!(
            email.list_unsubscribe.as_deref(),
            Some("<https://shop.example/u/abc>, <mailto:unsub@shop.example?subject=unsubscribe>")
        );
        assert_eq!(
            email.list_unsubscribe_post.as_deref(),
            Some("List-Unsubscribe=One-Click")
        );
        assert!(email.body_text.unwrap().contains("https://shop.example/unsubscribe?id=abc"));
        assert_eq!(email.date.unwrap().to_rfc3339(), "2024-10-01T10:00:00+00:00");
    }

    #[test]
    fn missing_headers_are_none() {
        let raw = "From: a@b.example\r\nSubject: hi\r\n\r\nbody\r\n";
        let email = ParsedEmail::parse(raw.as_bytes()).unwrap();
        assert!(email.list_unsubscribe.is_none());
        assert!(email.list_unsubscribe_post.is_none());
        assert!(email.recipient.is_none());
    }

    #[test]
    fn into_new_message_keeps_owner_and_fields() {
        let msg = ParsedEmail::parse(NEWSLETTER.as_bytes())
            .unwrap()
            .into_new_message("u1");
        assert_eq!(msg.user_id, "u1");
        assert_eq!(msg.user_email.as_deref(), Some("me@example.com"));
        assert!(msg.list_unsubscribe.unwrap().starts_with("<https://"));
        assert!(msg.received_at.is_some());
    }

    #[test]
    fn unfold_joins_continuation_lines() {
        assert_eq!(unfold(" <a>,\r\n\t<b>\r\n"), "<a>, <b>");
    }
}
