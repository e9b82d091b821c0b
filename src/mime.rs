//! Message headline extraction
//!
//! Pulls `Subject` and `From` out of a raw RFC822 message with `mailparse`
//! so per-message log lines say which mail they are about. Only headers are
//! parsed; bodies are never decoded.

use mailparse::MailHeaderMap;

/// Maximum characters kept per header in log output
const MAX_HEADER_CHARS: usize = 120;

/// Log-friendly summary of a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headline {
    pub subject: String,
    pub from: String,
}

/// Extract the headline of a raw message
///
/// Unparseable header blocks yield an empty headline.
pub fn headline(raw: &[u8]) -> Headline {
    match mailparse::parse_headers(raw) {
        Ok((headers, _)) => Headline {
            subject: headers
                .get_first_value("Subject")
                .map(|v| truncate_chars(&v, MAX_HEADER_CHARS))
                .unwrap_or_default(),
            from: headers
                .get_first_value("From")
                .map(|v| truncate_chars(&v, MAX_HEADER_CHARS))
                .unwrap_or_default(),
        },
        Err(err) => {
            tracing::debug!(target: "mime", error = %err, "cannot parse message headers");
            Headline::default()
        }
    }
}

/// Truncate to at most `max` characters on a char boundary
fn truncate_chars(input: &str, max: usize) -> String {
    let cleaned: String = input
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect();
    match cleaned.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &cleaned[..idx]),
        None => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::{Headline, headline, truncate_chars};

    #[test]
    fn extracts_subject_and_from() {
        let raw = b"From: Alice <alice@example.com>\r\nSubject: =?UTF-8?Q?Gr=C3=BC=C3=9Fe?=\r\n\r\nbody";
        let h = headline(raw);
        assert_eq!(h.from, "Alice <alice@example.com>");
        assert_eq!(h.subject, "Grüße");
    }

    #[test]
    fn missing_headers_are_empty() {
        assert_eq!(headline(b"\r\nbody only"), Headline::default());
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate_chars("äöü", 2), "äö…");
        assert_eq!(truncate_chars("abc", 5), "abc");
        assert_eq!(truncate_chars("a\tb", 5), "a b");
    }
}
