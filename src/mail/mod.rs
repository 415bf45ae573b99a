//! RFC 5322 / MIME primitives used by the agent.
//!
//! Only what the agent needs to move content between the signing,
//! encryption and wrapping stages is modelled here: ordered headers, a raw
//! body, multipart assembly that preserves exact part bytes, and the
//! message wrapping convention that protects the original headers.

pub mod entity;
pub mod headers;
pub mod wrapped;

pub use entity::MimeEntity;
pub use headers::{Header, Headers};
pub use wrapped::WrappedMessage;

pub const TO: &str = "To";
pub const FROM: &str = "From";
pub const CC: &str = "Cc";
pub const BCC: &str = "Bcc";
pub const DATE: &str = "Date";
pub const MESSAGE_ID: &str = "Message-ID";
pub const SUBJECT: &str = "Subject";
pub const MIME_VERSION: &str = "MIME-Version";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";
pub const CONTENT_DISPOSITION: &str = "Content-Disposition";

pub const CONTENT_HEADER_PREFIX: &str = "content-";

/// Headers copied onto the outside of a wrapped message.
pub const ROUTING_HEADERS: [&str; 6] = [TO, FROM, CC, BCC, DATE, MESSAGE_ID];

/// Recipient-bearing headers rewritten when recipients are rejected.
pub const RECIPIENT_HEADERS: [&str; 3] = [TO, CC, BCC];

pub const CRLF: &[u8] = b"\r\n";

/// True for headers that describe the MIME content rather than the message.
pub fn is_mime_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with(CONTENT_HEADER_PREFIX) || lower == "mime-version"
}

/// Converts bare LF line endings to CRLF, leaving existing CRLF untouched.
pub fn canonicalize_line_endings(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 32);
    let mut prev = 0u8;
    for &b in input {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_mime_header() {
        assert!(is_mime_header("Content-Type"));
        assert!(is_mime_header("content-transfer-encoding"));
        assert!(is_mime_header("MIME-Version"));
        assert!(!is_mime_header("Subject"));
        assert!(!is_mime_header("To"));
    }

    #[test]
    fn test_canonicalize_line_endings() {
        assert_eq!(canonicalize_line_endings(b"a\nb\r\nc\n"), b"a\r\nb\r\nc\r\n");
        assert_eq!(canonicalize_line_endings(b""), b"");
    }
}
