use crate::error::{Error, MimeError, Result};
use crate::mail::{Headers, MimeEntity, CONTENT_TYPE, MIME_VERSION};

pub const MESSAGE_RFC822: &str = "message/rfc822";

/// Wraps a message inside a `message/rfc822` body so that the original
/// headers travel inside the signed and encrypted content. Only routing
/// headers are copied to the outside.
pub struct WrappedMessage;

impl WrappedMessage {
    pub fn create(message: &MimeEntity, headers_to_copy: &[&str]) -> MimeEntity {
        let mut headers = Headers::new();
        for name in headers_to_copy {
            for value in message.headers().get_all(name) {
                headers.append(*name, value);
            }
        }
        headers.set(MIME_VERSION, "1.0");
        headers.set(CONTENT_TYPE, MESSAGE_RFC822);
        MimeEntity::new(headers, message.to_bytes())
    }

    pub fn create_from_text(text: &str, headers_to_copy: &[&str]) -> Result<MimeEntity> {
        let message: MimeEntity = text.parse()?;
        Ok(Self::create(&message, headers_to_copy))
    }

    pub fn is_wrapped(message: &MimeEntity) -> bool {
        message.is_content_type(MESSAGE_RFC822)
    }

    /// Returns the inner message of a wrapped message.
    pub fn extract(message: &MimeEntity) -> Result<MimeEntity> {
        if !Self::is_wrapped(message) {
            return Err(Error::mime(MimeError::ContentTypeMismatch));
        }
        if message.body().is_empty() {
            return Err(Error::mime(MimeError::MissingBody));
        }
        MimeEntity::parse_canonical(message.body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::ROUTING_HEADERS;

    const ORIGINAL: &str = "From: a@x.com\r\nTo: b@y.com\r\nCc: c@y.com\r\n\
                            Subject: Lab results\r\nMessage-ID: <1@x.com>\r\n\
                            Content-Type: text/plain\r\n\r\nPotassium 4.1\r\n";

    #[test]
    fn test_wrap_copies_routing_headers_only() {
        let wrapped = WrappedMessage::create_from_text(ORIGINAL, &ROUTING_HEADERS).unwrap();
        assert!(WrappedMessage::is_wrapped(&wrapped));
        assert_eq!(wrapped.header("To"), Some("b@y.com"));
        assert_eq!(wrapped.header("Cc"), Some("c@y.com"));
        assert_eq!(wrapped.header("Message-ID"), Some("<1@x.com>"));
        assert_eq!(wrapped.header("Subject"), None);
    }

    #[test]
    fn test_wrap_then_extract_roundtrip() {
        let original: MimeEntity = ORIGINAL.parse().unwrap();
        let wrapped = WrappedMessage::create(&original, &ROUTING_HEADERS);
        let reparsed = MimeEntity::parse(&wrapped.to_bytes()).unwrap();
        let extracted = WrappedMessage::extract(&reparsed).unwrap();
        assert_eq!(extracted, original);
    }

    #[test]
    fn test_extract_rejects_unwrapped() {
        let original: MimeEntity = ORIGINAL.parse().unwrap();
        assert!(!WrappedMessage::is_wrapped(&original));
        assert!(WrappedMessage::extract(&original).is_err());
    }
}
