use base64::{engine::general_purpose::STANDARD, Engine as _};
use mailparse::ParsedContentType;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, MimeError, Result};
use crate::mail::{canonicalize_line_endings, Headers, CONTENT_TYPE, CRLF};

const BASE64_LINE_LENGTH: usize = 76;

/// A MIME entity: ordered headers and a raw body.
///
/// A whole RFC 5322 message is represented by the same type; the message
/// level headers simply live alongside the `Content-*` ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeEntity {
    headers: Headers,
    body: Vec<u8>,
}

impl MimeEntity {
    pub fn new(headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Parses raw bytes. Line endings are canonicalized to CRLF first so the
    /// serialized form is stable across parse/serialize cycles.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::mime(MimeError::InvalidMimeEntity));
        }
        let canonical = canonicalize_line_endings(raw);
        Self::parse_canonical(&canonical)
    }

    /// Parses bytes that are already CRLF canonical without touching them,
    /// so the body is exactly the bytes following the header block.
    pub fn parse_canonical(raw: &[u8]) -> Result<Self> {
        let (parsed, body_start) = mailparse::parse_headers(raw)?;
        let headers = parsed
            .iter()
            .map(|h| {
                let raw_value = String::from_utf8_lossy(h.get_value_raw());
                crate::mail::Header::new(h.get_key(), unfold(&raw_value))
            })
            .collect();
        let body = raw.get(body_start..).unwrap_or_default().to_vec();
        Ok(Self { headers, body })
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Parsed `Content-Type`, defaulting to `text/plain` per RFC 2045.
    pub fn content_type(&self) -> ParsedContentType {
        mailparse::parse_content_type(self.headers.get(CONTENT_TYPE).unwrap_or("text/plain"))
    }

    pub fn is_content_type(&self, mimetype: &str) -> bool {
        self.content_type().mimetype.eq_ignore_ascii_case(mimetype)
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type().mimetype.starts_with("multipart/")
    }

    /// The entity as seen by a MIME consumer: content headers and body only.
    pub fn content_entity(&self) -> MimeEntity {
        MimeEntity::new(self.headers.mime_headers(), self.body.clone())
    }

    /// Replaces this entity's content with `content`, keeping message level
    /// headers and taking every header `content` carries.
    pub fn replace_content(&mut self, content: &MimeEntity) {
        let mut headers = self.headers.message_headers();
        headers.merge(&content.headers);
        self.headers = headers;
        self.body = content.body.clone();
    }

    /// Raw bytes of each body part, exactly as they appear between the
    /// multipart delimiters.
    pub fn raw_parts(&self) -> Result<Vec<Vec<u8>>> {
        let content_type = self.content_type();
        if !content_type.mimetype.starts_with("multipart/") {
            return Err(Error::mime(MimeError::ContentTypeMismatch));
        }
        let boundary = content_type
            .params
            .get("boundary")
            .ok_or_else(|| Error::mime(MimeError::InvalidBoundary))?;
        split_multipart(&self.body, boundary)
    }

    pub fn parts(&self) -> Result<Vec<MimeEntity>> {
        self.raw_parts()?
            .iter()
            .map(|raw| MimeEntity::parse_canonical(raw))
            .collect()
    }

    /// Builds a multipart entity from already serialized parts.
    /// `content_type` is the full type without the boundary parameter.
    pub fn multipart(content_type: &str, parts: &[Vec<u8>]) -> MimeEntity {
        let boundary = generate_boundary();
        let mut headers = Headers::new();
        headers.append(
            CONTENT_TYPE,
            format!("{content_type}; boundary=\"{boundary}\""),
        );
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(b"--");
            body.extend_from_slice(boundary.as_bytes());
            body.extend_from_slice(CRLF);
            body.extend_from_slice(part);
            body.extend_from_slice(CRLF);
        }
        body.extend_from_slice(b"--");
        body.extend_from_slice(boundary.as_bytes());
        body.extend_from_slice(b"--");
        body.extend_from_slice(CRLF);
        MimeEntity::new(headers, body)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 256);
        self.headers.write_to(&mut out);
        out.extend_from_slice(CRLF);
        out.extend_from_slice(&self.body);
        out
    }
}

impl FromStr for MimeEntity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MimeEntity::parse(s.as_bytes())
    }
}

impl fmt::Display for MimeEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_bytes()))
    }
}

fn unfold(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect::<String>()
        .trim()
        .to_string()
}

fn generate_boundary() -> String {
    let bytes: [u8; 12] = rand::random();
    format!("----=_Part_{}", hex::encode(bytes))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Finds a delimiter that starts a line at or after `from`.
fn find_delimiter(body: &[u8], delimiter: &[u8], from: usize) -> Option<usize> {
    let mut start = from;
    while let Some(index) = find(body, delimiter, start) {
        if index == 0 || (index >= 2 && &body[index - 2..index] == CRLF) {
            return Some(index);
        }
        start = index + 1;
    }
    None
}

pub fn split_multipart(body: &[u8], boundary: &str) -> Result<Vec<Vec<u8>>> {
    let delimiter = format!("--{boundary}").into_bytes();
    let invalid = || Error::mime(MimeError::InvalidBoundary);

    let mut parts = Vec::new();
    let mut position = find_delimiter(body, &delimiter, 0).ok_or_else(invalid)?;
    loop {
        let after = position + delimiter.len();
        if body[after..].starts_with(b"--") {
            return Ok(parts);
        }
        let content_start = find(body, CRLF, after).ok_or_else(invalid)? + CRLF.len();
        let next = find_delimiter(body, &delimiter, content_start).ok_or_else(invalid)?;
        let content_end = next.saturating_sub(CRLF.len()).max(content_start);
        parts.push(body[content_start..content_end].to_vec());
        position = next;
    }
}

/// Base64 with CRLF line breaks every 76 characters.
pub fn encode_base64_lines(data: &[u8]) -> Vec<u8> {
    let encoded = STANDARD.encode(data);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_LENGTH * 2 + 2);
    for chunk in encoded.as_bytes().chunks(BASE64_LINE_LENGTH) {
        out.extend_from_slice(chunk);
        out.extend_from_slice(CRLF);
    }
    out
}

pub fn decode_base64_body(body: &[u8]) -> Result<Vec<u8>> {
    let compact: Vec<u8> = body
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(compact)
        .map_err(|e| Error::mime_with(MimeError::InvalidBody, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "From: a@x.com\r\nTo: b@y.com\r\nSubject: Hello\r\n\
                          Content-Type: text/plain\r\n\r\nHello there\r\n";

    #[test]
    fn test_parse_headers_and_body() {
        let entity: MimeEntity = SIMPLE.parse().unwrap();
        assert_eq!(entity.header("from"), Some("a@x.com"));
        assert_eq!(entity.header("Subject"), Some("Hello"));
        assert_eq!(entity.body(), b"Hello there\r\n");
        assert!(entity.is_content_type("text/plain"));
    }

    #[test]
    fn test_serialize_is_stable() {
        let entity: MimeEntity = SIMPLE.parse().unwrap();
        assert_eq!(entity.to_bytes(), SIMPLE.as_bytes());
        let reparsed = MimeEntity::parse(&entity.to_bytes()).unwrap();
        assert_eq!(reparsed, entity);
    }

    #[test]
    fn test_bare_lf_is_canonicalized() {
        let entity = MimeEntity::parse(b"Subject: x\n\nline one\nline two\n").unwrap();
        assert_eq!(entity.body(), b"line one\r\nline two\r\n");
    }

    #[test]
    fn test_folded_header_unfolds() {
        let entity = MimeEntity::parse(b"To: a@x.com,\r\n b@x.com\r\n\r\nbody").unwrap();
        assert_eq!(entity.header("To"), Some("a@x.com, b@x.com"));
    }

    #[test]
    fn test_empty_input_is_invalid() {
        assert!(MimeEntity::parse(b"").is_err());
    }

    #[test]
    fn test_multipart_preserves_part_bytes() {
        let first = b"Content-Type: text/plain\r\n\r\nfirst\r\n".to_vec();
        let second = b"Content-Type: text/html\r\n\r\n<p>second</p>".to_vec();
        let multipart =
            MimeEntity::multipart("multipart/mixed", &[first.clone(), second.clone()]);
        assert!(multipart.is_multipart());

        let parts = multipart.raw_parts().unwrap();
        assert_eq!(parts, vec![first, second]);

        let entities = multipart.parts().unwrap();
        assert!(entities[1].is_content_type("text/html"));
        assert_eq!(entities[1].body(), b"<p>second</p>");
    }

    #[test]
    fn test_multipart_survives_reparse() {
        let part = b"Content-Type: text/plain\r\n\r\nhello".to_vec();
        let mut multipart = MimeEntity::multipart("multipart/mixed", &[part.clone()]);
        multipart.headers_mut().append("Subject", "outer");
        let reparsed = MimeEntity::parse(&multipart.to_bytes()).unwrap();
        assert_eq!(reparsed.raw_parts().unwrap(), vec![part]);
    }

    #[test]
    fn test_missing_boundary() {
        let entity = MimeEntity::parse(b"Content-Type: multipart/mixed\r\n\r\nno parts").unwrap();
        assert!(matches!(
            entity.raw_parts(),
            Err(Error::Mime {
                kind: MimeError::InvalidBoundary,
                ..
            })
        ));
    }

    #[test]
    fn test_replace_content_keeps_message_headers() {
        let mut message: MimeEntity = SIMPLE.parse().unwrap();
        let content = MimeEntity::parse(b"Content-Type: text/html\r\n\r\n<b>hi</b>").unwrap();
        message.replace_content(&content);
        assert_eq!(message.header("Subject"), Some("Hello"));
        assert_eq!(message.header("Content-Type"), Some("text/html"));
        assert_eq!(message.body(), b"<b>hi</b>");
    }

    #[test]
    fn test_base64_lines_roundtrip() {
        let data: Vec<u8> = (0..=255u8).cycle().take(500).collect();
        let encoded = encode_base64_lines(&data);
        assert!(encoded
            .split(|b| *b == b'\n')
            .all(|line| line.len() <= BASE64_LINE_LENGTH + 1));
        assert_eq!(decode_base64_body(&encoded).unwrap(), data);
    }
}
