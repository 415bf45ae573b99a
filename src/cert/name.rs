use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub const COMMON_NAME: &str = "CN";
pub const EMAIL_ADDRESS: &str = "EMAILADDRESS";
pub const ORGANIZATION: &str = "O";
pub const ORGANIZATIONAL_UNIT: &str = "OU";
pub const COUNTRY: &str = "C";

const EMAIL_ADDRESS_OID: &str = "1.2.840.113549.1.9.1";

lazy_static! {
    static ref ATTRIBUTE: Regex =
        Regex::new(r#"\s*([A-Za-z0-9.]+)\s*=\s*("(?:[^"\\]|\\.)*"|[^,]*)\s*(?:,|$)"#).unwrap();
}

/// An ordered list of naming attributes, e.g. `CN=Root CA, O=Example`.
///
/// Attribute types compare case-insensitively and are normalised to their
/// upper-case short form; values compare case-insensitively.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DistinguishedName {
    attributes: Vec<(String, String)>,
}

impl DistinguishedName {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subject name for an address certificate.
    pub fn for_address(address: &str) -> Self {
        Self::new()
            .with_email(address)
            .with_common_name(address)
    }

    pub fn with(mut self, attribute: &str, value: impl Into<String>) -> Self {
        self.attributes
            .push((normalize_attribute(attribute), value.into()));
        self
    }

    pub fn with_common_name(self, value: impl Into<String>) -> Self {
        self.with(COMMON_NAME, value)
    }

    pub fn with_email(self, value: impl Into<String>) -> Self {
        self.with(EMAIL_ADDRESS, value)
    }

    pub fn with_organization(self, value: impl Into<String>) -> Self {
        self.with(ORGANIZATION, value)
    }

    pub fn get(&self, attribute: &str) -> Option<&str> {
        let attribute = normalize_attribute(attribute);
        self.attributes
            .iter()
            .find(|(name, _)| *name == attribute)
            .map(|(_, value)| value.as_str())
    }

    pub fn common_name(&self) -> Option<&str> {
        self.get(COMMON_NAME)
    }

    pub fn email(&self) -> Option<&str> {
        self.get(EMAIL_ADDRESS)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

fn normalize_attribute(attribute: &str) -> String {
    let upper = attribute.trim().to_ascii_uppercase();
    match upper.as_str() {
        "E" | "EMAIL" | EMAIL_ADDRESS_OID => EMAIL_ADDRESS.to_string(),
        _ => upper,
    }
}

fn quote_value(value: &str) -> String {
    if value.contains([',', '=', '"', '+', ';']) || value.starts_with(' ') || value.ends_with(' ')
    {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn unquote_value(value: &str) -> String {
    let trimmed = value.trim();
    match trimmed
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => trimmed.to_string(),
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .zip(other.attributes.iter())
                .all(|((n1, v1), (n2, v2))| n1 == n2 && v1.eq_ignore_ascii_case(v2))
    }
}

impl Eq for DistinguishedName {}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .attributes
            .iter()
            .map(|(name, value)| format!("{name}={}", quote_value(value)))
            .collect();
        write!(f, "{}", rendered.join(", "))
    }
}

impl fmt::Debug for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DistinguishedName({self})")
    }
}

impl FromStr for DistinguishedName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut name = DistinguishedName::new();
        let mut consumed = 0;
        for capture in ATTRIBUTE.captures_iter(s) {
            let whole = capture.get(0).map(|m| m.as_str()).unwrap_or_default();
            if whole.trim().is_empty() {
                continue;
            }
            consumed += whole.len();
            let attribute = &capture[1];
            let value = unquote_value(&capture[2]);
            name = name.with(attribute, value);
        }
        if name.is_empty() || consumed < s.trim_end().len() {
            return Err(Error::Certificate(format!(
                "invalid distinguished name: {s}"
            )));
        }
        Ok(name)
    }
}

impl From<DistinguishedName> for String {
    fn from(name: DistinguishedName) -> Self {
        name.to_string()
    }
}

impl TryFrom<String> for DistinguishedName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
