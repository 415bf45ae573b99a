use crate::mail::is_mime_header;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.is_named(name))
            .map(|h| h.value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |h| h.is_named(name))
            .map(|h| h.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|h| h.is_named(name))
    }

    /// Replaces the first header with this name, dropping any duplicates.
    /// Appends when the header is absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter().position(|h| h.is_named(name)) {
            Some(index) => {
                self.0[index].value = value;
                let mut seen = 0;
                self.0.retain(|h| {
                    if h.is_named(name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.0.push(Header::new(name, value)),
        }
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Header::new(name, value));
    }

    /// Removes every header with this name. Returns true if any were present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|h| !h.is_named(name));
        before != self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Headers describing the MIME content only.
    pub fn mime_headers(&self) -> Headers {
        Headers(
            self.0
                .iter()
                .filter(|h| is_mime_header(&h.name))
                .cloned()
                .collect(),
        )
    }

    /// Headers describing the message (everything except MIME content headers).
    pub fn message_headers(&self) -> Headers {
        Headers(
            self.0
                .iter()
                .filter(|h| !is_mime_header(&h.name))
                .cloned()
                .collect(),
        )
    }

    /// Sets every header from `other`, replacing same-named headers here.
    pub fn merge(&mut self, other: &Headers) {
        for header in other.iter() {
            self.set(&header.name, header.value.clone());
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        for header in &self.0 {
            out.extend_from_slice(header.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(header.value.as_bytes());
            out.extend_from_slice(crate::mail::CRLF);
        }
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Headers(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.contains("CONTENT-TYPE"));
    }

    #[test]
    fn test_set_replaces_and_dedups() {
        let mut headers = Headers::new();
        headers.append("To", "a@x.com");
        headers.append("Subject", "hi");
        headers.append("to", "b@x.com");
        headers.set("To", "c@x.com");
        assert_eq!(headers.get_all("To").collect::<Vec<_>>(), vec!["c@x.com"]);
        // position of the first occurrence is kept
        assert_eq!(headers.iter().next().map(|h| h.value.as_str()), Some("c@x.com"));
    }

    #[test]
    fn test_mime_and_message_split() {
        let mut headers = Headers::new();
        headers.append("From", "a@x.com");
        headers.append("MIME-Version", "1.0");
        headers.append("Content-Type", "text/plain");
        assert_eq!(headers.mime_headers().len(), 2);
        assert_eq!(headers.message_headers().len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new();
        headers.append("Cc", "a@x.com");
        assert!(headers.remove("cc"));
        assert!(!headers.remove("cc"));
        assert!(headers.is_empty());
    }
}
