//! Addresses, their bound certificates and trust status.

use mailparse::MailAddr;
use std::fmt;
use std::str::FromStr;

use crate::cert::{dedup_certificates, Certificate};
use crate::error::{AgentError, Error, Result};
use crate::trust::TrustEnforcementStatus;

/// Where an address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    /// SMTP `MAIL FROM`.
    MailFrom,
    /// SMTP `RCPT TO`.
    RcptTo,
    /// A message header (`From`, `To`, `Cc`, `Bcc`).
    Header,
}

/// An address taking part in one message, together with everything bound
/// to it while the message is processed.
#[derive(Debug, Clone)]
pub struct DirectAddress {
    address: String,
    domain: String,
    source: Option<AddressSource>,
    certificates: Vec<Certificate>,
    trust_anchors: Vec<Certificate>,
    status: TrustEnforcementStatus,
}

impl DirectAddress {
    pub fn new(address: &str) -> Result<Self> {
        let address = address.trim();
        let domain = match address.rsplit_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
                domain.to_ascii_lowercase()
            }
            _ => {
                return Err(Error::invalid_argument(format!(
                    "not an email address: {address:?}"
                )))
            }
        };
        Ok(Self {
            address: address.to_string(),
            domain,
            source: None,
            certificates: Vec::new(),
            trust_anchors: Vec::new(),
            status: TrustEnforcementStatus::default(),
        })
    }

    pub fn with_source(mut self, source: AddressSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Parses a single mailbox, with or without display name.
    pub fn parse(value: &str) -> Result<Self> {
        let mut addresses = parse_mailboxes(value)?;
        match addresses.len() {
            1 => Self::new(&addresses.remove(0)),
            0 => Err(Error::invalid_argument(format!("no address in {value:?}"))),
            _ => Err(Error::invalid_argument(format!(
                "expected a single address in {value:?}"
            ))),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn source(&self) -> Option<AddressSource> {
        self.source
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn has_certificates(&self) -> bool {
        !self.certificates.is_empty()
    }

    pub fn set_certificates(&mut self, certificates: Vec<Certificate>) {
        self.certificates = dedup_certificates(certificates);
    }

    pub fn trust_anchors(&self) -> &[Certificate] {
        &self.trust_anchors
    }

    pub fn has_trust_anchors(&self) -> bool {
        !self.trust_anchors.is_empty()
    }

    pub fn set_trust_anchors(&mut self, anchors: Vec<Certificate>) {
        self.trust_anchors = dedup_certificates(anchors);
    }

    pub fn status(&self) -> TrustEnforcementStatus {
        self.status
    }

    pub fn set_status(&mut self, status: TrustEnforcementStatus) {
        self.status = status;
    }

    pub fn is_trusted(&self, minimum: TrustEnforcementStatus) -> bool {
        self.status.meets(minimum)
    }

    pub fn is_in_domains<S: AsRef<str>>(&self, domains: &[S]) -> bool {
        domains
            .iter()
            .any(|d| d.as_ref().eq_ignore_ascii_case(&self.domain))
    }

    pub fn matches(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address.trim())
    }
}

impl PartialEq for DirectAddress {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.address)
    }
}

impl Eq for DirectAddress {}

impl fmt::Display for DirectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

impl FromStr for DirectAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DirectAddress::parse(s)
    }
}

/// Ordered addresses, unique by case-insensitive address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressCollection {
    addresses: Vec<DirectAddress>,
}

impl AddressCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a comma-separated address list such as a `To` header value.
    pub fn parse(value: &str, source: AddressSource) -> Result<Self> {
        let mut collection = Self::new();
        for mailbox in parse_mailboxes(value)? {
            collection.add(DirectAddress::new(&mailbox)?.with_source(source));
        }
        Ok(collection)
    }

    /// Adds the address unless it is already present. Returns true if added.
    pub fn add(&mut self, address: DirectAddress) -> bool {
        if self.contains(address.address()) {
            return false;
        }
        self.addresses.push(address);
        true
    }

    pub fn extend(&mut self, other: AddressCollection) {
        for address in other.addresses {
            self.add(address);
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.iter().any(|a| a.matches(address))
    }

    pub fn get(&self, address: &str) -> Option<&DirectAddress> {
        self.addresses.iter().find(|a| a.matches(address))
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut DirectAddress> {
        self.addresses.iter_mut().find(|a| a.matches(address))
    }

    pub fn remove(&mut self, address: &str) -> Option<DirectAddress> {
        let index = self.addresses.iter().position(|a| a.matches(address))?;
        Some(self.addresses.remove(index))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DirectAddress> {
        self.addresses.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, DirectAddress> {
        self.addresses.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Splits into (addresses in `domains`, everything else).
    pub fn split_by_domain<S: AsRef<str>>(
        &self,
        domains: &[S],
    ) -> (AddressCollection, AddressCollection) {
        let (inside, outside): (Vec<_>, Vec<_>) = self
            .addresses
            .iter()
            .cloned()
            .partition(|a| a.is_in_domains(domains));
        (
            AddressCollection { addresses: inside },
            AddressCollection { addresses: outside },
        )
    }

    pub fn trusted(&self, minimum: TrustEnforcementStatus) -> AddressCollection {
        self.addresses
            .iter()
            .filter(|a| a.is_trusted(minimum))
            .cloned()
            .collect()
    }

    pub fn untrusted(&self, minimum: TrustEnforcementStatus) -> AddressCollection {
        self.addresses
            .iter()
            .filter(|a| !a.is_trusted(minimum))
            .cloned()
            .collect()
    }

    /// Removes and returns every address below `minimum`.
    pub fn remove_untrusted(&mut self, minimum: TrustEnforcementStatus) -> AddressCollection {
        let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.addresses)
            .into_iter()
            .partition(|a| a.is_trusted(minimum));
        self.addresses = kept;
        AddressCollection { addresses: removed }
    }

    /// Union of the certificates bound to every member.
    pub fn certificates(&self) -> Vec<Certificate> {
        dedup_certificates(self.addresses.iter().flat_map(|a| a.certificates.iter().cloned()))
    }

    pub fn set_status(&mut self, status: TrustEnforcementStatus) {
        for address in &mut self.addresses {
            address.set_status(status);
        }
    }

    /// Rendered as a header value: `a@x.com, b@y.com`.
    pub fn to_header_value(&self) -> String {
        self.addresses
            .iter()
            .map(|a| a.address.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromIterator<DirectAddress> for AddressCollection {
    fn from_iter<I: IntoIterator<Item = DirectAddress>>(iter: I) -> Self {
        let mut collection = AddressCollection::new();
        for address in iter {
            collection.add(address);
        }
        collection
    }
}

impl<'a> IntoIterator for &'a AddressCollection {
    type Item = &'a DirectAddress;
    type IntoIter = std::slice::Iter<'a, DirectAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.addresses.iter()
    }
}

impl IntoIterator for AddressCollection {
    type Item = DirectAddress;
    type IntoIter = std::vec::IntoIter<DirectAddress>;

    fn into_iter(self) -> Self::IntoIter {
        self.addresses.into_iter()
    }
}

impl fmt::Display for AddressCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header_value())
    }
}

/// Bare mailbox addresses found in an address-list header value.
pub fn parse_mailboxes(value: &str) -> Result<Vec<String>> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    let list = mailparse::addrparse(value)
        .map_err(|e| Error::invalid_argument(format!("invalid address list {value:?}: {e}")))?;
    let mut mailboxes = Vec::new();
    for entry in list.iter() {
        match entry {
            MailAddr::Single(single) => mailboxes.push(single.addr.clone()),
            MailAddr::Group(group) => {
                mailboxes.extend(group.addrs.iter().map(|s| s.addr.clone()))
            }
        }
    }
    Ok(mailboxes)
}

/// Resolves the sender from a `From` header value.
pub fn sender_from_header(value: Option<&str>) -> Result<DirectAddress> {
    let value = value.ok_or(AgentError::MissingFrom)?;
    let mut mailboxes = parse_mailboxes(value)?;
    if mailboxes.is_empty() {
        return Err(AgentError::MissingFrom.into());
    }
    Ok(DirectAddress::new(&mailboxes.remove(0))?.with_source(AddressSource::Header))
}
