//! Message envelopes: the message, its sender and its recipients as they
//! move through incoming or outgoing processing.

use mailparse::MailAddr;

use crate::address::{sender_from_header, AddressCollection, AddressSource, DirectAddress};
use crate::crypto::{SignedData, SignedEntity};
use crate::error::{AgentError, Error, MessageDirection, Result};
use crate::mail::{MimeEntity, FROM, RECIPIENT_HEADERS};
use crate::trust::TrustEnforcementStatus;

/// A message with its routing information.
///
/// Recipients are split into those inside the agent's domains and the rest
/// by [`MessageEnvelope::categorize_recipients`]; the split is a snapshot and
/// is not kept in sync with later changes to the domain list.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    message: MimeEntity,
    sender: Option<DirectAddress>,
    recipients: AddressCollection,
    domain_recipients: AddressCollection,
    other_recipients: AddressCollection,
    rejected_recipients: AddressCollection,
    domains: Vec<String>,
}

impl MessageEnvelope {
    /// An envelope given explicitly, as from SMTP `MAIL FROM` / `RCPT TO`.
    pub fn new(message: MimeEntity, recipients: AddressCollection, sender: DirectAddress) -> Self {
        Self {
            message,
            sender: Some(sender),
            recipients,
            domain_recipients: AddressCollection::new(),
            other_recipients: AddressCollection::new(),
            rejected_recipients: AddressCollection::new(),
            domains: Vec::new(),
        }
    }

    /// Builds the envelope from the message's `From`, `To`, `Cc` and `Bcc`
    /// headers. Missing addresses are left empty and caught by
    /// [`MessageEnvelope::validate`].
    pub fn from_message(message: MimeEntity) -> Result<Self> {
        let sender = message
            .header(FROM)
            .filter(|value| !value.trim().is_empty())
            .map(|value| sender_from_header(Some(value)))
            .transpose()?;
        let mut recipients = AddressCollection::new();
        for name in RECIPIENT_HEADERS {
            for value in message.headers().get_all(name) {
                recipients.extend(AddressCollection::parse(value, AddressSource::Header)?);
            }
        }
        Ok(Self {
            message,
            sender,
            recipients,
            domain_recipients: AddressCollection::new(),
            other_recipients: AddressCollection::new(),
            rejected_recipients: AddressCollection::new(),
            domains: Vec::new(),
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        Self::from_message(parse_message_text(text)?)
    }

    /// Parses `text` but routes it using the given envelope addresses.
    pub fn parse_with_envelope(text: &str, recipients: &str, sender: &str) -> Result<Self> {
        let message = parse_message_text(text)?;
        let recipients = AddressCollection::parse(recipients, AddressSource::RcptTo)?;
        let sender = DirectAddress::parse(sender)?.with_source(AddressSource::MailFrom);
        Ok(Self::new(message, recipients, sender))
    }

    pub fn message(&self) -> &MimeEntity {
        &self.message
    }

    pub fn set_message(&mut self, message: MimeEntity) {
        self.message = message;
    }

    pub fn sender(&self) -> Option<&DirectAddress> {
        self.sender.as_ref()
    }

    pub fn sender_mut(&mut self) -> Option<&mut DirectAddress> {
        self.sender.as_mut()
    }

    pub fn recipients(&self) -> &AddressCollection {
        &self.recipients
    }

    pub fn recipients_mut(&mut self) -> &mut AddressCollection {
        &mut self.recipients
    }

    pub fn domain_recipients(&self) -> &AddressCollection {
        &self.domain_recipients
    }

    pub fn domain_recipients_mut(&mut self) -> &mut AddressCollection {
        &mut self.domain_recipients
    }

    pub fn other_recipients(&self) -> &AddressCollection {
        &self.other_recipients
    }

    pub fn rejected_recipients(&self) -> &AddressCollection {
        &self.rejected_recipients
    }

    pub fn has_rejected_recipients(&self) -> bool {
        !self.rejected_recipients.is_empty()
    }

    /// The agent domains used for the last categorization.
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn validate(&self) -> Result<()> {
        if self.recipients.is_empty() {
            return Err(AgentError::NoRecipients.into());
        }
        if self.sender.is_none() {
            return Err(AgentError::NoSender.into());
        }
        Ok(())
    }

    pub fn categorize_recipients(&mut self, domains: &[String]) {
        let (inside, outside) = self.recipients.split_by_domain(domains);
        self.domain_recipients = inside;
        self.other_recipients = outside;
        self.domains = domains.to_vec();
    }

    /// Moves every domain recipient below `minimum` from the recipient lists
    /// to the rejected list.
    pub fn reject_untrusted_domain_recipients(&mut self, minimum: TrustEnforcementStatus) {
        copy_bindings(&self.domain_recipients, &mut self.recipients);
        let rejected = self.domain_recipients.remove_untrusted(minimum);
        self.reject(rejected);
    }

    /// Moves every recipient below `minimum` to the rejected list.
    pub fn reject_untrusted_recipients(&mut self, minimum: TrustEnforcementStatus) {
        copy_bindings(&self.recipients, &mut self.domain_recipients);
        copy_bindings(&self.recipients, &mut self.other_recipients);
        let rejected = self.recipients.remove_untrusted(minimum);
        for address in &rejected {
            self.domain_recipients.remove(address.address());
            self.other_recipients.remove(address.address());
        }
        self.rejected_recipients.extend(rejected);
    }

    fn reject(&mut self, rejected: AddressCollection) {
        for address in &rejected {
            self.recipients.remove(address.address());
            self.other_recipients.remove(address.address());
        }
        self.rejected_recipients.extend(rejected);
    }

    /// Rewrites `To`, `Cc` and `Bcc` without the rejected recipients. A
    /// header left without addresses is removed.
    pub fn update_routing_headers(&mut self) -> Result<()> {
        if self.rejected_recipients.is_empty() {
            return Ok(());
        }
        for name in RECIPIENT_HEADERS {
            let values: Vec<String> = self
                .message
                .headers()
                .get_all(name)
                .map(str::to_string)
                .collect();
            if values.is_empty() {
                continue;
            }
            let mut kept = Vec::new();
            for value in &values {
                let list = mailparse::addrparse(value).map_err(Error::from)?;
                for entry in list.iter() {
                    match entry {
                        MailAddr::Single(single) => {
                            if !self.rejected_recipients.contains(&single.addr) {
                                kept.push(render_mailbox(single));
                            }
                        }
                        MailAddr::Group(group) => {
                            let members: Vec<String> = group
                                .addrs
                                .iter()
                                .filter(|s| !self.rejected_recipients.contains(&s.addr))
                                .map(render_mailbox)
                                .collect();
                            if !members.is_empty() {
                                kept.push(format!("{}: {};", group.group_name, members.join(", ")));
                            }
                        }
                    }
                }
            }
            let headers = self.message.headers_mut();
            headers.remove(name);
            if !kept.is_empty() {
                headers.set(name, kept.join(", "));
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.message.to_bytes()
    }
}

/// Copies status and certificates from `source` onto the same addresses in
/// `target`.
fn copy_bindings(source: &AddressCollection, target: &mut AddressCollection) {
    for address in target.iter_mut() {
        if let Some(bound) = source.get(address.address()) {
            address.set_status(bound.status());
            address.set_certificates(bound.certificates().to_vec());
            address.set_trust_anchors(bound.trust_anchors().to_vec());
        }
    }
}

fn render_mailbox(single: &mailparse::SingleInfo) -> String {
    match &single.display_name {
        Some(name) if !name.is_empty() => {
            format!("\"{}\" <{}>", name.replace('"', ""), single.addr)
        }
        _ => single.addr.clone(),
    }
}

fn parse_message_text(text: &str) -> Result<MimeEntity> {
    if text.trim().is_empty() {
        return Err(AgentError::MissingMessage.into());
    }
    text.parse()
}

/// A message received from another domain, on its way to local recipients.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    envelope: MessageEnvelope,
    signature: Option<SignedData>,
}

impl IncomingMessage {
    pub fn new(envelope: MessageEnvelope) -> Self {
        Self {
            envelope,
            signature: None,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self::new(MessageEnvelope::parse(text)?))
    }

    pub fn direction(&self) -> MessageDirection {
        MessageDirection::Incoming
    }

    pub fn envelope(&self) -> &MessageEnvelope {
        &self.envelope
    }

    pub fn envelope_mut(&mut self) -> &mut MessageEnvelope {
        &mut self.envelope
    }

    pub fn into_envelope(self) -> MessageEnvelope {
        self.envelope
    }

    pub fn message(&self) -> &MimeEntity {
        self.envelope.message()
    }

    pub fn sender(&self) -> Option<&DirectAddress> {
        self.envelope.sender()
    }

    pub fn domain_recipients(&self) -> &AddressCollection {
        self.envelope.domain_recipients()
    }

    pub fn rejected_recipients(&self) -> &AddressCollection {
        self.envelope.rejected_recipients()
    }

    /// Signature information captured when the message was verified.
    pub fn signature(&self) -> Option<&SignedData> {
        self.signature.as_ref()
    }

    pub fn has_signatures(&self) -> bool {
        self.signature
            .as_ref()
            .is_some_and(|s| !s.signatures().is_empty())
    }

    pub fn set_signature(&mut self, signature: SignedData) {
        self.signature = Some(signature);
    }
}

impl From<MessageEnvelope> for IncomingMessage {
    fn from(envelope: MessageEnvelope) -> Self {
        IncomingMessage::new(envelope)
    }
}

/// A locally originated message on its way out.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    envelope: MessageEnvelope,
    signature: Option<SignedEntity>,
}

impl OutgoingMessage {
    pub fn new(envelope: MessageEnvelope) -> Self {
        Self {
            envelope,
            signature: None,
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self::new(MessageEnvelope::parse(text)?))
    }

    pub fn direction(&self) -> MessageDirection {
        MessageDirection::Outgoing
    }

    pub fn envelope(&self) -> &MessageEnvelope {
        &self.envelope
    }

    pub fn envelope_mut(&mut self) -> &mut MessageEnvelope {
        &mut self.envelope
    }

    pub fn into_envelope(self) -> MessageEnvelope {
        self.envelope
    }

    pub fn message(&self) -> &MimeEntity {
        self.envelope.message()
    }

    pub fn sender(&self) -> Option<&DirectAddress> {
        self.envelope.sender()
    }

    pub fn recipients(&self) -> &AddressCollection {
        self.envelope.recipients()
    }

    pub fn rejected_recipients(&self) -> &AddressCollection {
        self.envelope.rejected_recipients()
    }

    /// The detached signature produced when the message was signed.
    pub fn signature(&self) -> Option<&SignedEntity> {
        self.signature.as_ref()
    }

    pub fn set_signature(&mut self, signature: SignedEntity) {
        self.signature = Some(signature);
    }
}

impl From<MessageEnvelope> for OutgoingMessage {
    fn from(envelope: MessageEnvelope) -> Self {
        OutgoingMessage::new(envelope)
    }
}
