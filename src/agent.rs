//! The agent: binds addresses to certificates, signs, encrypts, decrypts
//! and enforces trust on messages crossing the boundary of its domains.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::address::DirectAddress;
use crate::cert::{Certificate, CertificateResolver, TrustAnchorResolver};
use crate::crypto::{
    is_enveloped_signature, is_multipart_signature, Cryptographer, SignedData, SignedEntity,
    SmimeCryptographer,
};
use crate::envelope::{IncomingMessage, MessageEnvelope, OutgoingMessage};
use crate::error::{AgentError, Error, MessageDirection, ProcessingError, Result, TrustError};
use crate::mail::{MimeEntity, WrappedMessage, ROUTING_HEADERS};
use crate::trust::chain::DEFAULT_MAX_ISSUER_CHAIN_LENGTH;
use crate::trust::{DefaultTrustModel, TrustChainValidator, TrustEnforcementStatus, TrustModel};

/// Hooks invoked synchronously around message processing.
///
/// Hooks run while the agent's configuration is read-locked, so they must
/// not call the agent's setters. An error returned by a hook is surfaced
/// to the caller.
pub trait AgentEventListener: Send + Sync {
    fn pre_process_incoming(&self, _message: &IncomingMessage) -> Result<()> {
        Ok(())
    }

    fn post_process_incoming(&self, _message: &IncomingMessage) -> Result<()> {
        Ok(())
    }

    fn error_incoming(&self, _message: &IncomingMessage, _error: &Error) -> Result<()> {
        Ok(())
    }

    fn pre_process_outgoing(&self, _message: &OutgoingMessage) -> Result<()> {
        Ok(())
    }

    fn post_process_outgoing(&self, _message: &OutgoingMessage) -> Result<()> {
        Ok(())
    }

    fn error_outgoing(&self, _message: &OutgoingMessage, _error: &Error) -> Result<()> {
        Ok(())
    }
}

/// Everything the agent is configured with. Guarded as a unit.
#[derive(Clone)]
struct AgentSettings {
    domains: Vec<String>,
    private_resolver: Arc<dyn CertificateResolver>,
    public_resolvers: Vec<Arc<dyn CertificateResolver>>,
    trust_anchors: Arc<dyn TrustAnchorResolver>,
    cryptographer: Arc<dyn Cryptographer>,
    trust_model: Arc<dyn TrustModel>,
    encryption_enabled: bool,
    wrapping_enabled: bool,
    min_trust_requirement: TrustEnforcementStatus,
    listener: Option<Arc<dyn AgentEventListener>>,
}

pub struct DirectAgent {
    settings: RwLock<AgentSettings>,
}

fn normalize_domains(domains: Vec<String>) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::new();
    for domain in domains {
        let domain = domain.trim().to_ascii_lowercase();
        if domain.is_empty() {
            continue;
        }
        if !normalized.contains(&domain) {
            normalized.push(domain);
        }
    }
    if normalized.is_empty() {
        return Err(Error::invalid_argument("at least one domain is required"));
    }
    Ok(normalized)
}

fn check_min_trust(status: TrustEnforcementStatus) -> Result<()> {
    if status < TrustEnforcementStatus::MINIMUM_ACCEPTABLE {
        return Err(Error::invalid_argument(format!(
            "minimum trust requirement {status} is below {}",
            TrustEnforcementStatus::MINIMUM_ACCEPTABLE
        )));
    }
    Ok(())
}

impl DirectAgent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn domains(&self) -> Vec<String> {
        self.settings.read().domains.clone()
    }

    pub fn set_domains(&self, domains: Vec<String>) -> Result<()> {
        let domains = normalize_domains(domains)?;
        log::info!("Agent domains set to {}", domains.join(", "));
        self.settings.write().domains = domains;
        Ok(())
    }

    pub fn private_resolver(&self) -> Arc<dyn CertificateResolver> {
        self.settings.read().private_resolver.clone()
    }

    pub fn set_private_resolver(&self, resolver: Arc<dyn CertificateResolver>) {
        self.settings.write().private_resolver = resolver;
    }

    pub fn public_resolvers(&self) -> Vec<Arc<dyn CertificateResolver>> {
        self.settings.read().public_resolvers.clone()
    }

    pub fn set_public_resolvers(&self, resolvers: Vec<Arc<dyn CertificateResolver>>) -> Result<()> {
        if resolvers.is_empty() {
            return Err(Error::invalid_argument("at least one public resolver is required"));
        }
        self.settings.write().public_resolvers = resolvers;
        Ok(())
    }

    pub fn trust_anchors(&self) -> Arc<dyn TrustAnchorResolver> {
        self.settings.read().trust_anchors.clone()
    }

    pub fn set_trust_anchors(&self, anchors: Arc<dyn TrustAnchorResolver>) {
        self.settings.write().trust_anchors = anchors;
    }

    pub fn cryptographer(&self) -> Arc<dyn Cryptographer> {
        self.settings.read().cryptographer.clone()
    }

    pub fn set_cryptographer(&self, cryptographer: Arc<dyn Cryptographer>) {
        self.settings.write().cryptographer = cryptographer;
    }

    pub fn trust_model(&self) -> Arc<dyn TrustModel> {
        self.settings.read().trust_model.clone()
    }

    pub fn set_trust_model(&self, model: Arc<dyn TrustModel>) {
        self.settings.write().trust_model = model;
    }

    pub fn is_encryption_enabled(&self) -> bool {
        self.settings.read().encryption_enabled
    }

    pub fn set_encryption_enabled(&self, enabled: bool) {
        self.settings.write().encryption_enabled = enabled;
    }

    pub fn is_wrapping_enabled(&self) -> bool {
        self.settings.read().wrapping_enabled
    }

    pub fn set_wrapping_enabled(&self, enabled: bool) {
        self.settings.write().wrapping_enabled = enabled;
    }

    pub fn min_trust_requirement(&self) -> TrustEnforcementStatus {
        self.settings.read().min_trust_requirement
    }

    /// Fails when `status` is weaker than `SuccessOffline`.
    pub fn set_min_trust_requirement(&self, status: TrustEnforcementStatus) -> Result<()> {
        check_min_trust(status)?;
        self.settings.write().min_trust_requirement = status;
        Ok(())
    }

    pub fn listener(&self) -> Option<Arc<dyn AgentEventListener>> {
        self.settings.read().listener.clone()
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn AgentEventListener>>) {
        self.settings.write().listener = listener;
    }

    // ---- incoming ----

    /// Processes a raw message, taking the envelope from its headers.
    pub fn process_incoming_text(
        &self,
        text: &str,
    ) -> std::result::Result<IncomingMessage, ProcessingError> {
        let message = IncomingMessage::parse(text)
            .map_err(|e| input_failure(MessageDirection::Incoming, e))?;
        self.process_incoming(message)
    }

    pub fn process_incoming_text_with_envelope(
        &self,
        text: &str,
        recipients: &str,
        sender: &str,
    ) -> std::result::Result<IncomingMessage, ProcessingError> {
        let envelope = MessageEnvelope::parse_with_envelope(text, recipients, sender)
            .map_err(|e| input_failure(MessageDirection::Incoming, e))?;
        self.process_incoming(IncomingMessage::new(envelope))
    }

    pub fn process_incoming_envelope(
        &self,
        envelope: MessageEnvelope,
    ) -> std::result::Result<IncomingMessage, ProcessingError> {
        self.process_incoming(IncomingMessage::new(envelope))
    }

    pub fn process_incoming_mime(
        &self,
        message: MimeEntity,
    ) -> std::result::Result<IncomingMessage, ProcessingError> {
        let envelope = MessageEnvelope::from_message(message)
            .map_err(|e| input_failure(MessageDirection::Incoming, e))?;
        self.process_incoming(IncomingMessage::new(envelope))
    }

    /// Decrypts, verifies and trust-checks `message` for the agent's
    /// domain recipients.
    pub fn process_incoming(
        &self,
        mut message: IncomingMessage,
    ) -> std::result::Result<IncomingMessage, ProcessingError> {
        let settings = self.settings.read();
        log::debug!(
            "Processing incoming message from {}",
            message
                .sender()
                .map(|s| s.address().to_string())
                .unwrap_or_else(|| "<none>".to_string())
        );

        let result = message.envelope().validate().and_then(|()| {
            if let Some(listener) = &settings.listener {
                listener.pre_process_incoming(&message)?;
            }
            process_incoming_message(&settings, &mut message)?;
            if let Some(listener) = &settings.listener {
                listener.post_process_incoming(&message)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(message),
            Err(error) => {
                log::error!("Error processing incoming message: {error}");
                if let Some(listener) = &settings.listener {
                    if let Err(hook_error) = listener.error_incoming(&message, &error) {
                        log::error!("Incoming error hook failed: {hook_error}");
                        return Err(ProcessingError::new(MessageDirection::Incoming, hook_error));
                    }
                }
                Err(ProcessingError::new(MessageDirection::Incoming, error))
            }
        }
    }

    // ---- outgoing ----

    pub fn process_outgoing_text(
        &self,
        text: &str,
    ) -> std::result::Result<OutgoingMessage, ProcessingError> {
        let message = OutgoingMessage::parse(text)
            .map_err(|e| input_failure(MessageDirection::Outgoing, e))?;
        self.process_outgoing(message)
    }

    pub fn process_outgoing_text_with_envelope(
        &self,
        text: &str,
        recipients: &str,
        sender: &str,
    ) -> std::result::Result<OutgoingMessage, ProcessingError> {
        let envelope = MessageEnvelope::parse_with_envelope(text, recipients, sender)
            .map_err(|e| input_failure(MessageDirection::Outgoing, e))?;
        self.process_outgoing(OutgoingMessage::new(envelope))
    }

    pub fn process_outgoing_envelope(
        &self,
        envelope: MessageEnvelope,
    ) -> std::result::Result<OutgoingMessage, ProcessingError> {
        self.process_outgoing(OutgoingMessage::new(envelope))
    }

    pub fn process_outgoing_mime(
        &self,
        message: MimeEntity,
    ) -> std::result::Result<OutgoingMessage, ProcessingError> {
        let envelope = MessageEnvelope::from_message(message)
            .map_err(|e| input_failure(MessageDirection::Outgoing, e))?;
        self.process_outgoing(OutgoingMessage::new(envelope))
    }

    /// Wraps, signs and encrypts `message` for its trusted recipients.
    pub fn process_outgoing(
        &self,
        mut message: OutgoingMessage,
    ) -> std::result::Result<OutgoingMessage, ProcessingError> {
        let settings = self.settings.read();
        log::debug!(
            "Processing outgoing message to {}",
            message.recipients().to_header_value()
        );

        let result = message.envelope().validate().and_then(|()| {
            if let Some(listener) = &settings.listener {
                listener.pre_process_outgoing(&message)?;
            }
            process_outgoing_message(&settings, &mut message)?;
            if let Some(listener) = &settings.listener {
                listener.post_process_outgoing(&message)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(message),
            Err(error) => {
                log::error!("Error processing outgoing message: {error}");
                if let Some(listener) = &settings.listener {
                    if let Err(hook_error) = listener.error_outgoing(&message, &error) {
                        log::error!("Outgoing error hook failed: {hook_error}");
                        return Err(ProcessingError::new(MessageDirection::Outgoing, hook_error));
                    }
                }
                Err(ProcessingError::new(MessageDirection::Outgoing, error))
            }
        }
    }
}

fn input_failure(direction: MessageDirection, error: Error) -> ProcessingError {
    log::error!("Rejected {direction} message input: {error}");
    ProcessingError::new(direction, error)
}

fn process_incoming_message(settings: &AgentSettings, message: &mut IncomingMessage) -> Result<()> {
    let envelope = message.envelope_mut();
    envelope.categorize_recipients(&settings.domains);
    if envelope.domain_recipients().is_empty() {
        return Err(AgentError::NoTrustedRecipients.into());
    }

    bind_incoming(settings, envelope);

    let decrypted = decrypt_message(settings, message)?;
    let signed = read_signature(settings, &decrypted)?;
    let payload = signed.content().clone();
    message.set_signature(signed);

    let processed = if WrappedMessage::is_wrapped(&payload) {
        WrappedMessage::extract(&payload)?
    } else {
        let mut processed = message.message().clone();
        processed.replace_content(&payload);
        processed
    };
    message.envelope_mut().set_message(processed);

    settings.trust_model.enforce_incoming(message)?;

    let envelope = message.envelope_mut();
    envelope.reject_untrusted_domain_recipients(settings.min_trust_requirement);
    for rejected in envelope.rejected_recipients() {
        log::info!(
            "Rejected incoming recipient {} with trust status {}",
            rejected,
            rejected.status()
        );
    }
    if envelope.domain_recipients().is_empty() {
        return Err(TrustError::NoTrustedRecipients.into());
    }
    envelope.update_routing_headers()
}

fn bind_incoming(settings: &AgentSettings, envelope: &mut MessageEnvelope) {
    if let Some(sender) = envelope.sender_mut() {
        let certificates = resolve_public(settings, sender, false).unwrap_or_default();
        if certificates.is_empty() {
            log::warn!("No public certificate found for sender {}", sender);
        }
        sender.set_certificates(certificates);
    }

    let anchors = settings.trust_anchors.incoming_anchors();
    for recipient in envelope.domain_recipients_mut().iter_mut() {
        let certificates = resolve_private(settings, recipient, false).unwrap_or_default();
        if certificates.is_empty() {
            log::warn!("No private certificate found for recipient {}", recipient);
        }
        recipient.set_certificates(certificates);

        let trust_anchors = resolve_anchors(anchors, recipient);
        if trust_anchors.is_empty() {
            log::warn!("No incoming trust anchors found for recipient {}", recipient);
        }
        recipient.set_trust_anchors(trust_anchors);
    }
}

/// Tries the private certificates of each domain recipient in turn.
fn decrypt_message(settings: &AgentSettings, message: &IncomingMessage) -> Result<MimeEntity> {
    let content = message.message().content_entity();
    if !settings.encryption_enabled {
        return Ok(content);
    }
    for recipient in message.domain_recipients() {
        for certificate in recipient.certificates() {
            match settings.cryptographer.decrypt(&content, certificate) {
                Ok(decrypted) => {
                    log::debug!(
                        "Decrypted message for {} with {}",
                        recipient,
                        certificate.subject()
                    );
                    return Ok(decrypted);
                }
                Err(e) => log::debug!(
                    "Decryption with {} failed: {}",
                    certificate.subject(),
                    e
                ),
            }
        }
    }
    Err(AgentError::UntrustedMessage.into())
}

fn read_signature(settings: &AgentSettings, entity: &MimeEntity) -> Result<SignedData> {
    if is_enveloped_signature(entity) {
        settings.cryptographer.deserialize_enveloped_signature(entity)
    } else if is_multipart_signature(entity) {
        let signed = SignedEntity::load(entity)?;
        settings.cryptographer.deserialize_signature_envelope(&signed)
    } else {
        Err(AgentError::UnsignedMessage.into())
    }
}

fn process_outgoing_message(settings: &AgentSettings, message: &mut OutgoingMessage) -> Result<()> {
    if settings.wrapping_enabled && !WrappedMessage::is_wrapped(message.message()) {
        let wrapped = WrappedMessage::create(message.message(), &ROUTING_HEADERS);
        message.envelope_mut().set_message(wrapped);
    }

    let envelope = message.envelope_mut();
    bind_outgoing(settings, envelope)?;
    envelope.categorize_recipients(&settings.domains);

    settings.trust_model.enforce_outgoing(message)?;

    let envelope = message.envelope_mut();
    envelope.reject_untrusted_recipients(settings.min_trust_requirement);
    for rejected in envelope.rejected_recipients() {
        log::info!(
            "Rejected outgoing recipient {} with trust status {}",
            rejected,
            rejected.status()
        );
    }
    if envelope.recipients().is_empty() {
        return Err(AgentError::NoTrustedRecipients.into());
    }

    sign_and_encrypt(settings, message)?;
    message.envelope_mut().update_routing_headers()
}

fn bind_outgoing(settings: &AgentSettings, envelope: &mut MessageEnvelope) -> Result<()> {
    let anchors = settings.trust_anchors.outgoing_anchors();
    if let Some(sender) = envelope.sender_mut() {
        let certificates = resolve_private(settings, sender, true)?;
        if certificates.is_empty() {
            log::warn!("No private certificate found for sender {}", sender);
        }
        sender.set_certificates(certificates);

        let trust_anchors = resolve_anchors(anchors, sender);
        if trust_anchors.is_empty() {
            log::warn!("No outgoing trust anchors found for sender {}", sender);
        }
        sender.set_trust_anchors(trust_anchors);
    }

    for recipient in envelope.recipients_mut().iter_mut() {
        let certificates = resolve_public(settings, recipient, false)?;
        if certificates.is_empty() {
            log::warn!("No public certificate found for recipient {}", recipient);
        }
        recipient.set_certificates(certificates);
    }
    Ok(())
}

/// Signs with the sender's private certificates, then encrypts for the
/// remaining recipients.
fn sign_and_encrypt(settings: &AgentSettings, message: &mut OutgoingMessage) -> Result<()> {
    let signers: Vec<Certificate> = message
        .sender()
        .map(|s| {
            s.certificates()
                .iter()
                .filter(|c| c.has_private_key())
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    if signers.is_empty() {
        return Err(AgentError::UntrustedSender.into());
    }

    let signed = settings
        .cryptographer
        .sign(&message.message().content_entity(), &signers)?;
    let signed_entity = signed.to_entity();

    let content = if settings.encryption_enabled {
        let recipients = message.recipients().certificates();
        settings.cryptographer.encrypt(&signed_entity, &recipients)?
    } else {
        signed_entity
    };

    let mut processed = message.message().clone();
    processed.replace_content(&content);
    message.envelope_mut().set_message(processed);
    message.set_signature(signed);
    Ok(())
}

/// Public certificates from the first resolver that knows the address.
fn resolve_public(
    settings: &AgentSettings,
    address: &DirectAddress,
    required: bool,
) -> Result<Vec<Certificate>> {
    for resolver in &settings.public_resolvers {
        match resolver.certificates(address.address()) {
            Ok(certificates) if !certificates.is_empty() => {
                return Ok(certificates.into_iter().map(|c| c.public()).collect())
            }
            Ok(_) => {}
            Err(e) if required => return Err(e),
            Err(e) => log::warn!("Public certificate lookup for {} failed: {}", address, e),
        }
    }
    Ok(Vec::new())
}

fn resolve_private(
    settings: &AgentSettings,
    address: &DirectAddress,
    required: bool,
) -> Result<Vec<Certificate>> {
    match settings.private_resolver.certificates(address.address()) {
        Ok(certificates) => Ok(certificates),
        Err(e) if required => Err(e),
        Err(e) => {
            log::warn!("Private certificate lookup for {} failed: {}", address, e);
            Ok(Vec::new())
        }
    }
}

fn resolve_anchors(
    resolver: &dyn CertificateResolver,
    address: &DirectAddress,
) -> Vec<Certificate> {
    resolver.certificates(address.address()).unwrap_or_else(|e| {
        log::warn!("Trust anchor lookup for {} failed: {}", address, e);
        Vec::new()
    })
}

/// Assembles a [`DirectAgent`].
#[derive(Default)]
pub struct AgentBuilder {
    domains: Vec<String>,
    private_resolver: Option<Arc<dyn CertificateResolver>>,
    public_resolvers: Vec<Arc<dyn CertificateResolver>>,
    trust_anchors: Option<Arc<dyn TrustAnchorResolver>>,
    cryptographer: Option<Arc<dyn Cryptographer>>,
    trust_model: Option<Arc<dyn TrustModel>>,
    encryption_enabled: Option<bool>,
    wrapping_enabled: Option<bool>,
    min_trust_requirement: Option<TrustEnforcementStatus>,
    max_issuer_chain_length: Option<usize>,
    listener: Option<Arc<dyn AgentEventListener>>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn private_resolver(mut self, resolver: Arc<dyn CertificateResolver>) -> Self {
        self.private_resolver = Some(resolver);
        self
    }

    pub fn public_resolver(mut self, resolver: Arc<dyn CertificateResolver>) -> Self {
        self.public_resolvers.push(resolver);
        self
    }

    pub fn trust_anchors(mut self, anchors: Arc<dyn TrustAnchorResolver>) -> Self {
        self.trust_anchors = Some(anchors);
        self
    }

    pub fn cryptographer(mut self, cryptographer: Arc<dyn Cryptographer>) -> Self {
        self.cryptographer = Some(cryptographer);
        self
    }

    pub fn trust_model(mut self, model: Arc<dyn TrustModel>) -> Self {
        self.trust_model = Some(model);
        self
    }

    pub fn encryption_enabled(mut self, enabled: bool) -> Self {
        self.encryption_enabled = Some(enabled);
        self
    }

    pub fn wrapping_enabled(mut self, enabled: bool) -> Self {
        self.wrapping_enabled = Some(enabled);
        self
    }

    pub fn min_trust_requirement(mut self, status: TrustEnforcementStatus) -> Self {
        self.min_trust_requirement = Some(status);
        self
    }

    /// Chain length for the default trust model's issuer resolution.
    pub fn max_issuer_chain_length(mut self, length: usize) -> Self {
        self.max_issuer_chain_length = Some(length);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn AgentEventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> Result<DirectAgent> {
        let domains = normalize_domains(self.domains)?;
        let private_resolver = self
            .private_resolver
            .ok_or_else(|| Error::invalid_argument("a private certificate resolver is required"))?;
        if self.public_resolvers.is_empty() {
            return Err(Error::invalid_argument("at least one public resolver is required"));
        }
        let trust_anchors = self
            .trust_anchors
            .ok_or_else(|| Error::invalid_argument("a trust anchor resolver is required"))?;
        let min_trust_requirement = self
            .min_trust_requirement
            .unwrap_or(TrustEnforcementStatus::MINIMUM_ACCEPTABLE);
        check_min_trust(min_trust_requirement)?;

        let trust_model = match self.trust_model {
            Some(model) => model,
            None => {
                let mut validator =
                    TrustChainValidator::with_resolvers(self.public_resolvers.clone());
                validator.set_max_issuer_chain_length(
                    self.max_issuer_chain_length
                        .unwrap_or(DEFAULT_MAX_ISSUER_CHAIN_LENGTH),
                );
                Arc::new(DefaultTrustModel::new(validator))
            }
        };

        log::info!("Direct agent configured for domains: {}", domains.join(", "));
        Ok(DirectAgent {
            settings: RwLock::new(AgentSettings {
                domains,
                private_resolver,
                public_resolvers: self.public_resolvers,
                trust_anchors,
                cryptographer: self
                    .cryptographer
                    .unwrap_or_else(|| Arc::new(SmimeCryptographer::new())),
                trust_model,
                encryption_enabled: self.encryption_enabled.unwrap_or(true),
                wrapping_enabled: self.wrapping_enabled.unwrap_or(true),
                min_trust_requirement,
                listener: self.listener,
            }),
        })
    }
}
