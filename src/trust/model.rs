use crate::cert::Certificate;
use crate::envelope::{IncomingMessage, OutgoingMessage};
use crate::error::{AgentError, Result, TrustError};
use crate::trust::{TrustChainValidator, TrustEnforcementStatus};

/// Assigns a trust status to the addresses of a message.
pub trait TrustModel: Send + Sync {
    /// Sets the status of the sender and every domain recipient from the
    /// verified signatures of `message`.
    fn enforce_incoming(&self, message: &mut IncomingMessage) -> Result<()>;

    /// Sets the status of the sender and every recipient, keeping only the
    /// recipient certificates that chain to the sender's anchors.
    fn enforce_outgoing(&self, message: &mut OutgoingMessage) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultTrustModel {
    validator: TrustChainValidator,
}

impl DefaultTrustModel {
    pub fn new(validator: TrustChainValidator) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &TrustChainValidator {
        &self.validator
    }

    fn trusted_certificates(
        &self,
        certificates: &[Certificate],
        anchors: &[Certificate],
    ) -> Vec<Certificate> {
        certificates
            .iter()
            .filter(|c| self.validator.is_trusted(c, anchors))
            .cloned()
            .collect()
    }
}

impl TrustModel for DefaultTrustModel {
    fn enforce_incoming(&self, message: &mut IncomingMessage) -> Result<()> {
        if !message.has_signatures() {
            return Err(AgentError::UntrustedMessage.into());
        }
        let sender = message
            .sender()
            .cloned()
            .ok_or(AgentError::NoSender)?;

        let sender_signatures: Vec<_> = message
            .signature()
            .map(|s| s.signatures().to_vec())
            .unwrap_or_default()
            .into_iter()
            .filter(|s| s.is_from(&sender))
            .collect();
        if sender_signatures.is_empty() {
            log::warn!("Message from {} carries no signature by the sender", sender);
            return Err(TrustError::MissingSenderSignature.into());
        }

        let mut best = TrustEnforcementStatus::Failed;
        for recipient in message.envelope_mut().domain_recipients_mut().iter_mut() {
            let mut status = TrustEnforcementStatus::Failed;
            for signature in &sender_signatures {
                if !self
                    .validator
                    .is_trusted(signature.certificate(), recipient.trust_anchors())
                {
                    continue;
                }
                if !signature.check_signature() {
                    log::debug!(
                        "Signature by {} does not verify",
                        signature.certificate().subject()
                    );
                    continue;
                }
                let candidate = if !sender.has_certificates() {
                    TrustEnforcementStatus::SuccessOffline
                } else if signature.check_thumbprint(&sender) {
                    TrustEnforcementStatus::Success
                } else {
                    TrustEnforcementStatus::SuccessThumbprintMismatch
                };
                status = status.max(candidate);
            }
            log::debug!("Incoming trust for {}: {}", recipient, status);
            recipient.set_status(status);
            best = best.max(status);
        }

        if let Some(sender) = message.envelope_mut().sender_mut() {
            sender.set_status(best);
        }
        Ok(())
    }

    fn enforce_outgoing(&self, message: &mut OutgoingMessage) -> Result<()> {
        let envelope = message.envelope_mut();
        let (anchors, sender_status) = {
            let sender = envelope.sender().ok_or(AgentError::NoSender)?;
            let status = if sender.certificates().iter().any(|c| c.has_private_key()) {
                TrustEnforcementStatus::Success
            } else {
                TrustEnforcementStatus::Failed
            };
            (sender.trust_anchors().to_vec(), status)
        };

        for recipient in envelope.recipients_mut().iter_mut() {
            let trusted = self.trusted_certificates(recipient.certificates(), &anchors);
            let status = if trusted.is_empty() {
                TrustEnforcementStatus::Failed
            } else {
                TrustEnforcementStatus::Success
            };
            log::debug!("Outgoing trust for {}: {}", recipient, status);
            recipient.set_certificates(trusted);
            recipient.set_status(status);
        }

        if let Some(sender) = envelope.sender_mut() {
            sender.set_status(sender_status);
        }
        Ok(())
    }
}
