pub mod address;
pub mod agent;
pub mod cert;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod mail;
pub mod trust;

#[cfg(test)]
mod test_support;

pub use address::{AddressCollection, AddressSource, DirectAddress};
pub use agent::{AgentBuilder, AgentEventListener, DirectAgent};
pub use cert::{
    Certificate, CertificateBuilder, CertificateResolver, DistinguishedName,
    FileCertificateStore, InMemoryCertificateStore, MultiDomainTrustAnchorResolver,
    TrustAnchorResolver, UniformTrustAnchorResolver,
};
pub use config::DirectConfig;
pub use crypto::{Cryptographer, SignedData, SignedEntity, SmimeCryptographer};
pub use envelope::{IncomingMessage, MessageEnvelope, OutgoingMessage};
pub use error::{Error, ProcessingError, Result};
pub use mail::{MimeEntity, WrappedMessage};
pub use trust::{DefaultTrustModel, TrustChainValidator, TrustEnforcementStatus, TrustModel};
