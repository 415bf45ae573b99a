//! Certificate fixtures shared by unit tests.

use std::sync::Arc;

use crate::agent::DirectAgent;
use crate::cert::{
    Certificate, CertificateBuilder, DistinguishedName, InMemoryCertificateStore,
    UniformTrustAnchorResolver,
};

pub(crate) fn ca(name: &str) -> Certificate {
    CertificateBuilder::new(DistinguishedName::new().with_common_name(name))
        .ca(true)
        .self_signed()
        .unwrap()
}

pub(crate) fn intermediate(name: &str, issuer: &Certificate) -> Certificate {
    CertificateBuilder::new(DistinguishedName::new().with_common_name(name))
        .ca(true)
        .issued_by(issuer)
        .unwrap()
}

pub(crate) fn leaf(address: &str, issuer: &Certificate) -> Certificate {
    CertificateBuilder::new(DistinguishedName::for_address(address))
        .issued_by(issuer)
        .unwrap()
}

/// Two trusted domains and a recipient whose certificate chains to an
/// unknown root.
///
/// * `a@x.com` issued by X Root
/// * `b@y.com` issued by Y Root
/// * `d@z.com` issued by Y Root
/// * `c@y.com` issued by a root nobody trusts
pub(crate) struct Pki {
    pub x_root: Certificate,
    pub y_root: Certificate,
    pub alice: Certificate,
    pub bob: Certificate,
    pub carol: Certificate,
    pub dave: Certificate,
}

impl Pki {
    pub fn new() -> Self {
        let x_root = ca("X Root");
        let y_root = ca("Y Root");
        let rogue_root = ca("Rogue Root");
        Self {
            alice: leaf("a@x.com", &x_root),
            bob: leaf("b@y.com", &y_root),
            carol: leaf("c@y.com", &rogue_root),
            dave: leaf("d@z.com", &y_root),
            x_root,
            y_root,
        }
    }

    fn leaves(&self) -> Vec<Certificate> {
        vec![
            self.alice.clone(),
            self.bob.clone(),
            self.carol.clone(),
            self.dave.clone(),
        ]
    }

    pub fn private_store(&self) -> InMemoryCertificateStore {
        InMemoryCertificateStore::with_certificates(self.leaves())
    }

    pub fn public_store(&self) -> InMemoryCertificateStore {
        InMemoryCertificateStore::with_certificates(self.leaves().iter().map(|c| c.public()))
    }

    pub fn anchors(&self) -> UniformTrustAnchorResolver {
        UniformTrustAnchorResolver::new(vec![self.x_root.public(), self.y_root.public()])
    }

    /// Agent serving both x.com and y.com.
    pub fn agent(&self) -> DirectAgent {
        self.agent_for(&["x.com", "y.com"])
    }

    pub fn agent_for(&self, domains: &[&str]) -> DirectAgent {
        DirectAgent::builder()
            .domains(domains.iter().copied())
            .private_resolver(Arc::new(self.private_store()))
            .public_resolver(Arc::new(self.public_store()))
            .trust_anchors(Arc::new(self.anchors()))
            .build()
            .unwrap()
    }
}
