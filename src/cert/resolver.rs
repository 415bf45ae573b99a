use std::collections::HashMap;
use std::sync::Arc;

use crate::cert::Certificate;
use crate::error::Result;

/// Maps an address to the certificates published for it.
///
/// Implementations may fail (I/O, lookups); callers decide whether a
/// failure is fatal or simply means "no certificates".
pub trait CertificateResolver: Send + Sync {
    fn certificates(&self, address: &str) -> Result<Vec<Certificate>>;
}

impl<T: CertificateResolver + ?Sized> CertificateResolver for Arc<T> {
    fn certificates(&self, address: &str) -> Result<Vec<Certificate>> {
        (**self).certificates(address)
    }
}

/// Supplies the trust anchors that apply to an address, per direction.
pub trait TrustAnchorResolver: Send + Sync {
    fn incoming_anchors(&self) -> &dyn CertificateResolver;
    fn outgoing_anchors(&self) -> &dyn CertificateResolver;
}

/// A fixed anchor list returned for every address.
#[derive(Debug, Clone, Default)]
pub struct StaticAnchors {
    anchors: Vec<Certificate>,
}

impl StaticAnchors {
    pub fn new(anchors: Vec<Certificate>) -> Self {
        Self {
            anchors: anchors.into_iter().map(|a| a.public()).collect(),
        }
    }
}

impl CertificateResolver for StaticAnchors {
    fn certificates(&self, _address: &str) -> Result<Vec<Certificate>> {
        Ok(self.anchors.clone())
    }
}

/// The same anchors for every address in both directions.
#[derive(Debug, Clone, Default)]
pub struct UniformTrustAnchorResolver {
    anchors: StaticAnchors,
}

impl UniformTrustAnchorResolver {
    pub fn new(anchors: Vec<Certificate>) -> Self {
        Self {
            anchors: StaticAnchors::new(anchors),
        }
    }
}

impl TrustAnchorResolver for UniformTrustAnchorResolver {
    fn incoming_anchors(&self) -> &dyn CertificateResolver {
        &self.anchors
    }

    fn outgoing_anchors(&self) -> &dyn CertificateResolver {
        &self.anchors
    }
}

/// Anchors keyed by the address's domain.
#[derive(Debug, Clone, Default)]
pub struct DomainAnchors {
    by_domain: HashMap<String, Vec<Certificate>>,
}

impl DomainAnchors {
    pub fn new(by_domain: HashMap<String, Vec<Certificate>>) -> Self {
        Self {
            by_domain: by_domain
                .into_iter()
                .map(|(domain, anchors)| {
                    (
                        domain.to_lowercase(),
                        anchors.into_iter().map(|a| a.public()).collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.by_domain.keys().map(|d| d.as_str())
    }
}

impl CertificateResolver for DomainAnchors {
    fn certificates(&self, address: &str) -> Result<Vec<Certificate>> {
        let domain = address
            .rsplit_once('@')
            .map(|(_, d)| d)
            .unwrap_or(address)
            .to_lowercase();
        Ok(self.by_domain.get(&domain).cloned().unwrap_or_default())
    }
}

/// Separate incoming and outgoing anchor sets for each local domain.
#[derive(Debug, Clone, Default)]
pub struct MultiDomainTrustAnchorResolver {
    incoming: DomainAnchors,
    outgoing: DomainAnchors,
}

impl MultiDomainTrustAnchorResolver {
    pub fn new(
        incoming: HashMap<String, Vec<Certificate>>,
        outgoing: HashMap<String, Vec<Certificate>>,
    ) -> Self {
        Self {
            incoming: DomainAnchors::new(incoming),
            outgoing: DomainAnchors::new(outgoing),
        }
    }
}

impl TrustAnchorResolver for MultiDomainTrustAnchorResolver {
    fn incoming_anchors(&self) -> &dyn CertificateResolver {
        &self.incoming
    }

    fn outgoing_anchors(&self) -> &dyn CertificateResolver {
        &self.outgoing
    }
}
