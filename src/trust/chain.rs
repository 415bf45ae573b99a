use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use crate::cert::{dedup_certificates, Certificate, CertificateResolver, DistinguishedName};
use crate::error::{Error, Result};

pub const DEFAULT_MAX_ISSUER_CHAIN_LENGTH: usize = 5;

/// Decides whether a certificate chains to one of a set of trust anchors.
///
/// Intermediate issuers missing from the caller's view are looked up
/// through the configured resolvers, bounded by the maximum chain length.
/// Revocation is not checked here.
#[derive(Clone)]
pub struct TrustChainValidator {
    resolvers: Vec<Arc<dyn CertificateResolver>>,
    max_issuer_chain_length: usize,
}

impl Default for TrustChainValidator {
    fn default() -> Self {
        Self {
            resolvers: Vec::new(),
            max_issuer_chain_length: DEFAULT_MAX_ISSUER_CHAIN_LENGTH,
        }
    }
}

impl std::fmt::Debug for TrustChainValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustChainValidator")
            .field("resolvers", &self.resolvers.len())
            .field("max_issuer_chain_length", &self.max_issuer_chain_length)
            .finish()
    }
}

impl TrustChainValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolvers(resolvers: Vec<Arc<dyn CertificateResolver>>) -> Self {
        Self {
            resolvers,
            ..Self::default()
        }
    }

    pub fn resolvers(&self) -> &[Arc<dyn CertificateResolver>] {
        &self.resolvers
    }

    pub fn set_resolvers(&mut self, resolvers: Vec<Arc<dyn CertificateResolver>>) {
        self.resolvers = resolvers;
    }

    pub fn max_issuer_chain_length(&self) -> usize {
        self.max_issuer_chain_length
    }

    pub fn set_max_issuer_chain_length(&mut self, length: usize) {
        self.max_issuer_chain_length = length;
    }

    /// True when `certificate` chains to one of `anchors`. Every validation
    /// failure, including a resolver error, simply yields false.
    pub fn is_trusted(&self, certificate: &Certificate, anchors: &[Certificate]) -> bool {
        if anchors.is_empty() {
            log::debug!("No trust anchors supplied for {}", certificate.subject());
            return false;
        }

        let intermediates = if self.resolvers.is_empty() {
            Vec::new()
        } else {
            self.resolve_issuers(certificate, Vec::new(), 0)
        };

        match validate_path(certificate, &intermediates, anchors) {
            Ok(()) => true,
            Err(e) => {
                log::debug!(
                    "Certificate {} failed chain validation: {}",
                    certificate.subject(),
                    e
                );
                false
            }
        }
    }

    /// Collects the issuers of `certificate` reachable through the
    /// resolvers. `collected` holds the issuers found so far and `depth` the
    /// current recursion depth; the result extends `collected`.
    pub fn resolve_issuers(
        &self,
        certificate: &Certificate,
        mut collected: Vec<Certificate>,
        depth: usize,
    ) -> Vec<Certificate> {
        if certificate.is_self_signed() || depth >= self.max_issuer_chain_length {
            return collected;
        }

        let issuer = certificate.issuer();
        if collected.iter().any(|c| c.subject() == issuer) {
            return collected;
        }

        let Some(address) = issuer_address(issuer) else {
            log::debug!("Issuer {issuer} has no email or common name to resolve");
            return collected;
        };

        let candidates: Vec<Certificate> = self
            .lookup(&address)
            .into_iter()
            .filter(|c| c.subject() == issuer)
            .collect();

        for candidate in candidates {
            let thumbprint = candidate.thumbprint();
            if collected.iter().any(|c| c.thumbprint() == thumbprint) {
                continue;
            }
            collected.push(candidate.clone());
            collected = self.resolve_issuers(&candidate, collected, depth + 1);
        }
        collected
    }

    fn lookup(&self, address: &str) -> Vec<Certificate> {
        let mut found = Vec::new();
        for resolver in &self.resolvers {
            match resolver.certificates(address) {
                Ok(certificates) => found.extend(certificates),
                Err(e) => log::warn!("Issuer lookup for {address} failed: {e}"),
            }
        }
        dedup_certificates(found.into_iter().map(|c| c.public()))
    }
}

fn issuer_address(issuer: &DistinguishedName) -> Option<String> {
    issuer
        .email()
        .or_else(|| issuer.common_name())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
}

/// Walks from `certificate` towards an anchor, each step verifying the
/// signature of the current certificate with its issuer's key.
fn validate_path(
    certificate: &Certificate,
    intermediates: &[Certificate],
    anchors: &[Certificate],
) -> Result<()> {
    let now = Utc::now();
    let mut used = HashSet::new();
    let mut current = certificate.clone();

    loop {
        if !current.is_valid_at(now) {
            return Err(Error::Certificate(format!(
                "{} is outside its validity period",
                current.subject()
            )));
        }

        let thumbprint = current.thumbprint();
        if anchors.iter().any(|a| a.thumbprint() == thumbprint) {
            return Ok(());
        }
        if anchors
            .iter()
            .any(|a| a.subject() == current.issuer() && current.verify_issued_by(a).is_ok())
        {
            return Ok(());
        }

        used.insert(thumbprint);
        let next = intermediates
            .iter()
            .find(|c| {
                c.subject() == current.issuer()
                    && c.is_ca()
                    && !used.contains(&c.thumbprint())
                    && current.verify_issued_by(c).is_ok()
            })
            .ok_or_else(|| {
                Error::Certificate(format!(
                    "no path from {} to a trust anchor",
                    certificate.subject()
                ))
            })?;
        current = next.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{CertificateBuilder, InMemoryCertificateStore, PrivateKey};
    use crate::test_support::{ca, intermediate, leaf};
    use chrono::Duration;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_no_anchors_is_never_trusted() {
        let root = ca("Root");
        let validator = TrustChainValidator::new();
        assert!(!validator.is_trusted(&root, &[]));
        assert!(!validator.is_trusted(&leaf("a@x.com", &root), &[]));
    }

    #[test]
    fn test_self_signed_anchor_is_trusted() {
        let root = ca("Root");
        let validator = TrustChainValidator::new();
        assert!(validator.is_trusted(&root, &[root.public()]));
    }

    #[test]
    fn test_leaf_issued_by_anchor() {
        let root = ca("Root");
        let other = ca("Other");
        let alice = leaf("a@x.com", &root);
        let validator = TrustChainValidator::new();
        assert!(validator.is_trusted(&alice, &[root.public()]));
        assert!(!validator.is_trusted(&alice, &[other.public()]));
    }

    #[test]
    fn test_intermediate_resolved_through_resolver() {
        let root = ca("Root");
        let middle = intermediate("Example Intermediate", &root);
        let alice = leaf("a@x.com", &middle);

        let without = TrustChainValidator::new();
        assert!(!without.is_trusted(&alice, &[root.public()]));

        let store = InMemoryCertificateStore::with_certificates(vec![middle.public()]);
        let with = TrustChainValidator::with_resolvers(vec![Arc::new(store)]);
        assert_eq!(with.resolve_issuers(&alice, Vec::new(), 0), vec![middle.public()]);
        assert!(with.is_trusted(&alice, &[root.public()]));
    }

    #[test]
    fn test_expired_certificate_not_trusted() {
        let root = ca("Root");
        let now = Utc::now();
        let expired = CertificateBuilder::new(DistinguishedName::for_address("a@x.com"))
            .validity(now - Duration::days(30), now - Duration::days(1))
            .issued_by(&root)
            .unwrap();
        assert!(!TrustChainValidator::new().is_trusted(&expired, &[root.public()]));
    }

    #[test]
    fn test_non_ca_intermediate_rejected() {
        let root = ca("Root");
        let not_ca = CertificateBuilder::new(DistinguishedName::new().with_common_name("Fake CA"))
            .issued_by(&root)
            .unwrap();
        let alice = leaf("a@x.com", &not_ca);
        let store = InMemoryCertificateStore::with_certificates(vec![not_ca.public()]);
        let validator = TrustChainValidator::with_resolvers(vec![Arc::new(store)]);
        assert!(!validator.is_trusted(&alice, &[root.public()]));
    }

    /// Hands out a fresh issuer for every lookup, forming an endless chain.
    struct EndlessIssuers {
        calls: AtomicUsize,
    }

    impl CertificateResolver for EndlessIssuers {
        fn certificates(&self, address: &str) -> Result<Vec<Certificate>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let issuer = DistinguishedName::new().with_common_name(format!("{address}.{n}"));
            let cert = CertificateBuilder::new(DistinguishedName::new().with_common_name(address))
                .ca(true)
                .issue(issuer, &PrivateKey::generate())?;
            Ok(vec![cert])
        }
    }

    #[test]
    fn test_resolution_depth_is_capped() {
        let resolver = Arc::new(EndlessIssuers {
            calls: AtomicUsize::new(0),
        });
        let target = CertificateBuilder::new(DistinguishedName::for_address("a@x.com"))
            .issue(
                DistinguishedName::new().with_common_name("level"),
                &PrivateKey::generate(),
            )
            .unwrap();

        let mut validator = TrustChainValidator::with_resolvers(vec![
            resolver.clone() as Arc<dyn CertificateResolver>
        ]);
        let issuers = validator.resolve_issuers(&target, Vec::new(), 0);
        assert_eq!(issuers.len(), DEFAULT_MAX_ISSUER_CHAIN_LENGTH);
        assert_eq!(
            resolver.calls.load(Ordering::SeqCst),
            DEFAULT_MAX_ISSUER_CHAIN_LENGTH
        );

        resolver.calls.store(0, Ordering::SeqCst);
        validator.set_max_issuer_chain_length(2);
        assert_eq!(validator.resolve_issuers(&target, Vec::new(), 0).len(), 2);
        assert!(resolver.calls.load(Ordering::SeqCst) <= 2);
    }

    /// Two certificates naming each other as issuer.
    struct IssuerCycle {
        by_name: HashMap<String, Certificate>,
    }

    impl CertificateResolver for IssuerCycle {
        fn certificates(&self, address: &str) -> Result<Vec<Certificate>> {
            Ok(self.by_name.get(address).cloned().into_iter().collect())
        }
    }

    #[test]
    fn test_issuer_cycle_terminates() {
        let one = DistinguishedName::new().with_common_name("one");
        let two = DistinguishedName::new().with_common_name("two");
        let key = PrivateKey::generate();
        let cert_one = CertificateBuilder::new(one.clone())
            .ca(true)
            .issue(two.clone(), &key)
            .unwrap();
        let cert_two = CertificateBuilder::new(two)
            .ca(true)
            .issue(one.clone(), &key)
            .unwrap();
        let target = CertificateBuilder::new(DistinguishedName::for_address("a@x.com"))
            .issue(one, &key)
            .unwrap();

        let resolver = IssuerCycle {
            by_name: HashMap::from([
                ("one".to_string(), cert_one.public()),
                ("two".to_string(), cert_two.public()),
            ]),
        };
        let validator = TrustChainValidator::with_resolvers(vec![Arc::new(resolver)]);
        let issuers = validator.resolve_issuers(&target, Vec::new(), 0);
        assert_eq!(issuers.len(), 2);
        assert!(!validator.is_trusted(&target, &[ca("Root").public()]));
    }

    struct FailingResolver;

    impl CertificateResolver for FailingResolver {
        fn certificates(&self, address: &str) -> Result<Vec<Certificate>> {
            Err(Error::Resolver {
                address: address.to_string(),
                reason: "directory unavailable".to_string(),
            })
        }
    }

    #[test]
    fn test_resolver_failure_means_not_trusted() {
        let root = ca("Root");
        let middle = intermediate("Example Intermediate", &root);
        let alice = leaf("a@x.com", &middle);
        let validator = TrustChainValidator::with_resolvers(vec![Arc::new(FailingResolver)]);
        assert!(!validator.is_trusted(&alice, &[root.public()]));
        assert!(validator.is_trusted(&root, &[root.public()]));
    }
}
