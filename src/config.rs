use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::DirectAgent;
use crate::cert::store::load_directory;
use crate::cert::{
    Certificate, CertificateResolver, FileCertificateStore, MultiDomainTrustAnchorResolver,
    TrustAnchorResolver, UniformTrustAnchorResolver,
};
use crate::trust::chain::DEFAULT_MAX_ISSUER_CHAIN_LENGTH;
use crate::trust::TrustEnforcementStatus;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectConfig {
    pub agent: AgentConfig,
    pub certificates: CertificateConfig,
    pub anchors: AnchorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub domains: Vec<String>,
    #[serde(default = "default_true")]
    pub encryption_enabled: bool,
    #[serde(default = "default_true")]
    pub wrapping_enabled: bool,
    #[serde(default = "default_min_trust")]
    pub min_trust_requirement: TrustEnforcementStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertificateConfig {
    /// Directory of certificates carrying private keys for local addresses.
    pub private_store: PathBuf,
    /// Directories searched in order for remote public certificates.
    pub public_stores: Vec<PathBuf>,
    #[serde(default = "default_chain_length")]
    pub max_issuer_chain_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnchorConfig {
    pub incoming: PathBuf,
    pub outgoing: PathBuf,
    /// Per-domain anchor directories overriding the global ones.
    #[serde(default)]
    pub domains: HashMap<String, DomainAnchorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DomainAnchorConfig {
    pub incoming: Option<PathBuf>,
    pub outgoing: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_min_trust() -> TrustEnforcementStatus {
    TrustEnforcementStatus::MINIMUM_ACCEPTABLE
}

fn default_chain_length() -> usize {
    DEFAULT_MAX_ISSUER_CHAIN_LENGTH
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Default for DirectConfig {
    fn default() -> Self {
        DirectConfig {
            agent: AgentConfig {
                domains: vec!["example.com".to_string()],
                encryption_enabled: true,
                wrapping_enabled: true,
                min_trust_requirement: default_min_trust(),
            },
            certificates: CertificateConfig {
                private_store: PathBuf::from("/etc/direct-agent/private"),
                public_stores: vec![PathBuf::from("/etc/direct-agent/public")],
                max_issuer_chain_length: default_chain_length(),
            },
            anchors: AnchorConfig {
                incoming: PathBuf::from("/etc/direct-agent/anchors/incoming"),
                outgoing: PathBuf::from("/etc/direct-agent/anchors/outgoing"),
                domains: HashMap::new(),
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl DirectConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {path}"))?;
        let config: DirectConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("invalid config file {path}"))?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content).with_context(|| format!("cannot write {path}"))?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent.domains.iter().all(|d| d.trim().is_empty()) {
            bail!("agent.domains must name at least one domain");
        }
        if self.agent.min_trust_requirement < TrustEnforcementStatus::MINIMUM_ACCEPTABLE {
            bail!(
                "agent.min_trust_requirement must be at least {}",
                TrustEnforcementStatus::MINIMUM_ACCEPTABLE
            );
        }
        if self.certificates.max_issuer_chain_length == 0 {
            bail!("certificates.max_issuer_chain_length must be at least 1");
        }
        if self.certificates.public_stores.is_empty() {
            bail!("certificates.public_stores must name at least one directory");
        }
        parse_log_level(&self.logging.level)?;
        Ok(())
    }

    /// Loads the configured stores and wires an agent.
    pub fn build_agent(&self) -> anyhow::Result<DirectAgent> {
        self.validate()?;

        let private_store = FileCertificateStore::open(&self.certificates.private_store)
            .with_context(|| "cannot load private certificate store")?;

        let mut builder = DirectAgent::builder()
            .domains(self.agent.domains.iter().cloned())
            .private_resolver(Arc::new(private_store))
            .trust_anchors(self.build_anchor_resolver()?)
            .encryption_enabled(self.agent.encryption_enabled)
            .wrapping_enabled(self.agent.wrapping_enabled)
            .min_trust_requirement(self.agent.min_trust_requirement)
            .max_issuer_chain_length(self.certificates.max_issuer_chain_length);

        for directory in &self.certificates.public_stores {
            let store = FileCertificateStore::open(directory).with_context(|| {
                format!("cannot load public certificate store {}", directory.display())
            })?;
            builder = builder.public_resolver(Arc::new(store) as Arc<dyn CertificateResolver>);
        }

        Ok(builder.build()?)
    }

    fn build_anchor_resolver(&self) -> anyhow::Result<Arc<dyn TrustAnchorResolver>> {
        let anchors = &self.anchors;
        let incoming = load_anchors(&anchors.incoming)?;

        if anchors.domains.is_empty() && anchors.incoming == anchors.outgoing {
            return Ok(Arc::new(UniformTrustAnchorResolver::new(incoming)));
        }

        let outgoing = load_anchors(&anchors.outgoing)?;
        let mut incoming_by_domain = HashMap::new();
        let mut outgoing_by_domain = HashMap::new();
        for domain in &self.agent.domains {
            incoming_by_domain.insert(domain.to_lowercase(), incoming.clone());
            outgoing_by_domain.insert(domain.to_lowercase(), outgoing.clone());
        }
        for (domain, paths) in &anchors.domains {
            if let Some(path) = &paths.incoming {
                incoming_by_domain.insert(domain.to_lowercase(), load_anchors(path)?);
            }
            if let Some(path) = &paths.outgoing {
                outgoing_by_domain.insert(domain.to_lowercase(), load_anchors(path)?);
            }
        }
        Ok(Arc::new(MultiDomainTrustAnchorResolver::new(
            incoming_by_domain,
            outgoing_by_domain,
        )))
    }
}

fn load_anchors(directory: &Path) -> anyhow::Result<Vec<Certificate>> {
    let anchors = load_directory(directory)
        .with_context(|| format!("cannot load trust anchors from {}", directory.display()))?;
    if anchors.is_empty() {
        log::warn!("No trust anchors found in {}", directory.display());
    }
    Ok(anchors.into_iter().map(|a| a.public()).collect())
}

pub fn parse_log_level(level: &str) -> anyhow::Result<log::LevelFilter> {
    level
        .parse::<log::LevelFilter>()
        .map_err(|_| anyhow::anyhow!("logging.level '{level}' is not a valid log level"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::pem::encode_certificate;
    use crate::test_support::{ca, leaf};
    use tempfile::TempDir;

    fn write_cert(dir: &Path, name: &str, certificate: &Certificate) {
        std::fs::write(dir.join(name), encode_certificate(certificate).unwrap()).unwrap();
    }

    fn config_in(root: &Path) -> DirectConfig {
        let mut config = DirectConfig::default();
        config.agent.domains = vec!["x.com".to_string(), "y.com".to_string()];
        config.certificates.private_store = root.join("private");
        config.certificates.public_stores = vec![root.join("public")];
        config.anchors.incoming = root.join("anchors");
        config.anchors.outgoing = root.join("anchors");
        for dir in ["private", "public", "anchors"] {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        config
    }

    #[test]
    fn test_default_config_is_valid() {
        DirectConfig::default().validate().unwrap();
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.yaml");
        let path = path.to_str().unwrap();

        let mut config = DirectConfig::default();
        config.anchors.domains.insert(
            "example.com".to_string(),
            DomainAnchorConfig {
                incoming: Some(PathBuf::from("/tmp/in")),
                outgoing: None,
            },
        );
        config.to_file(path).unwrap();
        let loaded = DirectConfig::from_file(path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
agent:
  domains: [hospital.example]
certificates:
  private_store: /srv/private
  public_stores: [/srv/public]
anchors:
  incoming: /srv/anchors
  outgoing: /srv/anchors
"#;
        let config: DirectConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.agent.encryption_enabled);
        assert!(config.agent.wrapping_enabled);
        assert_eq!(
            config.agent.min_trust_requirement,
            TrustEnforcementStatus::SuccessOffline
        );
        assert_eq!(config.certificates.max_issuer_chain_length, 5);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DirectConfig::default();
        config.agent.domains = vec![];
        assert!(config.validate().is_err());

        let mut config = DirectConfig::default();
        config.agent.min_trust_requirement = TrustEnforcementStatus::Failed;
        assert!(config.validate().is_err());

        let mut config = DirectConfig::default();
        config.certificates.max_issuer_chain_length = 0;
        assert!(config.validate().is_err());

        let mut config = DirectConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_agent_from_directories() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let config = config_in(root);

        let x_root = ca("X Root");
        let y_root = ca("Y Root");
        let alice = leaf("a@x.com", &x_root);
        let bob = leaf("b@y.com", &y_root);
        write_cert(&root.join("private"), "alice.pem", &alice);
        write_cert(&root.join("private"), "bob.pem", &bob);
        write_cert(&root.join("public"), "bob.pem", &bob.public());
        write_cert(&root.join("public"), "alice.cert", &alice.public());
        write_cert(&root.join("anchors"), "x.pem", &x_root.public());
        write_cert(&root.join("anchors"), "y.pem", &y_root.public());

        let agent = config.build_agent().unwrap();
        assert_eq!(agent.domains(), vec!["x.com", "y.com"]);

        let message = "From: a@x.com\r\nTo: b@y.com\r\nSubject: t\r\n\r\nhello\r\n";
        let outgoing = agent.process_outgoing_text(message).unwrap();
        let incoming = agent
            .process_incoming_text(&outgoing.message().to_string())
            .unwrap();
        assert_eq!(incoming.message().body_text(), "hello\r\n");
    }

    #[test]
    fn test_per_domain_anchors() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let mut config = config_in(root);
        let y_in = root.join("y-incoming");
        std::fs::create_dir_all(&y_in).unwrap();
        config.anchors.domains.insert(
            "Y.com".to_string(),
            DomainAnchorConfig {
                incoming: Some(y_in.clone()),
                outgoing: None,
            },
        );

        let general = ca("General Root");
        let special = ca("Special Root");
        write_cert(&root.join("anchors"), "general.pem", &general);
        write_cert(&y_in, "special.pem", &special);

        let resolver = config.build_anchor_resolver().unwrap();
        let y_incoming = resolver.incoming_anchors().certificates("b@y.com").unwrap();
        assert_eq!(y_incoming, vec![special.public()]);
        let y_outgoing = resolver.outgoing_anchors().certificates("b@y.com").unwrap();
        assert_eq!(y_outgoing, vec![general.public()]);
        let x_incoming = resolver.incoming_anchors().certificates("a@x.com").unwrap();
        assert_eq!(x_incoming, vec![general.public()]);
    }

    #[test]
    fn test_missing_store_directory() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        config.certificates.private_store = dir.path().join("nope");
        let err = config.build_agent().err().unwrap();
        assert!(err.to_string().contains("private certificate store"));
    }
}
