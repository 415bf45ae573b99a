use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::cert::pem::decode_certificates;
use crate::cert::{dedup_certificates, Certificate, CertificateResolver};
use crate::error::{Error, Result};

const CERTIFICATE_EXTENSIONS: [&str; 3] = ["pem", "cert", "crt"];

/// Thread-safe certificate index keyed by address and by domain.
///
/// A lookup returns the certificates issued to the exact address when any
/// exist, otherwise the organisational certificates of its domain.
#[derive(Debug, Default)]
pub struct InMemoryCertificateStore {
    by_name: RwLock<HashMap<String, Vec<Certificate>>>,
}

impl InMemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_certificates(certificates: impl IntoIterator<Item = Certificate>) -> Self {
        let store = Self::new();
        for certificate in certificates {
            store.add(certificate);
        }
        store
    }

    /// Indexes the certificate under its subject email and common name.
    pub fn add(&self, certificate: Certificate) {
        let mut names: Vec<String> = [
            certificate.subject().email(),
            certificate.subject().common_name(),
        ]
        .into_iter()
        .flatten()
        .map(|n| n.to_lowercase())
        .collect();
        names.dedup();

        if names.is_empty() {
            log::warn!(
                "Certificate {} has no email or common name, not indexed",
                certificate.subject()
            );
            return;
        }

        let mut index = self.by_name.write();
        for name in names {
            let entry = index.entry(name).or_default();
            if !entry.iter().any(|c| c == &certificate) {
                entry.push(certificate.clone());
            }
        }
    }

    pub fn remove(&self, address: &str) -> bool {
        self.by_name.write().remove(&address.to_lowercase()).is_some()
    }

    pub fn clear(&self) {
        self.by_name.write().clear();
    }

    pub fn len(&self) -> usize {
        let index = self.by_name.read();
        dedup_certificates(index.values().flatten().cloned()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.read().is_empty()
    }

    pub fn all_certificates(&self) -> Vec<Certificate> {
        let index = self.by_name.read();
        dedup_certificates(index.values().flatten().cloned())
    }

    fn lookup(&self, name: &str) -> Vec<Certificate> {
        self.by_name
            .read()
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }
}

impl CertificateResolver for InMemoryCertificateStore {
    fn certificates(&self, address: &str) -> Result<Vec<Certificate>> {
        let exact = self.lookup(address);
        if !exact.is_empty() {
            return Ok(exact);
        }
        match address.rsplit_once('@') {
            Some((_, domain)) => Ok(self.lookup(domain)),
            None => Ok(Vec::new()),
        }
    }
}

/// A directory of armoured certificate files loaded into memory.
#[derive(Debug)]
pub struct FileCertificateStore {
    directory: PathBuf,
    store: InMemoryCertificateStore,
}

impl FileCertificateStore {
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            directory: directory.as_ref().to_path_buf(),
            store: InMemoryCertificateStore::new(),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Re-reads every certificate file in the directory.
    pub fn reload(&self) -> Result<usize> {
        let certificates = load_directory(&self.directory)?;
        let count = certificates.len();
        self.store.clear();
        for certificate in certificates {
            self.store.add(certificate);
        }
        log::info!(
            "Loaded {} certificates from {}",
            count,
            self.directory.display()
        );
        Ok(count)
    }

    pub fn all_certificates(&self) -> Vec<Certificate> {
        self.store.all_certificates()
    }
}

impl CertificateResolver for FileCertificateStore {
    fn certificates(&self, address: &str) -> Result<Vec<Certificate>> {
        self.store.certificates(address)
    }
}

/// Loads every certificate in the files of `directory`.
pub fn load_directory(directory: &Path) -> Result<Vec<Certificate>> {
    let entries = std::fs::read_dir(directory).map_err(|e| {
        Error::Certificate(format!(
            "cannot read certificate directory {}: {e}",
            directory.display()
        ))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    CERTIFICATE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
                })
        })
        .collect();
    paths.sort();

    let mut certificates = Vec::new();
    for path in paths {
        certificates.extend(load_file(&path)?);
    }
    Ok(certificates)
}

pub fn load_file(path: &Path) -> Result<Vec<Certificate>> {
    let text = std::fs::read_to_string(path)?;
    decode_certificates(&text).map_err(|e| {
        Error::Certificate(format!("{}: {e}", path.display()))
    })
}
