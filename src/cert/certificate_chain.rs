use std::{ops::Deref, path::Path};

use log::warn;

use crate::errors::{TsaError, TsaErrorKind};

use super::{Certificate, TimeStampingUsage};

/// TSA certificate followed by its issuers, in the order they were loaded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateChain {
    // 签名证书
    signer: Certificate,

    // 上级证书
    chain: Vec<Certificate>,

    // signer + chain
    cert_chain: Vec<Certificate>,
}

impl CertificateChain {
    pub fn new(signer: Certificate, chain: Vec<Certificate>) -> Self {
        let mut cert_chain = Vec::with_capacity(chain.len() + 1);
        cert_chain.push(signer.clone());
        cert_chain.extend(chain.iter().cloned());

        Self {
            signer,
            chain,
            cert_chain,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TsaError> {
        let pem = std::fs::read_to_string(path.as_ref()).map_err(|err| TsaError {
            kind: TsaErrorKind::IoError,
            message: format!("{}: {}", path.as_ref().display(), err),
        })?;

        Self::from_pem(&pem)
    }

    /// The first certificate is the TSA's own, the rest its issuers.
    pub fn from_pem(input: &str) -> Result<Self, TsaError> {
        let mut certs = Certificate::load_pem_chain(input)?;
        if certs.is_empty() {
            return Err(TsaError {
                kind: TsaErrorKind::EmptyCertificate,
                message: "".to_owned(),
            });
        }

        let signer = certs.remove(0);
        let chain = Self::new(signer, certs);
        chain.check();

        Ok(chain)
    }

    // 只告警，不拒绝
    fn check(self: &Self) {
        match self.signer.time_stamping_usage() {
            Ok(TimeStampingUsage::Critical) => {}
            Ok(TimeStampingUsage::Relaxed) => warn!(
                "TSA certificate {} has timeStamping extended key usage but not as its sole critical purpose",
                self.signer
            ),
            Ok(TimeStampingUsage::Missing) => warn!(
                "TSA certificate {} lacks the timeStamping extended key usage",
                self.signer
            ),
            Err(err) => warn!(
                "TSA certificate {} has an unreadable extended key usage: {}",
                self.signer, err
            ),
        }

        for link in self.unlinked() {
            warn!(
                "certificate #{} ({}) is not issued by certificate #{} ({})",
                link,
                self.cert_chain[link],
                link + 1,
                self.cert_chain[link + 1]
            );
        }
    }

    /// Indices whose certificate is not issued by the next one in the list.
    pub fn unlinked(self: &Self) -> Vec<usize> {
        self.cert_chain
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| !pair[0].is_issued_by(&pair[1]))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn signer(self: &Self) -> &Certificate {
        &self.signer
    }

    pub fn chain(self: &Self) -> &[Certificate] {
        &self.chain
    }

    /// Certificates to embed in a SignedData, signer first.
    pub fn certificates(self: &Self) -> Vec<x509_cert::Certificate> {
        self.cert_chain.iter().map(|v| v.inner().clone()).collect()
    }
}

impl AsRef<[Certificate]> for CertificateChain {
    fn as_ref(&self) -> &[Certificate] {
        &self.cert_chain[..]
    }
}

impl Deref for CertificateChain {
    type Target = [Certificate];

    fn deref(&self) -> &Self::Target {
        &self.cert_chain[..]
    }
}
