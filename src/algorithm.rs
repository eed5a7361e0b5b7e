use std::fmt::Display;

use der::{
    asn1::ObjectIdentifier,
    oid::db::rfc5912::{
        ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, ID_EC_PUBLIC_KEY, ID_SHA_1, ID_SHA_256,
        ID_SHA_384, ID_SHA_512, RSA_ENCRYPTION, SHA_256_WITH_RSA_ENCRYPTION,
    },
    Any,
};
use digest::{Digest, DynDigest};
use sha2::{Sha256, Sha384, Sha512};
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::errors::{TsaError, TsaErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    RSA,
    EC,
    Sha256WithRSA,
    EcdsaWithSha256,
    EcdsaWithSha384,
    Unsupported(String),
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::Unsupported(oid) => write!(f, "Unsupported({})", oid),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl From<&ObjectIdentifier> for Algorithm {
    fn from(value: &ObjectIdentifier) -> Self {
        match *value {
            ID_SHA_1 => Self::Sha1,
            ID_SHA_256 => Self::Sha256,
            ID_SHA_384 => Self::Sha384,
            ID_SHA_512 => Self::Sha512,
            RSA_ENCRYPTION => Self::RSA,
            ID_EC_PUBLIC_KEY => Self::EC,
            SHA_256_WITH_RSA_ENCRYPTION => Self::Sha256WithRSA,
            ECDSA_WITH_SHA_256 => Self::EcdsaWithSha256,
            ECDSA_WITH_SHA_384 => Self::EcdsaWithSha384,
            oid => Self::Unsupported(oid.to_string()),
        }
    }
}

impl From<&AlgorithmIdentifierOwned> for Algorithm {
    fn from(value: &AlgorithmIdentifierOwned) -> Self {
        (&value.oid).into()
    }
}

impl Algorithm {
    /// Digests a message imprint may be computed with.
    pub const IMPRINT_DIGESTS: [Algorithm; 2] = [Algorithm::Sha256, Algorithm::Sha384];

    pub fn oid(self: &Self) -> Option<ObjectIdentifier> {
        match self {
            Algorithm::Sha1 => Some(ID_SHA_1),
            Algorithm::Sha256 => Some(ID_SHA_256),
            Algorithm::Sha384 => Some(ID_SHA_384),
            Algorithm::Sha512 => Some(ID_SHA_512),
            Algorithm::RSA => Some(RSA_ENCRYPTION),
            Algorithm::EC => Some(ID_EC_PUBLIC_KEY),
            Algorithm::Sha256WithRSA => Some(SHA_256_WITH_RSA_ENCRYPTION),
            Algorithm::EcdsaWithSha256 => Some(ECDSA_WITH_SHA_256),
            Algorithm::EcdsaWithSha384 => Some(ECDSA_WITH_SHA_384),
            Algorithm::Unsupported(_) => None,
        }
    }

    // digestAlgorithm 不带参数 (RFC 5754)
    pub fn to_identifier(self: &Self) -> Result<AlgorithmIdentifierOwned, TsaError> {
        let oid = self.oid().ok_or(TsaError {
            kind: TsaErrorKind::UnsupportedAlgorithm,
            message: self.to_string(),
        })?;

        let parameters = match self {
            Algorithm::RSA | Algorithm::Sha256WithRSA => Some(Any::null()),
            _ => None,
        };

        Ok(AlgorithmIdentifierOwned { oid, parameters })
    }

    pub fn is_imprint_digest(self: &Self) -> bool {
        Self::IMPRINT_DIGESTS.contains(self)
    }

    pub fn output_size(self: &Self) -> Option<usize> {
        match self {
            Algorithm::Sha1 => Some(20),
            Algorithm::Sha256 => Some(32),
            Algorithm::Sha384 => Some(48),
            Algorithm::Sha512 => Some(64),
            _ => None,
        }
    }

    pub fn new_digest(self: &Self) -> Result<Box<dyn DynDigest>, TsaError> {
        match self {
            Algorithm::Sha256 | Algorithm::Sha256WithRSA | Algorithm::EcdsaWithSha256 => {
                Ok(Sha256::new().box_clone())
            }
            Algorithm::Sha384 | Algorithm::EcdsaWithSha384 => Ok(Sha384::new().box_clone()),
            Algorithm::Sha512 => Ok(Sha512::new().box_clone()),
            _ => Err(TsaError {
                kind: TsaErrorKind::UnsupportedAlgorithm,
                message: format!("digest: {}", self),
            }),
        }
    }

    pub fn digest(self: &Self, data: &[u8]) -> Result<Vec<u8>, TsaError> {
        let mut hasher = self.new_digest()?;
        hasher.update(data);
        Ok(hasher.finalize().to_vec())
    }
}
