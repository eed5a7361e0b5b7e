use std::{fmt, path::Path};

use der::{
    asn1::{BitString, ObjectIdentifier, OctetString},
    oid::db::rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION, SECP_256_R_1, SECP_384_R_1},
    Decode, Sequence,
};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use pkcs8::{DecodePrivateKey, EncryptedPrivateKeyInfo, PrivateKeyInfo};
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
};
use sha2::Sha256;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

use crate::{
    algorithm::Algorithm,
    errors::{TsaError, TsaErrorKind, TsaResult},
};

/// Curve and key bytes of a SEC1 `ECPrivateKey`.
///
/// ```text
/// ECPrivateKey ::= SEQUENCE {
///   version        INTEGER { ecPrivkeyVer1(1) },
///   privateKey     OCTET STRING,
///   parameters [0] ECParameters {{ NamedCurve }} OPTIONAL,
///   publicKey  [1] BIT STRING OPTIONAL }
/// ```
#[derive(Sequence)]
struct EcPrivateKeyCurve {
    version: u8,
    private_key: OctetString,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    parameters: Option<ObjectIdentifier>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    public_key: Option<BitString>,
}

/// TSA private key. The signature is always computed over a SHA-256 digest.
#[derive(Clone)]
pub enum SigningKey {
    Rsa(RsaPrivateKey),
    EcdsaP256(p256::ecdsa::SigningKey),
    EcdsaP384(p384::ecdsa::SigningKey),
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey({})", self.kind())
    }
}

impl SigningKey {
    pub fn load<P: AsRef<Path>>(path: P, password: Option<&str>) -> Result<Self, TsaError> {
        let pem = std::fs::read(path.as_ref()).map_err(|err| TsaError {
            kind: TsaErrorKind::IoError,
            message: format!("{}: {}", path.as_ref().display(), err),
        })?;

        Self::from_pem(&pem, password)
    }

    // 根据 PEM label 判断私钥格式
    pub fn from_pem(pem: &[u8], password: Option<&str>) -> Result<Self, TsaError> {
        let (label, der) =
            pem_rfc7468::decode_vec(pem).map_app_err(TsaErrorKind::InvalidPrivateKey)?;

        match label {
            "PRIVATE KEY" => Self::from_pkcs8_der(&der),
            "ENCRYPTED PRIVATE KEY" => {
                let password = password.ok_or(TsaError {
                    kind: TsaErrorKind::InvalidPrivateKey,
                    message: "encrypted private key needs a password".to_owned(),
                })?;
                let encrypted = EncryptedPrivateKeyInfo::try_from(der.as_slice())
                    .map_app_err(TsaErrorKind::InvalidPrivateKey)?;
                let document = encrypted
                    .decrypt(password)
                    .map_app_err(TsaErrorKind::InvalidPrivateKey)?;

                Self::from_pkcs8_der(document.as_bytes())
            }
            "RSA PRIVATE KEY" => Ok(Self::Rsa(
                RsaPrivateKey::from_pkcs1_der(&der).map_app_err(TsaErrorKind::InvalidPrivateKey)?,
            )),
            "EC PRIVATE KEY" => Self::from_sec1_der(&der),
            label => Err(TsaError {
                kind: TsaErrorKind::InvalidPrivateKey,
                message: format!("unexpected PEM label: {}", label),
            }),
        }
    }

    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, TsaError> {
        let info = PrivateKeyInfo::try_from(der).map_app_err(TsaErrorKind::InvalidPrivateKey)?;
        let (oid, params) = info
            .algorithm
            .oids()
            .map_app_err(TsaErrorKind::InvalidPrivateKey)?;

        match (oid, params) {
            (RSA_ENCRYPTION, _) => Ok(Self::Rsa(
                RsaPrivateKey::from_pkcs8_der(der).map_app_err(TsaErrorKind::InvalidPrivateKey)?,
            )),
            (ID_EC_PUBLIC_KEY, Some(SECP_256_R_1)) => Ok(Self::EcdsaP256(
                p256::ecdsa::SigningKey::from_pkcs8_der(der)
                    .map_app_err(TsaErrorKind::InvalidPrivateKey)?,
            )),
            (ID_EC_PUBLIC_KEY, Some(SECP_384_R_1)) => Ok(Self::EcdsaP384(
                p384::ecdsa::SigningKey::from_pkcs8_der(der)
                    .map_app_err(TsaErrorKind::InvalidPrivateKey)?,
            )),
            (oid, Some(params)) => Err(TsaError {
                kind: TsaErrorKind::UnsupportedKeyType,
                message: format!("{} ({})", oid, params),
            }),
            (oid, None) => Err(TsaError {
                kind: TsaErrorKind::UnsupportedKeyType,
                message: oid.to_string(),
            }),
        }
    }

    pub fn from_sec1_der(der: &[u8]) -> Result<Self, TsaError> {
        let key = EcPrivateKeyCurve::from_der(der).map_app_err(TsaErrorKind::InvalidPrivateKey)?;
        if key.version != 1 {
            return Err(TsaError {
                kind: TsaErrorKind::InvalidPrivateKey,
                message: format!("ECPrivateKey version {}", key.version),
            });
        }

        // 没有 parameters 时按私钥长度判断曲线
        let curve = match key.parameters {
            Some(curve) => curve,
            None => match key.private_key.as_bytes().len() {
                32 => SECP_256_R_1,
                48 => SECP_384_R_1,
                len => {
                    return Err(TsaError {
                        kind: TsaErrorKind::UnsupportedKeyType,
                        message: format!("EC private key of {} bytes", len),
                    })
                }
            },
        };

        match curve {
            SECP_256_R_1 => Ok(Self::EcdsaP256(
                p256::SecretKey::from_sec1_der(der)
                    .map_app_err(TsaErrorKind::InvalidPrivateKey)?
                    .into(),
            )),
            SECP_384_R_1 => Ok(Self::EcdsaP384(
                p384::SecretKey::from_sec1_der(der)
                    .map_app_err(TsaErrorKind::InvalidPrivateKey)?
                    .into(),
            )),
            curve => Err(TsaError {
                kind: TsaErrorKind::UnsupportedKeyType,
                message: format!("EC curve {}", curve),
            }),
        }
    }

    pub fn kind(self: &Self) -> &'static str {
        match self {
            SigningKey::Rsa(_) => "RSA",
            SigningKey::EcdsaP256(_) => "ECDSA P-256",
            SigningKey::EcdsaP384(_) => "ECDSA P-384",
        }
    }

    /// `signatureAlgorithm` of the SignerInfo.
    pub fn signature_algorithm(self: &Self) -> Algorithm {
        match self {
            SigningKey::Rsa(_) => Algorithm::RSA,
            SigningKey::EcdsaP256(_) | SigningKey::EcdsaP384(_) => Algorithm::EcdsaWithSha256,
        }
    }

    /// Signs a SHA-256 digest. RSA signatures are PKCS#1 v1.5, ECDSA
    /// signatures are DER `Ecdsa-Sig-Value`.
    pub fn sign_digest(self: &Self, digest: &[u8]) -> Result<Vec<u8>, TsaError> {
        match self {
            SigningKey::Rsa(key) => key
                .sign(Pkcs1v15Sign::new::<Sha256>(), digest)
                .map_app_err(TsaErrorKind::SigningError),
            SigningKey::EcdsaP256(key) => {
                let signature: p256::ecdsa::DerSignature = key
                    .sign_prehash(digest)
                    .map_app_err(TsaErrorKind::SigningError)?;
                Ok(signature.as_bytes().to_vec())
            }
            SigningKey::EcdsaP384(key) => {
                let signature: p384::ecdsa::DerSignature = key
                    .sign_prehash(digest)
                    .map_app_err(TsaErrorKind::SigningError)?;
                Ok(signature.as_bytes().to_vec())
            }
        }
    }

    pub fn public_key(self: &Self) -> PublicKey {
        match self {
            SigningKey::Rsa(key) => PublicKey::Rsa(key.to_public_key()),
            SigningKey::EcdsaP256(key) => PublicKey::EcdsaP256(*key.verifying_key()),
            SigningKey::EcdsaP384(key) => PublicKey::EcdsaP384(*key.verifying_key()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EcdsaP256(p256::ecdsa::VerifyingKey),
    EcdsaP384(p384::ecdsa::VerifyingKey),
}

impl TryFrom<&SubjectPublicKeyInfoOwned> for PublicKey {
    type Error = TsaError;

    fn try_from(spki: &SubjectPublicKeyInfoOwned) -> Result<Self, Self::Error> {
        let publickey = spki.subject_public_key.raw_bytes();

        match Algorithm::from(&spki.algorithm) {
            Algorithm::RSA => Ok(Self::Rsa(
                RsaPublicKey::from_pkcs1_der(publickey)
                    .map_app_err(TsaErrorKind::InvalidPublicKey)?,
            )),
            Algorithm::EC => match named_curve(&spki.algorithm)? {
                SECP_256_R_1 => Ok(Self::EcdsaP256(
                    p256::ecdsa::VerifyingKey::from_sec1_bytes(publickey)
                        .map_app_err(TsaErrorKind::InvalidPublicKey)?,
                )),
                SECP_384_R_1 => Ok(Self::EcdsaP384(
                    p384::ecdsa::VerifyingKey::from_sec1_bytes(publickey)
                        .map_app_err(TsaErrorKind::InvalidPublicKey)?,
                )),
                curve => Err(TsaError {
                    kind: TsaErrorKind::UnsupportedAlgorithm,
                    message: format!("EC curve {}", curve),
                }),
            },
            algorithm => Err(TsaError {
                kind: TsaErrorKind::UnsupportedAlgorithm,
                message: algorithm.to_string(),
            }),
        }
    }
}

fn named_curve(algorithm: &AlgorithmIdentifierOwned) -> Result<ObjectIdentifier, TsaError> {
    algorithm
        .parameters
        .as_ref()
        .ok_or(TsaError {
            kind: TsaErrorKind::InvalidPublicKey,
            message: "EC public key without curve".to_owned(),
        })?
        .decode_as::<ObjectIdentifier>()
        .map_app_err(TsaErrorKind::InvalidPublicKey)
}

impl PublicKey {
    /// Checks `signature` over a SHA-256 `digest`. A signature that does not
    /// verify yields `Ok(false)`.
    pub fn verify_digest(self: &Self, digest: &[u8], signature: &[u8]) -> Result<bool, TsaError> {
        let valid = match self {
            PublicKey::Rsa(key) => key
                .verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
                .is_ok(),
            PublicKey::EcdsaP256(key) => match p256::ecdsa::DerSignature::from_bytes(signature) {
                Ok(signature) => key.verify_prehash(digest, &signature).is_ok(),
                Err(_) => false,
            },
            PublicKey::EcdsaP384(key) => match p384::ecdsa::DerSignature::from_bytes(signature) {
                Ok(signature) => key.verify_prehash(digest, &signature).is_ok(),
                Err(_) => false,
            },
        };

        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use der::{oid::db::rfc5912::ECDSA_WITH_SHA_256, Encode};

    use super::*;
    use crate::cert::CertificateChain;

    const DIGEST: [u8; 32] = [0x5A; 32];

    #[test]
    fn load_rsa_pkcs8() {
        let key = SigningKey::from_pem(include_bytes!("./testdata/tsa-rsa.key"), None).unwrap();
        assert!(matches!(key, SigningKey::Rsa(_)));
        assert_eq!(key.signature_algorithm(), Algorithm::RSA);
    }

    #[test]
    fn load_encrypted_rsa_pkcs8() {
        let pem = include_bytes!("./testdata/tsa-rsa-enc.key");
        let key = SigningKey::from_pem(pem, Some("changeit")).unwrap();
        let plain = SigningKey::from_pem(include_bytes!("./testdata/tsa-rsa.key"), None).unwrap();
        assert_eq!(key.public_key(), plain.public_key());

        let err = SigningKey::from_pem(pem, Some("wrong")).unwrap_err();
        assert_eq!(err.kind, TsaErrorKind::InvalidPrivateKey);

        let err = SigningKey::from_pem(pem, None).unwrap_err();
        assert_eq!(err.kind, TsaErrorKind::InvalidPrivateKey);
    }

    #[test]
    fn load_ec_sec1() {
        let key = SigningKey::from_pem(include_bytes!("./testdata/tsa-ec.key"), None).unwrap();
        assert!(matches!(key, SigningKey::EcdsaP256(_)));
        assert_eq!(
            key.signature_algorithm().oid(),
            Some(ECDSA_WITH_SHA_256)
        );
    }

    #[test]
    fn load_rsa_pkcs1() {
        let key =
            SigningKey::from_pem(include_bytes!("./testdata/tsa-rsa-pkcs1.key"), None).unwrap();
        let pkcs8 = SigningKey::from_pem(include_bytes!("./testdata/tsa-rsa.key"), None).unwrap();
        assert!(matches!(key, SigningKey::Rsa(_)));
        assert_eq!(key.public_key(), pkcs8.public_key());
    }

    #[test]
    fn load_p384_pkcs8() {
        let key = SigningKey::from_pem(include_bytes!("./testdata/tsa-p384.key"), None).unwrap();
        assert!(matches!(key, SigningKey::EcdsaP384(_)));
        assert_eq!(key.kind(), "ECDSA P-384");
        assert_eq!(
            key.signature_algorithm().oid(),
            Some(ECDSA_WITH_SHA_256)
        );

        let signature = key.sign_digest(&DIGEST).unwrap();
        let public_key = key.public_key();
        assert!(matches!(public_key, PublicKey::EcdsaP384(_)));
        assert!(public_key.verify_digest(&DIGEST, &signature).unwrap());
        assert!(!public_key.verify_digest(&[0u8; 32], &signature).unwrap());
    }

    #[test]
    fn sec1_without_curve_parameters() {
        // 48 字节私钥 -> P-384
        let key = SigningKey::from_pem(
            include_bytes!("./testdata/tsa-p384-noparams.key"),
            None,
        )
        .unwrap();
        let pkcs8 = SigningKey::from_pem(include_bytes!("./testdata/tsa-p384.key"), None).unwrap();
        assert!(matches!(key, SigningKey::EcdsaP384(_)));
        assert_eq!(key.public_key(), pkcs8.public_key());
    }

    #[test]
    fn ed25519_is_unsupported() {
        let err = SigningKey::from_pem(include_bytes!("./testdata/ed25519.key"), None).unwrap_err();
        assert_eq!(err.kind, TsaErrorKind::UnsupportedKeyType);
    }

    #[test]
    fn garbage_is_invalid() {
        let err = SigningKey::from_pem(b"not a key", None).unwrap_err();
        assert_eq!(err.kind, TsaErrorKind::InvalidPrivateKey);

        let err = SigningKey::from_pem(include_bytes!("./testdata/ca.pem"), None).unwrap_err();
        assert_eq!(err.kind, TsaErrorKind::InvalidPrivateKey);
    }

    #[test]
    fn rsa_sign_and_verify() {
        let key = SigningKey::from_pem(include_bytes!("./testdata/tsa-rsa.key"), None).unwrap();
        let signature = key.sign_digest(&DIGEST).unwrap();
        assert_eq!(signature.len(), 256);

        let public_key = key.public_key();
        assert!(public_key.verify_digest(&DIGEST, &signature).unwrap());
        assert!(!public_key.verify_digest(&[0u8; 32], &signature).unwrap());
    }

    #[test]
    fn ecdsa_sign_and_verify() {
        let key = SigningKey::from_pem(include_bytes!("./testdata/tsa-ec.key"), None).unwrap();
        let signature = key.sign_digest(&DIGEST).unwrap();
        assert_eq!(signature[0], 0x30);

        let public_key = key.public_key();
        assert!(public_key.verify_digest(&DIGEST, &signature).unwrap());
        assert!(!public_key.verify_digest(&[0u8; 32], &signature).unwrap());
        assert!(!public_key.verify_digest(&DIGEST, b"junk").unwrap());
    }

    #[test]
    fn public_key_matches_certificate() {
        let chain = CertificateChain::from_pem(include_str!("./testdata/rsa-chain.pem")).unwrap();
        let key = SigningKey::from_pem(include_bytes!("./testdata/tsa-rsa.key"), None).unwrap();
        assert_eq!(chain.signer().public_key().unwrap(), key.public_key());

        let chain = CertificateChain::from_pem(include_str!("./testdata/ec-chain.pem")).unwrap();
        let key = SigningKey::from_pem(include_bytes!("./testdata/tsa-ec.key"), None).unwrap();
        assert_eq!(chain.signer().public_key().unwrap(), key.public_key());
        assert_ne!(
            chain.signer().public_key().unwrap(),
            SigningKey::from_pem(include_bytes!("./testdata/tsa-rsa.key"), None)
                .unwrap()
                .public_key()
        );

        let chain = CertificateChain::from_pem(include_str!("./testdata/p384-chain.pem")).unwrap();
        let key = SigningKey::from_pem(include_bytes!("./testdata/tsa-p384.key"), None).unwrap();
        assert!(matches!(
            chain.signer().public_key().unwrap(),
            PublicKey::EcdsaP384(_)
        ));
        assert_eq!(chain.signer().public_key().unwrap(), key.public_key());
    }

    #[test]
    fn spki_roundtrip_through_der() {
        let chain = CertificateChain::from_pem(include_str!("./testdata/ec-chain.pem")).unwrap();
        let spki = &chain.signer().inner().tbs_certificate.subject_public_key_info;
        let decoded = SubjectPublicKeyInfoOwned::from_der(&spki.to_der().unwrap()).unwrap();
        assert!(matches!(
            PublicKey::try_from(&decoded).unwrap(),
            PublicKey::EcdsaP256(_)
        ));
    }
}
