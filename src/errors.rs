use std::fmt;

use crate::asn1_types::PkiFailureInfo;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TsaErrorKind {
    /// IO Error.
    IoError,

    /// Serial store unreadable, corrupt or exhausted.
    SerialStoreError,

    /// Malformed TimeStampReq.
    InvalidTimeStampReq,

    /// Unsupported MessageImprint hash algorithm.
    UnsupportedHashAlgorithm,

    /// Malformed TimeStampResp.
    InvalidTimeStampResp,

    /// Invalid ContentType.
    InvalidContentType,

    /// Empty EncapsulatedContent.
    EmptyEncapsulatedContent,

    /// Invalid TSTInfo.
    InvalidTSTInfo,

    /// Empty Certificate.
    EmptyCertificate,

    /// Invalid PEM Certificate.
    InvalidPEMCertificate,

    /// Invalid Private Key.
    InvalidPrivateKey,

    /// Unsupported Private Key Type.
    UnsupportedKeyType,

    /// Private key does not belong to the signer certificate.
    KeyCertificateMismatch,

    /// Invalid Public Key.
    InvalidPublicKey,

    /// Unsupported Algorithm.
    UnsupportedAlgorithm,

    /// Signature creation failed.
    SigningError,

    /// Encode as DER Error.
    EncodingError,

    /// No Found SignerInfo.
    NoFoundSignerInfo,

    /// Unknown Signer.
    UnknownSigner,

    /// No Found Message Digest.
    NoFoundMessageDigest,

    /// Invalid Configuration.
    InvalidConfig,

    /// Unknown Error.
    Unknown,
}

#[derive(Debug)]
pub struct TsaError {
    pub kind: TsaErrorKind,
    pub message: String,
}

impl TsaError {
    pub fn new<S: Into<String>>(kind: TsaErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    // 请求处理失败时写入 TimeStampResp 的 failInfo
    pub fn failure_info(&self) -> PkiFailureInfo {
        match self.kind {
            TsaErrorKind::InvalidTimeStampReq => PkiFailureInfo::BadDataFormat,
            TsaErrorKind::UnsupportedHashAlgorithm => PkiFailureInfo::BadAlg,
            _ => PkiFailureInfo::SystemFailure,
        }
    }
}

impl fmt::Display for TsaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TsaError {}

pub trait TsaResult<T> {
    fn map_app_err(self, kind: TsaErrorKind) -> Result<T, TsaError>;
    fn map_unknown_err(self) -> Result<T, TsaError>;
}

impl<T, E> TsaResult<T> for std::result::Result<T, E>
where
    E: std::error::Error + 'static,
{
    fn map_app_err(self, kind: TsaErrorKind) -> Result<T, TsaError> {
        self.map_err(|err| TsaError {
            kind,
            message: err.to_string(),
        })
    }

    fn map_unknown_err(self) -> Result<T, TsaError> {
        self.map_app_err(TsaErrorKind::Unknown)
    }
}
