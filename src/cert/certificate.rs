use std::{fmt::Display, io::Read};

use cms::cert::IssuerAndSerialNumber;
use der::{oid::db::rfc5280::ID_KP_TIME_STAMPING, Decode};
use x509_cert::{ext::pkix::ExtendedKeyUsage, name::Name, serial_number::SerialNumber};

use crate::{
    errors::{TsaError, TsaErrorKind, TsaResult},
    signer::PublicKey,
};

/// How a certificate's extended key usage covers time stamping.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeStampingUsage {
    /// Sole, critical `id-kp-timeStamping` as RFC 3161 2.3 asks for.
    Critical,
    /// Present, but non-critical or next to other purposes.
    Relaxed,
    Missing,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Certificate {
    pub serial_number: SerialNumber,
    pub issuer: Name,
    pub subject: Name,
    __inner: x509_cert::Certificate,
}

impl der::Encode for Certificate {
    fn encoded_len(&self) -> der::Result<der::Length> {
        self.__inner.encoded_len()
    }

    fn encode(&self, encoder: &mut impl der::Writer) -> der::Result<()> {
        self.__inner.encode(encoder)
    }
}

impl<'a> der::Decode<'a> for Certificate {
    fn decode<R: der::Reader<'a>>(decoder: &mut R) -> der::Result<Self> {
        Ok(x509_cert::Certificate::decode(decoder)?.into())
    }
}

impl der::pem::PemLabel for Certificate {
    const PEM_LABEL: &'static str = "CERTIFICATE";
}

impl Display for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (SN: {})", self.subject, self.serial_number)
    }
}

impl From<x509_cert::Certificate> for Certificate {
    fn from(value: x509_cert::Certificate) -> Self {
        Self {
            serial_number: value.tbs_certificate.serial_number.clone(),
            issuer: value.tbs_certificate.issuer.clone(),
            subject: value.tbs_certificate.subject.clone(),
            __inner: value,
        }
    }
}

impl Certificate {
    // 从 PEM 文件导入证书
    pub fn load_pem_chain(input: &str) -> Result<Vec<Self>, TsaError> {
        fn find_boundary<T>(haystack: &[T], needle: &[T]) -> Option<usize>
        where
            for<'a> &'a [T]: PartialEq,
        {
            haystack
                .windows(needle.len())
                .position(|window| window == needle)
        }

        let start_boundary = &b"-----BEGIN CERTIFICATE-----"[..];
        let end_boundary = &b"-----END CERTIFICATE-----"[..];

        let input = input.trim_end().as_bytes();
        if input.is_empty() {
            return Err(TsaError {
                kind: TsaErrorKind::EmptyCertificate,
                message: "no PEM certificate found".to_owned(),
            });
        }

        let mut certs = Vec::new();
        let mut position: usize = 0;

        while position < input.len() {
            let rest = &input[position..];
            let start_pos = match find_boundary(rest, start_boundary) {
                Some(start_pos) => start_pos,
                // 最后一个证书后面只剩注释
                None if !certs.is_empty() => break,
                None => {
                    return Err(TsaError {
                        kind: TsaErrorKind::EmptyCertificate,
                        message: "no PEM certificate found".to_owned(),
                    })
                }
            };
            let end_pos = find_boundary(rest, end_boundary)
                .filter(|end_pos| *end_pos > start_pos)
                .ok_or(TsaError {
                    kind: TsaErrorKind::InvalidPEMCertificate,
                    message: format!("unterminated certificate #{}", certs.len() + 1),
                })?
                + end_boundary.len();

            let cert_buf = &rest[start_pos..end_pos];

            // from_pem 会报 PEM Base64 error，PEM 库默认按 64 列换行，这里动态判断
            let mut decoder = pem_rfc7468::Decoder::new_detect_wrap(cert_buf)
                .map_app_err(TsaErrorKind::InvalidPEMCertificate)?;
            let mut buf = vec![];
            decoder
                .read_to_end(&mut buf)
                .map_app_err(TsaErrorKind::InvalidPEMCertificate)?;
            let cert = x509_cert::Certificate::from_der(&buf)
                .map_app_err(TsaErrorKind::InvalidPEMCertificate)?;

            certs.push(cert.into());

            position += end_pos;
        }

        Ok(certs)
    }

    // 是否是自签名证书
    pub fn is_selfsigned(self: &Self) -> bool {
        self.issuer == self.subject
    }

    /// Whether `self` names `issuer` as its issuer.
    pub fn is_issued_by(self: &Self, issuer: &Certificate) -> bool {
        self.issuer == issuer.subject
    }

    pub fn public_key(self: &Self) -> Result<PublicKey, TsaError> {
        PublicKey::try_from(&self.__inner.tbs_certificate.subject_public_key_info)
    }

    pub fn issuer_and_serial_number(self: &Self) -> IssuerAndSerialNumber {
        IssuerAndSerialNumber {
            issuer: self.issuer.clone(),
            serial_number: self.serial_number.clone(),
        }
    }

    pub fn time_stamping_usage(self: &Self) -> Result<TimeStampingUsage, TsaError> {
        let eku = self
            .__inner
            .tbs_certificate
            .get::<ExtendedKeyUsage>()
            .map_app_err(TsaErrorKind::InvalidPEMCertificate)?;

        Ok(match eku {
            Some((critical, ExtendedKeyUsage(purposes))) if purposes.contains(&ID_KP_TIME_STAMPING) => {
                if critical && purposes.len() == 1 {
                    TimeStampingUsage::Critical
                } else {
                    TimeStampingUsage::Relaxed
                }
            }
            _ => TimeStampingUsage::Missing,
        })
    }

    pub fn inner(self: &Self) -> &x509_cert::Certificate {
        &self.__inner
    }
}
