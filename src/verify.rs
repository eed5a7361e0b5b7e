use cms::{
    content_info::ContentInfo,
    signed_data::{SignerIdentifier, SignerInfo},
};
use der::{
    asn1::OctetString,
    oid::db::rfc5911::{ID_CONTENT_TYPE, ID_MESSAGE_DIGEST, ID_SIGNED_DATA},
    Decode, Encode, Tag, Tagged,
};
use x509_cert::{attr::Attributes, ext::pkix::SubjectKeyIdentifier};

use crate::{
    algorithm::Algorithm,
    asn1_types::{SignedData, TSTInfo, ID_CT_TST_INFO},
    cert::Certificate,
    errors::{TsaError, TsaErrorKind, TsaResult},
    request::ValidatedRequest,
    signed_data::SIGNING_DIGEST,
    utils::to_hex_str,
};

// 签名状态
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenStatus {
    // 签名有效
    Valid,

    // 签名无效
    Invalid,
}

/// A parsed `TimeStampToken`, checked the way a relying party would.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimeStampToken {
    tst_info: TSTInfo,
    econtent: Vec<u8>,
    signer_info: SignerInfo,
    signer: Certificate,
    certificates: Vec<Certificate>,
    __inner: ContentInfo,
}

impl TimeStampToken {
    pub fn from_der(bytes: &[u8]) -> Result<Self, TsaError> {
        let ci = ContentInfo::from_der(bytes).map_app_err(TsaErrorKind::InvalidContentType)?;
        Self::from_content_info(&ci)
    }

    pub fn from_content_info(ci: &ContentInfo) -> Result<Self, TsaError> {
        if ci.content_type != ID_SIGNED_DATA {
            return Err(TsaError {
                kind: TsaErrorKind::InvalidContentType,
                message: ci.content_type.to_string(),
            });
        }

        let signed_data = ci
            .content
            .decode_as::<SignedData>()
            .map_app_err(TsaErrorKind::InvalidContentType)?;

        if signed_data.encap_content_info.econtent_type != ID_CT_TST_INFO {
            return Err(TsaError {
                kind: TsaErrorKind::InvalidContentType,
                message: signed_data.encap_content_info.econtent_type.to_string(),
            });
        }

        let econtent = signed_data
            .encap_content_info
            .econtent
            .as_ref()
            .ok_or(TsaError {
                kind: TsaErrorKind::EmptyEncapsulatedContent,
                message: "".to_owned(),
            })?;
        if econtent.tag() != Tag::OctetString {
            return Err(TsaError {
                kind: TsaErrorKind::InvalidTSTInfo,
                message: format!("eContent tagged {}", econtent.tag()),
            });
        }
        let econtent = econtent.value().to_vec();
        let tst_info = TSTInfo::from_der(&econtent).map_app_err(TsaErrorKind::InvalidTSTInfo)?;

        let signer_info = signed_data
            .signer_infos
            .0
            .get(0)
            .ok_or(TsaError {
                kind: TsaErrorKind::NoFoundSignerInfo,
                message: "".to_owned(),
            })?
            .clone();

        let certificates: Vec<Certificate> = signed_data
            .certificates
            .ok_or(TsaError {
                kind: TsaErrorKind::EmptyCertificate,
                message: "token carries no certificates".to_owned(),
            })?
            .into_iter()
            .map(Certificate::from)
            .collect();

        let signer = Self::find_signer(&signer_info.sid, &certificates)?.clone();

        Ok(Self {
            tst_info,
            econtent,
            signer_info,
            signer,
            certificates,
            __inner: ci.clone(),
        })
    }

    // 按 sid 找签名者证书
    fn find_signer<'a>(
        sid: &SignerIdentifier,
        certificates: &'a [Certificate],
    ) -> Result<&'a Certificate, TsaError> {
        match sid {
            SignerIdentifier::IssuerAndSerialNumber(sid) => certificates
                .iter()
                .find(|v| v.issuer == sid.issuer && v.serial_number == sid.serial_number)
                .ok_or(TsaError {
                    kind: TsaErrorKind::UnknownSigner,
                    message: format!(
                        "RDN: {}, SN: {}",
                        sid.issuer,
                        to_hex_str(sid.serial_number.as_bytes())
                    ),
                }),
            SignerIdentifier::SubjectKeyIdentifier(skid) => certificates
                .iter()
                .find(|v| {
                    matches!(
                        v.inner().tbs_certificate.get::<SubjectKeyIdentifier>(),
                        Ok(Some((_, cert_skid))) if cert_skid == *skid
                    )
                })
                .ok_or(TsaError {
                    kind: TsaErrorKind::UnknownSigner,
                    message: to_hex_str(skid.0.as_bytes()),
                }),
        }
    }

    pub fn tst_info(self: &Self) -> &TSTInfo {
        &self.tst_info
    }

    pub fn signer(self: &Self) -> &Certificate {
        &self.signer
    }

    pub fn certificates(self: &Self) -> &[Certificate] {
        &self.certificates
    }

    pub fn content_info(self: &Self) -> &ContentInfo {
        &self.__inner
    }

    /// Checks the signed attributes against the encapsulated TSTInfo and the
    /// signature against the signer certificate's key. Certificate chain
    /// trust is not evaluated.
    pub fn verify(self: &Self) -> Result<TokenStatus, TsaError> {
        let digest_alg = Algorithm::from(&self.signer_info.digest_alg);
        if digest_alg != SIGNING_DIGEST {
            return Err(TsaError {
                kind: TsaErrorKind::UnsupportedAlgorithm,
                message: digest_alg.to_string(),
            });
        }

        let public_key = self.signer.public_key()?;
        let signature = self.signer_info.signature.as_bytes();

        match &self.signer_info.signed_attrs {
            // 有 signed_attrs 时签名覆盖 signed_attrs
            Some(signed_attrs) => {
                if !Self::content_type_is_tst_info(signed_attrs) {
                    return Ok(TokenStatus::Invalid);
                }

                let message_digest = signed_attrs
                    .iter()
                    .find(|v| v.oid == ID_MESSAGE_DIGEST)
                    .and_then(|v| v.values.get(0))
                    .ok_or(TsaError {
                        kind: TsaErrorKind::NoFoundMessageDigest,
                        message: "".to_owned(),
                    })?
                    .decode_as::<OctetString>()
                    .map_unknown_err()?;
                if digest_alg.digest(&self.econtent)? != message_digest.as_bytes() {
                    return Ok(TokenStatus::Invalid);
                }

                let signed_attrs_der = signed_attrs.to_der().map_unknown_err()?;
                if !public_key.verify_digest(&digest_alg.digest(&signed_attrs_der)?, signature)? {
                    return Ok(TokenStatus::Invalid);
                }
            }
            // 否则直接覆盖 TSTInfo
            None => {
                if !public_key.verify_digest(&digest_alg.digest(&self.econtent)?, signature)? {
                    return Ok(TokenStatus::Invalid);
                }
            }
        }

        Ok(TokenStatus::Valid)
    }

    fn content_type_is_tst_info(signed_attrs: &Attributes) -> bool {
        signed_attrs
            .iter()
            .find(|v| v.oid == ID_CONTENT_TYPE)
            .and_then(|v| v.values.get(0))
            .and_then(|v| v.decode_as::<der::asn1::ObjectIdentifier>().ok())
            .map_or(false, |oid| oid == ID_CT_TST_INFO)
    }

    /// Whether the token answers `req`: same message imprint, nonce echoed.
    pub fn matches_request(self: &Self, req: &ValidatedRequest) -> bool {
        self.tst_info.message_imprint == req.message_imprint && self.tst_info.nonce == req.nonce
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use der::{asn1::ObjectIdentifier, Any};

    use super::*;
    use crate::{
        cert::CertificateChain, request::parse_and_validate, signed_data::SignedDataBuilder,
        signer::SigningKey, tstinfo::TstInfoBuilder,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 15).unwrap()
    }

    fn issue(chain: &str, key: &[u8], tsq: &[u8]) -> ContentInfo {
        let chain = CertificateChain::from_pem(chain).unwrap();
        let key = SigningKey::from_pem(key, None).unwrap();
        let req = parse_and_validate(tsq).unwrap();
        let tst_info = TstInfoBuilder::new(ObjectIdentifier::new_unwrap("1.3.6.1.4.1.13762.3"))
            .build(&req.message_imprint, 4242, req.nonce.as_ref(), &now())
            .unwrap();

        SignedDataBuilder::new(&chain, &key)
            .sign(&tst_info, &now())
            .unwrap()
    }

    fn rsa_token() -> ContentInfo {
        issue(
            include_str!("./testdata/rsa-chain.pem"),
            include_bytes!("./testdata/tsa-rsa.key"),
            include_bytes!("./testdata/sha256.tsq"),
        )
    }

    #[test]
    fn rsa_token_verifies() {
        let token = TimeStampToken::from_content_info(&rsa_token()).unwrap();

        assert_eq!(token.verify().unwrap(), TokenStatus::Valid);
        assert_eq!(token.certificates().len(), 2);
        assert_eq!(
            token.signer().subject.to_string(),
            "CN=Test RSA TSA,O=Test Trust Services,C=US"
        );
        assert_eq!(token.tst_info().serial_number.as_bytes(), [0x10, 0x92]);

        let req = parse_and_validate(include_bytes!("./testdata/sha256.tsq")).unwrap();
        assert!(token.matches_request(&req));
        let other = parse_and_validate(include_bytes!("./testdata/sha384.tsq")).unwrap();
        assert!(!token.matches_request(&other));
    }

    #[test]
    fn ec_token_verifies_from_der() {
        let ci = issue(
            include_str!("./testdata/ec-chain.pem"),
            include_bytes!("./testdata/tsa-ec.key"),
            include_bytes!("./testdata/sha384.tsq"),
        );
        let token = TimeStampToken::from_der(&ci.to_der().unwrap()).unwrap();

        assert_eq!(token.verify().unwrap(), TokenStatus::Valid);
        assert!(token.tst_info().nonce.is_none());
        assert_eq!(token.content_info(), &ci);
    }

    #[test]
    fn tampered_signature_is_invalid() {
        let ci = rsa_token();
        let mut signed_data = ci.content.decode_as::<SignedData>().unwrap();
        let mut signer_infos: Vec<SignerInfo> = signed_data.signer_infos.0.into_vec();
        let mut signature = signer_infos[0].signature.as_bytes().to_vec();
        signature[10] ^= 0xFF;
        signer_infos[0].signature = OctetString::new(signature).unwrap();
        signed_data.signer_infos.0 = signer_infos.try_into().unwrap();

        let ci = ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data).unwrap(),
        };
        let token = TimeStampToken::from_content_info(&ci).unwrap();
        assert_eq!(token.verify().unwrap(), TokenStatus::Invalid);
    }

    #[test]
    fn tampered_tstinfo_is_invalid() {
        let ci = rsa_token();
        let mut signed_data = ci.content.decode_as::<SignedData>().unwrap();
        let econtent = signed_data.encap_content_info.econtent.unwrap();
        let mut tst_info = TSTInfo::from_der(econtent.value()).unwrap();
        tst_info.serial_number = 4243u64.into();
        signed_data.encap_content_info.econtent =
            Some(Any::new(Tag::OctetString, tst_info.to_der().unwrap()).unwrap());

        let ci = ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data).unwrap(),
        };
        let token = TimeStampToken::from_content_info(&ci).unwrap();
        assert_eq!(token.verify().unwrap(), TokenStatus::Invalid);
    }

    #[test]
    fn missing_signer_certificate() {
        let ci = rsa_token();
        let mut signed_data = ci.content.decode_as::<SignedData>().unwrap();
        signed_data.certificates = signed_data.certificates.map(|v| v[1..].to_vec());

        let ci = ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data).unwrap(),
        };
        let err = TimeStampToken::from_content_info(&ci).unwrap_err();
        assert_eq!(err.kind, TsaErrorKind::UnknownSigner);
    }

    #[test]
    fn not_signed_data() {
        let ci = ContentInfo {
            content_type: ID_CT_TST_INFO,
            content: Any::null(),
        };
        let err = TimeStampToken::from_content_info(&ci).unwrap_err();
        assert_eq!(err.kind, TsaErrorKind::InvalidContentType);
    }
}
