use chrono::{DateTime, Utc};
use cms::{
    cert::IssuerAndSerialNumber,
    content_info::{CmsVersion, ContentInfo},
    signed_data::{EncapsulatedContentInfo, SignerIdentifier, SignerInfo, SignerInfos},
};
use der::{
    asn1::{GeneralizedTime, OctetString, SetOfVec, UtcTime},
    oid::db::rfc5911::{ID_CONTENT_TYPE, ID_MESSAGE_DIGEST, ID_SIGNED_DATA, ID_SIGNING_TIME},
    Any, Encode, Tag,
};
use x509_cert::attr::{Attribute, Attributes};

use crate::{
    algorithm::Algorithm,
    asn1_types::{SignedData, TSTInfo, ID_CT_TST_INFO},
    cert::CertificateChain,
    errors::{TsaError, TsaErrorKind, TsaResult},
    signer::SigningKey,
    tstinfo::unix_duration,
};

/// Digest used for messageDigest and for the signature, whatever digest the
/// client used for its imprint.
pub const SIGNING_DIGEST: Algorithm = Algorithm::Sha256;

/// signingTime value: UTCTime for 1950 through 2049, GeneralizedTime
/// otherwise (RFC 5652 11.3).
pub fn signing_time_value(time: &DateTime<Utc>) -> Result<Any, TsaError> {
    let date_time =
        der::DateTime::from_unix_duration(unix_duration(time)?).map_app_err(TsaErrorKind::EncodingError)?;

    let value = if (1950..=2049).contains(&date_time.year()) {
        let utc_time = UtcTime::from_date_time(date_time).map_app_err(TsaErrorKind::EncodingError)?;
        Any::encode_from(&utc_time)
    } else {
        Any::encode_from(&GeneralizedTime::from_date_time(date_time))
    };

    value.map_app_err(TsaErrorKind::EncodingError)
}

fn attribute(oid: der::asn1::ObjectIdentifier, value: Any) -> Result<Attribute, TsaError> {
    let mut values = SetOfVec::new();
    values.insert(value).map_app_err(TsaErrorKind::EncodingError)?;

    Ok(Attribute { oid, values })
}

/// contentType, messageDigest and signingTime, DER sorted.
pub fn signed_attributes(
    message_digest: &[u8],
    signing_time: &DateTime<Utc>,
) -> Result<Attributes, TsaError> {
    let content_type =
        Any::encode_from(&ID_CT_TST_INFO).map_app_err(TsaErrorKind::EncodingError)?;
    let message_digest = Any::new(Tag::OctetString, message_digest.to_vec())
        .map_app_err(TsaErrorKind::EncodingError)?;

    SetOfVec::try_from(vec![
        attribute(ID_CONTENT_TYPE, content_type)?,
        attribute(ID_MESSAGE_DIGEST, message_digest)?,
        attribute(ID_SIGNING_TIME, signing_time_value(signing_time)?)?,
    ])
    .map_app_err(TsaErrorKind::EncodingError)
}

/// Wraps a TSTInfo into a `TimeStampToken`: a ContentInfo holding a
/// SignedData with one SignerInfo and the TSA certificate chain.
pub struct SignedDataBuilder<'a> {
    chain: &'a CertificateChain,
    key: &'a SigningKey,
}

impl<'a> SignedDataBuilder<'a> {
    pub fn new(chain: &'a CertificateChain, key: &'a SigningKey) -> Self {
        Self { chain, key }
    }

    pub fn sign(
        self: &Self,
        tst_info: &TSTInfo,
        signing_time: &DateTime<Utc>,
    ) -> Result<ContentInfo, TsaError> {
        // 只编码一次，摘要和 eContent 用同一份字节
        let tst_info_der = tst_info.to_der().map_app_err(TsaErrorKind::EncodingError)?;
        let message_digest = SIGNING_DIGEST.digest(&tst_info_der)?;

        let signed_attrs = signed_attributes(&message_digest, signing_time)?;
        let signed_attrs_der = signed_attrs
            .to_der()
            .map_app_err(TsaErrorKind::EncodingError)?;
        let signature = self
            .key
            .sign_digest(&SIGNING_DIGEST.digest(&signed_attrs_der)?)?;

        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(self.issuer_and_serial_number()),
            digest_alg: SIGNING_DIGEST.to_identifier()?,
            signed_attrs: Some(signed_attrs),
            signature_algorithm: self.key.signature_algorithm().to_identifier()?,
            signature: OctetString::new(signature).map_app_err(TsaErrorKind::EncodingError)?,
            unsigned_attrs: None,
        };

        let signed_data = SignedData {
            version: CmsVersion::V3,
            digest_algorithms: SetOfVec::try_from(vec![SIGNING_DIGEST.to_identifier()?])
                .map_app_err(TsaErrorKind::EncodingError)?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: ID_CT_TST_INFO,
                econtent: Some(
                    Any::new(Tag::OctetString, tst_info_der)
                        .map_app_err(TsaErrorKind::EncodingError)?,
                ),
            },
            certificates: Some(self.chain.certificates()),
            signer_infos: SignerInfos(
                SetOfVec::try_from(vec![signer_info]).map_app_err(TsaErrorKind::EncodingError)?,
            ),
        };

        Ok(ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data).map_app_err(TsaErrorKind::EncodingError)?,
        })
    }

    fn issuer_and_serial_number(self: &Self) -> IssuerAndSerialNumber {
        self.chain.signer().issuer_and_serial_number()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use der::{asn1::ObjectIdentifier, Decode, Tagged};

    use super::*;
    use crate::{request::parse_and_validate, tstinfo::TstInfoBuilder};

    fn rsa_material() -> (CertificateChain, SigningKey) {
        (
            CertificateChain::from_pem(include_str!("./testdata/rsa-chain.pem")).unwrap(),
            SigningKey::from_pem(include_bytes!("./testdata/tsa-rsa.key"), None).unwrap(),
        )
    }

    fn ec_material() -> (CertificateChain, SigningKey) {
        (
            CertificateChain::from_pem(include_str!("./testdata/ec-chain.pem")).unwrap(),
            SigningKey::from_pem(include_bytes!("./testdata/tsa-ec.key"), None).unwrap(),
        )
    }

    fn tst_info(now: &DateTime<Utc>) -> TSTInfo {
        let req = parse_and_validate(include_bytes!("./testdata/sha256.tsq")).unwrap();
        TstInfoBuilder::new(ObjectIdentifier::new_unwrap("1.3.6.1.4.1.13762.3"))
            .build(&req.message_imprint, 1000, req.nonce.as_ref(), now)
            .unwrap()
    }

    fn sign(material: &(CertificateChain, SigningKey), now: &DateTime<Utc>) -> SignedData {
        let token = SignedDataBuilder::new(&material.0, &material.1)
            .sign(&tst_info(now), now)
            .unwrap();
        assert_eq!(token.content_type, ID_SIGNED_DATA);
        token.content.decode_as::<SignedData>().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 15).unwrap()
    }

    #[test]
    fn envelope_layout() {
        let material = rsa_material();
        let signed_data = sign(&material, &now());

        assert_eq!(signed_data.version, CmsVersion::V3);
        assert_eq!(signed_data.digest_algorithms.len(), 1);
        assert_eq!(signed_data.encap_content_info.econtent_type, ID_CT_TST_INFO);

        // TSA 证书在前
        let certs = signed_data.certificates.unwrap();
        assert_eq!(certs, material.0.certificates());
        assert_eq!(&certs[0], material.0.signer().inner());

        let signer_info = signed_data.signer_infos.0.get(0).unwrap();
        assert_eq!(signer_info.version, CmsVersion::V1);
        assert_eq!(
            signer_info.sid,
            SignerIdentifier::IssuerAndSerialNumber(material.0.signer().issuer_and_serial_number())
        );
        assert_eq!(Algorithm::from(&signer_info.digest_alg), Algorithm::Sha256);
        assert_eq!(
            Algorithm::from(&signer_info.signature_algorithm),
            Algorithm::RSA
        );
        assert!(signer_info.unsigned_attrs.is_none());
    }

    #[test]
    fn econtent_is_the_signed_tstinfo() {
        let material = ec_material();
        let signed_data = sign(&material, &now());

        let econtent = signed_data.encap_content_info.econtent.unwrap();
        assert_eq!(econtent.tag(), Tag::OctetString);
        assert_eq!(econtent.value(), tst_info(&now()).to_der().unwrap());
        assert_eq!(TSTInfo::from_der(econtent.value()).unwrap(), tst_info(&now()));
    }

    #[test]
    fn signed_attributes_and_signature() {
        for material in [rsa_material(), ec_material()] {
            let signed_data = sign(&material, &now());
            let econtent = signed_data.encap_content_info.econtent.unwrap();
            let signer_info = signed_data.signer_infos.0.get(0).unwrap();
            let signed_attrs = signer_info.signed_attrs.as_ref().unwrap();

            assert_eq!(signed_attrs.len(), 3);
            let oids: Vec<_> = signed_attrs.iter().map(|v| v.oid).collect();
            assert!(oids.contains(&ID_CONTENT_TYPE));
            assert!(oids.contains(&ID_MESSAGE_DIGEST));
            assert!(oids.contains(&ID_SIGNING_TIME));

            let message_digest = signed_attrs
                .iter()
                .find(|v| v.oid == ID_MESSAGE_DIGEST)
                .unwrap();
            let message_digest = message_digest.values.get(0).unwrap();
            let message_digest = message_digest.decode_as::<OctetString>().unwrap();
            assert_eq!(
                message_digest.as_bytes(),
                Algorithm::Sha256.digest(econtent.value()).unwrap()
            );

            let digest = Algorithm::Sha256
                .digest(&signed_attrs.to_der().unwrap())
                .unwrap();
            assert!(material
                .1
                .public_key()
                .verify_digest(&digest, signer_info.signature.as_bytes())
                .unwrap());
        }
    }

    #[test]
    fn attributes_are_deterministic() {
        let digest = [7u8; 32];
        let first = signed_attributes(&digest, &now()).unwrap();
        let second = signed_attributes(&digest, &now()).unwrap();
        assert_eq!(first.to_der().unwrap(), second.to_der().unwrap());
        assert_eq!(first.to_der().unwrap()[0], 0x31);
    }

    #[test]
    fn signing_time_encoding() {
        let value = signing_time_value(&now()).unwrap();
        assert_eq!(value.tag(), Tag::UtcTime);
        assert_eq!(value.value(), b"240517083015Z");

        let value = signing_time_value(&Utc.with_ymd_and_hms(2049, 12, 31, 23, 59, 59).unwrap())
            .unwrap();
        assert_eq!(value.tag(), Tag::UtcTime);

        let value = signing_time_value(&Utc.with_ymd_and_hms(2050, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        assert_eq!(value.tag(), Tag::GeneralizedTime);
        assert_eq!(value.value(), b"20500101000000Z");
    }
}
