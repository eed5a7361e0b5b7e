use der::{
    asn1::{Int, ObjectIdentifier, OctetString},
    Decode, Encode,
};

use crate::{
    algorithm::Algorithm,
    asn1_types::{MessageImprint, TSTVersion, TimeStampReq},
    errors::{TsaError, TsaErrorKind, TsaResult},
    utils::to_hex_str,
};

/// Request fields that survive validation and feed the TSTInfo.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidatedRequest {
    pub message_imprint: MessageImprint,
    pub algorithm: Algorithm,
    pub nonce: Option<Int>,
    pub req_policy: Option<ObjectIdentifier>,
    pub cert_req: bool,
}

/// Decodes a DER `TimeStampReq` and checks its message imprint.
///
/// Malformed input, trailing bytes and a digest whose length does not fit
/// its algorithm are `InvalidTimeStampReq`; a digest algorithm other than
/// SHA-256 or SHA-384 is `UnsupportedHashAlgorithm`. `reqPolicy`, `certReq`
/// and extensions are passed through without being enforced.
///
/// The imprint length check is stricter than a plain allow-list: a request
/// carrying, say, a 20-byte value under the SHA-256 OID is rejected with
/// `badDataFormat` rather than time-stamped as is.
pub fn parse_and_validate(bytes: &[u8]) -> Result<ValidatedRequest, TsaError> {
    let req = TimeStampReq::from_der(bytes).map_app_err(TsaErrorKind::InvalidTimeStampReq)?;

    let algorithm = Algorithm::from(&req.message_imprint.hash_algorithm);
    if !algorithm.is_imprint_digest() {
        return Err(TsaError {
            kind: TsaErrorKind::UnsupportedHashAlgorithm,
            message: format!(
                "unsupported hash algorithm: {}",
                req.message_imprint.hash_algorithm.oid
            ),
        });
    }

    let digest_len = req.message_imprint.hashed_message.as_bytes().len();
    let expected_len = algorithm.output_size().unwrap_or_default();
    if digest_len != expected_len {
        return Err(TsaError {
            kind: TsaErrorKind::InvalidTimeStampReq,
            message: format!(
                "{} imprint must be {} bytes, got {}",
                algorithm, expected_len, digest_len
            ),
        });
    }

    Ok(ValidatedRequest {
        message_imprint: req.message_imprint,
        algorithm,
        nonce: req.nonce,
        req_policy: req.req_policy,
        cert_req: req.cert_req,
    })
}

impl ValidatedRequest {
    pub fn hashed_message_hex(self: &Self) -> String {
        to_hex_str(self.message_imprint.hashed_message.as_bytes())
    }
}

/// Builder for DER `TimeStampReq` messages, the client half of the exchange.
#[derive(Clone, Debug)]
pub struct TimeStampReqBuilder {
    algorithm: Algorithm,
    hashed_message: Vec<u8>,
    nonce: Option<u64>,
    req_policy: Option<ObjectIdentifier>,
    cert_req: bool,
}

impl TimeStampReqBuilder {
    pub fn new(algorithm: Algorithm, hashed_message: &[u8]) -> Self {
        Self {
            algorithm,
            hashed_message: hashed_message.to_vec(),
            nonce: None,
            req_policy: None,
            cert_req: false,
        }
    }

    /// Hashes `data` with `algorithm` and uses the digest as the imprint.
    pub fn for_data(algorithm: Algorithm, data: &[u8]) -> Result<Self, TsaError> {
        let hashed_message = algorithm.digest(data)?;
        Ok(Self::new(algorithm, &hashed_message))
    }

    pub fn set_nonce(self: &mut Self, nonce: u64) -> &mut Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn set_req_policy(self: &mut Self, policy: ObjectIdentifier) -> &mut Self {
        self.req_policy = Some(policy);
        self
    }

    pub fn set_cert_req(self: &mut Self, cert_req: bool) -> &mut Self {
        self.cert_req = cert_req;
        self
    }

    pub fn build(self: &Self) -> Result<TimeStampReq, TsaError> {
        let nonce = match self.nonce {
            // u64 编码后再解码，得到最短的正整数编码
            Some(nonce) => {
                let der = nonce.to_der().map_app_err(TsaErrorKind::EncodingError)?;
                Some(Int::from_der(&der).map_app_err(TsaErrorKind::EncodingError)?)
            }
            None => None,
        };

        Ok(TimeStampReq {
            version: TSTVersion::V1,
            message_imprint: MessageImprint {
                hash_algorithm: self.algorithm.to_identifier()?,
                hashed_message: OctetString::new(self.hashed_message.clone())
                    .map_app_err(TsaErrorKind::EncodingError)?,
            },
            req_policy: self.req_policy,
            nonce,
            cert_req: self.cert_req,
            extensions: None,
        })
    }

    pub fn to_der(self: &Self) -> Result<Vec<u8>, TsaError> {
        self.build()?
            .to_der()
            .map_app_err(TsaErrorKind::EncodingError)
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    const DATA_SHA256: [u8; 32] =
        hex!("8605a19b9b6f1ae990adddda43156a87a377c31b6ce2f58737c2c0d3d9e8c40f");

    #[test]
    fn accepts_sha256_query() {
        let req = parse_and_validate(include_bytes!("./testdata/sha256.tsq")).unwrap();

        assert_eq!(req.algorithm, Algorithm::Sha256);
        assert_eq!(req.message_imprint.hashed_message.as_bytes(), DATA_SHA256);
        assert_eq!(req.hashed_message_hex(), to_hex_str(&DATA_SHA256));
        assert!(req.nonce.is_some());
        assert!(req.cert_req);
    }

    #[test]
    fn accepts_sha384_query() {
        let req = parse_and_validate(include_bytes!("./testdata/sha384.tsq")).unwrap();

        assert_eq!(req.algorithm, Algorithm::Sha384);
        assert!(req.nonce.is_none());
    }

    #[test]
    fn rejects_sha1_and_sha512() {
        for tsq in [
            &include_bytes!("./testdata/sha1.tsq")[..],
            &include_bytes!("./testdata/sha512.tsq")[..],
        ] {
            let err = parse_and_validate(tsq).unwrap_err();
            assert_eq!(err.kind, TsaErrorKind::UnsupportedHashAlgorithm);
        }
    }

    #[test]
    fn rejects_malformed_input() {
        let tsq = include_bytes!("./testdata/sha256.tsq");

        for bytes in [&b""[..], &b"\x30"[..], &b"hello"[..], &tsq[..tsq.len() - 3]] {
            let err = parse_and_validate(bytes).unwrap_err();
            assert_eq!(err.kind, TsaErrorKind::InvalidTimeStampReq);
        }
    }

    #[test]
    fn rejects_trailing_data() {
        let mut tsq = include_bytes!("./testdata/sha256.tsq").to_vec();
        tsq.push(0);

        let err = parse_and_validate(&tsq).unwrap_err();
        assert_eq!(err.kind, TsaErrorKind::InvalidTimeStampReq);
    }

    #[test]
    fn rejects_imprint_of_wrong_length() {
        let tsq = TimeStampReqBuilder::new(Algorithm::Sha256, &[0xAA; 31])
            .to_der()
            .unwrap();

        let err = parse_and_validate(&tsq).unwrap_err();
        assert_eq!(err.kind, TsaErrorKind::InvalidTimeStampReq);
    }

    #[test]
    fn builder_matches_openssl_query() {
        let tsq = TimeStampReqBuilder::for_data(
            Algorithm::Sha256,
            include_bytes!("./testdata/data.txt"),
        )
        .unwrap()
        .set_nonce(0xC4670CABC82B83D1)
        .set_cert_req(true)
        .to_der()
        .unwrap();

        // openssl 对 SHA-256 带 NULL 参数，这里省略
        let req = parse_and_validate(&tsq).unwrap();
        let openssl = parse_and_validate(include_bytes!("./testdata/sha256.tsq")).unwrap();
        assert_eq!(
            req.message_imprint.hashed_message,
            openssl.message_imprint.hashed_message
        );
        assert_eq!(req.nonce, openssl.nonce);
        assert_eq!(req.cert_req, openssl.cert_req);
    }

    #[test]
    fn builder_nonce_is_positive() {
        let tsq = TimeStampReqBuilder::new(Algorithm::Sha384, &[0u8; 48])
            .set_nonce(u64::MAX)
            .to_der()
            .unwrap();

        let req = parse_and_validate(&tsq).unwrap();
        assert_eq!(
            req.nonce.unwrap().to_der().unwrap(),
            hex!("020900FFFFFFFFFFFFFFFF")
        );
    }

    #[test]
    fn builder_with_policy() {
        let policy = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.13762.3");
        let tsq = TimeStampReqBuilder::new(Algorithm::Sha256, &DATA_SHA256)
            .set_req_policy(policy)
            .to_der()
            .unwrap();

        let req = parse_and_validate(&tsq).unwrap();
        assert_eq!(req.req_policy, Some(policy));
        assert!(req.nonce.is_none());
        assert!(!req.cert_req);
    }
}
