use chrono::{DateTime, Utc};
use cms::content_info::ContentInfo;
use log::{debug, error, info, warn};

use cert::CertificateChain;
use config::TsaConfig;
use errors::{TsaError, TsaErrorKind};
use request::{parse_and_validate, ValidatedRequest};
use serial::SerialAllocator;
use signed_data::SignedDataBuilder;
use signer::SigningKey;
use tstinfo::TstInfoBuilder;

pub mod algorithm;
pub mod asn1_types;
pub mod cert;
pub mod config;
pub mod errors;
pub mod request;
pub mod response;
pub mod serial;
pub mod signed_data;
pub mod signer;
pub mod tstinfo;
pub mod utils;
pub mod verify;
pub use der;

/// The time-stamp authority: one certificate chain, one key, one serial
/// store. Built once at startup and shared by reference between request
/// handlers.
#[derive(Debug)]
pub struct TimeStampAuthority {
    chain: CertificateChain,
    key: SigningKey,
    serials: SerialAllocator,
    tst_info: TstInfoBuilder,
}

impl TimeStampAuthority {
    pub fn new(
        chain: CertificateChain,
        key: SigningKey,
        serials: SerialAllocator,
        tst_info: TstInfoBuilder,
    ) -> Result<Self, TsaError> {
        // 私钥必须和签名证书匹配
        if chain.signer().public_key()? != key.public_key() {
            return Err(TsaError {
                kind: TsaErrorKind::KeyCertificateMismatch,
                message: format!("{} key does not belong to {}", key.kind(), chain.signer()),
            });
        }

        Ok(Self {
            chain,
            key,
            serials,
            tst_info,
        })
    }

    /// Validates `config`, loads the chain and key and wires up the serial
    /// store. Any failure here is fatal for the process.
    pub fn from_config(config: &TsaConfig) -> Result<Self, TsaError> {
        config.validate()?;

        let chain = CertificateChain::load(&config.chain_path)?;
        let key = SigningKey::load(&config.key_path, config.key_password.as_deref())?;
        let mut tst_info = config.tst_info_builder()?;
        if config.include_tsa_name {
            tst_info.set_tsa_name(chain.signer().subject.clone());
        }

        let tsa = Self::new(
            chain,
            key,
            SerialAllocator::new(&config.serial_path),
            tst_info,
        )?;

        info!(
            "time-stamp authority ready: signer {}, {} key, policy {}, {} certificate(s), serials in {}",
            tsa.chain.signer(),
            tsa.key.kind(),
            tsa.tst_info.policy(),
            tsa.chain.len(),
            tsa.serials.path().display()
        );

        Ok(tsa)
    }

    /// Answers one DER `TimeStampReq` with a DER `TimeStampResp`. Never
    /// fails: every error becomes a rejection carrying its failure code.
    pub fn process(self: &Self, request: &[u8]) -> Vec<u8> {
        let err = match self.try_process(request) {
            Ok(response) => return response,
            Err(err) => err,
        };

        warn!("rejecting request ({:?}): {}", err.failure_info(), err);

        response::rejection(&err).unwrap_or_else(|err| {
            error!("cannot encode rejection: {}", err);
            response::SYSTEM_FAILURE_RESPONSE.to_vec()
        })
    }

    /// Like [`Self::process`], but hands back the error instead of a
    /// rejection.
    pub fn try_process(self: &Self, request: &[u8]) -> Result<Vec<u8>, TsaError> {
        let req = parse_and_validate(request)?;
        debug!(
            "request imprint {} {}, nonce {}",
            req.algorithm,
            req.hashed_message_hex(),
            req.nonce.is_some()
        );

        let token = self.issue(&req, &Utc::now())?;
        response::granted(token)
    }

    /// Allocates a serial and signs a TSTInfo for `req` at `now`. genTime and
    /// signingTime are both taken from `now`.
    pub fn issue(
        self: &Self,
        req: &ValidatedRequest,
        now: &DateTime<Utc>,
    ) -> Result<ContentInfo, TsaError> {
        let serial = self.serials.allocate()?;
        let tst_info = self
            .tst_info
            .build(&req.message_imprint, serial, req.nonce.as_ref(), now)?;
        let token = SignedDataBuilder::new(&self.chain, &self.key).sign(&tst_info, now)?;

        info!("granted time-stamp serial {} at {}", serial, now);
        Ok(token)
    }

    pub fn chain(self: &Self) -> &CertificateChain {
        &self.chain
    }

    pub fn key(self: &Self) -> &SigningKey {
        &self.key
    }

    pub fn serials(self: &Self) -> &SerialAllocator {
        &self.serials
    }

    pub fn tst_info_builder(self: &Self) -> &TstInfoBuilder {
        &self.tst_info
    }
}
