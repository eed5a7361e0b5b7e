use std::{fmt, path::PathBuf, str::FromStr};

use der::asn1::ObjectIdentifier;

use crate::{
    errors::{TsaError, TsaErrorKind},
    tstinfo::TstInfoBuilder,
};

pub const DEFAULT_CHAIN_PATH: &str = "tsa/chain.pem";
pub const DEFAULT_KEY_PATH: &str = "tsa/key.pem";
pub const DEFAULT_SERIAL_PATH: &str = "tsa/tsaserial.txt";
pub const DEFAULT_POLICY_OID: &str = "1.3.6.1.4.1.13762.3";
pub const DEFAULT_ACCURACY_SECONDS: i64 = 1;

/// Everything needed to build a [`crate::TimeStampAuthority`]. The library
/// never reads the environment; the binary fills this in from flags and
/// `TSA_*` variables.
#[derive(Clone, PartialEq, Eq)]
pub struct TsaConfig {
    /// PEM file, TSA certificate first, then its issuers.
    pub chain_path: PathBuf,
    pub key_path: PathBuf,
    pub key_password: Option<String>,
    pub serial_path: PathBuf,
    pub policy_oid: String,
    pub accuracy_seconds: i64,
    pub accuracy_millis: Option<u16>,
    pub accuracy_micros: Option<u16>,
    /// Put the signer subject into TSTInfo `tsa`.
    pub include_tsa_name: bool,
}

impl Default for TsaConfig {
    fn default() -> Self {
        Self {
            chain_path: PathBuf::from(DEFAULT_CHAIN_PATH),
            key_path: PathBuf::from(DEFAULT_KEY_PATH),
            key_password: None,
            serial_path: PathBuf::from(DEFAULT_SERIAL_PATH),
            policy_oid: DEFAULT_POLICY_OID.to_owned(),
            accuracy_seconds: DEFAULT_ACCURACY_SECONDS,
            accuracy_millis: None,
            accuracy_micros: None,
            include_tsa_name: false,
        }
    }
}

impl fmt::Debug for TsaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsaConfig")
            .field("chain_path", &self.chain_path)
            .field("key_path", &self.key_path)
            .field("key_password", &self.key_password.as_ref().map(|_| "***"))
            .field("serial_path", &self.serial_path)
            .field("policy_oid", &self.policy_oid)
            .field("accuracy_seconds", &self.accuracy_seconds)
            .field("accuracy_millis", &self.accuracy_millis)
            .field("accuracy_micros", &self.accuracy_micros)
            .field("include_tsa_name", &self.include_tsa_name)
            .finish()
    }
}

impl TsaConfig {
    /// Reports every problem at once, joined by `"; "`.
    pub fn validate(self: &Self) -> Result<(), TsaError> {
        let mut problems = vec![];

        if !self.chain_path.is_file() {
            problems.push(format!(
                "certificate chain {} not found",
                self.chain_path.display()
            ));
        }
        if !self.key_path.is_file() {
            problems.push(format!("private key {} not found", self.key_path.display()));
        }
        if self.accuracy_seconds < 0 {
            problems.push(format!(
                "accuracy seconds must be >= 0, got {}",
                self.accuracy_seconds
            ));
        }
        for (name, value) in [
            ("millis", self.accuracy_millis),
            ("micros", self.accuracy_micros),
        ] {
            match value {
                Some(value) if !(1..=999).contains(&value) => {
                    problems.push(format!("accuracy {} must be 1..=999, got {}", name, value))
                }
                _ => {}
            }
        }
        if let Err(err) = ObjectIdentifier::from_str(&self.policy_oid) {
            problems.push(format!("policy OID {:?}: {}", self.policy_oid, err));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(TsaError {
                kind: TsaErrorKind::InvalidConfig,
                message: problems.join("; "),
            })
        }
    }

    pub fn policy(self: &Self) -> Result<ObjectIdentifier, TsaError> {
        ObjectIdentifier::from_str(&self.policy_oid).map_err(|err| TsaError {
            kind: TsaErrorKind::InvalidConfig,
            message: format!("policy OID {:?}: {}", self.policy_oid, err),
        })
    }

    /// TSTInfo builder with this configuration's policy and accuracy. The
    /// tsa name is left to the caller, who knows the signer certificate.
    pub fn tst_info_builder(self: &Self) -> Result<TstInfoBuilder, TsaError> {
        let seconds = u64::try_from(self.accuracy_seconds).map_err(|_| TsaError {
            kind: TsaErrorKind::InvalidConfig,
            message: format!(
                "accuracy seconds must be >= 0, got {}",
                self.accuracy_seconds
            ),
        })?;

        let mut builder = TstInfoBuilder::new(self.policy()?);
        builder.set_accuracy(seconds, self.accuracy_millis, self.accuracy_micros);

        Ok(builder)
    }
}
