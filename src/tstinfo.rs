use std::time::Duration;

use chrono::{DateTime, Utc};
use der::asn1::{GeneralizedTime, Int, ObjectIdentifier};
use x509_cert::{ext::pkix::name::GeneralName, name::Name, serial_number::SerialNumber};

use crate::{
    asn1_types::{Accuracy, MessageImprint, TSTInfo, TSTVersion},
    errors::{TsaError, TsaErrorKind, TsaResult},
};

/// Seconds since the epoch of `time`, sub-second part dropped.
pub fn unix_duration(time: &DateTime<Utc>) -> Result<Duration, TsaError> {
    let secs = u64::try_from(time.timestamp()).map_err(|_| TsaError {
        kind: TsaErrorKind::EncodingError,
        message: format!("time before 1970: {}", time),
    })?;

    Ok(Duration::from_secs(secs))
}

/// Assembles the TSTInfo for one request. The per-authority parts
/// (policy, accuracy, tsa name) are fixed at construction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TstInfoBuilder {
    policy: ObjectIdentifier,
    accuracy: Accuracy,
    tsa_name: Option<Name>,
}

impl TstInfoBuilder {
    pub fn new(policy: ObjectIdentifier) -> Self {
        Self {
            policy,
            accuracy: Accuracy {
                seconds: Some(1),
                millis: None,
                micros: None,
            },
            tsa_name: None,
        }
    }

    pub fn set_accuracy(
        self: &mut Self,
        seconds: u64,
        millis: Option<u16>,
        micros: Option<u16>,
    ) -> &mut Self {
        self.accuracy = Accuracy {
            seconds: Some(seconds),
            millis,
            micros,
        };
        self
    }

    pub fn set_tsa_name(self: &mut Self, name: Name) -> &mut Self {
        self.tsa_name = Some(name);
        self
    }

    pub fn policy(self: &Self) -> &ObjectIdentifier {
        &self.policy
    }

    /// `nonce` is echoed only when the request carried one; `ordering`
    /// stays false and is therefore left out of the encoding.
    pub fn build(
        self: &Self,
        message_imprint: &MessageImprint,
        serial: u64,
        nonce: Option<&Int>,
        gen_time: &DateTime<Utc>,
    ) -> Result<TSTInfo, TsaError> {
        let gen_time = GeneralizedTime::from_unix_duration(unix_duration(gen_time)?)
            .map_app_err(TsaErrorKind::EncodingError)?;

        Ok(TSTInfo {
            version: TSTVersion::V1,
            policy: self.policy,
            message_imprint: message_imprint.clone(),
            serial_number: SerialNumber::from(serial),
            gen_time,
            accuracy: Some(self.accuracy.clone()),
            ordering: false,
            nonce: nonce.cloned(),
            tsa: self.tsa_name.clone().map(GeneralName::DirectoryName),
            extensions: None,
        })
    }
}
