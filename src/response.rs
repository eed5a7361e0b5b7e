use cms::content_info::ContentInfo;
use der::{Decode, Encode};

use crate::{
    asn1_types::{PkiFailureInfo, PkiStatus, PkiStatusInfo, TimeStampResp},
    errors::{TsaError, TsaErrorKind, TsaResult},
};

/// `TimeStampResp { status { rejection, failInfo systemFailure } }`, used
/// when not even a rejection can be encoded.
pub const SYSTEM_FAILURE_RESPONSE: [u8; 14] = [
    0x30, 0x0C, 0x30, 0x0A, 0x02, 0x01, 0x02, 0x03, 0x05, 0x06, 0x00, 0x00, 0x00, 0x40,
];

pub fn granted(token: ContentInfo) -> Result<Vec<u8>, TsaError> {
    TimeStampResp {
        status: PkiStatusInfo {
            status: PkiStatus::Granted,
            status_string: None,
            fail_info: None,
        },
        time_stamp_token: Some(token),
    }
    .to_der()
    .map_app_err(TsaErrorKind::EncodingError)
}

/// Rejection carrying the error's failure code, with its message as
/// statusString.
pub fn rejection(err: &TsaError) -> Result<Vec<u8>, TsaError> {
    let message = if err.message.is_empty() {
        format!("{:?}", err.kind)
    } else {
        err.message.clone()
    };

    rejection_with(err.failure_info(), Some(message))
}

pub fn rejection_with(
    failure: PkiFailureInfo,
    status_string: Option<String>,
) -> Result<Vec<u8>, TsaError> {
    TimeStampResp {
        status: PkiStatusInfo {
            status: PkiStatus::Rejection,
            status_string: status_string.map(|v| vec![v]),
            fail_info: Some(
                PkiFailureInfo::to_bit_string(&[failure])
                    .map_app_err(TsaErrorKind::EncodingError)?,
            ),
        },
        time_stamp_token: None,
    }
    .to_der()
    .map_app_err(TsaErrorKind::EncodingError)
}

/// A parsed `TimeStampResp`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodedResponse {
    pub status: PkiStatus,
    pub status_strings: Vec<String>,
    pub failure_info: Vec<PkiFailureInfo>,
    pub token: Option<ContentInfo>,
}

impl DecodedResponse {
    pub fn is_granted(self: &Self) -> bool {
        matches!(self.status, PkiStatus::Granted | PkiStatus::GrantedWithMods)
    }
}

pub fn decode_response(bytes: &[u8]) -> Result<DecodedResponse, TsaError> {
    let resp = TimeStampResp::from_der(bytes).map_app_err(TsaErrorKind::InvalidTimeStampResp)?;

    Ok(DecodedResponse {
        status: resp.status.status,
        status_strings: resp.status.status_string.unwrap_or_default(),
        failure_info: resp
            .status
            .fail_info
            .as_ref()
            .map(PkiFailureInfo::from_bit_string)
            .unwrap_or_default(),
        token: resp.time_stamp_token,
    })
}
