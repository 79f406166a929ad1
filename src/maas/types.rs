//! Wire types and response classification for the MAAS 2.0 API.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::gateway::{GatewayError, MachineHandle, MachineStatus};

/// The subset of the MAAS machine entity this crate reads.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct MachineRecord {
    /// Machine identifier.
    pub system_id: String,
    /// Hostname assigned by MAAS.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Numeric node status.
    pub status: i64,
    /// Human-readable status label.
    #[serde(default)]
    pub status_name: Option<String>,
    /// Number of CPU cores.
    #[serde(default)]
    pub cpu_count: Option<u32>,
    /// Memory in MiB.
    #[serde(default)]
    pub memory: Option<u64>,
}

impl MachineRecord {
    /// Decoded status.
    #[must_use]
    pub const fn machine_status(&self) -> MachineStatus {
        MachineStatus::from_code(self.status)
    }
}

impl From<MachineRecord> for MachineHandle {
    fn from(record: MachineRecord) -> Self {
        Self {
            status: record.machine_status(),
            system_id: record.system_id,
            hostname: record.hostname,
        }
    }
}

/// Maps an HTTP status and body to the gateway sentinel.
///
/// `resource` names what was addressed and ends up in
/// [`GatewayError::NotFound`].
pub(crate) fn classify_response(
    status: u16,
    body: String,
    resource: &str,
) -> Result<String, GatewayError> {
    match status {
        200..=299 => Ok(body),
        404 => Err(GatewayError::NotFound {
            resource: resource.to_owned(),
        }),
        _ => Err(GatewayError::Rejected { status, body }),
    }
}

/// Allocation answers 409 when nothing matches the constraints.
pub(crate) fn conflict_as_unavailable(err: GatewayError, wanted: &str) -> GatewayError {
    match err {
        GatewayError::Rejected { status: 409, body } => GatewayError::Unavailable {
            message: format!("{wanted}: {body}"),
        },
        other => other,
    }
}

pub(crate) fn decode<T: DeserializeOwned>(body: &str) -> Result<T, GatewayError> {
    serde_json::from_str(body).map_err(|err| GatewayError::Decode {
        message: err.to_string(),
    })
}

/// MAAS expects `user_data` base64 encoded.
pub(crate) fn encode_user_data(payload: &str) -> String {
    STANDARD.encode(payload.as_bytes())
}
