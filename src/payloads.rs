//! Request and response payload records of the primary channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// Endpoints
pub const URI_POWER_STATE: &str = "ssap://com.webos.service.tvpower/power/getPowerState";
pub const URI_SCREEN_OFF: &str = "ssap://com.webos.service.tvpower/power/turnOffScreen";
pub const URI_SCREEN_ON: &str = "ssap://com.webos.service.tvpower/power/turnOnScreen";
pub const URI_CURRENT_CHANNEL: &str = "ssap://tv/getCurrentChannel";
pub const URI_OPEN_CHANNEL: &str = "ssap://tv/openChannel";
pub const URI_SWITCH_INPUT: &str = "ssap://tv/switchInput";
pub const URI_FOREGROUND_APP: &str = "ssap://com.webos.applicationManager/getForegroundAppInfo";
pub const URI_LAUNCH_APP: &str = "ssap://system.launcher/launch";
pub const URI_AUDIO_STATUS: &str = "ssap://audio/getStatus";
pub const URI_GET_MUTE: &str = "ssap://audio/getMute";
pub const URI_SET_MUTE: &str = "ssap://audio/setMute";
pub const URI_SET_VOLUME: &str = "ssap://audio/setVolume";
pub const URI_CREATE_TOAST: &str = "ssap://system.notifications/createToast";
pub const URI_TURN_OFF: &str = "ssap://system/turnOff";
pub const URI_SYSTEM_INFO: &str = "ssap://system/getSystemInfo";
pub const URI_SCREENSHOT: &str = "ssap://tv/executeOneShot";

/// Payload of the `register` envelope.
///
/// The manifest is passed through untouched; it is signed by the vendor and
/// normally loaded from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingRequest {
    #[serde(rename = "forcePairing", default)]
    pub force_pairing: bool,

    #[serde(rename = "pairingType", default = "default_pairing_type")]
    pub pairing_type: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub manifest: Value,

    /// Key issued by a previous pairing, if the caller stored one
    #[serde(rename = "client-key", default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
}

fn default_pairing_type() -> String {
    "PROMPT".to_string()
}

impl Default for PairingRequest {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl PairingRequest {
    pub fn new(manifest: Value) -> Self {
        Self {
            force_pairing: false,
            pairing_type: default_pairing_type(),
            manifest,
            client_key: None,
        }
    }

    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PairingResponse {
    #[serde(rename = "client-key")]
    pub client_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PowerStateRequest {
    pub subscribe: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PowerStateResponse {
    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub processing: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrentChannelResponse {
    #[serde(rename = "channelId", default)]
    pub channel_id: String,

    #[serde(rename = "channelNumber", default)]
    pub channel_number: String,

    #[serde(rename = "channelName", default)]
    pub channel_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForegroundAppInfoResponse {
    #[serde(rename = "appId", default)]
    pub app_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioStatusResponse {
    #[serde(default)]
    pub volume: Option<i32>,

    #[serde(default)]
    pub mute: Option<bool>,

    #[serde(rename = "volumeStatus", default)]
    pub volume_status: VolumeStatus,
}

impl AudioStatusResponse {
    /// Volume from either the legacy or the nested field
    pub fn current_volume(&self) -> Option<i32> {
        self.volume.or(self.volume_status.volume)
    }

    /// Whether the change came from the remote rather than `setVolume`
    pub fn via_remote(&self) -> bool {
        match self.volume_status.cause.as_deref() {
            None | Some("") => false,
            Some(cause) => cause != "setVolume",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VolumeStatus {
    #[serde(default)]
    pub volume: Option<i32>,

    #[serde(default)]
    pub cause: Option<String>,

    #[serde(rename = "muteStatus", default)]
    pub mute_status: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MuteStatusResponse {
    #[serde(default)]
    pub mute: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemInfoResponse {
    #[serde(rename = "modelName", default)]
    pub model_name: String,

    #[serde(rename = "serialNumber", default)]
    pub serial_number: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OneShotResponse {
    #[serde(rename = "imageUri", default)]
    pub image_uri: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetVolumeRequest {
    pub volume: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetMuteRequest {
    pub mute: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenChannelRequest {
    #[serde(rename = "channelNumber")]
    pub channel_number: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateToastRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchAppRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchInputRequest {
    #[serde(rename = "inputId")]
    pub input_id: String,
}

/// Serialize a request record into an envelope payload
pub fn to_payload<T: Serialize>(request: &T) -> crate::Result<Value> {
    serde_json::to_value(request).map_err(|e| crate::Error::Serialize(e.to_string()))
}
