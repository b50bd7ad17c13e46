use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Microphone,
    Camera,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Microphone => "microphone",
            Device::Camera => "camera",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    #[default]
    NotRun,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckState {
    pub status: CheckStatus,
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceChecks {
    pub microphone: CheckState,
    pub camera: CheckState,
}

impl DeviceChecks {
    pub fn get(&self, device: Device) -> CheckState {
        match device {
            Device::Microphone => self.microphone,
            Device::Camera => self.camera,
        }
    }

    pub fn set(&mut self, device: Device, state: CheckState) {
        match device {
            Device::Microphone => self.microphone = state,
            Device::Camera => self.camera = state,
        }
    }

    pub fn passed(&self, device: Device) -> bool {
        self.get(device).status == CheckStatus::Success
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: i64,
    pub attempt_id: i64,
    #[serde(skip_serializing)]
    pub token: String,
    /// Furthest question position reached in this attempt.
    pub current_round: i32,
    pub device_checks: Json<DeviceChecks>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}
