use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::FromRow;

use super::session::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "proctoring_event_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProctoringEventKind {
    MicrophoneCheckFailed,
    CameraCheckFailed,
    TabSwitch,
    WindowBlur,
    FullscreenExit,
}

impl ProctoringEventKind {
    pub fn device_check_failed(device: Device) -> Self {
        match device {
            Device::Microphone => ProctoringEventKind::MicrophoneCheckFailed,
            Device::Camera => ProctoringEventKind::CameraCheckFailed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProctoringEvent {
    pub id: i64,
    pub attempt_id: i64,
    pub session_id: i64,
    pub kind: ProctoringEventKind,
    pub details: Option<Json<JsonValue>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProctoringEvent {
    pub attempt_id: i64,
    pub session_id: i64,
    pub kind: ProctoringEventKind,
    pub details: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}
