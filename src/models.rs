use native_db::{native_db, ToKey};
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use chrono::Utc;
use uuid::Uuid;

// ===== TRAITS =====

/// Records that synchronize with the server carry both a client-generated
/// local id (the idempotency key) and a server-assigned id once acked.
pub trait Syncable {
    fn id(&self) -> Option<i64>;
    fn set_id(&mut self, id: i64);
    fn id_local(&self) -> Option<String>;
    fn set_id_local(&mut self, id_local: String);
}

// ===== ENUMS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::Syncing => "SYNCING",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Failed => "FAILED",
        }
    }
}

impl From<&str> for SyncStatus {
    fn from(s: &str) -> Self {
        match s {
            "PENDING" => SyncStatus::Pending,
            "SYNCING" => SyncStatus::Syncing,
            "SYNCED" => SyncStatus::Synced,
            "FAILED" => SyncStatus::Failed,
            _ => SyncStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataKind {
    Boolean,
    Numeric,
    Text,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Boolean => "BOOLEAN",
            DataKind::Numeric => "NUMERIC",
            DataKind::Text => "TEXT",
        }
    }
}

impl From<&str> for DataKind {
    fn from(s: &str) -> Self {
        match s {
            "BOOLEAN" => DataKind::Boolean,
            "NUMERIC" => DataKind::Numeric,
            "TEXT" => DataKind::Text,
            _ => DataKind::Boolean,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Worker,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Worker => "WORKER",
        }
    }
}

impl From<&str> for UserRole {
    fn from(s: &str) -> Self {
        match s {
            "ADMIN" => UserRole::Admin,
            _ => UserRole::Worker,
        }
    }
}

// ===== CATALOG MODELS =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 1, version = 1)]
#[native_db]
pub struct FacilityLocal {
    #[primary_key]
    pub id: i64,
    pub name: String,
    pub location: Option<String>,
    pub type_code: String,
    pub inspection_count: i64,
    pub last_inspection_at: Option<String>,
}

impl FacilityLocal {
    pub fn new(
        id: i64,
        name: String,
        location: Option<String>,
        type_code: String,
        inspection_count: i64,
        last_inspection_at: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            location,
            type_code,
            inspection_count,
            last_inspection_at,
        }
    }

    /// Stand-in row for a facility only known by id, created while offline.
    pub fn placeholder(id: i64) -> Self {
        Self {
            id,
            name: format!("Facility {}", id),
            location: None,
            type_code: "UNKNOWN".to_string(),
            inspection_count: 0,
            last_inspection_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 2, version = 1)]
#[native_db]
pub struct ZoneLocal {
    #[primary_key]
    pub id: i64,
    #[secondary_key]
    pub facility_id: i64,
    pub name: String,
    pub voltage_kv: f64,
    pub type_code: String,
}

impl ZoneLocal {
    pub fn new(id: i64, facility_id: i64, name: String, voltage_kv: f64, type_code: String) -> Self {
        Self {
            id,
            facility_id,
            name,
            voltage_kv,
            type_code,
        }
    }

    pub fn placeholder(id: i64, facility_id: i64) -> Self {
        Self {
            id,
            facility_id,
            name: format!("Zone {}", id),
            voltage_kv: 0.0,
            type_code: "UNKNOWN".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 3, version = 1)]
#[native_db]
pub struct DeviceTypeLocal {
    #[primary_key]
    pub id: i64,
    #[secondary_key]
    pub code: String,
    pub name: String,
}

impl DeviceTypeLocal {
    pub fn new(id: i64, code: String, name: String) -> Self {
        Self { id, code, name }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 4, version = 1)]
#[native_db]
pub struct DeviceLocal {
    #[primary_key]
    pub id: i64,
    #[secondary_key]
    pub facility_id: i64,
    pub zone_id: Option<i64>,
    pub device_type_id: i64,
    pub nameplate: String,
    pub serial_no: String,
}

impl DeviceLocal {
    pub fn new(
        id: i64,
        facility_id: i64,
        zone_id: Option<i64>,
        device_type_id: i64,
        nameplate: String,
        serial_no: String,
    ) -> Self {
        Self {
            id,
            facility_id,
            zone_id,
            device_type_id,
            nameplate,
            serial_no,
        }
    }

    pub fn placeholder(id: i64, facility_id: i64, device_type_id: i64) -> Self {
        Self {
            id,
            facility_id,
            zone_id: None,
            device_type_id,
            nameplate: format!("Device {}", id),
            serial_no: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 5, version = 1)]
#[native_db]
pub struct CheckParameterLocal {
    #[primary_key]
    pub id: i64,
    #[secondary_key]
    pub device_type_id: i64,
    pub name: String,
    pub data_kind: DataKind,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub unit: Option<String>,
    pub required: bool,
    pub display_order: i32,
    pub default_bool: Option<bool>,
    pub default_num: Option<f64>,
    pub default_text: Option<String>,
    pub description: Option<String>,
    pub last_checked_at: Option<String>,
}

impl CheckParameterLocal {
    pub fn placeholder(id: i64, device_type_id: i64, data_kind: DataKind) -> Self {
        Self {
            id,
            device_type_id,
            name: Self::placeholder_name(id),
            data_kind,
            min_value: None,
            max_value: None,
            unit: None,
            required: false,
            display_order: 1,
            default_bool: None,
            default_num: None,
            default_text: None,
            description: None,
            last_checked_at: None,
        }
    }

    pub fn placeholder_name(id: i64) -> String {
        format!("Parameter {}", id)
    }

    /// Placeholders were never loaded from the server; their generic name
    /// is the marker.
    pub fn is_placeholder(&self) -> bool {
        self.name == Self::placeholder_name(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 6, version = 1)]
#[native_db]
pub struct UserLocal {
    #[primary_key]
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub role: UserRole,
}

impl UserLocal {
    pub fn new(id: i64, first_name: String, last_name: String, username: String, role: UserRole) -> Self {
        Self {
            id,
            first_name,
            last_name,
            username,
            role,
        }
    }

    /// Attribution row used when no authenticated user is known locally.
    pub fn default_worker(id: i64) -> Self {
        Self {
            id,
            first_name: "Default".to_string(),
            last_name: "User".to_string(),
            username: "default".to_string(),
            role: UserRole::Worker,
        }
    }
}

// ===== INSPECTION MODELS =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 7, version = 1)]
#[native_db]
pub struct InspectionLocal {
    #[primary_key]
    pub local_id: String,
    pub server_id: Option<i64>,
    #[secondary_key]
    pub facility_id: i64,
    pub user_id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub note: Option<String>,
    pub status: SyncStatus,
    pub sync_error: Option<String>,
}

impl InspectionLocal {
    pub fn new(facility_id: i64, user_id: i64, note: Option<String>) -> Self {
        Self {
            local_id: Uuid::new_v4().to_string(),
            server_id: None,
            facility_id,
            user_id,
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            note,
            status: SyncStatus::Pending,
            sync_error: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }
}

impl Syncable for InspectionLocal {
    fn id(&self) -> Option<i64> {
        self.server_id
    }

    fn set_id(&mut self, id: i64) {
        self.server_id = Some(id);
    }

    fn id_local(&self) -> Option<String> {
        Some(self.local_id.clone())
    }

    fn set_id_local(&mut self, id_local: String) {
        self.local_id = id_local;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 8, version = 1)]
#[native_db]
pub struct InspectionItemLocal {
    #[primary_key]
    pub local_id: String,
    pub server_id: Option<i64>,
    #[secondary_key]
    pub inspection_id: String,
    pub device_id: i64,
    pub parameter_id: i64,
    pub value_bool: Option<bool>,
    pub value_num: Option<f64>,
    pub value_text: Option<String>,
    pub note: Option<String>,
    pub recorded_at: String,
}

impl InspectionItemLocal {
    pub fn new(
        inspection_id: String,
        device_id: i64,
        parameter_id: i64,
        value_bool: Option<bool>,
        value_num: Option<f64>,
        value_text: Option<String>,
        note: Option<String>,
    ) -> Self {
        Self {
            local_id: Uuid::new_v4().to_string(),
            server_id: None,
            inspection_id,
            device_id,
            parameter_id,
            value_bool,
            value_num,
            value_text,
            note,
            recorded_at: Utc::now().to_rfc3339(),
        }
    }

    /// Which value slot is populated decides the kind when the parameter
    /// itself is unknown (offline placeholder synthesis).
    pub fn inferred_kind(&self) -> DataKind {
        if self.value_bool.is_some() {
            DataKind::Boolean
        } else if self.value_num.is_some() {
            DataKind::Numeric
        } else if self.value_text.is_some() {
            DataKind::Text
        } else {
            DataKind::Boolean
        }
    }
}

impl Syncable for InspectionItemLocal {
    fn id(&self) -> Option<i64> {
        self.server_id
    }

    fn set_id(&mut self, id: i64) {
        self.server_id = Some(id);
    }

    fn id_local(&self) -> Option<String> {
        Some(self.local_id.clone())
    }

    fn set_id_local(&mut self, id_local: String) {
        self.local_id = id_local;
    }
}
