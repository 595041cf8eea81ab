//! Types used by the porchwatch web API
//!
//! Resources are serialized with camelCase field names, which is what the
//! PWA front-end consumes. Request bodies use `Option` fields wherever a
//! value may be omitted.


use derive_more::Display;
use serde::{Deserialize, Serialize};


//#region Users

/// Defines a user's access level
///
/// Access levels are sequential, and a higher level of access implies all
/// lower levels.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, PartialOrd, Ord)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    // Declaration order is the privilege order used by PartialOrd
    #[display(fmt = "user")]
    User,
    #[display(fmt = "admin")]
    Admin,
}

impl Role {

    /// Parses the stored representation of a role
    ///
    /// Anything unrecognized is treated as the lowest level of access.
    pub fn parse(s: &str) -> Role {
        match s {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}


#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserResource {
    pub id: i32,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub created_at: i64,
}


/// Body of a user creation request
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserBody {
    pub username: String,
    pub display_name: Option<String>,
    pub pin: String,
    pub role: Option<Role>,
}


/// Body of a user update request
#[derive(Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchUserBody {
    pub display_name: Option<String>,
    pub pin: Option<String>,
    pub role: Option<Role>,
}


#[derive(Deserialize, Serialize)]
pub struct LoginBody {
    pub username: String,
    pub pin: String,
}


/// Result of a successful login
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResource {
    pub token: String,
    pub expires_at: i64,
    pub user: UserResource,
}

//#endregion


//#region Cameras

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CameraResource {
    pub id: i32,
    pub name: String,
    pub frigate_name: String,
    pub device_id: String,
    pub stream_url: Option<String>,
    pub enabled: bool,
    pub notify: bool,
    pub last_seen: Option<i64>,
    pub online: bool,
}


/// Body of a camera creation request
#[derive(Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCameraBody {
    pub name: String,
    pub frigate_name: String,
    pub device_id: Option<String>,
    pub stream_url: Option<String>,
    pub enabled: Option<bool>,
    pub notify: Option<bool>,
}


/// Body of a camera update request
#[derive(Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchCameraBody {
    pub name: Option<String>,
    pub frigate_name: Option<String>,
    pub device_id: Option<String>,
    pub stream_url: Option<String>,
    pub enabled: Option<bool>,
    pub notify: Option<bool>,
}


/// Command forwarded to a camera over MQTT
#[derive(Deserialize, Serialize)]
pub struct CommandBody {
    pub command: String,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
}

//#endregion


//#region Events

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventResource {
    pub id: i32,
    pub frigate_id: String,
    pub camera_id: i32,
    pub label: String,
    pub score: f64,
    pub zones: Vec<String>,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub has_snapshot: bool,
    pub has_clip: bool,
    pub thumbnail_url: Option<String>,
    pub clip_url: Option<String>,
    pub acknowledged: bool,
}


/// One page of events plus the number of events matching the filter
#[derive(Debug, Deserialize, Serialize)]
pub struct EventList {
    pub events: Vec<EventResource>,
    pub total: i64,
}


/// Filters accepted by the event listing
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    pub camera_id: Option<i32>,
    pub label: Option<String>,
    pub acknowledged: Option<bool>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}


#[derive(Deserialize, Serialize)]
pub struct PatchEventBody {
    pub acknowledged: Option<bool>,
}


/// Body of a bulk acknowledgement request
#[derive(Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeBody {
    pub camera_id: Option<i32>,
}


#[derive(Debug, Deserialize, Serialize)]
pub struct AcknowledgeResult {
    pub acknowledged: usize,
}

//#endregion
