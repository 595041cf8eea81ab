//! Global application settings management
//!
//! Settings are stored as one JSON value per name. Each group of related
//! options has a typed representation with defaults, so a group that has
//! never been saved reads back as its default.

// Actix handlers have lots of needless pass-by-value (Data, Json, and Path structs)
#![allow(clippy::needless_pass_by_value)]

use actix_web::web::{self, Data, Json, ServiceConfig};
use chrono::NaiveTime;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{info, trace};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::auth::{Admin, Authenticated};
use crate::db::{ConnectionPool, DatabaseContext};
use crate::db::schema::settings;
use crate::error::{Error, Result};


/// Key used to store notification settings
pub const NOTIFICATIONS_SETTING: &str = "notifications";

/// Key used to store retention settings
pub const RETENTION_SETTING: &str = "retention";

/// Largest accepted notification cooldown
const MAX_COOLDOWN_SECS: u32 = 24 * 60 * 60;


/// Serialized form of a setting
#[derive(Identifiable, Insertable, Queryable)]
#[diesel(table_name = settings)]
#[diesel(primary_key(name))]
struct Setting {
    name: String,
    value: String,
}


/// Retrieves the specified setting from the database
///
/// If the setting has never been stored in the database before, `None` is
/// returned. If the stored data cannot be deserialized as `T`, an error is
/// propagated from `serde_json`.
pub fn get<T: DeserializeOwned>(conn: &mut SqliteConnection, name: &str) -> Result<Option<T>> {

    trace!("retrieving setting \"{}\" from database", name);
    let setting: Option<Setting> = settings::table.find(name)
        .first(conn)
        .optional()?;

    match setting {
        Some(setting) => Ok(Some(serde_json::from_str(&setting.value)?)),
        None => {
            trace!("could not find setting \"{}\"", name);
            Ok(None)
        },
    }
}


/// Stores the given setting to the database
pub fn set<T: Serialize>(conn: &mut SqliteConnection, name: &str, value: &T) -> Result<()> {

    let setting = Setting {
        name: name.into(),
        value: serde_json::to_string(value)?,
    };

    trace!("storing setting \"{}\" to database", name);
    diesel::replace_into(settings::table)
        .values(&setting)
        .execute(conn)?;

    Ok(())
}


/// Window during which notifications are suppressed
///
/// Times are local wall-clock times formatted as `HH:MM`. The window may
/// wrap past midnight. Equal start and end times describe an empty window.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuietHours {
    pub enabled: bool,
    pub start: String,
    pub end: String,
}

impl Default for QuietHours {
    fn default() -> Self {
        QuietHours {
            enabled: false,
            start: String::from("22:00"),
            end: String::from("07:00"),
        }
    }
}

impl QuietHours {

    /// Parses the window boundaries
    pub fn bounds(&self) -> Result<(NaiveTime, NaiveTime)> {

        let parse = |s: &str| NaiveTime::parse_from_str(s, "%H:%M")
            .map_err(|_| Error::bad_request(format!("invalid time \"{}\", expected HH:MM", s)));

        Ok((parse(&self.start)?, parse(&self.end)?))
    }

    /// Returns whether `time` falls inside the window
    ///
    /// Disabled or unparseable windows contain nothing.
    pub fn contains(&self, time: NaiveTime) -> bool {

        if !self.enabled {
            return false;
        }

        match self.bounds() {
            Ok((start, end)) if start < end => start <= time && time < end,
            Ok((start, end)) if start > end => time >= start || time < end,
            _ => false,
        }
    }
}


/// Controls when motion events produce push notifications
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {

    /// Global switch for all notifications
    pub enabled: bool,

    pub quiet_hours: QuietHours,

    /// Minimum seconds between two notifications for the same camera
    pub cooldown_secs: u32,

    /// Object labels that notify (empty means every label)
    pub labels: Vec<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        NotificationSettings {
            enabled: true,
            quiet_hours: QuietHours::default(),
            cooldown_secs: 300,
            labels: Vec::new(),
        }
    }
}

impl NotificationSettings {

    fn validate(&self) -> Result<()> {
        self.quiet_hours.bounds()?;
        if self.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(Error::bad_request("cooldownSecs must be at most 86400"));
        }
        Ok(())
    }
}


/// Controls how long motion events are kept
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionSettings {

    /// Days to keep events (0 keeps them forever)
    pub days: u32,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        RetentionSettings { days: 30 }
    }
}


/// All settings groups, as exposed by the API
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub notifications: NotificationSettings,
    pub retention: RetentionSettings,
}


pub fn notifications(conn: &mut SqliteConnection) -> Result<NotificationSettings> {
    Ok(get(conn, NOTIFICATIONS_SETTING)?.unwrap_or_default())
}


pub fn retention(conn: &mut SqliteConnection) -> Result<RetentionSettings> {
    Ok(get(conn, RETENTION_SETTING)?.unwrap_or_default())
}


/// Reads every settings group
pub fn load(conn: &mut SqliteConnection) -> Result<Settings> {
    Ok(Settings {
        notifications: notifications(conn)?,
        retention: retention(conn)?,
    })
}


/// Body of a settings update; each supplied group replaces the stored one
#[derive(Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSettingsBody {
    pub notifications: Option<NotificationSettings>,
    pub retention: Option<RetentionSettings>,
}


/// Retrieves all settings
async fn get_settings(
    pool: Data<ConnectionPool>,
    _auth: Authenticated,
) -> Result<Json<Settings>>
{
    let mut conn = pool.conn()?;
    Ok(Json(load(&mut conn)?))
}


/// Updates settings groups
async fn patch_settings(
    pool: Data<ConnectionPool>,
    admin: Admin,
    body: Json<PatchSettingsBody>,
) -> Result<Json<Settings>>
{
    let body = body.into_inner();

    // Validate everything before storing anything
    if let Some(notifications) = &body.notifications {
        notifications.validate()?;
    }

    let mut conn = pool.conn()?;

    if let Some(notifications) = &body.notifications {
        set(&mut conn, NOTIFICATIONS_SETTING, notifications)?;
    }
    if let Some(retention) = &body.retention {
        set(&mut conn, RETENTION_SETTING, retention)?;
    }

    info!("settings updated by user {}", admin.user.id);
    Ok(Json(load(&mut conn)?))
}


/// Configures the */settings* API resource
pub fn configure_api(service: &mut ServiceConfig) {

    service.service(
        web::resource("/settings")
            .route(web::get().to(get_settings))
            .route(web::patch().to(patch_settings))
    );
}
