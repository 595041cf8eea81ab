//! Push notifications for motion events
//!
//! Whether a motion event notifies is decided by `decide`, a pure function of
//! the notification settings, the camera, the event label and the clock.
//! `Notifier` wraps it with the per-camera cooldown clock and delivers
//! messages through ntfy's JSON publishing API.

// Actix handlers have lots of needless pass-by-value (Data, Json, and Path structs)
#![allow(clippy::needless_pass_by_value)]

use std::collections::HashMap;
use std::sync::Mutex;

use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use actix_web::web::{self, Data, ServiceConfig};
use chrono::{DateTime, Local, NaiveTime};
use log::{debug, info, trace};
use reqwest::Client;
use serde::Serialize;

use crate::auth::Admin;
use crate::cameras::Camera;
use crate::config::{Config, NtfyConfig};
use crate::do_lock;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::settings::NotificationSettings;


/// Outcome of the notification decision
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    Send,
    GloballyDisabled,
    CameraMuted,
    LabelFiltered,
    QuietHours,
    Cooldown,
}


/// Facts about a motion event relevant to the notification decision
#[derive(Debug)]
pub struct Candidate<'a> {

    /// Whether the camera has notifications turned on
    pub camera_notify: bool,

    pub label: &'a str,

    /// Local wall-clock time, compared against quiet hours
    pub local_time: NaiveTime,

    /// Current Unix time
    pub now: i64,

    /// Unix time of the last notification sent for the same camera
    pub last_sent: Option<i64>,
}


/// Decides whether a motion event should notify
///
/// Rules apply in order: global switch, camera switch, label filter, quiet
/// hours, cooldown. The first rule that suppresses the notification wins.
pub fn decide(prefs: &NotificationSettings, candidate: &Candidate) -> Decision {

    if !prefs.enabled {
        return Decision::GloballyDisabled;
    }

    if !candidate.camera_notify {
        return Decision::CameraMuted;
    }

    if !prefs.labels.is_empty()
        && !prefs.labels.iter().any(|l| l.eq_ignore_ascii_case(candidate.label))
    {
        return Decision::LabelFiltered;
    }

    if prefs.quiet_hours.contains(candidate.local_time) {
        return Decision::QuietHours;
    }

    if let Some(last_sent) = candidate.last_sent {
        if candidate.now - last_sent < i64::from(prefs.cooldown_secs) {
            return Decision::Cooldown;
        }
    }

    Decision::Send
}


/// A message ready for delivery
#[derive(Debug, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub tags: Vec<String>,

    /// ntfy priority, 1 (min) to 5 (max)
    pub priority: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub click: Option<String>,
}


/// Body of an ntfy JSON publish request
#[derive(Serialize)]
struct NtfyMessage<'a> {
    topic: &'a str,
    #[serde(flatten)]
    notification: &'a Notification,
}


/// Delivers notifications and remembers when each camera last notified
#[derive(Debug)]
pub struct Notifier {
    client: Client,
    ntfy: Option<NtfyConfig>,
    public_url: Option<String>,
    last_sent: Mutex<HashMap<i32, i64>>,
}

impl Notifier {

    pub fn new(client: Client, config: &Config) -> Self {
        Notifier {
            client,
            ntfy: config.ntfy.clone(),
            public_url: config.public_url.clone(),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a delivery target is configured
    pub fn enabled(&self) -> bool {
        self.ntfy.is_some()
    }

    /// Runs the notification decision for a camera at the given time
    ///
    /// A `Send` decision starts the camera's cooldown immediately, so
    /// concurrent events for the same camera cannot both notify.
    pub fn evaluate(
        &self,
        prefs: &NotificationSettings,
        camera: &Camera,
        label: &str,
        now: DateTime<Local>,
    ) -> Decision
    {
        let mut last_sent = do_lock!(self.last_sent);

        let candidate = Candidate {
            camera_notify: camera.notify,
            label,
            local_time: now.time(),
            now: now.timestamp(),
            last_sent: last_sent.get(&camera.id).copied(),
        };

        let decision = decide(prefs, &candidate);
        trace!("notification decision for camera {}: {:?}", camera.id, decision);

        if decision == Decision::Send {
            last_sent.insert(camera.id, candidate.now);
        }

        decision
    }

    /// Builds the notification for a motion event
    pub fn motion_notification(&self, camera: &Camera, event: &Event) -> Notification {

        let label = capitalize(&event.label);
        let percent = (event.score * 100.0).round();

        Notification {
            title: format!("{} at {}", label, camera.name),
            message: format!("{} detected by {} ({}% confidence)", label, camera.name, percent),
            tags: vec![String::from("rotating_light"), event.label.clone()],
            priority: if event.label == "person" { 4 } else { 3 },
            click: self.public_url.as_ref()
                .map(|url| format!("{}/events/{}", url, event.id)),
        }
    }

    /// Delivers a notification through ntfy
    pub async fn send(&self, notification: &Notification) -> Result<()> {

        let ntfy = self.ntfy.as_ref()
            .ok_or((StatusCode::SERVICE_UNAVAILABLE, "notifications are not configured"))?;

        let body = NtfyMessage {
            topic: &ntfy.topic,
            notification,
        };

        debug!("publishing notification \"{}\"", notification.title);
        let mut request = self.client.post(&ntfy.server)
            .json(&body);
        if let Some(token) = &ntfy.token {
            request = request.bearer_auth(token);
        }

        request.send().await?
            .error_for_status()?;

        Ok(())
    }
}


fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}


/// Sends a test notification, bypassing every rule
async fn post_test(
    notifier: Data<Notifier>,
    admin: Admin,
) -> Result<HttpResponse>
{
    if !notifier.enabled() {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "notifications are not configured").into());
    }

    let notification = Notification {
        title: String::from("porchwatch test"),
        message: format!("Test notification requested by {}", admin.user.display_name),
        tags: vec![String::from("white_check_mark")],
        priority: 3,
        click: None,
    };

    notifier.send(&notification)
        .await
        .map_err(Error::with_status(StatusCode::BAD_GATEWAY))?;

    info!("test notification sent");
    Ok(HttpResponse::NoContent().finish())
}


/// Configures the */notifications* API resource
pub fn configure_api(service: &mut ServiceConfig) {
    service.route("/notifications/test", web::post().to(post_test));
}
