//! Frigate event webhook
//!
//! Frigate reports each tracked object three ways over its lifetime: `new`
//! when detection starts, any number of `update`s, and `end`. Every message
//! carries the full current state of the object in `after`, so each one is
//! stored with a create-or-update on the Frigate event id. See
//! `events::record` for the merge rules.

// Actix handlers have lots of needless pass-by-value (Data, Json, and Path structs)
#![allow(clippy::needless_pass_by_value)]

use actix_web::{HttpRequest, HttpResponse};
use actix_web::http::StatusCode;
use actix_web::web::{self, Bytes, Data, ServiceConfig};
use chrono::Local;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::allow_err;
use crate::api::EventResource;
use crate::cameras;
use crate::config::Config;
use crate::db::{self, ConnectionPool, DatabaseContext};
use crate::error::{Error, Result};
use crate::events::{self, EventReport};
use crate::media::{MediaFetcher, MediaKind, MediaStore};
use crate::notify::{Decision, Notifier};
use crate::settings;


/// Header carrying the shared webhook secret
const SECRET_HEADER: &str = "X-Webhook-Secret";


/// Lifecycle stage of a Frigate event message
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrigateEventType {
    New,
    Update,
    End,
}


/// State of a tracked object as reported by Frigate
///
/// Only the fields porchwatch uses are modeled; everything else in the
/// payload is ignored. Frigate sends `null` for many fields early in an
/// object's life, hence the liberal use of `Option`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FrigateEvent {
    pub id: String,
    pub camera: String,
    pub label: String,
    #[serde(default)]
    pub top_score: Option<f64>,
    #[serde(default)]
    pub score: Option<f64>,
    pub start_time: f64,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub has_snapshot: Option<bool>,
    #[serde(default)]
    pub has_clip: Option<bool>,
    #[serde(default)]
    pub current_zones: Option<Vec<String>>,
    #[serde(default)]
    pub entered_zones: Option<Vec<String>>,
    #[serde(default)]
    pub false_positive: Option<bool>,
}

impl FrigateEvent {

    /// Converts the reported state into storage units
    pub fn report(&self) -> EventReport {

        let mut zones: Vec<String> = Vec::new();
        let reported = self.entered_zones.iter()
            .chain(self.current_zones.iter())
            .flatten();
        for zone in reported {
            if !zones.contains(zone) {
                zones.push(zone.clone());
            }
        }

        EventReport {
            frigate_id: self.id.clone(),
            label: self.label.clone(),
            score: self.top_score.or(self.score).unwrap_or(0.0),
            zones,
            started_at: self.start_time.floor() as i64,
            ended_at: self.end_time.map(|t| t.floor() as i64),
            has_snapshot: self.has_snapshot.unwrap_or(false),
            has_clip: self.has_clip.unwrap_or(false),
        }
    }
}


/// Body of a Frigate event webhook
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FrigateMessage {
    #[serde(rename = "type")]
    pub kind: FrigateEventType,
    #[serde(default)]
    pub before: Option<FrigateEvent>,
    pub after: FrigateEvent,
}


/// Response to a webhook delivery
#[derive(Debug, Deserialize, Serialize)]
pub struct WebhookResult {

    /// One of `created`, `updated` or `ignored`
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EventResource>,
}

impl WebhookResult {

    fn ignored() -> HttpResponse {
        HttpResponse::Accepted().json(WebhookResult {
            status: String::from("ignored"),
            event: None,
        })
    }
}


/// Media worth downloading after a message has been stored
///
/// A thumbnail exists as soon as Frigate announces the object. The final
/// snapshot and the clip only exist once the event has ended.
pub fn media_to_fetch(kind: FrigateEventType, report: &EventReport, created: bool) -> Vec<MediaKind> {

    match kind {
        FrigateEventType::New => vec![MediaKind::Thumbnail],
        FrigateEventType::Update if created => vec![MediaKind::Thumbnail],
        FrigateEventType::Update => Vec::new(),
        FrigateEventType::End => {
            let mut kinds = vec![
                if report.has_snapshot { MediaKind::Snapshot } else { MediaKind::Thumbnail },
            ];
            if report.has_clip {
                kinds.push(MediaKind::Clip);
            }
            kinds
        },
    }
}


/// Compares a presented secret without leaking where it differs
fn secret_matches(presented: &[u8], expected: &str) -> bool {
    presented.ct_eq(expected.as_bytes()).into()
}


/// Verifies the shared secret, if one is configured
fn check_secret(req: &HttpRequest, config: &Config) -> Result<()> {

    let Some(expected) = &config.webhook_secret else {
        return Ok(());
    };

    let presented = req.headers()
        .get(SECRET_HEADER)
        .map(|value| value.as_bytes());

    if presented.map_or(false, |presented| secret_matches(presented, expected)) {
        Ok(())
    } else {
        warn!("rejecting webhook with missing or wrong secret");
        Err((StatusCode::UNAUTHORIZED, "invalid webhook secret").into())
    }
}


/// Downloads one media file and records it on the event
async fn store_media(
    pool: &ConnectionPool,
    media: &MediaStore,
    fetcher: &MediaFetcher,
    event_id: i32,
    frigate_id: &str,
    kind: MediaKind,
) -> Result<()>
{
    let data = fetcher.fetch(frigate_id, kind).await?;
    let name = kind.file_name(event_id);
    media.write(&name, &data).await?;

    let mut conn = pool.conn()?;
    events::set_media_path(&mut conn, event_id, kind, &name)
}


/// Handles *POST /webhooks/frigate*
///
/// The body is parsed only after the secret has been checked.
async fn post_frigate(
    req: HttpRequest,
    pool: Data<ConnectionPool>,
    config: Data<Config>,
    notifier: Data<Notifier>,
    fetcher: Data<MediaFetcher>,
    media: Data<MediaStore>,
    body: Bytes,
) -> Result<HttpResponse>
{
    check_secret(&req, &config)?;

    let message: FrigateMessage = serde_json::from_slice(&body)
        .map_err(|err| Error::bad_request(format!("invalid Frigate payload: {}", err)))?;
    let after = &message.after;
    debug!("received {:?} for frigate event {} on {}", message.kind, after.id, after.camera);

    if after.false_positive.unwrap_or(false) {
        debug!("ignoring false positive {}", after.id);
        return Ok(WebhookResult::ignored());
    }

    let mut conn = pool.conn()?;

    let camera = match cameras::find_by_frigate_name(&mut conn, &after.camera)? {
        Some(camera) if camera.enabled => camera,
        Some(camera) => {
            debug!("ignoring event from disabled camera {}", camera.id);
            return Ok(WebhookResult::ignored());
        },
        None => {
            warn!("ignoring event from unknown camera \"{}\"", after.camera);
            return Ok(WebhookResult::ignored());
        },
    };

    let report = after.report();
    let (event, created) = events::record(&mut conn, camera.id, &report, db::now())?;

    if created {
        info!("recorded new {} event {} on camera {}", event.label, event.id, camera.id);

        if notifier.enabled() {
            let prefs = settings::notifications(&mut conn)?;
            match notifier.evaluate(&prefs, &camera, &event.label, Local::now()) {
                Decision::Send => {
                    let notification = notifier.motion_notification(&camera, &event);
                    let notifier = notifier.clone();
                    let event_id = event.id;
                    actix_web::rt::spawn(async move {
                        allow_err!(
                            notifier.send(&notification).await,
                            "failed to deliver notification for event {}", event_id
                        );
                    });
                },
                decision => debug!("not notifying for event {}: {:?}", event.id, decision),
            }
        }
    }

    drop(conn);

    let kinds = media_to_fetch(message.kind, &report, created);
    if fetcher.enabled() && !kinds.is_empty() {
        let (pool, media, fetcher) = (pool.clone(), media.clone(), fetcher.clone());
        let (event_id, frigate_id) = (event.id, event.frigate_id.clone());
        actix_web::rt::spawn(async move {
            for kind in kinds {
                allow_err!(
                    store_media(&pool, &media, &fetcher, event_id, &frigate_id, kind).await,
                    "failed to fetch {:?} for event {}", kind, event_id
                );
            }
        });
    }

    let status = if created { "created" } else { "updated" };
    Ok(HttpResponse::Ok().json(WebhookResult {
        status: String::from(status),
        event: Some(event.into()),
    }))
}


/// Configures the */webhooks* API resource
pub fn configure_api(service: &mut ServiceConfig) {
    service.route("/webhooks/frigate", web::post().to(post_frigate));
}
