//! Motion event storage and API

// Actix handlers have lots of needless pass-by-value (Data, Json, and Path structs)
#![allow(clippy::needless_pass_by_value)]

use actix_files::NamedFile;
use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use actix_web::web::{self, Data, Json, Path, Query, ServiceConfig};
use diesel::prelude::*;
use diesel::sqlite::{Sqlite, SqliteConnection};
use log::{debug, info, trace};

use crate::api::{AcknowledgeBody, AcknowledgeResult, EventList, EventQuery, EventResource, PatchEventBody};
use crate::auth::{Admin, Authenticated};
use crate::db::{ConnectionPool, DatabaseContext};
use crate::db::schema::events;
use crate::error::{Error, Result};
use crate::media::{MediaKind, MediaStore};


/// Default page size of the event listing
const DEFAULT_LIMIT: i64 = 50;

/// Largest page size of the event listing
const MAX_LIMIT: i64 = 500;


/// Representation of a motion event
#[derive(AsChangeset, Clone, Debug, Identifiable, Queryable)]
#[diesel(table_name = events)]
#[diesel(treat_none_as_null = true)]
pub struct Event {
    pub id: i32,
    pub frigate_id: String,
    pub camera_id: i32,
    pub label: String,
    pub score: f64,

    /// JSON array of zone names
    pub zones: String,

    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub has_snapshot: bool,
    pub has_clip: bool,
    pub thumbnail_path: Option<String>,
    pub clip_path: Option<String>,
    pub acknowledged: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Event> for EventResource {
    fn from(event: Event) -> Self {

        // Media links carry no token; clients append ?access_token= themselves
        let thumbnail_url = event.thumbnail_path.as_ref()
            .map(|_| format!("/api/events/{}/thumbnail", event.id));
        let clip_url = event.clip_path.as_ref()
            .map(|_| format!("/api/events/{}/clip", event.id));

        EventResource {
            id: event.id,
            frigate_id: event.frigate_id,
            camera_id: event.camera_id,
            label: event.label,
            score: event.score,
            zones: serde_json::from_str(&event.zones).unwrap_or_default(),
            started_at: event.started_at,
            ended_at: event.ended_at,
            has_snapshot: event.has_snapshot,
            has_clip: event.has_clip,
            thumbnail_url,
            clip_url,
            acknowledged: event.acknowledged,
        }
    }
}


/// A detection as reported by the NVR, in storage units
#[derive(Clone, Debug, PartialEq)]
pub struct EventReport {
    pub frigate_id: String,
    pub label: String,
    pub score: f64,
    pub zones: Vec<String>,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub has_snapshot: bool,
    pub has_clip: bool,
}


#[derive(Insertable)]
#[diesel(table_name = events)]
struct NewEvent<'a> {
    frigate_id: &'a str,
    camera_id: i32,
    label: &'a str,
    score: f64,
    zones: &'a str,
    started_at: i64,
    ended_at: Option<i64>,
    has_snapshot: bool,
    has_clip: bool,
    acknowledged: bool,
    created_at: i64,
    updated_at: i64,
}


/// Creates or updates the event described by `report`
///
/// The Frigate id is the key. A report for an unknown id creates the row no
/// matter which lifecycle stage it belongs to, so late or out-of-order
/// deliveries are not lost. For an existing row the newest report wins,
/// except that the score only ever increases and an end time is never
/// cleared once known.
///
/// Returns the stored event and whether it was created.
pub fn record(
    conn: &mut SqliteConnection,
    camera_id: i32,
    report: &EventReport,
    now: i64,
) -> Result<(Event, bool)>
{
    let zones = serde_json::to_string(&report.zones)?;

    conn.immediate_transaction(|conn| {

        let existing: Option<Event> = events::table
            .filter(events::frigate_id.eq(&report.frigate_id))
            .first(conn)
            .optional()?;

        let created = match existing {

            Some(mut event) => {
                trace!("updating event {}", event.id);
                event.camera_id = camera_id;
                event.label = report.label.clone();
                event.score = event.score.max(report.score);
                event.zones = zones.clone();
                event.started_at = report.started_at;
                if report.ended_at.is_some() {
                    event.ended_at = report.ended_at;
                }
                event.has_snapshot = report.has_snapshot;
                event.has_clip = report.has_clip;
                event.updated_at = now;

                diesel::update(&event)
                    .set(&event)
                    .execute(conn)?;
                false
            },

            None => {
                trace!("inserting event {}", report.frigate_id);
                let new_event = NewEvent {
                    frigate_id: &report.frigate_id,
                    camera_id,
                    label: &report.label,
                    score: report.score,
                    zones: &zones,
                    started_at: report.started_at,
                    ended_at: report.ended_at,
                    has_snapshot: report.has_snapshot,
                    has_clip: report.has_clip,
                    acknowledged: false,
                    created_at: now,
                    updated_at: now,
                };
                diesel::insert_into(events::table)
                    .values(&new_event)
                    .execute(conn)?;
                true
            },
        };

        let event = events::table
            .filter(events::frigate_id.eq(&report.frigate_id))
            .first(conn)?;

        Ok((event, created))
    })
}


/// Retrieves the specified event
pub fn get(conn: &mut SqliteConnection, id: i32) -> Result<Event> {
    Ok(events::table.find(id).first(conn)?)
}


/// Builds the filtered (but unpaged) event query
fn filtered<'a>(query: &'a EventQuery) -> events::BoxedQuery<'a, Sqlite> {

    let mut q = events::table.into_boxed();

    if let Some(camera_id) = query.camera_id {
        q = q.filter(events::camera_id.eq(camera_id));
    }
    if let Some(label) = &query.label {
        q = q.filter(events::label.eq(label));
    }
    if let Some(acknowledged) = query.acknowledged {
        q = q.filter(events::acknowledged.eq(acknowledged));
    }
    if let Some(since) = query.since {
        q = q.filter(events::started_at.ge(since));
    }
    if let Some(until) = query.until {
        q = q.filter(events::started_at.lt(until));
    }

    q
}


/// Retrieves one page of events matching `query`, newest first
pub fn list(conn: &mut SqliteConnection, query: &EventQuery) -> Result<(Vec<Event>, i64)> {

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(Error::bad_request(format!("limit must be between 1 and {}", MAX_LIMIT)));
    }
    let offset = query.offset.unwrap_or(0);
    if offset < 0 {
        return Err(Error::bad_request("offset must not be negative"));
    }

    let total = filtered(query)
        .count()
        .get_result(conn)?;

    let events = filtered(query)
        .order((events::started_at.desc(), events::id.desc()))
        .limit(limit)
        .offset(offset)
        .load(conn)?;

    Ok((events, total))
}


/// Sets the acknowledged flag of every unacknowledged event, optionally
/// limited to one camera
pub fn acknowledge_all(conn: &mut SqliteConnection, camera_id: Option<i32>) -> Result<usize> {

    let outstanding = events::table.filter(events::acknowledged.eq(false));

    let updated = match camera_id {
        Some(camera_id) => diesel::update(outstanding.filter(events::camera_id.eq(camera_id)))
            .set(events::acknowledged.eq(true))
            .execute(conn)?,
        None => diesel::update(outstanding)
            .set(events::acknowledged.eq(true))
            .execute(conn)?,
    };

    Ok(updated)
}


/// Records the stored location of a downloaded media file
pub fn set_media_path(conn: &mut SqliteConnection, id: i32, kind: MediaKind, path: &str) -> Result<()> {

    let target = events::table.find(id);
    match kind {
        MediaKind::Thumbnail | MediaKind::Snapshot => diesel::update(target)
            .set(events::thumbnail_path.eq(path))
            .execute(conn)?,
        MediaKind::Clip => diesel::update(target)
            .set(events::clip_path.eq(path))
            .execute(conn)?,
    };

    Ok(())
}


/// Events that started before `cutoff`, for retention sweeps
pub fn started_before(conn: &mut SqliteConnection, cutoff: i64) -> Result<Vec<Event>> {
    Ok(events::table.filter(events::started_at.lt(cutoff)).load(conn)?)
}


/// Deletes the given event rows and their media files
pub async fn delete(pool: &ConnectionPool, media: &MediaStore, doomed: Vec<Event>) -> Result<usize> {

    if doomed.is_empty() {
        return Ok(0);
    }

    let ids: Vec<i32> = doomed.iter().map(|e| e.id).collect();
    let deleted = {
        let mut conn = pool.conn()?;
        diesel::delete(events::table.filter(events::id.eq_any(&ids)))
            .execute(&mut conn)?
    };

    for event in &doomed {
        media.remove(event.thumbnail_path.as_deref()).await;
        media.remove(event.clip_path.as_deref()).await;
    }

    Ok(deleted)
}


/// Lists events
async fn get_events(
    pool: Data<ConnectionPool>,
    _auth: Authenticated,
    query: Query<EventQuery>,
) -> Result<Json<EventList>>
{
    let mut conn = pool.conn()?;
    let (events, total) = list(&mut conn, &query)?;

    Ok(Json(EventList {
        events: events.into_iter().map(EventResource::from).collect(),
        total,
    }))
}


/// Retrieves the specified event
async fn get_event(
    pool: Data<ConnectionPool>,
    _auth: Authenticated,
    path: Path<(i32,)>,
) -> Result<Json<EventResource>>
{
    let mut conn = pool.conn()?;
    Ok(Json(get(&mut conn, path.into_inner().0)?.into()))
}


/// Updates the acknowledged flag of the specified event
async fn patch_event(
    pool: Data<ConnectionPool>,
    _auth: Authenticated,
    path: Path<(i32,)>,
    body: Json<PatchEventBody>,
) -> Result<Json<EventResource>>
{
    let id = path.into_inner().0;
    let mut conn = pool.conn()?;
    let mut event = get(&mut conn, id)?;

    if let Some(acknowledged) = body.acknowledged {
        if event.acknowledged != acknowledged {
            debug!("setting acknowledged={} on event {}", acknowledged, id);
            event.acknowledged = acknowledged;
            diesel::update(&event)
                .set(events::acknowledged.eq(acknowledged))
                .execute(&mut conn)?;
        }
    }

    Ok(Json(event.into()))
}


/// Acknowledges all outstanding events
async fn post_acknowledge(
    pool: Data<ConnectionPool>,
    _auth: Authenticated,
    body: Json<AcknowledgeBody>,
) -> Result<Json<AcknowledgeResult>>
{
    let mut conn = pool.conn()?;
    let acknowledged = acknowledge_all(&mut conn, body.camera_id)?;
    debug!("acknowledged {} event(s)", acknowledged);

    Ok(Json(AcknowledgeResult { acknowledged }))
}


/// Deletes the specified event and its media
async fn delete_event(
    pool: Data<ConnectionPool>,
    media: Data<MediaStore>,
    _admin: Admin,
    path: Path<(i32,)>,
) -> Result<HttpResponse>
{
    let id = path.into_inner().0;
    let event = {
        let mut conn = pool.conn()?;
        get(&mut conn, id)?
    };

    delete(&pool, &media, vec![event]).await?;

    info!("deleted event {}", id);
    Ok(HttpResponse::NoContent().finish())
}


/// Opens a stored media file of the specified event
async fn open_media(
    pool: &ConnectionPool,
    media: &MediaStore,
    id: i32,
    kind: MediaKind,
) -> Result<NamedFile>
{
    let event = {
        let mut conn = pool.conn()?;
        get(&mut conn, id)?
    };

    let relative = match kind {
        MediaKind::Clip => event.clip_path,
        _ => event.thumbnail_path,
    };
    let relative = relative
        .ok_or((StatusCode::NOT_FOUND, "media not available"))?;

    NamedFile::open_async(media.resolve(&relative))
        .await
        .map_err(Error::with_status(StatusCode::NOT_FOUND))
}


async fn get_thumbnail(
    pool: Data<ConnectionPool>,
    media: Data<MediaStore>,
    _auth: Authenticated,
    path: Path<(i32,)>,
) -> Result<NamedFile>
{
    open_media(&pool, &media, path.into_inner().0, MediaKind::Thumbnail).await
}


async fn get_clip(
    pool: Data<ConnectionPool>,
    media: Data<MediaStore>,
    _auth: Authenticated,
    path: Path<(i32,)>,
) -> Result<NamedFile>
{
    open_media(&pool, &media, path.into_inner().0, MediaKind::Clip).await
}


/// Configures the */events* API resource
pub fn configure_api(service: &mut ServiceConfig) {

    service.route("/events", web::get().to(get_events));
    service.route("/events/acknowledge", web::post().to(post_acknowledge));

    service.service(
        web::resource("/events/{id}")
            .route(web::get().to(get_event))
            .route(web::patch().to(patch_event))
            .route(web::delete().to(delete_event))
    );

    service.route("/events/{id}/thumbnail", web::get().to(get_thumbnail));
    service.route("/events/{id}/clip", web::get().to(get_clip));
}
