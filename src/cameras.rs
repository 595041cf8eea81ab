//! Camera management

// Actix handlers have lots of needless pass-by-value (Data, Json, and Path structs)
#![allow(clippy::needless_pass_by_value)]

use actix_web::HttpResponse;
use actix_web::web::{self, Data, Json, Path, ServiceConfig};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, info, trace};

use crate::api::{CameraResource, CommandBody, NewCameraBody, PatchCameraBody};
use crate::auth::{Admin, Authenticated};
use crate::config::Config;
use crate::db::{self, ConnectionPool, DatabaseContext};
use crate::db::schema::{cameras, events};
use crate::error::{Error, Result};
use crate::media::MediaStore;
use crate::mqtt::Mqtt;


/// Representation of a camera
#[derive(AsChangeset, Clone, Debug, Identifiable, Queryable)]
#[diesel(table_name = cameras)]
#[diesel(treat_none_as_null = true)]
pub struct Camera {
    pub id: i32,
    pub name: String,

    /// Name under which Frigate reports this camera's events
    pub frigate_name: String,

    /// Identifier used in this camera's MQTT topics
    pub device_id: String,

    pub stream_url: Option<String>,
    pub enabled: bool,
    pub notify: bool,

    /// Unix time of the last heartbeat
    pub last_seen: Option<i64>,

    pub created_at: i64,
}

impl Camera {

    /// Whether a heartbeat arrived within `timeout` seconds of `now`
    pub fn online(&self, now: i64, timeout: i64) -> bool {
        self.last_seen
            .map_or(false, |seen| now - seen <= timeout)
    }

    pub fn to_resource(&self, now: i64, timeout: i64) -> CameraResource {
        CameraResource {
            id: self.id,
            name: self.name.clone(),
            frigate_name: self.frigate_name.clone(),
            device_id: self.device_id.clone(),
            stream_url: self.stream_url.clone(),
            enabled: self.enabled,
            notify: self.notify,
            last_seen: self.last_seen,
            online: self.online(now, timeout),
        }
    }
}


#[derive(Insertable)]
#[diesel(table_name = cameras)]
struct NewCamera<'a> {
    name: &'a str,
    frigate_name: &'a str,
    device_id: &'a str,
    stream_url: Option<&'a str>,
    enabled: bool,
    notify: bool,
    created_at: i64,
}


/// Validates an identifier shared with Frigate or used in MQTT topics
///
/// Identifiers are non-empty and consist of ASCII letters, digits, `_` and
/// `-`, which keeps them valid as single MQTT topic levels.
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {

    let valid_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';

    if value.is_empty() || value.len() > 64 || !value.chars().all(valid_char) {
        return Err(Error::bad_request(format!(
            "{} must be 1-64 characters of letters, digits, '_' or '-'", field
        )));
    }

    Ok(())
}


fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.chars().count() > 64 {
        return Err(Error::bad_request("name must be 1-64 characters"));
    }
    Ok(())
}


/// Creates a new camera
pub fn create(conn: &mut SqliteConnection, body: &NewCameraBody) -> Result<Camera> {

    let device_id = body.device_id.as_deref()
        .unwrap_or(&body.frigate_name);

    validate_name(&body.name)?;
    validate_identifier("frigateName", &body.frigate_name)?;
    validate_identifier("deviceId", device_id)?;

    debug!("adding camera {} to database", body.frigate_name);
    let new_cam = NewCamera {
        name: &body.name,
        frigate_name: &body.frigate_name,
        device_id,
        stream_url: body.stream_url.as_deref().filter(|url| !url.is_empty()),
        enabled: body.enabled.unwrap_or(true),
        notify: body.notify.unwrap_or(true),
        created_at: db::now(),
    };
    diesel::insert_into(cameras::table)
        .values(&new_cam)
        .execute(conn)?;

    // Get the camera we just inserted (because get_result is not supported for
    // SQLite)
    let camera = cameras::table.filter(cameras::frigate_name.eq(&body.frigate_name))
        .first(conn)?;

    Ok(camera)
}


/// Retrieves the specified camera
pub fn get(conn: &mut SqliteConnection, id: i32) -> Result<Camera> {
    Ok(cameras::table.find(id).first(conn)?)
}


/// Retrieves all cameras ordered by name
pub fn all(conn: &mut SqliteConnection) -> Result<Vec<Camera>> {
    Ok(cameras::table.order((cameras::name.asc(), cameras::id.asc())).load(conn)?)
}


/// Retrieves the camera Frigate knows by `frigate_name`, if any
pub fn find_by_frigate_name(conn: &mut SqliteConnection, frigate_name: &str) -> Result<Option<Camera>> {

    let camera = cameras::table.filter(cameras::frigate_name.eq(frigate_name))
        .first(conn)
        .optional()?;

    Ok(camera)
}


/// Records the liveness of the camera with the given device id
///
/// `seen` is the heartbeat time, or `None` when the camera reported itself
/// offline. Returns whether a camera with that device id exists.
pub fn record_heartbeat(conn: &mut SqliteConnection, device_id: &str, seen: Option<i64>) -> Result<bool> {

    let updated = diesel::update(cameras::table.filter(cameras::device_id.eq(device_id)))
        .set(cameras::last_seen.eq(seen))
        .execute(conn)?;

    Ok(updated > 0)
}


/// Updates a camera from a partial representation
///
/// Returns whether anything changed.
fn apply_patch(camera: &mut Camera, body: PatchCameraBody) -> Result<bool> {

    let mut changed = false;

    if let Some(name) = body.name {
        validate_name(&name)?;
        if camera.name != name {
            trace!("updating name for camera {}", camera.id);
            camera.name = name;
            changed = true;
        }
    }

    if let Some(frigate_name) = body.frigate_name {
        validate_identifier("frigateName", &frigate_name)?;
        if camera.frigate_name != frigate_name {
            trace!("updating frigate name for camera {}", camera.id);
            camera.frigate_name = frigate_name;
            changed = true;
        }
    }

    if let Some(device_id) = body.device_id {
        validate_identifier("deviceId", &device_id)?;
        if camera.device_id != device_id {
            trace!("updating device id for camera {}", camera.id);
            camera.device_id = device_id;
            camera.last_seen = None;
            changed = true;
        }
    }

    if let Some(stream_url) = body.stream_url {
        // An empty string clears the stream URL
        let stream_url = Some(stream_url).filter(|url| !url.is_empty());
        if camera.stream_url != stream_url {
            trace!("updating stream URL for camera {}", camera.id);
            camera.stream_url = stream_url;
            changed = true;
        }
    }

    if let Some(enabled) = body.enabled {
        if camera.enabled != enabled {
            trace!("updating enabled for camera {}", camera.id);
            camera.enabled = enabled;
            changed = true;
        }
    }

    if let Some(notify) = body.notify {
        if camera.notify != notify {
            trace!("updating notify for camera {}", camera.id);
            camera.notify = notify;
            changed = true;
        }
    }

    Ok(changed)
}


/// Retrieves information about all cameras
async fn get_cameras(
    pool: Data<ConnectionPool>,
    config: Data<Config>,
    _auth: Authenticated,
) -> Result<Json<Vec<CameraResource>>>
{
    trace!("retrieving all cameras from database");
    let mut conn = pool.conn()?;
    let now = db::now();
    let cameras = all(&mut conn)?
        .iter()
        .map(|cam| cam.to_resource(now, config.heartbeat_timeout_secs))
        .collect();

    Ok(Json(cameras))
}


/// Creates a new camera
async fn put_camera(
    pool: Data<ConnectionPool>,
    config: Data<Config>,
    _admin: Admin,
    body: Json<NewCameraBody>,
) -> Result<Json<CameraResource>>
{
    let mut conn = pool.conn()?;
    let camera = create(&mut conn, &body)?;

    info!("created new camera {}", camera.id);
    Ok(Json(camera.to_resource(db::now(), config.heartbeat_timeout_secs)))
}


/// Retrieves information about the specified camera
async fn get_camera(
    pool: Data<ConnectionPool>,
    config: Data<Config>,
    _auth: Authenticated,
    path: Path<(i32,)>,
) -> Result<Json<CameraResource>>
{
    let id = path.into_inner().0;

    trace!("retrieving camera {} from database", id);
    let mut conn = pool.conn()?;
    let camera = get(&mut conn, id)?;

    Ok(Json(camera.to_resource(db::now(), config.heartbeat_timeout_secs)))
}


/// Updates information about the specified camera
async fn patch_camera(
    pool: Data<ConnectionPool>,
    config: Data<Config>,
    _admin: Admin,
    path: Path<(i32,)>,
    body: Json<PatchCameraBody>,
) -> Result<Json<CameraResource>>
{
    let id = path.into_inner().0;

    let mut conn = pool.conn()?;
    let mut camera = get(&mut conn, id)?;

    if apply_patch(&mut camera, body.into_inner())? {
        debug!("saving changes to camera {}", id);
        diesel::update(&camera)
            .set(&camera)
            .execute(&mut conn)?;
        info!("successfully updated camera {}", id);
    }

    Ok(Json(camera.to_resource(db::now(), config.heartbeat_timeout_secs)))
}


/// Deletes the specified camera along with its events and their media
async fn delete_camera(
    pool: Data<ConnectionPool>,
    media: Data<MediaStore>,
    _admin: Admin,
    path: Path<(i32,)>,
) -> Result<HttpResponse>
{
    let id = path.into_inner().0;
    let mut conn = pool.conn()?;
    let camera = get(&mut conn, id)?;

    let files: Vec<(Option<String>, Option<String>)> = events::table
        .filter(events::camera_id.eq(camera.id))
        .select((events::thumbnail_path, events::clip_path))
        .load(&mut conn)?;

    debug!("deleting camera {} from database", id);
    diesel::delete(&camera)
        .execute(&mut conn)?;
    drop(conn);

    for (thumbnail, clip) in files {
        media.remove(thumbnail.as_deref()).await;
        media.remove(clip.as_deref()).await;
    }

    info!("deleted camera {}", id);
    Ok(HttpResponse::NoContent().finish())
}


/// Sends a command to the specified camera over MQTT
async fn post_command(
    pool: Data<ConnectionPool>,
    mqtt: Data<Mqtt>,
    admin: Admin,
    path: Path<(i32,)>,
    body: Json<CommandBody>,
) -> Result<HttpResponse>
{
    let id = path.into_inner().0;
    let body = body.into_inner();

    let valid_char = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_';
    if body.command.is_empty() || !body.command.chars().all(valid_char) {
        return Err(Error::bad_request("command must consist of a-z, 0-9 and '_'"));
    }

    let camera = {
        let mut conn = pool.conn()?;
        get(&mut conn, id)?
    };

    mqtt.send_command(&camera.device_id, &body.command, body.args, &admin.user.username)
        .await?;

    info!("sent command {} to camera {}", body.command, id);
    Ok(HttpResponse::Accepted().finish())
}


/// Configures the */cameras* API resource
pub fn configure_api(service: &mut ServiceConfig) {

    service.service(
        web::resource("/cameras")
            .route(web::get().to(get_cameras))
            .route(web::put().to(put_camera))
    );

    service.service(
        web::resource("/cameras/{id}")
            .route(web::get().to(get_camera))
            .route(web::patch().to(patch_camera))
            .route(web::delete().to(delete_camera))
    );

    service.route("/cameras/{id}/command", web::post().to(post_command));
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::db::testing::memory_pool;

    fn new_camera(name: &str, frigate_name: &str) -> NewCameraBody {
        NewCameraBody {
            name: name.into(),
            frigate_name: frigate_name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn identifiers_are_topic_safe() {
        assert!(validate_identifier("deviceId", "front_door-1").is_ok());
        assert!(validate_identifier("deviceId", "front/door").is_err());
        assert!(validate_identifier("deviceId", "porch+").is_err());
        assert!(validate_identifier("deviceId", "").is_err());
    }

    #[test]
    fn device_id_defaults_to_frigate_name() {
        let pool = memory_pool();
        let mut conn = pool.get().unwrap();

        let camera = create(&mut conn, &new_camera("Front Door", "front_door")).unwrap();
        assert_eq!(camera.device_id, "front_door");
        assert!(camera.enabled);
        assert!(camera.notify);
        assert!(camera.last_seen.is_none());
    }

    #[test]
    fn frigate_names_are_unique() {
        let pool = memory_pool();
        let mut conn = pool.get().unwrap();

        create(&mut conn, &new_camera("Front Door", "front_door")).unwrap();
        let mut dup = new_camera("Another", "front_door");
        dup.device_id = Some(String::from("other"));
        assert!(create(&mut conn, &dup).is_err());
    }

    #[test]
    fn heartbeats_update_liveness() {
        let pool = memory_pool();
        let mut conn = pool.get().unwrap();
        let camera = create(&mut conn, &new_camera("Porch", "porch")).unwrap();

        assert!(record_heartbeat(&mut conn, "porch", Some(1_000)).unwrap());
        assert!(!record_heartbeat(&mut conn, "garage", Some(1_000)).unwrap());

        let camera = get(&mut conn, camera.id).unwrap();
        assert_eq!(camera.last_seen, Some(1_000));
        assert!(camera.online(1_090, 90));
        assert!(!camera.online(1_091, 90));

        record_heartbeat(&mut conn, "porch", None).unwrap();
        assert!(!get(&mut conn, camera.id).unwrap().online(1_000, 90));
    }

    #[test]
    fn patch_reports_changes_only() {
        let pool = memory_pool();
        let mut conn = pool.get().unwrap();
        let mut camera = create(&mut conn, &new_camera("Porch", "porch")).unwrap();

        let unchanged = PatchCameraBody { name: Some(String::from("Porch")), ..Default::default() };
        assert!(!apply_patch(&mut camera, unchanged).unwrap());

        let changed = PatchCameraBody {
            notify: Some(false),
            stream_url: Some(String::from("http://nvr/porch.m3u8")),
            ..Default::default()
        };
        assert!(apply_patch(&mut camera, changed).unwrap());
        assert!(!camera.notify);

        let cleared = PatchCameraBody { stream_url: Some(String::new()), ..Default::default() };
        assert!(apply_patch(&mut camera, cleared).unwrap());
        assert!(camera.stream_url.is_none());

        let invalid = PatchCameraBody { device_id: Some(String::from("a b")), ..Default::default() };
        assert!(apply_patch(&mut camera, invalid).is_err());
    }
}
