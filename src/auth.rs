//! Authentication and access control
//!
//! # Authentication
//!
//! Users sign in with a username and a numeric PIN. A successful login
//! creates a session row and hands its random token back to the client,
//! which presents it on every request as `Authorization: Bearer <token>`.
//! Media elements cannot set headers, so the `access_token` query parameter
//! is accepted as a fallback.
//!
//! # Authorization
//!
//! Handlers declare what they require through extractors. `Authenticated`
//! admits any signed-in user, `Admin` only administrators. Missing or
//! expired sessions are rejected with 401, insufficient roles with 403.
//!
//! # Throttling
//!
//! Repeated failed logins for the same username are throttled by
//! `LoginThrottle`, which lives in process memory only.


use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Mutex;

use actix_web::{FromRequest, HttpRequest, HttpResponse};
use actix_web::dev::Payload;
use actix_web::http::StatusCode;
use actix_web::http::header::AUTHORIZATION;
use actix_web::web::{self, Data, Json, Query, ServiceConfig};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use argon2::password_hash::SaltString;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use futures::future::{ready, Ready};
use log::{debug, info, trace, warn};
use rand::Rng;
use serde::Deserialize;

use crate::api::{LoginBody, LoginResource, Role, UserResource};
use crate::config::Config;
use crate::db::{self, ConnectionPool, DatabaseContext};
use crate::db::schema::sessions;
use crate::db::schema::users as user_rows;
use crate::do_lock;
use crate::error::{Error, Result};
use crate::users::{self, User};


//#region PINs

/// Checks that a PIN is 4 to 8 ASCII digits
pub fn validate_pin(pin: &str) -> Result<()> {

    if pin.len() < 4 || pin.len() > 8 || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::bad_request("PIN must be 4-8 digits"));
    }

    Ok(())
}


/// Hashes a PIN into a PHC string suitable for storage
pub fn hash_pin(pin: &str) -> Result<String> {

    let salt = SaltString::encode_b64(&rand::thread_rng().gen::<[u8; 16]>())?;
    let hash = Argon2::default()
        .hash_password(pin.as_bytes(), &salt)?
        .to_string();

    Ok(hash)
}


/// Returns whether `pin` matches the stored hash
///
/// A malformed stored hash never matches.
pub fn verify_pin(pin: &str, hash: &str) -> bool {

    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            warn!("stored PIN hash is malformed: {}", err);
            false
        },
    }
}

//#endregion


//#region Sessions

/// Stored representation of a login session
#[derive(Clone, Debug, Identifiable, Insertable, Queryable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(token))]
pub struct Session {
    pub token: String,
    pub user_id: i32,
    pub created_at: i64,
    pub expires_at: i64,
}


/// Generates a new random session token
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}


/// Creates a session for the given user
pub fn create_session(conn: &mut SqliteConnection, user_id: i32, ttl_hours: i64) -> Result<Session> {

    let now = db::now();
    let session = Session {
        token: generate_token(),
        user_id,
        created_at: now,
        expires_at: now + ttl_hours * 3600,
    };

    trace!("storing new session for user {}", user_id);
    diesel::insert_into(sessions::table)
        .values(&session)
        .execute(conn)?;

    Ok(session)
}


/// Resolves a session token to its user
///
/// Returns `None` if the token is unknown or expired. Expired sessions are
/// deleted as they are found.
pub fn lookup_session(conn: &mut SqliteConnection, token: &str, now: i64) -> Result<Option<User>> {

    let found: Option<(Session, User)> = sessions::table
        .inner_join(user_rows::table)
        .filter(sessions::token.eq(token))
        .first(conn)
        .optional()?;

    match found {
        Some((session, user)) if session.expires_at > now => Ok(Some(user)),
        Some((session, _)) => {
            debug!("session for user {} has expired", session.user_id);
            diesel::delete(&session).execute(conn)?;
            Ok(None)
        },
        None => Ok(None),
    }
}


/// Deletes the specified session
pub fn delete_session(conn: &mut SqliteConnection, token: &str) -> Result<()> {

    diesel::delete(sessions::table.find(token))
        .execute(conn)?;

    Ok(())
}


/// Deletes all sessions of a user, optionally keeping one of them
pub fn revoke_sessions(conn: &mut SqliteConnection, user_id: i32, keep: Option<&str>) -> Result<usize> {

    let target = sessions::table
        .filter(sessions::user_id.eq(user_id))
        .filter(sessions::token.ne(keep.unwrap_or("")));

    Ok(diesel::delete(target).execute(conn)?)
}


/// Deletes every session that has expired by `now`
pub fn purge_expired(conn: &mut SqliteConnection, now: i64) -> Result<usize> {

    let expired = sessions::table.filter(sessions::expires_at.le(now));

    Ok(diesel::delete(expired).execute(conn)?)
}

//#endregion


//#region Throttling

/// Failed attempts tolerated within one window
const MAX_FAILURES: u32 = 5;

/// Length of the failure window in seconds
const FAILURE_WINDOW: i64 = 15 * 60;


#[derive(Debug)]
struct Attempts {
    failures: u32,
    window_start: i64,
}


/// Tracks failed login attempts per username
#[derive(Debug, Default)]
pub struct LoginThrottle {
    attempts: Mutex<HashMap<String, Attempts>>,
}

impl LoginThrottle {

    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the attempt if the username has too many recent failures
    pub fn check(&self, username: &str, now: i64) -> Result<()> {

        let mut attempts = do_lock!(self.attempts);
        let key = username.to_lowercase();

        if let Some(entry) = attempts.get(&key) {
            if now - entry.window_start >= FAILURE_WINDOW {
                attempts.remove(&key);
            } else if entry.failures >= MAX_FAILURES {
                warn!("throttling login attempts for {}", username);
                return Err((
                    StatusCode::TOO_MANY_REQUESTS,
                    "too many failed attempts, try again later",
                ).into());
            }
        }

        Ok(())
    }

    pub fn record_failure(&self, username: &str, now: i64) {

        let mut attempts = do_lock!(self.attempts);

        // Expired windows carry no information
        attempts.retain(|_, a| now - a.window_start < FAILURE_WINDOW);

        let entry = attempts.entry(username.to_lowercase())
            .or_insert(Attempts { failures: 0, window_start: now });

        if now - entry.window_start >= FAILURE_WINDOW {
            entry.failures = 0;
            entry.window_start = now;
        }
        entry.failures += 1;
    }

    pub fn reset(&self, username: &str) {
        do_lock!(self.attempts).remove(&username.to_lowercase());
    }

    /// Number of usernames with recent failures
    pub fn tracked(&self) -> usize {
        do_lock!(self.attempts).len()
    }
}

//#endregion


//#region Extractors

/// A request made by a signed-in user
#[derive(Debug)]
pub struct Authenticated {
    pub user: User,
    pub token: String,
}

impl Authenticated {

    pub fn role(&self) -> Role {
        self.user.role()
    }
}


#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}


/// Extracts the session token from a request
fn request_token(req: &HttpRequest) -> Option<String> {

    let header = req.headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let (scheme, token) = value.split_once(' ')?;
            if scheme.eq_ignore_ascii_case("bearer") {
                Some(token.trim().to_owned())
            } else {
                None
            }
        });

    header.or_else(|| {
        Query::<TokenQuery>::from_query(req.query_string())
            .ok()
            .and_then(|q| q.into_inner().access_token)
    })
    .filter(|token| !token.is_empty())
}


fn authenticate(req: &HttpRequest) -> Result<Authenticated> {

    let token = request_token(req)
        .ok_or((StatusCode::UNAUTHORIZED, "authentication required"))?;

    let pool = req.app_data::<Data<ConnectionPool>>()
        .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "database unavailable"))?;
    let mut conn = pool.conn()?;

    match lookup_session(&mut conn, &token, db::now())? {
        Some(user) => {
            trace!("permitting request from user {}", user.id);
            Ok(Authenticated { user, token })
        },
        None => {
            debug!("rejecting request (session missing or expired)");
            Err((StatusCode::UNAUTHORIZED, "invalid or expired session").into())
        },
    }
}

impl FromRequest for Authenticated {
    type Error = Error;
    type Future = Ready<Result<Self>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}


/// A request made by a signed-in administrator
#[derive(Debug)]
pub struct Admin(pub Authenticated);

impl Deref for Admin {
    type Target = Authenticated;

    fn deref(&self) -> &Authenticated {
        &self.0
    }
}

impl FromRequest for Admin {
    type Error = Error;
    type Future = Ready<Result<Self>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let res = authenticate(req).and_then(|auth| {
            if auth.role() >= Role::Admin {
                Ok(Admin(auth))
            } else {
                debug!("rejecting request from user {} (access level too low)", auth.user.id);
                Err((StatusCode::FORBIDDEN, "administrator access required").into())
            }
        });
        ready(res)
    }
}

//#endregion


//#region Handlers

/// Exchanges a username and PIN for a session token
async fn login(
    pool: Data<ConnectionPool>,
    config: Data<Config>,
    throttle: Data<LoginThrottle>,
    body: Json<LoginBody>,
) -> Result<Json<LoginResource>>
{
    let body = body.into_inner();
    users::validate_username(&body.username)?;
    validate_pin(&body.pin)?;

    let now = db::now();
    throttle.check(&body.username, now)?;

    let mut conn = pool.conn()?;
    let user = users::find_by_username(&mut conn, &body.username)?
        .filter(|user| verify_pin(&body.pin, &user.pin_hash));

    let user = match user {
        Some(user) => user,
        None => {
            warn!("failed login attempt for {}", body.username);
            throttle.record_failure(&body.username, now);
            return Err((StatusCode::UNAUTHORIZED, "invalid username or PIN").into());
        },
    };

    throttle.reset(&body.username);
    let session = create_session(&mut conn, user.id, config.session_ttl_hours)?;
    info!("user {} signed in", user.id);

    Ok(Json(LoginResource {
        token: session.token,
        expires_at: session.expires_at,
        user: user.into(),
    }))
}


/// Ends the session presented with the request
async fn logout(
    pool: Data<ConnectionPool>,
    auth: Authenticated,
) -> Result<HttpResponse>
{
    let mut conn = pool.conn()?;
    delete_session(&mut conn, &auth.token)?;
    debug!("user {} signed out", auth.user.id);

    Ok(HttpResponse::NoContent().finish())
}


/// Retrieves the signed-in user
async fn me(auth: Authenticated) -> Json<UserResource> {
    Json(auth.user.into())
}


/// Configures the */auth* API resource
pub fn configure_api(service: &mut ServiceConfig) {

    service.route("/auth/login", web::post().to(login));
    service.route("/auth/logout", web::post().to(logout));
    service.route("/auth/me", web::get().to(me));
}

//#endregion
