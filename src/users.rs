//! User management

// Actix handlers have lots of needless pass-by-value (Data, Json, and Path structs)
#![allow(clippy::needless_pass_by_value)]

use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use actix_web::web::{self, Data, Json, Path, ServiceConfig};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, info, trace, warn};
use rand::Rng;

use crate::api::{NewUserBody, PatchUserBody, Role, UserResource};
use crate::auth::{self, Admin, Authenticated};
use crate::config::Config;
use crate::db::{self, ConnectionPool, DatabaseContext};
use crate::db::schema::users;
use crate::error::{Error, Result};


/// Stored representation of a user
#[derive(AsChangeset, Clone, Debug, Identifiable, Queryable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub display_name: String,
    pub pin_hash: String,
    pub role: String,
    pub created_at: i64,
}

impl User {

    pub fn role(&self) -> Role {
        Role::parse(&self.role)
    }
}

impl From<User> for UserResource {
    fn from(user: User) -> Self {
        let role = user.role();
        UserResource {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            role,
            created_at: user.created_at,
        }
    }
}


#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    username: &'a str,
    display_name: &'a str,
    pin_hash: &'a str,
    role: &'a str,
    created_at: i64,
}


/// Validates a username
///
/// Usernames are 1 to 32 characters drawn from ASCII letters, digits, `_`,
/// `.` and `-`.
pub fn validate_username(username: &str) -> Result<()> {

    let valid_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-';

    if username.is_empty() || username.len() > 32 || !username.chars().all(valid_char) {
        return Err(Error::bad_request(
            "username must be 1-32 characters of letters, digits, '_', '.' or '-'"
        ));
    }

    Ok(())
}


fn validate_display_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.chars().count() > 64 {
        return Err(Error::bad_request("display name must be 1-64 characters"));
    }
    Ok(())
}


/// Creates a new user with the given PIN
pub fn create(
    conn: &mut SqliteConnection,
    username: &str,
    display_name: &str,
    pin: &str,
    role: Role,
) -> Result<User>
{
    validate_username(username)?;
    validate_display_name(display_name)?;
    auth::validate_pin(pin)?;

    let pin_hash = auth::hash_pin(pin)?;

    debug!("adding user {} to database", username);
    let new_user = NewUser {
        username,
        display_name,
        pin_hash: &pin_hash,
        role: role.as_str(),
        created_at: db::now(),
    };
    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(conn)?;

    // Get the row we just inserted
    let user = users::table.filter(users::username.eq(username))
        .first(conn)?;

    Ok(user)
}


/// Retrieves the specified user
pub fn get(conn: &mut SqliteConnection, id: i32) -> Result<User> {
    Ok(users::table.find(id).first(conn)?)
}


/// Retrieves a user by username, if one exists
pub fn find_by_username(conn: &mut SqliteConnection, username: &str) -> Result<Option<User>> {

    let user = users::table.filter(users::username.eq(username))
        .first(conn)
        .optional()?;

    Ok(user)
}


/// Retrieves all users ordered by username
pub fn all(conn: &mut SqliteConnection) -> Result<Vec<User>> {
    Ok(users::table.order(users::username.asc()).load(conn)?)
}


fn admin_count(conn: &mut SqliteConnection) -> Result<i64> {

    let count = users::table.filter(users::role.eq(Role::Admin.as_str()))
        .count()
        .get_result(conn)?;

    Ok(count)
}


/// Deletes a user, refusing to remove the last administrator
///
/// Sessions go with the user through the foreign key cascade.
pub fn remove(conn: &mut SqliteConnection, id: i32) -> Result<()> {

    conn.immediate_transaction(|conn| {

        let user = get(conn, id)?;
        if user.role() == Role::Admin && admin_count(conn)? <= 1 {
            return Err(Error::bad_request("cannot delete the last administrator"));
        }

        debug!("deleting user {} from database", id);
        diesel::delete(&user)
            .execute(conn)?;

        Ok(())
    })
}


/// Ensures at least one user exists
///
/// On an empty database, an administrator named *admin* is created. Its PIN
/// is taken from configuration, or generated and logged once if none is set.
pub fn maybe_create_default_user(conn: &mut SqliteConnection, config: &Config) -> Result<()> {

    let count: i64 = users::table.count().get_result(conn)?;
    if count > 0 {
        trace!("found {} existing user(s)", count);
        return Ok(());
    }

    let pin = match &config.admin_pin {
        Some(pin) => pin.clone(),
        None => {
            let pin = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
            warn!("no users exist; created user \"admin\" with generated PIN {}", pin);
            pin
        },
    };

    create(conn, "admin", "Administrator", &pin, Role::Admin)?;
    info!("created default administrator account");

    Ok(())
}


/// Lists all users
async fn get_users(
    pool: Data<ConnectionPool>,
    _admin: Admin,
) -> Result<Json<Vec<UserResource>>>
{
    let mut conn = pool.conn()?;
    let users = all(&mut conn)?
        .into_iter()
        .map(UserResource::from)
        .collect();

    Ok(Json(users))
}


/// Creates a new user
async fn put_user(
    pool: Data<ConnectionPool>,
    _admin: Admin,
    body: Json<NewUserBody>,
) -> Result<Json<UserResource>>
{
    let body = body.into_inner();
    let display_name = body.display_name.unwrap_or_else(|| body.username.clone());

    let mut conn = pool.conn()?;
    let user = create(
        &mut conn,
        &body.username,
        &display_name,
        &body.pin,
        body.role.unwrap_or(Role::User),
    )?;

    info!("created user {}", user.id);
    Ok(Json(user.into()))
}


/// Retrieves the specified user
///
/// Users may retrieve themselves; administrators may retrieve anyone.
async fn get_user(
    pool: Data<ConnectionPool>,
    auth: Authenticated,
    path: Path<(i32,)>,
) -> Result<Json<UserResource>>
{
    let id = path.into_inner().0;
    if auth.user.id != id && auth.role() < Role::Admin {
        return Err((StatusCode::FORBIDDEN, "insufficient privileges").into());
    }

    let mut conn = pool.conn()?;
    Ok(Json(get(&mut conn, id)?.into()))
}


/// Updates the specified user
///
/// Users may change their own display name and PIN. Only administrators may
/// change roles or touch other users. Changing a PIN signs the user out
/// everywhere except the session making the request.
async fn patch_user(
    pool: Data<ConnectionPool>,
    auth: Authenticated,
    path: Path<(i32,)>,
    body: Json<PatchUserBody>,
) -> Result<Json<UserResource>>
{
    let id = path.into_inner().0;
    let body = body.into_inner();
    let is_admin = auth.role() >= Role::Admin;

    if auth.user.id != id && !is_admin {
        return Err((StatusCode::FORBIDDEN, "insufficient privileges").into());
    }
    // Non-admins may only patch themselves, so their current role is auth.role()
    if body.role.map_or(false, |role| role != auth.role()) && !is_admin {
        return Err((StatusCode::FORBIDDEN, "only administrators can change roles").into());
    }

    let mut conn = pool.conn()?;
    let user = conn.immediate_transaction(|conn| {

        let mut user = get(conn, id)?;
        let mut do_save = false;
        let mut do_revoke = false;

        if let Some(display_name) = body.display_name {
            validate_display_name(&display_name)?;
            if user.display_name != display_name {
                trace!("updating display name for user {}", id);
                user.display_name = display_name;
                do_save = true;
            }
        }

        if let Some(pin) = body.pin {
            auth::validate_pin(&pin)?;
            trace!("updating PIN for user {}", id);
            user.pin_hash = auth::hash_pin(&pin)?;
            do_save = true;
            do_revoke = true;
        }

        if let Some(role) = body.role {
            if user.role() != role {
                if user.role() == Role::Admin && admin_count(conn)? <= 1 {
                    return Err(Error::bad_request("cannot demote the last administrator"));
                }
                trace!("updating role for user {}", id);
                user.role = role.as_str().to_owned();
                do_save = true;
            }
        }

        if do_save {
            debug!("saving changes to user {}", id);
            diesel::update(&user)
                .set(&user)
                .execute(conn)?;
        }

        if do_revoke {
            let revoked = auth::revoke_sessions(conn, id, Some(auth.token.as_str()))?;
            debug!("revoked {} session(s) of user {}", revoked, id);
        }

        Ok::<_, Error>(user)
    })?;

    info!("successfully updated user {}", id);
    Ok(Json(user.into()))
}


/// Deletes the specified user along with their sessions
async fn delete_user(
    pool: Data<ConnectionPool>,
    admin: Admin,
    path: Path<(i32,)>,
) -> Result<HttpResponse>
{
    let id = path.into_inner().0;
    if admin.user.id == id {
        return Err(Error::bad_request("cannot delete your own account"));
    }

    let mut conn = pool.conn()?;
    remove(&mut conn, id)?;

    info!("deleted user {}", id);
    Ok(HttpResponse::NoContent().finish())
}


/// Configures the */users* API resource
pub fn configure_api(service: &mut ServiceConfig) {

    service.service(
        web::resource("/users")
            .route(web::get().to(get_users))
            .route(web::put().to(put_user))
    );

    service.service(
        web::resource("/users/{id}")
            .route(web::get().to(get_user))
            .route(web::patch().to(patch_user))
            .route(web::delete().to(delete_user))
    );
}
