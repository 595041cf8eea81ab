use std::collections::HashMap;

use actix_web::{test, App};
use actix_web::http::StatusCode;
use actix_web::http::header::AUTHORIZATION;
use chrono::Local;
use serde_json::{json, Value};
use tempfile::TempDir;

use porchwatch::api::{CameraResource, EventList, EventResource, LoginResource, Role, UserResource};
use porchwatch::cameras;
use porchwatch::config::Config;
use porchwatch::db;
use porchwatch::mqtt::Mqtt;
use porchwatch::notify::Decision;
use porchwatch::server::{AppState, Health};
use porchwatch::settings::{NotificationSettings, Settings};
use porchwatch::users;
use porchwatch::webhook::WebhookResult;


struct Harness {
    state: AppState,
    _dir: TempDir,
}


/// Builds application state backed by a fresh database in a temp directory
///
/// The database holds an administrator *admin* (PIN 1234) and a regular user
/// *guest* (PIN 5678).
fn harness(vars: &[(&str, &str)]) -> Harness {

    let dir = tempfile::tempdir().unwrap();

    let mut vars: HashMap<String, String> = vars.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    vars.insert(String::from("STATE_DIRECTORY"), dir.path().to_string_lossy().into_owned());
    let config = Config::from_lookup(|name| vars.get(name).cloned()).unwrap();

    let pool = db::connect(&config).unwrap();
    {
        let mut conn = pool.get().unwrap();
        users::create(&mut conn, "admin", "Admin", "1234", Role::Admin).unwrap();
        users::create(&mut conn, "guest", "Guest", "5678", Role::User).unwrap();
    }

    Harness {
        state: AppState::new(config, pool, Mqtt::disabled()).unwrap(),
        _dir: dir,
    }
}


macro_rules! init_app {
    ($harness:expr) => {
        test::init_service(App::new().configure(|service| $harness.state.configure(service))).await
    };
}


macro_rules! login {
    ($app:expr, $username:expr, $pin:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "username": $username, "pin": $pin }))
            .to_request();
        let login: LoginResource = test::call_and_read_body_json(&$app, req).await;
        format!("Bearer {}", login.token)
    }};
}


fn frigate_message(kind: &str, id: &str, camera: &str, score: f64, end_time: Option<f64>) -> Value {
    json!({
        "type": kind,
        "before": null,
        "after": {
            "id": id,
            "camera": camera,
            "label": "person",
            "top_score": score,
            "score": score,
            "false_positive": false,
            "start_time": 1_700_000_000.25,
            "end_time": end_time,
            "current_zones": ["porch"],
            "entered_zones": ["porch"],
            "has_snapshot": true,
            "has_clip": end_time.is_some(),
        }
    })
}


#[actix_web::test]
async fn health_is_public() {
    let h = harness(&[]);
    let app = init_app!(h);

    let req = test::TestRequest::get().uri("/api/health").to_request();
    let health: Health = test::call_and_read_body_json(&app, req).await;

    assert_eq!(health.status, "ok");
    assert_eq!(health.mqtt, "disabled");
}


#[actix_web::test]
async fn session_lifecycle() {
    let h = harness(&[]);
    let app = init_app!(h);

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "username": "admin", "pin": "9999" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "invalid username or PIN");

    let token = login!(app, "admin", "1234");

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header((AUTHORIZATION, token.clone()))
        .to_request();
    let me: UserResource = test::call_and_read_body_json(&app, req).await;
    assert_eq!(me.username, "admin");
    assert_eq!(me.role, Role::Admin);

    let req = test::TestRequest::post()
        .uri("/api/auth/logout")
        .insert_header((AUTHORIZATION, token.clone()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header((AUTHORIZATION, token))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
}


#[actix_web::test]
async fn token_may_be_passed_as_query_parameter() {
    let h = harness(&[]);
    let app = init_app!(h);

    let token = login!(app, "guest", "5678");
    let token = token.trim_start_matches("Bearer ");

    let req = test::TestRequest::get()
        .uri(&format!("/api/auth/me?access_token={}", token))
        .to_request();
    let me: UserResource = test::call_and_read_body_json(&app, req).await;
    assert_eq!(me.username, "guest");
}


#[actix_web::test]
async fn admin_routes_are_guarded() {
    let h = harness(&[]);
    let app = init_app!(h);

    let req = test::TestRequest::get().uri("/api/cameras").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let guest = login!(app, "guest", "5678");

    let req = test::TestRequest::get()
        .uri("/api/cameras")
        .insert_header((AUTHORIZATION, guest.clone()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::put()
        .uri("/api/cameras")
        .insert_header((AUTHORIZATION, guest.clone()))
        .set_json(json!({ "name": "Porch", "frigateName": "porch" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri("/api/users")
        .insert_header((AUTHORIZATION, guest))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
}


#[actix_web::test]
async fn camera_management() {
    let h = harness(&[]);
    let app = init_app!(h);
    let admin = login!(app, "admin", "1234");

    let req = test::TestRequest::put()
        .uri("/api/cameras")
        .insert_header((AUTHORIZATION, admin.clone()))
        .set_json(json!({ "name": "Front Door", "frigateName": "front_door" }))
        .to_request();
    let camera: CameraResource = test::call_and_read_body_json(&app, req).await;
    assert_eq!(camera.device_id, "front_door");
    assert!(!camera.online);

    // Frigate names are unique
    let req = test::TestRequest::put()
        .uri("/api/cameras")
        .insert_header((AUTHORIZATION, admin.clone()))
        .set_json(json!({ "name": "Again", "frigateName": "front_door", "deviceId": "other" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/cameras/{}", camera.id))
        .insert_header((AUTHORIZATION, admin.clone()))
        .set_json(json!({ "notify": false, "streamUrl": "http://nvr/front.m3u8" }))
        .to_request();
    let patched: CameraResource = test::call_and_read_body_json(&app, req).await;
    assert!(!patched.notify);
    assert_eq!(patched.stream_url.as_deref(), Some("http://nvr/front.m3u8"));

    // Commands need a broker
    let req = test::TestRequest::post()
        .uri(&format!("/api/cameras/{}/command", camera.id))
        .insert_header((AUTHORIZATION, admin.clone()))
        .set_json(json!({ "command": "reboot" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::SERVICE_UNAVAILABLE);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/cameras/{}", camera.id))
        .insert_header((AUTHORIZATION, admin.clone()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get()
        .uri(&format!("/api/cameras/{}", camera.id))
        .insert_header((AUTHORIZATION, admin))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}


#[actix_web::test]
async fn frigate_event_lifecycle() {
    let h = harness(&[]);
    let app = init_app!(h);
    let admin = login!(app, "admin", "1234");

    let req = test::TestRequest::put()
        .uri("/api/cameras")
        .insert_header((AUTHORIZATION, admin.clone()))
        .set_json(json!({ "name": "Front Door", "frigateName": "front_door" }))
        .to_request();
    let camera: CameraResource = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/api/webhooks/frigate")
        .set_json(frigate_message("new", "evt-1", "front_door", 0.7, None))
        .to_request();
    let created: WebhookResult = test::call_and_read_body_json(&app, req).await;
    assert_eq!(created.status, "created");
    let event = created.event.unwrap();
    assert_eq!(event.camera_id, camera.id);
    assert_eq!(event.started_at, 1_700_000_000);

    let req = test::TestRequest::post()
        .uri("/api/webhooks/frigate")
        .set_json(frigate_message("update", "evt-1", "front_door", 0.9, None))
        .to_request();
    let updated: WebhookResult = test::call_and_read_body_json(&app, req).await;
    assert_eq!(updated.status, "updated");

    let req = test::TestRequest::post()
        .uri("/api/webhooks/frigate")
        .set_json(frigate_message("end", "evt-1", "front_door", 0.8, Some(1_700_000_030.0)))
        .to_request();
    let ended: WebhookResult = test::call_and_read_body_json(&app, req).await;
    let ended = ended.event.unwrap();
    assert_eq!(ended.id, event.id);
    assert_eq!(ended.score, 0.9);
    assert_eq!(ended.ended_at, Some(1_700_000_030));
    assert!(ended.has_clip);

    let req = test::TestRequest::get()
        .uri("/api/events?acknowledged=false")
        .insert_header((AUTHORIZATION, admin.clone()))
        .to_request();
    let list: EventList = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list.total, 1);
    assert_eq!(list.events[0].frigate_id, "evt-1");

    let req = test::TestRequest::patch()
        .uri(&format!("/api/events/{}", event.id))
        .insert_header((AUTHORIZATION, admin.clone()))
        .set_json(json!({ "acknowledged": true }))
        .to_request();
    let acked: EventResource = test::call_and_read_body_json(&app, req).await;
    assert!(acked.acknowledged);

    let req = test::TestRequest::post()
        .uri("/api/events/acknowledge")
        .insert_header((AUTHORIZATION, admin.clone()))
        .set_json(json!({}))
        .to_request();
    let result: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(result["acknowledged"], 0);

    // Nothing has been downloaded for this event
    let req = test::TestRequest::get()
        .uri(&format!("/api/events/{}/clip", event.id))
        .insert_header((AUTHORIZATION, admin))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}


#[actix_web::test]
async fn webhook_ignores_unknown_cameras() {
    let h = harness(&[]);
    let app = init_app!(h);
    let admin = login!(app, "admin", "1234");

    let req = test::TestRequest::post()
        .uri("/api/webhooks/frigate")
        .set_json(frigate_message("new", "evt-1", "backyard", 0.7, None))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: WebhookResult = test::read_body_json(res).await;
    assert_eq!(body.status, "ignored");

    let req = test::TestRequest::get()
        .uri("/api/events")
        .insert_header((AUTHORIZATION, admin))
        .to_request();
    let list: EventList = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list.total, 0);
}


#[actix_web::test]
async fn webhook_secret_is_enforced() {
    let h = harness(&[("PW_WEBHOOK_SECRET", "hunter2")]);
    let app = init_app!(h);

    let req = test::TestRequest::post()
        .uri("/api/webhooks/frigate")
        .set_json(frigate_message("new", "evt-1", "porch", 0.7, None))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri("/api/webhooks/frigate")
        .insert_header(("X-Webhook-Secret", "hunter2"))
        .set_json(frigate_message("new", "evt-1", "porch", 0.7, None))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

    // The secret is checked before the body is parsed
    let req = test::TestRequest::post()
        .uri("/api/webhooks/frigate")
        .insert_header(("X-Webhook-Secret", "hunter3"))
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{not json")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri("/api/webhooks/frigate")
        .insert_header(("X-Webhook-Secret", "hunter2"))
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert!(body["error"].as_str().unwrap().starts_with("invalid Frigate payload"));
}


#[actix_web::test]
async fn webhook_ignores_false_positives_and_disabled_cameras() {
    let h = harness(&[]);
    let app = init_app!(h);
    let admin = login!(app, "admin", "1234");

    for (name, enabled) in [("front_door", true), ("garage", false)] {
        let req = test::TestRequest::put()
            .uri("/api/cameras")
            .insert_header((AUTHORIZATION, admin.clone()))
            .set_json(json!({ "name": name, "frigateName": name, "enabled": enabled }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    let mut false_positive = frigate_message("new", "evt-1", "front_door", 0.4, None);
    false_positive["after"]["false_positive"] = json!(true);

    let ignored = [
        false_positive,
        frigate_message("new", "evt-2", "garage", 0.8, None),
    ];
    for message in ignored {
        let req = test::TestRequest::post()
            .uri("/api/webhooks/frigate")
            .set_json(message)
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        let body: WebhookResult = test::read_body_json(res).await;
        assert_eq!(body.status, "ignored");
        assert!(body.event.is_none());
    }

    let req = test::TestRequest::get()
        .uri("/api/events")
        .insert_header((AUTHORIZATION, admin))
        .to_request();
    let list: EventList = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list.total, 0);
}


#[actix_web::test]
async fn late_delivery_creates_event_and_notifies() {
    // Deliveries to this address fail in the background; only the decision matters here
    let h = harness(&[("PW_NTFY_TOPIC", "porch"), ("PW_NTFY_URL", "http://127.0.0.1:9")]);
    let app = init_app!(h);
    let admin = login!(app, "admin", "1234");

    let req = test::TestRequest::put()
        .uri("/api/cameras")
        .insert_header((AUTHORIZATION, admin.clone()))
        .set_json(json!({ "name": "Front Door", "frigateName": "front_door" }))
        .to_request();
    let camera: CameraResource = test::call_and_read_body_json(&app, req).await;

    // The "new" message for evt-7 never arrived
    let req = test::TestRequest::post()
        .uri("/api/webhooks/frigate")
        .set_json(frigate_message("update", "evt-7", "front_door", 0.8, None))
        .to_request();
    let created: WebhookResult = test::call_and_read_body_json(&app, req).await;
    assert_eq!(created.status, "created");
    assert_eq!(created.event.unwrap().frigate_id, "evt-7");

    // Notifying started the camera's cooldown
    let camera = {
        let mut conn = h.state.pool.get_ref().get().unwrap();
        cameras::get(&mut conn, camera.id).unwrap()
    };
    let decision = h.state.notifier.evaluate(&NotificationSettings::default(), &camera, "person", Local::now());
    assert_eq!(decision, Decision::Cooldown);

    let req = test::TestRequest::post()
        .uri("/api/webhooks/frigate")
        .set_json(frigate_message("end", "evt-8", "front_door", 0.6, Some(1_700_000_030.0)))
        .to_request();
    let created: WebhookResult = test::call_and_read_body_json(&app, req).await;
    assert_eq!(created.status, "created");
    let event = created.event.unwrap();
    assert_eq!(event.ended_at, Some(1_700_000_030));

    let req = test::TestRequest::get()
        .uri("/api/events")
        .insert_header((AUTHORIZATION, admin))
        .to_request();
    let list: EventList = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list.total, 2);
}


#[actix_web::test]
async fn last_administrator_is_protected() {
    let h = harness(&[]);
    let app = init_app!(h);
    let admin = login!(app, "admin", "1234");

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header((AUTHORIZATION, admin.clone()))
        .to_request();
    let me: UserResource = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::patch()
        .uri(&format!("/api/users/{}", me.id))
        .insert_header((AUTHORIZATION, admin.clone()))
        .set_json(json!({ "role": "user" }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "cannot demote the last administrator");

    let req = test::TestRequest::delete()
        .uri(&format!("/api/users/{}", me.id))
        .insert_header((AUTHORIZATION, admin.clone()))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "cannot delete your own account");

    let req = test::TestRequest::get()
        .uri(&format!("/api/users/{}", me.id))
        .insert_header((AUTHORIZATION, admin))
        .to_request();
    let user: UserResource = test::call_and_read_body_json(&app, req).await;
    assert_eq!(user.role, Role::Admin);
}


#[actix_web::test]
async fn pin_change_revokes_other_sessions() {
    let h = harness(&[]);
    let app = init_app!(h);
    let current = login!(app, "guest", "5678");
    let other = login!(app, "guest", "5678");

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header((AUTHORIZATION, current.clone()))
        .to_request();
    let me: UserResource = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::patch()
        .uri(&format!("/api/users/{}", me.id))
        .insert_header((AUTHORIZATION, current.clone()))
        .set_json(json!({ "pin": "2468" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header((AUTHORIZATION, current))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header((AUTHORIZATION, other))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "username": "guest", "pin": "5678" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    let token = login!(app, "guest", "2468");
    assert!(token.starts_with("Bearer "));
}


#[actix_web::test]
async fn users_may_resubmit_their_own_role() {
    let h = harness(&[]);
    let app = init_app!(h);
    let guest = login!(app, "guest", "5678");

    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .insert_header((AUTHORIZATION, guest.clone()))
        .to_request();
    let me: UserResource = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::patch()
        .uri(&format!("/api/users/{}", me.id))
        .insert_header((AUTHORIZATION, guest.clone()))
        .set_json(json!({ "role": "user", "displayName": "G" }))
        .to_request();
    let patched: UserResource = test::call_and_read_body_json(&app, req).await;
    assert_eq!(patched.display_name, "G");
    assert_eq!(patched.role, Role::User);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/users/{}", me.id))
        .insert_header((AUTHORIZATION, guest))
        .set_json(json!({ "role": "admin" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
}


#[actix_web::test]
async fn repeated_login_failures_are_throttled() {
    let h = harness(&[]);
    let app = init_app!(h);

    for _ in 0..5 {
        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "username": "guest", "pin": "0000" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    // Even the right PIN is refused until the window passes
    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(json!({ "username": "guest", "pin": "5678" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::TOO_MANY_REQUESTS);

    // Other accounts are unaffected
    let token = login!(app, "admin", "1234");
    assert!(token.starts_with("Bearer "));
}


#[actix_web::test]
async fn settings_are_validated_and_admin_only() {
    let h = harness(&[]);
    let app = init_app!(h);
    let admin = login!(app, "admin", "1234");
    let guest = login!(app, "guest", "5678");

    let req = test::TestRequest::get()
        .uri("/api/settings")
        .insert_header((AUTHORIZATION, guest.clone()))
        .to_request();
    let settings: Settings = test::call_and_read_body_json(&app, req).await;
    assert_eq!(settings, Settings::default());

    let update = json!({ "retention": { "days": 7 } });

    let req = test::TestRequest::patch()
        .uri("/api/settings")
        .insert_header((AUTHORIZATION, guest))
        .set_json(&update)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::patch()
        .uri("/api/settings")
        .insert_header((AUTHORIZATION, admin.clone()))
        .set_json(&update)
        .to_request();
    let settings: Settings = test::call_and_read_body_json(&app, req).await;
    assert_eq!(settings.retention.days, 7);

    let mut notifications = serde_json::to_value(&settings.notifications).unwrap();
    notifications["cooldownSecs"] = json!(100_000);
    let req = test::TestRequest::patch()
        .uri("/api/settings")
        .insert_header((AUTHORIZATION, admin))
        .set_json(json!({ "notifications": notifications }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}


#[actix_web::test]
async fn malformed_requests_get_json_errors() {
    let h = harness(&[]);
    let app = init_app!(h);

    let req = test::TestRequest::post()
        .uri("/api/auth/login")
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(res).await;
    assert!(body["error"].is_string());

    let req = test::TestRequest::get().uri("/api/nothing/here").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["error"], "no such resource");
}
