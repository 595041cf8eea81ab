diesel::table! {
    cameras (id) {
        id -> Integer,
        name -> Text,
        frigate_name -> Text,
        device_id -> Text,
        stream_url -> Nullable<Text>,
        enabled -> Bool,
        notify -> Bool,
        last_seen -> Nullable<BigInt>,
        created_at -> BigInt,
    }
}

diesel::table! {
    events (id) {
        id -> Integer,
        frigate_id -> Text,
        camera_id -> Integer,
        label -> Text,
        score -> Double,
        zones -> Text,
        started_at -> BigInt,
        ended_at -> Nullable<BigInt>,
        has_snapshot -> Bool,
        has_clip -> Bool,
        thumbnail_path -> Nullable<Text>,
        clip_path -> Nullable<Text>,
        acknowledged -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    sessions (token) {
        token -> Text,
        user_id -> Integer,
        created_at -> BigInt,
        expires_at -> BigInt,
    }
}

diesel::table! {
    settings (name) {
        name -> Text,
        value -> Text,
    }
}

diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,
        display_name -> Text,
        pin_hash -> Text,
        role -> Text,
        created_at -> BigInt,
    }
}

diesel::joinable!(events -> cameras (camera_id));
diesel::joinable!(sessions -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    cameras,
    events,
    sessions,
    settings,
    users,
);
