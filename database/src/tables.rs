diesel::table! {
    admin_sessions (token_hash) {
        token_hash -> Text,
        user_id -> BigInt,
        created_at -> Timestamp,
        expires_at -> Timestamp,
    }
}

diesel::table! {
    admin_users (id) {
        id -> BigInt,
        username -> Text,
        password_hash -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    documents (id) {
        id -> BigInt,
        title -> Text,
        category -> Text,
        file_data -> Binary,
        file_filename -> Text,
        file_mimetype -> Text,
        description -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    results (id) {
        id -> BigInt,
        category -> Text,
        year -> Text,
        image_data -> Binary,
        image_filename -> Text,
        image_mimetype -> Text,
        description -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::joinable!(admin_sessions -> admin_users (user_id));

diesel::allow_tables_to_appear_in_same_query!(admin_sessions, admin_users, documents, results);
