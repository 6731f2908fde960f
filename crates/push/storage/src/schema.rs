//! Diesel schema definitions.

diesel::table! {
    devices (registration_id) {
        registration_id -> Text,
        application_id -> Nullable<Text>,
        active -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}
