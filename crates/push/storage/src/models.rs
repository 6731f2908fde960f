//! Database models.

use diesel::prelude::*;

use crate::schema::devices;

/// Device record.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable)]
#[diesel(table_name = devices)]
#[diesel(primary_key(registration_id))]
pub struct DeviceRow {
    pub registration_id: String,
    pub application_id: Option<String>,
    pub active: bool,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

/// New device for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = devices)]
pub struct NewDevice<'a> {
    pub registration_id: &'a str,
    pub application_id: Option<&'a str>,
    pub active: bool,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}
