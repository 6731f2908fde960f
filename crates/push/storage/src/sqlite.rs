//! SQLite storage implementation.

use color_eyre::eyre::WrapErr as _;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;

use crate::models::*;
use crate::schema::*;
use crate::traits::*;

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// SQLite-backed device registry.
#[derive(Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    /// Create a new registry from a database URL.
    pub fn new(database_url: &str) -> color_eyre::eyre::Result<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .wrap_err("failed to create connection pool")?;

        Ok(Self { pool })
    }

    /// Open the database and bring its schema up to date.
    pub fn open(database_url: &str) -> color_eyre::eyre::Result<Self> {
        let registry = Self::new(database_url)?;
        registry.run_migrations()?;
        Ok(registry)
    }

    /// Run migrations.
    pub fn run_migrations(&self) -> color_eyre::eyre::Result<()> {
        use diesel_migrations::MigrationHarness as _;

        let mut conn = self
            .pool
            .get()
            .wrap_err("failed to get connection for migrations")?;

        conn.run_pending_migrations(crate::MIGRATIONS)
            .map_err(|e| color_eyre::eyre::eyre!("migration failed: {}", e))?;

        Ok(())
    }

    fn conn(&self) -> color_eyre::eyre::Result<PooledConnection<ConnectionManager<SqliteConnection>>> {
        self.pool
            .get()
            .wrap_err("failed to get database connection")
    }
}

impl DeviceRegistry for SqliteRegistry {
    fn deactivate(&self, token: &str) -> color_eyre::eyre::Result<()> {
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();

        let updated = diesel::update(
            devices::table
                .filter(devices::registration_id.eq(token))
                .filter(devices::active.eq(true)),
        )
        .set((devices::active.eq(false), devices::updated_at.eq(now)))
        .execute(&mut conn)
        .wrap_err("failed to deactivate device")?;

        if updated > 0 {
            tracing::info!(registration_id = %token, "device deactivated");
        } else {
            tracing::debug!(registration_id = %token, "no active device to deactivate");
        }

        Ok(())
    }
}

impl DeviceStore for SqliteRegistry {
    fn register(&self, token: &str, application_id: Option<&str>) -> color_eyre::eyre::Result<()> {
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().naive_utc();

        let new_device = NewDevice {
            registration_id: token,
            application_id,
            active: true,
            created_at: now,
            updated_at: now,
        };

        diesel::insert_into(devices::table)
            .values(&new_device)
            .on_conflict(devices::registration_id)
            .do_update()
            .set((
                devices::application_id.eq(application_id),
                devices::active.eq(true),
                devices::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .wrap_err("failed to register device")?;

        Ok(())
    }

    fn device(&self, token: &str) -> color_eyre::eyre::Result<Option<DeviceRow>> {
        let mut conn = self.conn()?;

        devices::table
            .filter(devices::registration_id.eq(token))
            .select(DeviceRow::as_select())
            .first(&mut conn)
            .optional()
            .wrap_err("failed to load device")
    }

    fn active_tokens(&self, application_id: Option<&str>) -> color_eyre::eyre::Result<Vec<String>> {
        let mut conn = self.conn()?;

        let mut query = devices::table
            .filter(devices::active.eq(true))
            .select(devices::registration_id)
            .order((devices::created_at.asc(), devices::registration_id.asc()))
            .into_boxed();

        if let Some(application_id) = application_id {
            query = query.filter(devices::application_id.eq(application_id));
        }

        query
            .load(&mut conn)
            .wrap_err("failed to load active devices")
    }
}
