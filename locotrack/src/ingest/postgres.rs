//! Optional PostgreSQL sink.
//!
//! # Schema
//!
//! ```sql
//! CREATE EXTENSION IF NOT EXISTS postgis;
//!
//! CREATE TABLE locations (
//!     host_id     INT NOT NULL,
//!     received_at TIMESTAMPTZ NOT NULL,
//!     fix_time    TIMESTAMPTZ NOT NULL,
//!     elevation   DOUBLE PRECISION,
//!     position    GEOGRAPHY(POINT, 4326) NOT NULL,
//!     PRIMARY KEY (host_id, fix_time)
//! );
//! ```
//!
//! The stored `fix_time` is the sampling timestamp moved back by the fix age
//! (`elapsedMs`). Re-sending a batch hits the primary key; such duplicates
//! are expected and ignored.

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::admission::AdmittedFix;
use super::SinkError;

const INSERT_LOCATION: &str = "INSERT INTO locations \
     (host_id, received_at, fix_time, elevation, position) \
     VALUES ($1, to_timestamp($2), to_timestamp($3), $4, \
     ST_SetSRID(ST_MakePoint($5, $6), 4326))";

/// Outcome of a single insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Relational sink backed by a single-connection pool.
#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    /// Connect using a `postgres://` URL.
    pub async fn connect(url: &str) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new().max_connections(1).connect(url).await?;
        info!("Connected to relational store");
        Ok(Self { pool })
    }

    /// Insert one admitted fix for `host_id`.
    pub async fn insert(
        &self,
        host_id: i32,
        received_at: i64,
        fix: &AdmittedFix<'_>,
    ) -> Result<InsertOutcome, SinkError> {
        let result = sqlx::query(INSERT_LOCATION)
            .bind(host_id)
            .bind(received_at as f64)
            .bind(fix.fix_time())
            .bind(fix.location.altitude)
            .bind(fix.longitude)
            .bind(fix.latitude)
            .execute(&self.pool)
            .await
            .map(|_| ());

        let outcome = insert_outcome(result)?;
        if outcome == InsertOutcome::Duplicate {
            debug!(host_id, ts = fix.timestamp, "Duplicate fix ignored");
        }
        Ok(outcome)
    }
}

/// Unique violations mean the fix is already stored.
fn insert_outcome(result: Result<(), sqlx::Error>) -> Result<InsertOutcome, SinkError> {
    match result {
        Ok(()) => Ok(InsertOutcome::Inserted),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(InsertOutcome::Duplicate),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::AdmissionPolicy;
    use crate::record::{Location, Record};
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct FakeDatabaseError(ErrorKind);

    impl fmt::Display for FakeDatabaseError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }

    impl StdError for FakeDatabaseError {}

    impl DatabaseError for FakeDatabaseError {
        fn message(&self) -> &str {
            "fake"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            None
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            match self.0 {
                ErrorKind::UniqueViolation => ErrorKind::UniqueViolation,
                _ => ErrorKind::Other,
            }
        }
    }

    fn database_error(kind: ErrorKind) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDatabaseError(kind)))
    }

    #[test]
    fn test_unique_violation_is_duplicate() {
        assert_eq!(insert_outcome(Ok(())).unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            insert_outcome(Err(database_error(ErrorKind::UniqueViolation))).unwrap(),
            InsertOutcome::Duplicate
        );
    }

    #[test]
    fn test_other_database_errors_propagate() {
        assert!(matches!(
            insert_outcome(Err(database_error(ErrorKind::ForeignKeyViolation))),
            Err(SinkError::Database(_))
        ));
        assert!(matches!(
            insert_outcome(Err(sqlx::Error::PoolTimedOut)),
            Err(SinkError::Database(_))
        ));
    }

    // Needs a PostGIS-enabled database named by DATABASE_URL:
    // DATABASE_URL=postgres://... cargo test -- --ignored

    #[tokio::test]
    #[ignore = "requires PostgreSQL with PostGIS"]
    async fn test_reinserting_a_fix_is_duplicate() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let sink = PostgresSink::connect(&url).await.unwrap();

        // A temporary table shadows any real `locations` on this connection.
        sqlx::query(
            "CREATE TEMP TABLE locations (
                host_id     INT NOT NULL,
                received_at TIMESTAMPTZ NOT NULL,
                fix_time    TIMESTAMPTZ NOT NULL,
                elevation   DOUBLE PRECISION,
                position    GEOGRAPHY(POINT, 4326) NOT NULL,
                PRIMARY KEY (host_id, fix_time)
            )",
        )
        .execute(&sink.pool)
        .await
        .unwrap();

        let record = Record::Location(Location {
            latitude: Some(45.0),
            longitude: Some(9.0),
            altitude: Some(120.0),
            elapsed_ms: Some(1500),
            ..Default::default()
        });
        let fix = AdmissionPolicy::default()
            .admit(1_700_000_000, &record, 1_700_000_010)
            .unwrap();

        assert_eq!(
            sink.insert(7, 1_700_000_010, &fix).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            sink.insert(7, 1_700_000_020, &fix).await.unwrap(),
            InsertOutcome::Duplicate
        );

        let (fix_time, lon, lat): (f64, f64, f64) = sqlx::query_as(
            "SELECT EXTRACT(EPOCH FROM fix_time)::float8,
                    ST_X(position::geometry), ST_Y(position::geometry)
             FROM locations WHERE host_id = 7",
        )
        .fetch_one(&sink.pool)
        .await
        .unwrap();
        assert!((fix_time - 1_699_999_998.5).abs() < 1e-6);
        assert_eq!((lon, lat), (9.0, 45.0));
    }
}
