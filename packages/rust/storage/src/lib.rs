//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! [`TenderStore`] is the persistence contract the ingestion pipeline writes
//! through. [`Storage`] implements it on a local libSQL database holding
//! tenders, the organisation registry, per-source statistics and settings.
//!
//! **Access rules:**
//! - CLI runs: read-write (sole writer) via [`Storage::open`]
//! - Reporting commands: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tenderwatch_shared::{NormalizedTender, OrganisationKind, Result, SourceStats, TenderwatchError};
use uuid::Uuid;

/// Settings key holding the timestamp of the most recent completed run.
const LAST_RUN_KEY: &str = "last_run_at";

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// Persistence operations required by an ingestion run.
///
/// Implementations must be idempotent: inserting a notice whose link or ocid
/// is already stored is a no-op reported as `Ok(false)`.
#[async_trait]
pub trait TenderStore: Send + Sync {
    /// Insert `tender` unless its link or ocid is already stored.
    /// Returns `true` when a new row was written.
    async fn insert_if_absent(&self, tender: &NormalizedTender) -> Result<bool>;

    /// Register an organisation name under `kind`. Returns `true` when new.
    async fn insert_organisation_if_absent(
        &self,
        name: &str,
        kind: OrganisationKind,
    ) -> Result<bool>;

    /// Record when the most recent run completed.
    async fn set_last_run_timestamp(&self, at: DateTime<Utc>) -> Result<()>;

    /// Record a completed run of `source_key` that added `added` notices.
    async fn update_source_stats(
        &self,
        source_key: &str,
        at: DateTime<Utc>,
        added: u64,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// libSQL implementation
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn db_err(e: libsql::Error) -> TenderwatchError {
    TenderwatchError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TenderwatchError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TenderwatchError::Storage(format!(
                "database not found: {} (run an ingestion first)",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        TenderwatchError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(TenderwatchError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tender queries
    // -----------------------------------------------------------------------

    /// Total number of stored notices.
    pub async fn count_tenders(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM tenders", params![]).await
    }

    /// Look up a stored notice by its absolute link.
    pub async fn get_tender_by_link(&self, link: &str) -> Result<Option<NormalizedTender>> {
        let mut rows = self
            .conn
            .query(
                "SELECT title, link, published, description, organisation, supplier, ocid,
                        source_label, scraped_at, tags_json
                 FROM tenders WHERE link = ?1",
                params![link],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_tender(&row)?)),
            None => Ok(None),
        }
    }

    /// Most recently scraped notices, newest first.
    pub async fn list_recent_tenders(&self, limit: u32) -> Result<Vec<NormalizedTender>> {
        let mut rows = self
            .conn
            .query(
                "SELECT title, link, published, description, organisation, supplier, ocid,
                        source_label, scraped_at, tags_json
                 FROM tenders ORDER BY scraped_at DESC, rowid DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_tender(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Organisation queries
    // -----------------------------------------------------------------------

    /// Number of registered organisations, optionally restricted to one kind.
    pub async fn count_organisations(&self, kind: Option<OrganisationKind>) -> Result<u64> {
        match kind {
            Some(kind) => {
                self.count(
                    "SELECT COUNT(*) FROM organisations WHERE kind = ?1",
                    params![kind.as_str()],
                )
                .await
            }
            None => self.count("SELECT COUNT(*) FROM organisations", params![]).await,
        }
    }

    // -----------------------------------------------------------------------
    // Stats and settings queries
    // -----------------------------------------------------------------------

    /// Statistics for one source, if it has ever completed a named run.
    pub async fn get_source_stats(&self, source_key: &str) -> Result<Option<SourceStats>> {
        let mut rows = self
            .conn
            .query(
                "SELECT source_key, last_run_at, last_added, total_added
                 FROM source_stats WHERE source_key = ?1",
                params![source_key],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_stats(&row)?)),
            None => Ok(None),
        }
    }

    /// Statistics for every source, ordered by key.
    pub async fn list_source_stats(&self) -> Result<Vec<SourceStats>> {
        let mut rows = self
            .conn
            .query(
                "SELECT source_key, last_run_at, last_added, total_added
                 FROM source_stats ORDER BY source_key",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_stats(&row)?);
        }
        Ok(results)
    }

    /// Timestamp of the most recent completed run, if any.
    pub async fn last_run_at(&self) -> Result<Option<DateTime<Utc>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT value FROM settings WHERE key = ?1",
                params![LAST_RUN_KEY],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let value: String = row.get(0).map_err(db_err)?;
                parse_timestamp(&value).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn count(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<u64> {
        let mut rows = self.conn.query(sql, params).await.map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(db_err)?.max(0) as u64),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl TenderStore for Storage {
    async fn insert_if_absent(&self, tender: &NormalizedTender) -> Result<bool> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let tags_json = serde_json::to_string(&tender.tags)
            .map_err(|e| TenderwatchError::Storage(format!("tags encoding failed: {e}")))?;

        // Both UNIQUE constraints (link, ocid) turn a duplicate into a no-op.
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO tenders
                   (id, title, link, published, description, organisation, supplier, ocid,
                    source_label, scraped_at, tags_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id.as_str(),
                    tender.title.as_str(),
                    tender.link.as_str(),
                    tender.published.as_str(),
                    tender.description.as_str(),
                    tender.organisation.as_deref(),
                    tender.supplier.as_deref(),
                    tender.ocid.as_deref(),
                    tender.source_label.as_str(),
                    tender.scraped_at.to_rfc3339(),
                    tags_json,
                ],
            )
            .await
            .map_err(db_err)?;

        tracing::trace!(link = %tender.link, inserted = (changed > 0), "insert_if_absent");
        Ok(changed > 0)
    }

    async fn insert_organisation_if_absent(
        &self,
        name: &str,
        kind: OrganisationKind,
    ) -> Result<bool> {
        self.check_writable()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(TenderwatchError::validation("organisation name is empty"));
        }

        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO organisations (name, kind, first_seen_at)
                 VALUES (?1, ?2, ?3)",
                params![name, kind.as_str(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    async fn set_last_run_timestamp(&self, at: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![LAST_RUN_KEY, at.to_rfc3339()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn update_source_stats(
        &self,
        source_key: &str,
        at: DateTime<Utc>,
        added: u64,
    ) -> Result<()> {
        self.check_writable()?;
        let added = i64::try_from(added)
            .map_err(|_| TenderwatchError::validation(format!("added count {added} overflows")))?;

        self.conn
            .execute(
                "INSERT INTO source_stats (source_key, last_run_at, last_added, total_added)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(source_key) DO UPDATE SET
                   last_run_at = excluded.last_run_at,
                   last_added = excluded.last_added,
                   total_added = source_stats.total_added + excluded.last_added",
                params![source_key, at.to_rfc3339(), added],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TenderwatchError::Storage(format!("invalid date '{s}': {e}")))
}

fn row_to_tender(row: &libsql::Row) -> Result<NormalizedTender> {
    let tags_json: String = row.get(9).map_err(db_err)?;
    let tags = serde_json::from_str(&tags_json)
        .map_err(|e| TenderwatchError::Storage(format!("invalid tags column: {e}")))?;
    let scraped_at: String = row.get(8).map_err(db_err)?;

    Ok(NormalizedTender {
        title: row.get::<String>(0).map_err(db_err)?,
        link: row.get::<String>(1).map_err(db_err)?,
        published: row.get::<String>(2).map_err(db_err)?,
        description: row.get::<String>(3).map_err(db_err)?,
        organisation: row.get::<String>(4).ok(),
        supplier: row.get::<String>(5).ok(),
        ocid: row.get::<String>(6).ok(),
        source_label: row.get::<String>(7).map_err(db_err)?,
        scraped_at: parse_timestamp(&scraped_at)?,
        tags,
    })
}

fn row_to_stats(row: &libsql::Row) -> Result<SourceStats> {
    let last_run_at: String = row.get(1).map_err(db_err)?;
    Ok(SourceStats {
        source_key: row.get::<String>(0).map_err(db_err)?,
        last_run_at: parse_timestamp(&last_run_at)?,
        last_added: row.get::<i64>(2).map_err(db_err)?.max(0) as u64,
        total_added: row.get::<i64>(3).map_err(db_err)?.max(0) as u64,
    })
}
