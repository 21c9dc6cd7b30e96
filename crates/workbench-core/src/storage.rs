//! SQLite persistence for incidents, embeddings and cluster runs.
//!
//! One connection behind a mutex. Every multi-row write (incident import,
//! embedding batch, cluster run) is a single transaction, so a run is either
//! fully persisted or absent.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::VectorCache;
use crate::clustering::{DistanceMetric, LinkageMethod};
use crate::error::{Result, StorageError};
use crate::model::{Cluster, ClusterRun, EmbeddingVector, Incident, IncidentId, Severity};
use crate::orchestrator::RunSink;

/// Schema version written to `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Listing row for a stored run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub requested_k: Option<usize>,
    pub method: LinkageMethod,
    pub metric: DistanceMetric,
    pub k: usize,
    pub quality_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub incident_count: usize,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store at the provided sqlite path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(StorageError::from)?;
        let store = Self::init(conn)?;
        debug!(path = %path.display(), "Opened incident store");
        Ok(store)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(StorageError::from)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let current: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(StorageError::from)?;
        if current > SCHEMA_VERSION {
            return Err(StorageError::SchemaTooNew {
                current,
                supported: SCHEMA_VERSION,
            }
            .into());
        }
        conn.pragma_update(None, "foreign_keys", 1)
            .map_err(StorageError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(StorageError::from)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(StorageError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::result::Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.conn()?;
        Ok(conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(StorageError::from)?)
    }

    // --- incidents ---------------------------------------------------------

    /// Insert or update one incident. Returns true when it already existed.
    pub fn upsert_incident(&self, incident: &Incident) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StorageError::from)?;
        let existed = upsert_incident_tx(&tx, incident)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(existed)
    }

    /// Insert or update many incidents in one transaction.
    pub fn upsert_incidents(&self, incidents: &[Incident]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StorageError::from)?;
        for incident in incidents {
            upsert_incident_tx(&tx, incident)?;
        }
        tx.commit().map_err(StorageError::from)?;
        info!(count = incidents.len(), "Stored incidents");
        Ok(incidents.len())
    }

    pub fn incident(&self, id: IncidentId) -> Result<Option<Incident>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1"),
                params![id],
                decode_incident_row,
            )
            .optional()
            .map_err(StorageError::from)?)
    }

    /// All incidents ordered by id.
    pub fn incidents(&self) -> Result<Vec<Incident>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {INCIDENT_COLUMNS} FROM incidents ORDER BY id"
            ))
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map([], decode_incident_row)
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(rows)
    }

    /// Incidents whose id is in `ids`, ordered by id. Unknown ids are skipped.
    pub fn incidents_by_ids(&self, ids: &[IncidentId]) -> Result<Vec<Incident>> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(incident) = self.incident(id)? {
                out.push(incident);
            }
        }
        out.sort_by_key(|inc| inc.id);
        out.dedup_by_key(|inc| inc.id);
        Ok(out)
    }

    pub fn incident_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))
            .map_err(StorageError::from)?;
        i64_to_usize(count, "incident_count")
    }

    // --- runs --------------------------------------------------------------

    /// Persist a run with all clusters and members in one transaction.
    pub fn save_run(&self, run: &ClusterRun) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StorageError::from)?;
        tx.execute(
            "INSERT INTO cluster_runs (
                run_id, requested_k, method, metric, k, quality_score, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.run_id,
                run.requested_k.map(|k| usize_to_i64(k, "requested_k")).transpose()?,
                run.method.as_str(),
                run.metric.as_str(),
                usize_to_i64(run.k, "k")?,
                run.quality_score,
                encode_time(run.created_at),
            ],
        )
        .map_err(StorageError::from)?;

        for cluster in &run.clusters {
            let label = usize_to_i64(cluster.label, "label")?;
            tx.execute(
                "INSERT INTO clusters (run_id, label, name, summary) VALUES (?1, ?2, ?3, ?4)",
                params![run.run_id, label, cluster.name, cluster.summary],
            )
            .map_err(StorageError::from)?;
            for &incident_id in &cluster.incident_ids {
                tx.execute(
                    "INSERT INTO cluster_members (run_id, label, incident_id) VALUES (?1, ?2, ?3)",
                    params![run.run_id, label, incident_id],
                )
                .map_err(StorageError::from)?;
            }
        }
        tx.commit().map_err(StorageError::from)?;
        info!(
            run_id = %run.run_id,
            k = run.k,
            incidents = run.incident_count(),
            "Persisted cluster run"
        );
        Ok(())
    }

    /// Load a run with its clusters. Members are sorted ascending.
    pub fn run(&self, run_id: &str) -> Result<Option<ClusterRun>> {
        let conn = self.conn()?;
        let Some(mut run) = conn
            .query_row(
                "SELECT run_id, requested_k, method, metric, k, quality_score, created_at
                 FROM cluster_runs WHERE run_id = ?1",
                params![run_id],
                decode_run_row,
            )
            .optional()
            .map_err(StorageError::from)?
        else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare("SELECT label, name, summary FROM clusters WHERE run_id = ?1 ORDER BY label")
            .map_err(StorageError::from)?;
        let mut clusters = stmt
            .query_map(params![run_id], |row| {
                Ok(Cluster {
                    label: i64_to_usize_sql(row.get(0)?, 0)?,
                    name: row.get(1)?,
                    summary: row.get(2)?,
                    incident_ids: Vec::new(),
                })
            })
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;

        let mut stmt = conn
            .prepare(
                "SELECT label, incident_id FROM cluster_members
                 WHERE run_id = ?1 ORDER BY label, incident_id",
            )
            .map_err(StorageError::from)?;
        let members = stmt
            .query_map(params![run_id], |row| {
                Ok((i64_to_usize_sql(row.get(0)?, 0)?, row.get::<_, i64>(1)?))
            })
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        for (label, incident_id) in members {
            if let Some(cluster) = clusters.iter_mut().find(|c| c.label == label) {
                cluster.incident_ids.push(incident_id);
            }
        }

        run.clusters = clusters;
        Ok(Some(run))
    }

    /// Stored runs, newest first.
    pub fn list_runs(&self) -> Result<Vec<RunInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT r.run_id, r.requested_k, r.method, r.metric, r.k, r.quality_score,
                        r.created_at,
                        (SELECT COUNT(*) FROM cluster_members m WHERE m.run_id = r.run_id)
                 FROM cluster_runs r
                 ORDER BY r.created_at DESC, r.run_id",
            )
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map([], |row| {
                let run = decode_run_row(row)?;
                Ok(RunInfo {
                    run_id: run.run_id,
                    requested_k: run.requested_k,
                    method: run.method,
                    metric: run.metric,
                    k: run.k,
                    quality_score: run.quality_score,
                    created_at: run.created_at,
                    incident_count: i64_to_usize_sql(row.get(7)?, 7)?,
                })
            })
            .map_err(StorageError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)?;
        Ok(rows)
    }
}

impl VectorCache for SqliteStore {
    fn get(&self, id: IncidentId) -> Result<Option<EmbeddingVector>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT model, dimension, vector FROM embeddings WHERE incident_id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(StorageError::from)?;
        let Some((model, dimension, blob)) = row else {
            return Ok(None);
        };
        let values = decode_f32_blob(&blob, i64_to_usize(dimension, "dimension")?)?;
        let vector = EmbeddingVector::new(id, model, values).map_err(StorageError::InvalidValue)?;
        Ok(Some(vector))
    }

    fn replace(&self, vector: &EmbeddingVector) -> Result<()> {
        let conn = self.conn()?;
        replace_embedding(&conn, vector)
    }

    fn replace_many(&self, vectors: &[EmbeddingVector]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StorageError::from)?;
        for vector in vectors {
            replace_embedding(&tx, vector)?;
        }
        tx.commit().map_err(StorageError::from)?;
        Ok(vectors.len())
    }

    fn len(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))
            .map_err(StorageError::from)?;
        i64_to_usize(count, "embedding_count")
    }
}

impl RunSink for SqliteStore {
    fn save_run(&self, run: &ClusterRun) -> Result<()> {
        Self::save_run(self, run)
    }
}

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS incidents (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    occurred_at TEXT NOT NULL,
    resolved_at TEXT,
    severity TEXT NOT NULL CHECK(severity IN ('SEV1', 'SEV2', 'SEV3', 'SEV4', 'UNKNOWN')),
    assignee TEXT,
    status TEXT,
    project TEXT
);

CREATE TABLE IF NOT EXISTS embeddings (
    incident_id INTEGER PRIMARY KEY
        REFERENCES incidents(id) ON DELETE CASCADE,
    model TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    vector BLOB NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cluster_runs (
    run_id TEXT PRIMARY KEY,
    requested_k INTEGER,
    method TEXT NOT NULL CHECK(method IN ('average', 'complete', 'single', 'ward')),
    metric TEXT NOT NULL CHECK(metric IN ('cosine', 'euclidean')),
    k INTEGER NOT NULL,
    quality_score REAL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS clusters (
    run_id TEXT NOT NULL REFERENCES cluster_runs(run_id) ON DELETE CASCADE,
    label INTEGER NOT NULL,
    name TEXT,
    summary TEXT,
    PRIMARY KEY(run_id, label)
);

CREATE TABLE IF NOT EXISTS cluster_members (
    run_id TEXT NOT NULL,
    label INTEGER NOT NULL,
    incident_id INTEGER NOT NULL,
    PRIMARY KEY(run_id, incident_id),
    FOREIGN KEY(run_id, label) REFERENCES clusters(run_id, label) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cluster_members_label
    ON cluster_members(run_id, label);
";

const INCIDENT_COLUMNS: &str =
    "id, title, description, occurred_at, resolved_at, severity, assignee, status, project";

/// Insert or update one incident. A changed title or description drops the
/// stored embedding in the same transaction, so the next embed pass
/// re-embeds the new text.
fn upsert_incident_tx(tx: &Transaction<'_>, incident: &Incident) -> Result<bool> {
    let previous: Option<(String, String)> = tx
        .query_row(
            "SELECT title, description FROM incidents WHERE id = ?1",
            params![incident.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(StorageError::from)?;
    let text_changed = previous.as_ref().is_some_and(|(title, description)| {
        *title != incident.title || *description != incident.description
    });
    if text_changed {
        let dropped = tx
            .execute(
                "DELETE FROM embeddings WHERE incident_id = ?1",
                params![incident.id],
            )
            .map_err(StorageError::from)?;
        if dropped > 0 {
            debug!(incident_id = incident.id, "Incident text changed; embedding invalidated");
        }
    }
    tx.execute(
        "INSERT INTO incidents (
            id, title, description, occurred_at, resolved_at, severity, assignee, status, project
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            occurred_at = excluded.occurred_at,
            resolved_at = excluded.resolved_at,
            severity = excluded.severity,
            assignee = excluded.assignee,
            status = excluded.status,
            project = excluded.project",
        params![
            incident.id,
            incident.title,
            incident.description,
            encode_time(incident.occurred_at),
            incident.resolved_at.map(encode_time),
            incident.severity.as_str(),
            incident.assignee,
            incident.status,
            incident.project,
        ],
    )
    .map_err(StorageError::from)?;
    Ok(previous.is_some())
}

fn replace_embedding(conn: &Connection, vector: &EmbeddingVector) -> Result<()> {
    conn.execute(
        "INSERT INTO embeddings (incident_id, model, dimension, vector, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(incident_id) DO UPDATE SET
            model = excluded.model,
            dimension = excluded.dimension,
            vector = excluded.vector,
            updated_at = excluded.updated_at",
        params![
            vector.incident_id(),
            vector.model(),
            usize_to_i64(vector.dimension(), "dimension")?,
            encode_f32_blob(vector.values()),
            encode_time(Utc::now()),
        ],
    )
    .map_err(StorageError::from)?;
    Ok(())
}

fn decode_incident_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Incident> {
    let severity_raw: String = row.get(5)?;
    let severity = severity_raw
        .parse::<Severity>()
        .map_err(|msg| conversion_error(5, StorageError::InvalidValue(msg)))?;
    Ok(Incident {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        occurred_at: decode_time_sql(&row.get::<_, String>(3)?, 3)?,
        resolved_at: row
            .get::<_, Option<String>>(4)?
            .map(|raw| decode_time_sql(&raw, 4))
            .transpose()?,
        severity,
        assignee: row.get(6)?,
        status: row.get(7)?,
        project: row.get(8)?,
    })
}

fn decode_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClusterRun> {
    let method: String = row.get(2)?;
    let metric: String = row.get(3)?;
    Ok(ClusterRun {
        run_id: row.get(0)?,
        requested_k: row
            .get::<_, Option<i64>>(1)?
            .map(|k| i64_to_usize_sql(k, 1))
            .transpose()?,
        method: method
            .parse()
            .map_err(|err| conversion_error(2, StorageError::InvalidValue(format!("{err}"))))?,
        metric: metric
            .parse()
            .map_err(|err| conversion_error(3, StorageError::InvalidValue(format!("{err}"))))?,
        k: i64_to_usize_sql(row.get(4)?, 4)?,
        quality_score: row.get(5)?,
        created_at: decode_time_sql(&row.get::<_, String>(6)?, 6)?,
        clusters: Vec::new(),
    })
}

fn conversion_error(column: usize, err: StorageError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn encode_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time_sql(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| {
            conversion_error(
                column,
                StorageError::InvalidValue(format!("invalid timestamp '{raw}': {err}")),
            )
        })
}

fn encode_f32_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_f32_blob(blob: &[u8], dimension: usize) -> Result<Vec<f32>> {
    let expected_len = dimension
        .checked_mul(std::mem::size_of::<f32>())
        .ok_or_else(|| StorageError::InvalidValue("embedding blob length overflow".to_string()))?;
    if blob.len() != expected_len {
        return Err(StorageError::InvalidValue(format!(
            "invalid embedding byte length: expected {expected_len}, got {}",
            blob.len()
        ))
        .into());
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn usize_to_i64(value: usize, field: &'static str) -> Result<i64> {
    Ok(i64::try_from(value)
        .map_err(|_| StorageError::InvalidValue(format!("{field} overflows i64")))?)
}

fn i64_to_usize(value: i64, field: &'static str) -> Result<usize> {
    Ok(usize::try_from(value)
        .map_err(|_| StorageError::InvalidValue(format!("{field} is negative: {value}")))?)
}

fn i64_to_usize_sql(value: i64, column: usize) -> rusqlite::Result<usize> {
    usize::try_from(value).map_err(|_| {
        conversion_error(
            column,
            StorageError::InvalidValue(format!("negative count: {value}")),
        )
    })
}
