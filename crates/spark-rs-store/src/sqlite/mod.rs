//! SQLite-backed spark store.
//!
//! A single connection lives on a dedicated worker thread. Async callers
//! submit closures over a channel and await the result on a oneshot, so the
//! runtime never blocks on SQLite IO. The similarity-gated commit runs inside
//! an `IMMEDIATE` transaction, which serialises writers across processes that
//! share the database file.

mod migrations;


use crate::similarity::{cosine_similarity, decode_vector, encode_vector};
use crate::{
    CommitRequest, CommittedSpark, DayWindow, Interaction, InteractionOutcome, LockRecord,
    Reaction, Spark, SparkCandidate, SparkStore, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use migrations::run_migrations;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params, params_from_iter};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// How long a writer waits on another process holding the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct WorkerHandle {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("failed to send shutdown to store worker: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("failed to join store worker: {join_err:?}");
            }
        }
    }
}

enum Location {
    File(PathBuf),
    Memory,
}

/// Durable spark store backed by a SQLite database file.
#[derive(Clone)]
pub struct SqliteSparkStore {
    inner: Arc<WorkerHandle>,
    path: Option<Arc<PathBuf>>,
}

impl SqliteSparkStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                StoreError::Unavailable(format!(
                    "failed to create store directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let store = Self::spawn(Location::File(path.clone()))?;
        info!("spark store opened (path={})", path.display());
        Ok(Self {
            path: Some(Arc::new(path)),
            ..store
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self::spawn(Location::Memory)?;
        debug!("in-memory spark store opened");
        Ok(store)
    }

    /// Database file path, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    fn spawn(location: Location) -> Result<Self, StoreError> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), StoreError>>();

        let worker = thread::Builder::new()
            .name("spark-store".into())
            .spawn(move || {
                let mut conn = match open_connection(&location) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if ready_tx.send(run_migrations(&mut conn)).is_err() {
                    error!("store opener dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }
                debug!("store worker shutting down");
            })
            .map_err(|err| StoreError::Unavailable(format!("failed to spawn store worker: {err}")))?;

        ready_rx.recv().map_err(|_| {
            StoreError::Unavailable("store worker exited before signaling readiness".to_string())
        })??;

        Ok(Self {
            inner: Arc::new(WorkerHandle {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            path: None,
        })
    }

    /// Run `task` on the worker thread and await its result.
    async fn execute<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = DbCommand::Execute(Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                debug!("store caller dropped before receiving result");
            }
        }));

        self.inner.sender.send(command).map_err(|err| {
            StoreError::Unavailable(format!("failed to send command to store worker: {err}"))
        })?;

        reply_rx
            .await
            .map_err(|_| StoreError::Unavailable("store worker terminated unexpectedly".into()))?
    }
}

fn open_connection(location: &Location) -> Result<Connection, StoreError> {
    let conn = match location {
        Location::File(path) => Connection::open(path)?,
        Location::Memory => Connection::open_in_memory()?,
    };
    conn.busy_timeout(BUSY_TIMEOUT)?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("failed to enable WAL mode: {err}");
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

#[async_trait]
impl SparkStore for SqliteSparkStore {
    async fn sparks_in_window(
        &self,
        user_id: &str,
        window: DayWindow,
    ) -> Result<Vec<Spark>, StoreError> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, content, details, topic, batch_index, is_recommendation, created_at_ms
                 FROM sparks
                 WHERE user_id = ?1 AND created_at_ms >= ?2 AND created_at_ms < ?3
                 ORDER BY batch_index ASC, created_at_ms ASC",
            )?;
            let rows = stmt.query_map(
                params![user_id, to_millis(window.start), to_millis(window.end)],
                read_spark_row,
            )?;
            let mut sparks = Vec::new();
            for row in rows {
                sparks.push(row?.into_spark()?);
            }
            Ok(sparks)
        })
        .await
    }

    async fn spark(&self, user_id: &str, spark_id: Uuid) -> Result<Option<Spark>, StoreError> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let raw = conn
                .query_row(
                    "SELECT id, user_id, content, details, topic, batch_index, is_recommendation, created_at_ms
                     FROM sparks WHERE id = ?1 AND user_id = ?2",
                    params![spark_id.to_string(), user_id],
                    read_spark_row,
                )
                .optional()?;
            raw.map(RawSpark::into_spark).transpose()
        })
        .await
    }

    async fn commit_if_unique(
        &self,
        request: CommitRequest,
    ) -> Result<CommittedSpark, StoreError> {
        validate_candidate(&request.candidate)?;
        if request.embedding.is_empty() {
            return Err(StoreError::InvalidRecord("embedding is empty".to_string()));
        }

        self.execute(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM sparks
                 WHERE user_id = ?1 AND is_recommendation = 0
                   AND created_at_ms >= ?2 AND created_at_ms < ?3",
                params![
                    request.user_id,
                    to_millis(request.window.start),
                    to_millis(request.window.end)
                ],
                |row| row.get(0),
            )?;
            let count = usize::try_from(count)
                .map_err(|_| StoreError::InvalidRecord(format!("negative spark count {count}")))?;
            if count >= request.capacity {
                return Err(StoreError::BatchFull { count });
            }

            let similarity_scores = {
                let mut stmt = tx.prepare(
                    "SELECT e.vector FROM spark_embeddings e
                     JOIN sparks s ON s.id = e.spark_id
                     WHERE s.user_id = ?1
                     ORDER BY s.created_at_ms ASC",
                )?;
                let rows = stmt.query_map(params![request.user_id], |row| row.get::<_, Vec<u8>>(0))?;
                let mut scores = Vec::new();
                for bytes in rows {
                    let bytes = bytes?;
                    let vector = decode_vector(&bytes).ok_or_else(|| {
                        StoreError::InvalidRecord(format!(
                            "stored embedding has invalid length {}",
                            bytes.len()
                        ))
                    })?;
                    scores.push(cosine_similarity(&request.embedding, &vector));
                }
                scores
            };

            if let Some(score) = similarity_scores
                .iter()
                .copied()
                .filter(|score| *score >= request.threshold)
                .reduce(f32::max)
            {
                debug!(
                    "commit rejected as too similar (user_id={}, score={score:.3}, compared={})",
                    request.user_id,
                    similarity_scores.len()
                );
                return Err(StoreError::TooSimilar { score });
            }

            let batch_index = u32::try_from(count + 1)
                .map_err(|_| StoreError::InvalidRecord("batch index overflow".to_string()))?;
            let spark = Spark {
                id: Uuid::new_v4(),
                user_id: request.user_id,
                content: request.candidate.content,
                details: request.candidate.details,
                topic: request.candidate.topic,
                batch_index,
                is_recommendation: false,
                created_at: from_millis(to_millis(request.created_at))?,
            };
            insert_spark(&tx, &spark)?;
            tx.execute(
                "INSERT INTO spark_embeddings (spark_id, dimensions, vector) VALUES (?1, ?2, ?3)",
                params![
                    spark.id.to_string(),
                    request.embedding.len() as i64,
                    encode_vector(&request.embedding)
                ],
            )?;
            tx.commit()?;

            debug!(
                "spark committed (user_id={}, spark_id={}, batch_index={}, compared={})",
                spark.user_id,
                spark.id,
                spark.batch_index,
                similarity_scores.len()
            );
            Ok(CommittedSpark {
                spark,
                similarity_scores,
            })
        })
        .await
    }

    async fn insert_recommendation(
        &self,
        user_id: &str,
        candidate: SparkCandidate,
        created_at: DateTime<Utc>,
    ) -> Result<Spark, StoreError> {
        validate_candidate(&candidate)?;
        let spark = Spark {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            content: candidate.content,
            details: candidate.details,
            topic: candidate.topic,
            batch_index: 0,
            is_recommendation: true,
            created_at: from_millis(to_millis(created_at))?,
        };
        self.execute(move |conn| {
            insert_spark(conn, &spark)?;
            Ok(spark)
        })
        .await
    }

    async fn record_interaction(
        &self,
        interaction: Interaction,
    ) -> Result<InteractionOutcome, StoreError> {
        self.execute(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let spark_id = interaction.spark_id.to_string();

            let owned = tx
                .query_row(
                    "SELECT 1 FROM sparks WHERE id = ?1 AND user_id = ?2",
                    params![spark_id, interaction.user_id],
                    |_| Ok(()),
                )
                .optional()?;
            if owned.is_none() {
                return Err(StoreError::NotFound(interaction.spark_id));
            }

            let previous: Option<String> = tx
                .query_row(
                    "SELECT reaction FROM interactions WHERE user_id = ?1 AND spark_id = ?2",
                    params![interaction.user_id, spark_id],
                    |row| row.get(0),
                )
                .optional()?;
            let previous = previous.map(|value| parse_reaction(&value)).transpose()?;

            tx.execute(
                "INSERT INTO interactions (user_id, spark_id, reaction, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, spark_id)
                 DO UPDATE SET reaction = excluded.reaction, created_at_ms = excluded.created_at_ms",
                params![
                    interaction.user_id,
                    spark_id,
                    interaction.reaction.as_str(),
                    to_millis(interaction.created_at)
                ],
            )?;
            tx.commit()?;

            Ok(match previous {
                Some(previous) => InteractionOutcome::Replaced { previous },
                None => InteractionOutcome::Recorded,
            })
        })
        .await
    }

    async fn reacted_spark_ids(
        &self,
        user_id: &str,
        spark_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, StoreError> {
        if spark_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let user_id = user_id.to_string();
        let ids: Vec<String> = spark_ids.iter().map(Uuid::to_string).collect();
        self.execute(move |conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "SELECT spark_id FROM interactions WHERE user_id = ? AND spark_id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let bound = std::iter::once(user_id).chain(ids);
            let rows = stmt.query_map(params_from_iter(bound), |row| row.get::<_, String>(0))?;
            let mut reacted = HashSet::new();
            for row in rows {
                reacted.insert(parse_uuid(&row?)?);
            }
            Ok(reacted)
        })
        .await
    }

    async fn count_positive_interactions(&self, user_id: &str) -> Result<u64, StoreError> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM interactions
                 WHERE user_id = ?1 AND reaction IN ('like', 'love')",
                params![user_id],
                |row| row.get(0),
            )?;
            u64::try_from(count)
                .map_err(|_| StoreError::InvalidRecord(format!("negative interaction count {count}")))
        })
        .await
    }

    async fn count_recommendations(
        &self,
        user_id: &str,
        window: DayWindow,
    ) -> Result<u64, StoreError> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sparks
                 WHERE user_id = ?1 AND is_recommendation = 1
                   AND created_at_ms >= ?2 AND created_at_ms < ?3",
                params![user_id, to_millis(window.start), to_millis(window.end)],
                |row| row.get(0),
            )?;
            u64::try_from(count).map_err(|_| {
                StoreError::InvalidRecord(format!("negative recommendation count {count}"))
            })
        })
        .await
    }

    async fn claim_milestone(
        &self,
        user_id: &str,
        threshold: u64,
        fired_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let user_id = user_id.to_string();
        let threshold = milestone_key(threshold)?;
        self.execute(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO milestones_fired (user_id, threshold, fired_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, threshold) DO NOTHING",
                params![user_id, threshold, to_millis(fired_at)],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn release_milestone(&self, user_id: &str, threshold: u64) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        let threshold = milestone_key(threshold)?;
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM milestones_fired WHERE user_id = ?1 AND threshold = ?2",
                params![user_id, threshold],
            )?;
            Ok(())
        })
        .await
    }

    async fn read_lock(&self, user_id: &str) -> Result<Option<LockRecord>, StoreError> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let millis: Option<i64> = conn
                .query_row(
                    "SELECT acquired_at_ms FROM generation_locks WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;
            millis
                .map(|millis| {
                    Ok(LockRecord {
                        acquired_at: from_millis(millis)?,
                    })
                })
                .transpose()
        })
        .await
    }

    async fn swap_lock(
        &self,
        user_id: &str,
        expected: Option<LockRecord>,
        record: LockRecord,
    ) -> Result<bool, StoreError> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let acquired_at = to_millis(record.acquired_at);
            let changed = match expected {
                None => conn.execute(
                    "INSERT INTO generation_locks (user_id, acquired_at_ms) VALUES (?1, ?2)
                     ON CONFLICT(user_id) DO NOTHING",
                    params![user_id, acquired_at],
                )?,
                Some(previous) => conn.execute(
                    "UPDATE generation_locks SET acquired_at_ms = ?2
                     WHERE user_id = ?1 AND acquired_at_ms = ?3",
                    params![user_id, acquired_at, to_millis(previous.acquired_at)],
                )?,
            };
            Ok(changed == 1)
        })
        .await
    }

    async fn delete_lock(&self, user_id: &str) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM generation_locks WHERE user_id = ?1",
                params![user_id],
            )?;
            Ok(())
        })
        .await
    }
}

/// Column values of a `sparks` row before conversion.
struct RawSpark {
    id: String,
    user_id: String,
    content: String,
    details: String,
    topic: String,
    batch_index: i64,
    is_recommendation: bool,
    created_at_ms: i64,
}

impl RawSpark {
    fn into_spark(self) -> Result<Spark, StoreError> {
        Ok(Spark {
            id: parse_uuid(&self.id)?,
            user_id: self.user_id,
            content: self.content,
            details: self.details,
            topic: self.topic,
            batch_index: u32::try_from(self.batch_index).map_err(|_| {
                StoreError::InvalidRecord(format!("invalid batch index {}", self.batch_index))
            })?,
            is_recommendation: self.is_recommendation,
            created_at: from_millis(self.created_at_ms)?,
        })
    }
}

fn read_spark_row(row: &Row<'_>) -> rusqlite::Result<RawSpark> {
    Ok(RawSpark {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        details: row.get(3)?,
        topic: row.get(4)?,
        batch_index: row.get(5)?,
        is_recommendation: row.get(6)?,
        created_at_ms: row.get(7)?,
    })
}

fn insert_spark(conn: &Connection, spark: &Spark) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO sparks (id, user_id, content, details, topic, batch_index, is_recommendation, created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            spark.id.to_string(),
            spark.user_id,
            spark.content,
            spark.details,
            spark.topic,
            i64::from(spark.batch_index),
            spark.is_recommendation,
            to_millis(spark.created_at)
        ],
    )?;
    Ok(())
}

fn validate_candidate(candidate: &SparkCandidate) -> Result<(), StoreError> {
    if candidate.content.trim().is_empty() {
        return Err(StoreError::InvalidRecord("content is empty".to_string()));
    }
    if candidate.details.trim().is_empty() {
        return Err(StoreError::InvalidRecord("details are empty".to_string()));
    }
    if candidate.topic.trim().is_empty() {
        return Err(StoreError::InvalidRecord("topic is empty".to_string()));
    }
    Ok(())
}

fn milestone_key(threshold: u64) -> Result<i64, StoreError> {
    i64::try_from(threshold)
        .map_err(|_| StoreError::InvalidRecord(format!("milestone {threshold} out of range")))
}

fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::InvalidRecord(format!("timestamp out of range: {millis}")))
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value)
        .map_err(|err| StoreError::InvalidRecord(format!("invalid spark id '{value}': {err}")))
}

fn parse_reaction(value: &str) -> Result<Reaction, StoreError> {
    value.parse().map_err(StoreError::InvalidRecord)
}
