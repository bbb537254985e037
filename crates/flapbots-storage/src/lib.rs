//! DuckDB-backed persistence layer for Flapbots.

#[cfg(target_os = "windows")]
#[link(name = "rstrtmgr")]
unsafe extern "system" {}

use duckdb::{Connection, Transaction, params};
use flapbots_core::{CandidateId, GenerationPersistence, GenerationReport};
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
};
use thiserror::Error;
use tracing::{debug, error, warn};

const DEFAULT_GENERATION_BUFFER: usize = 1;

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("storage worker error: {0}")]
    Worker(String),
}

/// Best candidate of one generation, keyed by candidate ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: CandidateId,
    pub generation: u64,
    pub fitness: f64,
    pub solved: bool,
    pub encoded: Option<String>,
}

/// Row of the `generations` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub generation: u64,
    pub evaluated: u64,
    pub best_id: CandidateId,
    pub best_fitness: f64,
    pub mean_fitness: f64,
    pub solved: u64,
}

#[derive(Default)]
struct StorageBuffer {
    candidates: Vec<CandidateRecord>,
    generations: Vec<GenerationRecord>,
}

impl StorageBuffer {
    fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.generations.is_empty()
    }

    fn clear(&mut self) {
        self.candidates.clear();
        self.generations.clear();
    }
}

/// DuckDB-backed persistence sink with buffered writes.
pub struct Storage {
    conn: Connection,
    buffer: StorageBuffer,
    flush_threshold: usize,
}

impl Storage {
    /// Open or create a DuckDB database, flushing after every generation.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::with_threshold(path, DEFAULT_GENERATION_BUFFER)
    }

    /// Open or create a database that buffers up to `generations` reports.
    pub fn with_threshold(path: &str, generations: usize) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let mut storage = Self {
            conn,
            buffer: StorageBuffer::default(),
            flush_threshold: generations.max(1),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&mut self) -> Result<(), StorageError> {
        self.conn.execute(
            "create table if not exists candidates (
                candidate_id bigint primary key,
                generation bigint,
                fitness double,
                solved boolean,
                encoded text
            )",
            [],
        )?;
        self.conn.execute(
            "create table if not exists generations (
                generation bigint primary key,
                evaluated bigint,
                best_id bigint,
                best_fitness double,
                mean_fitness double,
                solved bigint
            )",
            [],
        )?;
        Ok(())
    }

    /// Buffer one generation report, flushing once the threshold is met.
    pub fn persist(&mut self, report: &GenerationReport) -> Result<(), StorageError> {
        self.buffer.candidates.push(CandidateRecord {
            id: report.best.id,
            generation: report.generation,
            fitness: report.best.fitness,
            solved: report.best.solved,
            encoded: report.encoded_best.clone(),
        });
        self.buffer.generations.push(GenerationRecord {
            generation: report.generation,
            evaluated: report.evaluated as u64,
            best_id: report.best.id,
            best_fitness: report.best.fitness,
            mean_fitness: report.mean_fitness,
            solved: report.solved as u64,
        });
        if self.buffer.generations.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Force flush buffered records to disk.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        Self::insert_candidates(&tx, &self.buffer.candidates)?;
        Self::insert_generations(&tx, &self.buffer.generations)?;
        tx.commit()?;
        debug!(generations = self.buffer.generations.len(), "storage flushed");
        self.buffer.clear();
        Ok(())
    }

    fn insert_candidates(
        tx: &Transaction<'_>,
        rows: &[CandidateRecord],
    ) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into candidates (
                candidate_id, generation, fitness, solved, encoded
            ) values (?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.id.0 as i64,
                row.generation as i64,
                row.fitness,
                row.solved,
                row.encoded,
            ])?;
        }
        Ok(())
    }

    fn insert_generations(
        tx: &Transaction<'_>,
        rows: &[GenerationRecord],
    ) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(
            "insert or replace into generations (
                generation, evaluated, best_id, best_fitness, mean_fitness, solved
            ) values (?, ?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.generation as i64,
                row.evaluated as i64,
                row.best_id.0 as i64,
                row.best_fitness,
                row.mean_fitness,
                row.solved as i64,
            ])?;
        }
        Ok(())
    }

    /// Look up a stored candidate by ID.
    pub fn candidate(&mut self, id: CandidateId) -> Result<Option<CandidateRecord>, StorageError> {
        self.flush()?;
        let mut stmt = self.conn.prepare(
            "select candidate_id, generation, fitness, solved, encoded
             from candidates
             where candidate_id = ?",
        )?;
        let mut rows = stmt.query(params![id.0 as i64])?;
        match rows.next()? {
            Some(row) => Ok(Some(candidate_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Stored candidates ranked by solved flag, then fitness.
    pub fn top_candidates(&mut self, limit: usize) -> Result<Vec<CandidateRecord>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.flush()?;
        let mut stmt = self.conn.prepare(
            "select candidate_id, generation, fitness, solved, encoded
             from candidates
             order by solved desc, fitness desc, candidate_id asc
             limit ?",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut records = Vec::with_capacity(limit.min(16));
        while let Some(row) = rows.next()? {
            records.push(candidate_from_row(row)?);
        }
        Ok(records)
    }

    /// Every generation summary in order.
    pub fn generations(&mut self) -> Result<Vec<GenerationRecord>, StorageError> {
        self.flush()?;
        let mut stmt = self.conn.prepare(
            "select generation, evaluated, best_id, best_fitness, mean_fitness, solved
             from generations
             order by generation asc",
        )?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(GenerationRecord {
                generation: row.get::<_, i64>(0)? as u64,
                evaluated: row.get::<_, i64>(1)? as u64,
                best_id: CandidateId(row.get::<_, i64>(2)? as u64),
                best_fitness: row.get(3)?,
                mean_fitness: row.get(4)?,
                solved: row.get::<_, i64>(5)? as u64,
            });
        }
        Ok(records)
    }
}

fn candidate_from_row(row: &duckdb::Row<'_>) -> Result<CandidateRecord, duckdb::Error> {
    Ok(CandidateRecord {
        id: CandidateId(row.get::<_, i64>(0)? as u64),
        generation: row.get::<_, i64>(1)? as u64,
        fitness: row.get(2)?,
        solved: row.get(3)?,
        encoded: row.get::<_, Option<String>>(4)?,
    })
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            error!(error = %err, "failed to flush persistence buffer on drop");
        }
    }
}

impl GenerationPersistence for Storage {
    fn on_generation(&mut self, report: &GenerationReport) {
        if let Err(err) = self.persist(report) {
            warn!(generation = report.generation, error = %err, "failed to persist generation");
        }
    }

    fn flush(&mut self) {
        if let Err(err) = Storage::flush(self) {
            warn!(error = %err, "failed to flush storage");
        }
    }
}

#[derive(Debug)]
enum StorageCommand {
    Persist(Box<GenerationReport>),
    Flush,
    Shutdown,
}

/// Moves DuckDB writes onto a dedicated worker thread.
pub struct StoragePipeline {
    tx: mpsc::Sender<StorageCommand>,
    storage: Arc<Mutex<Storage>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StoragePipeline {
    /// Create an asynchronous pipeline using the default buffering threshold.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        Self::with_threshold(path, DEFAULT_GENERATION_BUFFER)
    }

    pub fn with_threshold(path: &str, generations: usize) -> Result<Self, StorageError> {
        let storage = Storage::with_threshold(path, generations)?;
        Self::from_storage(storage)
    }

    fn from_storage(storage: Storage) -> Result<Self, StorageError> {
        let shared = Arc::new(Mutex::new(storage));
        let (tx, rx) = mpsc::channel::<StorageCommand>();
        let worker_storage = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("flapbots-storage-worker".into())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    match command {
                        StorageCommand::Persist(report) => {
                            let mut storage = match worker_storage.lock() {
                                Ok(storage) => storage,
                                Err(poisoned) => {
                                    warn!(
                                        generation = report.generation,
                                        "storage mutex poisoned while persisting"
                                    );
                                    poisoned.into_inner()
                                }
                            };
                            if let Err(err) = storage.persist(&report) {
                                warn!(
                                    generation = report.generation,
                                    error = %err,
                                    "failed to persist generation asynchronously"
                                );
                            }
                        }
                        StorageCommand::Flush => {
                            if let Ok(mut storage) = worker_storage.lock()
                                && let Err(err) = storage.flush()
                            {
                                warn!(error = %err, "failed to flush storage");
                            }
                        }
                        StorageCommand::Shutdown => {
                            if let Ok(mut storage) = worker_storage.lock()
                                && let Err(err) = storage.flush()
                            {
                                warn!(error = %err, "failed to flush storage on shutdown");
                            }
                            break;
                        }
                    }
                }
            })
            .map_err(|err| {
                StorageError::Worker(format!("failed to spawn storage worker thread: {err}"))
            })?;

        Ok(Self {
            tx,
            storage: shared,
            handle: Some(handle),
        })
    }

    /// Exposes shared access to the underlying storage for queries.
    #[must_use]
    pub fn storage(&self) -> Arc<Mutex<Storage>> {
        Arc::clone(&self.storage)
    }
}

impl GenerationPersistence for StoragePipeline {
    fn on_generation(&mut self, report: &GenerationReport) {
        if self
            .tx
            .send(StorageCommand::Persist(Box::new(report.clone())))
            .is_err()
        {
            warn!(
                generation = report.generation,
                "storage worker channel closed; generation dropped"
            );
        }
    }

    fn flush(&mut self) {
        if self.tx.send(StorageCommand::Flush).is_err() {
            warn!("storage worker channel closed; flush skipped");
        }
    }
}

impl Drop for StoragePipeline {
    fn drop(&mut self) {
        let _ = self.tx.send(StorageCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(err) = handle.join()
        {
            error!("storage worker thread panicked: {err:?}");
        }
    }
}
