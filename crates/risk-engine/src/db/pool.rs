// crates/risk-engine/src/db/pool.rs
// Async connection pool using deadpool-sqlite
//
// # Async Database Access Patterns
//
// ## Preferred Pattern: pool.run()
// Use `pool.run()` for calculator/writer code — it converts the closure's
// error into `RiskError` automatically:
// ```ignore
// let result = pool.run(move |conn| some_function(conn)).await?;
// ```
//
// ## Lower-Level: pool.interact()
// Use `pool.interact()` when you need `anyhow::Result` instead, e.g. in
// migrations or internal setup.
//
// ## Common Pitfalls
//
// 1. **Don't block the async runtime**: always go through `pool.run()` or
//    `pool.interact()` for database access — never open a raw `Connection`
//    on the async task.
// 2. **Type inference**: closures sometimes need an explicit
//    `Ok::<_, rusqlite::Error>(..)` to help inference along.
// 3. **In-memory testing**: use the shared-cache URI
//    (`file:memdb_xxx?mode=memory&cache=shared`) so multiple pool
//    connections share the same database state.

use crate::error::RiskError;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// SQLITE_BUSY ("database is locked") occurs with file-based databases
/// under write contention. SQLITE_LOCKED ("database table is locked")
/// occurs with shared-cache in-memory databases when another connection
/// holds a write lock on the same table. Both fall under the transient I/O
/// error category (§7) — retryable, the commit stays un-atomized.
fn is_rusqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

fn is_risk_error_contention(err: &RiskError) -> bool {
    match err {
        RiskError::Db(rusqlite_err) => is_rusqlite_contention(rusqlite_err),
        _ => false,
    }
}

/// Retry delays for SQLite contention backoff.
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

/// Generic retry-with-backoff for async operations that may hit SQLite
/// contention (§5 shared-resource / suspension-point policy).
async fn retry_with_backoff<F, Fut, R, E>(
    mut op: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<R, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
        match op().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if is_retryable(&e) {
                    tracing::warn!(
                        "SQLite contention on attempt {}/{}, retrying in {:?}",
                        attempt + 1,
                        RETRY_DELAYS.len(),
                        delay
                    );
                    tokio::time::sleep(*delay).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
    op().await
}

/// Pooled handle to the engine's single relational database (§3).
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    memory_uri: Option<String>,
}

enum DbStorage {
    File(PathBuf),
    InMemory,
}

impl DatabasePool {
    /// Open a pooled database at the given path, running migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_internal(DbStorage::File(path.to_path_buf())).await
    }

    /// Open a pooled in-memory database (for tests).
    ///
    /// Uses a shared-cache URI so every connection the pool hands out sees
    /// the same in-memory database — without it each connection would get
    /// its own isolated database and writes from one would never be seen
    /// by another.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_internal(DbStorage::InMemory).await
    }

    async fn open_internal(storage: DbStorage) -> Result<Self> {
        let (conn_str, path, memory_uri, hook) = match storage {
            DbStorage::File(p) => {
                ensure_parent_directory(&p)?;
                let s = p.to_string_lossy().to_string();
                let hook = make_file_post_create_hook(p.clone());
                (s, Some(p), None, hook)
            }
            DbStorage::InMemory => {
                let uri = format!(
                    "file:memdb_{}?mode=memory&cache=shared",
                    uuid::Uuid::new_v4()
                );
                let hook = make_memory_post_create_hook();
                (uri.clone(), None, Some(uri), hook)
            }
        };

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path,
            memory_uri,
        };

        db_pool.run_migrations().await?;
        Ok(db_pool)
    }

    /// Memory URI, for sharing state across pools in tests.
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure with a pooled connection, returning `anyhow::Result`.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure and convert its error into [`RiskError`]. This is the
    /// primary entry point used by the writer, calculator, and query layers.
    pub async fn run<F, R, E>(&self, f: F) -> Result<R, RiskError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<RiskError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| RiskError::Other(format!("Failed to get connection: {}", e)))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| RiskError::Other(format!("Database error: {}", e)))?
    }

    /// Like [`run`](Self::run), but retries on SQLite contention. Use for
    /// writes that must not be lost to a transient lock (CodeBlock upserts,
    /// CodeBlockChange inserts, commit-atomized markers).
    pub async fn run_with_retry<F, R, E>(&self, f: F) -> Result<R, RiskError>
    where
        F: FnOnce(&Connection) -> Result<R, E> + Send + Clone + 'static,
        R: Send + 'static,
        E: Into<RiskError> + Send + 'static,
    {
        retry_with_backoff(
            || {
                let f_clone = f.clone();
                self.run(f_clone)
            },
            is_risk_error_contention,
        )
        .await
    }

    /// Run a closure on a pooled connection, logging failure instead of
    /// propagating it. Used for graph-sync writes (§4.7): "a failure logs
    /// and continues — the relational store remains the source of truth."
    pub async fn try_interact_warn<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(move |conn| f(conn)).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("{}: {}", label, e);
                None
            }
        }
    }

    async fn run_migrations(&self) -> Result<()> {
        self.interact(|conn| {
            super::schema::run_all_migrations(conn)?;
            if let Err(e) = conn.execute_batch("PRAGMA optimize") {
                tracing::debug!("PRAGMA optimize skipped: {}", e);
            }
            Ok(())
        })
        .await
    }

    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

/// Ensure the parent directory exists with restrictive permissions (Unix
/// 0o700 — the database may contain source snippets and commit messages).
fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(parent, perms)?;
        }
    }
    Ok(())
}

fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path_for_perms = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;

                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path_for_perms) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&path_for_perms, perms) {
                        tracing::warn!("Failed to restrict database file permissions: {}", e);
                    }
                }

                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    // WAL for concurrent readers during a write, FK enforcement for the
    // relational invariants (§3), a busy timeout so a brief writer overlap
    // doesn't surface as an immediate error, NORMAL synchronous (safe under
    // WAL).
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL;",
    )?;
    Ok(())
}

#[cfg(test)]
pub async fn setup_test_pool() -> std::sync::Arc<DatabasePool> {
    std::sync::Arc::new(
        DatabasePool::open_in_memory()
            .await
            .expect("Failed to create in-memory pool"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_in_memory_runs_migrations() {
        let pool = DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool");

        let exists: bool = pool
            .interact(|conn| {
                Ok(conn.query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='table' AND name='code_blocks'",
                    [],
                    |_| Ok(true),
                )?)
            })
            .await
            .unwrap();
        assert!(exists);
    }

    #[tokio::test]
    async fn test_contention_retry_succeeds_eventually() {
        let pool = setup_test_pool().await;
        let attempt = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempt_clone = attempt.clone();

        let result = pool
            .run_with_retry(move |_conn| {
                let n = attempt_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n == 0 {
                    Err(RiskError::Db(rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error {
                            code: rusqlite::ffi::ErrorCode::DatabaseBusy,
                            extended_code: 0,
                        },
                        None,
                    )))
                } else {
                    Ok::<_, RiskError>(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
    }
}
