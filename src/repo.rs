use std::collections::HashMap;

use chrono::Utc;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait ThreadRepo: Send + Sync {
    async fn create_thread(&self, new: NewThread) -> RepoResult<Thread>;
    /// Threads of `board`, most recently bumped first, at most `limit`.
    async fn list_threads(&self, board: &str, limit: usize) -> RepoResult<Vec<Thread>>;
    async fn get_thread(&self, board: &str, id: Id) -> RepoResult<Thread>;
    /// Removes the thread and every canonical reply that references it.
    async fn delete_thread(&self, board: &str, id: Id) -> RepoResult<()>;
    async fn report_thread(&self, board: &str, id: Id) -> RepoResult<()>;
    /// Rebuilds embedded summaries and reply counts from canonical replies.
    /// Returns the number of threads that had drifted.
    async fn reconcile_summaries(&self) -> RepoResult<usize>;
}

#[async_trait]
pub trait ReplyRepo: Send + Sync {
    /// Inserts the canonical reply, appends its summary to the thread and bumps it.
    async fn create_reply(&self, new: NewReply) -> RepoResult<Reply>;
    async fn get_reply(&self, thread_id: Id, reply_id: Id) -> RepoResult<Reply>;
    /// Canonical replies of a thread, oldest first.
    async fn list_replies(&self, thread_id: Id) -> RepoResult<Vec<Reply>>;
    async fn delete_reply(&self, thread_id: Id, reply_id: Id) -> RepoResult<()>;
    async fn report_reply(&self, thread_id: Id, reply_id: Id) -> RepoResult<()>;
}

pub trait Repo: ThreadRepo + ReplyRepo {}

impl<T> Repo for T where T: ThreadRepo + ReplyRepo {}

/// Expected embedded array for `thread`: existing order kept, missing replies appended oldest first,
/// entries without a canonical record dropped, every field refreshed from the canonical reply.
fn rebuild_summaries(thread: &Thread, canonical: &[&Reply]) -> Vec<ReplySummary> {
    let by_id: HashMap<Id, &Reply> = canonical.iter().map(|r| (r.id, *r)).collect();
    let mut out: Vec<ReplySummary> = thread
        .replies
        .iter()
        .filter_map(|s| by_id.get(&s.id).map(|r| ReplySummary::from(*r)))
        .collect();
    let mut missing: Vec<&Reply> = canonical
        .iter()
        .copied()
        .filter(|r| !thread.replies.iter().any(|s| s.id == r.id))
        .collect();
    missing.sort_by(|a, b| a.created_on.cmp(&b.created_on));
    out.extend(missing.into_iter().map(ReplySummary::from));
    out
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::fs::{self, File};
    use std::io::{ErrorKind, Write};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

    const SNAPSHOT_FILE: &str = "state.json";
    const SNAPSHOT_TMP_FILE: &str = "state.json.tmp";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        threads: HashMap<Id, Thread>,
        replies: HashMap<Id, Reply>,
        /// Bumped on every mutation; orders snapshot writes that finish out of order.
        #[serde(skip)]
        version: u64,
    }

    /// Encoded state waiting to be written.
    struct Pending {
        version: u64,
        bytes: Vec<u8>,
    }

    struct Snapshot {
        path: PathBuf,
        tmp_path: PathBuf,
        /// Version on disk. Held for the whole write so writers never share the temp file.
        written: Mutex<u64>,
    }

    impl Snapshot {
        fn load(&self) -> RepoResult<State> {
            let path = &self.path;
            match fs::read(path) {
                Ok(bytes) => {
                    let state = serde_json::from_slice::<State>(&bytes).map_err(|e| {
                        RepoError::Internal(format!("snapshot '{}' is unreadable: {e}", path.display()))
                    })?;
                    log::info!("loaded snapshot '{}'", path.display());
                    Ok(state)
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    log::info!("no snapshot at '{}'; starting empty", path.display());
                    Ok(State::default())
                }
                Err(e) => Err(RepoError::Internal(format!("failed to read snapshot '{}': {e}", path.display()))),
            }
        }

        // Written to a temp file and renamed over the target, so a crash leaves the previous
        // snapshot intact.
        fn store(&self, pending: &Pending) -> std::io::Result<()> {
            let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.version <= *written {
                return Ok(()); // a newer state already landed
            }
            if let Some(dir) = self.path.parent() {
                fs::create_dir_all(dir)?;
            }
            let mut file = File::create(&self.tmp_path)?;
            file.write_all(&pending.bytes)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&self.tmp_path, &self.path)?;
            *written = pending.version;
            Ok(())
        }
    }

    /// Single-process store. Both collections sit behind one lock, so a thread and its
    /// canonical replies always change together.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot: Arc<Snapshot>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("MSGBOARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        /// Store rooted at `MSGBOARD_DATA_DIR` (default `data/`).
        pub fn new() -> RepoResult<Self> {
            Self::with_data_dir(Self::data_dir())
        }

        /// Opens the store in `dir`. A snapshot that exists but cannot be read is an error;
        /// the file is left untouched.
        pub fn with_data_dir(dir: impl AsRef<Path>) -> RepoResult<Self> {
            let dir = dir.as_ref();
            let snapshot = Snapshot {
                path: dir.join(SNAPSHOT_FILE),
                tmp_path: dir.join(SNAPSHOT_TMP_FILE),
                written: Mutex::new(0),
            };
            let state = snapshot.load()?;
            Ok(Self {
                state: Arc::new(RwLock::new(state)),
                snapshot: Arc::new(snapshot),
            })
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        /// Called under the write guard, after the mutation.
        fn encode(state: &mut State) -> RepoResult<Pending> {
            state.version += 1;
            let bytes = serde_json::to_vec_pretty(state)
                .map_err(|e| RepoError::Internal(format!("failed to encode snapshot: {e}")))?;
            Ok(Pending { version: state.version, bytes })
        }

        /// Writes on the blocking pool, after the guard is released.
        async fn persist(&self, pending: Pending) -> RepoResult<()> {
            let snapshot = self.snapshot.clone();
            tokio::task::spawn_blocking(move || snapshot.store(&pending))
                .await
                .map_err(|e| RepoError::Internal(format!("snapshot task failed: {e}")))?
                .map_err(|e| {
                    log::error!("failed to write snapshot '{}': {e}", self.snapshot.path.display());
                    RepoError::Internal(format!("failed to write snapshot: {e}"))
                })
        }
    }

    #[async_trait]
    impl ThreadRepo for InMemRepo {
        async fn create_thread(&self, new: NewThread) -> RepoResult<Thread> {
            let (thread, pending) = {
                let mut s = self.write()?;
                let now = Utc::now();
                let thread = Thread {
                    id: Id::new_v4(),
                    board: new.board,
                    text: new.text,
                    delete_password: new.delete_password,
                    reported: false,
                    replies: Vec::new(),
                    replycount: 0,
                    created_on: now,
                    bumped_on: now,
                };
                s.threads.insert(thread.id, thread.clone());
                (thread, Self::encode(&mut s)?)
            };
            self.persist(pending).await?;
            Ok(thread)
        }

        async fn list_threads(&self, board: &str, limit: usize) -> RepoResult<Vec<Thread>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.threads.values()
                .filter(|t| t.board == board)
                .cloned()
                .collect();
            v.sort_by(|a, b| b.bumped_on.cmp(&a.bumped_on));   // latest first
            v.truncate(limit);
            Ok(v)
        }

        async fn get_thread(&self, board: &str, id: Id) -> RepoResult<Thread> {
            let s = self.read()?;
            s.threads.get(&id)
                .filter(|t| t.board == board)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn delete_thread(&self, board: &str, id: Id) -> RepoResult<()> {
            let pending = {
                let mut s = self.write()?;
                if !s.threads.get(&id).is_some_and(|t| t.board == board) {
                    return Err(RepoError::NotFound);
                }
                s.replies.retain(|_, r| r.thread_id != id);
                s.threads.remove(&id);
                Self::encode(&mut s)?
            };
            self.persist(pending).await
        }

        async fn report_thread(&self, board: &str, id: Id) -> RepoResult<()> {
            let pending = {
                let mut s = self.write()?;
                let thread = s.threads.get_mut(&id)
                    .filter(|t| t.board == board)
                    .ok_or(RepoError::NotFound)?;
                thread.reported = true;
                Self::encode(&mut s)?
            };
            self.persist(pending).await
        }

        async fn reconcile_summaries(&self) -> RepoResult<usize> {
            let (repaired, pending) = {
                let mut guard = self.write()?;
                let s = &mut *guard;
                let mut by_thread: HashMap<Id, Vec<&Reply>> = HashMap::new();
                for r in s.replies.values() {
                    by_thread.entry(r.thread_id).or_default().push(r);
                }
                let mut repaired = 0;
                for thread in s.threads.values_mut() {
                    let canonical = by_thread.get(&thread.id).map(Vec::as_slice).unwrap_or(&[]);
                    let expected = rebuild_summaries(thread, canonical);
                    let count = expected.len() as i64;
                    if thread.replies != expected || thread.replycount != count {
                        thread.replies = expected;
                        thread.replycount = count;
                        repaired += 1;
                    }
                }
                let pending = if repaired > 0 { Some(Self::encode(s)?) } else { None };
                (repaired, pending)
            };
            if let Some(pending) = pending {
                self.persist(pending).await?;
            }
            Ok(repaired)
        }
    }

    #[async_trait]
    impl ReplyRepo for InMemRepo {
        async fn create_reply(&self, new: NewReply) -> RepoResult<Reply> {
            let (reply, pending) = {
                let mut guard = self.write()?;
                let s = &mut *guard;
                let thread = s.threads.get_mut(&new.thread_id).ok_or(RepoError::NotFound)?;
                let reply = Reply {
                    id: Id::new_v4(),
                    thread_id: new.thread_id,
                    text: ReplyText::Active(new.text),
                    delete_password: new.delete_password,
                    reported: false,
                    created_on: Utc::now(),
                };
                thread.replies.push(ReplySummary::from(&reply));
                thread.replycount = thread.replies.len() as i64;
                thread.bumped_on = reply.created_on;
                s.replies.insert(reply.id, reply.clone());
                (reply, Self::encode(s)?)
            };
            self.persist(pending).await?;
            Ok(reply)
        }

        async fn get_reply(&self, thread_id: Id, reply_id: Id) -> RepoResult<Reply> {
            let s = self.read()?;
            s.replies.get(&reply_id)
                .filter(|r| r.thread_id == thread_id)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn list_replies(&self, thread_id: Id) -> RepoResult<Vec<Reply>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.replies
                .values()
                .filter(|r| r.thread_id == thread_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| a.created_on.cmp(&b.created_on));    // ascending
            Ok(v)
        }

        async fn delete_reply(&self, thread_id: Id, reply_id: Id) -> RepoResult<()> {
            let pending = {
                let mut guard = self.write()?;
                let s = &mut *guard;
                let reply = s.replies.get_mut(&reply_id)
                    .filter(|r| r.thread_id == thread_id)
                    .ok_or(RepoError::NotFound)?;
                reply.text = ReplyText::Deleted;
                // a missing summary is left for reconciliation
                if let Some(summary) = s.threads.get_mut(&thread_id)
                    .and_then(|t| t.replies.iter_mut().find(|e| e.id == reply_id))
                {
                    summary.text = ReplyText::Deleted;
                }
                Self::encode(s)?
            };
            self.persist(pending).await
        }

        async fn report_reply(&self, thread_id: Id, reply_id: Id) -> RepoResult<()> {
            let pending = {
                let mut guard = self.write()?;
                let s = &mut *guard;
                let reply = s.replies.get_mut(&reply_id)
                    .filter(|r| r.thread_id == thread_id)
                    .ok_or(RepoError::NotFound)?;
                reply.reported = true;
                if let Some(summary) = s.threads.get_mut(&thread_id)
                    .and_then(|t| t.replies.iter_mut().find(|e| e.id == reply_id))
                {
                    summary.reported = true;
                }
                Self::encode(s)?
            };
            self.persist(pending).await
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::types::Json;
    use sqlx::{Pool, Postgres, Transaction};

    impl From<sqlx::Error> for RepoError {
        fn from(e: sqlx::Error) -> Self {
            match e {
                sqlx::Error::RowNotFound => RepoError::NotFound,
                other => RepoError::Internal(other.to_string()),
            }
        }
    }

    const THREAD_COLUMNS: &str =
        "id, board, text, delete_password, reported, replies, replycount, created_on, bumped_on";
    const REPLY_COLUMNS: &str = "id, thread_id, text, deleted, delete_password, reported, created_on";

    #[derive(sqlx::FromRow)]
    struct ThreadRow {
        id: Id,
        board: String,
        text: String,
        delete_password: String,
        reported: bool,
        replies: Json<Vec<ReplySummary>>,
        replycount: i64,
        created_on: DateTime<Utc>,
        bumped_on: DateTime<Utc>,
    }

    impl From<ThreadRow> for Thread {
        fn from(r: ThreadRow) -> Self {
            Thread {
                id: r.id,
                board: r.board,
                text: r.text,
                delete_password: r.delete_password,
                reported: r.reported,
                replies: r.replies.0,
                replycount: r.replycount,
                created_on: r.created_on,
                bumped_on: r.bumped_on,
            }
        }
    }

    #[derive(sqlx::FromRow)]
    struct ReplyRow {
        id: Id,
        thread_id: Id,
        text: String,
        deleted: bool,
        delete_password: String,
        reported: bool,
        created_on: DateTime<Utc>,
    }

    impl From<ReplyRow> for Reply {
        fn from(r: ReplyRow) -> Self {
            Reply {
                id: r.id,
                thread_id: r.thread_id,
                text: if r.deleted { ReplyText::Deleted } else { ReplyText::Active(r.text) },
                delete_password: r.delete_password,
                reported: r.reported,
                created_on: r.created_on,
            }
        }
    }

    /// Postgres store. Each dual write runs in one transaction, and the thread row is locked
    /// with `FOR UPDATE` so concurrent replies to the same thread serialize.
    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub async fn migrate(&self) -> anyhow::Result<()> {
            sqlx::migrate!("./migrations").run(&self.pool).await?;
            Ok(())
        }

        async fn lock_thread(tx: &mut Transaction<'_, Postgres>, id: Id) -> RepoResult<Thread> {
            let row = sqlx::query_as::<_, ThreadRow>(&format!(
                "SELECT {THREAD_COLUMNS} FROM threads WHERE id = $1 FOR UPDATE"
            ))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(RepoError::NotFound)?;
            Ok(row.into())
        }

        async fn store_summaries(tx: &mut Transaction<'_, Postgres>, thread: &Thread) -> RepoResult<()> {
            sqlx::query("UPDATE threads SET replies = $2, replycount = $3, bumped_on = $4 WHERE id = $1")
                .bind(thread.id)
                .bind(Json(&thread.replies))
                .bind(thread.replies.len() as i64)
                .bind(thread.bumped_on)
                .execute(&mut **tx)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl ThreadRepo for PgRepo {
        async fn create_thread(&self, new: NewThread) -> RepoResult<Thread> {
            let now = Utc::now();
            let row = sqlx::query_as::<_, ThreadRow>(&format!(
                "INSERT INTO threads (id, board, text, delete_password, created_on, bumped_on)
                 VALUES ($1, $2, $3, $4, $5, $5) RETURNING {THREAD_COLUMNS}"
            ))
            .bind(Id::new_v4())
            .bind(&new.board)
            .bind(&new.text)
            .bind(&new.delete_password)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            Ok(row.into())
        }

        async fn list_threads(&self, board: &str, limit: usize) -> RepoResult<Vec<Thread>> {
            let rows = sqlx::query_as::<_, ThreadRow>(&format!(
                "SELECT {THREAD_COLUMNS} FROM threads WHERE board = $1 ORDER BY bumped_on DESC LIMIT $2"
            ))
            .bind(board)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(Thread::from).collect())
        }

        async fn get_thread(&self, board: &str, id: Id) -> RepoResult<Thread> {
            let row = sqlx::query_as::<_, ThreadRow>(&format!(
                "SELECT {THREAD_COLUMNS} FROM threads WHERE id = $1 AND board = $2"
            ))
            .bind(id)
            .bind(board)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound)?;
            Ok(row.into())
        }

        async fn delete_thread(&self, board: &str, id: Id) -> RepoResult<()> {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM replies WHERE thread_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            let res = sqlx::query("DELETE FROM threads WHERE id = $1 AND board = $2")
                .bind(id)
                .bind(board)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(RepoError::NotFound);
            }
            tx.commit().await?;
            Ok(())
        }

        async fn report_thread(&self, board: &str, id: Id) -> RepoResult<()> {
            let res = sqlx::query("UPDATE threads SET reported = TRUE WHERE id = $1 AND board = $2")
                .bind(id)
                .bind(board)
                .execute(&self.pool)
                .await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        async fn reconcile_summaries(&self) -> RepoResult<usize> {
            let ids: Vec<(Id,)> = sqlx::query_as("SELECT id FROM threads")
                .fetch_all(&self.pool)
                .await?;
            let mut repaired = 0;
            for (id,) in ids {
                let mut tx = self.pool.begin().await?;
                let mut thread = match Self::lock_thread(&mut tx, id).await {
                    Ok(t) => t,
                    Err(RepoError::NotFound) => continue, // deleted meanwhile
                    Err(e) => return Err(e),
                };
                let canonical: Vec<Reply> = sqlx::query_as::<_, ReplyRow>(&format!(
                    "SELECT {REPLY_COLUMNS} FROM replies WHERE thread_id = $1 ORDER BY created_on ASC"
                ))
                .bind(id)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(Reply::from)
                .collect();
                let refs: Vec<&Reply> = canonical.iter().collect();
                let expected = rebuild_summaries(&thread, &refs);
                if thread.replies != expected || thread.replycount != expected.len() as i64 {
                    thread.replies = expected;
                    Self::store_summaries(&mut tx, &thread).await?;
                    repaired += 1;
                }
                tx.commit().await?;
            }
            Ok(repaired)
        }
    }

    #[async_trait]
    impl ReplyRepo for PgRepo {
        async fn create_reply(&self, new: NewReply) -> RepoResult<Reply> {
            let mut tx = self.pool.begin().await?;
            let mut thread = Self::lock_thread(&mut tx, new.thread_id).await?;
            let row = sqlx::query_as::<_, ReplyRow>(&format!(
                "INSERT INTO replies (id, thread_id, text, delete_password, created_on)
                 VALUES ($1, $2, $3, $4, $5) RETURNING {REPLY_COLUMNS}"
            ))
            .bind(Id::new_v4())
            .bind(new.thread_id)
            .bind(&new.text)
            .bind(&new.delete_password)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;
            let reply = Reply::from(row);
            thread.replies.push(ReplySummary::from(&reply));
            thread.bumped_on = reply.created_on;
            Self::store_summaries(&mut tx, &thread).await?;
            tx.commit().await?;
            Ok(reply)
        }

        async fn get_reply(&self, thread_id: Id, reply_id: Id) -> RepoResult<Reply> {
            let row = sqlx::query_as::<_, ReplyRow>(&format!(
                "SELECT {REPLY_COLUMNS} FROM replies WHERE id = $1 AND thread_id = $2"
            ))
            .bind(reply_id)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound)?;
            Ok(row.into())
        }

        async fn list_replies(&self, thread_id: Id) -> RepoResult<Vec<Reply>> {
            let rows = sqlx::query_as::<_, ReplyRow>(&format!(
                "SELECT {REPLY_COLUMNS} FROM replies WHERE thread_id = $1 ORDER BY created_on ASC"
            ))
            .bind(thread_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(Reply::from).collect())
        }

        async fn delete_reply(&self, thread_id: Id, reply_id: Id) -> RepoResult<()> {
            let mut tx = self.pool.begin().await?;
            let mut thread = Self::lock_thread(&mut tx, thread_id).await?;
            // the original text is dropped, not kept behind the flag
            let res = sqlx::query("UPDATE replies SET text = '', deleted = TRUE WHERE id = $1 AND thread_id = $2")
                .bind(reply_id)
                .bind(thread_id)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(RepoError::NotFound);
            }
            if let Some(summary) = thread.replies.iter_mut().find(|e| e.id == reply_id) {
                summary.text = ReplyText::Deleted;
                Self::store_summaries(&mut tx, &thread).await?;
            }
            tx.commit().await?;
            Ok(())
        }

        async fn report_reply(&self, thread_id: Id, reply_id: Id) -> RepoResult<()> {
            let mut tx = self.pool.begin().await?;
            let mut thread = Self::lock_thread(&mut tx, thread_id).await?;
            let res = sqlx::query("UPDATE replies SET reported = TRUE WHERE id = $1 AND thread_id = $2")
                .bind(reply_id)
                .bind(thread_id)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(RepoError::NotFound);
            }
            if let Some(summary) = thread.replies.iter_mut().find(|e| e.id == reply_id) {
                summary.reported = true;
                Self::store_summaries(&mut tx, &thread).await?;
            }
            tx.commit().await?;
            Ok(())
        }
    }
}
