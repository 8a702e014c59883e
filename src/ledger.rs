// zkChannels Core Library implementing anonymous bitcoin payment channels
// Written in 2020-2022 by
//     zkChannels contributors
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! Merchant revocation ledger: durable write-once mapping from revocation
//! locks to the revealed revocation secrets.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use rusqlite::{named_params, Connection, OptionalExtension};
use tx::RevLock;

use crate::revocation::RevSecret;

/// Errors happening during revocation ledger access
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum LedgerError {
    /// revocation ledger database error: {0}
    Database(String),

    /// revocation lock {0} is already associated with a different secret
    Conflict(RevLock),

    /// revocation ledger record for {rev_lock} is corrupted: {details}
    Corrupted { rev_lock: RevLock, details: String },

    /// revocation ledger lock is poisoned by a panicked thread
    Poisoned,
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

/// Durable store of revealed revocation secrets.
///
/// Records are write-once: repeated `put` of the same pair is a no-op, while
/// an attempt to associate a different secret with an already known lock
/// fails and keeps the first value. A successful `put` must guarantee that
/// the record survives process restarts.
pub trait RevocationLedger: Send + Sync + Debug {
    fn put(&self, rev_lock: RevLock, rev_secret: RevSecret)
        -> Result<(), LedgerError>;

    fn get(&self, rev_lock: &RevLock) -> Result<Option<RevSecret>, LedgerError>;
}

fn check_put(
    records: &BTreeMap<RevLock, RevSecret>,
    rev_lock: RevLock,
    rev_secret: RevSecret,
) -> Result<bool, LedgerError> {
    match records.get(&rev_lock) {
        None => Ok(true),
        Some(known) if *known == rev_secret => Ok(false),
        Some(_) => Err(LedgerError::Conflict(rev_lock)),
    }
}

/// In-memory revocation ledger for tests and ephemeral merchants
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<BTreeMap<RevLock, RevSecret>>,
}

impl MemoryLedger {
    pub fn new() -> MemoryLedger { MemoryLedger::default() }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or_default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl RevocationLedger for MemoryLedger {
    fn put(
        &self,
        rev_lock: RevLock,
        rev_secret: RevSecret,
    ) -> Result<(), LedgerError> {
        let mut records =
            self.records.write().map_err(|_| LedgerError::Poisoned)?;
        if check_put(&records, rev_lock, rev_secret)? {
            records.insert(rev_lock, rev_secret);
        }
        Ok(())
    }

    fn get(
        &self,
        rev_lock: &RevLock,
    ) -> Result<Option<RevSecret>, LedgerError> {
        let records = self.records.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(records.get(rev_lock).copied())
    }
}

const CREATE_REVOCATIONS: &str = "CREATE TABLE IF NOT EXISTS revocations (
    lock BLOB PRIMARY KEY NOT NULL,
    secret BLOB NOT NULL
)";

/// SQLite-backed revocation ledger. Each `put` is a single committed
/// statement, so a crash in the middle of a write leaves all previously
/// committed records readable.
#[derive(Debug)]
pub struct SqliteLedger {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Opens existing ledger database or creates a new one
    pub fn open(path: impl AsRef<Path>) -> Result<SqliteLedger, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(CREATE_REVOCATIONS)?;
        let count = Self::count_records(&conn)?;
        debug!(
            "revocation ledger {} opened with {} records",
            path.display(),
            count
        );
        Ok(SqliteLedger {
            path,
            conn: Mutex::new(conn),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path { &self.path }

    /// Number of recorded revocations
    pub fn count(&self) -> Result<usize, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::Poisoned)?;
        Self::count_records(&conn)
    }

    fn count_records(conn: &Connection) -> Result<usize, LedgerError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM revocations",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn select(
        conn: &Connection,
        rev_lock: &RevLock,
    ) -> Result<Option<RevSecret>, LedgerError> {
        let stored: Option<Vec<u8>> = conn
            .query_row(
                "SELECT secret FROM revocations WHERE lock = :lock",
                named_params! { ":lock": &rev_lock.to_bytes()[..] },
                |row| row.get(0),
            )
            .optional()?;
        let bytes = match stored {
            None => return Ok(None),
            Some(bytes) => bytes,
        };
        let corrupted = |details: &str| LedgerError::Corrupted {
            rev_lock: *rev_lock,
            details: details.to_owned(),
        };
        let bytes = <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| corrupted("secret must be 32 bytes long"))?;
        let rev_secret = RevSecret::from_bytes(bytes);
        if rev_secret.rev_lock() != *rev_lock {
            return Err(corrupted("secret does not open the lock"));
        }
        Ok(Some(rev_secret))
    }
}

impl RevocationLedger for SqliteLedger {
    fn put(
        &self,
        rev_lock: RevLock,
        rev_secret: RevSecret,
    ) -> Result<(), LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::Poisoned)?;
        let inserted = conn.execute(
            "INSERT INTO revocations (lock, secret) VALUES (:lock, :secret)
             ON CONFLICT (lock) DO NOTHING",
            named_params! {
                ":lock": &rev_lock.to_bytes()[..],
                ":secret": &rev_secret.to_bytes()[..],
            },
        )?;
        if inserted == 0 {
            if Self::select(&conn, &rev_lock)? != Some(rev_secret) {
                return Err(LedgerError::Conflict(rev_lock));
            }
            return Ok(());
        }
        trace!("revocation lock {} is recorded to the ledger", rev_lock);
        Ok(())
    }

    fn get(
        &self,
        rev_lock: &RevLock,
    ) -> Result<Option<RevSecret>, LedgerError> {
        let conn = self.conn.lock().map_err(|_| LedgerError::Poisoned)?;
        Self::select(&conn, rev_lock)
    }
}
