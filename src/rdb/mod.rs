//! Transactional KVS tree backing the replicated services.
//!
//! The store is a tree of key-value stores (KVSs). The root always exists;
//! every other KVS is created under a key of its parent. All access goes
//! through a [`RdbTx`] opened for the current leadership term:
//!
//! - writes are buffered in the transaction and visible to its own reads
//! - [`RdbTx::commit`] applies them atomically, or fails with
//!   [`CofferError::LeadershipLost`] if the term moved on
//! - dropping a transaction without committing discards it
//!
//! # Examples
//!
//! ```rust
//! use coffer::rdb::{KvsAttr, Rdb, RdbPath};
//!
//! let db = Rdb::open_memory();
//! let term = db.step_up().unwrap();
//!
//! let mut tx = db.begin(term).unwrap();
//! let root = RdbPath::root();
//! tx.create_kvs(&root, b"conts", KvsAttr::generic()).unwrap();
//! tx.update_bytes(&root.child(b"conts"), b"k", b"v").unwrap();
//! tx.commit().unwrap();
//!
//! let tx = db.begin(term).unwrap();
//! assert_eq!(tx.lookup_bytes(&root.child(b"conts"), b"k").unwrap(), b"v".to_vec());
//! ```

pub mod backend;
pub mod path;
pub mod tx;

pub use self::backend::{MemBackend, RdbBackend, RocksBackend};
pub use self::path::RdbPath;
pub use self::tx::{IterAction, RdbTx};

use crate::error::{CofferError, Result};
use crate::types::Term;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Reserved key outside the tree holding the last term.
const TERM_KEY: &[u8] = b"\xffterm";

/// Key ordering class of a KVS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KvsClass {
    /// Arbitrary byte keys.
    Generic = 0,
    /// 8-byte big-endian integer keys, see [`int_key`].
    Integer = 1,
}

impl KvsClass {
    pub(crate) fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(KvsClass::Generic),
            1 => Ok(KvsClass::Integer),
            other => Err(CofferError::Storage(format!("unknown KVS class {}", other))),
        }
    }
}

/// Attributes a KVS is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvsAttr {
    pub class: KvsClass,
    /// Fan-out hint. Ignored by these backends.
    pub order: u32,
}

impl KvsAttr {
    pub fn generic() -> Self {
        Self {
            class: KvsClass::Generic,
            order: 16,
        }
    }

    pub fn integer() -> Self {
        Self {
            class: KvsClass::Integer,
            order: 16,
        }
    }
}

/// Key for an integer KVS.
pub fn int_key(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

/// Decode a key of an integer KVS.
pub fn decode_int_key(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| CofferError::Storage(format!("integer key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

#[derive(Debug, Default)]
struct LeaderState {
    term: Term,
    leading: bool,
}

/// A replicated metadata store replica.
pub struct Rdb {
    backend: Box<dyn RdbBackend>,
    state: Mutex<LeaderState>,
}

impl Rdb {
    pub fn new(backend: Box<dyn RdbBackend>) -> Result<Arc<Self>> {
        let term = match backend.get(TERM_KEY)? {
            Some(data) => bincode::deserialize(&data)?,
            None => 0,
        };
        Ok(Arc::new(Self {
            backend,
            state: Mutex::new(LeaderState {
                term,
                leading: false,
            }),
        }))
    }

    /// A volatile store.
    pub fn open_memory() -> Arc<Self> {
        Arc::new(Self {
            backend: Box::new(MemBackend::new()),
            state: Mutex::new(LeaderState::default()),
        })
    }

    /// A RocksDB-backed store at `path`.
    pub fn open_rocks<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        Self::new(Box::new(RocksBackend::open(path)?))
    }

    /// Become leader in a new term.
    pub fn step_up(&self) -> Result<Term> {
        let mut state = self.state.lock();
        let term = state.term + 1;
        self.backend
            .write(vec![(TERM_KEY.to_vec(), Some(bincode::serialize(&term)?))])?;
        state.term = term;
        state.leading = true;
        info!(term, "Metadata store stepped up");
        Ok(term)
    }

    /// Stop leading. Open transactions will fail to commit.
    pub fn step_down(&self) {
        let mut state = self.state.lock();
        if state.leading {
            info!(term = state.term, "Metadata store stepped down");
        }
        state.leading = false;
    }

    pub fn term(&self) -> Term {
        self.state.lock().term
    }

    pub fn is_leader(&self) -> bool {
        self.state.lock().leading
    }

    /// Begin a transaction in `term`.
    pub fn begin(self: &Arc<Self>, term: Term) -> Result<RdbTx> {
        self.check_term(term)?;
        Ok(RdbTx::new(self.clone(), term))
    }

    pub(crate) fn check_term(&self, term: Term) -> Result<()> {
        let state = self.state.lock();
        if !state.leading || state.term != term {
            return Err(CofferError::LeadershipLost { term });
        }
        Ok(())
    }

    pub(crate) fn backend(&self) -> &dyn RdbBackend {
        self.backend.as_ref()
    }

    /// Apply a committed batch while holding the leadership state, so a
    /// concurrent step-down cannot slip between the check and the write.
    pub(crate) fn apply(&self, term: Term, ops: backend::WriteOps) -> Result<()> {
        let state = self.state.lock();
        if !state.leading || state.term != term {
            return Err(CofferError::LeadershipLost { term });
        }
        self.backend.write(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_begin_requires_current_term() {
        let db = Rdb::open_memory();
        assert!(matches!(db.begin(0), Err(CofferError::LeadershipLost { .. })));

        let term = db.step_up().unwrap();
        assert_eq!(term, 1);
        assert!(db.begin(term).is_ok());

        let next = db.step_up().unwrap();
        assert!(db.begin(term).is_err());
        assert!(db.begin(next).is_ok());

        db.step_down();
        assert!(db.begin(next).is_err());
    }

    #[test]
    fn test_commit_after_step_down_fails() {
        let db = Rdb::open_memory();
        let term = db.step_up().unwrap();
        let root = RdbPath::root();

        let mut tx = db.begin(term).unwrap();
        tx.update_bytes(&root, b"k", b"v").unwrap();
        db.step_down();
        assert!(matches!(tx.commit(), Err(CofferError::LeadershipLost { .. })));

        let term = db.step_up().unwrap();
        let tx = db.begin(term).unwrap();
        assert!(tx.lookup_bytes(&root, b"k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_term_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let db = Rdb::open_rocks(dir.path()).unwrap();
            db.step_up().unwrap();
            db.step_up().unwrap();
        }
        let db = Rdb::open_rocks(dir.path()).unwrap();
        assert_eq!(db.term(), 2);
        assert_eq!(db.step_up().unwrap(), 3);
    }

    #[test]
    fn test_int_key_order() {
        assert!(int_key(2) < int_key(10));
        assert_eq!(decode_int_key(&int_key(77)).unwrap(), 77);
        assert!(decode_int_key(b"short").is_err());
    }
}
