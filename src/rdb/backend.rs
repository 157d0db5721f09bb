//! Storage backends for the metadata store.

use crate::error::Result;
use parking_lot::RwLock;
use rocksdb::{Options, DB};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

/// A batch of puts (`Some`) and deletes (`None`) applied atomically.
pub type WriteOps = Vec<(Vec<u8>, Option<Vec<u8>>)>;

/// Ordered byte-keyed storage under the transactional layer.
pub trait RdbBackend: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply every operation or none.
    fn write(&self, ops: WriteOps) -> Result<()>;
}

/// Volatile backend for tests and single-process deployments.
#[derive(Default)]
pub struct MemBackend {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RdbBackend for MemBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read();
        Ok(map
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write(&self, ops: WriteOps) -> Result<()> {
        let mut map = self.map.write();
        for (key, value) in ops {
            match value {
                Some(value) => {
                    map.insert(key, value);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// Persistent backend on RocksDB.
pub struct RocksBackend {
    db: DB,
}

impl RocksBackend {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }
}

impl RdbBackend for RocksBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let iter = self.db.iterator(rocksdb::IteratorMode::From(
            prefix,
            rocksdb::Direction::Forward,
        ));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn write(&self, ops: WriteOps) -> Result<()> {
        let mut batch = rocksdb::WriteBatch::default();
        for (key, value) in ops {
            match value {
                Some(value) => batch.put(&key, value),
                None => batch.delete(&key),
            }
        }
        self.db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(backend: &dyn RdbBackend) {
        backend
            .write(vec![
                (b"a/1".to_vec(), Some(b"one".to_vec())),
                (b"a/2".to_vec(), Some(b"two".to_vec())),
                (b"b/1".to_vec(), Some(b"other".to_vec())),
            ])
            .unwrap();

        assert_eq!(backend.get(b"a/1").unwrap(), Some(b"one".to_vec()));
        let scanned = backend.scan_prefix(b"a/").unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[1].0, b"a/2".to_vec());

        backend.write(vec![(b"a/1".to_vec(), None)]).unwrap();
        assert_eq!(backend.get(b"a/1").unwrap(), None);
        assert_eq!(backend.scan_prefix(b"a/").unwrap().len(), 1);
    }

    #[test]
    fn test_mem_backend() {
        exercise(&MemBackend::new());
    }

    #[test]
    fn test_rocks_backend() {
        let dir = tempdir().unwrap();
        let backend = RocksBackend::open(dir.path()).unwrap();
        exercise(&backend);
    }
}
