//! Transactions over the KVS tree.

use super::{KvsAttr, KvsClass, Rdb, RdbPath};
use crate::error::{CofferError, Result};
use crate::types::Term;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const VALUE_TAG: u8 = 0x00;
const KVS_TAG: u8 = 0x01;

/// What an iteration callback wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterAction {
    Continue,
    Stop,
}

enum Stored<'a> {
    Value(&'a [u8]),
    Kvs(KvsClass),
}

fn decode_stored(raw: &[u8]) -> Result<Stored<'_>> {
    match raw.split_first() {
        Some((&VALUE_TAG, rest)) => Ok(Stored::Value(rest)),
        Some((&KVS_TAG, [class])) => Ok(Stored::Kvs(KvsClass::from_byte(*class)?)),
        _ => Err(CofferError::Storage("corrupt stored value".to_string())),
    }
}

/// A transaction pinned to one leadership term.
///
/// Writes are buffered until [`RdbTx::commit`]; dropping the transaction
/// aborts it.
pub struct RdbTx {
    db: Arc<Rdb>,
    term: Term,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl RdbTx {
    pub(crate) fn new(db: Arc<Rdb>, term: Term) -> Self {
        Self {
            db,
            term,
            writes: BTreeMap::new(),
        }
    }

    pub fn term(&self) -> Term {
        self.term
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        self.db.backend().get(key)
    }

    fn scan_raw(&self, prefix: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.db.backend().scan_prefix(prefix)?.into_iter().collect();

        for (key, pending) in self
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match pending {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged)
    }

    /// Class of the KVS at `path`, or `NotFound` if it does not exist.
    fn kvs_class(&self, path: &RdbPath) -> Result<KvsClass> {
        let Some((parent, key)) = path.split_last() else {
            return Ok(KvsClass::Generic);
        };
        match self.get_raw(&parent.entry_key(key))? {
            Some(raw) => match decode_stored(&raw)? {
                Stored::Kvs(class) => Ok(class),
                Stored::Value(_) => Err(CofferError::NotFound(format!("{:?} is not a KVS", path))),
            },
            None => Err(CofferError::NotFound(format!("KVS {:?}", path))),
        }
    }

    fn check_key(class: KvsClass, key: &[u8]) -> Result<()> {
        match class {
            KvsClass::Integer if key.len() != 8 => Err(CofferError::InvalidArgument(format!(
                "integer KVS key of {} bytes",
                key.len()
            ))),
            KvsClass::Generic if key.is_empty() => {
                Err(CofferError::InvalidArgument("empty key".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Whether the KVS at `path` exists.
    pub fn kvs_exists(&self, path: &RdbPath) -> Result<bool> {
        match self.kvs_class(path) {
            Ok(_) => Ok(true),
            Err(CofferError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Look up a value. `NotFound` if the key is absent.
    pub fn lookup_bytes(&self, path: &RdbPath, key: &[u8]) -> Result<Vec<u8>> {
        self.kvs_class(path)?;
        let raw = self
            .get_raw(&path.entry_key(key))?
            .ok_or_else(|| CofferError::NotFound(format!("key in {:?}", path)))?;
        match decode_stored(&raw)? {
            Stored::Value(value) => Ok(value.to_vec()),
            Stored::Kvs(_) => Err(CofferError::InvalidArgument(format!(
                "key in {:?} names a KVS",
                path
            ))),
        }
    }

    /// Look up and decode a bincode value.
    pub fn lookup<T: DeserializeOwned>(&self, path: &RdbPath, key: &[u8]) -> Result<T> {
        let raw = self.lookup_bytes(path, key)?;
        bincode::deserialize(&raw).map_err(|e| CofferError::Deserialization(e.to_string()))
    }

    /// Insert or overwrite a value.
    pub fn update_bytes(&mut self, path: &RdbPath, key: &[u8], value: &[u8]) -> Result<()> {
        let class = self.kvs_class(path)?;
        Self::check_key(class, key)?;

        let entry = path.entry_key(key);
        if let Some(raw) = self.get_raw(&entry)? {
            if let Stored::Kvs(_) = decode_stored(&raw)? {
                return Err(CofferError::InvalidArgument(format!(
                    "cannot overwrite KVS in {:?}",
                    path
                )));
            }
        }

        let mut stored = Vec::with_capacity(value.len() + 1);
        stored.push(VALUE_TAG);
        stored.extend_from_slice(value);
        self.writes.insert(entry, Some(stored));
        Ok(())
    }

    /// Insert or overwrite a bincode value.
    pub fn update<T: Serialize>(&mut self, path: &RdbPath, key: &[u8], value: &T) -> Result<()> {
        let data = bincode::serialize(value)?;
        self.update_bytes(path, key, &data)
    }

    /// Delete a value. `NotFound` if the key is absent.
    pub fn delete(&mut self, path: &RdbPath, key: &[u8]) -> Result<()> {
        self.kvs_class(path)?;
        let entry = path.entry_key(key);
        match self.get_raw(&entry)? {
            None => Err(CofferError::NotFound(format!("key in {:?}", path))),
            Some(raw) => match decode_stored(&raw)? {
                Stored::Kvs(_) => Err(CofferError::InvalidArgument(format!(
                    "use destroy_kvs for KVS in {:?}",
                    path
                ))),
                Stored::Value(_) => {
                    self.writes.insert(entry, None);
                    Ok(())
                }
            },
        }
    }

    /// Create an empty KVS under `key`. `AlreadyExists` if the key is taken.
    pub fn create_kvs(&mut self, path: &RdbPath, key: &[u8], attr: KvsAttr) -> Result<()> {
        let class = self.kvs_class(path)?;
        Self::check_key(class, key)?;

        let entry = path.entry_key(key);
        if self.get_raw(&entry)?.is_some() {
            return Err(CofferError::AlreadyExists(format!("key in {:?}", path)));
        }
        self.writes
            .insert(entry, Some(vec![KVS_TAG, attr.class as u8]));
        Ok(())
    }

    /// Destroy the KVS under `key` and everything below it.
    pub fn destroy_kvs(&mut self, path: &RdbPath, key: &[u8]) -> Result<()> {
        self.kvs_class(path)?;
        let entry = path.entry_key(key);
        match self.get_raw(&entry)? {
            None => return Err(CofferError::NotFound(format!("KVS in {:?}", path))),
            Some(raw) => {
                if let Stored::Value(_) = decode_stored(&raw)? {
                    return Err(CofferError::InvalidArgument(format!(
                        "key in {:?} is not a KVS",
                        path
                    )));
                }
            }
        }

        let subtree = path.child(key).encode();
        for stale in self.scan_raw(&subtree)?.into_keys() {
            self.writes.insert(stale, None);
        }
        self.writes.insert(entry, None);
        Ok(())
    }

    /// Visit the entries of a KVS in key order. Child KVSs are visited
    /// with an empty value.
    pub fn iterate<F>(&self, path: &RdbPath, backward: bool, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<IterAction>,
    {
        self.kvs_class(path)?;
        let prefix = path.entry_prefix();
        let entries = self.scan_raw(&prefix)?;

        let ordered: Box<dyn Iterator<Item = (&Vec<u8>, &Vec<u8>)>> = if backward {
            Box::new(entries.iter().rev())
        } else {
            Box::new(entries.iter())
        };

        for (full_key, raw) in ordered {
            let key = &full_key[prefix.len()..];
            let value: &[u8] = match decode_stored(raw)? {
                Stored::Value(value) => value,
                Stored::Kvs(_) => &[],
            };
            if visit(key, value)? == IterAction::Stop {
                break;
            }
        }
        Ok(())
    }

    /// Apply all buffered writes atomically.
    pub fn commit(self) -> Result<()> {
        if self.writes.is_empty() {
            return self.db.check_term(self.term);
        }
        let ops = self.writes.into_iter().collect();
        self.db.apply(self.term, ops)
    }
}
