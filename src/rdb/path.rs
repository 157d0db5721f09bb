//! Paths naming KVSs inside the metadata tree.

use std::fmt;

const COMPONENT_TAG: u8 = 0x02;
const ENTRY_TAG: u8 = 0x01;

/// Locator of a KVS: the root plus a sequence of keys, each naming a child
/// KVS of the previous one.
///
/// Encoded keys are prefix-free: every entry of a KVS starts with
/// `encode(path) ++ [0x01]`, and the whole subtree of a child KVS starts with
/// `encode(child)`, which no sibling shares.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct RdbPath {
    components: Vec<Vec<u8>>,
}

impl RdbPath {
    /// The root KVS. It always exists.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &[u8]) {
        self.components.push(key.to_vec());
    }

    /// Path of the child KVS stored under `key`.
    pub fn child(&self, key: &[u8]) -> Self {
        let mut path = self.clone();
        path.push(key);
        path
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Parent path and the key this KVS is stored under.
    pub fn split_last(&self) -> Option<(RdbPath, &[u8])> {
        let (last, rest) = self.components.split_last()?;
        Some((
            RdbPath {
                components: rest.to_vec(),
            },
            last.as_slice(),
        ))
    }

    /// Prefix shared by this KVS's entries and all of its descendants.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let len = self.components.iter().map(|c| c.len() + 5).sum();
        let mut out = Vec::with_capacity(len);
        for component in &self.components {
            out.push(COMPONENT_TAG);
            out.extend_from_slice(&(component.len() as u32).to_be_bytes());
            out.extend_from_slice(component);
        }
        out
    }

    /// Prefix shared by this KVS's direct entries only.
    pub(crate) fn entry_prefix(&self) -> Vec<u8> {
        let mut out = self.encode();
        out.push(ENTRY_TAG);
        out
    }

    pub(crate) fn entry_key(&self, key: &[u8]) -> Vec<u8> {
        let mut out = self.entry_prefix();
        out.extend_from_slice(key);
        out
    }
}

impl fmt::Debug for RdbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/")?;
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            match std::str::from_utf8(component) {
                Ok(s) if s.chars().all(|c| c.is_ascii_graphic()) => write!(f, "{}", s)?,
                _ => {
                    for b in component {
                        write!(f, "{:02x}", b)?;
                    }
                }
            }
        }
        Ok(())
    }
}
