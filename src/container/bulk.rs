//! Client-exposed buffers for variable-length payloads.
//!
//! A [`Bulk`] travels with the request and comes back with the reply, so a
//! handler can pull from it and push into it like a remote buffer.

use crate::error::{CofferError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bulk {
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

impl Bulk {
    /// A zeroed buffer of `len` bytes.
    pub fn with_len(len: usize) -> Self {
        Self { data: vec![0; len] }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Pull `len` bytes starting at `offset`.
    pub fn get(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                CofferError::Protocol(format!(
                    "bulk read {}+{} beyond {} bytes",
                    offset,
                    len,
                    self.data.len()
                ))
            })?;
        Ok(&self.data[offset..end])
    }

    /// Push `bytes` at `offset`.
    pub fn put(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                CofferError::Protocol(format!(
                    "bulk write {}+{} beyond {} bytes",
                    offset,
                    bytes.len(),
                    self.data.len()
                ))
            })?;
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let mut bulk = Bulk::with_len(4);
        bulk.put(1, b"ab").unwrap();
        assert_eq!(bulk.get(0, 4).unwrap(), &[0, b'a', b'b', 0]);
        assert!(matches!(bulk.put(3, b"xy"), Err(CofferError::Protocol(_))));
        assert!(matches!(bulk.get(usize::MAX, 2), Err(CofferError::Protocol(_))));
        assert!(bulk.get(4, 0).unwrap().is_empty());
    }
}
