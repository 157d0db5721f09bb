//! User attributes of a container.
//!
//! Attributes travel in bulk buffers with a fixed layout:
//!
//! ```text
//! set:   name\0 name\0 ... | size (u64 LE) x count | values
//! get:   name\0 name\0 ... | size (u64 LE) x count | value slots
//! list:  name\0 name\0 ...
//! ```
//!
//! For get, the caller quotes a size per name. The reply replaces each
//! quote with the actual size and fills one slot of the quoted size per
//! non-zero quote. A zero quote only asks for the size.

use super::bulk::Bulk;
use super::service::Container;
use crate::error::{CofferError, Result};
use crate::rdb::{IterAction, RdbTx};
use tracing::{debug, error};

const SIZE_LEN: usize = std::mem::size_of::<u64>();

fn to_usize(n: u64) -> Result<usize> {
    usize::try_from(n).map_err(|_| CofferError::Protocol(format!("length {} too large", n)))
}

/// Split `count` NUL-terminated names off the front of `data`. Each name
/// keeps its NUL.
fn split_names(data: &[u8], count: usize) -> Result<Vec<&[u8]>> {
    // Every name carries at least its NUL
    if count > data.len() {
        return Err(CofferError::Protocol(format!(
            "{} bytes cannot hold {} names",
            data.len(),
            count
        )));
    }
    let mut names = Vec::with_capacity(count);
    let mut rest = data;
    for _ in 0..count {
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| CofferError::Protocol("unterminated attribute name".to_string()))?;
        let (name, tail) = rest.split_at(end + 1);
        names.push(name);
        rest = tail;
    }
    Ok(names)
}

/// Length of the size array for `count` attributes.
fn sizes_len(count: usize) -> Result<usize> {
    count
        .checked_mul(SIZE_LEN)
        .ok_or_else(|| CofferError::Protocol(format!("{} sizes overflow", count)))
}

fn read_sizes(data: &[u8], count: usize) -> Result<Vec<u64>> {
    if data.len() < sizes_len(count)? {
        return Err(CofferError::Protocol(format!(
            "{} bytes cannot hold {} sizes",
            data.len(),
            count
        )));
    }
    Ok(data
        .chunks_exact(SIZE_LEN)
        .take(count)
        .map(|chunk| {
            let mut raw = [0u8; SIZE_LEN];
            raw.copy_from_slice(chunk);
            u64::from_le_bytes(raw)
        })
        .collect())
}

/// Decode a set payload into `(name, value)` pairs, names NUL-terminated.
pub fn decode_attr_set(count: u64, data: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let count = to_usize(count)?;
    let names = split_names(data, count)?;
    let names_len: usize = names.iter().map(|name| name.len()).sum();
    let sizes = read_sizes(&data[names_len..], count)?;

    let mut offset = names_len + sizes_len(count)?;
    let mut attrs = Vec::with_capacity(count);
    for (name, size) in names.into_iter().zip(sizes) {
        let end = offset
            .checked_add(to_usize(size)?)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| CofferError::Protocol(format!("attribute value of {} bytes truncated", size)))?;
        attrs.push((name.to_vec(), data[offset..end].to_vec()));
        offset = end;
    }
    Ok(attrs)
}

/// Upsert every attribute of a set payload. One failure fails them all.
pub fn set(tx: &mut RdbTx, cont: &Container<'_>, count: u64, bulk: &Bulk) -> Result<()> {
    debug!(cont = %cont.uuid, count, size = bulk.len(), "Setting attributes");
    for (name, value) in decode_attr_set(count, bulk.as_slice())? {
        if let Err(e) = tx.update_bytes(&cont.user, &name, &value) {
            error!(cont = %cont.uuid, name = %String::from_utf8_lossy(&name), error = %e, "Failed to update attribute");
            return Err(e);
        }
    }
    Ok(())
}

/// Look up every named attribute and push sizes and values into `bulk`.
///
/// A missing name fails the whole request.
pub fn get(
    tx: &RdbTx,
    cont: &Container<'_>,
    count: u64,
    key_length: u64,
    mut bulk: Bulk,
) -> Result<Bulk> {
    debug!(cont = %cont.uuid, count, key_length, size = bulk.len(), "Getting attributes");
    let count = to_usize(count)?;
    let key_length = to_usize(key_length)?;

    let names = split_names(bulk.get(0, key_length)?, count)?;
    let quotes = read_sizes(bulk.get(key_length, sizes_len(count)?)?, count)?;

    let mut values = Vec::with_capacity(count);
    for name in names {
        match tx.lookup_bytes(&cont.user, name) {
            Ok(value) => values.push(value),
            Err(e) => {
                error!(cont = %cont.uuid, name = %String::from_utf8_lossy(name), error = %e, "Failed to look up attribute");
                return Err(e);
            }
        }
    }

    let mut slot = key_length + sizes_len(count)?;
    for (i, (value, quote)) in values.iter().zip(quotes).enumerate() {
        bulk.put(key_length + i * SIZE_LEN, &(value.len() as u64).to_le_bytes())?;
        if quote == 0 {
            continue;
        }
        let quote = to_usize(quote)?;
        bulk.put(slot, &value[..value.len().min(quote)])?;
        slot = slot
            .checked_add(quote)
            .ok_or_else(|| CofferError::Protocol(format!("value quote {} overflows", quote)))?;
    }
    Ok(bulk)
}

/// Report the total length of all names and copy as many whole names as
/// fit into `bulk`.
pub fn list(tx: &RdbTx, cont: &Container<'_>, bulk: Option<Bulk>) -> Result<(u64, Option<Bulk>)> {
    let mut bulk = bulk;
    let mut available = bulk.as_ref().map_or(0, Bulk::len);
    let mut offset = 0usize;
    let mut total = 0u64;

    tx.iterate(&cont.user, false, |name, _| {
        total += name.len() as u64;
        if let Some(bulk) = bulk.as_mut() {
            if !name.is_empty() && available >= name.len() {
                bulk.put(offset, name)?;
                offset += name.len();
                available -= name.len();
            }
        }
        Ok(IterAction::Continue)
    })?;

    debug!(cont = %cont.uuid, total, copied = offset, "Listed attributes");
    Ok((total, bulk))
}

fn push_name(data: &mut Vec<u8>, name: &str) -> Result<()> {
    if name.as_bytes().contains(&0) {
        return Err(CofferError::InvalidArgument(format!(
            "attribute name {:?} contains NUL",
            name
        )));
    }
    data.extend_from_slice(name.as_bytes());
    data.push(0);
    Ok(())
}

/// Build a set payload. Returns the attribute count and the bulk.
pub fn encode_attr_set(attrs: &[(&str, &[u8])]) -> Result<(u64, Bulk)> {
    let mut data = Vec::new();
    for (name, _) in attrs {
        push_name(&mut data, name)?;
    }
    for (_, value) in attrs {
        data.extend_from_slice(&(value.len() as u64).to_le_bytes());
    }
    for (_, value) in attrs {
        data.extend_from_slice(value);
    }
    Ok((attrs.len() as u64, Bulk::from_vec(data)))
}

/// A get request ready to send.
#[derive(Debug, Clone)]
pub struct AttrGetRequest {
    pub count: u64,
    pub key_length: u64,
    pub bulk: Bulk,
    quotes: Vec<u64>,
}

/// Build a get payload quoting `sizes[i]` bytes for `names[i]`.
pub fn encode_attr_get(names: &[&str], sizes: &[u64]) -> Result<AttrGetRequest> {
    if names.len() != sizes.len() {
        return Err(CofferError::InvalidArgument(format!(
            "{} names but {} sizes",
            names.len(),
            sizes.len()
        )));
    }

    let mut data = Vec::new();
    for name in names {
        push_name(&mut data, name)?;
    }
    let key_length = data.len() as u64;
    for size in sizes {
        data.extend_from_slice(&size.to_le_bytes());
    }
    let values = sizes
        .iter()
        .try_fold(0u64, |total, &size| total.checked_add(size))
        .ok_or_else(|| CofferError::InvalidArgument("quoted sizes overflow".to_string()))?;
    data.resize(data.len() + to_usize(values)?, 0);

    Ok(AttrGetRequest {
        count: names.len() as u64,
        key_length,
        bulk: Bulk::from_vec(data),
        quotes: sizes.to_vec(),
    })
}

/// One attribute from a get reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrValue {
    /// Full size of the stored value.
    pub size: u64,
    /// The value, cut to the quoted size.
    pub value: Vec<u8>,
}

impl AttrValue {
    pub fn is_truncated(&self) -> bool {
        (self.value.len() as u64) < self.size
    }
}

/// Read sizes and values out of a get reply.
pub fn decode_attr_get(request: &AttrGetRequest, reply: &Bulk) -> Result<Vec<AttrValue>> {
    let count = to_usize(request.count)?;
    let key_length = to_usize(request.key_length)?;
    let sizes = read_sizes(reply.get(key_length, sizes_len(count)?)?, count)?;

    let mut slot = key_length + sizes_len(count)?;
    let mut values = Vec::with_capacity(count);
    for (size, &quote) in sizes.into_iter().zip(&request.quotes) {
        let quote = to_usize(quote)?;
        let copied = to_usize(size)?.min(quote);
        let value = if quote == 0 {
            Vec::new()
        } else {
            reply.get(slot, copied)?.to_vec()
        };
        slot = slot.saturating_add(quote);
        values.push(AttrValue { size, value });
    }
    Ok(values)
}

/// Names copied into a list reply.
pub fn decode_attr_list(bulk: &Bulk) -> Result<Vec<String>> {
    bulk.as_slice()
        .split(|&b| b == 0)
        .take_while(|name| !name.is_empty())
        .map(|name| {
            String::from_utf8(name.to_vec())
                .map_err(|e| CofferError::Protocol(format!("attribute name: {}", e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_layout() {
        let (count, bulk) = encode_attr_set(&[("a", &b"xy"[..]), ("bc", &b""[..])]).unwrap();
        assert_eq!(count, 2);

        let attrs = decode_attr_set(count, bulk.as_slice()).unwrap();
        assert_eq!(attrs[0], (b"a\0".to_vec(), b"xy".to_vec()));
        assert_eq!(attrs[1], (b"bc\0".to_vec(), Vec::new()));
    }

    #[test]
    fn test_set_rejects_short_payload() {
        let (count, bulk) = encode_attr_set(&[("a", &b"xyz"[..])]).unwrap();
        let mut data = bulk.into_vec();
        data.pop();
        assert!(matches!(decode_attr_set(count, &data), Err(CofferError::Protocol(_))));
        assert!(matches!(decode_attr_set(2, b"a\0"), Err(CofferError::Protocol(_))));
    }

    #[test]
    fn test_huge_counts_rejected() {
        assert!(matches!(decode_attr_set(1 << 40, b"a\0"), Err(CofferError::Protocol(_))));
        assert!(matches!(split_names(b"a\0", 3), Err(CofferError::Protocol(_))));
        assert!(matches!(sizes_len(usize::MAX / 4), Err(CofferError::Protocol(_))));
        assert!(matches!(read_sizes(&[0; 8], usize::MAX), Err(CofferError::Protocol(_))));
    }

    #[test]
    fn test_names_with_nul_rejected() {
        assert!(encode_attr_set(&[("a\0b", &b""[..])]).is_err());
        assert!(encode_attr_get(&["ok"], &[]).is_err());
    }

    #[test]
    fn test_get_request_shape() {
        let req = encode_attr_get(&["ab", "c"], &[4, 0]).unwrap();
        assert_eq!(req.count, 2);
        assert_eq!(req.key_length, 5);
        assert_eq!(req.bulk.len(), 5 + 16 + 4);
    }

    #[test]
    fn test_list_decode_stops_at_padding() {
        let bulk = Bulk::from_vec(b"one\0two\0\0\0".to_vec());
        assert_eq!(decode_attr_list(&bulk).unwrap(), vec!["one", "two"]);
        assert!(decode_attr_list(&Bulk::with_len(4)).unwrap().is_empty());
    }
}
