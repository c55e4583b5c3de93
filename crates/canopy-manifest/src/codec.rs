//! Node serialization and hashing.
//!
//! ## Byte Layout
//!
//! All integers are big-endian.
//!
//! ```text
//! header:  "CTM1" | entry_count: u32
//! entry:   name_len: u16 | name (UTF-8) | kind: u8 | hash: [u8; 20]
//! ```
//!
//! Entries are written in strictly increasing byte order of their names, so
//! a given entry set has exactly one encoding and therefore one hash.

use std::cmp::Ordering;

use canopy_store::{compute_hash, NodeHash, HASH_LEN};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};

pub const MAGIC: &[u8; 4] = b"CTM1";
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

const HEADER_LEN: usize = 8;
// name_len + kind + hash; the name itself adds at least one byte
const MIN_ENTRY_LEN: usize = 2 + 1 + 1 + HASH_LEN;

/// Hash of the node with no entries.
pub static EMPTY_TREE: Lazy<NodeHash> = Lazy::new(|| {
    let none: [Entry; 0] = [];
    compute_hash(&encode_canonical(none.iter()))
});

/// What an entry points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Executable,
    Symlink,
    Directory,
}

impl EntryKind {
    pub fn tag(self) -> u8 {
        match self {
            EntryKind::File => b'f',
            EntryKind::Executable => b'x',
            EntryKind::Symlink => b'l',
            EntryKind::Directory => b't',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'f' => Some(EntryKind::File),
            b'x' => Some(EntryKind::Executable),
            b'l' => Some(EntryKind::Symlink),
            b't' => Some(EntryKind::Directory),
            _ => None,
        }
    }

    pub fn is_dir(self) -> bool {
        self == EntryKind::Directory
    }
}

/// One named child of a directory node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub hash: NodeHash,
    pub kind: EntryKind,
}

impl Entry {
    pub fn new(name: impl Into<String>, hash: NodeHash, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            hash,
            kind,
        }
    }

    pub fn file(name: impl Into<String>, hash: NodeHash) -> Self {
        Self::new(name, hash, EntryKind::File)
    }

    pub fn directory(name: impl Into<String>, hash: NodeHash) -> Self {
        Self::new(name, hash, EntryKind::Directory)
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Check that `name` is usable as a single path component.
pub fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty name");
    }
    if name == "." || name == ".." {
        return Err("reserved name");
    }
    if name.len() > MAX_NAME_LEN {
        return Err("name too long");
    }
    if name.bytes().any(|b| b == b'/' || b == 0) {
        return Err("contains a path separator or NUL");
    }
    Ok(())
}

/// Order used by traversals: a directory sorts as if its name ended in `/`,
/// which makes depth-first output sorted by full path bytes.
pub fn path_order(a: &Entry, b: &Entry) -> Ordering {
    let ka = a.name.bytes().chain(a.is_dir().then_some(b'/'));
    let kb = b.name.bytes().chain(b.is_dir().then_some(b'/'));
    ka.cmp(kb)
}

/// Serialize entries in canonical order.
pub fn encode(entries: &[Entry]) -> Result<Vec<u8>, EncodeError> {
    let mut sorted: Vec<&Entry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

    for pair in sorted.windows(2) {
        if pair[0].name == pair[1].name {
            return Err(EncodeError::DuplicateName(pair[0].name.clone()));
        }
    }
    for entry in &sorted {
        validate_name(&entry.name).map_err(|reason| EncodeError::InvalidName {
            name: entry.name.clone(),
            reason,
        })?;
    }

    Ok(encode_canonical(sorted.into_iter()))
}

/// Serialize entries that are already validated and sorted by name.
pub(crate) fn encode_canonical<'a, I>(entries: I) -> Vec<u8>
where
    I: ExactSizeIterator<Item = &'a Entry>,
{
    let mut out = Vec::with_capacity(HEADER_LEN + entries.len() * (MIN_ENTRY_LEN + 16));
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in entries {
        out.extend_from_slice(&(entry.name.len() as u16).to_be_bytes());
        out.extend_from_slice(entry.name.as_bytes());
        out.push(entry.kind.tag());
        out.extend_from_slice(entry.hash.as_bytes());
    }
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(DecodeError::Truncated {
                offset: self.pos,
                needed: n,
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Parse node bytes produced by [`encode`].
///
/// Rejects anything that is not the canonical encoding of its entries, so a
/// decoded node always re-encodes to the same bytes.
pub fn decode(bytes: &[u8]) -> Result<Vec<Entry>, DecodeError> {
    let mut reader = Reader { bytes, pos: 0 };

    if reader.take(MAGIC.len()).map_err(|_| DecodeError::BadMagic)? != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let count = reader.u32()? as usize;

    // Never trust the count for allocation beyond what the input can hold
    let max_possible = bytes.len().saturating_sub(HEADER_LEN) / MIN_ENTRY_LEN;
    let mut entries: Vec<Entry> = Vec::with_capacity(count.min(max_possible));

    for _ in 0..count {
        let name_len = reader.u16()? as usize;
        let name_offset = reader.pos;
        let name = std::str::from_utf8(reader.take(name_len)?)
            .map_err(|_| DecodeError::InvalidUtf8 {
                offset: name_offset,
            })?
            .to_string();
        validate_name(&name).map_err(|reason| DecodeError::InvalidName {
            name: name.clone(),
            reason,
        })?;

        let kind_offset = reader.pos;
        let tag = reader.take(1)?[0];
        let kind = EntryKind::from_tag(tag).ok_or(DecodeError::InvalidKind {
            tag,
            offset: kind_offset,
        })?;

        let hash_bytes = reader.take(HASH_LEN)?;
        let hash = NodeHash::from_slice(hash_bytes).ok_or(DecodeError::Truncated {
            offset: kind_offset + 1,
            needed: HASH_LEN,
        })?;

        if let Some(prev) = entries.last() {
            if prev.name.as_bytes() >= name.as_bytes() {
                return Err(DecodeError::OutOfOrder { name });
            }
        }
        entries.push(Entry { name, hash, kind });
    }

    let trailing = bytes.len() - reader.pos;
    if trailing != 0 {
        return Err(DecodeError::TrailingBytes { count: trailing });
    }

    Ok(entries)
}

/// Content hash of an entry set.
pub fn hash(entries: &[Entry]) -> Result<NodeHash, EncodeError> {
    Ok(compute_hash(&encode(entries)?))
}

/// Content hash of already-encoded node bytes.
pub fn hash_bytes(encoded: &[u8]) -> NodeHash {
    compute_hash(encoded)
}
