use bytes::Bytes;
use std::cmp::Ordering;
use std::fmt;

/// Compares two keys the way the map file is sorted: shorter keys go first,
/// keys of the same length are compared byte by byte.
///
/// Note that this is not a lexicographic order, `b"b"` sorts before `b"aa"`.
/// Builder and reader must agree on it or lookups get routed to the wrong block.
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Immutable key wrapper. Clones are cheap since the bytes are shared.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ByteKey(Bytes);

impl ByteKey {
    pub fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    pub fn copy_from_slice(raw: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(raw))
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Ord for ByteKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(&self.0, &other.0)
    }
}

impl PartialOrd for ByteKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl AsRef<[u8]> for ByteKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for ByteKey {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for ByteKey {
    fn from(raw: Vec<u8>) -> Self {
        Self(Bytes::from(raw))
    }
}

impl From<&'static [u8]> for ByteKey {
    fn from(raw: &'static [u8]) -> Self {
        Self(Bytes::from_static(raw))
    }
}

impl fmt::Debug for ByteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
