//! SHA-512 content hashing for blob identity and key fingerprints.

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512};

/// Length in bytes of a SHA-512 digest.
pub const DIGEST_LEN: usize = 64;

/// A 512-bit SHA-512 hash of a byte sequence.
///
/// Two blobs with the same `ContentHash` are treated as identical content,
/// so the hash doubles as the blob's storage name. Rendered as 128 lowercase
/// hex characters, which is safe to use as a file name on every platform.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; DIGEST_LEN]);

impl ContentHash {
    /// Computes a content hash from a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finish()
    }

    /// Wraps an already computed digest.
    pub fn from_digest(digest: [u8; DIGEST_LEN]) -> Self {
        Self(digest)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Returns the lowercase hex rendering of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Error returned when parsing a hex digest fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseHashError {
    /// The input contained a non-hex character or had odd length.
    #[error("invalid hex digest: {0}")]
    InvalidHex(String),

    /// The input decoded to the wrong number of bytes.
    #[error("digest must be {DIGEST_LEN} bytes, got {0}")]
    WrongLength(usize),
}

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| ParseHashError::InvalidHex(e.to_string()))?;
        let digest: [u8; DIGEST_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseHashError::WrongLength(bytes.len()))?;
        Ok(Self(digest))
    }
}

// serde only derives arrays up to 32 elements, and the hex form is what
// appears on disk anyway.
impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Streaming SHA-512 accumulator.
///
/// Implements [`io::Write`] so it can sit beside a file in a tee, and so
/// serializers that write to an `io::Write` can feed it directly.
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha512,
    len: u64,
}

impl ContentHasher {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes into the running hash.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.len += data.len() as u64;
    }

    /// Number of bytes fed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if no bytes have been fed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consumes the accumulator and returns the final digest.
    pub fn finish(self) -> ContentHash {
        let out = self.inner.finalize();
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&out);
        ContentHash(digest)
    }
}

impl io::Write for ContentHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentHasher").field("len", &self.len).finish()
    }
}

/// Identity of a cache key: the SHA-512 of its canonical encoding.
///
/// Kept distinct from [`ContentHash`] so a key fingerprint can never be
/// passed where a blob id is expected.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(ContentHash);

impl Fingerprint {
    /// Wraps the hash of a key's canonical encoding.
    pub fn new(hash: ContentHash) -> Self {
        Self(hash)
    }

    /// Returns the underlying hash.
    pub fn hash(&self) -> &ContentHash {
        &self.0
    }

    /// Returns the lowercase hex rendering, used as the metadata file name.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:02x}{:02x}..)", self.0 .0[0], self.0 .0[1])
    }
}

impl FromStr for Fingerprint {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}
