//! SHA-256 helpers used for content addressing and integrity checks.
//!
//! Everything here works on explicit byte inputs so it can be tested without
//! touching the network or the filesystem.

use std::io::{self, Write};

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
pub const CHECKSUM_HEX_LEN: usize = 64;

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// True if `value` looks like a lowercase hex SHA-256 digest.
pub fn is_checksum(value: &str) -> bool {
    value.len() == CHECKSUM_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Compares two hex digests ignoring case.
pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}

/// Incremental hasher that also counts bytes.
#[derive(Default, Clone)]
pub struct ChecksumState {
    hasher: Sha256,
    len: u64,
}

impl ChecksumState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len += chunk.len() as u64;
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `(hex_digest, byte_len)`.
    pub fn finalize(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.len)
    }
}

/// `Write` adapter that hashes everything passing through it.
pub struct HashingWriter<W> {
    inner: W,
    state: ChecksumState,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            state: ChecksumState::new(),
        }
    }

    /// Returns the inner writer with `(hex_digest, byte_len)` of what was written.
    pub fn finish(self) -> (W, String, u64) {
        let (digest, len) = self.state.finalize();
        (self.inner, digest, len)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.state.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
