/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Incremental BLAKE3 digest for data that arrives in chunks.
#[derive(Debug, Default, Clone)]
pub struct StreamDigest {
    hasher: blake3::Hasher,
    len: u64,
}

impl StreamDigest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Total bytes seen so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hex-encoded digest of everything fed so far.
    #[must_use]
    pub fn finish_hex(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}
