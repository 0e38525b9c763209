use crate::storage::models::Digest;
use blake3::Hasher;
use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::Path;

/// Streams file content through BLAKE3.
///
/// Equal digests are treated as equal content; no byte-for-byte comparison follows.
#[derive(Debug, Clone)]
pub struct ContentHasher {
    chunk_size: usize,
}

impl ContentHasher {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn digest_of(&self, path: &Path) -> io::Result<Digest> {
        let mut file = File::open(path)?;
        let mut hasher = Hasher::new();
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let bytes_read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Digest::from(hasher.finalize()))
    }

    /// Digest over the concatenation of `ordered` digests.
    ///
    /// The caller fixes the order (children by full path); a different order gives
    /// a different digest.
    pub fn combine<'a, I>(ordered: I) -> Digest
    where
        I: IntoIterator<Item = &'a Digest>,
    {
        let mut hasher = Hasher::new();
        for digest in ordered {
            hasher.update(digest.as_bytes());
        }
        Digest::from(hasher.finalize())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}
