use sha2::{Digest, Sha256, Sha512};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::state::ChecksumAlgorithm;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Incremental digest over a byte stream. Memory use is constant regardless
/// of object size.
pub enum StreamingDigest {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl StreamingDigest {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => StreamingDigest::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => StreamingDigest::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            StreamingDigest::Sha256(hasher) => hasher.update(bytes),
            StreamingDigest::Sha512(hasher) => hasher.update(bytes),
        }
    }

    /// Lowercase hex rendering of the final digest.
    pub fn finalize(self) -> String {
        match self {
            StreamingDigest::Sha256(hasher) => format!("{:x}", hasher.finalize()),
            StreamingDigest::Sha512(hasher) => format!("{:x}", hasher.finalize()),
        }
    }
}

pub fn digest_bytes(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> String {
    let mut hasher = StreamingDigest::new(algorithm);
    hasher.update(bytes);
    hasher.finalize()
}

/// Stream a reader through the digest in fixed-size chunks.
pub async fn digest_reader<R>(algorithm: ChecksumAlgorithm, reader: &mut R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = StreamingDigest::new(algorithm);
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
