use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Boundary to whatever produces encoded test payloads. Implementations
/// embed `token` into the payload so detection results can be verified
/// against it.
pub trait PayloadEncoder {
    fn encode(&self, token: &str) -> Result<Vec<u8>>;
}

#[derive(Clone, Debug)]
pub struct EncodedImage {
    pub token: String,
    pub bytes: Vec<u8>,
    pub base64: String,
}

impl EncodedImage {
    pub fn new(token: impl Into<String>, bytes: Vec<u8>) -> Self {
        let base64 = BASE64.encode(&bytes);
        Self {
            token: token.into(),
            bytes,
            base64,
        }
    }
}

/// Pre-built pool of (token, payload) pairs. Built once per process so
/// payload construction cost never lands inside request timing; `pick`
/// reuses entries across requests by design.
#[derive(Debug)]
pub struct ImageCache {
    entries: Vec<EncodedImage>,
}

impl ImageCache {
    pub fn build(encoder: &dyn PayloadEncoder, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(anyhow!("image cache size must be greater than zero"));
        }
        let mut entries = Vec::with_capacity(size);
        for index in 0..size {
            let token = format!("qr-{}-{}", index, random_text(20));
            let bytes = encoder
                .encode(&token)
                .with_context(|| format!("payload encoder failed for entry {}", index))?;
            entries.push(EncodedImage::new(token, bytes));
        }
        Ok(Self { entries })
    }

    /// Build a cache from pre-encoded payloads, e.g. images loaded from disk.
    pub fn from_entries(entries: Vec<EncodedImage>) -> Result<Self> {
        if entries.is_empty() {
            return Err(anyhow!("image cache requires at least one entry"));
        }
        Ok(Self { entries })
    }

    /// Uniform-random selection with replacement.
    pub fn pick(&self) -> &EncodedImage {
        let index = rand::thread_rng().gen_range(0..self.entries.len());
        &self.entries[index]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn random_text(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
