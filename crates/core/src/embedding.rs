use sha2::{Digest, Sha256};

/// Maps text to a fixed-length vector.
///
/// Implementations must be deterministic: identical text yields an identical
/// vector for the lifetime of the embedder.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// One vector per input, in input order.
    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 64,
            seed: 1337,
        }
    }
}

/// Bag-of-tokens embedding. Each lowercase token adds one to the slot picked
/// by SHA-256 of the seed and the token, so vectors are identical across
/// builds and platforms.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
    seed: [u8; 8],
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self {
            dimensions: config.dimensions.max(1),
            seed: config.seed.to_le_bytes(),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        for token in tokens(text) {
            vector[self.slot(&token)] += 1.0;
        }
        normalize(&mut vector);
        vector
    }

    fn slot(&self, token: &str) -> usize {
        let digest = Sha256::new()
            .chain_update(self.seed)
            .chain_update(token.as_bytes())
            .finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.dimensions as u64) as usize
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HashEmbedderConfig::default())
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hash"
    }
}

/// Lowercase alphanumeric runs; punctuation such as `revenue:` folds into `revenue`.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datachat_index::cosine_similarity;

    #[test]
    fn embeddings_are_deterministic_and_normalized() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed_text("total revenue by region");
        let b = embedder.embed_text("total revenue by region");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn punctuation_and_case_are_ignored() {
        let embedder = HashEmbedder::default();
        assert_eq!(
            embedder.embed_text("Revenue: 100"),
            embedder.embed_text("revenue 100")
        );
    }

    #[test]
    fn shared_tokens_raise_similarity() {
        let embedder = HashEmbedder::default();
        let query = embedder.embed_text("revenue of Alpha");
        let related = embedder.embed_text("name: Alpha, revenue: 100");
        let unrelated = embedder.embed_text("warehouse capacity units");
        assert!(
            cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated)
        );
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashEmbedder::new(HashEmbedderConfig {
            dimensions: 8,
            seed: 1,
        });
        assert_eq!(embedder.embed_text(""), vec![0.0; 8]);
        assert_eq!(embedder.dimensions(), 8);
    }

    #[test]
    fn slots_are_pinned_to_the_digest() {
        let embedder = HashEmbedder::default();
        assert_eq!(embedder.slot("revenue"), 61);
        assert_eq!(embedder.slot("alpha"), 8);
        let small = HashEmbedder::new(HashEmbedderConfig {
            dimensions: 8,
            seed: 1,
        });
        assert_eq!(small.slot("revenue"), 6);
        let vector = embedder.embed_text("Revenue");
        assert_eq!(vector[61], 1.0);
    }
}
