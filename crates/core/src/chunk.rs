use serde::{Deserialize, Serialize};

/// Split points tried in priority order before falling back to a raw cut.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub max_size: usize,
    /// Characters shared by adjacent chunks.
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            overlap: 200,
        }
    }
}

impl ChunkConfig {
    pub fn new(max_size: usize, overlap: usize) -> Self {
        Self { max_size, overlap }
    }

    /// Sizes actually applied: `max_size >= 1` and `overlap < max_size`.
    pub fn effective(&self) -> (usize, usize) {
        let max_size = self.max_size.max(1);
        let overlap = self.overlap.min(max_size - 1);
        (max_size, overlap)
    }
}

/// Splits text into overlapping, size-bounded chunks.
///
/// Sizes are measured in characters, not bytes. Each cut is placed after the
/// last paragraph break that fits the window, else the last line break, else
/// the last space, else exactly at `max_size`. The next chunk starts
/// `overlap` characters before the previous cut.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let (max_size, overlap) = self.config.effective();
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(idx, _)| idx)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = offsets.len() - 1;
        if total <= max_size {
            return vec![text.to_string()];
        }
        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            if total - start <= max_size {
                chunks.push(text[offsets[start]..].to_string());
                break;
            }
            let limit = start + max_size;
            let end = boundary_cut(text, &offsets, start + overlap, limit).unwrap_or(limit);
            chunks.push(text[offsets[start]..offsets[end]].to_string());
            start = end - overlap;
        }
        chunks
    }
}

/// Convenience wrapper over [`Chunker::split`].
pub fn split_text(text: &str, max_size: usize, overlap: usize) -> Vec<String> {
    Chunker::new(ChunkConfig::new(max_size, overlap)).split(text)
}

/// Finds a cut position `c` (in chars) with `floor < c <= limit` that lands
/// right after a separator.
fn boundary_cut(text: &str, offsets: &[usize], floor: usize, limit: usize) -> Option<usize> {
    let window_start = offsets[floor];
    let window = &text[window_start..offsets[limit]];
    SEPARATORS.iter().find_map(|sep| {
        let pos = window.rfind(sep)?;
        let cut_byte = window_start + pos + sep.len();
        offsets.binary_search(&cut_byte).ok()
    })
}
