use datachat_core::{split_text, ChunkConfig};
use proptest::prelude::*;

proptest! {
    #[test]
    fn chunks_respect_size_and_overlap(
        text in "[a-z \n₹é]{0,400}",
        max_size in 1usize..60,
        overlap in 0usize..60,
    ) {
        let (max_size, overlap) = ChunkConfig::new(max_size, overlap).effective();
        let chunks = split_text(&text, max_size, overlap);
        prop_assert!(!chunks.is_empty());
        for chunk in &chunks {
            prop_assert!(chunk.chars().count() <= max_size);
        }
        if chunks.len() == 1 {
            prop_assert_eq!(&chunks[0], &text);
        }
        for pair in chunks.windows(2) {
            let tail: Vec<char> = pair[0].chars().collect();
            let head: Vec<char> = pair[1].chars().take(overlap).collect();
            prop_assert_eq!(&tail[tail.len() - overlap..], head.as_slice());
        }
        let mut rebuilt = chunks[0].clone();
        for chunk in &chunks[1..] {
            rebuilt.extend(chunk.chars().skip(overlap));
        }
        prop_assert_eq!(rebuilt, text);
    }

    #[test]
    fn splitting_is_deterministic(text in "[a-z \n]{0,300}", max_size in 1usize..40) {
        prop_assert_eq!(split_text(&text, max_size, 3), split_text(&text, max_size, 3));
    }
}
