use crate::error::IndexError;
use crate::models::{Chunk, ChunkingConfig, Page};

#[derive(Debug, Clone, Default)]
pub struct DocumentText {
    pub text: String,
    pub pages: Vec<Page>,
}

impl DocumentText {
    pub fn from_pages<I, S>(raw_pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pages = Vec::new();
        let mut cursor = 0usize;

        for (index, raw) in raw_pages.into_iter().enumerate() {
            let text = raw.into();
            let length = text.chars().count();
            pages.push(Page {
                index,
                text,
                start: cursor,
            });
            cursor += length + 1;
        }

        let text = pages
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Self { text, pages }
    }

    pub fn page_offsets(&self) -> Vec<usize> {
        self.pages.iter().map(|page| page.start).collect()
    }

    pub fn split(&self, config: ChunkingConfig) -> Result<Vec<Chunk>, IndexError> {
        split_chunks(&self.text, &self.page_offsets(), config)
    }
}

pub fn find_page(start: usize, page_offsets: &[usize]) -> usize {
    page_offsets
        .partition_point(|offset| *offset <= start)
        .saturating_sub(1)
}

/// Offsets and sizes are in characters. A chunk spanning a page break
/// belongs to the page where it starts.
pub fn split_chunks(
    text: &str,
    page_offsets: &[usize],
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IndexError> {
    config.validate()?;

    // byte position of every char boundary, plus the end of the text
    let boundaries = text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()))
        .collect::<Vec<_>>();
    let char_len = boundaries.len() - 1;
    let step = config.step();

    let mut chunks = Vec::with_capacity(char_len.div_ceil(step));
    let mut start = 0usize;
    while start < char_len {
        let end = (start + config.chunk_size).min(char_len);
        chunks.push(Chunk {
            page: find_page(start, page_offsets),
            text: text[boundaries[start]..boundaries[end]].to_string(),
            start,
            end,
        });
        start += step;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn page_offsets_account_for_join_newline() {
        let document = DocumentText::from_pages(["abc", "", "de"]);
        assert_eq!(document.text, "abc\n\nde");
        assert_eq!(document.page_offsets(), vec![0, 4, 5]);
    }

    #[test]
    fn chunks_after_first_page_boundary_belong_to_second_page() -> Result<(), IndexError> {
        let document = DocumentText::from_pages(["a".repeat(500), "b".repeat(1_500)]);
        let chunks = document.split(ChunkingConfig {
            chunk_size: 2_000,
            overlap: 400,
        })?;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].page, 0);
        assert_eq!(chunks[0].text.chars().count(), 2_000);
        assert_eq!(chunks[1].start, 1_600);
        assert_eq!(chunks[1].page, 1);
        assert_eq!(chunks[1].end, 2_001);
        Ok(())
    }

    #[test]
    fn overlap_equal_to_size_is_a_config_error() {
        let result = split_chunks(
            "some text",
            &[0],
            ChunkingConfig {
                chunk_size: 400,
                overlap: 400,
            },
        );
        assert!(matches!(result, Err(IndexError::Config(_))));
    }

    #[test]
    fn empty_text_yields_no_chunks() -> Result<(), IndexError> {
        let document = DocumentText::from_pages(Vec::<String>::new());
        assert!(document.split(ChunkingConfig::default())?.is_empty());

        let blank_page = DocumentText::from_pages([""]);
        assert!(blank_page.split(ChunkingConfig::default())?.is_empty());
        Ok(())
    }

    #[test]
    fn multibyte_text_is_split_on_characters() -> Result<(), IndexError> {
        let chunks = split_chunks(
            "ação é útil",
            &[0],
            ChunkingConfig {
                chunk_size: 4,
                overlap: 1,
            },
        )?;
        assert_eq!(chunks[0].text, "ação");
        assert_eq!(chunks[1].text, "o é ");
        assert_eq!(chunks.last().map(|chunk| chunk.text.as_str()), Some("il"));
        Ok(())
    }

    #[test]
    fn find_page_before_first_offset_is_page_zero() {
        assert_eq!(find_page(0, &[]), 0);
        assert_eq!(find_page(3, &[5, 10]), 0);
        assert_eq!(find_page(10, &[0, 5, 10]), 2);
        assert_eq!(find_page(7, &[0, 5, 5, 10]), 2);
    }

    proptest! {
        #[test]
        fn chunk_starts_advance_by_step_and_cover_text(
            text in "[a-zé \n]{0,300}",
            chunk_size in 1usize..64,
            overlap_seed in 0usize..64,
        ) {
            let overlap = overlap_seed % chunk_size;
            let config = ChunkingConfig { chunk_size, overlap };
            let chunks = split_chunks(&text, &[0], config).unwrap();
            let char_len = text.chars().count();

            for (position, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.start, position * config.step());
                prop_assert!(chunk.end <= char_len);
                prop_assert!(chunk.end - chunk.start <= chunk_size);
            }

            let mut covered = vec![false; char_len];
            for chunk in &chunks {
                for slot in &mut covered[chunk.start..chunk.end] {
                    *slot = true;
                }
            }
            prop_assert!(covered.iter().all(|seen| *seen));
        }

        #[test]
        fn find_page_is_monotonic(
            mut offsets in proptest::collection::vec(0usize..1_000, 0..20),
            first in 0usize..1_200,
            delta in 0usize..200,
        ) {
            offsets.sort_unstable();
            prop_assert!(find_page(first, &offsets) <= find_page(first + delta, &offsets));
        }
    }
}
