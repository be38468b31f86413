use crate::cancel::CancellationToken;
use crate::error::IndexError;
use tracing::debug;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingRole {
    Passage,
    Query,
}

impl EmbeddingRole {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Passage => "passage: ",
            Self::Query => "query: ",
        }
    }

    pub fn apply(self, text: &str) -> String {
        format!("{}{}", self.prefix(), text)
    }
}

pub trait Embedder {
    fn dimensions(&self) -> usize;

    /// Encodes already-prefixed inputs into unit-normalized vectors, one
    /// per input and in input order.
    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;

    fn embed(&self, texts: &[String], role: EmbeddingRole) -> Result<Vec<Vec<f32>>, IndexError> {
        let inputs = texts
            .iter()
            .map(|text| role.apply(text))
            .collect::<Vec<_>>();
        let vectors = self.embed_batch(&inputs)?;
        check_batch(&vectors, inputs.len(), self.dimensions())?;
        Ok(vectors)
    }
}

fn check_batch(vectors: &[Vec<f32>], expected: usize, dimensions: usize) -> Result<(), IndexError> {
    if vectors.len() != expected {
        return Err(IndexError::Embedding(format!(
            "embedder returned {} vectors for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimensions) {
        return Err(IndexError::Embedding(format!(
            "embedder returned a {}-dimension vector, expected {}",
            bad.len(),
            dimensions
        )));
    }
    Ok(())
}

/// Embeds passages in batches, checking `cancel` before each batch.
pub fn embed_passages<E>(
    embedder: &E,
    texts: &[String],
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<f32>>, IndexError>
where
    E: Embedder + ?Sized,
{
    let batch_size = batch_size.max(1);
    let mut vectors = Vec::with_capacity(texts.len());

    for (batch_number, batch) in texts.chunks(batch_size).enumerate() {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        vectors.extend(embedder.embed(batch, EmbeddingRole::Passage)?);
        debug!(
            batch = batch_number + 1,
            embedded = vectors.len(),
            total = texts.len(),
            "embedded passage batch"
        );
    }

    Ok(vectors)
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        Ok(inputs.iter().map(|input| self.embed_one(input)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_one("Hydraulic pressure and flow");
        let second = embedder.embed_one("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_unit_vectors_of_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed_one("abcdef");
        assert_eq!(vector.len(), 32);
        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn roles_prefix_inputs_differently() -> Result<(), IndexError> {
        let embedder = CharacterNgramEmbedder::default();
        let text = vec!["pump maintenance".to_string()];
        let passage = embedder.embed(&text, EmbeddingRole::Passage)?;
        let query = embedder.embed(&text, EmbeddingRole::Query)?;
        assert_ne!(passage, query);
        assert_eq!(EmbeddingRole::Query.apply("x"), "query: x");
        Ok(())
    }

    struct ShortEmbedder;

    impl Embedder for ShortEmbedder {
        fn dimensions(&self) -> usize {
            4
        }

        fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
            Ok(inputs.iter().skip(1).map(|_| vec![0.5; 4]).collect())
        }
    }

    #[test]
    fn misaligned_batches_are_rejected() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let result = ShortEmbedder.embed(&texts, EmbeddingRole::Passage);
        assert!(matches!(result, Err(IndexError::Embedding(_))));
    }

    #[derive(Default)]
    struct BatchRecorder {
        batches: RefCell<Vec<usize>>,
    }

    impl Embedder for BatchRecorder {
        fn dimensions(&self) -> usize {
            1
        }

        fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
            self.batches.borrow_mut().push(inputs.len());
            Ok(inputs.iter().map(|_| vec![1.0]).collect())
        }
    }

    #[test]
    fn passages_are_embedded_in_batches() -> Result<(), IndexError> {
        let recorder = BatchRecorder::default();
        let texts = (0..5).map(|i| i.to_string()).collect::<Vec<_>>();
        let vectors = embed_passages(&recorder, &texts, 2, &CancellationToken::new())?;
        assert_eq!(vectors.len(), 5);
        assert_eq!(*recorder.batches.borrow(), vec![2, 2, 1]);
        Ok(())
    }

    #[test]
    fn cancelled_token_stops_before_first_batch() {
        let recorder = BatchRecorder::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let texts = vec!["a".to_string()];
        let result = embed_passages(&recorder, &texts, 8, &cancel);
        assert!(matches!(result, Err(IndexError::Cancelled)));
        assert!(recorder.batches.borrow().is_empty());
    }
}
