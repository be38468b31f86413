use crate::error::IndexError;
use std::cmp::Ordering;

const MAGIC: &[u8; 4] = b"PRFI";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Append-only: row `i` is the `i`-th vector passed to [`FlatIndex::add`].
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimensions: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            data: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        self.data.get(start..start + self.dimensions)
    }

    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if let Some(bad) = vectors.iter().find(|row| row.len() != self.dimensions) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.len(),
            });
        }
        if self.dimensions == 0 && !vectors.is_empty() {
            return Err(IndexError::InvalidArgument(
                "cannot add rows to a zero-dimension index".to_string(),
            ));
        }

        self.data.reserve(vectors.len() * self.dimensions);
        for row in vectors {
            self.data.extend_from_slice(row);
        }
        Ok(())
    }

    /// Best first; ties keep the lower row first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, usize)>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored = self
            .data
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(position, row)| (inner_product(row, query), position))
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| match right.0.total_cmp(&left.0) {
            Ordering::Equal => left.1.cmp(&right.1),
            other => other,
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Layout: magic, format version (u32), dimensions (u32), row count
    /// (u64), then row-major little-endian f32 values.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimensions as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < HEADER_LEN {
            return Err(format!("{} bytes is shorter than the header", bytes.len()));
        }
        if &bytes[0..4] != MAGIC {
            return Err("unrecognized vector index header".to_string());
        }

        let version = u32::from_le_bytes(le_array(&bytes[4..8]));
        if version != FORMAT_VERSION {
            return Err(format!("unsupported vector index version {version}"));
        }
        let dimensions = u32::from_le_bytes(le_array(&bytes[8..12])) as usize;
        let rows = u64::from_le_bytes(le_array(&bytes[12..20]));

        let expected = usize::try_from(rows)
            .ok()
            .and_then(|rows| rows.checked_mul(dimensions))
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| format!("row count {rows} overflows"))?;
        let body = &bytes[HEADER_LEN..];
        if body.len() != expected {
            return Err(format!(
                "expected {expected} bytes of vector data for {rows} rows of dimension {dimensions}, found {}",
                body.len()
            ));
        }

        let data = body
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes(le_array(raw)))
            .collect();
        Ok(Self { dimensions, data })
    }
}

fn le_array<const N: usize>(raw: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(raw);
    out
}

pub fn inner_product(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}
