//! Exact nearest-neighbor index over pre-computed verse vectors.
//!
//! The index is built once from an ordered list of fixed-dimension vectors;
//! the vector at list position `i` belongs to the verse whose index position
//! is `i`. Building validates every vector up front and either returns a
//! complete index or an [`IndexError`], never a partial one. Changing the
//! catalog means building a fresh index and swapping it in whole.
//!
//! # Distance → similarity
//!
//! | Metric | Distance | Similarity |
//! |--------|----------|------------|
//! | `l2` | squared Euclidean | `exp(-d / scale)` |
//! | `cosine` | `1 - cos(θ)` | `1 - d` |
//!
//! Both transforms are monotonically decreasing and clamped to `[0, 1]`.

use std::cmp::Ordering;
use thiserror::Error;

use crate::embedding::cosine_similarity;

#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    #[error("catalog has {verses} verses but {vectors} vectors were supplied")]
    CountMismatch { verses: usize, vectors: usize },
    #[error("vector at position {position} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        position: usize,
        expected: usize,
        found: usize,
    },
    #[error("vector at position {position} contains a non-finite component")]
    NonFinite { position: usize },
    #[error("verse positions must be contiguous from 0; position {position} is missing")]
    PositionGap { position: usize },
    #[error("query vector has {found} dimensions, index has {expected}")]
    QueryDimension { expected: usize, found: usize },
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    L2 { scale: f64 },
    Cosine,
}

impl Metric {
    pub fn from_config(name: &str, scale: f64) -> Result<Self, IndexError> {
        match name {
            "l2" => Ok(Metric::L2 { scale }),
            "cosine" => Ok(Metric::Cosine),
            other => Err(IndexError::UnknownMetric(other.to_string())),
        }
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Metric::L2 { .. } => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| {
                    let d = (*x - *y) as f64;
                    d * d
                })
                .sum(),
            Metric::Cosine => 1.0 - cosine_similarity(a, b) as f64,
        }
    }

    /// Maps a distance to a `[0, 1]` similarity; closer is higher.
    pub fn similarity(&self, distance: f64) -> f64 {
        if distance.is_nan() {
            return 0.0;
        }
        let s = match self {
            Metric::L2 { scale } => (-distance.max(0.0) / scale).exp(),
            Metric::Cosine => 1.0 - distance,
        };
        s.clamp(0.0, 1.0)
    }
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f64,
    pub similarity: f64,
}

#[derive(Debug)]
pub struct SemanticIndex {
    metric: Metric,
    dims: usize,
    vectors: Vec<Vec<f32>>,
}

impl SemanticIndex {
    /// Builds an index from vectors ordered by position.
    ///
    /// An empty list yields an empty index whose queries return nothing.
    pub fn build(vectors: Vec<Vec<f32>>, metric: Metric) -> Result<Self, IndexError> {
        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
        for (position, v) in vectors.iter().enumerate() {
            if v.len() != dims || dims == 0 {
                return Err(IndexError::DimensionMismatch {
                    position,
                    expected: dims,
                    found: v.len(),
                });
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(IndexError::NonFinite { position });
            }
        }
        Ok(Self {
            metric,
            dims,
            vectors,
        })
    }

    /// Builds an index that must cover exactly `expected` catalog positions.
    pub fn build_for_catalog(
        expected: usize,
        vectors: Vec<Vec<f32>>,
        metric: Metric,
    ) -> Result<Self, IndexError> {
        if vectors.len() != expected {
            return Err(IndexError::CountMismatch {
                verses: expected,
                vectors: vectors.len(),
            });
        }
        Self::build(vectors, metric)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Returns up to `k` hits ordered by distance ascending, ties by position.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dims {
            return Err(IndexError::QueryDimension {
                expected: self.dims,
                found: vector.len(),
            });
        }

        let mut hits: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, self.metric.distance(vector, v)))
            .collect();

        let by_distance = |a: &(usize, f64), b: &(usize, f64)| -> Ordering {
            a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
        };

        let k = k.min(hits.len());
        if k < hits.len() {
            hits.select_nth_unstable_by(k - 1, by_distance);
            hits.truncate(k);
        }
        hits.sort_by(by_distance);

        Ok(hits
            .into_iter()
            .map(|(position, distance)| Neighbor {
                position,
                distance,
                similarity: self.metric.similarity(distance),
            })
            .collect())
    }
}
