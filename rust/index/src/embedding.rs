use heatspace_distance::normalize_in_place;
use heatspace_error::{ErrorCodes, HeatspaceError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmbeddingMatrixError {
    #[error("Row `{row}` has `{got}` dimensions, expected `{expected}`")]
    RaggedRow {
        row: usize,
        expected: usize,
        got: usize,
    },
    #[error("Flat buffer of length `{len}` is not a multiple of dimension `{dim}`")]
    BadFlatLength { len: usize, dim: usize },
    #[error("Embedding dimension must be nonzero")]
    ZeroDimension,
}

impl HeatspaceError for EmbeddingMatrixError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

/// Dense row-major matrix of `f32` embeddings, one row per point.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingMatrix {
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn from_flat(data: Vec<f32>, dim: usize) -> Result<Self, EmbeddingMatrixError> {
        if dim == 0 {
            return Err(EmbeddingMatrixError::ZeroDimension);
        }
        if data.len() % dim != 0 {
            return Err(EmbeddingMatrixError::BadFlatLength {
                len: data.len(),
                dim,
            });
        }
        Ok(Self { dim, data })
    }

    /// Builds a matrix from rows of equal length. The dimension of an empty
    /// set of rows is taken from `dim_if_empty`.
    pub fn from_rows(rows: &[Vec<f32>], dim_if_empty: usize) -> Result<Self, EmbeddingMatrixError> {
        let dim = rows.first().map(|row| row.len()).unwrap_or(dim_if_empty);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for (row, values) in rows.iter().enumerate() {
            if values.len() != dim {
                return Err(EmbeddingMatrixError::RaggedRow {
                    row,
                    expected: dim,
                    got: values.len(),
                });
            }
            data.extend_from_slice(values);
        }
        Self::from_flat(data, dim)
    }

    pub fn from_row(row: &[f32]) -> Result<Self, EmbeddingMatrixError> {
        Self::from_flat(row.to_vec(), row.len())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_rows(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Panics if `index >= num_rows()`.
    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn get_row(&self, index: usize) -> Option<&[f32]> {
        (index < self.num_rows()).then(|| self.row(index))
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim)
    }

    /// Scales every row to unit length.
    pub fn normalized(mut self) -> Self {
        for row in self.data.chunks_exact_mut(self.dim) {
            normalize_in_place(row);
        }
        self
    }
}
