use crate::error::{Result, TensorError};
use std::fmt;

/// The shape of a 2-D matrix: `rows` x `cols`, stored row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    rows: usize,
    cols: usize,
}

impl Shape {
    /// Create a new `rows` x `cols` shape.
    pub fn new(rows: usize, cols: usize) -> Self {
        Shape { rows, cols }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.rows * self.cols
    }

    /// Row-major strides: `[cols, 1]`.
    pub fn strides(&self) -> [usize; 2] {
        [self.cols, 1]
    }

    /// Flattened row-major index of `(row, col)`.
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// The transposed shape.
    pub fn transposed(&self) -> Shape {
        Shape::new(self.cols, self.rows)
    }

    /// Validates `self @ rhs` and returns the output shape `[self.rows, rhs.cols]`.
    pub fn matmul_output(&self, rhs: &Shape) -> Result<Shape> {
        if self.cols != rhs.rows {
            return Err(TensorError::invalid_dimension(
                "matmul",
                format!(
                    "[{}x{}] @ [{}x{}]: inner dimensions differ",
                    self.rows, self.cols, rhs.rows, rhs.cols
                ),
            ));
        }
        Ok(Shape::new(self.rows, rhs.cols))
    }

    /// Validates that a bias of `len` elements broadcasts across the rows of
    /// this shape.
    pub fn check_bias(&self, len: usize) -> Result<()> {
        if len != self.cols {
            return Err(TensorError::invalid_dimension(
                "bias",
                format!("bias length {} but output has {} columns", len, self.cols),
            ));
        }
        Ok(())
    }

    /// Validates that a flat buffer of `len` elements holds exactly this shape.
    pub fn check_len(&self, op: &'static str, len: usize) -> Result<()> {
        if len != self.numel() {
            return Err(TensorError::invalid_dimension(
                op,
                format!("buffer of {} elements cannot hold shape {}", len, self),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}x{}]", self.rows, self.cols)
    }
}

impl From<(usize, usize)> for Shape {
    fn from((rows, cols): (usize, usize)) -> Self {
        Shape::new(rows, cols)
    }
}
