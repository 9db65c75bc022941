/// Dense matrices that receive an evaluated Jacobian.
///
/// Entries are written one at a time with [`Matrix::set`], so the storage order of the
/// implementation does not matter: nalgebra is column-major, ndarray and nested vectors
/// are row-major.
///
/// # Examples
///
/// ```rust
/// use ratelaw_jit::prelude::Matrix;
///
/// let mut jac: Vec<Vec<f64>> = Matrix::zeros(2, 3);
/// jac.set(1, 2, 4.0);
/// assert_eq!(jac.dims(), (2, 3));
/// assert_eq!(jac.get(1, 2), 4.0);
/// ```
pub trait Matrix {
    /// A zero-filled matrix with `rows` rows and `cols` columns.
    fn zeros(rows: usize, cols: usize) -> Self;

    /// (rows, columns)
    fn dims(&self) -> (usize, usize);

    fn get(&self, row: usize, col: usize) -> f64;

    fn set(&mut self, row: usize, col: usize, value: f64);
}

/// Row vectors of equal length.
///
/// Ragged rows report the length of the shortest row as the column count.
impl Matrix for Vec<Vec<f64>> {
    fn zeros(rows: usize, cols: usize) -> Self {
        vec![vec![0.0; cols]; rows]
    }

    fn dims(&self) -> (usize, usize) {
        let cols = self.iter().map(Vec::len).min().unwrap_or(0);
        (self.len(), cols)
    }

    fn get(&self, row: usize, col: usize) -> f64 {
        self[row][col]
    }

    fn set(&mut self, row: usize, col: usize, value: f64) {
        self[row][col] = value;
    }
}

#[cfg(feature = "ndarray")]
impl Matrix for ndarray::Array2<f64> {
    fn zeros(rows: usize, cols: usize) -> Self {
        ndarray::Array2::zeros((rows, cols))
    }

    fn dims(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn get(&self, row: usize, col: usize) -> f64 {
        self[[row, col]]
    }

    fn set(&mut self, row: usize, col: usize, value: f64) {
        self[[row, col]] = value;
    }
}

#[cfg(feature = "nalgebra")]
impl Matrix for nalgebra::DMatrix<f64> {
    fn zeros(rows: usize, cols: usize) -> Self {
        nalgebra::DMatrix::zeros(rows, cols)
    }

    fn dims(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn get(&self, row: usize, col: usize) -> f64 {
        self[(row, col)]
    }

    fn set(&mut self, row: usize, col: usize, value: f64) {
        self[(row, col)] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_layout<M: Matrix>() {
        let mut m = M::zeros(2, 3);
        assert_eq!(m.dims(), (2, 3));
        for row in 0..2 {
            for col in 0..3 {
                m.set(row, col, (10 * row + col) as f64);
            }
        }
        assert_eq!(m.get(0, 2), 2.0);
        assert_eq!(m.get(1, 0), 10.0);
        assert_eq!(m.get(1, 2), 12.0);
    }

    #[test]
    fn test_nested_vec_matrix() {
        check_layout::<Vec<Vec<f64>>>();
        assert_eq!(<Vec<Vec<f64>> as Matrix>::zeros(0, 4).dims(), (0, 0));
    }

    #[test]
    fn test_ragged_rows() {
        let ragged = vec![vec![0.0; 3], vec![0.0; 1], vec![0.0; 3]];
        assert_eq!(ragged.dims(), (3, 1));
        let longer = vec![vec![0.0; 2], vec![0.0; 4]];
        assert_eq!(longer.dims(), (2, 2));
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_ndarray_matrix() {
        check_layout::<ndarray::Array2<f64>>();
    }

    #[cfg(feature = "nalgebra")]
    #[test]
    fn test_nalgebra_matrix() {
        check_layout::<nalgebra::DMatrix<f64>>();
    }
}
