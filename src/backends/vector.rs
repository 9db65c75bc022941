/// Contiguous `f64` buffers used for value vectors and right-hand-side outputs.
///
/// Compiled formulas read their inputs from a flat slice, so any type that can lend its
/// storage as a slice can feed a [`Model`](crate::model::Model) directly.
///
/// # Examples
///
/// ```rust
/// use ratelaw_jit::prelude::Vector;
///
/// let mut rates: Vec<f64> = Vector::zeros(3);
/// rates.as_mut_slice()[1] = 2.5;
/// assert_eq!(Vector::len(&rates), 3);
/// assert_eq!(rates[1], 2.5);
/// ```
pub trait Vector {
    fn as_slice(&self) -> &[f64];

    fn as_mut_slice(&mut self) -> &mut [f64];

    /// A zero-filled buffer of length `len`.
    fn zeros(len: usize) -> Self;

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Vector for Vec<f64> {
    fn as_slice(&self) -> &[f64] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self
    }

    fn zeros(len: usize) -> Self {
        vec![0.0; len]
    }
}

/// Fixed-size arrays; `zeros` panics if `len` differs from `N`.
impl<const N: usize> Vector for [f64; N] {
    fn as_slice(&self) -> &[f64] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self
    }

    fn zeros(len: usize) -> Self {
        assert_eq!(len, N, "array buffer has fixed length {N}");
        [0.0; N]
    }
}

#[cfg(feature = "ndarray")]
impl Vector for ndarray::Array1<f64> {
    fn as_slice(&self) -> &[f64] {
        // Arrays built by `zeros` or `from_vec` are always contiguous.
        ndarray::ArrayBase::as_slice(self).unwrap_or(&[])
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        ndarray::ArrayBase::as_slice_mut(self).unwrap_or(&mut [])
    }

    fn zeros(len: usize) -> Self {
        ndarray::Array1::zeros(len)
    }
}

#[cfg(feature = "nalgebra")]
impl Vector for nalgebra::DVector<f64> {
    fn as_slice(&self) -> &[f64] {
        nalgebra::Matrix::as_slice(self)
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        nalgebra::Matrix::as_mut_slice(self)
    }

    fn zeros(len: usize) -> Self {
        nalgebra::DVector::zeros(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill<V: Vector>(len: usize) -> V {
        let mut v = V::zeros(len);
        for (i, x) in v.as_mut_slice().iter_mut().enumerate() {
            *x = i as f64;
        }
        v
    }

    #[test]
    fn test_std_buffers() {
        let v: Vec<f64> = fill(4);
        assert_eq!(v, vec![0.0, 1.0, 2.0, 3.0]);
        let a: [f64; 3] = fill(3);
        assert_eq!(Vector::len(&a), 3);
        assert_eq!(a[2], 2.0);
        assert!(Vector::is_empty(&Vec::<f64>::zeros(0)));
    }

    #[test]
    #[should_panic]
    fn test_array_length_mismatch() {
        let _: [f64; 2] = Vector::zeros(3);
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_ndarray_buffer() {
        let v: ndarray::Array1<f64> = fill(3);
        assert_eq!(Vector::as_slice(&v), &[0.0, 1.0, 2.0]);
    }

    #[cfg(feature = "nalgebra")]
    #[test]
    fn test_nalgebra_buffer() {
        let v: nalgebra::DVector<f64> = fill(3);
        assert_eq!(v[2], 2.0);
        assert_eq!(Vector::len(&v), 3);
    }
}
