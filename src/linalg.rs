//! Sparse term matrices and a randomized truncated SVD.
//!
//! The full lyrics matrix (hundreds of thousands of songs by 5000 words) does
//! not fit in memory as a dense array, but the SVD only ever needs products
//! of the matrix with thin dense blocks. [`CsrMatrix`] provides those and
//! [`truncated_svd`] builds on them:
//!
//! 1. range finder: `Q = orth(A·Ω)` for a random `Ω` with `k + oversampling`
//!    columns, refined by power iterations;
//! 2. `B = Qᵀ·A` is small, so `B·Bᵀ` is decomposed exactly with Jacobi
//!    rotations;
//! 3. right singular vectors are recovered from `Bᵀ·W / σ`.

use anyhow::{bail, Result};
use log::{debug, trace};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Compressed sparse row matrix of `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    indptr: Vec<usize>,
    indices: Vec<u32>,
    values: Vec<f64>,
    ncols: usize,
}

impl CsrMatrix {
    /// Builds a matrix from rows of `(column, value)` pairs.
    ///
    /// # Errors
    ///
    /// Fails when a column index is outside `ncols`.
    pub fn from_rows<I, R>(rows: I, ncols: usize) -> Result<Self>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (u32, f64)>,
    {
        let mut indptr = vec![0];
        let mut indices = Vec::new();
        let mut values = Vec::new();

        for row in rows {
            for (column, value) in row {
                if column as usize >= ncols {
                    bail!("Column {column} outside matrix width {ncols}");
                }
                indices.push(column);
                values.push(value);
            }
            indptr.push(indices.len());
        }

        Ok(Self {
            indptr,
            indices,
            values,
            ncols,
        })
    }

    pub fn nrows(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Non-zero entries of one row.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.indptr[row]..self.indptr[row + 1];
        self.indices[range.clone()]
            .iter()
            .zip(&self.values[range])
            .map(|(&column, &value)| (column as usize, value))
    }

    /// Applies `f(column, value)` to every stored value.
    pub fn map_values(&mut self, f: impl Fn(usize, f64) -> f64) {
        for (column, value) in self.indices.iter().zip(self.values.iter_mut()) {
            *value = f(*column as usize, *value);
        }
    }

    /// `self · dense`, shape `nrows × dense.ncols()`.
    pub fn dot_dense(&self, dense: &Array2<f64>) -> Array2<f64> {
        debug_assert_eq!(dense.nrows(), self.ncols);
        let mut out = Array2::zeros((self.nrows(), dense.ncols()));
        for (i, mut out_row) in out.axis_iter_mut(Axis(0)).enumerate() {
            for (column, value) in self.row(i) {
                out_row.scaled_add(value, &dense.row(column));
            }
        }
        out
    }

    /// `selfᵀ · dense`, shape `ncols × dense.ncols()`.
    pub fn t_dot_dense(&self, dense: &Array2<f64>) -> Array2<f64> {
        debug_assert_eq!(dense.nrows(), self.nrows());
        let mut out = Array2::zeros((self.ncols, dense.ncols()));
        for i in 0..self.nrows() {
            let dense_row = dense.row(i);
            for (column, value) in self.row(i) {
                out.row_mut(column).scaled_add(value, &dense_row);
            }
        }
        out
    }
}

/// Rank-`k` factorization `A ≈ U·diag(σ)·Vᵀ`, keeping `σ` and `Vᵀ`.
#[derive(Debug, Clone)]
pub struct TruncatedSvd {
    /// Descending singular values, length `k`.
    pub singular_values: Array1<f64>,
    /// Right singular vectors as rows, shape `k × ncols`.
    pub components: Array2<f64>,
}

/// Parameters of [`truncated_svd`].
#[derive(Debug, Clone, Copy)]
pub struct SvdParams {
    pub components: usize,
    pub oversampling: usize,
    pub power_iterations: usize,
    pub seed: u64,
}

/// Randomized truncated SVD of a sparse matrix.
///
/// Computes the top `k = params.components` singular values and right
/// singular vectors of `A` (`m × n`):
///
/// 1. Draw a uniform random `n × (k + oversampling)` test matrix and form
///    `Y = A·Ω`
/// 2. Run `power_iterations` rounds of `Y = A·(Aᵀ·Y)`, re-orthonormalizing
///    each time (modified Gram-Schmidt)
/// 3. Project: `B = Qᵀ·A`, then eigendecompose the small `B·Bᵀ` with Jacobi
///    rotations
/// 4. Keep the top `k` pairs: `σᵢ = √λᵢ` and `vᵢ = Bᵀ·uᵢ / σᵢ`
///
/// Deterministic for a given seed. Each component's sign is chosen so that
/// its largest-magnitude entry is positive.
///
/// # Errors
///
/// Fails when `components` is 0 or larger than `min(nrows, ncols)`.
///
/// # Examples
///
/// ```
/// use lyrec::linalg::{truncated_svd, CsrMatrix, SvdParams};
///
/// let rows = vec![vec![(0, 2.0), (1, 1.0)], vec![(1, 3.0)], vec![(2, 1.0)]];
/// let matrix = CsrMatrix::from_rows(rows, 3)?;
/// let params = SvdParams { components: 2, oversampling: 2, power_iterations: 2, seed: 7 };
/// let svd = truncated_svd(&matrix, params)?;
/// assert_eq!(svd.components.dim(), (2, 3));
/// assert!(svd.singular_values[0] >= svd.singular_values[1]);
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// # Performance
///
/// Each power iteration costs two sparse products, `O(nnz · (k + p))`. The
/// eigenproblem is dense but only `(k + p)²`, independent of the corpus size.
pub fn truncated_svd(matrix: &CsrMatrix, params: SvdParams) -> Result<TruncatedSvd> {
    let (m, n) = (matrix.nrows(), matrix.ncols());
    let k = params.components;
    if k == 0 || k > m.min(n) {
        bail!(
            "Cannot extract {k} components from a {m}×{n} matrix (need 1..={})",
            m.min(n)
        );
    }

    let width = (k + params.oversampling).min(m.min(n));
    debug!("Randomized SVD: {m}×{n}, nnz {}, k {k}, width {width}", matrix.nnz());

    let mut rng = StdRng::seed_from_u64(params.seed);
    let omega = Array2::from_shape_fn((n, width), |_| rng.gen_range(-1.0..1.0));

    let mut q = orthonormalize_columns(matrix.dot_dense(&omega));
    for iteration in 0..params.power_iterations {
        trace!("Power iteration {}", iteration + 1);
        let z = orthonormalize_columns(matrix.t_dot_dense(&q));
        q = orthonormalize_columns(matrix.dot_dense(&z));
    }

    // Bᵀ = Aᵀ·Q, so B·Bᵀ = (Aᵀ·Q)ᵀ·(Aᵀ·Q).
    let b_t = matrix.t_dot_dense(&q);
    let gram = b_t.t().dot(&b_t);
    let (eigenvalues, eigenvectors) = symmetric_eigen(gram);

    let mut order: Vec<usize> = (0..width).collect();
    order.sort_by(|&a, &b| {
        eigenvalues[b]
            .partial_cmp(&eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let right = b_t.dot(&eigenvectors);
    let mut singular_values = Array1::zeros(k);
    let mut components = Array2::zeros((k, n));

    for (target, &source) in order.iter().take(k).enumerate() {
        let sigma = eigenvalues[source].max(0.0).sqrt();
        singular_values[target] = sigma;
        if sigma <= f64::EPSILON * (1.0 + eigenvalues[order[0]].max(0.0).sqrt()) {
            continue;
        }

        let mut component = right.column(source).mapv(|x| x / sigma);
        let pivot = component
            .iter()
            .copied()
            .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
        if pivot < 0.0 {
            component.mapv_inplace(|x| -x);
        }
        components.row_mut(target).assign(&component);
    }

    debug!("Singular values: {:?}", singular_values.as_slice());
    Ok(TruncatedSvd {
        singular_values,
        components,
    })
}

/// Modified Gram-Schmidt with re-orthogonalization.
///
/// Columns that are numerically dependent on earlier ones become zero.
pub fn orthonormalize_columns(mut matrix: Array2<f64>) -> Array2<f64> {
    for j in 0..matrix.ncols() {
        let original_norm = matrix.column(j).dot(&matrix.column(j)).sqrt();
        for _ in 0..2 {
            for i in 0..j {
                let projection = matrix.column(i).dot(&matrix.column(j));
                let basis = matrix.column(i).to_owned();
                matrix.column_mut(j).scaled_add(-projection, &basis);
            }
        }

        let norm = matrix.column(j).dot(&matrix.column(j)).sqrt();
        if norm > 1e-10 * original_norm && norm > 0.0 {
            matrix.column_mut(j).mapv_inplace(|x| x / norm);
        } else {
            matrix.column_mut(j).fill(0.0);
        }
    }
    matrix
}

/// Eigen-decomposition of a symmetric matrix with cyclic Jacobi rotations.
///
/// Returns unsorted eigenvalues and the eigenvectors as columns.
pub fn symmetric_eigen(mut a: Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);
    let scale = a.iter().map(|x| x * x).sum::<f64>().max(f64::MIN_POSITIVE);

    for sweep in 0..100 {
        let off_diagonal: f64 = (0..n)
            .flat_map(|p| (0..n).filter(move |&q| q != p).map(move |q| (p, q)))
            .map(|(p, q)| a[[p, q]] * a[[p, q]])
            .sum();
        if off_diagonal <= 1e-24 * scale {
            trace!("Jacobi converged after {sweep} sweeps");
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq == 0.0 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let (akp, akq) = (a[[k, p]], a[[k, q]]);
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[[p, k]], a[[q, k]]);
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let (vkp, vkq) = (v[[k, p]], v[[k, q]]);
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    (a.diag().to_owned(), v)
}
