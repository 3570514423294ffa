// src/basis.rs
//
// Legendre polynomial basis used to condense a time series into a handful
// of features (mean level, linear trend, curvature, ...).

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

/// Which polynomial degrees make up the basis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Degrees {
    /// Degrees `0..n`.
    Count(usize),
    /// An explicit list, in column order.
    Explicit(Vec<usize>),
}

impl Degrees {
    pub fn to_vec(&self) -> Vec<usize> {
        match self {
            Degrees::Count(n) => (0..*n).collect(),
            Degrees::Explicit(list) => list.clone(),
        }
    }
}

impl From<usize> for Degrees {
    fn from(n: usize) -> Self {
        Degrees::Count(n)
    }
}

impl From<Vec<usize>> for Degrees {
    fn from(list: Vec<usize>) -> Self {
        Degrees::Explicit(list)
    }
}

impl From<&[usize]> for Degrees {
    fn from(list: &[usize]) -> Self {
        Degrees::Explicit(list.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Degrees {
    fn from(list: [usize; N]) -> Self {
        Degrees::Explicit(list.to_vec())
    }
}

/// Scaling applied to every evaluated polynomial.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Normalization {
    /// `sqrt((2n + 1) / 2)`, which makes the basis orthonormal on `[-1, 1]`.
    Standard,
    /// The same constant for every degree.
    Fixed(f64),
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::Standard
    }
}

impl Normalization {
    fn factor(&self, degree: usize) -> f64 {
        match *self {
            Normalization::Standard => ((2 * degree + 1) as f64 / 2.0).sqrt(),
            Normalization::Fixed(c) => c,
        }
    }
}

/// Basis functions evaluated at each observation.
///
/// Shape: `(n_observations, n_degrees)`. Column `k` holds degree `degrees[k]`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BasisMatrix {
    values: Array2<f64>,
    degrees: Vec<usize>,
    row_labels: Option<Vec<String>>,
}

impl BasisMatrix {
    /// Wraps an externally computed basis. Columns must match `degrees`
    /// and there must be at least two rows, as for a generated basis.
    pub fn from_parts(
        values: Array2<f64>,
        degrees: Vec<usize>,
        row_labels: Option<Vec<String>>,
    ) -> Result<Self> {
        if values.nrows() < 2 {
            return Err(EvalError::Configuration(format!(
                "a basis needs at least 2 samples, got {}",
                values.nrows()
            )));
        }
        if values.ncols() != degrees.len() {
            return Err(EvalError::DimensionMismatch {
                context: "basis columns vs. degree list".to_string(),
                expected: degrees.len(),
                found: values.ncols(),
            });
        }
        if let Some(labels) = &row_labels {
            if labels.len() != values.nrows() {
                return Err(EvalError::DimensionMismatch {
                    context: "basis rows vs. row labels".to_string(),
                    expected: values.nrows(),
                    found: labels.len(),
                });
            }
        }
        Ok(Self { values, degrees, row_labels })
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn column(&self, k: usize) -> ArrayView1<'_, f64> {
        self.values.column(k)
    }

    pub fn degrees(&self) -> &[usize] {
        &self.degrees
    }

    pub fn n_observations(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_degrees(&self) -> usize {
        self.values.ncols()
    }

    /// `LP{degree}` for every column.
    pub fn column_labels(&self) -> Vec<String> {
        self.degrees.iter().map(|d| format!("LP{d}")).collect()
    }

    /// The index the basis was generated from, if any.
    pub fn row_labels(&self) -> Option<&[String]> {
        self.row_labels.as_deref()
    }
}

/// Builder for a [`BasisMatrix`].
///
/// Exactly one of [`with_length`](Self::with_length) or
/// [`with_index`](Self::with_index) must be given.
///
/// # Examples
///
/// ```
/// use scenario_bayes::basis::BasisSpec;
///
/// let basis = BasisSpec::new(2).with_length(126).generate().unwrap();
/// assert_eq!(basis.values().dim(), (126, 2));
/// assert_eq!(basis.column_labels(), vec!["LP0", "LP1"]);
/// ```
#[derive(Clone, Debug)]
pub struct BasisSpec {
    degrees: Degrees,
    length: Option<usize>,
    index: Option<Vec<String>>,
    normalization: Normalization,
    physical_units: bool,
}

impl BasisSpec {
    pub fn new(degrees: impl Into<Degrees>) -> Self {
        Self {
            degrees: degrees.into(),
            length: None,
            index: None,
            normalization: Normalization::Standard,
            physical_units: false,
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Uses the length of `index` as sample count and keeps it as row labels.
    pub fn with_index<I, S>(mut self, index: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.index = Some(index.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// Degree 0 becomes the constant 1 and degree 1 spans `length / 100`
    /// peak to peak, i.e. the trend coefficient reads "per 100 samples".
    pub fn with_physical_units(mut self, physical_units: bool) -> Self {
        self.physical_units = physical_units;
        self
    }

    pub fn generate(&self) -> Result<BasisMatrix> {
        let length = match (self.length, &self.index) {
            (Some(_), Some(_)) => {
                return Err(EvalError::Configuration(
                    "give either a length or an index for the basis, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(EvalError::Configuration(
                    "either a length or an index must be given for the basis".to_string(),
                ))
            }
            (Some(length), None) => length,
            (None, Some(index)) => index.len(),
        };
        if length < 2 {
            return Err(EvalError::Configuration(format!(
                "the basis needs at least 2 samples to span [-1, 1], got {length}"
            )));
        }

        let degrees = self.degrees.to_vec();
        if degrees.is_empty() {
            return Err(EvalError::Configuration(
                "at least one basis degree is required".to_string(),
            ));
        }

        let x = Array1::linspace(-1.0, 1.0, length);
        let mut values = Array2::<f64>::zeros((length, degrees.len()));
        for (k, &degree) in degrees.iter().enumerate() {
            let mut column = legendre(degree, x.view());
            column *= self.normalization.factor(degree);

            if self.physical_units {
                match degree {
                    0 => column.fill(1.0),
                    1 => {
                        let span = peak_to_peak(column.view());
                        column.mapv_inplace(|v| v * length as f64 / 100.0 / span);
                    }
                    _ => {}
                }
            }
            values.column_mut(k).assign(&column);
        }
        debug!(
            "Generated Legendre basis with degrees {:?} on {} samples ({:?} normalization, physical units: {}).",
            degrees, length, self.normalization, self.physical_units
        );

        Ok(BasisMatrix {
            values,
            degrees,
            row_labels: self.index.clone(),
        })
    }
}

/// Shorthand mirroring the builder: `generate_basis(2, Some(126), None, Normalization::Standard, false)`.
pub fn generate_basis(
    degrees: impl Into<Degrees>,
    length: Option<usize>,
    index: Option<Vec<String>>,
    normalization: Normalization,
    physical_units: bool,
) -> Result<BasisMatrix> {
    BasisSpec {
        degrees: degrees.into(),
        length,
        index,
        normalization,
        physical_units,
    }
    .generate()
}

/// Legendre polynomial `P_n` at every point of `x` (Bonnet recurrence).
pub fn legendre(degree: usize, x: ArrayView1<f64>) -> Array1<f64> {
    let mut previous = Array1::<f64>::ones(x.len());
    if degree == 0 {
        return previous;
    }
    let mut current = x.to_owned();
    for n in 1..degree {
        let n = n as f64;
        // (n+1) P_{n+1} = (2n+1) x P_n - n P_{n-1}
        let next = ((2.0 * n + 1.0) * &x * &current - n * &previous) / (n + 1.0);
        previous = std::mem::replace(&mut current, next);
    }
    current
}

fn peak_to_peak(values: ArrayView1<f64>) -> f64 {
    let max = values.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let min = values.fold(f64::INFINITY, |a, &b| a.min(b));
    max - min
}

/// Trapezoidal inner products of all column pairs on `[-1, 1]`.
///
/// Close to the identity for a `Standard`-normalized basis with many samples.
pub fn gram_on_unit_interval(basis: &BasisMatrix) -> Array2<f64> {
    let n = basis.n_observations();
    let dx = 2.0 / (n - 1) as f64;
    let mut weights = Array1::from_elem(n, dx);
    weights[0] = dx / 2.0;
    weights[n - 1] = dx / 2.0;
    let weighted = &basis.values * &weights.insert_axis(Axis(1));
    weighted.t().dot(&basis.values)
}
