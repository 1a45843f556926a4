use thiserror::Error;

/// Failures of a correlation call. Degenerate data (constant or all-missing
/// columns) is not an error; it shows up as NA cells and warning flags.
#[derive(Debug, Error)]
pub enum CorError {
    #[error("memory allocation error: could not reserve {bytes} bytes for {what}")]
    Allocation { what: &'static str, bytes: usize },

    #[error("worker threads could not be started: {0}")]
    ThreadStart(String),

    #[error("weights must be supplied for both matrices or for neither")]
    InconsistentWeights,

    #[error("shape mismatch in {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("invalid value {value} for parameter `{name}`")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl CorError {
    /// Integer code as reported to bindings: 1 allocation, 2 thread start,
    /// 3 inconsistent weights, 4 shape mismatch, 5 invalid parameter.
    pub fn code(&self) -> i32 {
        match self {
            CorError::Allocation { .. } => 1,
            CorError::ThreadStart(_) => 2,
            CorError::InconsistentWeights => 3,
            CorError::ShapeMismatch { .. } | CorError::Shape(_) => 4,
            CorError::InvalidParameter { .. } => 5,
        }
    }
}

/// A buffer of `len` copies of `value`, or `CorError::Allocation` if the
/// memory cannot be reserved.
pub(crate) fn try_filled(len: usize, value: f64, what: &'static str) -> Result<Vec<f64>, CorError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| CorError::Allocation {
        what,
        bytes: len.saturating_mul(std::mem::size_of::<f64>()),
    })?;
    buf.resize(len, value);
    Ok(buf)
}

/// Same as [`try_filled`] for a copy of an existing slice.
pub(crate) fn try_copy(src: &[f64], what: &'static str) -> Result<Vec<f64>, CorError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(src.len()).map_err(|_| CorError::Allocation {
        what,
        bytes: std::mem::size_of_val(src),
    })?;
    buf.extend_from_slice(src);
    Ok(buf)
}
