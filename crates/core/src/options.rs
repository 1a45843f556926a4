use crate::error::CorError;
use strum_macros::{Display, EnumString};

/// What to do with a column whose median absolute deviation is zero.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum ZeroMadFallback {
    /// Zero the column and treat it as degenerate (all its cells NA).
    #[strum(serialize = "none")]
    None,
    /// Prepare that column with Pearson normalization instead.
    #[strum(serialize = "individual")]
    Individual,
    /// Redo every column of the matrix with Pearson normalization.
    #[strum(serialize = "all")]
    All,
    /// Always use Pearson normalization.
    #[strum(serialize = "force-pearson", serialize = "force", to_string = "force-pearson")]
    ForcePearson,
}

impl ZeroMadFallback {
    pub fn code(self) -> i32 {
        match self {
            ZeroMadFallback::None => 1,
            ZeroMadFallback::Individual => 2,
            ZeroMadFallback::All => 3,
            ZeroMadFallback::ForcePearson => 4,
        }
    }
}

impl TryFrom<i32> for ZeroMadFallback {
    type Error = CorError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ZeroMadFallback::None),
            2 => Ok(ZeroMadFallback::Individual),
            3 => Ok(ZeroMadFallback::All),
            4 => Ok(ZeroMadFallback::ForcePearson),
            _ => Err(CorError::InvalidParameter {
                name: "fallback",
                value: code as f64,
            }),
        }
    }
}

/// Options shared by every correlation call.
#[derive(Clone, Debug)]
pub struct CorOptions {
    /// Fraction of rows (0..=1) that may be missing in a column before its
    /// cells are recomputed exactly. `1.0` keeps every bulk value.
    pub quick: f64,
    /// Skip centring of the first (or only) matrix.
    pub cosine_x: bool,
    /// Skip centring of the second matrix.
    pub cosine_y: bool,
    /// Requested worker count; 0 means all available cores.
    pub n_threads: usize,
    /// Fail the call instead of finishing sequentially when workers cannot
    /// be started.
    pub strict_threads: bool,
    pub verbose: u8,
    pub indent: usize,
}

impl Default for CorOptions {
    fn default() -> Self {
        CorOptions {
            quick: 0.0,
            cosine_x: false,
            cosine_y: false,
            n_threads: 0,
            strict_threads: false,
            verbose: 0,
            indent: 0,
        }
    }
}

impl CorOptions {
    pub fn validate(&self) -> Result<(), CorError> {
        if !(0.0..=1.0).contains(&self.quick) {
            return Err(CorError::InvalidParameter {
                name: "quick",
                value: self.quick,
            });
        }
        Ok(())
    }

    pub(crate) fn prefix(&self) -> String {
        " ".repeat(2 * self.indent)
    }
}

/// Options of a biweight midcorrelation call.
#[derive(Clone, Debug)]
pub struct BicorOptions {
    pub cor: CorOptions,
    /// Largest proportion of observations on either side of the median that
    /// may be treated as outliers; 1 gives the standard biweight.
    pub max_p_outliers: f64,
    pub fallback: ZeroMadFallback,
    /// Use the robust preparation for X; Pearson otherwise.
    pub robust_x: bool,
    /// Use the robust preparation for Y; Pearson otherwise.
    pub robust_y: bool,
}

impl Default for BicorOptions {
    fn default() -> Self {
        BicorOptions {
            cor: CorOptions::default(),
            max_p_outliers: 1.0,
            fallback: ZeroMadFallback::Individual,
            robust_x: true,
            robust_y: true,
        }
    }
}

impl BicorOptions {
    pub fn validate(&self) -> Result<(), CorError> {
        self.cor.validate()?;
        if !(self.max_p_outliers > 0.0 && self.max_p_outliers <= 1.0) {
            return Err(CorError::InvalidParameter {
                name: "max_p_outliers",
                value: self.max_p_outliers,
            });
        }
        Ok(())
    }
}
