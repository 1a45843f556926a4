pub mod bicor;
mod engine;
pub mod error;
mod finalize;
pub mod kernel;
pub mod options;
pub mod parallel;
pub mod pearson;
pub mod prepare;
pub mod select;
mod slow;

pub use engine::CorResult;
pub use error::CorError;
pub use kernel::{DenseProduct, NdarrayProduct};
pub use options::{BicorOptions, CorOptions, ZeroMadFallback};
pub use slow::{pearson_pair, weighted_pearson_pair};
