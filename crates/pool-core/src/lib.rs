pub mod block_number;
pub mod error;
pub mod traits;
pub mod types;
pub mod validation;

pub use error::*;
pub use traits::*;
pub use types::*;
pub use validation::*;
