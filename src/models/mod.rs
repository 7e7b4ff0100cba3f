mod fact;
mod precision;
mod rollup;

pub use fact::*;
pub use precision::*;
pub use rollup::*;
