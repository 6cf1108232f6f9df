mod range_set;
pub use range_set::*;
