mod error;
pub mod range;
mod store;
pub mod validate;

pub use error::Error;
pub use range::{RangeSource, RangeValues, SELECT_LIMIT};
pub use store::{AddPolicy, QueryStateStore, SortChange};
