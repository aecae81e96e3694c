mod ast;
mod decode;
mod encode;
mod error;
mod escape;
mod registry;

pub use ast::{
    Arity, Direction, Limit, Operator, Pagination, Predicate, Query, QueryFilter, QueryOptions,
    RangeMode, SortKey, Versions,
};
pub use decode::{decode, decode_deep_link, Decoder};
pub use encode::{
    deep_link, encode, ids_predicate, local_offset, tags_url, timezone_suffix, Encoder,
};
pub use error::Error;
pub use escape::{escape, escape_component, unescape};
pub use registry::{registry_url, DbType, TagDef, TagDefRow, TagTypeRegistry};
