use crate::ast::Operator;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no result columns to project")]
    EmptyProjection,

    #[error("{op} predicate on '{tag}' cannot take {count} value(s)")]
    Arity {
        tag: String,
        op: Operator,
        count: usize,
    },
}
