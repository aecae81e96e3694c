#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to build request url: {0}")]
    Encode(tagfiler_ql::Error),

    #[error("column index {index} is out of range for {len} columns")]
    ColumnIndex { index: usize, len: usize },

    #[error("no filter edit is in progress")]
    NotEditing,

    #[error("invalid constraint on '{tag}': {reason}")]
    InvalidPredicate { tag: String, reason: String },
}

impl From<tagfiler_ql::Error> for Error {
    fn from(error: tagfiler_ql::Error) -> Self {
        Self::Encode(error)
    }
}
