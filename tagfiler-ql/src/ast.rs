use crate::registry::DbType;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::num::NonZeroUsize;

/// Predicates per tag, in the order the tags were first constrained.
pub type QueryFilter = IndexMap<String, Vec<Predicate>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Tagged,
    Absent,
    Eq,
    Neq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Like,
    SimilarTo,
    Regex,
    NotRegex,
    CiRegex,
    NotCiRegex,
    Between,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Zero,
    Pair,
    AtLeastOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Excludes {
    Nothing,
    Flags,
    FlagsAndBooleans,
    AllButText,
    Unordered,
}

struct OperatorDef {
    token: &'static str,
    label: &'static str,
    arity: Arity,
    excludes: Excludes,
}

// Indexed by `Operator as usize`.
const OPERATORS: [OperatorDef; 16] = [
    OperatorDef {
        token: "",
        label: "Tagged",
        arity: Arity::Zero,
        excludes: Excludes::Nothing,
    },
    OperatorDef {
        token: ":absent:",
        label: "Tag absent",
        arity: Arity::Zero,
        excludes: Excludes::Nothing,
    },
    OperatorDef {
        token: "=",
        label: "Equal",
        arity: Arity::AtLeastOne,
        excludes: Excludes::Flags,
    },
    OperatorDef {
        token: "!=",
        label: "Not equal",
        arity: Arity::AtLeastOne,
        excludes: Excludes::Flags,
    },
    OperatorDef {
        token: ":lt:",
        label: "Less than",
        arity: Arity::AtLeastOne,
        excludes: Excludes::FlagsAndBooleans,
    },
    OperatorDef {
        token: ":leq:",
        label: "Less than or equal",
        arity: Arity::AtLeastOne,
        excludes: Excludes::FlagsAndBooleans,
    },
    OperatorDef {
        token: ":gt:",
        label: "Greater than",
        arity: Arity::AtLeastOne,
        excludes: Excludes::FlagsAndBooleans,
    },
    OperatorDef {
        token: ":geq:",
        label: "Greater than or equal",
        arity: Arity::AtLeastOne,
        excludes: Excludes::FlagsAndBooleans,
    },
    OperatorDef {
        token: ":like:",
        label: "LIKE (SQL operator)",
        arity: Arity::AtLeastOne,
        excludes: Excludes::AllButText,
    },
    OperatorDef {
        token: ":simto:",
        label: "SIMILAR TO (SQL operator)",
        arity: Arity::AtLeastOne,
        excludes: Excludes::AllButText,
    },
    OperatorDef {
        token: ":regexp:",
        label: "Regular expression (case sensitive)",
        arity: Arity::AtLeastOne,
        excludes: Excludes::AllButText,
    },
    OperatorDef {
        token: ":!regexp:",
        label: "Negated regular expression (case sensitive)",
        arity: Arity::AtLeastOne,
        excludes: Excludes::AllButText,
    },
    OperatorDef {
        token: ":ciregexp:",
        label: "Regular expression (case insensitive)",
        arity: Arity::AtLeastOne,
        excludes: Excludes::AllButText,
    },
    OperatorDef {
        token: ":!ciregexp:",
        label: "Negated regular expression (case insensitive)",
        arity: Arity::AtLeastOne,
        excludes: Excludes::AllButText,
    },
    OperatorDef {
        token: "=",
        label: "Between",
        arity: Arity::Pair,
        excludes: Excludes::Unordered,
    },
    OperatorDef {
        token: "",
        label: "None",
        arity: Arity::Zero,
        excludes: Excludes::Nothing,
    },
];

/// Operators carrying a URL token, most specific first so that a token is
/// never matched inside a longer one (`=` inside `!=`).
pub(crate) const DECODE_ORDER: [Operator; 13] = [
    Operator::NotCiRegex,
    Operator::CiRegex,
    Operator::NotRegex,
    Operator::Regex,
    Operator::SimilarTo,
    Operator::Like,
    Operator::GreaterEq,
    Operator::Greater,
    Operator::LessEq,
    Operator::Less,
    Operator::Neq,
    Operator::Eq,
    Operator::Absent,
];

impl Operator {
    #[inline]
    fn def(self) -> &'static OperatorDef {
        &OPERATORS[self as usize]
    }

    #[inline]
    pub fn token(self) -> &'static str {
        self.def().token
    }

    #[inline]
    pub fn label(self) -> &'static str {
        self.def().label
    }

    #[inline]
    pub fn arity(self) -> Arity {
        self.def().arity
    }

    pub fn from_label(label: &str) -> Option<Self> {
        OPERATORS
            .iter()
            .position(|d| d.label == label)
            .map(|i| ALL[i])
    }

    /// Whether the operator may be applied to a tag of the given type.
    pub fn applies_to(self, db_type: &DbType) -> bool {
        match self.def().excludes {
            Excludes::Nothing => true,
            Excludes::Flags => *db_type != DbType::Empty,
            Excludes::FlagsAndBooleans => !matches!(db_type, DbType::Empty | DbType::Boolean),
            Excludes::AllButText => !matches!(
                db_type,
                DbType::Empty
                    | DbType::Int8
                    | DbType::Float8
                    | DbType::Date
                    | DbType::Timestamptz
                    | DbType::Boolean
            ),
            Excludes::Unordered => db_type.is_ordered(),
        }
    }

    pub fn accepts(self, count: usize) -> bool {
        match self.arity() {
            Arity::Zero => count == 0,
            Arity::Pair => count == 2,
            Arity::AtLeastOne => count > 0,
        }
    }
}

const ALL: [Operator; 16] = [
    Operator::Tagged,
    Operator::Absent,
    Operator::Eq,
    Operator::Neq,
    Operator::Less,
    Operator::LessEq,
    Operator::Greater,
    Operator::GreaterEq,
    Operator::Like,
    Operator::SimilarTo,
    Operator::Regex,
    Operator::NotRegex,
    Operator::CiRegex,
    Operator::NotCiRegex,
    Operator::Between,
    Operator::None,
];

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub op: Operator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl Predicate {
    pub fn new<I, S>(op: Operator, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tagged() -> Self {
        Self {
            op: Operator::Tagged,
            values: Vec::new(),
        }
    }

    pub fn absent() -> Self {
        Self {
            op: Operator::Absent,
            values: Vec::new(),
        }
    }

    pub fn between(low: impl Into<String>, high: impl Into<String>) -> Self {
        Self {
            op: Operator::Between,
            values: vec![low.into(), high.into()],
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.op == Operator::None
    }

    #[inline]
    pub fn has_valid_arity(&self) -> bool {
        self.op.accepts(self.values.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn token(self) -> &'static str {
        match self {
            Direction::Asc => ":asc:",
            Direction::Desc => ":desc:",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub name: String,
    pub direction: Direction,
}

impl SortKey {
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page_index: usize,
    pub page_size: NonZeroUsize,
}

impl Pagination {
    pub fn new(page_size: NonZeroUsize) -> Self {
        Self {
            page_index: 0,
            page_size,
        }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.page_index.saturating_mul(self.page_size.get())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    Rows(NonZeroUsize),
    Unlimited,
}

impl Display for Limit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Limit::Rows(n) => write!(f, "{}", n),
            Limit::Unlimited => f.write_str("none"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Versions {
    #[default]
    Latest,
    Any,
}

impl Display for Versions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Versions::Latest => f.write_str("latest"),
            Versions::Any => f.write_str("any"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeMode {
    Count,
    Values,
}

impl Display for RangeMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeMode::Count => f.write_str("count"),
            RangeMode::Values => f.write_str("values"),
        }
    }
}

/// The `?...` tail of a request URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub versions: Versions,
    pub limit: Option<Limit>,
    pub offset: Option<usize>,
    pub range: Option<RangeMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub base: String,
    pub filter: QueryFilter,
    pub columns: Vec<String>,
    pub sort: Vec<SortKey>,
    pub options: QueryOptions,
}

impl Query {
    /// Page position encoded by `limit`/`offset`, falling back to
    /// `default_page_size` when the limit is absent or `none`.
    pub fn pagination(&self, default_page_size: NonZeroUsize) -> Pagination {
        let page_size = match self.options.limit {
            Some(Limit::Rows(n)) => n,
            _ => default_page_size,
        };

        Pagination {
            page_index: self.options.offset.unwrap_or(0) / page_size.get(),
            page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_table() {
        assert_eq!(Operator::Neq.token(), "!=");
        assert_eq!(Operator::Between.token(), "=");
        assert_eq!(Operator::Absent.token(), ":absent:");
        assert_eq!(Operator::NotCiRegex.label(), "Negated regular expression (case insensitive)");
        assert_eq!(Operator::from_label("Greater than"), Some(Operator::Greater));
        assert_eq!(Operator::from_label("Between"), Some(Operator::Between));
        assert_eq!(Operator::from_label("Nope"), None);

        for op in ALL {
            assert_eq!(Operator::from_label(op.label()), Some(op));
        }
    }

    #[test]
    fn test_decode_order_prefers_longer_tokens() {
        for (i, a) in DECODE_ORDER.iter().enumerate() {
            for b in &DECODE_ORDER[i + 1..] {
                assert!(
                    !b.token().contains(a.token()),
                    "{} must be tried before {}",
                    b.token(),
                    a.token()
                );
            }
        }
    }

    #[test]
    fn test_operator_type_exclusions() {
        assert!(!Operator::Regex.applies_to(&DbType::Int8));
        assert!(Operator::Regex.applies_to(&DbType::Text));
        assert!(Operator::Less.applies_to(&DbType::Date));
        assert!(!Operator::Less.applies_to(&DbType::Boolean));
        assert!(!Operator::Eq.applies_to(&DbType::Empty));
        assert!(Operator::Tagged.applies_to(&DbType::Empty));
        assert!(Operator::Between.applies_to(&DbType::Timestamptz));
        assert!(!Operator::Between.applies_to(&DbType::Text));
    }

    #[test]
    fn test_arity() {
        assert!(Predicate::tagged().has_valid_arity());
        assert!(Predicate::between("1", "2").has_valid_arity());
        assert!(!Predicate::new(Operator::Between, ["1"]).has_valid_arity());
        assert!(!Predicate::new(Operator::Eq, Vec::<String>::new()).has_valid_arity());
        assert!(Predicate::new(Operator::Eq, ["a", "b", "c"]).has_valid_arity());
    }

    #[test]
    fn test_query_pagination() {
        let page_size = NonZeroUsize::new(25).unwrap();
        let query = Query {
            options: QueryOptions {
                limit: Some(Limit::Rows(page_size)),
                offset: Some(75),
                ..Default::default()
            },
            ..Default::default()
        };

        let pagination = query.pagination(NonZeroUsize::new(10).unwrap());
        assert_eq!(pagination.page_index, 3);
        assert_eq!(pagination.page_size, page_size);
        assert_eq!(pagination.offset(), 75);

        let pagination = Query::default().pagination(NonZeroUsize::new(10).unwrap());
        assert_eq!(pagination.page_index, 0);
        assert_eq!(pagination.page_size.get(), 10);
    }

    #[test]
    fn test_offset_saturates() {
        let pagination = Pagination {
            page_index: usize::MAX / 2,
            page_size: NonZeroUsize::new(25).unwrap(),
        };
        assert_eq!(pagination.offset(), usize::MAX);
    }
}
