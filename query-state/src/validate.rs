use crate::Error;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tagfiler_ql::{DbType, Operator, Predicate, TagTypeRegistry};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Checks a constraint against the declared type of `tag`. Tags unknown to
/// the registry are only checked for arity.
pub fn validate(tag: &str, predicate: &Predicate, registry: &TagTypeRegistry) -> Result<(), Error> {
    let invalid = |reason: String| Error::InvalidPredicate {
        tag: tag.to_string(),
        reason,
    };

    if !predicate.has_valid_arity() {
        return Err(invalid(format!(
            "{} does not take {} value(s)",
            predicate.op,
            predicate.values.len()
        )));
    }

    let Some(db_type) = registry.db_type(tag) else {
        return Ok(());
    };
    if !predicate.op.applies_to(db_type) {
        return Err(invalid(format!(
            "{} is not supported for {} tags",
            predicate.op,
            type_name(db_type)
        )));
    }

    if is_typed(predicate.op) {
        for value in &predicate.values {
            if !value_matches(db_type, value) {
                return Err(invalid(format!(
                    "'{}' is not a valid {} value",
                    value,
                    type_name(db_type)
                )));
            }
        }
    }

    Ok(())
}

// Pattern operators take free text.
fn is_typed(op: Operator) -> bool {
    matches!(
        op,
        Operator::Eq
            | Operator::Neq
            | Operator::Less
            | Operator::LessEq
            | Operator::Greater
            | Operator::GreaterEq
            | Operator::Between
    )
}

fn type_name(db_type: &DbType) -> &str {
    match db_type {
        DbType::Empty => "flag",
        other => other.as_str(),
    }
}

fn value_matches(db_type: &DbType, value: &str) -> bool {
    let value = value.trim();
    match db_type {
        DbType::Int8 => value.parse::<i64>().is_ok(),
        DbType::Float8 => value.parse::<f64>().is_ok(),
        DbType::Date => NaiveDate::parse_from_str(value, DATE_FORMAT).is_ok(),
        DbType::Timestamptz => is_timestamp(value),
        DbType::Boolean => matches!(value, "true" | "false"),
        _ => true,
    }
}

fn is_timestamp(value: &str) -> bool {
    NaiveDate::parse_from_str(value, DATE_FORMAT).is_ok()
        || DateTime::parse_from_rfc3339(value).is_ok()
        || TIMESTAMP_FORMATS
            .iter()
            .any(|f| NaiveDateTime::parse_from_str(value, f).is_ok())
}
