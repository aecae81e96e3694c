use crate::ast::{
    Arity, Direction, Limit, Operator, Predicate, Query, QueryFilter, QueryOptions, RangeMode,
    SortKey, Versions, DECODE_ORDER,
};
use crate::encode::{local_offset, timezone_suffix};
use crate::escape::unescape;
use crate::registry::TagTypeRegistry;
use chrono::FixedOffset;
use log::debug;
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_while};
use nom::character::complete::char;
use nom::combinator::{all_consuming, map, opt, rest, value};
use nom::error::{Error as NomError, ErrorKind};
use nom::multi::separated_list1;
use nom::sequence::{delimited, pair, tuple};
use nom::IResult;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::LazyLock;

const DELIMITERS: &str = ";,()=:!?&";

static INTERVAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\((.+),(.+)\)$").expect("interval pattern is valid"));

type RawPredicate<'a> = (&'a str, Option<(Operator, Vec<&'a str>)>);

pub struct Decoder<'a> {
    registry: &'a TagTypeRegistry,
    suffix: String,
}

impl<'a> Decoder<'a> {
    pub fn new(registry: &'a TagTypeRegistry) -> Self {
        Self {
            registry,
            suffix: timezone_suffix(local_offset()),
        }
    }

    /// Offset whose `±HH:MM` suffix is stripped from timestamp values.
    #[inline]
    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.suffix = timezone_suffix(timezone);

        self
    }

    /// Decodes a request URL produced by [`crate::Encoder::encode`]. Never
    /// fails: anything unrecognised degrades to the closest meaningful value.
    pub fn decode(&self, url: &str) -> Query {
        let (path, options) = url.split_once('?').unwrap_or((url, ""));
        let (head, projection, sort) = match split_path(path) {
            Ok((_, parts)) => parts,
            Err(_) => (path, None, ""),
        };
        let (base, predicates) = match head.rfind('/') {
            Some(i) => head.split_at(i + 1),
            None => ("", head),
        };

        let mut filter = QueryFilter::new();
        for item in predicates.split(';').filter(|s| !s.is_empty()) {
            let (tag, predicate) = self.decode_predicate(item);
            filter.entry(tag).or_default().push(predicate);
        }

        let columns = projection
            .map(|p| {
                p.split(';')
                    .filter(|s| !s.is_empty())
                    .map(unescape)
                    .collect()
            })
            .unwrap_or_default();

        let sort = sort
            .split(',')
            .filter(|s| !s.is_empty())
            .map(decode_sort_key)
            .collect();

        Query {
            base: base.to_string(),
            filter,
            columns,
            sort,
            options: decode_options(options),
        }
    }

    /// Decodes the search part of a bookmark (`?query=<escaped url>`), or a
    /// whole bookmark URL. Returns `None` when it carries no query.
    pub fn decode_deep_link(&self, search: &str) -> Option<Query> {
        let search = match search.split_once('?') {
            Some((_, s)) => s,
            None => search,
        };
        let encoded = search
            .split('&')
            .filter_map(|param| param.split_once('='))
            .find_map(|(key, val)| (key == "query").then_some(val))?;
        if encoded.is_empty() {
            return None;
        }

        let url = unescape(encoded);
        debug!("Decoding deep link query {}", url);
        Some(self.decode(&url))
    }

    fn decode_predicate(&self, item: &str) -> (String, Predicate) {
        match all_consuming(raw_predicate)(item) {
            Ok((_, (tag, None))) => (unescape(tag), Predicate::tagged()),
            Ok((_, (tag, Some((op, values))))) => {
                let tag = unescape(tag);
                let values = values.into_iter().map(unescape).collect();
                let predicate = self.restore(&tag, op, values);
                (tag, predicate)
            }
            Err(_) => {
                debug!("Unrecognised predicate {}, treating it as tag presence", item);
                (unescape(item), Predicate::tagged())
            }
        }
    }

    fn restore(&self, tag: &str, op: Operator, values: Vec<String>) -> Predicate {
        if op == Operator::Eq && values.len() == 1 && self.registry.allows_range(tag) {
            if let Some(captures) = INTERVAL.captures(&values[0]) {
                return Predicate::between(
                    self.strip_timezone(tag, &captures[1]),
                    self.strip_timezone(tag, &captures[2]),
                );
            }
        }

        Predicate {
            op,
            values: values
                .iter()
                .map(|v| self.strip_timezone(tag, v))
                .collect(),
        }
    }

    fn strip_timezone(&self, tag: &str, value: &str) -> String {
        match self.registry.is_timestamp(tag) {
            true => value.strip_suffix(&self.suffix).unwrap_or(value).to_string(),
            false => value.to_string(),
        }
    }
}

pub fn decode(url: &str, registry: &TagTypeRegistry) -> Query {
    Decoder::new(registry).decode(url)
}

pub fn decode_deep_link(search: &str, registry: &TagTypeRegistry) -> Option<Query> {
    Decoder::new(registry).decode_deep_link(search)
}

fn split_path(input: &str) -> IResult<&str, (&str, Option<&str>, &str)> {
    tuple((
        take_while(|c| c != '('),
        opt(delimited(char('('), take_while(|c| c != ')'), char(')'))),
        rest,
    ))(input)
}

fn component(input: &str) -> IResult<&str, &str> {
    is_not(DELIMITERS)(input)
}

fn value_component(input: &str) -> IResult<&str, &str> {
    take_while(|c| !DELIMITERS.contains(c))(input)
}

fn operator(input: &str) -> IResult<&str, Operator> {
    for op in DECODE_ORDER {
        if let Some(remaining) = input.strip_prefix(op.token()) {
            return Ok((remaining, op));
        }
    }

    Err(nom::Err::Error(NomError::new(input, ErrorKind::Tag)))
}

fn operator_with_values(input: &str) -> IResult<&str, (Operator, Vec<&str>)> {
    let (input, op) = operator(input)?;
    match op.arity() {
        Arity::Zero => Ok((input, (op, Vec::new()))),
        _ => map(separated_list1(char(','), value_component), move |values| {
            (op, values)
        })(input),
    }
}

fn raw_predicate(input: &str) -> IResult<&str, RawPredicate<'_>> {
    pair(component, opt(operator_with_values))(input)
}

fn direction(input: &str) -> IResult<&str, Direction> {
    alt((
        value(Direction::Asc, tag(Direction::Asc.token())),
        value(Direction::Desc, tag(Direction::Desc.token())),
    ))(input)
}

fn decode_sort_key(item: &str) -> SortKey {
    match all_consuming(pair(component, opt(direction)))(item) {
        Ok((_, (name, direction))) => {
            SortKey::new(unescape(name), direction.unwrap_or(Direction::Asc))
        }
        Err(_) => {
            let name = item.split(':').next().unwrap_or(item);
            SortKey::new(unescape(name), Direction::Asc)
        }
    }
}

fn decode_options(options: &str) -> QueryOptions {
    let mut decoded = QueryOptions::default();
    for option in options.split('&') {
        let Some((key, val)) = option.split_once('=') else {
            continue;
        };

        match key {
            "versions" => {
                decoded.versions = match val {
                    "any" => Versions::Any,
                    _ => Versions::Latest,
                }
            }
            "limit" => {
                decoded.limit = match val {
                    "none" => Some(Limit::Unlimited),
                    n => n.parse().ok().and_then(NonZeroUsize::new).map(Limit::Rows),
                }
            }
            "offset" => decoded.offset = val.parse().ok(),
            "range" => {
                decoded.range = match val {
                    "count" => Some(RangeMode::Count),
                    "values" => Some(RangeMode::Values),
                    _ => None,
                }
            }
            _ => {}
        }
    }

    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::Encoder;
    use crate::registry::DbType;

    const BASE: &str = "https://example.org/tagfiler/subject/";

    fn pst() -> FixedOffset {
        FixedOffset::west_opt(8 * 3600).unwrap()
    }

    #[test]
    fn test_decode_prefers_specific_operator() {
        let registry = TagTypeRegistry::new();
        let query = decode(&format!("{}mytag!=foo(mytag)", BASE), &registry);

        assert_eq!(query.filter.len(), 1);
        assert_eq!(
            query.filter["mytag"],
            vec![Predicate::new(Operator::Neq, ["foo"])]
        );

        let query = decode(&format!("{}a:!ciregexp:x;b:ciregexp:y;c:geq:1(a)", BASE), &registry);
        assert_eq!(query.filter["a"][0].op, Operator::NotCiRegex);
        assert_eq!(query.filter["b"][0].op, Operator::CiRegex);
        assert_eq!(query.filter["c"][0].op, Operator::GreaterEq);
    }

    #[test]
    fn test_decode_full_url() {
        let registry = TagTypeRegistry::new();
        let query = decode(
            &format!(
                "{}status=active;owner;obsolete:absent:(name;file%20name)name:desc:,owner?versions=any&limit=25&offset=50",
                BASE
            ),
            &registry,
        );

        assert_eq!(query.base, BASE);
        assert_eq!(
            query.filter.keys().collect::<Vec<_>>(),
            vec!["status", "owner", "obsolete"]
        );
        assert_eq!(query.filter["owner"], vec![Predicate::tagged()]);
        assert_eq!(query.filter["obsolete"], vec![Predicate::absent()]);
        assert_eq!(query.columns, vec!["name", "file name"]);
        assert_eq!(
            query.sort,
            vec![
                SortKey::new("name", Direction::Desc),
                SortKey::new("owner", Direction::Asc)
            ]
        );
        assert_eq!(query.options.versions, Versions::Any);
        assert_eq!(
            query.options.limit,
            Some(Limit::Rows(NonZeroUsize::new(25).unwrap()))
        );
        assert_eq!(query.options.offset, Some(50));
        assert_eq!(query.pagination(NonZeroUsize::new(10).unwrap()).page_index, 2);
    }

    #[test]
    fn test_decode_multivalue_equality() {
        let registry = TagTypeRegistry::new();
        let query = decode(&format!("{}tag=a,b,c(tag)", BASE), &registry);
        assert_eq!(
            query.filter["tag"],
            vec![Predicate::new(Operator::Eq, ["a", "b", "c"])]
        );
    }

    #[test]
    fn test_decode_between_timestamp() {
        let registry = TagTypeRegistry::new().with_tag("modified", DbType::Timestamptz);
        let query = Decoder::new(&registry).with_timezone(pst()).decode(&format!(
            "{}modified=%282020-01-01-08%3A00%2C2020-12-31-08%3A00%29(modified)",
            BASE
        ));

        assert_eq!(
            query.filter["modified"],
            vec![Predicate::between("2020-01-01", "2020-12-31")]
        );
    }

    #[test]
    fn test_decode_interval_on_text_tag_stays_equality() {
        let registry = TagTypeRegistry::new().with_tag("label", DbType::Text);
        let query = decode(&format!("{}label=%28a%2Cb%29(label)", BASE), &registry);
        assert_eq!(
            query.filter["label"],
            vec![Predicate::new(Operator::Eq, ["(a,b)"])]
        );
    }

    #[test]
    fn test_decode_malformed_predicates() {
        let registry = TagTypeRegistry::new();
        let query = decode(&format!("{}foo:bogus:bar;;=x(foo)", BASE), &registry);

        assert_eq!(query.filter["foo:bogus:bar"], vec![Predicate::tagged()]);
        assert_eq!(query.filter["=x"], vec![Predicate::tagged()]);
    }

    #[test]
    fn test_decode_without_projection() {
        let registry = TagTypeRegistry::new();
        let query = decode(&format!("{}name=x()?limit=none", BASE), &registry);
        assert!(query.columns.is_empty());
        assert!(query.sort.is_empty());
        assert_eq!(query.options.limit, Some(Limit::Unlimited));

        let query = decode("name=x", &registry);
        assert_eq!(query.base, "");
        assert!(query.columns.is_empty());
        assert_eq!(query.filter["name"], vec![Predicate::new(Operator::Eq, ["x"])]);
    }

    #[test]
    fn test_decode_unknown_sort_direction() {
        let registry = TagTypeRegistry::new();
        let query = decode(&format!("{}(a;b)a:sideways:,b:desc:", BASE), &registry);
        assert_eq!(
            query.sort,
            vec![
                SortKey::new("a", Direction::Asc),
                SortKey::new("b", Direction::Desc)
            ]
        );
    }

    #[test]
    fn test_escaped_parentheses_round_trip() {
        let registry = TagTypeRegistry::new();
        let mut filter = QueryFilter::new();
        filter.insert(
            "a(b)c".to_string(),
            vec![Predicate::new(Operator::Eq, ["x(y)"])],
        );
        let columns = vec!["a(b)c".to_string()];
        let sort = vec![SortKey::new("a(b)c", Direction::Desc)];

        let url = Encoder::new(BASE, &registry)
            .encode(&filter, &columns, &sort)
            .unwrap();
        let query = decode(&url, &registry);

        assert_eq!(query.filter, filter);
        assert_eq!(query.columns, columns);
        assert_eq!(query.sort, sort);
    }

    #[test]
    fn test_decode_deep_link() {
        let registry = TagTypeRegistry::new();
        let query = decode_deep_link(
            "?query=https%3A%2F%2Fexample.org%2Ftagfiler%2Fsubject%2Fa%2528b%2529c%3Dx(a%2528b%2529c)%3Fversions%3Dlatest%26limit%3D10%26offset%3D30",
            &registry,
        )
        .unwrap();

        assert_eq!(query.base, BASE);
        assert_eq!(query.filter["a(b)c"], vec![Predicate::new(Operator::Eq, ["x"])]);
        assert_eq!(query.columns, vec!["a(b)c"]);
        assert_eq!(query.options.offset, Some(30));

        assert!(decode_deep_link("", &registry).is_none());
        assert!(decode_deep_link("?query=", &registry).is_none());
    }

    #[test]
    fn test_decode_deep_link_among_other_params() {
        let registry = TagTypeRegistry::new();
        let query = decode_deep_link(
            "https://example.org/tagfiler/query?action=edit&query=https%3A%2F%2Fexample.org%2Ftagfiler%2Fsubject%2Fstatus%3Dactive(name)&lang=en",
            &registry,
        )
        .unwrap();

        assert_eq!(query.base, BASE);
        assert_eq!(query.filter["status"], vec![Predicate::new(Operator::Eq, ["active"])]);
        assert_eq!(query.columns, vec!["name"]);

        assert!(decode_deep_link("?action=edit&lang=en", &registry).is_none());
    }
}
