use crate::ast::{Limit, Operator, Predicate, QueryFilter, QueryOptions, RangeMode, SortKey, Versions};
use crate::escape::{escape, escape_component};
use crate::registry::TagTypeRegistry;
use crate::Error;
use chrono::{FixedOffset, Local, Offset};

#[derive(Clone)]
pub struct Encoder<'a> {
    base: &'a str,
    registry: &'a TagTypeRegistry,
    timezone: FixedOffset,
    options: QueryOptions,
    exclude: Option<&'a str>,
}

impl<'a> Encoder<'a> {
    /// `base` is the predicate base path, e.g. `https://host/tagfiler/subject/`.
    pub fn new(base: &'a str, registry: &'a TagTypeRegistry) -> Self {
        Self {
            base,
            registry,
            timezone: local_offset(),
            options: QueryOptions {
                limit: Some(Limit::Unlimited),
                ..Default::default()
            },
            exclude: None,
        }
    }

    #[inline]
    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.timezone = timezone;

        self
    }

    #[inline]
    pub fn with_versions(mut self, versions: Versions) -> Self {
        self.options.versions = versions;

        self
    }

    #[inline]
    pub fn with_limit(mut self, limit: Limit) -> Self {
        self.options.limit = Some(limit);

        self
    }

    #[inline]
    pub fn with_offset(mut self, offset: Option<usize>) -> Self {
        self.options.offset = offset;

        self
    }

    #[inline]
    pub fn with_range(mut self, range: Option<RangeMode>) -> Self {
        self.options.range = range;

        self
    }

    #[inline]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;

        self
    }

    /// Leaves the predicates of `tag` out of the predicate clause.
    #[inline]
    pub fn excluding(mut self, tag: Option<&'a str>) -> Self {
        self.exclude = tag;

        self
    }

    pub fn base(&self) -> &'a str {
        self.base
    }

    pub fn registry(&self) -> &'a TagTypeRegistry {
        self.registry
    }

    pub fn timezone(&self) -> FixedOffset {
        self.timezone
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn predicate_clause(&self, filter: &QueryFilter) -> Result<String, Error> {
        let mut fragments = Vec::new();
        for (tag, predicates) in filter {
            if self.exclude == Some(tag.as_str()) {
                continue;
            }

            let suffix = match self.registry.is_timestamp(tag) {
                true => timezone_suffix(self.timezone),
                false => String::new(),
            };

            for predicate in predicates.iter().filter(|p| !p.is_none()) {
                if !predicate.has_valid_arity() {
                    return Err(Error::Arity {
                        tag: tag.clone(),
                        op: predicate.op,
                        count: predicate.values.len(),
                    });
                }
                fragments.push(fragment(tag, predicate, &suffix));
            }
        }

        Ok(fragments.join(";"))
    }

    pub fn encode(
        &self,
        filter: &QueryFilter,
        columns: &[String],
        sort: &[SortKey],
    ) -> Result<String, Error> {
        if columns.is_empty() {
            return Err(Error::EmptyProjection);
        }

        let predicates = self.predicate_clause(filter)?;
        let projection = columns
            .iter()
            .map(|c| escape(c))
            .collect::<Vec<_>>()
            .join(";");
        let sort = sort
            .iter()
            .map(|k| format!("{}{}", escape(&k.name), k.direction.token()))
            .collect::<Vec<_>>()
            .join(",");

        Ok(format!(
            "{}{}({}){}{}",
            self.base,
            predicates,
            projection,
            sort,
            self.query_string()
        ))
    }

    fn query_string(&self) -> String {
        let mut query = format!("?versions={}", self.options.versions);
        match self.options.range {
            Some(range) => query.push_str(&format!("&range={}", range)),
            None => {
                if let Some(limit) = self.options.limit {
                    query.push_str(&format!("&limit={}", limit));
                }
                if let Some(offset) = self.options.offset {
                    query.push_str(&format!("&offset={}", offset));
                }
            }
        }

        query
    }
}

fn fragment(tag: &str, predicate: &Predicate, suffix: &str) -> String {
    let tag_escaped = escape(tag);
    match predicate.op {
        Operator::Between => format!(
            "{}={}",
            tag_escaped,
            escape(&format!(
                "({}{},{}{})",
                predicate.values[0], suffix, predicate.values[1], suffix
            ))
        ),
        Operator::Tagged | Operator::Absent => {
            format!("{}{}", tag_escaped, predicate.op.token())
        }
        op => format!(
            "{}{}{}",
            tag_escaped,
            op.token(),
            predicate
                .values
                .iter()
                .map(|v| escape(&format!("{}{}", v, suffix)))
                .collect::<Vec<_>>()
                .join(",")
        ),
    }
}

pub fn encode(
    base: &str,
    filter: &QueryFilter,
    columns: &[String],
    sort: &[SortKey],
    registry: &TagTypeRegistry,
    options: &QueryOptions,
    timezone: FixedOffset,
) -> Result<String, Error> {
    Encoder::new(base, registry)
        .with_timezone(timezone)
        .with_options(options.clone())
        .encode(filter, columns, sort)
}

/// Formats an offset as the `±HH:MM` suffix appended to timestamp values.
pub fn timezone_suffix(offset: FixedOffset) -> String {
    let seconds = offset.local_minus_utc();
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.abs() / 60;
    format!("{}{:02}:{:02}", sign, minutes / 60, minutes % 60)
}

#[inline]
pub fn local_offset() -> FixedOffset {
    Local::now().offset().fix()
}

/// Mutation URL for `PUT`/`DELETE` of tag values on every subject matched by
/// `predicates`. An empty `values` addresses all values of `column`.
pub fn tags_url(home: &str, predicates: &str, column: &str, values: &[String]) -> String {
    let assignment = match values.is_empty() {
        true => escape(column),
        false => format!(
            "{}={}",
            escape(column),
            values
                .iter()
                .map(|v| escape(v))
                .collect::<Vec<_>>()
                .join(",")
        ),
    };

    format!("{}/tags/{}({})", home, predicates, assignment)
}

pub fn ids_predicate(ids: &[String]) -> String {
    format!(
        "id={}",
        ids.iter().map(|id| escape(id)).collect::<Vec<_>>().join(",")
    )
}

pub fn deep_link(home: &str, request_url: &str) -> String {
    format!("{}/static?query={}", home, escape_component(request_url))
}
