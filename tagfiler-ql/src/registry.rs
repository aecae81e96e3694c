use crate::escape::escape;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DbType {
    /// A tag with no value, only present or absent.
    Empty,
    Text,
    Int8,
    Float8,
    Date,
    Timestamptz,
    Boolean,
    Other(String),
}

impl DbType {
    pub fn as_str(&self) -> &str {
        match self {
            DbType::Empty => "",
            DbType::Text => "text",
            DbType::Int8 => "int8",
            DbType::Float8 => "float8",
            DbType::Date => "date",
            DbType::Timestamptz => "timestamptz",
            DbType::Boolean => "boolean",
            DbType::Other(s) => s,
        }
    }

    /// Types whose values can be range-split into a `(low,high)` pair.
    #[inline]
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            DbType::Int8 | DbType::Float8 | DbType::Date | DbType::Timestamptz
        )
    }
}

impl From<&str> for DbType {
    fn from(value: &str) -> Self {
        match value {
            "" | "empty" => DbType::Empty,
            "text" => DbType::Text,
            "int8" => DbType::Int8,
            "float8" => DbType::Float8,
            "date" => DbType::Date,
            "timestamptz" => DbType::Timestamptz,
            "boolean" => DbType::Boolean,
            other => DbType::Other(other.to_string()),
        }
    }
}

impl Serialize for DbType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DbType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(DbType::from(value.as_deref().unwrap_or("")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDef {
    pub db_type: DbType,
    pub multivalue: bool,
    pub unique: bool,
}

/// One row of the backend's tag definition listing.
#[derive(Debug, Deserialize)]
pub struct TagDefRow {
    pub tagdef: String,

    #[serde(rename = "tagdef dbtype", default = "empty_db_type")]
    pub db_type: DbType,

    #[serde(rename = "tagdef multivalue", default)]
    pub multivalue: bool,

    #[serde(rename = "tagdef unique", default)]
    pub unique: bool,
}

fn empty_db_type() -> DbType {
    DbType::Empty
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagTypeRegistry {
    tags: HashMap<String, TagDef>,
}

impl TagTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>, def: TagDef) {
        self.tags.insert(tag.into(), def);
    }

    #[inline]
    pub fn with_tag(mut self, tag: impl Into<String>, db_type: DbType) -> Self {
        self.insert(
            tag,
            TagDef {
                db_type,
                multivalue: false,
                unique: false,
            },
        );

        self
    }

    pub fn get(&self, tag: &str) -> Option<&TagDef> {
        self.tags.get(tag)
    }

    pub fn db_type(&self, tag: &str) -> Option<&DbType> {
        self.tags.get(tag).map(|d| &d.db_type)
    }

    #[inline]
    pub fn is_timestamp(&self, tag: &str) -> bool {
        matches!(self.db_type(tag), Some(DbType::Timestamptz))
    }

    /// Unknown tags are treated as range capable, so a `(low,high)` value
    /// produced by a between predicate is never silently turned into equality.
    pub fn allows_range(&self, tag: &str) -> bool {
        self.db_type(tag).map_or(true, DbType::is_ordered)
    }

    pub fn unique_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self
            .tags
            .iter()
            .filter(|(_, d)| d.unique)
            .map(|(t, _)| t.as_str())
            .collect();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl FromIterator<TagDefRow> for TagTypeRegistry {
    fn from_iter<I: IntoIterator<Item = TagDefRow>>(rows: I) -> Self {
        let tags = rows
            .into_iter()
            .map(|row| {
                (
                    row.tagdef,
                    TagDef {
                        db_type: row.db_type,
                        multivalue: row.multivalue,
                        unique: row.unique,
                    },
                )
            })
            .collect();

        Self { tags }
    }
}

/// URL listing every tag definition together with its type flags.
pub fn registry_url(home: &str) -> String {
    format!(
        "{}/subject/tagdef(tagdef;{};{};{})?limit=none",
        home,
        escape("tagdef dbtype"),
        escape("tagdef multivalue"),
        escape("tagdef unique")
    )
}
