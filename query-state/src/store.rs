use crate::validate::validate;
use crate::Error;
use log::debug;
use std::num::NonZeroUsize;
use tagfiler_ql::{
    Arity, Direction, Encoder, Limit, Pagination, Predicate, Query, QueryFilter, RangeMode,
    SortKey, TagTypeRegistry,
};

const ID_COLUMN: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddPolicy {
    Prepend,
    ReplaceAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortChange {
    Sort(Direction),
    Unsort,
}

#[derive(Debug, Clone)]
struct EditSession {
    tag: String,
    snapshot: Option<(usize, Vec<Predicate>)>,
    page_index: usize,
}

/// Live columns, filter, sort and paging of one table view.
///
/// Mutations never issue requests; callers re-encode and refresh afterwards.
#[derive(Debug, Clone)]
pub struct QueryStateStore {
    filter: QueryFilter,
    columns: Vec<String>,
    sort: Vec<SortKey>,
    pagination: Pagination,
    edit: Option<EditSession>,
}

impl QueryStateStore {
    pub fn new(page_size: NonZeroUsize) -> Self {
        Self {
            filter: QueryFilter::new(),
            columns: Vec::new(),
            sort: Vec::new(),
            pagination: Pagination::new(page_size),
            edit: None,
        }
    }

    /// Bootstraps from a decoded deep link, keeping its page position.
    pub fn from_query(query: &Query, default_page_size: NonZeroUsize) -> Self {
        let mut store = Self::new(default_page_size);
        store.filter = query.filter.clone();
        for column in &query.columns {
            if !store.columns.contains(column) {
                store.columns.push(column.clone());
            }
        }
        for key in &query.sort {
            if store.columns.contains(&key.name) && store.sort_precedence(&key.name).is_none() {
                store.sort.push(key.clone());
            }
        }
        store.pagination = query.pagination(default_page_size);

        store
    }

    /// Replaces the view wholesale with `columns`, dropping filter, sort and paging.
    pub fn replace_view(&mut self, columns: impl IntoIterator<Item = String>) {
        self.filter.clear();
        self.sort.clear();
        self.columns.clear();
        self.edit = None;
        self.pagination.page_index = 0;
        for column in columns {
            if !self.columns.contains(&column) {
                self.columns.push(column);
            }
        }
    }

    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn sort(&self) -> &[SortKey] {
        &self.sort
    }

    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    pub fn editing(&self) -> Option<&str> {
        self.edit.as_ref().map(|e| e.tag.as_str())
    }

    pub fn set_column_filter(&mut self, tag: &str, predicates: Vec<Predicate>) {
        if predicates.is_empty() {
            self.filter.shift_remove(tag);
            return;
        }

        match self.filter.get_mut(tag) {
            Some(existing) => *existing = predicates,
            None => {
                self.filter.insert(tag.to_string(), predicates);
            }
        }
    }

    pub fn clear_filter(&mut self, tag: &str) -> bool {
        self.filter.shift_remove(tag).is_some()
    }

    pub fn clear_all_filters(&mut self) {
        self.filter.clear();
    }

    /// Returns whether `tag` was not already a result column.
    pub fn add_column(&mut self, tag: &str, policy: AddPolicy) -> bool {
        self.add_columns([tag.to_string()], policy)
    }

    /// Adds every tag not yet shown, newest in front, keeping their relative order.
    pub fn add_columns(&mut self, tags: impl IntoIterator<Item = String>, policy: AddPolicy) -> bool {
        if policy == AddPolicy::ReplaceAll {
            self.columns.clear();
            self.sort.clear();
            self.filter.clear();
            self.edit = None;
        }

        let mut added: Vec<String> = Vec::new();
        for tag in tags {
            if !self.columns.contains(&tag) && !added.contains(&tag) {
                added.push(tag);
            }
        }
        if added.is_empty() {
            return false;
        }

        debug!("Adding result columns {:?}", added);
        self.columns.splice(0..0, added);
        true
    }

    /// Removes a result column and, if it was a sort key, its sort entry.
    pub fn remove_column(&mut self, tag: &str) -> bool {
        let Some(index) = self.columns.iter().position(|c| c == tag) else {
            return false;
        };

        self.columns.remove(index);
        self.sort.retain(|k| k.name != tag);
        true
    }

    /// Only result columns can be sorted; returns `false` and changes
    /// nothing for any other tag.
    pub fn set_sort(&mut self, tag: &str, change: SortChange) -> bool {
        if !self.columns.iter().any(|c| c == tag) {
            return false;
        }

        match change {
            SortChange::Unsort => self.sort.retain(|k| k.name != tag),
            SortChange::Sort(direction) => match self.sort.iter_mut().find(|k| k.name == tag) {
                Some(key) => key.direction = direction,
                None => self.sort.push(SortKey::new(tag, direction)),
            },
        }
        true
    }

    /// 1-based sort precedence of `tag`, if it is a sort key.
    pub fn sort_precedence(&self, tag: &str) -> Option<usize> {
        self.sort.iter().position(|k| k.name == tag).map(|i| i + 1)
    }

    pub fn reorder_columns(&mut self, from: usize, to: usize) -> Result<(), Error> {
        let len = self.columns.len();
        for index in [from, to] {
            if index >= len {
                return Err(Error::ColumnIndex { index, len });
            }
        }

        let column = self.columns.remove(from);
        self.columns.insert(to, column);
        Ok(())
    }

    pub fn set_page(&mut self, page_index: usize) {
        self.pagination.page_index = page_index;
    }

    pub fn next_page(&mut self) {
        self.pagination.page_index = self.pagination.page_index.saturating_add(1);
    }

    pub fn previous_page(&mut self) {
        self.pagination.page_index = self.pagination.page_index.saturating_sub(1);
    }

    /// Changes the page size, keeping the first visible row on screen.
    pub fn set_page_size(&mut self, page_size: NonZeroUsize) {
        let offset = self.pagination.offset();
        self.pagination = Pagination {
            page_index: offset / page_size.get(),
            page_size,
        };
    }

    /// Starts editing the constraints of `tag`. Only one tag may be edited at
    /// a time; returns `false` and changes nothing while another edit is open.
    pub fn begin_edit(&mut self, tag: &str) -> bool {
        if self.edit.is_some() {
            return false;
        }

        let snapshot = self
            .filter
            .get_full(tag)
            .map(|(index, _, predicates)| (index, predicates.clone()));
        self.edit = Some(EditSession {
            tag: tag.to_string(),
            snapshot,
            page_index: self.pagination.page_index,
        });
        self.pagination.page_index = 0;
        debug!("Editing constraints of {}", tag);
        true
    }

    /// Commits the edited constraints, dropping the ones left without an
    /// operator or without values. The edit stays open if a remaining
    /// constraint is invalid.
    pub fn save_edit(&mut self, registry: &TagTypeRegistry) -> Result<(), Error> {
        let tag = match &self.edit {
            Some(session) => session.tag.clone(),
            None => return Err(Error::NotEditing),
        };

        let predicates: Vec<Predicate> = self
            .filter
            .get(&tag)
            .map(|p| {
                p.iter()
                    .filter(|p| !p.is_none())
                    .filter(|p| p.op.arity() == Arity::Zero || !p.values.is_empty())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for predicate in &predicates {
            validate(&tag, predicate, registry)?;
        }

        self.set_column_filter(&tag, predicates);
        self.edit = None;
        Ok(())
    }

    /// Restores the constraints and page of the edited tag as they were when
    /// the edit began.
    pub fn cancel_edit(&mut self) -> bool {
        let Some(session) = self.edit.take() else {
            return false;
        };

        self.filter.shift_remove(&session.tag);
        if let Some((index, predicates)) = session.snapshot {
            let index = index.min(self.filter.len());
            self.filter.shift_insert(index, session.tag, predicates);
        }
        self.pagination.page_index = session.page_index;
        true
    }

    fn scoped<'s>(&'s self, encoder: &Encoder<'s>) -> Encoder<'s> {
        encoder.clone().excluding(self.editing())
    }

    fn page_encoder<'s>(&'s self, encoder: &Encoder<'s>) -> Encoder<'s> {
        let offset = match self.edit {
            Some(_) => None,
            None => Some(self.pagination.offset()),
        };

        self.scoped(encoder)
            .with_range(None)
            .with_limit(Limit::Rows(self.pagination.page_size))
            .with_offset(offset)
    }

    /// URL reopening the current view; the payload of a bookmark.
    pub fn bookmark_url(&self, encoder: &Encoder<'_>) -> Result<String, Error> {
        self.page_encoder(encoder)
            .encode(&self.filter, &self.columns, &self.sort)
            .map_err(Into::into)
    }

    /// URL of the visible page of rows; always projects the `id` column.
    pub fn rows_url(&self, encoder: &Encoder<'_>) -> Result<String, Error> {
        let mut columns = self.columns.clone();
        if !columns.iter().any(|c| c == ID_COLUMN) {
            columns.push(ID_COLUMN.to_string());
        }

        self.page_encoder(encoder)
            .encode(&self.filter, &columns, &self.sort)
            .map_err(Into::into)
    }

    /// URL counting every row matched by the filter.
    pub fn count_url(&self, encoder: &Encoder<'_>) -> Result<String, Error> {
        self.range_url(encoder, ID_COLUMN, RangeMode::Count)
    }

    pub fn range_url(
        &self,
        encoder: &Encoder<'_>,
        tag: &str,
        mode: RangeMode,
    ) -> Result<String, Error> {
        self.scoped(encoder)
            .with_range(Some(mode))
            .encode(&self.filter, &[tag.to_string()], &[])
            .map_err(Into::into)
    }
}
