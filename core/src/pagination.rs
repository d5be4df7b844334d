//! Lazy cursor-based pagination.
//!
//! # Design
//! A `Paginator` walks a list endpoint forward from its initial cursor:
//!
//! - `Fresh`: nothing fetched yet, always has more.
//! - `More`: a page is held and its `after` cursor points at the next one.
//! - `Exhausted`: the held page had no `after` cursor.
//!
//! Every fetch goes through the client's full retry and decode pipeline. A
//! failed fetch leaves the state untouched, so the same fetch can be retried.
//! Fetching past the end returns the last page without touching the network.
//! A paginator is single-owner and never restarts; build a new one to start
//! over.

use std::mem;

use serde::de::DeserializeOwned;

use crate::client::{Client, RequestOptions};
use crate::error::Error;
use crate::query;
use crate::types::Page;

const AFTER: &str = "after";

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Fresh { cursor: Option<String> },
    More { cursor: String },
    Exhausted,
}

/// Stateful walker over the pages of one list endpoint.
#[derive(Debug)]
pub struct Paginator<T> {
    client: Client,
    path: String,
    query: Vec<(String, String)>,
    key: String,
    options: RequestOptions,
    state: State,
    page: Option<Page<T>>,
}

impl<T: DeserializeOwned> Paginator<T> {
    pub(crate) fn new(
        client: Client,
        path: &str,
        query: Vec<(String, String)>,
        key: &str,
        options: RequestOptions,
    ) -> Self {
        let cursor = query::get(&query, AFTER)
            .filter(|after| !after.is_empty())
            .map(str::to_string);
        Self {
            client,
            path: path.to_string(),
            query,
            key: key.to_string(),
            options,
            state: State::Fresh { cursor },
            page: None,
        }
    }

    /// False once a fetched page reported no further cursor.
    pub fn has_more(&self) -> bool {
        self.state != State::Exhausted
    }

    /// The most recently fetched page.
    pub fn current_page(&self) -> Option<&Page<T>> {
        self.page.as_ref()
    }

    /// Fetch the next page and make it current.
    ///
    /// Once exhausted this returns the last page again without a request.
    ///
    /// # Errors
    ///
    /// The terminal error of the fetch. The paginator does not move, so the
    /// call may be repeated.
    pub fn fetch_next(&mut self) -> Result<&Page<T>, Error> {
        match self.next_cursor() {
            Some(cursor) => self.fetch(cursor).map(|page| &*page),
            None => self.page.as_ref().ok_or_else(|| Error::MissingResult {
                key: self.key.clone(),
            }),
        }
    }

    /// Flatten the remaining pages into their items.
    pub fn into_items(self) -> Items<T> {
        Items {
            pages: self,
            buffer: Vec::new().into_iter(),
        }
    }

    /// Cursor for the next request, `None` when exhausted. The inner `None`
    /// is a fresh walk without a starting cursor.
    fn next_cursor(&self) -> Option<Option<String>> {
        match &self.state {
            State::Fresh { cursor } => Some(cursor.clone()),
            State::More { cursor } => Some(Some(cursor.clone())),
            State::Exhausted => None,
        }
    }

    fn fetch(&mut self, cursor: Option<String>) -> Result<&mut Page<T>, Error> {
        let mut query = self.query.clone();
        query::set(&mut query, AFTER, cursor.as_deref());
        let page: Page<T> = self.client.fetch_page(&self.path, &query, &self.key, &self.options)?;

        self.state = match page.after() {
            Some(after) => State::More {
                cursor: after.to_string(),
            },
            None => State::Exhausted,
        };
        tracing::debug!(path = %self.path, items = page.len(), more = self.has_more(), "fetched page");
        Ok(self.page.insert(page))
    }
}

/// Yields each page in order, then `None` once the last page was returned.
///
/// A failed fetch yields `Err` without advancing; calling `next` again
/// retries the same page. Stop on the first error to avoid looping on a
/// persistent failure, e.g. with `collect::<Result<Vec<_>, _>>()`.
impl<T: DeserializeOwned + Clone> Iterator for Paginator<T> {
    type Item = Result<Page<T>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.next_cursor()?;
        Some(self.fetch(cursor).map(|page| page.clone()))
    }
}

/// Item-by-item view over a paginator, fetching pages as needed.
#[derive(Debug)]
pub struct Items<T> {
    pages: Paginator<T>,
    buffer: std::vec::IntoIter<T>,
}

impl<T: DeserializeOwned> Iterator for Items<T> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.next() {
                return Some(Ok(item));
            }
            let cursor = self.pages.next_cursor()?;
            match self.pages.fetch(cursor) {
                Ok(page) => self.buffer = mem::take(&mut page.items).into_iter(),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
