//! Wire types shared by every list endpoint.
//!
//! # Design
//! List responses carry the items under a resource-specific key next to a
//! `meta` object with `cursors.after`, `cursors.before` and `limit`. The
//! cursors are opaque; the client only copies `after` back into the next
//! request.

use serde::{Deserialize, Serialize};

/// Position markers for the neighbouring pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursors {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

/// Pagination metadata returned with every page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMeta {
    #[serde(default)]
    pub cursors: Cursors,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// One page of a list endpoint. Each fetch produces a new page; pages are
/// never merged.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: ListMeta,
}

impl<T> Page<T> {
    /// Cursor for the next page. Empty strings count as absent.
    pub fn after(&self) -> Option<&str> {
        non_empty(self.meta.cursors.after.as_deref())
    }

    pub fn before(&self) -> Option<&str> {
        non_empty(self.meta.cursors.before.as_deref())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> IntoIterator for Page<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

fn non_empty(cursor: Option<&str>) -> Option<&str> {
    cursor.filter(|cursor| !cursor.is_empty())
}
