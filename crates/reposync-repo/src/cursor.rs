//! Paged pull-cursors over ordered row sets.
//!
//! Instead of holding a database-side scrollable cursor open, a [`RowSource`]
//! produces one bounded page per call, each page fetched with an ordinary
//! parameterized query continuing after the previous page's last key. A
//! [`Cursor`] wraps a source into a one-row-at-a-time reader with peeking,
//! which is what the merge join consumes. Peak memory is one page per open
//! cursor regardless of the total row count.

use async_trait::async_trait;
use std::collections::VecDeque;

use crate::error::RepoResult;

/// A source of ordered rows, pulled page by page.
///
/// An empty page signals exhaustion; implementations must not return an
/// empty page followed by a non-empty one.
#[async_trait]
pub trait RowSource<T: Send>: Send {
    /// Fetch the next page of rows.
    async fn next_page(&mut self) -> RepoResult<Vec<T>>;
}

/// A [`RowSource`] over an in-memory vector, returned in one page.
///
/// Used by repository fakes in tests and for replaying buffered rows.
pub struct VecSource<T> {
    rows: Option<Vec<T>>,
}

impl<T> VecSource<T> {
    /// Create a source yielding the given rows once.
    #[must_use]
    pub fn new(rows: Vec<T>) -> Self {
        Self { rows: Some(rows) }
    }
}

#[async_trait]
impl<T: Send> RowSource<T> for VecSource<T> {
    async fn next_page(&mut self) -> RepoResult<Vec<T>> {
        Ok(self.rows.take().unwrap_or_default())
    }
}

/// One-row-at-a-time reader over a [`RowSource`] with single-row lookahead.
pub struct Cursor<T: Send> {
    source: Box<dyn RowSource<T>>,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<T: Send> Cursor<T> {
    /// Wrap a row source.
    #[must_use]
    pub fn new(source: Box<dyn RowSource<T>>) -> Self {
        Self {
            source,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    async fn fill(&mut self) -> RepoResult<()> {
        while self.buffer.is_empty() && !self.exhausted {
            let page = self.source.next_page().await?;
            if page.is_empty() {
                self.exhausted = true;
            } else {
                self.buffer.extend(page);
            }
        }
        Ok(())
    }

    /// Look at the current row without consuming it.
    pub async fn peek(&mut self) -> RepoResult<Option<&T>> {
        self.fill().await?;
        Ok(self.buffer.front())
    }

    /// Consume and return the current row.
    pub async fn next(&mut self) -> RepoResult<Option<T>> {
        self.fill().await?;
        Ok(self.buffer.pop_front())
    }
}
