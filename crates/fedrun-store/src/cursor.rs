use std::collections::VecDeque;

use rusqlite::params;
use tracing::warn;

use crate::error::CursorError;
use crate::store::ExampleStore;
use crate::types::{from_micros, Example};

/// Rows fetched per round trip to SQLite.
const PAGE_SIZE: i64 = 64;

/// Forward-only, read-only iteration over one client's examples in a closed
/// time range, in ascending id order.
///
/// Only one cursor may be open per store. The cursor releases its slot when it
/// is exhausted, when a row fails to decode, on [`close`](Self::close), or on
/// drop, whichever comes first.
pub struct Cursor<'a> {
    store: &'a ExampleStore,
    client_name: String,
    /// Quoted table identifier, resolved when the cursor was opened.
    table: String,
    start: i64,
    end: i64,
    /// Highest id fetched so far; the next page starts after it.
    after_id: i64,
    last_returned_id: Option<i64>,
    buffer: VecDeque<Example>,
    /// Decode failure met while filling; surfaces once the rows buffered
    /// ahead of it are handed out.
    pending: Option<CursorError>,
    closed: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(
        store: &'a ExampleStore,
        client_name: String,
        table: String,
        start: i64,
        end: i64,
    ) -> Self {
        Self {
            store,
            client_name,
            table,
            start,
            end,
            after_id: 0,
            last_returned_id: None,
            buffer: VecDeque::new(),
            pending: None,
            closed: false,
        }
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Id of the last example handed out, if any.
    pub fn last_returned_id(&self) -> Option<i64> {
        self.last_returned_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Return the next example in the range.
    ///
    /// `Exhausted` is terminal: every later call returns it again.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Example, CursorError> {
        if self.closed {
            return Err(CursorError::Exhausted);
        }
        if self.buffer.is_empty() && self.pending.is_none() {
            if let Err(e) = self.fill() {
                self.pending = Some(e);
            }
        }
        if let Some(example) = self.buffer.pop_front() {
            self.last_returned_id = Some(example.id);
            return Ok(example);
        }
        match self.pending.take() {
            Some(e) => {
                warn!(client = %self.client_name, error = %e, "closing cursor on corrupt row");
                self.close();
                Err(e)
            }
            None => {
                self.close();
                Err(CursorError::Exhausted)
            }
        }
    }

    /// Release the store's cursor slot. Safe to call any number of times.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.buffer.clear();
            self.pending = None;
            self.store.release_cursor();
        }
    }

    /// Fetch the next page of rows after `after_id`.
    ///
    /// Rows decoded before a failure stay in the buffer.
    fn fill(&mut self) -> Result<(), CursorError> {
        let conn = self
            .store
            .connection()
            .ok_or_else(|| CursorError::Corrupt("store closed under cursor".into()))?;
        let table = &self.table;
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT id, payload, timestamp FROM {table}
                 WHERE id > ?1 AND timestamp >= ?2 AND timestamp <= ?3
                 ORDER BY id
                 LIMIT ?4"
            ))
            .map_err(|e| CursorError::Corrupt(e.to_string()))?;
        let mut rows = stmt
            .query(params![self.after_id, self.start, self.end, PAGE_SIZE])
            .map_err(|e| CursorError::Corrupt(e.to_string()))?;

        while let Some(row) = rows.next().map_err(|e| CursorError::Corrupt(e.to_string()))? {
            let id: i64 = row.get(0).map_err(|e| CursorError::Corrupt(e.to_string()))?;
            let payload: Vec<u8> = row.get(1).map_err(|e| CursorError::Corrupt(e.to_string()))?;
            let micros: i64 = row.get(2).map_err(|e| CursorError::Corrupt(e.to_string()))?;
            let timestamp = from_micros(micros)
                .ok_or_else(|| CursorError::Corrupt(format!("timestamp out of range in row {id}")))?;
            if payload.is_empty() {
                return Err(CursorError::Corrupt(format!("empty payload in row {id}")));
            }
            self.after_id = id;
            self.buffer.push_back(Example {
                id,
                client_name: self.client_name.clone(),
                payload,
                timestamp,
            });
        }
        Ok(())
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("client_name", &self.client_name)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("after_id", &self.after_id)
            .field("closed", &self.closed)
            .finish()
    }
}
