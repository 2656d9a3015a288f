//! Recordset cursor state machine
//!
//! A [`Recordset`] owns a copy of the rows a query returned and a cursor
//! over them with the BOF/EOF latching legacy clients expect:
//!
//! - `bof`: the cursor moved before the first record
//! - `eof`: the cursor moved past the last record
//! - with no records both latches are set
//! - whenever neither latch is set, `position` indexes a real record
//!
//! Edits follow the optimistic model: the first `set_field` on a record
//! snapshots it, `update` commits, `cancel_update` restores the snapshot.
//! Moving the cursor commits a pending edit.

use serde::{Deserialize, Serialize};

use crate::criteria::{Criteria, SortKey};
use crate::error::{Error, Result};
use crate::types::{FieldMetadata, QueryResult, Row, Value};

/// Cursor capabilities requested by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorType {
    /// Forward-only
    ForwardOnly,
    /// Keyset-driven
    Keyset,
    /// Dynamic
    Dynamic,
    /// Static snapshot
    #[default]
    Static,
}

/// Concurrency control for edits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    /// No edits allowed
    #[default]
    ReadOnly,
    /// Record locked on edit
    Pessimistic,
    /// Conflicts detected on update
    Optimistic,
    /// Optimistic batch updates
    BatchOptimistic,
}

impl LockType {
    /// Whether edits are refused
    #[inline]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }
}

/// Recordset lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordsetState {
    /// Usable
    Open,
    /// Terminal
    Closed,
}

/// Pending edit kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditMode {
    /// Nothing pending
    None,
    /// The current record has uncommitted changes
    InProgress,
    /// The current record was added and not yet committed
    Add,
}

/// Search direction for [`Recordset::find`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDirection {
    /// Toward the last record
    #[default]
    Forward,
    /// Toward the first record
    Backward,
}

/// Options for opening a recordset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordsetOptions {
    /// Cursor type
    #[serde(default)]
    pub cursor_type: CursorType,
    /// Lock type
    #[serde(default)]
    pub lock_type: LockType,
    /// Keep at most this many rows; 0 keeps everything
    #[serde(default)]
    pub max_records: usize,
}

impl RecordsetOptions {
    /// Set lock type
    pub fn with_lock_type(mut self, lock_type: LockType) -> Self {
        self.lock_type = lock_type;
        self
    }

    /// Set cursor type
    pub fn with_cursor_type(mut self, cursor_type: CursorType) -> Self {
        self.cursor_type = cursor_type;
        self
    }

    /// Set row limit
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }
}

#[derive(Debug, Clone)]
enum PendingEdit {
    Modify { index: usize, original: Row },
    Add { index: usize },
}

/// In-memory rows plus a navigable cursor
#[derive(Debug, Clone)]
pub struct Recordset {
    id: String,
    connection_id: String,
    source: String,
    params: Vec<Value>,
    state: RecordsetState,
    options: RecordsetOptions,
    columns: Vec<String>,
    rows: Vec<Row>,
    fields: Vec<FieldMetadata>,
    position: usize,
    bof: bool,
    eof: bool,
    pending: Option<PendingEdit>,
    filter: Option<String>,
    sort: Option<String>,
}

impl Recordset {
    /// Snapshot a query result. Rows are copied (and truncated to
    /// `max_records` when it is non-zero).
    pub fn from_result(
        id: impl Into<String>,
        connection_id: impl Into<String>,
        source: impl Into<String>,
        params: Vec<Value>,
        options: RecordsetOptions,
        result: &QueryResult,
    ) -> Self {
        let mut rs = Self {
            id: id.into(),
            connection_id: connection_id.into(),
            source: source.into(),
            params,
            state: RecordsetState::Open,
            options,
            columns: Vec::new(),
            rows: Vec::new(),
            fields: Vec::new(),
            position: 0,
            bof: true,
            eof: true,
            pending: None,
            filter: None,
            sort: None,
        };
        rs.load(result);
        rs
    }

    fn load(&mut self, result: &QueryResult) {
        let limit = match self.options.max_records {
            0 => result.data.len(),
            n => n.min(result.data.len()),
        };
        self.rows = result.data[..limit].to_vec();
        self.columns = match self.rows.first() {
            Some(row) => row.columns().to_vec(),
            None => result.fields.iter().map(|f| f.name.clone()).collect(),
        };
        self.fields = FieldMetadata::infer(&self.columns, &self.rows);
        self.pending = None;
        self.filter = None;
        self.sort = None;
        self.reset_cursor();
    }

    /// Replace the rows with a fresh result and reset the cursor
    pub fn reload(&mut self, result: &QueryResult) -> Result<()> {
        self.ensure_open()?;
        self.load(result);
        Ok(())
    }

    fn reset_cursor(&mut self) {
        self.position = 0;
        let empty = self.rows.is_empty();
        self.bof = empty;
        self.eof = empty;
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Recordset id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owning connection
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Source statement
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Source statement parameters
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Lifecycle state
    pub fn state(&self) -> RecordsetState {
        self.state
    }

    /// Cursor type
    pub fn cursor_type(&self) -> CursorType {
        self.options.cursor_type
    }

    /// Lock type
    pub fn lock_type(&self) -> LockType {
        self.options.lock_type
    }

    /// Field metadata
    pub fn fields(&self) -> &[FieldMetadata] {
        &self.fields
    }

    /// Zero-based cursor position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Before-first latch
    pub fn bof(&self) -> bool {
        self.bof
    }

    /// Past-last latch
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Number of records
    pub fn record_count(&self) -> usize {
        self.rows.len()
    }

    /// One-based position, or −1 when there is no current record
    pub fn absolute_position(&self) -> i64 {
        if self.bof || self.eof {
            -1
        } else {
            self.position as i64 + 1
        }
    }

    /// Pending edit kind
    pub fn edit_mode(&self) -> EditMode {
        match self.pending {
            None => EditMode::None,
            Some(PendingEdit::Modify { .. }) => EditMode::InProgress,
            Some(PendingEdit::Add { .. }) => EditMode::Add,
        }
    }

    /// Active filter criteria, if any
    pub fn filter_criteria(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Active sort, if any
    pub fn sort_spec(&self) -> Option<&str> {
        self.sort.as_deref()
    }

    /// Copy of every record
    pub fn get_rows(&self) -> Vec<Row> {
        self.rows.clone()
    }

    /// The current record, if there is one
    pub fn current(&self) -> Option<&Row> {
        if self.bof || self.eof {
            None
        } else {
            self.rows.get(self.position)
        }
    }

    /// Serializable snapshot of the cursor
    pub fn view(&self) -> RecordsetView {
        RecordsetView {
            id: self.id.clone(),
            connection_id: self.connection_id.clone(),
            source: self.source.clone(),
            state: self.state,
            cursor_type: self.options.cursor_type,
            lock_type: self.options.lock_type,
            record_count: self.rows.len(),
            position: self.position,
            absolute_position: self.absolute_position(),
            bof: self.bof,
            eof: self.eof,
            edit_mode: self.edit_mode(),
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            fields: self.fields.clone(),
            current: self.current().cloned(),
        }
    }

    // ------------------------------------------------------------------
    // Guards
    // ------------------------------------------------------------------

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            RecordsetState::Open => Ok(()),
            RecordsetState::Closed => Err(Error::invalid_state(format!(
                "recordset {} is closed",
                self.id
            ))),
        }
    }

    fn ensure_writable(&self, op: &str) -> Result<()> {
        if self.options.lock_type.is_read_only() {
            return Err(Error::read_only(format!(
                "{} is not allowed on read-only recordset {}",
                op, self.id
            )));
        }
        Ok(())
    }

    fn ensure_current(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(Error::invalid_state("recordset is empty"));
        }
        if self.bof {
            return Err(Error::invalid_state("cursor is at BOF"));
        }
        if self.eof {
            return Err(Error::invalid_state("cursor is at EOF"));
        }
        Ok(())
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::not_found("field", name))
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// First record; with no records both latches stay set
    pub fn move_first(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.commit_pending();
        let empty = self.rows.is_empty();
        self.position = 0;
        self.bof = empty;
        self.eof = empty;
        Ok(())
    }

    /// Last record; with no records both latches stay set
    pub fn move_last(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.commit_pending();
        let empty = self.rows.is_empty();
        self.position = self.rows.len().saturating_sub(1);
        self.bof = empty;
        self.eof = empty;
        Ok(())
    }

    /// Next record; at the last record EOF latches and the position stays
    pub fn move_next(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.commit_pending();
        if self.position + 1 < self.rows.len() {
            self.position += 1;
            self.bof = false;
            self.eof = false;
        } else {
            self.eof = true;
        }
        Ok(())
    }

    /// Previous record; at the first record BOF latches and the position
    /// stays
    pub fn move_previous(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.commit_pending();
        if self.position > 0 && !self.rows.is_empty() {
            self.position -= 1;
            self.bof = false;
            self.eof = false;
        } else {
            self.bof = true;
        }
        Ok(())
    }

    /// Absolute zero-based move
    pub fn move_to(&mut self, position: usize) -> Result<()> {
        self.ensure_open()?;
        if position >= self.rows.len() {
            return Err(Error::invalid_state(format!(
                "position {} is out of range (record count {})",
                position,
                self.rows.len()
            )));
        }
        self.commit_pending();
        self.position = position;
        self.bof = false;
        self.eof = false;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------

    /// Value of a field on the current record
    pub fn get_field(&self, name: &str) -> Result<&Value> {
        self.ensure_open()?;
        self.ensure_current()?;
        let column = &self.columns[self.column_index(name)?];
        self.rows[self.position]
            .get_by_name(column)
            .ok_or_else(|| Error::not_found("field", name))
    }

    /// Change a field on the current record, starting an edit if none is
    /// pending
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.ensure_open()?;
        self.ensure_writable("set_field")?;
        self.ensure_current()?;
        let column = self.columns[self.column_index(name)?].clone();
        if self.rows[self.position].index_of(&column).is_none() {
            return Err(Error::not_found("field", name));
        }

        if self.pending.is_none() {
            self.pending = Some(PendingEdit::Modify {
                index: self.position,
                original: self.rows[self.position].clone(),
            });
        }

        self.rows[self.position]
            .set_by_name(&column, value.into())
            .map(|_| ())
            .ok_or_else(|| Error::not_found("field", name))
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Append an all-NULL record and make it current
    pub fn add_new(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_writable("add_new")?;
        self.commit_pending();

        self.rows.push(Row::nulls(self.columns.clone()));
        self.position = self.rows.len() - 1;
        self.bof = false;
        self.eof = false;
        self.pending = Some(PendingEdit::Add {
            index: self.position,
        });
        Ok(())
    }

    /// Remove the current record
    pub fn delete(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_writable("delete")?;
        self.ensure_current()?;

        self.pending = None;
        self.rows.remove(self.position);
        if self.rows.is_empty() {
            self.reset_cursor();
        } else if self.position >= self.rows.len() {
            self.position = self.rows.len() - 1;
        }
        Ok(())
    }

    /// Commit the pending edit. A no-op when nothing is pending.
    pub fn update(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_writable("update")?;
        self.commit_pending();
        Ok(())
    }

    /// Discard the pending edit: restore the modified record or drop the
    /// added one
    pub fn cancel_update(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.pending.take() {
            None => {}
            Some(PendingEdit::Modify { index, original }) => {
                if let Some(row) = self.rows.get_mut(index) {
                    *row = original;
                }
            }
            Some(PendingEdit::Add { index }) => {
                if index < self.rows.len() {
                    self.rows.remove(index);
                }
                if self.rows.is_empty() {
                    self.reset_cursor();
                } else {
                    self.position = self.position.min(self.rows.len() - 1);
                    self.bof = false;
                    self.eof = false;
                }
            }
        }
        Ok(())
    }

    fn commit_pending(&mut self) {
        self.pending = None;
    }

    // ------------------------------------------------------------------
    // Find / Filter / Sort
    // ------------------------------------------------------------------

    /// Move to the next record matching `criteria`.
    ///
    /// Scans from the current record (or the one after it when
    /// `skip_current`) in `direction`. Returns whether a record was found;
    /// on exhaustion EOF is latched, and BOF too when searching backward.
    pub fn find(
        &mut self,
        criteria: &str,
        skip_current: bool,
        direction: SearchDirection,
    ) -> Result<bool> {
        self.ensure_open()?;
        let criteria = Criteria::parse(criteria)?;
        criteria.validate(&self.columns)?;
        self.commit_pending();

        let len = self.rows.len() as isize;
        let step: isize = match direction {
            SearchDirection::Forward => 1,
            SearchDirection::Backward => -1,
        };
        let mut idx = self.position as isize;
        if skip_current {
            idx += step;
        }

        while len > 0 && (0..len).contains(&idx) {
            if criteria.matches(&self.rows[idx as usize]) {
                self.position = idx as usize;
                self.bof = false;
                self.eof = false;
                return Ok(true);
            }
            idx += step;
        }

        self.eof = true;
        if direction == SearchDirection::Backward || self.rows.is_empty() {
            self.bof = true;
        }
        Ok(false)
    }

    /// Keep only records matching `criteria`
    pub fn filter(&mut self, criteria: &str) -> Result<()> {
        self.ensure_open()?;
        let parsed = Criteria::parse(criteria)?;
        parsed.validate(&self.columns)?;
        self.filter_with(|row| parsed.matches(row))?;
        self.filter = Some(criteria.to_string());
        Ok(())
    }

    /// Keep only records for which `predicate` holds
    pub fn filter_with<F>(&mut self, predicate: F) -> Result<()>
    where
        F: Fn(&Row) -> bool,
    {
        self.ensure_open()?;
        self.commit_pending();
        self.rows.retain(|row| predicate(row));
        self.filter = None;
        self.reset_cursor();
        Ok(())
    }

    /// Stable multi-key sort, e.g. `"Name ASC, Age DESC"`
    pub fn sort(&mut self, spec: &str) -> Result<()> {
        self.ensure_open()?;
        let keys = SortKey::parse_list(spec)?;
        for key in &keys {
            self.column_index(&key.field)?;
        }
        self.commit_pending();
        self.rows.sort_by(|a, b| SortKey::compare_rows(&keys, a, b));
        self.sort = Some(spec.to_string());
        self.reset_cursor();
        Ok(())
    }

    /// Mark closed and drop the rows
    pub fn close(&mut self) {
        self.state = RecordsetState::Closed;
        self.rows.clear();
        self.pending = None;
        self.position = 0;
        self.bof = true;
        self.eof = true;
    }
}

/// Serializable recordset snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordsetView {
    /// Recordset id
    pub id: String,
    /// Owning connection
    pub connection_id: String,
    /// Source statement
    pub source: String,
    /// Lifecycle state
    pub state: RecordsetState,
    /// Cursor type
    pub cursor_type: CursorType,
    /// Lock type
    pub lock_type: LockType,
    /// Number of records
    pub record_count: usize,
    /// Zero-based position
    pub position: usize,
    /// One-based position or −1
    pub absolute_position: i64,
    /// Before-first latch
    pub bof: bool,
    /// Past-last latch
    pub eof: bool,
    /// Pending edit kind
    pub edit_mode: EditMode,
    /// Active filter
    pub filter: Option<String>,
    /// Active sort
    pub sort: Option<String>,
    /// Field metadata
    pub fields: Vec<FieldMetadata>,
    /// Current record
    pub current: Option<Row>,
}
