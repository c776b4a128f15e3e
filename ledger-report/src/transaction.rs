//! Transaction representation

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;

use crate::data_structures::OrderedMap;
use crate::datetime::DateInterval;
use crate::posting::PostId;
use crate::value::Value;

/// Handle of a transaction inside a [`Journal`](crate::journal::Journal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XactId(pub(crate) usize);

impl fmt::Display for XactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xact#{}", self.0)
    }
}

/// Position information for source tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub pathname: Option<PathBuf>,
    pub beg_line: usize,
    pub end_line: usize,
}

impl Position {
    pub fn new(pathname: Option<PathBuf>, line: usize) -> Self {
        Self { pathname, beg_line: line, end_line: line }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pathname {
            Some(path) => write!(f, "\"{}\", line {}", path.display(), self.beg_line),
            None => write!(f, "line {}", self.beg_line),
        }
    }
}

// Transaction flags
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct XactFlags: u16 {
        const GENERATED = 0x01;
        const TEMP = 0x02;
        const PERIODIC = 0x04;
    }
}

/// Clearing state shared by transactions and postings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemState {
    /// Uncleared
    #[default]
    Uncleared,
    /// Cleared (*)
    Cleared,
    /// Pending (!)
    Pending,
}

/// A dated, payee-labelled group of postings
#[derive(Debug, Clone)]
pub struct Xact {
    pub date: NaiveDate,
    /// Auxiliary/effective date
    pub aux_date: Option<NaiveDate>,
    pub state: ItemState,
    pub code: Option<String>,
    pub payee: String,
    pub note: Option<String>,
    pub flags: XactFlags,
    /// Postings in entry order. Unidirectionally linked postings point here
    /// without being listed.
    pub posts: Vec<PostId>,
    pub metadata: OrderedMap<String, Value>,
    pub pos: Option<Position>,
}

impl Xact {
    pub fn new(date: NaiveDate, payee: impl Into<String>) -> Self {
        Self {
            date,
            aux_date: None,
            state: ItemState::Uncleared,
            code: None,
            payee: payee.into(),
            note: None,
            flags: XactFlags::empty(),
            posts: Vec::new(),
            metadata: OrderedMap::new(),
            pos: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(tag.into(), value);
        self
    }

    pub fn with_position(mut self, pos: Position) -> Self {
        self.pos = Some(pos);
        self
    }

    pub fn is_temp(&self) -> bool {
        self.flags.contains(XactFlags::TEMP)
    }

    pub fn get_tag(&self, tag: &str) -> Option<&Value> {
        self.metadata.get(tag)
    }

    /// Copy of the header only: date, payee, state, code, note, tags.
    /// The copy owns no postings.
    pub fn copy_details(&self) -> Self {
        Self { posts: Vec::new(), ..self.clone() }
    }
}

/// A periodic transaction template (`~ monthly` in journal syntax)
#[derive(Debug, Clone)]
pub struct PeriodXact {
    pub period: DateInterval,
    pub period_text: String,
    /// Header carrying the template postings
    pub xact: XactId,
}
