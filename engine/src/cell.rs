//! FILENAME: engine/src/cell.rs
//! PURPOSE: The tagged cell-content variant and its memoized value.
//! CONTEXT: A `Cell` never holds a reference back to its owning `Sheet` —
//! the `Sheet` orchestrates parsing, cycle detection, and edge maintenance
//! from the outside (see `sheet.rs`); `Cell` is a narrow, mostly-pure data
//! type. The one piece of interior mutation is the evaluation cache, which
//! needs to be writable through a shared `&Sheet` during reads.

use std::cell::RefCell;
use std::collections::HashSet;

use parser::{CellValue, Formula};
use position::Position;

use crate::sheet::Sheet;

pub(crate) const ESCAPE_SIGN: char = '\'';
pub(crate) const FORMULA_SIGN: char = '=';

/// The tagged content of a cell.
#[derive(Debug, Clone)]
pub(crate) enum CellKind {
    Empty,
    Text {
        raw: String,
        /// 1 if `raw` starts with the escape sigil and that character
        /// should be hidden from the value (but not from the text), else 0.
        value_offset: usize,
    },
    Formula(Formula),
}

impl CellKind {
    fn is_empty(&self) -> bool {
        matches!(self, CellKind::Empty)
    }

    fn text(&self) -> String {
        match self {
            CellKind::Empty => String::new(),
            CellKind::Text { raw, .. } => raw.clone(),
            CellKind::Formula(f) => format!("{}{}", FORMULA_SIGN, f.expression()),
        }
    }

    pub(crate) fn referenced_cells(&self) -> Vec<Position> {
        match self {
            CellKind::Formula(f) => f.referenced_cells(),
            _ => Vec::new(),
        }
    }
}

/// A single addressable cell. Owned and addressed exclusively by `Sheet`.
#[derive(Debug)]
pub struct Cell {
    pub(crate) kind: CellKind,
    pub(crate) cache: RefCell<Option<CellValue>>,
    pub(crate) depends_on: HashSet<Position>,
    pub(crate) dependents: HashSet<Position>,
}

impl Cell {
    pub(crate) fn empty() -> Self {
        Cell {
            kind: CellKind::Empty,
            cache: RefCell::new(None),
            depends_on: HashSet::new(),
            dependents: HashSet::new(),
        }
    }

    /// The cell's value, computing and memoizing it if not already cached.
    pub fn value(&self, sheet: &Sheet) -> CellValue {
        if let Some(cached) = self.cache.borrow().as_ref() {
            return cached.clone();
        }
        let computed = match &self.kind {
            CellKind::Empty => CellValue::Text(String::new()),
            CellKind::Text { raw, value_offset } => CellValue::Text(raw[*value_offset..].to_string()),
            CellKind::Formula(f) => {
                let outcome = f.evaluate(sheet);
                if let parser::EvalOutcome::Error(e) = outcome {
                    log::trace!("formula evaluation produced {}", e);
                }
                CellValue::from(outcome)
            }
        };
        *self.cache.borrow_mut() = Some(computed.clone());
        computed
    }

    /// The raw stored text, including any leading escape character.
    pub fn text(&self) -> String {
        self.kind.text()
    }

    /// Positions this cell's formula references (empty for non-formula cells).
    pub fn referenced_cells(&self) -> Vec<Position> {
        self.kind.referenced_cells()
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_empty()
    }
}

/// Builds the `CellKind` a given text would produce, without touching any
/// cell's stored state. Returns a parse error for malformed formula source.
/// The caller (`Sheet::set_cell`) is responsible for running cycle detection
/// on the result's referenced cells before committing it.
pub(crate) fn build_kind(text: &str) -> Result<CellKind, parser::ParseError> {
    if text.is_empty() {
        return Ok(CellKind::Empty);
    }
    if text.starts_with(FORMULA_SIGN) && text.len() > 1 {
        let formula = Formula::parse(&text[1..])?;
        return Ok(CellKind::Formula(formula));
    }
    let value_offset = if text.starts_with(ESCAPE_SIGN) { 1 } else { 0 };
    Ok(CellKind::Text {
        raw: text.to_string(),
        value_offset,
    })
}
