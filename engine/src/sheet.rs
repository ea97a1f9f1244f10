//! FILENAME: engine/src/sheet.rs
//! PURPOSE: Sparse cell storage, addressing, cycle detection, cache
//! invalidation, and the printable-region bookkeeping.
//! CONTEXT: This is where `Cell`'s three operations (replace content,
//! detect cycles, rewrite edges) get orchestrated against the owning
//! `HashMap<Position, Cell>` — `Cell` itself never sees the map.

use std::collections::HashMap;
use std::io::{self, Write};

use parser::CellValue;
use position::{Position, Size};

use crate::cell::{self, Cell, CellKind};
use crate::error::EngineError;

/// A sparse, rectangular sheet of cells.
#[derive(Debug, Default)]
pub struct Sheet {
    cells: HashMap<Position, Cell>,
    print_size: Size,
}

impl Sheet {
    pub fn new() -> Self {
        Sheet {
            cells: HashMap::new(),
            print_size: Size::default(),
        }
    }

    /// Replaces the content of the cell at `pos`. Creates the cell (and any
    /// placeholder cells it newly references) as needed. A no-op if `text`
    /// equals the cell's current canonical text.
    pub fn set_cell(&mut self, pos: Position, text: &str) -> Result<(), EngineError> {
        if !pos.is_valid() {
            return Err(EngineError::InvalidPosition(pos));
        }
        self.ensure_cell(pos);

        let current_text = self.cells.get(&pos).expect("just ensured").text();
        if current_text == text {
            return Ok(());
        }

        let new_kind = cell::build_kind(text)?;
        if let CellKind::Formula(_) = &new_kind {
            let candidates: std::collections::HashSet<Position> =
                new_kind.referenced_cells().into_iter().collect();
            if self.would_create_cycle(pos, &candidates) {
                log::warn!("rejecting formula at {:?}: would create a cycle", pos);
                return Err(EngineError::CircularDependency(pos));
            }
        }

        self.replace_kind(pos, new_kind);

        if !self.cells.get(&pos).expect("just replaced").is_empty() {
            self.print_size.rows = self.print_size.rows.max(pos.row + 1);
            self.print_size.cols = self.print_size.cols.max(pos.col + 1);
        }
        log::debug!("set_cell at {:?}", pos);
        Ok(())
    }

    /// Non-mutating lookup. Returns `None` for an unoccupied slot.
    pub fn get_cell(&self, pos: Position) -> Result<Option<&Cell>, EngineError> {
        if !pos.is_valid() {
            return Err(EngineError::InvalidPosition(pos));
        }
        Ok(self.cells.get(&pos))
    }

    /// Materializes an Empty placeholder at `pos` if no cell is stored
    /// there yet. Does not grow the printable region. Crate-internal: this
    /// is the resolver dependency-edge rewrite uses to guarantee a back-edge
    /// target always exists, not a public addressing primitive.
    pub(crate) fn ensure_cell(&mut self, pos: Position) -> &mut Cell {
        self.cells.entry(pos).or_insert_with(Cell::empty)
    }

    /// Clears the cell at `pos`. Removes its storage slot if nothing
    /// depends on it, then retracts the printable region.
    pub fn clear_cell(&mut self, pos: Position) -> Result<(), EngineError> {
        if !pos.is_valid() {
            return Err(EngineError::InvalidPosition(pos));
        }
        if !self.cells.contains_key(&pos) {
            return Ok(());
        }

        let already_empty = self.cells.get(&pos).expect("checked above").is_empty();
        if !already_empty {
            self.replace_kind(pos, CellKind::Empty);
        }

        let no_dependents = self
            .cells
            .get(&pos)
            .map(|c| c.dependents.is_empty())
            .unwrap_or(true);
        if no_dependents {
            self.cells.remove(&pos);
        }

        self.retract_print_size();
        log::debug!("clear_cell at {:?}", pos);
        Ok(())
    }

    pub fn get_printable_size(&self) -> Size {
        self.print_size
    }

    /// Writes each cell's computed value, tab-separated, one row per line.
    pub fn print_values<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for row in 0..self.print_size.rows {
            for col in 0..self.print_size.cols {
                if col > 0 {
                    write!(out, "\t")?;
                }
                if let Some(cell) = self.cells.get(&Position::new(row, col)) {
                    write!(out, "{}", display_value(&cell.value(self)))?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Writes each cell's raw text, tab-separated, one row per line.
    pub fn print_texts<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for row in 0..self.print_size.rows {
            for col in 0..self.print_size.cols {
                if col > 0 {
                    write!(out, "\t")?;
                }
                if let Some(cell) = self.cells.get(&Position::new(row, col)) {
                    write!(out, "{}", cell.text())?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// DFS from `candidates` over the existing dependency graph, looking for
    /// a path back to `target`. Identity is checked before resolution so a
    /// self-reference is caught even while `target` itself is still Empty
    /// mid-edit; resolution skips unresolved/empty cells before the visited
    /// check gates further recursion. Read-only: never mutates the graph.
    fn would_create_cycle(
        &self,
        target: Position,
        candidates: &std::collections::HashSet<Position>,
    ) -> bool {
        let mut stack: Vec<Position> = candidates.iter().copied().collect();
        let mut visited = std::collections::HashSet::new();

        while let Some(p) = stack.pop() {
            if p == target {
                return true;
            }
            let cell = match self.cells.get(&p) {
                Some(c) => c,
                None => continue,
            };
            if cell.is_empty() {
                continue;
            }
            if !visited.insert(p) {
                continue;
            }
            stack.extend(cell.depends_on.iter().copied());
        }

        false
    }

    /// Clears the cache of `pos` and every transitive dependent. Stops as
    /// soon as a cell with no cache is reached — the cache-consistency
    /// invariant guarantees its dependents are already uncached too.
    fn invalidate_cache(&self, pos: Position) {
        let cell = match self.cells.get(&pos) {
            Some(c) => c,
            None => return,
        };
        let had_cache = cell.cache.borrow_mut().take().is_some();
        if !had_cache {
            return;
        }
        for dep in cell.dependents.iter().copied() {
            self.invalidate_cache(dep);
        }
    }

    /// Swaps in `new_kind`, invalidates the affected cache span, and
    /// rewrites dependency edges against the previous `depends_on` set.
    /// Infallible — the caller has already done all fallible work
    /// (parsing, cycle detection) before calling this.
    fn replace_kind(&mut self, pos: Position, new_kind: CellKind) {
        let new_deps: std::collections::HashSet<Position> =
            new_kind.referenced_cells().into_iter().collect();

        let old_deps = match self.cells.get_mut(&pos) {
            Some(cell) => {
                let old = std::mem::take(&mut cell.depends_on);
                cell.kind = new_kind;
                old
            }
            None => std::collections::HashSet::new(),
        };

        self.invalidate_cache(pos);

        for d in old_deps.difference(&new_deps) {
            if let Some(c) = self.cells.get_mut(d) {
                c.dependents.remove(&pos);
            }
        }
        for d in new_deps.difference(&old_deps) {
            self.ensure_cell(*d).dependents.insert(pos);
        }

        if let Some(cell) = self.cells.get_mut(&pos) {
            cell.depends_on = new_deps;
        }
    }

    fn retract_print_size(&mut self) {
        while self.print_size.rows > 0 {
            let last_row = self.print_size.rows - 1;
            let has_live =
                (0..self.print_size.cols).any(|c| self.cells.contains_key(&Position::new(last_row, c)));
            if has_live {
                break;
            }
            self.print_size.rows -= 1;
        }
        while self.print_size.cols > 0 {
            let last_col = self.print_size.cols - 1;
            let has_live =
                (0..self.print_size.rows).any(|r| self.cells.contains_key(&Position::new(r, last_col)));
            if has_live {
                break;
            }
            self.print_size.cols -= 1;
        }
    }
}

impl parser::SheetView for Sheet {
    fn cell_value(&self, pos: Position) -> CellValue {
        self.cells
            .get(&pos)
            .map(|c| c.value(self))
            .unwrap_or(CellValue::Text(String::new()))
    }
}

fn display_value(v: &CellValue) -> String {
    match v {
        CellValue::Text(s) => s.clone(),
        CellValue::Number(n) => parser::format_number(*n),
        CellValue::Error(e) => e.to_string(),
    }
}

/// Creates a fresh, empty sheet.
pub fn create_sheet() -> Sheet {
    Sheet::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(row: i32, col: i32) -> Position {
        Position::new(row, col)
    }

    #[test]
    fn basic_formula() {
        let mut sheet = create_sheet();
        sheet.set_cell(pos(0, 0), "=1+2").unwrap();
        let value = sheet.get_cell(pos(0, 0)).unwrap().unwrap().value(&sheet);
        assert_eq!(value, CellValue::Number(3.0));
        assert_eq!(sheet.get_printable_size(), Size::new(1, 1));
    }

    #[test]
    fn dependency_and_invalidation() {
        let mut sheet = create_sheet();
        sheet.set_cell(pos(0, 0), "1").unwrap(); // A1
        sheet.set_cell(pos(1, 0), "=A1+1").unwrap(); // A2
        assert_eq!(
            sheet.get_cell(pos(1, 0)).unwrap().unwrap().value(&sheet),
            CellValue::Number(2.0)
        );

        sheet.set_cell(pos(0, 0), "10").unwrap();
        assert_eq!(
            sheet.get_cell(pos(1, 0)).unwrap().unwrap().value(&sheet),
            CellValue::Number(11.0)
        );
    }

    #[test]
    fn cycle_rejection_leaves_state_untouched() {
        let mut sheet = create_sheet();
        sheet.set_cell(pos(0, 0), "=B1").unwrap(); // A1 = B1
        sheet.set_cell(pos(1, 0), "=C1").unwrap(); // B1 = C1

        let err = sheet.set_cell(pos(2, 0), "=A1").unwrap_err(); // C1 = A1
        assert_eq!(err, EngineError::CircularDependency(pos(2, 0)));

        // C1 was never committed; it reads as an empty placeholder.
        assert!(sheet
            .get_cell(pos(2, 0))
            .unwrap()
            .map(|c| c.is_empty())
            .unwrap_or(true));
    }

    #[test]
    fn placeholder_retention_and_cleanup() {
        let mut sheet = create_sheet();
        sheet.set_cell(pos(0, 0), "=B5").unwrap();
        assert!(sheet.get_cell(pos(4, 1)).unwrap().is_some());

        sheet.clear_cell(pos(0, 0)).unwrap();
        assert!(sheet.get_cell(pos(0, 0)).unwrap().is_none());

        sheet.clear_cell(pos(4, 1)).unwrap();
        assert!(sheet.get_cell(pos(4, 1)).unwrap().is_none());
        assert_eq!(sheet.get_printable_size(), Size::new(0, 0));
    }

    #[test]
    fn printable_region_retracts() {
        let mut sheet = create_sheet();
        sheet.set_cell(pos(0, 0), "1").unwrap();
        sheet.set_cell(pos(0, 2), "1").unwrap();
        sheet.set_cell(pos(2, 0), "1").unwrap();
        assert_eq!(sheet.get_printable_size(), Size::new(3, 3));

        sheet.clear_cell(pos(2, 0)).unwrap();
        assert_eq!(sheet.get_printable_size(), Size::new(1, 3));

        sheet.clear_cell(pos(0, 2)).unwrap();
        assert_eq!(sheet.get_printable_size(), Size::new(1, 1));
    }

    #[test]
    fn escaped_text_hides_sigil_from_value_only() {
        let mut sheet = create_sheet();
        sheet.set_cell(pos(0, 0), "'=1+2").unwrap();
        let cell = sheet.get_cell(pos(0, 0)).unwrap().unwrap();
        assert_eq!(cell.text(), "'=1+2");
        assert_eq!(cell.value(&sheet), CellValue::Text("=1+2".to_string()));
        assert_eq!(sheet.get_printable_size(), Size::new(1, 1));
    }

    #[test]
    fn setting_identical_text_is_a_no_op() {
        let mut sheet = create_sheet();
        sheet.set_cell(pos(0, 0), "=1+2").unwrap();
        sheet.get_cell(pos(0, 0)).unwrap().unwrap().value(&sheet);
        sheet.set_cell(pos(0, 0), "=1+2").unwrap();
        let cell = sheet.get_cell(pos(0, 0)).unwrap().unwrap();
        assert_eq!(cell.value(&sheet), CellValue::Number(3.0));
    }

    #[test]
    fn invalid_position_is_rejected() {
        let mut sheet = create_sheet();
        let bad = pos(-1, 0);
        assert_eq!(
            sheet.set_cell(bad, "1").unwrap_err(),
            EngineError::InvalidPosition(bad)
        );
        assert_eq!(sheet.get_cell(bad).unwrap_err(), EngineError::InvalidPosition(bad));
        assert_eq!(sheet.clear_cell(bad).unwrap_err(), EngineError::InvalidPosition(bad));
    }

    #[test]
    fn print_values_and_texts_are_tab_separated() {
        let mut sheet = create_sheet();
        sheet.set_cell(pos(0, 0), "1").unwrap();
        sheet.set_cell(pos(0, 1), "=A1+1").unwrap();

        let mut values = Vec::new();
        sheet.print_values(&mut values).unwrap();
        assert_eq!(String::from_utf8(values).unwrap(), "1\t2\n");

        let mut texts = Vec::new();
        sheet.print_texts(&mut texts).unwrap();
        assert_eq!(String::from_utf8(texts).unwrap(), "1\t=A1+1\n");
    }

    #[test]
    fn division_by_zero_surfaces_as_error_value() {
        let mut sheet = create_sheet();
        sheet.set_cell(pos(0, 0), "=1/0").unwrap();
        let cell = sheet.get_cell(pos(0, 0)).unwrap().unwrap();
        assert_eq!(
            cell.value(&sheet),
            CellValue::Error(parser::FormulaError::Div0)
        );

        let mut values = Vec::new();
        sheet.print_values(&mut values).unwrap();
        assert_eq!(String::from_utf8(values).unwrap(), "#DIV/0!\n");
    }
}
