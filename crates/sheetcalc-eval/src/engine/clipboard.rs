//! Copy, cut and paste.
//!
//! A copy snapshots content, values and formats at copy time. A cut only
//! remembers its zones: the cells are read when pasted, and any structural
//! edit touching them drops the cut.

use super::EngineError;
use super::eval::Engine;
use super::reference_adjuster::{ReferenceAdjuster, ShiftOperation};
use super::sheet::{CellContent, FormulaCell};
use crate::traits::Resolver;
use rustc_hash::FxHashSet;
use sheetcalc_common::{LiteralValue, Position, SheetId, Zone};
use sheetcalc_parse::render_formula;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasteMode {
    #[default]
    All,
    OnlyValue,
    OnlyFormat,
}

/// One copied position, relative to the clipboard origin.
#[derive(Debug, Clone)]
pub struct ClippedCell {
    pub row: u32,
    pub col: u32,
    pub content: CellContent,
    /// Format set by the user.
    pub format: Option<String>,
    /// Visible value at copy time.
    pub value: LiteralValue,
    /// Visible format at copy time, computed formats included.
    pub effective_format: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClipboardContent {
    pub sheet: SheetId,
    /// Top-left of the bounding zone.
    pub origin: Position,
    pub rows: u32,
    pub cols: u32,
    pub cells: Vec<ClippedCell>,
}

#[derive(Debug, Clone)]
pub(crate) enum Clipboard {
    Copy(ClipboardContent),
    Cut { zones: Vec<Zone> },
}

impl Clipboard {
    pub(crate) fn sheet(&self) -> SheetId {
        match self {
            Clipboard::Copy(content) => content.sheet,
            Clipboard::Cut { zones } => zones.first().map_or(0, |z| z.sheet),
        }
    }

    /// A cut dies when rows or columns are inserted or deleted at or before
    /// its far edge. Copies are snapshots and survive.
    pub(crate) fn invalidated_by(&self, op: &ShiftOperation) -> bool {
        let Clipboard::Cut { zones } = self else {
            return false;
        };
        zones.iter().any(|z| {
            z.sheet == op.sheet()
                && match *op {
                    ShiftOperation::InsertRows { before: index, .. }
                    | ShiftOperation::DeleteRows { start: index, .. } => index <= z.bottom,
                    ShiftOperation::InsertColumns { before: index, .. }
                    | ShiftOperation::DeleteColumns { start: index, .. } => index <= z.right,
                }
        })
    }
}

fn bounding(zones: &[Zone]) -> Option<Zone> {
    let first = zones.first()?;
    Some(zones.iter().skip(1).fold(*first, |acc, z| {
        Zone::new(
            acc.sheet,
            acc.top.min(z.top),
            acc.left.min(z.left),
            acc.bottom.max(z.bottom),
            acc.right.max(z.right),
        )
    }))
}

impl Engine {
    /// Snapshot `zones`, which must all lie on one sheet.
    pub fn copy_cells(&self, zones: &[Zone]) -> Result<ClipboardContent, EngineError> {
        let Some(bounds) = bounding(zones) else {
            return Err(EngineError::OutOfBounds("nothing to copy".to_string()));
        };
        for zone in zones {
            self.check_zone(zone)?;
            if zone.sheet != bounds.sheet {
                return Err(EngineError::OutOfBounds(
                    "copied zones must be on one sheet".to_string(),
                ));
            }
        }

        let mut seen = FxHashSet::default();
        let mut cells = Vec::new();
        for zone in zones {
            for pos in zone.positions() {
                if !seen.insert(pos) {
                    continue;
                }
                let cell = self.cell(pos);
                cells.push(ClippedCell {
                    row: pos.row - bounds.top,
                    col: pos.col - bounds.left,
                    content: cell.map(|c| c.content.clone()).unwrap_or_default(),
                    format: cell.and_then(|c| c.format.clone()),
                    value: self.cell_value(pos),
                    effective_format: self.cell_format(pos),
                });
            }
        }
        Ok(ClipboardContent {
            sheet: bounds.sheet,
            origin: bounds.top_left(),
            rows: bounds.rows(),
            cols: bounds.cols(),
            cells,
        })
    }

    /// Paste a snapshot. A single copied cell fills every target position;
    /// anything larger is pasted once at each target's top-left. Sheets grow
    /// to fit.
    pub fn paste_cells(
        &mut self,
        content: &ClipboardContent,
        targets: &[Zone],
        mode: PasteMode,
    ) -> Result<(), EngineError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("paste", ?mode, targets = targets.len()).entered();

        for target in targets {
            self.sheet(target.sheet)?;
        }
        let fill = content.rows == 1 && content.cols == 1;
        for target in targets {
            let anchors: Vec<Position> = if fill {
                target.positions().collect()
            } else {
                vec![target.top_left()]
            };
            for at in anchors {
                for clipped in &content.cells {
                    let src = Position::new(
                        content.sheet,
                        content.origin.row + clipped.row,
                        content.origin.col + clipped.col,
                    );
                    let dest = Position::new(at.sheet, at.row + clipped.row, at.col + clipped.col);
                    self.ensure_size(dest)?;
                    self.paste_one(clipped, src, dest, mode);
                }
            }
        }
        self.flush();
        Ok(())
    }

    fn paste_one(&mut self, clipped: &ClippedCell, src: Position, dest: Position, mode: PasteMode) {
        match mode {
            PasteMode::All => {
                let content = match &clipped.content {
                    CellContent::Formula(f) => {
                        CellContent::Formula(Box::new(self.offset_formula(f, src, dest)))
                    }
                    other => other.clone(),
                };
                self.replace_content(dest, content);
                self.set_user_format(dest, clipped.format.clone());
            }
            PasteMode::OnlyValue => {
                let content = match &clipped.value {
                    LiteralValue::Empty => CellContent::Empty,
                    v => CellContent::Value {
                        raw: v.to_string(),
                        value: v.clone(),
                    },
                };
                self.replace_content(dest, content);
            }
            PasteMode::OnlyFormat => self.set_user_format(dest, clipped.effective_format.clone()),
        }
    }

    /// The formula as it reads after being copied from `src` to `dest`.
    fn offset_formula(&self, f: &FormulaCell, src: Position, dest: Position) -> FormulaCell {
        let mut ast = f.ast.clone();
        let mut text = f.text.clone();
        if let Ok(tree) = &mut ast {
            let registry = &self.registry;
            let sheets = &self.sheets;
            let home = dest.sheet;
            let sheet_of = |q: Option<&str>| registry.resolve(q, home);
            let dims = |id: Option<SheetId>| {
                id.and_then(|i| sheets.get(i as usize))
                    .and_then(Option::as_ref)
                    .map(|s| (s.rows, s.cols))
            };
            let drow = dest.row as i64 - src.row as i64;
            let dcol = dest.col as i64 - src.col as i64;
            if ReferenceAdjuster::new(&sheet_of).offset_ast(tree, drow, dcol, dims) {
                text = render_formula(tree);
            }
        }
        FormulaCell {
            text,
            ast,
            seq: 0,
            value: LiteralValue::Empty,
            computed_format: None,
        }
    }

    pub fn copy(&mut self, zones: &[Zone]) -> Result<(), EngineError> {
        let content = self.copy_cells(zones)?;
        self.clipboard = Some(Clipboard::Copy(content));
        Ok(())
    }

    pub fn cut(&mut self, zones: &[Zone]) -> Result<(), EngineError> {
        // validates the zones
        self.copy_cells(zones)?;
        self.clipboard = Some(Clipboard::Cut {
            zones: zones.to_vec(),
        });
        Ok(())
    }

    /// Paste the clipboard. A cut can only be pasted whole, once.
    pub fn paste(&mut self, targets: &[Zone], mode: PasteMode) -> Result<(), EngineError> {
        match self.clipboard.clone() {
            None => Err(EngineError::EmptyClipboard),
            Some(Clipboard::Copy(content)) => self.paste_cells(&content, targets, mode),
            Some(Clipboard::Cut { zones }) => {
                if mode != PasteMode::All {
                    return Err(EngineError::WrongPasteOption);
                }
                self.paste_cut(&zones, targets)
            }
        }
    }

    fn paste_cut(&mut self, zones: &[Zone], targets: &[Zone]) -> Result<(), EngineError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("paste", mode = "cut", targets = targets.len()).entered();

        let target = targets
            .first()
            .ok_or_else(|| EngineError::OutOfBounds("no paste target".to_string()))?;
        self.sheet(target.sheet)?;
        let content = self.copy_cells(zones)?;
        let from = Zone::from_anchor(content.origin, content.rows, content.cols);
        let to = target.top_left();
        let to_name = self.sheet_name(to.sheet).unwrap_or_default().to_string();
        let drow = to.row as i64 - from.top as i64;
        let dcol = to.col as i64 - from.left as i64;

        for clipped in &content.cells {
            let src = Position::new(from.sheet, from.top + clipped.row, from.left + clipped.col);
            if self.cell(src).is_some() {
                self.replace_content(src, CellContent::Empty);
                self.set_user_format(src, None);
            }
        }

        // references into the moved block follow it
        let mut rewritten = Vec::new();
        {
            let registry = &self.registry;
            for sheet in self.sheets.iter_mut().flatten() {
                let home = sheet.id;
                let sheet_of = |q: Option<&str>| registry.resolve(q, home);
                let adjuster = ReferenceAdjuster::new(&sheet_of);
                for (&(row, col), cell) in sheet.cells.iter_mut() {
                    let Some(f) = cell.formula_mut() else { continue };
                    if let Ok(ast) = &mut f.ast {
                        if adjuster.move_ast(ast, from, drow, dcol, (to.sheet, &to_name), home) {
                            f.text = render_formula(ast);
                            rewritten.push(Position::new(home, row, col));
                        }
                    }
                }
            }
        }

        for clipped in &content.cells {
            let dest = Position::new(to.sheet, to.row + clipped.row, to.col + clipped.col);
            self.ensure_size(dest)?;
            let moved = match &clipped.content {
                CellContent::Formula(f) => {
                    let mut f = FormulaCell {
                        value: LiteralValue::Empty,
                        computed_format: None,
                        ..(**f).clone()
                    };
                    if let Ok(ast) = &mut f.ast {
                        let registry = &self.registry;
                        let sheet_of = |q: Option<&str>| registry.resolve(q, from.sheet);
                        let adjuster = ReferenceAdjuster::new(&sheet_of);
                        let target = (to.sheet, to_name.as_str());
                        if adjuster.move_ast(ast, from, drow, dcol, target, to.sheet) {
                            f.text = render_formula(ast);
                        }
                    }
                    CellContent::Formula(Box::new(f))
                }
                other => other.clone(),
            };
            self.replace_content(dest, moved);
            self.set_user_format(dest, clipped.format.clone());
        }

        self.rebuild_graph();
        self.dirty.extend(rewritten);
        self.clipboard = None;
        self.flush();
        Ok(())
    }
}
