use super::clipboard::Clipboard;
use super::graph::DependencyGraph;
use super::reference_adjuster::{ReferenceAdjuster, ShiftOperation};
use super::scheduler::Scheduler;
use super::sheet::{Cell, CellContent, FormulaCell, Sheet, SheetRegistry, parse_literal};
use super::spill::{Collision, SpillManager};
use super::{EngineError, EvalConfig};
use crate::function::{ComputedFormat, Function};
use crate::function_registry::{self, FunctionTable};
use crate::interpreter::Interpreter;
use crate::traits::{FunctionProvider, Resolver};
use rustc_hash::FxHashSet;
use sheetcalc_common::{
    ExcelError, ExcelErrorExtra, ExcelErrorKind, LiteralValue, Position, SheetId, Zone,
    format_value,
};
use sheetcalc_parse::parser::{ASTNode, ASTNodeType, ReferenceType, parse};
use sheetcalc_parse::render_formula;
use std::sync::Arc;

/// Value and effective format of a cell after the last flush.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedCell {
    pub value: LiteralValue,
    pub format: Option<String>,
}

/// A formula result after shape and format checks.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Scalar(LiteralValue, Option<String>),
    Matrix(Vec<Vec<LiteralValue>>, Vec<Vec<Option<String>>>),
}

pub struct Engine {
    config: EvalConfig,
    pub(crate) registry: SheetRegistry,
    /// Indexed by `SheetId`; deleted sheets leave a `None`.
    pub(crate) sheets: Vec<Option<Sheet>>,
    default_sheet: SheetId,
    pub(crate) graph: DependencyGraph,
    pub(crate) spill: SpillManager,
    /// Formulas that must be evaluated.
    pub(crate) dirty: FxHashSet<Position>,
    /// Positions whose visible value or format changed; their readers must be
    /// evaluated.
    pub(crate) changed: FxHashSet<Position>,
    functions: FunctionTable,
    pub(crate) clipboard: Option<Clipboard>,
    next_seq: u64,
}

/// Resolve a reference against the sheet registry. Unqualified references
/// point at `home`. Unknown sheets and positions outside the sheet are `#REF`.
pub(crate) fn resolve_reference(
    registry: &SheetRegistry,
    sheets: &[Option<Sheet>],
    reference: &ReferenceType,
    home: SheetId,
) -> Result<Zone, ExcelError> {
    let invalid = || ExcelError::new(ExcelErrorKind::Ref).with_message("Invalid reference");
    let id = registry.resolve(reference.sheet(), home).ok_or_else(invalid)?;
    let sheet = sheets
        .get(id as usize)
        .and_then(Option::as_ref)
        .ok_or_else(invalid)?;
    let zone = match reference {
        ReferenceType::Cell { coord, .. } => {
            Zone::single(Position::new(id, coord.row(), coord.col()))
        }
        ReferenceType::Range {
            start_row,
            start_col,
            end_row,
            end_col,
            ..
        } => {
            let last_row = sheet.rows.saturating_sub(1);
            let last_col = sheet.cols.saturating_sub(1);
            Zone::new(
                id,
                start_row.map_or(0, |a| a.index),
                start_col.map_or(0, |a| a.index),
                end_row.map_or(last_row, |a| a.index),
                end_col.map_or(last_col, |a| a.index),
            )
        }
    };
    if zone.bottom >= sheet.rows || zone.right >= sheet.cols {
        return Err(invalid());
    }
    Ok(zone)
}

fn cell_has_content(sheets: &[Option<Sheet>], pos: Position) -> bool {
    sheets
        .get(pos.sheet as usize)
        .and_then(Option::as_ref)
        .and_then(|s| s.cell(pos.row, pos.col))
        .is_some_and(Cell::has_content)
}

/// Content for typed text: empty clears, `=` starts a formula, anything else
/// is a literal.
pub(crate) fn content_from_text(text: &str) -> CellContent {
    if text.is_empty() {
        CellContent::Empty
    } else if text.starts_with('=') {
        CellContent::Formula(Box::new(FormulaCell {
            text: text.to_string(),
            ast: parse(text),
            seq: 0,
            value: LiteralValue::Empty,
            computed_format: None,
        }))
    } else {
        CellContent::Value {
            raw: text.to_string(),
            value: parse_literal(text),
        }
    }
}

fn formula_error(message: &str) -> LiteralValue {
    LiteralValue::Error(ExcelError::new(ExcelErrorKind::Error).with_message(message))
}

fn empty_as_zero(v: LiteralValue) -> LiteralValue {
    match v {
        LiteralValue::Empty => LiteralValue::Number(0.0),
        other => other,
    }
}

/// Pair a raw result with its format, enforcing shape agreement. Results of a
/// top-level function call must agree exactly; other expressions broadcast a
/// scalar format or take the top-left of a format matrix.
pub(crate) fn shape_result(ast: &ASTNode, value: LiteralValue, format: ComputedFormat) -> Outcome {
    let strict = matches!(ast.node_type, ASTNodeType::Function { .. });
    let value = match value {
        LiteralValue::Array(mut rows) if rows.len() == 1 && rows[0].len() == 1 => {
            rows.swap_remove(0).swap_remove(0)
        }
        LiteralValue::Array(rows) if rows.first().is_none_or(Vec::is_empty) => LiteralValue::Empty,
        other => other,
    };
    let format = match format {
        ComputedFormat::Matrix(m) if m.len() == 1 && m[0].len() == 1 => {
            ComputedFormat::Scalar(m[0][0].clone())
        }
        other => other,
    };

    match value {
        LiteralValue::Error(e) => Outcome::Scalar(LiteralValue::Error(e), None),
        LiteralValue::Array(rows) => {
            if matches!(ast.node_type, ASTNodeType::Reference { .. }) {
                return Outcome::Scalar(
                    formula_error("A range cannot be the result of a formula, a single value is expected."),
                    None,
                );
            }
            let (r, c) = (rows.len(), rows[0].len());
            let formats = match format {
                ComputedFormat::Scalar(None) => vec![vec![None; c]; r],
                ComputedFormat::Scalar(Some(_)) if strict => {
                    return Outcome::Scalar(
                        formula_error("A scalar format should never be associated with a matrix value"),
                        None,
                    );
                }
                ComputedFormat::Scalar(Some(f)) => vec![vec![Some(f); c]; r],
                ComputedFormat::Matrix(m)
                    if m.len() == r && m.iter().all(|row| row.len() == c) =>
                {
                    m
                }
                ComputedFormat::Matrix(_) if strict => {
                    return Outcome::Scalar(
                        formula_error("The format matrix does not have the dimensions of the value matrix"),
                        None,
                    );
                }
                ComputedFormat::Matrix(m) => (0..r)
                    .map(|i| {
                        (0..c)
                            .map(|j| m.get(i).and_then(|row| row.get(j)).cloned().flatten())
                            .collect()
                    })
                    .collect(),
            };
            let rows = rows
                .into_iter()
                .map(|row| row.into_iter().map(empty_as_zero).collect())
                .collect();
            Outcome::Matrix(rows, formats)
        }
        scalar => {
            let fmt = match format {
                ComputedFormat::Scalar(f) => f,
                ComputedFormat::Matrix(_) if strict => {
                    return Outcome::Scalar(
                        formula_error("A format matrix should never be associated with a scalar value"),
                        None,
                    );
                }
                ComputedFormat::Matrix(m) => m.first().and_then(|r| r.first()).cloned().flatten(),
            };
            Outcome::Scalar(empty_as_zero(scalar), fmt)
        }
    }
}

fn spill_error(collision: Collision, rows: u32, cols: u32) -> ExcelError {
    const BOUNDS: &str = "Result couldn't be automatically expanded. Please insert more";
    let message = match collision {
        Collision::Bounds {
            rows: true,
            cols: true,
        } => format!("{BOUNDS} columns and rows."),
        Collision::Bounds { cols: true, .. } => format!("{BOUNDS} columns."),
        Collision::Bounds { .. } => format!("{BOUNDS} rows."),
        Collision::Content(at) | Collision::Spill { at, .. } => {
            format!("Array result was not expanded because it would overwrite data in {at}.")
        }
    };
    ExcelError::new(ExcelErrorKind::Spill)
        .with_message(message)
        .with_extra(ExcelErrorExtra::Spill {
            expected_rows: rows,
            expected_cols: cols,
        })
}

/// Contiguous runs of `indices`, highest first, as `(start, count)`.
fn descending_runs(indices: &[u32]) -> Vec<(u32, u32)> {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for i in sorted {
        match runs.last_mut() {
            Some((start, count)) if *start + *count == i => *count += 1,
            _ => runs.push((i, 1)),
        }
    }
    runs.reverse();
    runs
}

impl Engine {
    pub fn new(config: EvalConfig) -> Self {
        function_registry::ensure_builtins_loaded();
        let mut registry = SheetRegistry::new();
        let id = registry.add(&config.default_sheet_name);
        let sheet = Sheet::new(id, config.default_rows, config.default_cols);
        Self {
            config,
            registry,
            sheets: vec![Some(sheet)],
            default_sheet: id,
            graph: DependencyGraph::new(),
            spill: SpillManager::new(),
            dirty: FxHashSet::default(),
            changed: FxHashSet::default(),
            functions: FunctionTable::new(),
            clipboard: None,
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Register a function visible to this engine only. It shadows a global
    /// function of the same name.
    pub fn register_function(&mut self, f: Arc<dyn Function>) {
        self.functions.register(f);
    }

    /* ─────────────────────────── sheets ─────────────────────────── */

    pub fn add_sheet(&mut self, name: &str, rows: u32, cols: u32) -> Result<SheetId, EngineError> {
        if self.registry.get_id(name).is_some() {
            return Err(EngineError::DuplicateSheet(name.to_string()));
        }
        let id = self.registry.add(name);
        if self.sheets.len() <= id as usize {
            self.sheets.resize_with(id as usize + 1, || None);
        }
        self.sheets[id as usize] = Some(Sheet::new(id, rows, cols));

        // references typed before the sheet existed resolve now
        self.rebuild_graph();
        for pos in self.formula_positions() {
            if self.mentions_sheet(pos, id) {
                self.dirty.insert(pos);
            }
        }
        self.flush();
        Ok(id)
    }

    pub fn sheet_id(&self, name: &str) -> Option<SheetId> {
        self.registry.get_id(name)
    }

    pub fn sheet_name(&self, id: SheetId) -> Option<&str> {
        self.registry.name(id)
    }

    pub fn default_sheet(&self) -> SheetId {
        self.default_sheet
    }

    /// `(rows, cols)` of a sheet.
    pub fn sheet_dimensions(&self, id: SheetId) -> Option<(u32, u32)> {
        self.sheet(id).ok().map(|s| (s.rows, s.cols))
    }

    /// Remove a sheet. References to it elsewhere become `#REF`.
    pub fn delete_sheet(&mut self, name: &str) -> Result<(), EngineError> {
        let id = self
            .registry
            .get_id(name)
            .ok_or_else(|| EngineError::UnknownSheet(name.to_string()))?;
        if self.registry.ids().count() <= 1 {
            return Err(EngineError::LastSheet);
        }
        let real_name = self.registry.name(id).unwrap_or(name).to_string();

        self.sheets[id as usize] = None;
        self.registry.remove(id);
        self.spill.clear_sheet(id);
        self.dirty.retain(|p| p.sheet != id);
        self.changed.retain(|p| p.sheet != id);
        if self.clipboard.as_ref().is_some_and(|c| c.sheet() == id) {
            self.clipboard = None;
        }
        if self.default_sheet == id {
            if let Some(first) = self.registry.ids().next() {
                self.default_sheet = first;
            }
        }

        let registry = &self.registry;
        let mut rewritten = Vec::new();
        for sheet in self.sheets.iter_mut().flatten() {
            let home = sheet.id;
            let sheet_of = |q: Option<&str>| registry.resolve(q, home);
            let adjuster = ReferenceAdjuster::new(&sheet_of);
            for (&(row, col), cell) in sheet.cells.iter_mut() {
                let Some(f) = cell.formula_mut() else { continue };
                if let Ok(ast) = &mut f.ast {
                    if adjuster.invalidate_sheet(ast, &real_name) {
                        f.text = render_formula(ast);
                        rewritten.push(Position::new(home, row, col));
                    }
                }
            }
        }
        self.rebuild_graph();
        self.dirty.extend(rewritten);
        self.flush();
        Ok(())
    }

    pub(crate) fn sheet(&self, id: SheetId) -> Result<&Sheet, EngineError> {
        self.sheets
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| EngineError::UnknownSheet(format!("#{id}")))
    }

    pub(crate) fn sheet_mut(&mut self, id: SheetId) -> Result<&mut Sheet, EngineError> {
        self.sheets
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| EngineError::UnknownSheet(format!("#{id}")))
    }

    pub(crate) fn check_zone(&self, zone: &Zone) -> Result<(), EngineError> {
        let sheet = self.sheet(zone.sheet)?;
        if zone.bottom >= sheet.rows || zone.right >= sheet.cols {
            return Err(EngineError::OutOfBounds(zone.to_string()));
        }
        Ok(())
    }

    /// Grow the sheet so that `pos` fits. Formulas on a grown sheet are
    /// re-evaluated since blocked spills may fit now.
    pub(crate) fn ensure_size(&mut self, pos: Position) -> Result<(), EngineError> {
        let sheet = self.sheet_mut(pos.sheet)?;
        if sheet.in_bounds(pos.row, pos.col) {
            return Ok(());
        }
        sheet.rows = sheet.rows.max(pos.row + 1);
        sheet.cols = sheet.cols.max(pos.col + 1);
        let on_sheet: Vec<Position> = self
            .formula_positions()
            .into_iter()
            .filter(|p| p.sheet == pos.sheet)
            .collect();
        self.dirty.extend(on_sheet);
        Ok(())
    }

    /* ─────────────────────────── cells ──────────────────────────── */

    pub(crate) fn cell(&self, pos: Position) -> Option<&Cell> {
        self.sheets
            .get(pos.sheet as usize)?
            .as_ref()?
            .cell(pos.row, pos.col)
    }

    fn formula(&self, pos: Position) -> Option<&FormulaCell> {
        self.cell(pos)?.formula()
    }

    fn formula_mut(&mut self, pos: Position) -> Option<&mut FormulaCell> {
        self.sheets
            .get_mut(pos.sheet as usize)?
            .as_mut()?
            .cells
            .get_mut(&(pos.row, pos.col))?
            .formula_mut()
    }

    fn is_formula(&self, pos: Position) -> bool {
        self.formula(pos).is_some()
    }

    fn seq_of(&self, pos: Position) -> u64 {
        self.formula(pos).map_or(u64::MAX, |f| f.seq)
    }

    pub(crate) fn formula_positions(&self) -> Vec<Position> {
        let mut out: Vec<Position> = self
            .sheets
            .iter()
            .flatten()
            .flat_map(|s| {
                s.cells
                    .iter()
                    .filter(|(_, c)| c.formula().is_some())
                    .map(move |(&(r, c), _)| Position::new(s.id, r, c))
            })
            .collect();
        out.sort_unstable();
        out
    }

    /// True when the formula at `pos` names `sheet` in any reference, valid
    /// or not.
    fn mentions_sheet(&self, pos: Position, sheet: SheetId) -> bool {
        match self.formula(pos).map(|f| &f.ast) {
            Some(Ok(ast)) => ast
                .get_dependencies()
                .iter()
                .any(|r| self.registry.resolve(r.sheet(), pos.sheet) == Some(sheet)),
            _ => false,
        }
    }

    pub fn set_cell_content(
        &mut self,
        sheet: SheetId,
        row: u32,
        col: u32,
        text: &str,
    ) -> Result<(), EngineError> {
        let s = self.sheet(sheet)?;
        let pos = Position::new(sheet, row, col);
        if !s.in_bounds(row, col) {
            return Err(EngineError::OutOfBounds(pos.to_string()));
        }
        self.replace_content(pos, content_from_text(text));
        self.flush();
        Ok(())
    }

    /// Clear the content of every position in `zones`. Formats stay.
    pub fn delete_content(&mut self, zones: &[Zone]) -> Result<(), EngineError> {
        for zone in zones {
            self.check_zone(zone)?;
        }
        for zone in zones {
            for pos in zone.positions() {
                if self.cell(pos).is_some_and(Cell::has_content) {
                    self.replace_content(pos, CellContent::Empty);
                }
            }
        }
        self.flush();
        Ok(())
    }

    pub fn set_format(&mut self, zones: &[Zone], format: Option<&str>) -> Result<(), EngineError> {
        for zone in zones {
            self.check_zone(zone)?;
        }
        for zone in zones {
            for pos in zone.positions() {
                self.set_user_format(pos, format.map(str::to_string));
            }
        }
        self.flush();
        Ok(())
    }

    pub(crate) fn set_user_format(&mut self, pos: Position, format: Option<String>) {
        let Ok(sheet) = self.sheet_mut(pos.sheet) else {
            return;
        };
        if sheet.cell(pos.row, pos.col).map(|c| &c.format) == Some(&format)
            || (format.is_none() && sheet.cell(pos.row, pos.col).is_none())
        {
            return;
        }
        sheet.cell_mut(pos.row, pos.col).format = format;
        sheet.prune(pos.row, pos.col);
        self.changed.insert(pos);
    }

    /// Install new content at `pos` and record what must be recomputed. Does
    /// not flush.
    pub(crate) fn replace_content(&mut self, pos: Position, mut content: CellContent) {
        if let Some(zone) = self.spill.release(pos) {
            self.release_zone(pos, zone);
        }
        self.graph.remove_dependencies(pos);
        self.dirty.remove(&pos);

        let is_formula = matches!(content, CellContent::Formula(_));
        if let CellContent::Formula(f) = &mut content {
            f.seq = self.next_seq;
            self.next_seq += 1;
        }
        let Ok(sheet) = self.sheet_mut(pos.sheet) else {
            return;
        };
        sheet.cell_mut(pos.row, pos.col).content = content;
        sheet.prune(pos.row, pos.col);

        if is_formula {
            self.record_formula_deps(pos);
            self.dirty.insert(pos);
        }
        self.changed.insert(pos);
        if let Some(owner) = self.spill.owner_of(pos) {
            if owner != pos {
                self.dirty.insert(owner);
            }
        }
        for anchor in self.spill.blocked_anchors_touching(pos) {
            if anchor != pos {
                self.dirty.insert(anchor);
            }
        }
    }

    /// Bookkeeping after `anchor` gave up `zone` outside of a recompute round.
    fn release_zone(&mut self, anchor: Position, zone: Zone) {
        for q in zone.positions() {
            if q == anchor {
                continue;
            }
            self.changed.insert(q);
            for blocked in self.spill.blocked_anchors_touching(q) {
                if blocked != anchor {
                    self.dirty.insert(blocked);
                }
            }
        }
    }

    fn record_formula_deps(&mut self, pos: Position) {
        let registry = &self.registry;
        let sheets = &self.sheets;
        let Some(Ok(ast)) = sheets
            .get(pos.sheet as usize)
            .and_then(Option::as_ref)
            .and_then(|s| s.cell(pos.row, pos.col))
            .and_then(Cell::formula)
            .map(|f| &f.ast)
        else {
            return;
        };
        self.graph.record_dependencies(pos, ast, |r| {
            resolve_reference(registry, sheets, r, pos.sheet).ok()
        });
    }

    pub(crate) fn rebuild_graph(&mut self) {
        self.graph.clear();
        let registry = &self.registry;
        let sheets = &self.sheets;
        for sheet in sheets.iter().flatten() {
            for (&(row, col), cell) in &sheet.cells {
                if let Some(FormulaCell { ast: Ok(ast), .. }) = cell.formula() {
                    let home = sheet.id;
                    self.graph
                        .record_dependencies(Position::new(home, row, col), ast, |r| {
                            resolve_reference(registry, sheets, r, home).ok()
                        });
                }
            }
        }
    }

    /* ─────────────────────── structural edits ─────────────────────── */

    /// Insert `count` rows before row `index`.
    pub fn insert_rows(
        &mut self,
        sheet: SheetId,
        index: u32,
        count: u32,
    ) -> Result<(), EngineError> {
        let rows = self.sheet(sheet)?.rows;
        if index > rows {
            return Err(EngineError::OutOfBounds(format!("row {}", u64::from(index) + 1)));
        }
        if rows.checked_add(count).is_none() {
            return Err(EngineError::OutOfBounds(format!("{count} more rows")));
        }
        if count > 0 {
            self.structural_edit(
                sheet,
                &[ShiftOperation::InsertRows {
                    sheet,
                    before: index,
                    count,
                }],
            );
        }
        Ok(())
    }

    /// Insert `count` columns before column `index`.
    pub fn insert_columns(
        &mut self,
        sheet: SheetId,
        index: u32,
        count: u32,
    ) -> Result<(), EngineError> {
        let cols = self.sheet(sheet)?.cols;
        if index > cols {
            return Err(EngineError::OutOfBounds(format!("column {}", u64::from(index) + 1)));
        }
        if cols.checked_add(count).is_none() {
            return Err(EngineError::OutOfBounds(format!("{count} more columns")));
        }
        if count > 0 {
            self.structural_edit(
                sheet,
                &[ShiftOperation::InsertColumns {
                    sheet,
                    before: index,
                    count,
                }],
            );
        }
        Ok(())
    }

    pub fn delete_rows(&mut self, sheet: SheetId, indices: &[u32]) -> Result<(), EngineError> {
        let rows = self.sheet(sheet)?.rows;
        let runs = descending_runs(indices);
        if let Some(bad) = indices.iter().find(|&&i| i >= rows) {
            return Err(EngineError::OutOfBounds(format!("row {}", u64::from(*bad) + 1)));
        }
        if runs.iter().map(|(_, n)| n).sum::<u32>() >= rows {
            return Err(EngineError::OutOfBounds("cannot delete every row".to_string()));
        }
        let ops: Vec<ShiftOperation> = runs
            .into_iter()
            .map(|(start, count)| ShiftOperation::DeleteRows { sheet, start, count })
            .collect();
        if !ops.is_empty() {
            self.structural_edit(sheet, &ops);
        }
        Ok(())
    }

    pub fn delete_columns(&mut self, sheet: SheetId, indices: &[u32]) -> Result<(), EngineError> {
        let cols = self.sheet(sheet)?.cols;
        let runs = descending_runs(indices);
        if let Some(bad) = indices.iter().find(|&&i| i >= cols) {
            return Err(EngineError::OutOfBounds(format!("column {}", u64::from(*bad) + 1)));
        }
        if runs.iter().map(|(_, n)| n).sum::<u32>() >= cols {
            return Err(EngineError::OutOfBounds("cannot delete every column".to_string()));
        }
        let ops: Vec<ShiftOperation> = runs
            .into_iter()
            .map(|(start, count)| ShiftOperation::DeleteColumns { sheet, start, count })
            .collect();
        if !ops.is_empty() {
            self.structural_edit(sheet, &ops);
        }
        Ok(())
    }

    fn structural_edit(&mut self, sheet_id: SheetId, ops: &[ShiftOperation]) {
        #[cfg(feature = "tracing")]
        let _span =
            tracing::info_span!("structural_edit", sheet = sheet_id, ops = ops.len()).entered();

        if self
            .clipboard
            .as_ref()
            .is_some_and(|c| ops.iter().any(|op| c.invalidated_by(op)))
        {
            self.clipboard = None;
        }
        self.spill.clear_sheet(sheet_id);
        self.dirty.retain(|p| p.sheet != sheet_id);
        self.changed.retain(|p| p.sheet != sheet_id);

        let mut rewritten: Vec<Position> = Vec::new();
        for op in ops {
            if let Some(sheet) = self.sheets.get_mut(sheet_id as usize).and_then(Option::as_mut) {
                if op.is_rows() {
                    sheet.remap(|r, c| op.map_index(r).map(|r| (r, c)));
                } else {
                    sheet.remap(|r, c| op.map_index(c).map(|c| (r, c)));
                }
                match *op {
                    ShiftOperation::InsertRows { count, .. } => sheet.rows += count,
                    ShiftOperation::DeleteRows { count, .. } => sheet.rows -= count,
                    ShiftOperation::InsertColumns { count, .. } => sheet.cols += count,
                    ShiftOperation::DeleteColumns { count, .. } => sheet.cols -= count,
                }
            }

            let registry = &self.registry;
            for sheet in self.sheets.iter_mut().flatten() {
                let home = sheet.id;
                let sheet_of = |q: Option<&str>| registry.resolve(q, home);
                let adjuster = ReferenceAdjuster::new(&sheet_of);
                for (&(row, col), cell) in sheet.cells.iter_mut() {
                    let Some(f) = cell.formula_mut() else { continue };
                    if let Ok(ast) = &mut f.ast {
                        if adjuster.adjust_ast(ast, op) {
                            f.text = render_formula(ast);
                            if home != sheet_id {
                                rewritten.push(Position::new(home, row, col));
                            }
                        }
                    }
                }
            }
        }

        self.rebuild_graph();
        for pos in self.formula_positions() {
            if pos.sheet == sheet_id || self.mentions_sheet(pos, sheet_id) {
                self.dirty.insert(pos);
            }
        }
        self.dirty.extend(rewritten);
        self.flush();
    }

    /* ─────────────────────────── reads ──────────────────────────── */

    pub fn get_evaluated_cell(&self, pos: Position) -> EvaluatedCell {
        EvaluatedCell {
            value: self.cell_value(pos),
            format: self.cell_format(pos),
        }
    }

    pub fn get_cell_value(&self, pos: Position) -> LiteralValue {
        self.cell_value(pos)
    }

    /// Display text: the value rendered through its effective format.
    pub fn get_cell_text(&self, pos: Position) -> String {
        let cell = self.get_evaluated_cell(pos);
        format_value(&cell.value, cell.format.as_deref())
    }

    /// Raw content as typed, formulas with their current text.
    pub fn get_cell_content(&self, pos: Position) -> String {
        self.cell(pos).map(Cell::raw).unwrap_or_default()
    }

    /// Parse `text` as a reference and resolve it, unqualified references
    /// landing on `sheet`.
    pub fn resolve_range(&self, text: &str, sheet: SheetId) -> Result<Zone, EngineError> {
        let reference = ReferenceType::from_string(text)
            .map_err(|_| EngineError::InvalidReference(text.to_string()))?;
        resolve_reference(&self.registry, &self.sheets, &reference, sheet)
            .map_err(|_| EngineError::InvalidReference(text.to_string()))
    }

    /* ─────────────────────────── recompute ──────────────────────── */

    pub fn mark_dirty(&mut self, positions: &[Position]) {
        for &pos in positions {
            if self.is_formula(pos) {
                self.dirty.insert(pos);
            }
        }
        self.flush();
    }

    /// Run recompute rounds until nothing is dirty or the round limit is hit.
    pub fn flush(&mut self) {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("flush").entered();

        let mut round = 0usize;
        while !self.dirty.is_empty() || !self.changed.is_empty() {
            if round > self.config.max_recompute_rounds {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    rounds = round,
                    pending = self.dirty.len(),
                    "recompute round limit reached"
                );
                self.dirty.clear();
                self.changed.clear();
                break;
            }
            self.recompute_round(round);
            round += 1;
        }
    }

    fn recompute_round(&mut self, round: usize) {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("recompute_round", round).entered();

        let dirty = std::mem::take(&mut self.dirty);
        let changed = std::mem::take(&mut self.changed);

        let mut needs_eval: FxHashSet<Position> =
            dirty.into_iter().filter(|p| self.is_formula(*p)).collect();
        for q in changed {
            for d in self.graph.get_dependents(q) {
                if self.is_formula(d) {
                    needs_eval.insert(d);
                }
            }
        }
        if needs_eval.is_empty() {
            return;
        }

        let schedule = {
            let scheduler = Scheduler::new(&self.graph, &self.spill);
            let vertices: Vec<Position> = scheduler
                .closure(needs_eval.iter().copied())
                .into_iter()
                .filter(|p| self.is_formula(*p))
                .collect();
            scheduler.create_schedule(&vertices, |p| self.seq_of(p))
        };

        let mut pending: FxHashSet<Position> = schedule.order.iter().copied().collect();
        let cyclic: Vec<Position> = schedule.cyclic().collect();
        for pos in cyclic {
            #[cfg(feature = "tracing")]
            tracing::warn!(cell = %pos, sheet = pos.sheet, "circular reference");
            let err = ExcelError::new(ExcelErrorKind::Circ).with_message("Circular reference");
            self.commit(
                pos,
                Outcome::Scalar(LiteralValue::Error(err), None),
                &mut pending,
                &mut needs_eval,
            );
        }

        for pos in schedule.order {
            pending.remove(&pos);
            if !needs_eval.contains(&pos) {
                continue;
            }
            #[cfg(feature = "tracing")]
            let _span =
                tracing::debug_span!("evaluate_vertex", cell = %pos, sheet = pos.sheet).entered();
            let outcome = self.compute(pos);
            self.commit(pos, outcome, &mut pending, &mut needs_eval);
        }
    }

    /// Evaluate the formula at `pos` without touching any state.
    pub(crate) fn compute(&self, pos: Position) -> Outcome {
        let Some(f) = self.formula(pos) else {
            return Outcome::Scalar(LiteralValue::Number(0.0), None);
        };
        let ast = match &f.ast {
            Ok(ast) => ast,
            Err(e) => return Outcome::Scalar(formula_error(&e.message), None),
        };
        let sheet_name = self.registry.name(pos.sheet).unwrap_or_default();
        let interp = Interpreter::new(self, sheet_name);
        let value = interp.evaluate_ast(ast).unwrap_or_else(LiteralValue::Error);
        let format = interp.evaluate_format(ast);
        shape_result(ast, value, format)
    }

    /// Publish an evaluation result: claim or release the spill, store the
    /// value, and schedule readers of anything that changed.
    fn commit(
        &mut self,
        pos: Position,
        outcome: Outcome,
        pending: &mut FxHashSet<Position>,
        needs_eval: &mut FxHashSet<Position>,
    ) {
        let Some(f) = self.formula(pos) else {
            return;
        };
        let old_value = f.value.clone();
        let old_format = f.computed_format.clone();
        let old_state = self.spill.state(pos).cloned();
        let old_zone = self.spill.active_zone(pos);

        let (value, format) = match outcome {
            Outcome::Scalar(v, fmt) => {
                self.spill.release(pos);
                (v, fmt)
            }
            Outcome::Matrix(rows, formats) => {
                self.place_matrix(pos, rows, formats, pending, needs_eval)
            }
        };

        let new_zone = self.spill.active_zone(pos);
        let unchanged = old_value == value
            && old_format == format
            && self.spill.state(pos) == old_state.as_ref();
        if let Some(f) = self.formula_mut(pos) {
            f.value = value;
            f.computed_format = format;
        }
        if unchanged {
            return;
        }

        let mut touched: Vec<Position> = vec![pos];
        touched.extend(old_zone.iter().flat_map(|z| z.positions().collect::<Vec<_>>()));
        touched.extend(new_zone.iter().flat_map(|z| z.positions().collect::<Vec<_>>()));
        touched.sort_unstable();
        touched.dedup();
        self.touch(pos, &touched, pending, needs_eval);

        if let Some(old) = old_zone {
            let released: Vec<Position> = old
                .positions()
                .filter(|q| new_zone.is_none_or(|z| !z.contains(q)))
                .collect();
            self.wake_blocked(pos, &released, pending, needs_eval);
        }
    }

    fn place_matrix(
        &mut self,
        pos: Position,
        rows: Vec<Vec<LiteralValue>>,
        formats: Vec<Vec<Option<String>>>,
        pending: &mut FxHashSet<Position>,
        needs_eval: &mut FxHashSet<Position>,
    ) -> (LiteralValue, Option<String>) {
        let (r, c) = (rows.len() as u32, rows.first().map_or(0, Vec::len) as u32);
        let bounds = self
            .sheet(pos.sheet)
            .map_or((0, 0), |s| (s.rows, s.cols));
        loop {
            let claim = {
                let sheets = &self.sheets;
                self.spill
                    .check_claim(pos, r, c, bounds, |q| cell_has_content(sheets, q))
            };
            match claim {
                Ok(zone) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(anchor = %pos, zone = %zone, "spill claimed");
                    let first = formats.first().and_then(|row| row.first()).cloned().flatten();
                    self.spill.claim(pos, zone, rows.clone(), formats);
                    return (LiteralValue::Array(rows), first);
                }
                // the occupant has not run yet this round: it loses its zone
                Err(Collision::Spill { owner, .. }) if pending.contains(&owner) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(anchor = %pos, preempted = %owner, "spill preempted");
                    if let Some(zone) = self.spill.release(owner) {
                        let positions: Vec<Position> = zone.positions().collect();
                        self.touch(owner, &positions, pending, needs_eval);
                        self.wake_blocked(owner, &positions, pending, needs_eval);
                    }
                    needs_eval.insert(owner);
                }
                Err(collision) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(anchor = %pos, ?collision, "spill blocked");
                    self.spill.block(pos, Zone::from_anchor(pos, r, c));
                    return (LiteralValue::Error(spill_error(collision, r, c)), None);
                }
            }
        }
    }

    /// Schedule a formula again: later this round if it has not run yet,
    /// otherwise next round.
    fn reschedule(
        &mut self,
        pos: Position,
        pending: &FxHashSet<Position>,
        needs_eval: &mut FxHashSet<Position>,
    ) {
        if pending.contains(&pos) {
            needs_eval.insert(pos);
        } else {
            self.dirty.insert(pos);
        }
    }

    /// Readers of `positions` other than `origin` must be evaluated again.
    fn touch(
        &mut self,
        origin: Position,
        positions: &[Position],
        pending: &mut FxHashSet<Position>,
        needs_eval: &mut FxHashSet<Position>,
    ) {
        for &q in positions {
            for d in self.graph.get_dependents(q) {
                if d != origin && self.is_formula(d) {
                    self.reschedule(d, pending, needs_eval);
                }
            }
        }
    }

    /// Blocked anchors whose candidate zone covers a released position get
    /// another chance.
    fn wake_blocked(
        &mut self,
        origin: Position,
        released: &[Position],
        pending: &mut FxHashSet<Position>,
        needs_eval: &mut FxHashSet<Position>,
    ) {
        for &q in released {
            for anchor in self.spill.blocked_anchors_touching(q) {
                if anchor != origin {
                    self.reschedule(anchor, pending, needs_eval);
                }
            }
        }
    }
}

impl Resolver for Engine {
    fn resolve_zone(
        &self,
        reference: &ReferenceType,
        current_sheet: &str,
    ) -> Result<Zone, ExcelError> {
        let home = self.registry.get_id(current_sheet).ok_or_else(|| {
            ExcelError::new(ExcelErrorKind::Ref).with_message("Invalid sheet name")
        })?;
        resolve_reference(&self.registry, &self.sheets, reference, home)
    }

    fn cell_value(&self, pos: Position) -> LiteralValue {
        match self.cell(pos).map(|c| &c.content) {
            Some(CellContent::Value { value, .. }) => value.clone(),
            Some(CellContent::Formula(f)) => {
                if let Some(v) = self.spill.derived_value(pos) {
                    return v;
                }
                match &f.value {
                    LiteralValue::Array(rows) => rows
                        .first()
                        .and_then(|r| r.first())
                        .cloned()
                        .unwrap_or(LiteralValue::Empty),
                    v => v.clone(),
                }
            }
            _ => self.spill.derived_value(pos).unwrap_or(LiteralValue::Empty),
        }
    }

    fn cell_format(&self, pos: Position) -> Option<String> {
        let cell = self.cell(pos);
        if let Some(f) = cell.and_then(|c| c.format.clone()) {
            return Some(f);
        }
        match cell.map(|c| &c.content) {
            Some(CellContent::Formula(f)) => {
                if self.spill.active_zone(pos).is_some() {
                    self.spill.derived_format(pos)
                } else {
                    f.computed_format.clone()
                }
            }
            Some(CellContent::Value { .. }) => None,
            _ => self.spill.derived_format(pos),
        }
    }
}

impl FunctionProvider for Engine {
    fn get_function(&self, ns: &str, name: &str) -> Option<Arc<dyn Function>> {
        self.functions.resolve(ns, name)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EvalConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sheetcalc_parse::parse;

    proptest! {
        #[test]
        fn runs_cover_each_index_once(indices in proptest::collection::vec(0u32..64, 0..20)) {
            let runs = descending_runs(&indices);
            let mut covered: Vec<u32> = runs.iter().flat_map(|&(s, n)| s..s + n).collect();
            covered.sort_unstable();
            let mut expected = indices.clone();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(covered, expected);
            prop_assert!(runs.windows(2).all(|w| w[0].0 > w[1].0 + w[1].1));
        }
    }

    #[test]
    fn runs_are_grouped_and_descending() {
        assert_eq!(descending_runs(&[4, 1, 2, 7, 2]), vec![(7, 1), (4, 1), (1, 2)]);
        assert!(descending_runs(&[]).is_empty());
    }

    #[test]
    fn function_results_must_agree_on_shape() {
        let ast = parse("=F()").unwrap();
        let out = shape_result(
            &ast,
            LiteralValue::Number(1.0),
            ComputedFormat::Matrix(vec![vec![None; 2]; 2]),
        );
        assert!(matches!(out, Outcome::Scalar(LiteralValue::Error(_), None)));

        let out = shape_result(
            &ast,
            LiteralValue::Array(vec![vec![LiteralValue::Empty; 2]]),
            ComputedFormat::none(),
        );
        assert_eq!(
            out,
            Outcome::Matrix(
                vec![vec![LiteralValue::Number(0.0); 2]],
                vec![vec![None; 2]]
            )
        );
    }

    #[test]
    fn other_expressions_broadcast_formats() {
        let ast = parse("=A1+1").unwrap();
        let out = shape_result(
            &ast,
            LiteralValue::Array(vec![vec![LiteralValue::Number(1.0); 2]]),
            ComputedFormat::Scalar(Some("0.00".into())),
        );
        assert_eq!(
            out,
            Outcome::Matrix(
                vec![vec![LiteralValue::Number(1.0); 2]],
                vec![vec![Some("0.00".into()); 2]]
            )
        );
    }

    #[test]
    fn spill_messages() {
        let e = spill_error(Collision::Bounds { rows: true, cols: false }, 3, 3);
        assert_eq!(
            e.message(),
            "Result couldn't be automatically expanded. Please insert more rows."
        );
        let e = spill_error(Collision::Content(Position::new(0, 1, 1)), 2, 2);
        assert_eq!(
            e.message(),
            "Array result was not expanded because it would overwrite data in B2."
        );
    }
}
