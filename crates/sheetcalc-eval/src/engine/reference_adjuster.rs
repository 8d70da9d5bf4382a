use sheetcalc_common::{ExcelError, ExcelErrorKind, LiteralValue, RelativeCoord, SheetId, Zone};
use sheetcalc_parse::parser::{ASTNode, ASTNodeType, AxisRef, ReferenceType};

/// Reference rewriting for structural edits, copies and moves.
///
/// Every entry point walks a formula tree in place and reports whether it
/// changed anything. References that no longer point anywhere become `#REF`
/// literals.
pub struct ReferenceAdjuster<'a> {
    /// Resolves a reference's sheet qualifier, `None` meaning the formula's
    /// own sheet.
    sheet_of: &'a dyn Fn(Option<&str>) -> Option<SheetId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOperation {
    InsertRows { sheet: SheetId, before: u32, count: u32 },
    DeleteRows { sheet: SheetId, start: u32, count: u32 },
    InsertColumns { sheet: SheetId, before: u32, count: u32 },
    DeleteColumns { sheet: SheetId, start: u32, count: u32 },
}

impl ShiftOperation {
    pub fn sheet(&self) -> SheetId {
        match *self {
            ShiftOperation::InsertRows { sheet, .. }
            | ShiftOperation::DeleteRows { sheet, .. }
            | ShiftOperation::InsertColumns { sheet, .. }
            | ShiftOperation::DeleteColumns { sheet, .. } => sheet,
        }
    }

    pub fn is_rows(&self) -> bool {
        matches!(
            self,
            ShiftOperation::InsertRows { .. } | ShiftOperation::DeleteRows { .. }
        )
    }

    /// New index of a single row/column, `None` when it is deleted.
    pub fn map_index(&self, index: u32) -> Option<u32> {
        match *self {
            ShiftOperation::InsertRows { before, count, .. }
            | ShiftOperation::InsertColumns { before, count, .. } => {
                Some(if index >= before { index.saturating_add(count) } else { index })
            }
            ShiftOperation::DeleteRows { start, count, .. }
            | ShiftOperation::DeleteColumns { start, count, .. } => {
                if index < start {
                    Some(index)
                } else if index >= start.saturating_add(count) {
                    Some(index - count)
                } else {
                    None
                }
            }
        }
    }

    /// New span of `[a, b]`, `None` when the whole span is deleted. A
    /// partially deleted span shrinks.
    fn map_span(&self, a: u32, b: u32) -> Option<(u32, u32)> {
        match *self {
            ShiftOperation::InsertRows { .. } | ShiftOperation::InsertColumns { .. } => {
                Some((self.map_index(a)?, self.map_index(b)?))
            }
            ShiftOperation::DeleteRows { start, count, .. }
            | ShiftOperation::DeleteColumns { start, count, .. } => {
                let end = start.saturating_add(count);
                if a >= start && b < end {
                    return None;
                }
                let na = if a < start {
                    a
                } else if a >= end {
                    a - count
                } else {
                    start
                };
                let nb = if b < start {
                    b
                } else if b >= end {
                    b - count
                } else {
                    start - 1
                };
                Some((na, nb))
            }
        }
    }
}

fn ref_error() -> ASTNodeType {
    ASTNodeType::Literal(LiteralValue::Error(
        ExcelError::new(ExcelErrorKind::Ref).with_message("Invalid reference"),
    ))
}

/// Replace every reference node through `f`. `f` returns `None` to leave the
/// node alone, `Some(None)` to turn it into `#REF`.
fn rewrite_references<F>(ast: &mut ASTNode, mut f: F) -> bool
where
    F: FnMut(&ReferenceType) -> Option<Option<ReferenceType>>,
{
    let mut changed = false;
    ast.visit_mut(&mut |node: &mut ASTNode| {
        let ASTNodeType::Reference { reference, .. } = &node.node_type else {
            return;
        };
        match f(reference) {
            None => {}
            Some(Some(new_ref)) => {
                if new_ref != *reference {
                    node.node_type = ASTNodeType::Reference {
                        original: new_ref.to_string(),
                        reference: new_ref,
                    };
                    changed = true;
                }
            }
            Some(None) => {
                node.node_type = ref_error();
                changed = true;
            }
        }
    });
    changed
}

/// Outer `None` when the axis would leave the grid.
fn shift_axis(axis: Option<AxisRef>, delta: i64, honour_fixed: bool) -> Option<Option<AxisRef>> {
    match axis {
        None => Some(None),
        Some(a) if honour_fixed && a.fixed => Some(Some(a)),
        Some(a) => {
            let index = u32::try_from(a.index as i64 + delta).ok()?;
            Some(Some(AxisRef::new(index, a.fixed)))
        }
    }
}

/// Offset every axis of a range; `honour_fixed` leaves `$` axes in place.
fn shift_range(
    reference: &ReferenceType,
    drow: i64,
    dcol: i64,
    honour_fixed: bool,
    sheet: Option<String>,
) -> Option<ReferenceType> {
    let ReferenceType::Range {
        start_row,
        start_col,
        end_row,
        end_col,
        ..
    } = reference
    else {
        return None;
    };
    Some(ReferenceType::normalised_range(
        sheet,
        shift_axis(*start_row, drow, honour_fixed)?,
        shift_axis(*start_col, dcol, honour_fixed)?,
        shift_axis(*end_row, drow, honour_fixed)?,
        shift_axis(*end_col, dcol, honour_fixed)?,
    ))
}

fn range_in_bounds<F>(reference: &ReferenceType, in_bounds: &F) -> bool
where
    F: Fn(Option<AxisRef>, Option<AxisRef>) -> bool,
{
    match reference {
        ReferenceType::Range {
            start_row,
            start_col,
            end_row,
            end_col,
            ..
        } => in_bounds(*start_row, *start_col) && in_bounds(*end_row, *end_col),
        ReferenceType::Cell { .. } => true,
    }
}

/// Zone covered by a reference with every axis bounded. Whole rows and
/// columns report `None`.
fn bounded_zone(reference: &ReferenceType, sheet: SheetId) -> Option<Zone> {
    match reference {
        ReferenceType::Cell { coord, .. } => Some(Zone::new(
            sheet,
            coord.row(),
            coord.col(),
            coord.row(),
            coord.col(),
        )),
        ReferenceType::Range {
            start_row: Some(sr),
            start_col: Some(sc),
            end_row: Some(er),
            end_col: Some(ec),
            ..
        } => Some(Zone::new(sheet, sr.index, sc.index, er.index, ec.index)),
        ReferenceType::Range { .. } => None,
    }
}

impl<'a> ReferenceAdjuster<'a> {
    pub fn new(sheet_of: &'a dyn Fn(Option<&str>) -> Option<SheetId>) -> Self {
        Self { sheet_of }
    }

    /// Apply a row/column insertion or deletion. All endpoints at or after the
    /// edit index move, `$` or not.
    pub fn adjust_ast(&self, ast: &mut ASTNode, op: &ShiftOperation) -> bool {
        rewrite_references(ast, |reference| {
            if (self.sheet_of)(reference.sheet()) != Some(op.sheet()) {
                return None;
            }
            Some(self.shift_reference(reference, op))
        })
    }

    fn shift_reference(
        &self,
        reference: &ReferenceType,
        op: &ShiftOperation,
    ) -> Option<ReferenceType> {
        match reference {
            ReferenceType::Cell { sheet, coord } => {
                let (row, col) = if op.is_rows() {
                    (op.map_index(coord.row())?, coord.col())
                } else {
                    (coord.row(), op.map_index(coord.col())?)
                };
                Some(ReferenceType::Cell {
                    sheet: sheet.clone(),
                    coord: RelativeCoord::new(row, col, coord.row_abs(), coord.col_abs()),
                })
            }
            ReferenceType::Range {
                sheet,
                start_row,
                start_col,
                end_row,
                end_col,
            } => {
                let (start, end) = if op.is_rows() {
                    (*start_row, *end_row)
                } else {
                    (*start_col, *end_col)
                };
                let (start, end) = match (start, end) {
                    (Some(s), Some(e)) => {
                        let (ns, ne) = op.map_span(s.index, e.index)?;
                        (
                            Some(AxisRef::new(ns, s.fixed)),
                            Some(AxisRef::new(ne, e.fixed)),
                        )
                    }
                    (Some(s), None) => {
                        let ns = op.map_span(s.index, u32::MAX).map(|(a, _)| a)?;
                        (Some(AxisRef::new(ns, s.fixed)), None)
                    }
                    (None, Some(e)) => {
                        let ne = op.map_span(0, e.index).map(|(_, b)| b)?;
                        (None, Some(AxisRef::new(ne, e.fixed)))
                    }
                    (None, None) => (None, None),
                };
                Some(if op.is_rows() {
                    ReferenceType::normalised_range(sheet.clone(), start, *start_col, end, *end_col)
                } else {
                    ReferenceType::normalised_range(sheet.clone(), *start_row, start, *end_row, end)
                })
            }
        }
    }

    /// Offset relative axes by `(drow, dcol)` for a copy. Results that leave
    /// the grid or the bounds reported by `dims` become `#REF`.
    pub fn offset_ast<D>(&self, ast: &mut ASTNode, drow: i64, dcol: i64, dims: D) -> bool
    where
        D: Fn(Option<SheetId>) -> Option<(u32, u32)>,
    {
        if drow == 0 && dcol == 0 {
            return false;
        }
        rewrite_references(ast, |reference| {
            let bounds = dims((self.sheet_of)(reference.sheet()));
            let in_bounds = |row: Option<AxisRef>, col: Option<AxisRef>| match bounds {
                Some((rows, cols)) => {
                    row.is_none_or(|r| r.index < rows) && col.is_none_or(|c| c.index < cols)
                }
                None => true,
            };
            let shifted = match reference {
                ReferenceType::Cell { sheet, coord } => coord
                    .rebase(drow, dcol)
                    .ok()
                    .filter(|c| {
                        in_bounds(
                            Some(AxisRef::new(c.row(), false)),
                            Some(AxisRef::new(c.col(), false)),
                        )
                    })
                    .map(|coord| ReferenceType::Cell {
                        sheet: sheet.clone(),
                        coord,
                    }),
                ReferenceType::Range { sheet, .. } => {
                    shift_range(reference, drow, dcol, true, sheet.clone())
                        .filter(|r| range_in_bounds(r, &in_bounds))
                }
            };
            Some(shifted)
        })
    }

    /// Translate references lying entirely inside `from` by `(drow, dcol)`,
    /// fixed axes included, and point them at `to_sheet`. `home` is the sheet
    /// the formula will live on once the move is done; a reference landing on
    /// another sheet gets a qualifier.
    pub fn move_ast(
        &self,
        ast: &mut ASTNode,
        from: Zone,
        drow: i64,
        dcol: i64,
        to_sheet: (SheetId, &str),
        home: SheetId,
    ) -> bool {
        rewrite_references(ast, |reference| {
            let sheet = (self.sheet_of)(reference.sheet())?;
            let zone = bounded_zone(reference, sheet)?;
            if !from.contains_zone(&zone) {
                return None;
            }
            let qualifier = if reference.sheet().is_some() || to_sheet.0 != home {
                Some(to_sheet.1.to_string())
            } else {
                None
            };
            let moved = match reference {
                ReferenceType::Cell { coord, .. } => coord.offset(drow, dcol).ok().map(|coord| {
                    ReferenceType::Cell {
                        sheet: qualifier,
                        coord,
                    }
                }),
                ReferenceType::Range { .. } => shift_range(reference, drow, dcol, false, qualifier),
            };
            Some(moved)
        })
    }

    /// Turn references to a deleted sheet into `#REF`.
    pub fn invalidate_sheet(&self, ast: &mut ASTNode, deleted: &str) -> bool {
        rewrite_references(ast, |reference| match reference.sheet() {
            Some(name) if name.eq_ignore_ascii_case(deleted) => Some(None),
            _ => None,
        })
    }
}
