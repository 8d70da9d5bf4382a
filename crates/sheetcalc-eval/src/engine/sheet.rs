use rustc_hash::FxHashMap;
use sheetcalc_common::{ExcelError, LiteralValue, SheetId};
use sheetcalc_parse::parser::{ASTNode, ParserError};

/// Name <-> id mapping. Names are matched case-insensitively; ids are never
/// reused after a sheet is deleted.
#[derive(Default, Debug)]
pub struct SheetRegistry {
    id_by_name: FxHashMap<String, SheetId>,
    name_by_id: Vec<Option<String>>,
}

impl SheetRegistry {
    pub fn new() -> Self {
        SheetRegistry::default()
    }

    pub fn add(&mut self, name: &str) -> SheetId {
        let id = self.name_by_id.len() as SheetId;
        self.name_by_id.push(Some(name.to_string()));
        self.id_by_name.insert(name.to_ascii_uppercase(), id);
        id
    }

    pub fn remove(&mut self, id: SheetId) {
        if let Some(slot) = self.name_by_id.get_mut(id as usize) {
            if let Some(name) = slot.take() {
                self.id_by_name.remove(&name.to_ascii_uppercase());
            }
        }
    }

    pub fn name(&self, id: SheetId) -> Option<&str> {
        self.name_by_id.get(id as usize)?.as_deref()
    }

    pub fn get_id(&self, name: &str) -> Option<SheetId> {
        self.id_by_name.get(&name.to_ascii_uppercase()).copied()
    }

    /// Sheet a reference points at: its qualifier when present, otherwise the
    /// sheet the formula lives on.
    pub fn resolve(&self, qualifier: Option<&str>, home: SheetId) -> Option<SheetId> {
        match qualifier {
            Some(name) => self.get_id(name),
            None => self.name(home).map(|_| home),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = SheetId> + '_ {
        self.name_by_id
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| i as SheetId)
    }
}

/// A formula cell: source text, parsed tree and the last evaluation.
#[derive(Debug, Clone)]
pub struct FormulaCell {
    pub text: String,
    pub ast: Result<ASTNode, ParserError>,
    /// Creation order, used to break scheduling ties.
    pub seq: u64,
    pub value: LiteralValue,
    pub computed_format: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub enum CellContent {
    #[default]
    Empty,
    Value {
        raw: String,
        value: LiteralValue,
    },
    Formula(Box<FormulaCell>),
}

#[derive(Debug, Clone, Default)]
pub struct Cell {
    pub content: CellContent,
    pub format: Option<String>,
}

impl Cell {
    pub fn has_content(&self) -> bool {
        !matches!(self.content, CellContent::Empty)
    }

    pub fn is_blank(&self) -> bool {
        !self.has_content() && self.format.is_none()
    }

    pub fn formula(&self) -> Option<&FormulaCell> {
        match &self.content {
            CellContent::Formula(f) => Some(f),
            _ => None,
        }
    }

    pub fn formula_mut(&mut self) -> Option<&mut FormulaCell> {
        match &mut self.content {
            CellContent::Formula(f) => Some(f),
            _ => None,
        }
    }

    pub fn raw(&self) -> String {
        match &self.content {
            CellContent::Empty => String::new(),
            CellContent::Value { raw, .. } => raw.clone(),
            CellContent::Formula(f) => f.text.clone(),
        }
    }
}

/// Interpret typed content: `=` starts a formula, then numbers, booleans,
/// and finally plain text.
pub fn parse_literal(text: &str) -> LiteralValue {
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<f64>() {
        if n.is_finite() {
            return LiteralValue::Number(n);
        }
    }
    if trimmed.eq_ignore_ascii_case("TRUE") {
        return LiteralValue::Boolean(true);
    }
    if trimmed.eq_ignore_ascii_case("FALSE") {
        return LiteralValue::Boolean(false);
    }
    if let Some(kind) = sheetcalc_common::ExcelErrorKind::parse(trimmed) {
        return LiteralValue::Error(ExcelError::new(kind));
    }
    LiteralValue::Text(text.to_string())
}

#[derive(Debug, Clone)]
pub struct Sheet {
    pub id: SheetId,
    pub rows: u32,
    pub cols: u32,
    pub cells: FxHashMap<(u32, u32), Cell>,
}

impl Sheet {
    pub fn new(id: SheetId, rows: u32, cols: u32) -> Self {
        Self {
            id,
            rows,
            cols,
            cells: FxHashMap::default(),
        }
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    pub fn cell_mut(&mut self, row: u32, col: u32) -> &mut Cell {
        self.cells.entry((row, col)).or_default()
    }

    pub fn in_bounds(&self, row: u32, col: u32) -> bool {
        row < self.rows && col < self.cols
    }

    /// Drop the entry once it carries neither content nor format.
    pub fn prune(&mut self, row: u32, col: u32) {
        if self.cells.get(&(row, col)).is_some_and(Cell::is_blank) {
            self.cells.remove(&(row, col));
        }
    }

    /// Re-key every cell through `f`; cells mapped to `None` are dropped.
    pub fn remap<F>(&mut self, mut f: F)
    where
        F: FnMut(u32, u32) -> Option<(u32, u32)>,
    {
        let old = std::mem::take(&mut self.cells);
        for ((r, c), cell) in old {
            if let Some(key) = f(r, c) {
                self.cells.insert(key, cell);
            }
        }
    }
}
