//! Sheet-scoped positions and rectangles.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::coord::column_to_letters;

/// Stable sheet identifier handed out by the engine's sheet registry.
pub type SheetId = u16;

/// A single cell, zero-based.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub sheet: SheetId,
    pub row: u32,
    pub col: u32,
}

impl Position {
    pub const fn new(sheet: SheetId, row: u32, col: u32) -> Self {
        Self { sheet, row, col }
    }

    /// Signed offset; `None` when the result would leave the grid.
    pub fn offset(self, drow: i64, dcol: i64) -> Option<Self> {
        let row = u32::try_from(self.row as i64 + drow).ok()?;
        let col = u32::try_from(self.col as i64 + dcol).ok()?;
        Some(Self::new(self.sheet, row, col))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_to_letters(self.col), self.row + 1)
    }
}

/// Inclusive rectangle on one sheet. Always normalised so that
/// `top <= bottom` and `left <= right`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Zone {
    pub sheet: SheetId,
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl Zone {
    /// Build a zone from any two corners.
    pub fn new(sheet: SheetId, row_a: u32, col_a: u32, row_b: u32, col_b: u32) -> Self {
        Self {
            sheet,
            top: row_a.min(row_b),
            bottom: row_a.max(row_b),
            left: col_a.min(col_b),
            right: col_a.max(col_b),
        }
    }

    pub fn single(pos: Position) -> Self {
        Self::new(pos.sheet, pos.row, pos.col, pos.row, pos.col)
    }

    /// Zone of `rows x cols` whose top-left corner is `anchor`.
    pub fn from_anchor(anchor: Position, rows: u32, cols: u32) -> Self {
        Self {
            sheet: anchor.sheet,
            top: anchor.row,
            bottom: anchor.row + rows.saturating_sub(1),
            left: anchor.col,
            right: anchor.col + cols.saturating_sub(1),
        }
    }

    pub fn top_left(&self) -> Position {
        Position::new(self.sheet, self.top, self.left)
    }

    pub fn rows(&self) -> u32 {
        self.bottom - self.top + 1
    }

    pub fn cols(&self) -> u32 {
        self.right - self.left + 1
    }

    pub fn is_single(&self) -> bool {
        self.top == self.bottom && self.left == self.right
    }

    pub fn contains(&self, pos: &Position) -> bool {
        pos.sheet == self.sheet
            && pos.row >= self.top
            && pos.row <= self.bottom
            && pos.col >= self.left
            && pos.col <= self.right
    }

    pub fn contains_zone(&self, other: &Zone) -> bool {
        other.sheet == self.sheet
            && other.top >= self.top
            && other.bottom <= self.bottom
            && other.left >= self.left
            && other.right <= self.right
    }

    pub fn intersects(&self, other: &Zone) -> bool {
        self.sheet == other.sheet
            && self.top <= other.bottom
            && other.top <= self.bottom
            && self.left <= other.right
            && other.left <= self.right
    }

    /// Positions in row-major order: top to bottom, left to right within a row.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        (self.top..=self.bottom).flat_map(move |r| {
            (self.left..=self.right).map(move |c| Position::new(self.sheet, r, c))
        })
    }

    /// Same-shaped zone translated by a signed offset.
    pub fn offset(&self, drow: i64, dcol: i64) -> Option<Self> {
        let tl = self.top_left().offset(drow, dcol)?;
        Some(Self::from_anchor(tl, self.rows(), self.cols()))
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tl = Position::new(self.sheet, self.top, self.left);
        if self.is_single() {
            return write!(f, "{tl}");
        }
        let br = Position::new(self.sheet, self.bottom, self.right);
        write!(f, "{tl}:{br}")
    }
}
