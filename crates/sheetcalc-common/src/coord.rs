//! Compact coordinate representation used by parsed references.
//!
//! `RelativeCoord` packs a zero-based (row, column) pair and the two `$`
//! anchor flags into 64 bits. Rows are limited to 20 bits and columns to 14
//! bits, which covers any grid the engine can hold.

use core::fmt;

const ROW_BITS: u32 = 20;
const COL_BITS: u32 = 14;
pub const ROW_MAX: u32 = (1 << ROW_BITS) - 1;
pub const COL_MAX: u32 = (1 << COL_BITS) - 1;

const ROW_SHIFT: u32 = 24;
const COL_SHIFT: u32 = 10;

const ROW_MASK: u64 = (ROW_MAX as u64) << ROW_SHIFT;
const COL_MASK: u64 = (COL_MAX as u64) << COL_SHIFT;

const ROW_ABS_BIT: u64 = 1;
const COL_ABS_BIT: u64 = 1 << 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CoordError {
    RowOverflow(i64),
    ColOverflow(i64),
    NegativeRow(i64),
    NegativeCol(i64),
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::RowOverflow(row) => write!(f, "row {row} exceeds {MAX}", MAX = ROW_MAX),
            CoordError::ColOverflow(col) => write!(f, "col {col} exceeds {MAX}", MAX = COL_MAX),
            CoordError::NegativeRow(row) => write!(f, "row {row} is negative"),
            CoordError::NegativeCol(col) => write!(f, "col {col} is negative"),
        }
    }
}

impl std::error::Error for CoordError {}

/// Relative coordinate (row, column) with anchor flags.
///
/// * `row_abs = true` keeps the row fixed when a formula is copied.
/// * `col_abs = true` keeps the column fixed when a formula is copied.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RelativeCoord(u64);

impl RelativeCoord {
    /// Construct from in-range values. Out-of-range inputs are clamped to the
    /// packing limits; use [`RelativeCoord::try_new`] for checked input.
    pub fn new(row: u32, col: u32, row_abs: bool, col_abs: bool) -> Self {
        let row = row.min(ROW_MAX);
        let col = col.min(COL_MAX);
        let mut raw = ((row as u64) << ROW_SHIFT) | ((col as u64) << COL_SHIFT);
        if row_abs {
            raw |= ROW_ABS_BIT;
        }
        if col_abs {
            raw |= COL_ABS_BIT;
        }
        Self(raw)
    }

    pub fn try_new(row: u32, col: u32, row_abs: bool, col_abs: bool) -> Result<Self, CoordError> {
        if row > ROW_MAX {
            return Err(CoordError::RowOverflow(row as i64));
        }
        if col > COL_MAX {
            return Err(CoordError::ColOverflow(col as i64));
        }
        Ok(Self::new(row, col, row_abs, col_abs))
    }

    /// Checked constructor from signed values.
    pub fn try_from_signed(
        row: i64,
        col: i64,
        row_abs: bool,
        col_abs: bool,
    ) -> Result<Self, CoordError> {
        if row < 0 {
            return Err(CoordError::NegativeRow(row));
        }
        if col < 0 {
            return Err(CoordError::NegativeCol(col));
        }
        if row > ROW_MAX as i64 {
            return Err(CoordError::RowOverflow(row));
        }
        if col > COL_MAX as i64 {
            return Err(CoordError::ColOverflow(col));
        }
        Ok(Self::new(row as u32, col as u32, row_abs, col_abs))
    }

    #[inline(always)]
    pub fn row(self) -> u32 {
        ((self.0 & ROW_MASK) >> ROW_SHIFT) as u32
    }

    #[inline(always)]
    pub fn col(self) -> u32 {
        ((self.0 & COL_MASK) >> COL_SHIFT) as u32
    }

    #[inline(always)]
    pub fn row_abs(self) -> bool {
        self.0 & ROW_ABS_BIT != 0
    }

    #[inline(always)]
    pub fn col_abs(self) -> bool {
        self.0 & COL_ABS_BIT != 0
    }

    #[inline(always)]
    pub fn with_row_abs(mut self, abs: bool) -> Self {
        if abs {
            self.0 |= ROW_ABS_BIT;
        } else {
            self.0 &= !ROW_ABS_BIT;
        }
        self
    }

    #[inline(always)]
    pub fn with_col_abs(mut self, abs: bool) -> Self {
        if abs {
            self.0 |= COL_ABS_BIT;
        } else {
            self.0 &= !COL_ABS_BIT;
        }
        self
    }

    /// Offset by signed deltas, ignoring anchor flags.
    pub fn offset(self, drow: i64, dcol: i64) -> Result<Self, CoordError> {
        Self::try_from_signed(
            self.row() as i64 + drow,
            self.col() as i64 + dcol,
            self.row_abs(),
            self.col_abs(),
        )
    }

    /// Rebase as if the enclosing formula moved by `(drow, dcol)`. Anchored
    /// axes stay put.
    pub fn rebase(self, drow: i64, dcol: i64) -> Result<Self, CoordError> {
        let drow = if self.row_abs() { 0 } else { drow };
        let dcol = if self.col_abs() { 0 } else { dcol };
        self.offset(drow, dcol)
    }

    #[inline(always)]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn col_to_letters(col: u32) -> String {
        column_to_letters(col)
    }

    pub fn letters_to_col(s: &str) -> Option<u32> {
        letters_to_column_index(s)
    }
}

impl fmt::Display for RelativeCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.col_abs() {
            write!(f, "$")?;
        }
        write!(f, "{}", column_to_letters(self.col()))?;
        if self.row_abs() {
            write!(f, "$")?;
        }
        write!(f, "{}", self.row() + 1)
    }
}

impl TryFrom<(u32, u32, bool, bool)> for RelativeCoord {
    type Error = CoordError;

    fn try_from(value: (u32, u32, bool, bool)) -> Result<Self, Self::Error> {
        Self::try_new(value.0, value.1, value.2, value.3)
    }
}

/// Zero-based column index to letters (`0 -> A`, `27 -> AB`).
pub fn column_to_letters(mut col: u32) -> String {
    let mut buf = Vec::new();
    loop {
        let rem = (col % 26) as u8;
        buf.push(b'A' + rem);
        col /= 26;
        if col == 0 {
            break;
        }
        col -= 1;
    }
    buf.iter().rev().map(|&b| b as char).collect()
}

/// Upper-case letters to a zero-based column index.
pub fn letters_to_column_index(s: &str) -> Option<u32> {
    if s.is_empty() {
        return None;
    }
    let mut col: u32 = 0;
    for (idx, ch) in s.bytes().enumerate() {
        if !ch.is_ascii_uppercase() {
            return None;
        }
        let val = (ch - b'A') as u32;
        col = col.checked_mul(26)?;
        col = col.checked_add(val)?;
        if idx != s.len() - 1 {
            col = col.checked_add(1)?;
        }
    }
    Some(col)
}

/// Parse a single A1 cell (`B3`, `$B$3`, case-insensitive) into a coordinate.
pub fn parse_a1(text: &str) -> Option<RelativeCoord> {
    let bytes = text.as_bytes();
    let mut i = 0;
    let col_abs = bytes.first() == Some(&b'$');
    if col_abs {
        i += 1;
    }
    let col_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    if i == col_start || i - col_start > 3 {
        return None;
    }
    let col = letters_to_column_index(&text[col_start..i].to_ascii_uppercase())?;
    let row_abs = bytes.get(i) == Some(&b'$');
    if row_abs {
        i += 1;
    }
    let row_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == row_start || i != bytes.len() {
        return None;
    }
    let row: u32 = text[row_start..i].parse().ok()?;
    if row == 0 {
        return None;
    }
    RelativeCoord::try_new(row - 1, col, row_abs, col_abs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn relative_flags() {
        let coord = RelativeCoord::new(0, 0, true, false);
        assert!(coord.row_abs());
        assert!(!coord.col_abs());
        let toggled = coord.with_col_abs(true);
        assert!(toggled.col_abs());
    }

    #[test]
    fn relative_display() {
        let coord = RelativeCoord::new(5, 27, true, false);
        assert_eq!(coord.to_string(), "AB$6");
        let coord = RelativeCoord::new(5, 27, false, true);
        assert_eq!(coord.to_string(), "$AB6");
        let coord = RelativeCoord::new(0, 0, false, false);
        assert_eq!(coord.to_string(), "A1");
    }

    #[test]
    fn rebase_keeps_anchored_axes() {
        let formula = RelativeCoord::new(0, 2, false, true);
        let rebased = formula.rebase(1, 1).unwrap();
        assert_eq!(rebased, RelativeCoord::new(1, 2, false, true));
    }

    #[test]
    fn rebase_off_the_grid_fails() {
        let coord = RelativeCoord::new(0, 0, false, false);
        assert_eq!(coord.rebase(-1, 0), Err(CoordError::NegativeRow(-1)));
    }

    #[test]
    fn a1_parsing() {
        assert_eq!(parse_a1("B3"), Some(RelativeCoord::new(2, 1, false, false)));
        assert_eq!(parse_a1("$c$1"), Some(RelativeCoord::new(0, 2, true, true)));
        assert_eq!(parse_a1("A0"), None);
        assert_eq!(parse_a1("1A"), None);
        assert_eq!(parse_a1("ABCD1"), None);
    }

    #[test]
    fn column_letter_roundtrip() {
        let letters = RelativeCoord::col_to_letters(27);
        assert_eq!(letters, "AB");
        let idx = RelativeCoord::letters_to_col(&letters).unwrap();
        assert_eq!(idx, 27);
        assert!(RelativeCoord::letters_to_col("a1").is_none());
    }

    proptest! {
        #[test]
        fn letters_invert_indices(col in 0u32..=COL_MAX) {
            let letters = column_to_letters(col);
            prop_assert_eq!(letters_to_column_index(&letters), Some(col));
        }

        #[test]
        fn display_parses_back(row in 0u32..100_000, col in 0u32..=COL_MAX, ra: bool, ca: bool) {
            let coord = RelativeCoord::new(row, col, ra, ca);
            prop_assert_eq!(parse_a1(&coord.to_string()), Some(coord));
        }
    }
}
