//! Array spill bookkeeping.
//!
//! An anchor whose formula returns a matrix claims the zone below and to the
//! right of it. Every claimed position forwards to its anchor through
//! `owners`; the anchor keeps the derived values and formats for the zone.

use rustc_hash::FxHashMap;
use sheetcalc_common::{LiteralValue, Position, SheetId, Zone};

#[derive(Debug, Clone, PartialEq)]
pub enum SpillState {
    Spilled {
        zone: Zone,
        values: Vec<Vec<LiteralValue>>,
        formats: Vec<Vec<Option<String>>>,
    },
    /// The anchor could not claim `candidate`.
    Blocked { candidate: Zone },
}

/// Why a claim failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collision {
    /// The zone leaves the sheet along the flagged axes.
    Bounds { rows: bool, cols: bool },
    /// First position, row-major, that holds content.
    Content(Position),
    /// First position, row-major, inside another anchor's active zone.
    Spill { at: Position, owner: Position },
}

#[derive(Debug, Default)]
pub struct SpillManager {
    records: FxHashMap<Position, SpillState>,
    owners: FxHashMap<Position, Position>,
}

impl SpillManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchor whose active zone covers `pos`, the anchor itself included.
    pub fn owner_of(&self, pos: Position) -> Option<Position> {
        self.owners.get(&pos).copied()
    }

    pub fn state(&self, anchor: Position) -> Option<&SpillState> {
        self.records.get(&anchor)
    }

    pub fn active_zone(&self, anchor: Position) -> Option<Zone> {
        match self.records.get(&anchor)? {
            SpillState::Spilled { zone, .. } => Some(*zone),
            SpillState::Blocked { .. } => None,
        }
    }

    fn derived<T: Clone>(
        &self,
        pos: Position,
        pick: impl Fn(&SpillState, usize, usize) -> Option<T>,
    ) -> Option<T> {
        let anchor = self.owner_of(pos)?;
        let state = self.records.get(&anchor)?;
        let (r, c) = ((pos.row - anchor.row) as usize, (pos.col - anchor.col) as usize);
        pick(state, r, c)
    }

    /// Published value at a spilled position.
    pub fn derived_value(&self, pos: Position) -> Option<LiteralValue> {
        self.derived(pos, |state, r, c| match state {
            SpillState::Spilled { values, .. } => values.get(r)?.get(c).cloned(),
            SpillState::Blocked { .. } => None,
        })
    }

    /// Published format at a spilled position.
    pub fn derived_format(&self, pos: Position) -> Option<String> {
        self.derived(pos, |state, r, c| match state {
            SpillState::Spilled { formats, .. } => formats.get(r)?.get(c).cloned().flatten(),
            SpillState::Blocked { .. } => None,
        })
    }

    /// Check whether `anchor` can claim a `rows x cols` zone on a sheet of
    /// `sheet_rows x sheet_cols`. Sheet bounds are checked before the
    /// row-major collision scan, which skips the anchor itself.
    pub fn check_claim<F>(
        &self,
        anchor: Position,
        rows: u32,
        cols: u32,
        (sheet_rows, sheet_cols): (u32, u32),
        has_content: F,
    ) -> Result<Zone, Collision>
    where
        F: Fn(Position) -> bool,
    {
        let zone = Zone::from_anchor(anchor, rows, cols);
        let out_rows = zone.bottom >= sheet_rows;
        let out_cols = zone.right >= sheet_cols;
        if out_rows || out_cols {
            return Err(Collision::Bounds {
                rows: out_rows,
                cols: out_cols,
            });
        }
        for pos in zone.positions() {
            if pos == anchor {
                continue;
            }
            if has_content(pos) {
                return Err(Collision::Content(pos));
            }
            if let Some(owner) = self.owner_of(pos) {
                if owner != anchor {
                    return Err(Collision::Spill { at: pos, owner });
                }
            }
        }
        Ok(zone)
    }

    /// Record a successful claim, replacing any previous state of `anchor`.
    pub fn claim(
        &mut self,
        anchor: Position,
        zone: Zone,
        values: Vec<Vec<LiteralValue>>,
        formats: Vec<Vec<Option<String>>>,
    ) {
        self.release(anchor);
        for pos in zone.positions() {
            self.owners.insert(pos, anchor);
        }
        self.records.insert(
            anchor,
            SpillState::Spilled {
                zone,
                values,
                formats,
            },
        );
    }

    /// Forget `anchor`'s record. Returns the zone it had claimed, if any.
    pub fn release(&mut self, anchor: Position) -> Option<Zone> {
        match self.records.remove(&anchor)? {
            SpillState::Spilled { zone, .. } => {
                for pos in zone.positions() {
                    if self.owners.get(&pos) == Some(&anchor) {
                        self.owners.remove(&pos);
                    }
                }
                Some(zone)
            }
            SpillState::Blocked { .. } => None,
        }
    }

    /// Mark `anchor` as unable to claim `candidate`. Returns the zone it
    /// previously held, if any.
    pub fn block(&mut self, anchor: Position, candidate: Zone) -> Option<Zone> {
        let released = self.release(anchor);
        self.records
            .insert(anchor, SpillState::Blocked { candidate });
        released
    }

    /// Blocked anchors whose candidate zone covers `pos`.
    pub fn blocked_anchors_touching(&self, pos: Position) -> Vec<Position> {
        let mut out: Vec<Position> = self
            .records
            .iter()
            .filter_map(|(anchor, state)| match state {
                SpillState::Blocked { candidate } if candidate.contains(&pos) => Some(*anchor),
                _ => None,
            })
            .collect();
        out.sort_unstable();
        out
    }

    /// Drop every record anchored on `sheet`.
    pub fn clear_sheet(&mut self, sheet: SheetId) {
        self.records.retain(|anchor, _| anchor.sheet != sheet);
        self.owners.retain(|pos, _| pos.sheet != sheet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(row: u32, col: u32) -> Position {
        Position::new(0, row, col)
    }

    fn fill(rows: usize, cols: usize, v: f64) -> Vec<Vec<LiteralValue>> {
        vec![vec![LiteralValue::Number(v); cols]; rows]
    }

    #[test]
    fn claim_forwards_positions_to_anchor() {
        let mut sm = SpillManager::new();
        let zone = sm.check_claim(p(0, 0), 2, 2, (10, 10), |_| false).unwrap();
        sm.claim(p(0, 0), zone, fill(2, 2, 42.0), vec![vec![None; 2]; 2]);

        assert_eq!(sm.owner_of(p(1, 1)), Some(p(0, 0)));
        assert_eq!(sm.derived_value(p(1, 0)), Some(LiteralValue::Number(42.0)));
        assert_eq!(sm.owner_of(p(2, 0)), None);

        assert_eq!(sm.release(p(0, 0)), Some(zone));
        assert_eq!(sm.owner_of(p(1, 1)), None);
    }

    #[test]
    fn bounds_are_checked_before_content() {
        let sm = SpillManager::new();
        let res = sm.check_claim(p(0, 1), 3, 3, (3, 3), |_| true);
        assert_eq!(
            res,
            Err(Collision::Bounds {
                rows: false,
                cols: true
            })
        );
    }

    #[test]
    fn collision_scan_is_row_major() {
        let mut sm = SpillManager::new();
        let other = sm.check_claim(p(1, 0), 1, 1, (10, 10), |_| false).unwrap();
        sm.claim(p(1, 0), other, fill(1, 1, 1.0), vec![vec![None]]);

        let res = sm.check_claim(p(0, 0), 2, 2, (10, 10), |pos| pos == p(1, 1));
        assert_eq!(
            res,
            Err(Collision::Spill {
                at: p(1, 0),
                owner: p(1, 0)
            })
        );

        let res = sm.check_claim(p(0, 0), 2, 2, (10, 10), |pos| pos == p(0, 1));
        assert_eq!(res, Err(Collision::Content(p(0, 1))));
    }

    #[test]
    fn blocked_candidates_are_found() {
        let mut sm = SpillManager::new();
        sm.block(p(0, 0), Zone::new(0, 0, 0, 1, 1));
        assert_eq!(sm.blocked_anchors_touching(p(1, 1)), vec![p(0, 0)]);
        assert!(sm.blocked_anchors_touching(p(2, 2)).is_empty());
        assert_eq!(sm.active_zone(p(0, 0)), None);
    }
}
