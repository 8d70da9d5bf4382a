use rustc_hash::{FxHashMap, FxHashSet};
use sheetcalc_common::{Position, SheetId, Zone};
use sheetcalc_parse::parser::{ASTNode, ReferenceType};

/// Formula-to-reference edges.
///
/// Each formula keeps the zones it reads. Single-cell reads are indexed per
/// position; multi-cell reads are kept per sheet and matched by containment.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    precedents: FxHashMap<Position, Vec<Zone>>,
    cell_dependents: FxHashMap<Position, FxHashSet<Position>>,
    range_dependents: FxHashMap<SheetId, Vec<(Zone, Position)>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the edges of `pos` with the references in `ast`. References
    /// that `resolve` rejects (unknown sheet, out of bounds) carry no edge.
    pub fn record_dependencies<F>(&mut self, pos: Position, ast: &ASTNode, resolve: F)
    where
        F: Fn(&ReferenceType) -> Option<Zone>,
    {
        self.remove_dependencies(pos);
        let mut zones: Vec<Zone> = ast
            .get_dependencies()
            .into_iter()
            .filter_map(|r| resolve(r))
            .collect();
        zones.sort_by_key(|z| (z.sheet, z.top, z.left, z.bottom, z.right));
        zones.dedup();
        for zone in &zones {
            if zone.is_single() {
                self.cell_dependents
                    .entry(zone.top_left())
                    .or_default()
                    .insert(pos);
            } else {
                self.range_dependents
                    .entry(zone.sheet)
                    .or_default()
                    .push((*zone, pos));
            }
        }
        if !zones.is_empty() {
            self.precedents.insert(pos, zones);
        }
    }

    pub fn remove_dependencies(&mut self, pos: Position) {
        let Some(zones) = self.precedents.remove(&pos) else {
            return;
        };
        for zone in zones {
            if zone.is_single() {
                let key = zone.top_left();
                if let Some(set) = self.cell_dependents.get_mut(&key) {
                    set.remove(&pos);
                    if set.is_empty() {
                        self.cell_dependents.remove(&key);
                    }
                }
            } else if let Some(list) = self.range_dependents.get_mut(&zone.sheet) {
                list.retain(|(z, p)| !(*p == pos && *z == zone));
            }
        }
    }

    /// Formulas reading `pos`, directly or through a range, in position order.
    pub fn get_dependents(&self, pos: Position) -> Vec<Position> {
        let mut out: Vec<Position> = self
            .cell_dependents
            .get(&pos)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        if let Some(list) = self.range_dependents.get(&pos.sheet) {
            out.extend(
                list.iter()
                    .filter(|(zone, _)| zone.contains(&pos))
                    .map(|(_, p)| *p),
            );
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Zones read by `pos`.
    pub fn precedents(&self, pos: Position) -> &[Zone] {
        self.precedents.get(&pos).map_or(&[], Vec::as_slice)
    }

    pub fn clear(&mut self) {
        self.precedents.clear();
        self.cell_dependents.clear();
        self.range_dependents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetcalc_parse::parse;

    fn resolver(r: &ReferenceType) -> Option<Zone> {
        match r {
            ReferenceType::Cell { coord, .. } => {
                Some(Zone::single(Position::new(0, coord.row(), coord.col())))
            }
            ReferenceType::Range {
                start_row: Some(sr),
                start_col: Some(sc),
                end_row: Some(er),
                end_col: Some(ec),
                ..
            } => Some(Zone::new(0, sr.index, sc.index, er.index, ec.index)),
            _ => None,
        }
    }

    #[test]
    fn cell_and_range_dependents() {
        let mut g = DependencyGraph::new();
        let c1 = Position::new(0, 0, 2);
        g.record_dependencies(c1, &parse("=A1+SUM(A1:B3)").unwrap(), resolver);

        assert_eq!(g.get_dependents(Position::new(0, 0, 0)), vec![c1]);
        assert_eq!(g.get_dependents(Position::new(0, 2, 1)), vec![c1]);
        assert!(g.get_dependents(Position::new(0, 3, 0)).is_empty());
        assert_eq!(g.precedents(c1).len(), 2);
    }

    #[test]
    fn rerecording_replaces_edges() {
        let mut g = DependencyGraph::new();
        let b1 = Position::new(0, 0, 1);
        g.record_dependencies(b1, &parse("=A1").unwrap(), resolver);
        g.record_dependencies(b1, &parse("=A2").unwrap(), resolver);

        assert!(g.get_dependents(Position::new(0, 0, 0)).is_empty());
        assert_eq!(g.get_dependents(Position::new(0, 1, 0)), vec![b1]);

        g.remove_dependencies(b1);
        assert!(g.get_dependents(Position::new(0, 1, 0)).is_empty());
        assert!(g.precedents(b1).is_empty());
    }
}
