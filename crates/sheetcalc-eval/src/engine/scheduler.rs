use super::graph::DependencyGraph;
use super::spill::SpillManager;
use rustc_hash::{FxHashMap, FxHashSet};
use sheetcalc_common::{Position, Zone};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

/// Orders formula positions so that every formula runs after the formulas
/// whose output it reads. Output here means the anchor cell plus, for an
/// active spill, every position of the spilled zone.
pub struct Scheduler<'a> {
    graph: &'a DependencyGraph,
    spill: &'a SpillManager,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Evaluation order: every orderable vertex, then the vertices that only
    /// depend on a cycle or wait on each other's spills.
    pub order: Vec<Position>,
    /// Strongly connected groups that can never be ordered.
    pub cycles: Vec<Vec<Position>>,
}

impl Schedule {
    pub fn cyclic(&self) -> impl Iterator<Item = Position> + '_ {
        self.cycles.iter().flatten().copied()
    }
}

impl<'a> Scheduler<'a> {
    pub fn new(graph: &'a DependencyGraph, spill: &'a SpillManager) -> Self {
        Self { graph, spill }
    }

    /// Zone a formula writes to right now.
    pub fn output_zone(&self, pos: Position) -> Zone {
        self.spill
            .active_zone(pos)
            .unwrap_or_else(|| Zone::single(pos))
    }

    /// Formulas reading the anchor cell `pos`, `pos` excluded. Readers of
    /// spilled positions are not followed: they are scheduled when the spill
    /// actually changes.
    pub fn direct_dependents(&self, pos: Position) -> Vec<Position> {
        self.graph
            .get_dependents(pos)
            .into_iter()
            .filter(|d| *d != pos)
            .collect()
    }

    /// `seeds` plus everything reachable through dependents.
    pub fn closure(&self, seeds: impl IntoIterator<Item = Position>) -> Vec<Position> {
        let mut seen: FxHashSet<Position> = FxHashSet::default();
        let mut queue: VecDeque<Position> = VecDeque::new();
        for s in seeds {
            if seen.insert(s) {
                queue.push_back(s);
            }
        }
        while let Some(u) = queue.pop_front() {
            for d in self.direct_dependents(u) {
                if seen.insert(d) {
                    queue.push_back(d);
                }
            }
        }
        let mut out: Vec<Position> = seen.into_iter().collect();
        out.sort_unstable();
        out
    }

    /// Ordering edges among `vertices`: `u -> v` when `v` reads what `u`
    /// writes. Reading the anchor cell is a hard edge; reading another
    /// position of its spill is soft. A formula reading its own spill gets no
    /// edge; reading its own anchor is a hard self-loop.
    fn edges(&self, vertices: &[Position]) -> Edges {
        let members: FxHashSet<Position> = vertices.iter().copied().collect();
        let zones: Vec<(Position, Zone)> = vertices
            .iter()
            .map(|&u| (u, self.output_zone(u)))
            .collect();
        let mut all: FxHashMap<Position, FxHashSet<Position>> = FxHashMap::default();
        let mut hard: FxHashMap<Position, FxHashSet<Position>> = FxHashMap::default();

        for &v in vertices {
            for read in self.graph.precedents(v) {
                if read.is_single() {
                    let q = read.top_left();
                    let writer = self.spill.owner_of(q).unwrap_or(q);
                    if members.contains(&writer) && (writer != v || q == v) {
                        all.entry(writer).or_default().insert(v);
                        if q == writer {
                            hard.entry(writer).or_default().insert(v);
                        }
                    }
                    continue;
                }
                for (u, zone) in &zones {
                    if !zone.intersects(read) {
                        continue;
                    }
                    let reads_anchor = read.contains(u);
                    if *u == v && !reads_anchor {
                        continue;
                    }
                    all.entry(*u).or_default().insert(v);
                    if reads_anchor {
                        hard.entry(*u).or_default().insert(v);
                    }
                }
            }
        }

        Edges {
            all: sorted(all),
            hard: sorted(hard),
        }
    }

    /// Kahn's algorithm with ties broken by `priority`. Whatever cannot be
    /// ordered is split into the cycles of hard edges and the remaining
    /// vertices, which are ordered with soft edges broken as needed.
    pub fn create_schedule<F>(&self, vertices: &[Position], priority: F) -> Schedule
    where
        F: Fn(Position) -> u64,
    {
        let edges = self.edges(vertices);
        let (order, remainder) = kahn(vertices, &edges.all, &priority);
        if remainder.is_empty() {
            return Schedule {
                order,
                cycles: Vec::new(),
            };
        }

        let cycles: Vec<Vec<Position>> = tarjan_scc(&remainder, &edges.hard)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1
                    || edges
                        .hard
                        .get(&scc[0])
                        .is_some_and(|next| next.contains(&scc[0]))
            })
            .collect();
        let cyclic: FxHashSet<Position> = cycles.iter().flatten().copied().collect();
        let rest: Vec<Position> = remainder
            .into_iter()
            .filter(|p| !cyclic.contains(p))
            .collect();

        let mut order = order;
        order.extend(break_soft_edges(&rest, &edges, &priority));
        Schedule { order, cycles }
    }
}

struct Edges {
    all: FxHashMap<Position, Vec<Position>>,
    hard: FxHashMap<Position, Vec<Position>>,
}

fn sorted(map: FxHashMap<Position, FxHashSet<Position>>) -> FxHashMap<Position, Vec<Position>> {
    map.into_iter()
        .map(|(u, set)| {
            let mut list: Vec<Position> = set.into_iter().collect();
            list.sort_unstable();
            (u, list)
        })
        .collect()
}

fn indegrees(
    vertices: &[Position],
    members: &FxHashSet<Position>,
    succ: &FxHashMap<Position, Vec<Position>>,
) -> FxHashMap<Position, usize> {
    let mut indegree: FxHashMap<Position, usize> = vertices.iter().map(|&v| (v, 0)).collect();
    for u in vertices {
        for v in succ.get(u).into_iter().flatten() {
            if members.contains(v) {
                *indegree.entry(*v).or_default() += 1;
            }
        }
    }
    indegree
}

/// Returns `(ordered, unorderable)`. Edges leaving `vertices` are ignored.
fn kahn<F>(
    vertices: &[Position],
    succ: &FxHashMap<Position, Vec<Position>>,
    priority: &F,
) -> (Vec<Position>, Vec<Position>)
where
    F: Fn(Position) -> u64,
{
    let members: FxHashSet<Position> = vertices.iter().copied().collect();
    let mut indegree = indegrees(vertices, &members, succ);

    let mut ready: BinaryHeap<Reverse<(u64, Position)>> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(&v, _)| Reverse((priority(v), v)))
        .collect();
    let mut order = Vec::with_capacity(vertices.len());
    while let Some(Reverse((_, u))) = ready.pop() {
        order.push(u);
        for v in succ.get(&u).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(v) {
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse((priority(*v), *v)));
                }
            }
        }
    }

    let emitted: FxHashSet<Position> = order.iter().copied().collect();
    let mut remainder: Vec<Position> = vertices
        .iter()
        .copied()
        .filter(|v| !emitted.contains(v))
        .collect();
    remainder.sort_by_key(|v| (priority(*v), *v));
    (order, remainder)
}

/// Order `vertices`, which hold no cycle of hard edges. Soft edges are
/// followed while possible; when every remaining vertex waits on one, the
/// first by `priority` among those with no pending hard edge runs anyway
/// and reads the stale spill.
fn break_soft_edges<F>(vertices: &[Position], edges: &Edges, priority: &F) -> Vec<Position>
where
    F: Fn(Position) -> u64,
{
    let members: FxHashSet<Position> = vertices.iter().copied().collect();
    let mut all = indegrees(vertices, &members, &edges.all);
    let mut hard = indegrees(vertices, &members, &edges.hard);
    let mut ready: BinaryHeap<Reverse<(u64, Position)>> = all
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(&v, _)| Reverse((priority(v), v)))
        .collect();
    let mut emitted: FxHashSet<Position> = FxHashSet::default();
    let mut order = Vec::with_capacity(vertices.len());

    while order.len() < vertices.len() {
        let next = match ready.pop() {
            Some(Reverse((_, u))) => u,
            None => {
                let forced = vertices
                    .iter()
                    .copied()
                    .filter(|v| !emitted.contains(v) && hard.get(v).copied().unwrap_or(0) == 0)
                    .min_by_key(|v| (priority(*v), *v));
                match forced {
                    Some(v) => v,
                    None => break,
                }
            }
        };
        if !emitted.insert(next) {
            continue;
        }
        order.push(next);
        for v in edges.all.get(&next).into_iter().flatten() {
            if let Some(d) = all.get_mut(v) {
                *d = d.saturating_sub(1);
                if *d == 0 && !emitted.contains(v) {
                    ready.push(Reverse((priority(*v), *v)));
                }
            }
        }
        for v in edges.hard.get(&next).into_iter().flatten() {
            if let Some(d) = hard.get_mut(v) {
                *d = d.saturating_sub(1);
            }
        }
    }
    order
}

struct Tarjan<'g> {
    succ: &'g FxHashMap<Position, Vec<Position>>,
    members: FxHashSet<Position>,
    index_counter: usize,
    indices: FxHashMap<Position, usize>,
    lowlinks: FxHashMap<Position, usize>,
    stack: Vec<Position>,
    on_stack: FxHashSet<Position>,
    sccs: Vec<Vec<Position>>,
}

impl Tarjan<'_> {
    fn visit(&mut self, vertex: Position) {
        self.indices.insert(vertex, self.index_counter);
        self.lowlinks.insert(vertex, self.index_counter);
        self.index_counter += 1;
        self.stack.push(vertex);
        self.on_stack.insert(vertex);

        let next: Vec<Position> = self
            .succ
            .get(&vertex)
            .into_iter()
            .flatten()
            .copied()
            .filter(|w| self.members.contains(w))
            .collect();
        for w in next {
            if !self.indices.contains_key(&w) {
                self.visit(w);
                let low = self.lowlinks[&vertex].min(self.lowlinks[&w]);
                self.lowlinks.insert(vertex, low);
            } else if self.on_stack.contains(&w) {
                let low = self.lowlinks[&vertex].min(self.indices[&w]);
                self.lowlinks.insert(vertex, low);
            }
        }

        if self.lowlinks[&vertex] == self.indices[&vertex] {
            let mut scc = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack.remove(&w);
                scc.push(w);
                if w == vertex {
                    break;
                }
            }
            scc.sort_unstable();
            self.sccs.push(scc);
        }
    }
}

fn tarjan_scc(
    vertices: &[Position],
    succ: &FxHashMap<Position, Vec<Position>>,
) -> Vec<Vec<Position>> {
    let mut t = Tarjan {
        succ,
        members: vertices.iter().copied().collect(),
        index_counter: 0,
        indices: FxHashMap::default(),
        lowlinks: FxHashMap::default(),
        stack: Vec::new(),
        on_stack: FxHashSet::default(),
        sccs: Vec::new(),
    };
    for &v in vertices {
        if !t.indices.contains_key(&v) {
            t.visit(v);
        }
    }
    t.sccs
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetcalc_common::LiteralValue;
    use sheetcalc_parse::parse;
    use sheetcalc_parse::parser::ReferenceType;

    fn p(row: u32, col: u32) -> Position {
        Position::new(0, row, col)
    }

    fn resolve(r: &ReferenceType) -> Option<Zone> {
        match r {
            ReferenceType::Cell { coord, .. } => Some(Zone::single(p(coord.row(), coord.col()))),
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

    fn graph(cells: &[(Position, &str)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (pos, src) in cells {
            g.record_dependencies(*pos, &parse(src).unwrap(), resolve);
        }
        g
    }

    fn by_col(p: Position) -> u64 {
        (p.row as u64) << 32 | p.col as u64
    }

    #[test]
    fn chain_is_ordered_by_dependencies() {
        // A1 <- B1 <- C1, declared in reverse
        let g = graph(&[(p(0, 2), "=B1"), (p(0, 1), "=A1"), (p(0, 0), "=1")]);
        let spill = SpillManager::new();
        let s = Scheduler::new(&g, &spill);
        let sched = s.create_schedule(&[p(0, 2), p(0, 1), p(0, 0)], by_col);
        assert_eq!(sched.order, vec![p(0, 0), p(0, 1), p(0, 2)]);
        assert!(sched.cycles.is_empty());
    }

    #[test]
    fn cycle_members_are_separated_from_downstream() {
        // A1 <-> B1, C1 reads B1
        let g = graph(&[(p(0, 0), "=B1"), (p(0, 1), "=A1"), (p(0, 2), "=B1+1")]);
        let spill = SpillManager::new();
        let s = Scheduler::new(&g, &spill);
        let sched = s.create_schedule(&[p(0, 0), p(0, 1), p(0, 2)], by_col);
        assert_eq!(sched.cycles, vec![vec![p(0, 0), p(0, 1)]]);
        assert_eq!(sched.order, vec![p(0, 2)]);
    }

    #[test]
    fn reading_own_cell_is_a_cycle() {
        let g = graph(&[(p(0, 0), "=A1+1")]);
        let spill = SpillManager::new();
        let sched = Scheduler::new(&g, &spill).create_schedule(&[p(0, 0)], by_col);
        assert_eq!(sched.cycles, vec![vec![p(0, 0)]]);
    }

    #[test]
    fn readers_of_a_spill_follow_its_anchor() {
        // A1 spills over A1:B2, D1 reads B2 and is declared first
        let g = graph(&[(p(0, 3), "=B2"), (p(0, 0), "=MFILL(2,2,1)")]);
        let mut spill = SpillManager::new();
        spill.claim(
            p(0, 0),
            Zone::new(0, 0, 0, 1, 1),
            vec![vec![LiteralValue::Number(1.0); 2]; 2],
            vec![vec![None; 2]; 2],
        );
        let s = Scheduler::new(&g, &spill);
        let sched = s.create_schedule(&[p(0, 3), p(0, 0)], |_| 0);
        assert_eq!(sched.order, vec![p(0, 0), p(0, 3)]);
        // spilled readers are reached when the spill changes, not by closure
        assert!(s.direct_dependents(p(0, 0)).is_empty());
        assert_eq!(s.closure([p(0, 0)]), vec![p(0, 0)]);
    }

    #[test]
    fn anchors_reading_each_others_spill_are_not_a_cycle() {
        // A1 spills over A1:B1 and reads D1; C1 spills over C1:D1 and reads B1
        let g = graph(&[(p(0, 0), "=MFILL(2,1,D1+1)"), (p(0, 2), "=MFILL(2,1,B1+1)")]);
        let mut spill = SpillManager::new();
        for anchor in [p(0, 0), p(0, 2)] {
            spill.claim(
                anchor,
                Zone::from_anchor(anchor, 1, 2),
                vec![vec![LiteralValue::Number(1.0); 2]],
                vec![vec![None; 2]],
            );
        }
        let sched = Scheduler::new(&g, &spill).create_schedule(&[p(0, 2), p(0, 0)], by_col);
        assert!(sched.cycles.is_empty());
        assert_eq!(sched.order, vec![p(0, 0), p(0, 2)]);
    }

    #[test]
    fn hard_cycle_through_a_spilled_anchor_is_still_a_cycle() {
        // A1 spills over A1:B1 and reads C1, which reads A1
        let g = graph(&[(p(0, 0), "=MFILL(2,1,C1)"), (p(0, 2), "=A1")]);
        let mut spill = SpillManager::new();
        spill.claim(
            p(0, 0),
            Zone::from_anchor(p(0, 0), 1, 2),
            vec![vec![LiteralValue::Number(1.0); 2]],
            vec![vec![None; 2]],
        );
        let sched = Scheduler::new(&g, &spill).create_schedule(&[p(0, 0), p(0, 2)], by_col);
        assert_eq!(sched.cycles, vec![vec![p(0, 0), p(0, 2)]]);
    }

    #[test]
    fn reading_own_spill_is_not_a_cycle() {
        let g = graph(&[(p(0, 0), "=MFILL(2,2,SUM(B2))")]);
        let mut spill = SpillManager::new();
        spill.claim(
            p(0, 0),
            Zone::new(0, 0, 0, 1, 1),
            vec![vec![LiteralValue::Number(1.0); 2]; 2],
            vec![vec![None; 2]; 2],
        );
        let sched = Scheduler::new(&g, &spill).create_schedule(&[p(0, 0)], by_col);
        assert!(sched.cycles.is_empty());
        assert_eq!(sched.order, vec![p(0, 0)]);
    }
}
