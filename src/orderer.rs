//! Install/erase orderer: builds a requires-based dependency graph over a
//! resolved transaction, detects and breaks cycles by weighted edge
//! removal, and emits a safe sequential schedule — spec.md §4.5, grounded
//! in `pyrpm/orderer.py`'s `RpmOrderer`.

use crate::config::Config;
use crate::database::{Database, PackageId};
use crate::error::{Error, ResolveError};
use crate::flags::DependencyFlags;
use crate::version::range_overlap;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install,
    Update,
    Erase,
}

#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub operation: Operation,
    pub package: PackageId,
}

/// Edge weight: a *hard* dependency (weight 2) must be satisfied before the
/// requiring scriptlet may run at all; a *soft* one (weight 1) is an
/// ordinary ordering preference broken first when a cycle must be cut.
const HARD: u8 = 2;
const SOFT: u8 = 1;

/// `u -> v` means "u must be installed after v". Nodes with no edges at
/// all are still present (spec.md §4.5: "a package with an empty
/// resolved-dependency set still gets an ... node inserted"), which is why
/// `nodes` is tracked separately from `out`/`inn`.
#[derive(Default)]
struct Graph {
    nodes: BTreeSet<PackageId>,
    out: BTreeMap<PackageId, BTreeMap<PackageId, u8>>,
    inn: BTreeMap<PackageId, BTreeMap<PackageId, u8>>,
}

impl Graph {
    fn new(nodes: impl IntoIterator<Item = PackageId>) -> Self {
        let nodes: BTreeSet<PackageId> = nodes.into_iter().collect();
        let out = nodes.iter().map(|&n| (n, BTreeMap::new())).collect();
        let inn = nodes.iter().map(|&n| (n, BTreeMap::new())).collect();
        Graph { nodes, out, inn }
    }

    /// Hard wins when the same edge is added twice (spec.md §4.5).
    fn add_edge(&mut self, u: PackageId, v: PackageId, weight: u8) {
        let slot = self.out.entry(u).or_default().entry(v).or_insert(0);
        *slot = (*slot).max(weight);
        let slot = self.inn.entry(v).or_default().entry(u).or_insert(0);
        *slot = (*slot).max(weight);
    }

    fn remove_edge(&mut self, u: PackageId, v: PackageId) {
        if let Some(m) = self.out.get_mut(&u) {
            m.remove(&v);
        }
        if let Some(m) = self.inn.get_mut(&v) {
            m.remove(&u);
        }
    }

    fn remove_node(&mut self, n: PackageId) {
        self.nodes.remove(&n);
        if let Some(succs) = self.out.remove(&n) {
            for v in succs.keys() {
                if let Some(m) = self.inn.get_mut(v) {
                    m.remove(&n);
                }
            }
        }
        if let Some(preds) = self.inn.remove(&n) {
            for u in preds.keys() {
                if let Some(m) = self.out.get_mut(u) {
                    m.remove(&n);
                }
            }
        }
    }

    fn out_degree(&self, n: PackageId) -> usize {
        self.out.get(&n).map_or(0, BTreeMap::len)
    }

    fn in_degree(&self, n: PackageId) -> usize {
        self.inn.get(&n).map_or(0, BTreeMap::len)
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Ported from `orderer.py`'s `_operationFlag`: a legacy prereq counts
/// toward *both* the install-like and erase-like side of the test, so
/// `install_like`/`erase_like` each fold it in separately rather than
/// being mutually exclusive bits. For the install graph: a require that
/// carries any erase-phase bit never orders (0), one that carries an
/// install/update/legacy bit and no erase bit is hard, anything else
/// (neither bit set) is soft. The erase graph is the mirror image.
fn classify(flags: DependencyFlags, erase_mode: bool) -> u8 {
    let legacy = flags.is_legacy_prereq();
    let install_like = flags.is_install_prereq() || legacy;
    let erase_like = flags.is_erase_prereq() || legacy;
    if erase_mode {
        if install_like {
            0
        } else if erase_like {
            HARD
        } else {
            SOFT
        }
    } else if erase_like {
        0
    } else if install_like {
        HARD
    } else {
        SOFT
    }
}

/// Resolve every `node`'s requires against the *other nodes in this set
/// only* (spec.md §4.5: "a transient Resolver over only the install set"),
/// classify each satisfied one, and add the corresponding edge.
fn build_graph(db: &Database, node_ids: &[PackageId], erase_mode: bool) -> Graph {
    let members: BTreeSet<PackageId> = node_ids.iter().copied().collect();
    let mut g = Graph::new(members.iter().copied());

    for &u in &members {
        let Some(pu) = db.get(u) else { continue };
        for dep in &pu.requires {
            if dep.is_pseudo() {
                continue;
            }
            for &v in &members {
                if v == u {
                    continue;
                }
                let Some(pv) = db.get(v) else { continue };
                let satisfied = pv.provides.iter().any(|pd| {
                    pd.name == dep.name
                        && range_overlap(dep.flags.sense(), &dep.evr, pd.flags.sense(), &pd.evr)
                });
                if !satisfied {
                    continue;
                }
                let weight = classify(dep.flags, erase_mode);
                if weight > 0 {
                    g.add_edge(u, v, weight);
                }
            }
        }
    }
    g
}

/// Enumerate simple cycles by DFS from every node, tracking the in-path
/// set so only the starting vertex may close a cycle. Capped to bound
/// pathological blowup on dense graphs; in practice transaction graphs are
/// small enough that the cap is never hit.
fn find_cycles(g: &Graph) -> Vec<Vec<PackageId>> {
    const MAX_CYCLES: usize = 20_000;
    let mut cycles = Vec::new();

    for &start in &g.nodes {
        let mut stack = vec![start];
        let mut on_stack: BTreeSet<PackageId> = BTreeSet::from([start]);
        dfs_cycles(g, start, &mut stack, &mut on_stack, &mut cycles, MAX_CYCLES);
        if cycles.len() >= MAX_CYCLES {
            break;
        }
    }
    cycles
}

fn dfs_cycles(
    g: &Graph,
    start: PackageId,
    stack: &mut Vec<PackageId>,
    on_stack: &mut BTreeSet<PackageId>,
    cycles: &mut Vec<Vec<PackageId>>,
    cap: usize,
) {
    if cycles.len() >= cap {
        return;
    }
    let current = *stack.last().unwrap();
    let Some(succs) = g.out.get(&current) else { return };
    for &next in succs.keys() {
        if next == start {
            if stack.len() > 1 {
                cycles.push(stack.clone());
            }
            continue;
        }
        if on_stack.contains(&next) {
            continue;
        }
        stack.push(next);
        on_stack.insert(next);
        dfs_cycles(g, start, stack, on_stack, cycles, cap);
        stack.pop();
        on_stack.remove(&next);
        if cycles.len() >= cap {
            return;
        }
    }
}

/// Break exactly one edge that participates in the most detected cycles,
/// preferring a soft edge over a hard one (spec.md §4.5 point 3). Returns
/// `false` if the graph has no cycle left to break.
fn break_one_cycle(g: &mut Graph, warnings: &mut Vec<String>) -> bool {
    let cycles = find_cycles(g);
    if cycles.is_empty() {
        return false;
    }

    let mut counts: HashMap<(PackageId, PackageId), usize> = HashMap::new();
    for cyc in &cycles {
        for w in cyc.windows(2) {
            *counts.entry((w[0], w[1])).or_insert(0) += 1;
        }
        *counts.entry((*cyc.last().unwrap(), cyc[0])).or_insert(0) += 1;
    }

    let mut best_soft: Option<(PackageId, PackageId, usize)> = None;
    let mut best_hard: Option<(PackageId, PackageId, usize)> = None;
    for (&(u, v), &c) in &counts {
        let Some(&weight) = g.out.get(&u).and_then(|m| m.get(&v)) else { continue };
        let slot = if weight >= HARD { &mut best_hard } else { &mut best_soft };
        if slot.map_or(true, |(_, _, bc)| c > bc) {
            *slot = Some((u, v, c));
        }
    }

    if let Some((u, v, _)) = best_soft {
        g.remove_edge(u, v);
        true
    } else if let Some((u, v, _)) = best_hard {
        g.remove_edge(u, v);
        warnings.push(format!(
            "zap: removed hard edge {u} -> {v} to break an otherwise unbreakable cycle"
        ));
        true
    } else {
        false
    }
}

/// Drive the graph to empty per spec.md §4.5's "Topological emission":
/// repeatedly strip zero-out-degree nodes into `tail`, then emit the
/// zero-in-degree node with maximum out-degree; when neither makes
/// progress the remaining nodes form a cycle, broken one edge at a time.
fn emit_order(mut g: Graph) -> Result<(Vec<PackageId>, Vec<PackageId>), Error> {
    let mut main = Vec::new();
    let mut tail = Vec::new();
    let mut warnings = Vec::new();

    while !g.is_empty() {
        let mut progressed = false;

        while let Some(&leaf) = g.nodes.iter().find(|&&n| g.out_degree(n) == 0) {
            g.remove_node(leaf);
            tail.push(leaf);
            progressed = true;
        }
        if g.is_empty() {
            break;
        }

        if let Some(&pick) = g
            .nodes
            .iter()
            .filter(|&&n| g.in_degree(n) == 0)
            .max_by_key(|&&n| (g.out_degree(n), std::cmp::Reverse(n)))
        {
            g.remove_node(pick);
            main.push(pick);
            progressed = true;
        }

        if !progressed && !break_one_cycle(&mut g, &mut warnings) {
            return Err(ResolveError::CycleUnbreakable(g.nodes.len()).into());
        }
    }

    for w in warnings {
        log::warn!("{w}");
    }
    Ok((main, tail))
}

/// Flatten a (main, tail) emission pair into the actual install order.
fn linearize(g: Graph) -> Result<Vec<PackageId>, Error> {
    let (mut main, tail) = emit_order(g)?;
    main.extend(tail);
    Ok(main)
}

pub struct Orderer {
    config: Config,
}

impl Orderer {
    pub fn new(config: Config) -> Self {
        Orderer { config }
    }

    /// Order a resolved transaction into executable steps. `updates` and
    /// `obsoletes` map a newly installed package to the old packages it
    /// replaces; each is emitted as a mini `ERASE` sequence immediately
    /// following its replacement's `INSTALL`/`UPDATE` step (spec.md §4.5
    /// "Per-node transaction emission"). Plain `erases` (not tied to an
    /// update) are ordered last, in reverse install order.
    pub fn order(
        &self,
        db: &Database,
        installs: &[PackageId],
        updates: &HashMap<PackageId, Vec<PackageId>>,
        obsoletes: &HashMap<PackageId, Vec<PackageId>>,
        erases: &[PackageId],
    ) -> Result<Vec<Step>, Error> {
        if self.config.noorder {
            return Ok(self.order_unordered(installs, updates, obsoletes, erases));
        }

        let install_order = linearize(build_graph(db, installs, false))?;

        let covered: BTreeSet<PackageId> = updates
            .values()
            .chain(obsoletes.values())
            .flatten()
            .copied()
            .collect();
        let plain_erases: Vec<PackageId> = erases.iter().copied().filter(|e| !covered.contains(e)).collect();
        let mut erase_order = linearize(build_graph(db, &plain_erases, true))?;
        erase_order.reverse();

        let mut steps = Vec::with_capacity(installs.len() + erases.len());
        for p in install_order {
            let op = if updates.contains_key(&p) { Operation::Update } else { Operation::Install };
            steps.push(Step { operation: op, package: p });

            let sub: Vec<PackageId> = updates
                .get(&p)
                .into_iter()
                .chain(obsoletes.get(&p))
                .flatten()
                .copied()
                .collect();
            if !sub.is_empty() {
                let mut sub_order = linearize(build_graph(db, &sub, true))?;
                sub_order.reverse();
                for q in sub_order {
                    steps.push(Step { operation: Operation::Erase, package: q });
                }
            }
        }
        for p in erase_order {
            steps.push(Step { operation: Operation::Erase, package: p });
        }

        Ok(steps)
    }

    fn order_unordered(
        &self,
        installs: &[PackageId],
        updates: &HashMap<PackageId, Vec<PackageId>>,
        obsoletes: &HashMap<PackageId, Vec<PackageId>>,
        erases: &[PackageId],
    ) -> Vec<Step> {
        let covered: BTreeSet<PackageId> = updates
            .values()
            .chain(obsoletes.values())
            .flatten()
            .copied()
            .collect();
        let mut steps = Vec::new();
        for &p in installs {
            let op = if updates.contains_key(&p) { Operation::Update } else { Operation::Install };
            steps.push(Step { operation: op, package: p });
            for &q in updates.get(&p).into_iter().chain(obsoletes.get(&p)).flatten() {
                steps.push(Step { operation: Operation::Erase, package: q });
            }
        }
        for &p in erases {
            if !covered.contains(&p) {
                steps.push(Step { operation: Operation::Erase, package: p });
            }
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::DependencyFlags;
    use crate::header::{Header, RType, Tag, Tags};
    use crate::package::Package;
    use crate::version::Evr;

    fn pkg(name: &str, requires: &[&str]) -> Package {
        let mut main = Tags::default();
        main.insert(Tag::Name, RType::String(name.to_string()));
        main.insert(Tag::Version, RType::String("1".to_string()));
        main.insert(Tag::Release, RType::String("1".to_string()));
        main.insert(Tag::Arch, RType::String("x86_64".to_string()));
        main.insert(Tag::ProvideName, RType::StringArray(vec![name.to_string()]));
        main.insert(Tag::Provideflags, RType::Int32Array(vec![DependencyFlags::EQUAL.bits()]));
        main.insert(Tag::Provideversion, RType::StringArray(vec!["1".to_string()]));

        let req_names: Vec<String> = requires.iter().map(|s| s.to_string()).collect();
        let n = req_names.len();
        main.insert(Tag::RequireName, RType::StringArray(req_names));
        main.insert(Tag::RequireFlags, RType::Int32Array(vec![DependencyFlags::INTERP.bits(); n]));
        main.insert(Tag::RequireVersion, RType::StringArray(vec![String::new(); n]));

        let header = Header {
            lead: crate::header::HeaderLead::default(),
            signature: Default::default(),
            main,
            main_header_start: 0,
            payload_offset: 0,
        };
        Package::from_header(header, None).unwrap()
    }

    #[test]
    fn simple_chain_orders_dependencies_first() {
        let mut db = Database::new();
        let a = db.add_package(pkg("a", &[]));
        let b = db.add_package(pkg("b", &["a"]));
        let c = db.add_package(pkg("c", &["b"]));

        let orderer = Orderer::new(Config::default());
        let steps = orderer
            .order(&db, &[a, b, c], &HashMap::new(), &HashMap::new(), &[])
            .unwrap();
        let order: Vec<PackageId> = steps.iter().map(|s| s.package).collect();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn mutual_interp_cycle_breaks_into_some_order() {
        let mut db = Database::new();
        let a = db.add_package(pkg("a", &["b"]));
        let b = db.add_package(pkg("b", &["a"]));

        let orderer = Orderer::new(Config::default());
        let steps = orderer
            .order(&db, &[a, b], &HashMap::new(), &HashMap::new(), &[])
            .unwrap();
        let order: Vec<PackageId> = steps.iter().map(|s| s.package).collect();
        assert!(order == vec![a, b] || order == vec![b, a]);
    }

    #[test]
    fn update_emits_erase_of_old_right_after_new() {
        let mut db = Database::new();
        let old = db.add_package(pkg("a", &[]));
        let new = db.add_package(pkg("a", &[]));
        let mut updates = HashMap::new();
        updates.insert(new, vec![old]);

        let orderer = Orderer::new(Config::default());
        let steps = orderer.order(&db, &[new], &updates, &HashMap::new(), &[]).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].package, new);
        assert!(matches!(steps[0].operation, Operation::Update));
        assert_eq!(steps[1].package, old);
        assert!(matches!(steps[1].operation, Operation::Erase));
    }

    #[test]
    fn plain_erases_come_last_in_reverse() {
        let mut db = Database::new();
        let a = db.add_package(pkg("a", &[]));
        let b = db.add_package(pkg("b", &["a"]));

        let orderer = Orderer::new(Config::default());
        let steps = orderer.order(&db, &[], &HashMap::new(), &HashMap::new(), &[a, b]).unwrap();
        let order: Vec<PackageId> = steps.iter().map(|s| s.package).collect();
        assert_eq!(order, vec![b, a]);
    }
}
