//! Package-level trigger engine — spec.md §4.6, grounded in `pyrpm`'s
//! `_Triggers` index and the `RPMSENSE_TRIGGER*` phase constants.
//!
//! Only the five package-level phases spec.md §4.6 names (`%triggerin`,
//! `%triggerun`, `%triggerpostun` split into "old"/"any" ordering) are
//! implemented. File triggers (`%filetriggerin` etc.) and transaction
//! triggers (`%transfiletriggerin` etc.) are a documented Non-goal — see
//! DESIGN.md — since the `pyrpm` source this crate is grounded on never
//! implements them either.

use crate::database::{Database, PackageId};
use crate::flags::DependencyFlags;
use crate::package::Package;
use crate::version::{range_overlap, Evr, SenseFlags};
use std::collections::HashMap;

const TRIGGER_MASK: DependencyFlags = DependencyFlags::TRIGGERPREIN
    .union(DependencyFlags::TRIGGERIN)
    .union(DependencyFlags::TRIGGERUN)
    .union(DependencyFlags::TRIGGERPOSTUN);

struct Entry {
    phase: DependencyFlags,
    evr: Evr,
    interp: String,
    script: String,
    owner: PackageId,
}

/// A trigger scriptlet selected to run, with its two conventional
/// integer arguments (spec.md §4.6: "Scriptlet args are `(count of owner
/// name in db, count of target name in db + 1)`" for the install phase;
/// the same two-slot convention is reused for the erase phases).
#[derive(Debug, Clone)]
pub struct FiredTrigger {
    pub owner: PackageId,
    pub interp: String,
    pub script: String,
    pub args: (u32, u32),
}

/// Index of every package's triggers, keyed by the name the trigger
/// watches. Built fresh per transaction from the pending install set plus
/// the installed database, since the set of active triggers changes as
/// packages come and go.
#[derive(Default)]
pub struct TriggerEngine {
    index: HashMap<String, Vec<Entry>>,
}

impl TriggerEngine {
    pub fn new() -> Self {
        TriggerEngine::default()
    }

    pub fn index_package(&mut self, id: PackageId, pkg: &Package) {
        for t in &pkg.triggers {
            self.index.entry(t.name.clone()).or_default().push(Entry {
                phase: t.sense_flags,
                evr: t.evr.clone(),
                interp: t.interp.clone(),
                script: t.script.clone(),
                owner: id,
            });
        }
    }

    /// Build an engine over every package currently in `db`.
    pub fn build(db: &Database) -> Self {
        let mut engine = TriggerEngine::new();
        for (id, pkg) in db.iter() {
            engine.index_package(id, pkg);
        }
        engine
    }

    /// Entries watching `name` whose phase bit matches and whose EVR
    /// range (if any) is satisfied by `target_evr` (spec.md §4.6
    /// "Matching").
    fn matching(&self, name: &str, phase: DependencyFlags, target_evr: &Evr) -> Vec<&Entry> {
        self.index
            .get(name)
            .into_iter()
            .flatten()
            .filter(|e| {
                (e.phase & TRIGGER_MASK) == phase
                    && (e.evr == Evr::default()
                        || range_overlap(e.phase.sense(), &e.evr, SenseFlags::EQUAL, target_evr))
            })
            .collect()
    }

    fn emit(&self, db: &Database, target_name: &str, entries: Vec<&Entry>, target_delta: u32) -> Vec<FiredTrigger> {
        entries
            .into_iter()
            .map(|e| {
                let owner_name = db.get(e.owner).map(|p| p.name.as_str()).unwrap_or_default();
                let count_owner = db.by_name(owner_name).len() as u32;
                let count_target = db.by_name(target_name).len() as u32 + target_delta;
                FiredTrigger {
                    owner: e.owner,
                    interp: e.interp.clone(),
                    script: e.script.clone(),
                    args: (count_owner, count_target),
                }
            })
            .collect()
    }

    /// Fire on install/update of `target` after filesystem extraction:
    /// any-`%triggerin` first, then the target's own `%triggerin`.
    pub fn fire_install(
        &self,
        db: &Database,
        target: PackageId,
        target_name: &str,
        target_evr: &Evr,
    ) -> Vec<FiredTrigger> {
        let matches = self.matching(target_name, DependencyFlags::TRIGGERIN, target_evr);
        let (own, any): (Vec<&Entry>, Vec<&Entry>) = matches.into_iter().partition(|e| e.owner == target);
        let mut out = self.emit(db, target_name, any, 1);
        out.extend(self.emit(db, target_name, own, 1));
        out
    }

    /// Fire before removal of `target`: its own `%triggerun` first, then
    /// any other package's `%triggerun` watching its name.
    pub fn fire_erase_before(
        &self,
        db: &Database,
        target: PackageId,
        target_name: &str,
        target_evr: &Evr,
    ) -> Vec<FiredTrigger> {
        let matches = self.matching(target_name, DependencyFlags::TRIGGERUN, target_evr);
        let (own, any): (Vec<&Entry>, Vec<&Entry>) = matches.into_iter().partition(|e| e.owner == target);
        let mut out = self.emit(db, target_name, own, 0);
        out.extend(self.emit(db, target_name, any, 0));
        out
    }

    /// Fire after removal of `target`: its own `%triggerpostun` first,
    /// then any other package's `%triggerpostun`.
    pub fn fire_erase_after(
        &self,
        db: &Database,
        target: PackageId,
        target_name: &str,
        target_evr: &Evr,
    ) -> Vec<FiredTrigger> {
        let matches = self.matching(target_name, DependencyFlags::TRIGGERPOSTUN, target_evr);
        let (own, any): (Vec<&Entry>, Vec<&Entry>) = matches.into_iter().partition(|e| e.owner == target);
        let mut out = self.emit(db, target_name, own, 0);
        out.extend(self.emit(db, target_name, any, 0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Header, RType, Tag, Tags};
    use crate::package::Package;

    fn pkg_with_trigger(name: &str, trigger_name: &str, phase: DependencyFlags) -> Package {
        let mut main = Tags::default();
        main.insert(Tag::Name, RType::String(name.to_string()));
        main.insert(Tag::Version, RType::String("1".to_string()));
        main.insert(Tag::Release, RType::String("1".to_string()));
        main.insert(Tag::Arch, RType::String("x86_64".to_string()));
        main.insert(Tag::Triggername, RType::StringArray(vec![trigger_name.to_string()]));
        main.insert(Tag::Triggerflags, RType::Int32Array(vec![phase.bits()]));
        main.insert(Tag::Triggerversion, RType::StringArray(vec![String::new()]));
        main.insert(Tag::Triggerindex, RType::Int32Array(vec![0]));
        main.insert(Tag::Triggerscripts, RType::StringArray(vec!["echo hi".to_string()]));

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
    fn install_fires_any_then_own_triggerin() {
        let mut db = Database::new();
        let watcher = db.add_package(pkg_with_trigger("watcher", "target", DependencyFlags::TRIGGERIN));
        let target = db.add_package(pkg_with_trigger("target", "target", DependencyFlags::TRIGGERIN));

        let engine = TriggerEngine::build(&db);
        let fired = engine.fire_install(&db, target, "target", &db.get(target).unwrap().evr);

        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].owner, watcher);
        assert_eq!(fired[1].owner, target);
    }

    #[test]
    fn non_matching_phase_does_not_fire() {
        let mut db = Database::new();
        let target = db.add_package(pkg_with_trigger("target", "target", DependencyFlags::TRIGGERUN));

        let engine = TriggerEngine::build(&db);
        let fired = engine.fire_install(&db, target, "target", &db.get(target).unwrap().evr);
        assert!(fired.is_empty());
    }
}
