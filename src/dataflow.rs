//! Instruction-level liveness and def-use chains over a [`UnitGraph`].

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::cfg::UnitGraph;
use crate::ir::Body;

pub(crate) type LocalId = usize;

/// Dense numbering of the locals a body declares or references.
///
/// Declared locals come first in declaration order. Locals that are read or
/// written without a declaration follow with type `unknown`.
#[derive(Clone, Debug, Default)]
pub(crate) struct Locals {
    names: Vec<String>,
    types: Vec<String>,
    index: HashMap<String, LocalId>,
}

impl Locals {
    pub(crate) fn collect(body: &Body) -> Self {
        let mut locals = Locals::default();
        for decl in &body.locals {
            locals.intern(&decl.name, &decl.ty);
        }
        for inst in &body.instructions {
            if let Some(def) = inst.stmt.defined_local() {
                locals.intern(def, "unknown");
            }
            for used in inst.stmt.used_locals() {
                locals.intern(used, "unknown");
            }
        }
        locals
    }

    fn intern(&mut self, name: &str, ty: &str) -> LocalId {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = self.names.len();
        self.names.push(name.to_string());
        self.types.push(ty.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    pub(crate) fn id(&self, name: &str) -> Option<LocalId> {
        self.index.get(name).copied()
    }

    pub(crate) fn name(&self, id: LocalId) -> &str {
        &self.names[id]
    }

    /// Declared type of a local, `unknown` when undeclared.
    pub(crate) fn type_of(&self, id: LocalId) -> &str {
        &self.types[id]
    }
}

/// Per-instruction definition and use sets.
#[derive(Clone, Debug)]
pub(crate) struct DefUse {
    defs: Vec<Option<LocalId>>,
    uses: Vec<Vec<LocalId>>,
}

impl DefUse {
    pub(crate) fn compute(body: &Body, locals: &Locals) -> Self {
        let mut defs = Vec::with_capacity(body.instructions.len());
        let mut uses = Vec::with_capacity(body.instructions.len());
        for inst in &body.instructions {
            defs.push(inst.stmt.defined_local().and_then(|name| locals.id(name)));
            let mut used = Vec::new();
            for id in inst.stmt.used_locals().into_iter().filter_map(|name| locals.id(name)) {
                if !used.contains(&id) {
                    used.push(id);
                }
            }
            uses.push(used);
        }
        DefUse { defs, uses }
    }

    /// Local written by `instr`, if it writes a plain local.
    pub(crate) fn def(&self, instr: usize) -> Option<LocalId> {
        self.defs[instr]
    }

    /// Locals read by `instr`, deduplicated, in operand order.
    pub(crate) fn uses(&self, instr: usize) -> &[LocalId] {
        &self.uses[instr]
    }
}

/// Backward may-analysis of live locals.
#[derive(Clone, Debug)]
pub(crate) struct LiveLocals {
    live_before: Vec<BTreeSet<LocalId>>,
    live_after: Vec<BTreeSet<LocalId>>,
}

impl LiveLocals {
    pub(crate) fn compute(units: &UnitGraph, facts: &DefUse) -> Self {
        let len = units.len();
        let mut live_before = vec![BTreeSet::new(); len];
        let mut live_after = vec![BTreeSet::new(); len];

        let mut worklist: VecDeque<usize> = (0..len).rev().collect();
        let mut queued = vec![true; len];
        while let Some(instr) = worklist.pop_front() {
            queued[instr] = false;

            let mut after = BTreeSet::new();
            for succ in units.succs(instr) {
                after.extend(live_before[*succ].iter().copied());
            }
            let mut before = after.clone();
            if let Some(def) = facts.def(instr) {
                before.remove(&def);
            }
            before.extend(facts.uses(instr).iter().copied());
            live_after[instr] = after;

            if before != live_before[instr] {
                live_before[instr] = before;
                for pred in units.preds(instr) {
                    if !queued[*pred] {
                        queued[*pred] = true;
                        worklist.push_back(*pred);
                    }
                }
            }
        }

        LiveLocals {
            live_before,
            live_after,
        }
    }

    pub(crate) fn live_after(&self, instr: usize) -> &BTreeSet<LocalId> {
        &self.live_after[instr]
    }
}

/// Forward may-analysis of the local-defining instructions reaching each
/// instruction.
#[derive(Clone, Debug)]
pub(crate) struct ReachingDefs {
    reach_in: Vec<BTreeSet<usize>>,
}

impl ReachingDefs {
    pub(crate) fn compute(units: &UnitGraph, facts: &DefUse) -> Self {
        let len = units.len();
        let mut reach_in = vec![BTreeSet::new(); len];
        let mut reach_out: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); len];

        let mut worklist: VecDeque<usize> = (0..len).collect();
        let mut queued = vec![true; len];
        while let Some(instr) = worklist.pop_front() {
            queued[instr] = false;

            let mut incoming = BTreeSet::new();
            for pred in units.preds(instr) {
                incoming.extend(reach_out[*pred].iter().copied());
            }
            let mut outgoing = incoming.clone();
            if let Some(def) = facts.def(instr) {
                outgoing.retain(|other| facts.def(*other) != Some(def));
                outgoing.insert(instr);
            }
            reach_in[instr] = incoming;

            if outgoing != reach_out[instr] {
                reach_out[instr] = outgoing;
                for succ in units.succs(instr) {
                    if !queued[*succ] {
                        queued[*succ] = true;
                        worklist.push_back(*succ);
                    }
                }
            }
        }

        ReachingDefs { reach_in }
    }

    /// Definitions reaching the point just before `instr`.
    pub(crate) fn reaching(&self, instr: usize) -> &BTreeSet<usize> {
        &self.reach_in[instr]
    }
}

/// A read of `local` at instruction `instr`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct UseSite {
    pub(crate) instr: usize,
    pub(crate) local: LocalId,
}

/// Def-use chains: for each defining instruction, the uses it reaches.
#[derive(Clone, Debug)]
pub(crate) struct LocalUses {
    uses: Vec<Vec<UseSite>>,
}

impl LocalUses {
    pub(crate) fn compute(units: &UnitGraph, facts: &DefUse) -> Self {
        let reaching = ReachingDefs::compute(units, facts);
        let mut uses = vec![Vec::new(); units.len()];
        for instr in 0..units.len() {
            for local in facts.uses(instr) {
                for def in reaching.reaching(instr) {
                    if facts.def(*def) == Some(*local) {
                        uses[*def].push(UseSite {
                            instr,
                            local: *local,
                        });
                    }
                }
            }
        }
        LocalUses { uses }
    }

    /// Uses reached by the definition at `def`, ascending by instruction.
    pub(crate) fn uses_of(&self, def: usize) -> &[UseSite] {
        &self.uses[def]
    }
}
