//! The trace tree: a persistent prefix structure accumulating traces
//! across packets.
//!
//! Interior nodes partition the packet space the same way the policy
//! did — by loaded field values and tested predicates — and leaves hold
//! the decisions. Looking a packet up costs one node per trace step;
//! compiling the tree walks it once, emitting a prioritized rule per
//! leaf and a "send to controller" sentinel per test node so that
//! packets which would otherwise fall through to a lower priority band
//! come back for further tracing.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::debug;

use crate::backend::Backend;
use crate::bits::Bits;
use crate::flow::{Flow, FlowRef};
use crate::oxm::{Field, FieldSet, Mask};
use crate::packet::Packet;
use crate::trace::{Trace, TraceEntry};
use crate::{Error, Result};

enum Node {
    Unexplored,
    Load {
        mask: Mask,
        cases: HashMap<Bits, Node>,
    },
    /// A load over a virtual field whose children may be shared: many
    /// source keys collapsing to one downstream policy branch.
    VLoad {
        mask: Mask,
        cases: HashMap<Bits, Rc<RefCell<Node>>>,
    },
    Test {
        need: Field,
        id: u64,
        prio: u16,
        positive: Box<Node>,
        negative: Box<Node>,
    },
    Leaf {
        flow: Weak<Flow>,
        prio: u16,
    },
}

/// One deferred rule emission.
#[derive(Debug, Clone)]
pub enum Command {
    /// A "send to controller" sentinel guarding a test node's priority
    /// band.
    BarrierRule {
        priority: u16,
        match_set: FieldSet,
        pred: Field,
        id: u64,
    },
    /// A leaf rule carrying a flow's compiled actions.
    Install {
        priority: u16,
        match_set: FieldSet,
        flow: Weak<Flow>,
    },
}

/// The rules along one augmented path, to be installed between barriers.
#[derive(Debug, Clone, Default)]
pub struct Installer {
    commands: Vec<Command>,
}

impl Installer {
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Send the rules, bracketed by barriers so the switch observes the
    /// activation atomically.
    pub fn run(&self, backend: &mut dyn Backend) -> Result<()> {
        backend.barrier()?;
        for command in &self.commands {
            match command {
                Command::BarrierRule {
                    priority,
                    match_set,
                    pred,
                    id,
                } => backend.barrier_rule(*priority, match_set, pred, *id)?,
                Command::Install {
                    priority,
                    match_set,
                    flow,
                } => {
                    if let Some(flow) = flow.upgrade() {
                        backend.install(*priority, match_set, &flow)?;
                    }
                }
            }
        }
        backend.barrier()
    }
}

/// Where compiled rules go: a live backend, or a command list for
/// deferred installation.
trait RuleSink {
    fn barrier_rule(
        &mut self,
        priority: u16,
        match_set: &FieldSet,
        pred: &Field,
        id: u64,
    ) -> Result<()>;
    fn install(&mut self, priority: u16, match_set: &FieldSet, flow: &FlowRef) -> Result<()>;
}

impl RuleSink for &mut dyn Backend {
    fn barrier_rule(
        &mut self,
        priority: u16,
        match_set: &FieldSet,
        pred: &Field,
        id: u64,
    ) -> Result<()> {
        (**self).barrier_rule(priority, match_set, pred, id)
    }

    fn install(&mut self, priority: u16, match_set: &FieldSet, flow: &FlowRef) -> Result<()> {
        (**self).install(priority, match_set, flow)
    }
}

impl RuleSink for Vec<Command> {
    fn barrier_rule(
        &mut self,
        priority: u16,
        match_set: &FieldSet,
        pred: &Field,
        id: u64,
    ) -> Result<()> {
        self.push(Command::BarrierRule {
            priority,
            match_set: match_set.clone(),
            pred: pred.clone(),
            id,
        });
        Ok(())
    }

    fn install(&mut self, priority: u16, match_set: &FieldSet, flow: &FlowRef) -> Result<()> {
        self.push(Command::Install {
            priority,
            match_set: match_set.clone(),
            flow: Rc::downgrade(flow),
        });
        Ok(())
    }
}

fn midpoint(left: u16, right: u16) -> Result<u16> {
    let mid = ((u32::from(left) + u32::from(right)) / 2) as u16;
    if mid <= left || mid >= right {
        Err(Error::PriorityExceeded { left, right })
    } else {
        Ok(mid)
    }
}

/// `(from·pos + to·neg) / (pos + neg)`, rounded half up. A band with
/// more positive leaves gets its split closer to `from`, leaving the
/// positive side the larger sub-band.
fn weighted_midpoint(from: u16, to: u16, neg: u32, pos: u32) -> u16 {
    let num = u64::from(from) * u64::from(pos) + u64::from(to) * u64::from(neg);
    let den = u64::from(pos) + u64::from(neg);
    ((num + den / 2) / den) as u16
}

/// Convert a node into a `Load` (if unexplored) and descend into the
/// case for `key`, creating it as needed.
fn load_child<'n>(node: &'n mut Node, mask: &Mask, key: &Bits) -> Result<&'n mut Node> {
    if let Node::Unexplored = node {
        *node = Node::Load {
            mask: mask.clone(),
            cases: HashMap::new(),
        };
    }
    match node {
        Node::Load {
            mask: existing,
            cases,
        } => {
            if *existing != *mask {
                return Err(Error::InconsistentTrace);
            }
            Ok(cases.entry(key.clone()).or_insert(Node::Unexplored))
        }
        _ => Err(Error::InconsistentTrace),
    }
}

/// Convert a node into a `VLoad` (if unexplored) and return the shared
/// continuation for `key`, creating it as needed.
fn vload_child(node: &mut Node, mask: &Mask, key: &Bits) -> Result<Rc<RefCell<Node>>> {
    if let Node::Unexplored = node {
        *node = Node::VLoad {
            mask: mask.clone(),
            cases: HashMap::new(),
        };
    }
    match node {
        Node::VLoad {
            mask: existing,
            cases,
        } => {
            if *existing != *mask {
                return Err(Error::InconsistentTrace);
            }
            Ok(cases
                .entry(key.clone())
                .or_insert_with(|| Rc::new(RefCell::new(Node::Unexplored)))
                .clone())
        }
        _ => Err(Error::InconsistentTrace),
    }
}

struct InsertCtx<'a> {
    flow: &'a FlowRef,
    next_id: &'a mut u64,
    match_set: FieldSet,
    commands: Vec<Command>,
    /// Index of the vload entry in the trace, if one was seen.
    vload_at: Option<usize>,
    depth: usize,
}

impl InsertCtx<'_> {
    fn vload_seen(&self) -> bool {
        self.vload_at.is_some()
    }
}

fn insert(
    node: &mut Node,
    entries: &[TraceEntry],
    left: u16,
    right: u16,
    ctx: &mut InsertCtx,
) -> Result<()> {
    let (entry, rest) = match entries.split_first() {
        None => {
            // end of trace: attach or overwrite the leaf
            let (prio, match_set) = match node {
                Node::Unexplored => {
                    let prio = midpoint(left, right)?;
                    *node = Node::Leaf {
                        flow: Rc::downgrade(ctx.flow),
                        prio,
                    };
                    (prio, ctx.match_set.clone())
                }
                Node::Leaf { flow, prio } => {
                    *flow = Rc::downgrade(ctx.flow);
                    (*prio, ctx.match_set.clone())
                }
                _ => return Err(Error::InconsistentTrace),
            };
            ctx.commands.push(Command::Install {
                priority: prio,
                match_set,
                flow: Rc::downgrade(ctx.flow),
            });
            return Ok(());
        }
        Some(split) => split,
    };
    ctx.depth += 1;

    match entry {
        TraceEntry::Load(data) => {
            if !ctx.vload_seen() {
                ctx.match_set.modify(data);
            }
            let child = load_child(node, &data.mask(), data.value_bits())?;
            insert(child, rest, left, right, ctx)
        }
        TraceEntry::Test { pred, outcome } => {
            let created = matches!(node, Node::Unexplored);
            if created {
                let prio = midpoint(left, right)?;
                let id = *ctx.next_id;
                *ctx.next_id += 1;
                *node = Node::Test {
                    need: pred.clone(),
                    id,
                    prio,
                    positive: Box::new(Node::Unexplored),
                    negative: Box::new(Node::Unexplored),
                };
                let mut rule_match = ctx.match_set.clone();
                rule_match.modify(pred);
                ctx.commands.push(Command::BarrierRule {
                    priority: prio,
                    match_set: rule_match,
                    pred: pred.clone(),
                    id,
                });
            }
            match node {
                Node::Test {
                    need,
                    prio,
                    positive,
                    negative,
                    ..
                } => {
                    if *need != *pred {
                        return Err(Error::InconsistentTrace);
                    }
                    // the positive branch raises the lower bound, the
                    // negative branch lowers the upper one
                    let (child, left, right) = if *outcome {
                        (positive.as_mut(), *prio, right)
                    } else {
                        (negative.as_mut(), left, *prio)
                    };
                    if *outcome && !ctx.vload_seen() {
                        ctx.match_set.modify(pred);
                    }
                    insert(child, rest, left, right, ctx)
                }
                _ => Err(Error::InconsistentTrace),
            }
        }
        TraceEntry::VLoad { by, what } => {
            if ctx.vload_seen() {
                // a second virtual branch in one trace is unsupported
                return Err(Error::InconsistentTrace);
            }
            ctx.vload_at = Some(ctx.depth - 1);
            let child = load_child(node, &by.mask(), by.value_bits())?;
            let cont = vload_child(child, &what.mask(), what.value_bits())?;
            let mut shared = cont.borrow_mut();
            insert(&mut shared, rest, left, right, ctx)
        }
    }
}

/// Walk the already-built path for a trace prefix.
fn descend<'n>(mut node: &'n mut Node, entries: &[TraceEntry]) -> Result<&'n mut Node> {
    for entry in entries {
        node = match entry {
            TraceEntry::Load(data) => match node {
                Node::Load { cases, .. } => cases
                    .get_mut(data.value_bits())
                    .ok_or(Error::InconsistentTrace)?,
                _ => return Err(Error::InconsistentTrace),
            },
            TraceEntry::Test { outcome, .. } => match node {
                Node::Test {
                    positive, negative, ..
                } => {
                    if *outcome {
                        positive.as_mut()
                    } else {
                        negative.as_mut()
                    }
                }
                _ => return Err(Error::InconsistentTrace),
            },
            TraceEntry::VLoad { .. } => return Err(Error::InconsistentTrace),
        };
    }
    Ok(node)
}

fn lookup_node<P: Packet + ?Sized>(node: &Node, pkt: &mut P) -> Result<Option<FlowRef>> {
    match node {
        Node::Unexplored => Ok(None),
        Node::Test {
            need,
            positive,
            negative,
            ..
        } => {
            if pkt.test(need)? {
                lookup_node(positive, pkt)
            } else {
                lookup_node(negative, pkt)
            }
        }
        Node::Load { mask, cases } => {
            let key = pkt.load(mask)?.value_bits().clone();
            match cases.get(&key) {
                Some(child) => lookup_node(child, pkt),
                None => Ok(None),
            }
        }
        Node::VLoad { mask, cases } => {
            let key = pkt.load(mask)?.value_bits().clone();
            match cases.get(&key) {
                Some(child) => lookup_node(&child.borrow(), pkt),
                None => Ok(None),
            }
        }
        // a dead weak reference reads as "not found"
        Node::Leaf { flow, .. } => Ok(flow.upgrade()),
    }
}

fn compile_node(node: &Node, match_set: &mut FieldSet, sink: &mut impl RuleSink) -> Result<()> {
    match node {
        Node::Unexplored => Ok(()),
        Node::Test {
            need,
            id,
            prio,
            positive,
            negative,
        } => {
            // the lower band answers packets failing the predicate
            compile_node(negative, match_set, sink)?;
            match_set.modify(need);
            sink.barrier_rule(*prio, match_set, need, *id)?;
            compile_node(positive, match_set, sink)?;
            match_set.erase(&need.mask());
            Ok(())
        }
        Node::Load { mask, cases } => {
            let t = mask.field_type();
            for (key, child) in cases {
                match_set.modify(&Field::from_bits(t, key.clone(), mask.bits().clone()));
                compile_node(child, match_set, sink)?;
                match_set.erase(mask);
            }
            Ok(())
        }
        Node::VLoad { mask, cases } => {
            let t = mask.field_type();
            for (key, child) in cases {
                match_set.modify(&Field::from_bits(t, key.clone(), mask.bits().clone()));
                compile_node(&child.borrow(), match_set, sink)?;
                match_set.erase(mask);
            }
            Ok(())
        }
        Node::Leaf { flow, prio } => {
            if let Some(flow) = flow.upgrade() {
                sink.install(*prio, match_set, &flow)?;
            }
            Ok(())
        }
    }
}

fn count_leaves(node: &Node, depth: &mut HashMap<u64, (u32, u32)>) -> u32 {
    match node {
        Node::Unexplored | Node::Leaf { .. } => 1,
        Node::Load { cases, .. } => cases
            .values()
            .map(|child| count_leaves(child, depth))
            .max()
            .unwrap_or(0),
        Node::VLoad { cases, .. } => cases
            .values()
            .map(|child| count_leaves(&child.borrow(), depth))
            .max()
            .unwrap_or(0),
        Node::Test {
            id,
            positive,
            negative,
            ..
        } => {
            let pos = count_leaves(positive, depth);
            let neg = count_leaves(negative, depth);
            depth.insert(*id, (pos, neg));
            pos + neg + 1
        }
    }
}

fn assign_priorities(node: &mut Node, from: u16, to: u16, depth: &HashMap<u64, (u32, u32)>) {
    match node {
        Node::Unexplored => {}
        Node::Load { cases, .. } => {
            for child in cases.values_mut() {
                assign_priorities(child, from, to, depth);
            }
        }
        Node::VLoad { cases, .. } => {
            for child in cases.values() {
                assign_priorities(&mut child.borrow_mut(), from, to, depth);
            }
        }
        Node::Test {
            id,
            prio,
            positive,
            negative,
            ..
        } => {
            let (pos, neg) = depth.get(id).copied().unwrap_or((1, 1));
            let mut mid = weighted_midpoint(from, to, neg, pos);
            // on a degenerate split prefer a still-valid existing value
            if (mid <= from || mid >= to) && *prio > from && *prio < to {
                mid = *prio;
            }
            assign_priorities(negative, from, mid, depth);
            assign_priorities(positive, mid, to, depth);
            *prio = mid;
        }
        Node::Leaf { prio, .. } => {
            *prio = weighted_midpoint(from, to, 1, 1);
        }
    }
}

/// The tree of traces observed so far, with the open priority interval
/// its rules live in.
pub struct TraceTree {
    root: Node,
    left: u16,
    right: u16,
    next_id: u64,
}

impl TraceTree {
    /// An empty tree over the open priority interval `priority_range`.
    pub fn new(priority_range: (u16, u16)) -> TraceTree {
        TraceTree {
            root: Node::Unexplored,
            left: priority_range.0,
            right: priority_range.1,
            next_id: 1,
        }
    }

    /// Map a packet to its previously-computed flow, if the tree already
    /// covers its equivalence class. O(trace depth).
    pub fn lookup<P: Packet + ?Sized>(&self, pkt: &mut P) -> Result<Option<FlowRef>> {
        lookup_node(&self.root, pkt)
    }

    /// Fold one recorded trace into the tree, attaching `flow` at the
    /// leaf. Returns the deferred installer for exactly the rules along
    /// the augmented path.
    pub fn augment(&mut self, trace: &Trace, flow: &FlowRef) -> Result<Installer> {
        let mut ctx = InsertCtx {
            flow,
            next_id: &mut self.next_id,
            match_set: FieldSet::new(),
            commands: Vec::new(),
            vload_at: None,
            depth: 0,
        };
        insert(&mut self.root, trace.entries(), self.left, self.right, &mut ctx)?;
        let vload_at = ctx.vload_at;
        let mut commands = ctx.commands;

        if let Some(at) = vload_at {
            self.connect_virtual(trace, at, flow, &mut commands)?;
        }

        debug!(
            "augmented trace of {} entries, {} rules to install",
            trace.entries().len(),
            commands.len()
        );
        Ok(Installer { commands })
    }

    /// After a vload trace, connect every source key the flow projects
    /// onto the same continuation, and re-emit the rules of the whole
    /// subtree since new cases appeared under it.
    fn connect_virtual(
        &mut self,
        trace: &Trace,
        vload_at: usize,
        flow: &FlowRef,
        commands: &mut Vec<Command>,
    ) -> Result<()> {
        let (by, what) = match &trace.entries()[vload_at] {
            TraceEntry::VLoad { by, what } => (by.clone(), what.clone()),
            _ => return Err(Error::InconsistentTrace),
        };
        let prefix = &trace.entries()[..vload_at];

        let cont = {
            let parent = descend(&mut self.root, prefix)?;
            let child = load_child(parent, &by.mask(), by.value_bits())?;
            vload_child(child, &what.mask(), what.value_bits())?
        };

        for (by_field, what_field) in flow.virtual_fields(&by.mask(), &what.mask()) {
            let parent = descend(&mut self.root, prefix)?;
            let middle = load_child(parent, &by_field.mask(), by_field.value_bits())?;
            if let Node::Unexplored = middle {
                *middle = Node::VLoad {
                    mask: what_field.mask(),
                    cases: HashMap::new(),
                };
            }
            match middle {
                Node::VLoad { cases, .. } => {
                    cases.insert(what_field.value_bits().clone(), cont.clone());
                }
                _ => return Err(Error::InconsistentTrace),
            }
        }

        // rebuild the command list from the subtree at the vload point:
        // the freshly connected cases need rules too
        commands.clear();
        let mut match_set = FieldSet::new();
        for entry in prefix {
            match entry {
                TraceEntry::Load(data) => match_set.modify(data),
                TraceEntry::Test {
                    pred,
                    outcome: true,
                } => match_set.modify(pred),
                _ => {}
            }
        }
        let parent = descend(&mut self.root, prefix)?;
        compile_node(parent, &mut match_set, commands)
    }

    /// Re-emit every rule of the tree: clear the reactive table, then
    /// compile all nodes, bracketed by barriers.
    pub fn commit(&self, backend: &mut dyn Backend) -> Result<()> {
        backend.remove_all(&FieldSet::new())?;
        backend.barrier()?;
        self.compile(backend)?;
        backend.barrier()
    }

    /// Walk the whole tree emitting its rules into `backend`.
    pub fn compile(&self, backend: &mut dyn Backend) -> Result<()> {
        let mut match_set = FieldSet::new();
        let mut sink: &mut dyn Backend = backend;
        compile_node(&self.root, &mut match_set, &mut sink)
    }

    /// Recompute priorities across the tree: each test's split point is
    /// weighted by the leaf counts of its branches, making room where
    /// the plain midpoint rule collapsed.
    pub fn update(&mut self) {
        let mut depth = HashMap::new();
        count_leaves(&self.root, &mut depth);
        assign_priorities(&mut self.root, self.left, self.right, &depth);
    }
}
