//! A flow: one leaf's decision plus its lifecycle and per-switch
//! packet-in context.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::decision::{Decision, DecisionData};
use crate::oxm::{Field, FieldSet, Mask};
use crate::packet::Packet;
use crate::trace::tree::Installer;
use crate::wire::OFP_NO_BUFFER;
use crate::Result;

/// The reserved high half of the cookie space; the low 32 bits are the
/// flow id.
pub const COOKIE_BASE: u64 = 0x1_0000_0000;
/// Cookie mask selecting the reserved space in flow-mod deletes.
pub const COOKIE_MASK: u64 = 0xffff_ffff_0000_0000;

/// Flow lifecycle.
///
/// `Egg` on creation, `Active` once installed, `Evicted` on explicit
/// delete, `Idle` on idle timeout, `Expired` (terminal) on hard timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Egg,
    Active,
    Evicted,
    Idle,
    Expired,
}

/// Pending packet-in bookkeeping for one switch, consumed by the next
/// install.
#[derive(Debug, Clone)]
pub struct SwitchContext {
    pub packet_in: bool,
    pub buffer_id: u32,
    pub in_port: u32,
    pub xid: u32,
    pub frame: Vec<u8>,
}

impl Default for SwitchContext {
    fn default() -> SwitchContext {
        SwitchContext {
            packet_in: false,
            buffer_id: OFP_NO_BUFFER,
            in_port: 0,
            xid: 0,
            frame: Vec::new(),
        }
    }
}

/// A shared flow. The runtime's flow table owns the strong references;
/// trace-tree leaves hold weak ones.
pub type FlowRef = Rc<Flow>;

#[derive(Debug)]
pub struct Flow {
    cookie: u64,
    state: Cell<FlowState>,
    decision: RefCell<Decision>,
    mods: RefCell<FieldSet>,
    installer: RefCell<Option<Installer>>,
    switches: RefCell<HashMap<u64, SwitchContext>>,
}

impl Flow {
    /// A fresh flow with the cookie minted from `flow_id`.
    pub fn new(flow_id: u32) -> FlowRef {
        Rc::new(Flow {
            cookie: Flow::make_cookie(flow_id),
            state: Cell::new(FlowState::Egg),
            decision: RefCell::new(Decision::undefined()),
            mods: RefCell::new(FieldSet::new()),
            installer: RefCell::new(None),
            switches: RefCell::new(HashMap::new()),
        })
    }

    /// `(cookie_base, cookie_mask)` of the space reserved for reactive
    /// rules.
    pub fn cookie_space() -> (u64, u64) {
        (COOKIE_BASE, COOKIE_MASK)
    }

    pub fn make_cookie(flow_id: u32) -> u64 {
        COOKIE_BASE | u64::from(flow_id)
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn state(&self) -> FlowState {
        self.state.get()
    }

    pub fn set_state(&self, state: FlowState) {
        self.state.set(state);
    }

    pub fn decision(&self) -> Decision {
        self.decision.borrow().clone()
    }

    pub fn set_decision(&self, decision: Decision) {
        *self.decision.borrow_mut() = decision;
    }

    /// The rewrites the policy applied, emitted as SET_FIELD actions
    /// ahead of the output actions.
    pub fn mods(&self) -> FieldSet {
        self.mods.borrow().clone()
    }

    pub fn set_mods(&self, mods: FieldSet) {
        debug_assert!(self.state() != FlowState::Active);
        *self.mods.borrow_mut() = mods;
    }

    pub fn installer(&self) -> Option<Installer> {
        self.installer.borrow().clone()
    }

    pub fn set_installer(&self, installer: Installer) {
        *self.installer.borrow_mut() = Some(installer);
    }

    /// `true` when the decision never earns a switch rule; such a flow is
    /// answered with a packet-out and immediately evicted.
    pub fn is_disposable(&self) -> bool {
        self.decision.borrow().is_disposable()
    }

    /// Record one packet-in's per-switch context.
    pub fn record_packet_in(
        &self,
        dpid: u64,
        buffer_id: u32,
        in_port: u32,
        xid: u32,
        frame: Vec<u8>,
    ) {
        self.switches.borrow_mut().insert(
            dpid,
            SwitchContext {
                packet_in: true,
                buffer_id,
                in_port,
                xid,
                frame,
            },
        );
    }

    /// Consume the pending packet-in context for `dpid`, if any.
    pub fn take_context(&self, dpid: u64) -> Option<SwitchContext> {
        let mut switches = self.switches.borrow_mut();
        let ctx = switches.get_mut(&dpid)?;
        if !ctx.packet_in {
            return None;
        }
        Some(core::mem::take(&mut *ctx))
    }

    /// Whether a packet-in is pending on `dpid`.
    pub fn has_packet_in(&self, dpid: u64) -> bool {
        self.switches
            .borrow()
            .get(&dpid)
            .map(|ctx| ctx.packet_in)
            .unwrap_or(false)
    }

    /// Run the inspect handler, if the flow's decision carries one.
    /// Returns `true` when the handler consumed the packet.
    pub fn preprocess(flow: &FlowRef, pkt: &mut dyn Packet) -> Result<bool> {
        let handler = match flow.decision.borrow().data() {
            DecisionData::Inspect { handler, .. } => handler.clone(),
            _ => return Ok(false),
        };
        handler(pkt, flow)
    }

    /// The switches a custom decision restricts installation to; empty
    /// means every connected switch.
    pub fn switches(&self) -> Vec<u64> {
        match self.decision.borrow().data() {
            DecisionData::Custom(body) => body.switches(),
            _ => Vec::new(),
        }
    }

    /// Virtual-field projections reported by a custom decision.
    pub fn virtual_fields(&self, by: &Mask, what: &Mask) -> Vec<(Field, Field)> {
        match self.decision.borrow().data() {
            DecisionData::Custom(body) => body.virtual_fields(by, what),
            _ => Vec::new(),
        }
    }
}
