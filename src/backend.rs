//! Translation of compiled trace-tree nodes into switch messages.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use log::debug;

use crate::decision::{Decision, DecisionData};
use crate::flow::{Flow, FlowRef, FlowState, SwitchContext};
use crate::oxm::FieldSet;
use crate::port::PortNumber;
use crate::wire::actions::{Action, ActionList, Instruction};
use crate::wire::flow_mod::{self, Command, Flags};
use crate::wire::openflow::{PacketRepr, PayloadRepr};
use crate::wire::{flow_match, packet_out, OFPG_ANY, OFP_NO_BUFFER};
use crate::{Error, Field, Result};

/// What the trace tree compiles into.
pub trait Backend {
    /// Install one leaf rule carrying the flow's compiled actions.
    fn install(&mut self, priority: u16, match_set: &FieldSet, flow: &FlowRef) -> Result<()>;

    /// Install a "send to controller" sentinel between two priority
    /// bands of a test node. Sentinels are deduplicated per tree.
    fn barrier_rule(
        &mut self,
        priority: u16,
        match_set: &FieldSet,
        pred: &Field,
        id: u64,
    ) -> Result<()>;

    /// Remove every reactive rule matching the field set.
    fn remove_all(&mut self, match_set: &FieldSet) -> Result<()>;

    /// Remove the reactive rules strictly matching priority and match.
    fn remove_strict(&mut self, priority: u16, match_set: &FieldSet) -> Result<()>;

    /// Remove the rules installed for one cookie.
    fn remove_cookie(&mut self, cookie: u64) -> Result<()>;

    /// Fence the preceding rule batch.
    fn barrier(&mut self) -> Result<()>;
}

/// One message to one switch; the core never blocks on a send.
pub trait Transport {
    fn send(&mut self, dpid: u64, bytes: &[u8]) -> Result<()>;
}

fn sentinel_hash(priority: u16, match_set: &FieldSet) -> u64 {
    let mut entries: Vec<(u16, u8, Vec<u8>, Vec<u8>)> = match_set
        .iter()
        .map(|f| {
            (
                f.field_type().ns(),
                f.field_type().id(),
                f.value_bits().as_bytes().to_vec(),
                f.mask_bits().as_bytes().to_vec(),
            )
        })
        .collect();
    entries.sort();
    let mut hasher = DefaultHasher::new();
    priority.hash(&mut hasher);
    entries.hash(&mut hasher);
    hasher.finish()
}

/// The OpenFlow backend: compiles decisions to action lists and rules
/// to flow-mods on a switch transport.
pub struct OfBackend<T: Transport> {
    transport: T,
    table: u8,
    miss_inspect_bytes: u16,
    connections: BTreeSet<u64>,
    miss: FlowRef,
    /// Sentinels already installed, keyed by test id and a stable hash
    /// of (priority, match).
    sentinels: HashSet<(u64, u64)>,
    next_xid: u32,
}

impl<T: Transport> OfBackend<T> {
    /// A backend installing into `table`. The table-miss rule asks the
    /// switch to copy `miss_inspect_bytes` bytes of unmatched packets.
    pub fn new(transport: T, table: u8, miss_inspect_bytes: u16) -> OfBackend<T> {
        let miss = Flow::new(0);
        miss.set_decision(
            Decision::undefined()
                .inspect(miss_inspect_bytes, Rc::new(|_, _| Ok(false)))
                .unwrap_or_default(),
        );
        OfBackend {
            transport,
            table,
            miss_inspect_bytes,
            connections: BTreeSet::new(),
            miss,
            sentinels: HashSet::new(),
            next_xid: 1,
        }
    }

    /// The reactive table this backend programs.
    pub fn table(&self) -> u8 {
        self.table
    }

    /// The cookie identifying sentinel and table-miss packet-ins.
    pub fn miss_cookie(&self) -> u64 {
        self.miss.cookie()
    }

    pub fn add_switch(&mut self, dpid: u64) {
        self.connections.insert(dpid);
    }

    pub fn remove_switch(&mut self, dpid: u64) {
        self.connections.remove(&dpid);
    }

    pub fn connections(&self) -> impl Iterator<Item = u64> + '_ {
        self.connections.iter().copied()
    }

    fn next_xid(&mut self) -> u32 {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);
        xid
    }

    /// Send one already-framed message to one switch.
    pub fn send(&mut self, dpid: u64, repr: &PacketRepr) -> Result<()> {
        if !self.connections.contains(&dpid) {
            return Err(Error::UnknownSwitch(dpid));
        }
        let bytes = repr.to_bytes()?;
        self.transport
            .send(dpid, &bytes)
            .map_err(|_| Error::TransportSend(dpid))
    }

    /// The action list a flow compiles to for one switch: the policy's
    /// rewrites as SET_FIELD actions, then the decision's outputs.
    fn actions(&self, flow: &FlowRef, dpid: u64) -> Result<ActionList> {
        let mut ret = ActionList::new();

        let mut mods: Vec<Field> = flow.mods().iter().cloned().collect();
        mods.sort_by_key(|f| (f.field_type().ns(), f.field_type().id()));
        for patch in mods {
            ret.push(Action::SetField(patch));
        }

        match flow.decision().data() {
            DecisionData::Undefined => return Err(Error::UnhandledPacket),
            DecisionData::Drop => {}
            DecisionData::Unicast { port } => ret.push(Action::Output {
                port: PortNumber::Regular(*port),
                max_len: 0,
            }),
            DecisionData::Multicast { ports } => {
                for port in ports {
                    ret.push(Action::Output {
                        port: PortNumber::Regular(*port),
                        max_len: 0,
                    });
                }
            }
            DecisionData::Broadcast => ret.push(Action::Output {
                port: PortNumber::Flood,
                max_len: 0,
            }),
            DecisionData::Inspect { max_bytes, .. } => ret.push(Action::Output {
                port: PortNumber::Controller,
                max_len: *max_bytes,
            }),
            DecisionData::Custom(body) => body.apply(&mut ret, dpid),
        }
        Ok(ret)
    }

    fn send_packet_out(&mut self, dpid: u64, flow: &FlowRef, ctx: &SwitchContext) -> Result<()> {
        let actions = self.actions(flow, dpid)?;
        let frame = if ctx.buffer_id == OFP_NO_BUFFER {
            ctx.frame.clone()
        } else {
            Vec::new()
        };
        let po = packet_out::PacketRepr {
            buffer_id: ctx.buffer_id,
            in_port: ctx.in_port,
            actions,
            frame,
        };
        self.send(dpid, &PacketRepr::new(ctx.xid, PayloadRepr::PacketOut(po)))
    }

    fn send_flow_mod(
        &mut self,
        dpid: u64,
        priority: u16,
        match_set: &FieldSet,
        flow: &FlowRef,
        buffer_id: u32,
        xid: u32,
    ) -> Result<()> {
        let actions = self.actions(flow, dpid)?;
        let base = *flow.decision().base();
        let fm = flow_mod::PacketRepr {
            cookie: flow.cookie(),
            cookie_mask: 0,
            table_id: self.table,
            command: Command::Add,
            idle_timeout: base.idle_timeout.wire_seconds(),
            hard_timeout: base.hard_timeout.wire_seconds(),
            priority,
            buffer_id,
            out_port: PortNumber::Any.into(),
            out_group: OFPG_ANY,
            flags: Flags::CHECK_OVERLAP | Flags::SEND_FLOW_REM,
            flow_match: flow_match::PacketRepr(match_set.clone()),
            instructions: vec![Instruction::ApplyActions(actions)],
        };
        debug!(
            "installing prio={} match={{{}}} cookie={:#x} on switch {:#x}",
            priority,
            match_set,
            flow.cookie(),
            dpid
        );
        self.send(dpid, &PacketRepr::new(xid, PayloadRepr::FlowMod(fm)))
    }

    fn install_on(
        &mut self,
        dpid: u64,
        priority: u16,
        match_set: &FieldSet,
        flow: &FlowRef,
    ) -> Result<()> {
        let ctx = flow.take_context(dpid);
        if flow.state() == FlowState::Evicted && ctx.is_none() {
            return Ok(());
        }

        if flow.is_disposable() {
            // never worth a rule; answer the pending packet and stop
            if let Some(ctx) = ctx {
                self.send_packet_out(dpid, flow, &ctx)?;
            }
            return Ok(());
        }

        let (buffer_id, xid) = match ctx {
            Some(ctx) => {
                if ctx.buffer_id == OFP_NO_BUFFER {
                    // the switch kept no copy, release the packet
                    // explicitly before the rule lands
                    self.send_packet_out(dpid, flow, &ctx)?;
                    (OFP_NO_BUFFER, ctx.xid)
                } else {
                    (ctx.buffer_id, ctx.xid)
                }
            }
            None => (OFP_NO_BUFFER, self.next_xid()),
        };
        self.send_flow_mod(dpid, priority, match_set, flow, buffer_id, xid)
    }

    fn switches_for(&self, flow: &FlowRef) -> Vec<u64> {
        let restricted = flow.switches();
        if restricted.is_empty() {
            self.connections.iter().copied().collect()
        } else {
            restricted
                .into_iter()
                .filter(|dpid| self.connections.contains(dpid))
                .collect()
        }
    }

    fn delete(
        &mut self,
        command: Command,
        priority: u16,
        match_set: &FieldSet,
        cookie: u64,
        cookie_mask: u64,
    ) -> Result<()> {
        self.sentinels.clear();
        let fm = flow_mod::PacketRepr {
            cookie,
            cookie_mask,
            table_id: self.table,
            command,
            idle_timeout: 0,
            hard_timeout: 0,
            priority,
            buffer_id: OFP_NO_BUFFER,
            out_port: PortNumber::Any.into(),
            out_group: OFPG_ANY,
            flags: Flags::empty(),
            flow_match: flow_match::PacketRepr(match_set.clone()),
            instructions: Vec::new(),
        };
        let xid = self.next_xid();
        let repr = PacketRepr::new(xid, PayloadRepr::FlowMod(fm));
        for dpid in self.connections.clone() {
            self.send(dpid, &repr)?;
        }
        Ok(())
    }

    /// Program the per-table plumbing a fresh switch needs: a goto
    /// chain through the non-reactive tables and the table-miss rule on
    /// the reactive table.
    pub fn provision(&mut self, dpid: u64) -> Result<()> {
        for table in 0..self.table {
            let fm = flow_mod::PacketRepr {
                cookie: self.miss.cookie(),
                cookie_mask: 0,
                table_id: table,
                command: Command::Add,
                idle_timeout: 0,
                hard_timeout: 0,
                priority: 0,
                buffer_id: OFP_NO_BUFFER,
                out_port: PortNumber::Any.into(),
                out_group: OFPG_ANY,
                flags: Flags::empty(),
                flow_match: flow_match::PacketRepr::default(),
                instructions: vec![Instruction::GotoTable(table + 1)],
            };
            let xid = self.next_xid();
            self.send(dpid, &PacketRepr::new(xid, PayloadRepr::FlowMod(fm)))?;
        }

        let fm = flow_mod::PacketRepr {
            cookie: self.miss.cookie(),
            cookie_mask: 0,
            table_id: self.table,
            command: Command::Add,
            idle_timeout: 0,
            hard_timeout: 0,
            priority: 0,
            buffer_id: OFP_NO_BUFFER,
            out_port: PortNumber::Any.into(),
            out_group: OFPG_ANY,
            flags: Flags::empty(),
            flow_match: flow_match::PacketRepr::default(),
            instructions: vec![Instruction::ApplyActions(
                [Action::Output {
                    port: PortNumber::Controller,
                    max_len: self.miss_inspect_bytes,
                }]
                .into_iter()
                .collect(),
            )],
        };
        let xid = self.next_xid();
        self.send(dpid, &PacketRepr::new(xid, PayloadRepr::FlowMod(fm)))
    }
}

impl<T: Transport> Backend for OfBackend<T> {
    fn install(&mut self, priority: u16, match_set: &FieldSet, flow: &FlowRef) -> Result<()> {
        for dpid in self.switches_for(flow) {
            self.install_on(dpid, priority, match_set, flow)?;
        }
        Ok(())
    }

    fn barrier_rule(
        &mut self,
        priority: u16,
        match_set: &FieldSet,
        _pred: &Field,
        id: u64,
    ) -> Result<()> {
        let key = (id, sentinel_hash(priority, match_set));
        if !self.sentinels.insert(key) {
            return Ok(());
        }
        debug!("sentinel install match={{{}}} prio={}", match_set, priority);
        let miss = self.miss.clone();
        self.install(priority, match_set, &miss)
    }

    fn remove_all(&mut self, match_set: &FieldSet) -> Result<()> {
        debug!("removing reactive flows matching {{{}}}", match_set);
        let (base, mask) = Flow::cookie_space();
        self.delete(Command::Delete, 0, match_set, base, mask)
    }

    fn remove_strict(&mut self, priority: u16, match_set: &FieldSet) -> Result<()> {
        debug!(
            "removing reactive flows matching {{{}}} at prio={}",
            match_set, priority
        );
        let (base, mask) = Flow::cookie_space();
        self.delete(Command::DeleteStrict, priority, match_set, base, mask)
    }

    fn remove_cookie(&mut self, cookie: u64) -> Result<()> {
        debug!("removing flow with cookie={:#x}", cookie);
        self.delete(Command::Delete, 0, &FieldSet::new(), cookie, u64::MAX)
    }

    fn barrier(&mut self) -> Result<()> {
        let xid = self.next_xid();
        let repr = PacketRepr::new(xid, PayloadRepr::BarrierRequest);
        for dpid in self.connections.clone() {
            self.send(dpid, &repr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oxm::basic::ETH_DST;
    use crate::wire::openflow::Kind;
    use crate::Repr;
    use std::cell::RefCell;

    #[derive(Default, Clone)]
    struct LoopTransport {
        sent: Rc<RefCell<Vec<(u64, Vec<u8>)>>>,
    }

    impl Transport for LoopTransport {
        fn send(&mut self, dpid: u64, bytes: &[u8]) -> Result<()> {
            self.sent.borrow_mut().push((dpid, bytes.to_vec()));
            Ok(())
        }
    }

    fn sent_kinds(sent: &Rc<RefCell<Vec<(u64, Vec<u8>)>>>) -> Vec<Kind> {
        sent.borrow()
            .iter()
            .map(|(_, bytes)| PacketRepr::parse(bytes).unwrap().kind)
            .collect()
    }

    fn backend() -> (OfBackend<LoopTransport>, Rc<RefCell<Vec<(u64, Vec<u8>)>>>) {
        let transport = LoopTransport::default();
        let sent = transport.sent.clone();
        let mut backend = OfBackend::new(transport, 0, 128);
        backend.add_switch(0xa);
        (backend, sent)
    }

    fn eth_match() -> FieldSet {
        [ETH_DST.value_of(0x1122_3344_5566).to_exact_field()]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_install_emits_flow_mod() {
        let (mut backend, sent) = backend();
        let flow = Flow::new(1);
        flow.set_decision(Decision::undefined().unicast(3).unwrap());

        backend.install(1000, &eth_match(), &flow).unwrap();

        let sent = sent.borrow();
        assert_eq!(sent.len(), 1);
        let repr = PacketRepr::parse(&sent[0].1).unwrap();
        match repr.payload {
            PayloadRepr::FlowMod(fm) => {
                assert_eq!(fm.command, Command::Add);
                assert_eq!(fm.cookie, flow.cookie());
                assert_eq!(fm.priority, 1000);
                assert_eq!(fm.flags, Flags::CHECK_OVERLAP | Flags::SEND_FLOW_REM);
                assert_eq!(fm.flow_match.0, eth_match());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_unbuffered_packet_in_gets_packet_out() {
        let (mut backend, sent) = backend();
        let flow = Flow::new(1);
        flow.set_decision(Decision::undefined().unicast(3).unwrap());
        flow.record_packet_in(0xa, OFP_NO_BUFFER, 7, 42, vec![0xca, 0xfe]);

        backend.install(1000, &eth_match(), &flow).unwrap();
        assert_eq!(sent_kinds(&sent), vec![Kind::PacketOut, Kind::FlowMod]);

        let sent = sent.borrow();
        let po = match PacketRepr::parse(&sent[0].1).unwrap().payload {
            PayloadRepr::PacketOut(po) => po,
            other => panic!("unexpected payload {:?}", other),
        };
        assert_eq!(po.in_port, 7);
        assert_eq!(po.frame, vec![0xca, 0xfe]);
    }

    #[test]
    fn test_disposable_flow_is_packet_out_only() {
        let (mut backend, sent) = backend();
        let flow = Flow::new(1);
        flow.set_decision(
            Decision::undefined()
                .unicast(3)
                .unwrap()
                .idle_timeout(crate::decision::Timeout::Seconds(0)),
        );
        flow.record_packet_in(0xa, OFP_NO_BUFFER, 7, 42, vec![0xca, 0xfe]);

        backend.install(1000, &eth_match(), &flow).unwrap();
        assert_eq!(sent_kinds(&sent), vec![Kind::PacketOut]);
    }

    #[test]
    fn test_sentinels_deduplicated() {
        let (mut backend, sent) = backend();
        let pred = ETH_DST.value_of(1).to_exact_field();

        backend.barrier_rule(10, &eth_match(), &pred, 1).unwrap();
        backend.barrier_rule(10, &eth_match(), &pred, 1).unwrap();
        assert_eq!(sent.borrow().len(), 1);

        // a different priority band is a different sentinel
        backend.barrier_rule(11, &eth_match(), &pred, 1).unwrap();
        assert_eq!(sent.borrow().len(), 2);
    }

    #[test]
    fn test_remove_cookie() {
        let (mut backend, sent) = backend();
        backend.remove_cookie(0x1_0000_0007).unwrap();

        let sent = sent.borrow();
        let fm = match PacketRepr::parse(&sent[0].1).unwrap().payload {
            PayloadRepr::FlowMod(fm) => fm,
            other => panic!("unexpected payload {:?}", other),
        };
        assert_eq!(fm.command, Command::Delete);
        assert_eq!(fm.cookie, 0x1_0000_0007);
        assert_eq!(fm.cookie_mask, u64::MAX);
    }

    #[test]
    fn test_remove_all_limits_cookie_space() {
        let (mut backend, sent) = backend();
        backend.remove_all(&FieldSet::new()).unwrap();

        let sent = sent.borrow();
        let fm = match PacketRepr::parse(&sent[0].1).unwrap().payload {
            PayloadRepr::FlowMod(fm) => fm,
            other => panic!("unexpected payload {:?}", other),
        };
        let (base, mask) = Flow::cookie_space();
        assert_eq!(fm.cookie, base);
        assert_eq!(fm.cookie_mask, mask);
    }

    #[test]
    fn test_provision_programs_miss_chain() {
        let transport = LoopTransport::default();
        let sent = transport.sent.clone();
        let mut backend = OfBackend::new(transport, 2, 96);
        backend.add_switch(0xa);
        backend.provision(0xa).unwrap();

        let sent = sent.borrow();
        assert_eq!(sent.len(), 3);
        for (i, (_, bytes)) in sent.iter().take(2).enumerate() {
            let fm = match PacketRepr::parse(bytes).unwrap().payload {
                PayloadRepr::FlowMod(fm) => fm,
                other => panic!("unexpected payload {:?}", other),
            };
            assert_eq!(fm.table_id, i as u8);
            assert_eq!(fm.instructions, vec![Instruction::GotoTable(i as u8 + 1)]);
        }
        let miss = match PacketRepr::parse(&sent[2].1).unwrap().payload {
            PayloadRepr::FlowMod(fm) => fm,
            other => panic!("unexpected payload {:?}", other),
        };
        assert_eq!(miss.table_id, 2);
        assert_eq!(miss.priority, 0);
        assert_eq!(miss.cookie, backend.miss_cookie());
    }
}
