//! The event driver: packet-ins come in, policies run under tracing,
//! rules go out.

use std::collections::HashMap;

use log::{debug, error, warn};

use crate::backend::{OfBackend, Transport};
use crate::config::Config;
use crate::decision::Decision;
use crate::flow::{Flow, FlowRef, FlowState};
use crate::oxm::basic;
use crate::packet::TraceablePacket;
use crate::parser::PacketParser;
use crate::port::PortNumber;
use crate::trace::tree::{Installer, TraceTree};
use crate::trace::{ModTrackingPacket, Trace, TracedPacket};
use crate::wire::openflow::{PacketRepr, PayloadRepr};
use crate::wire::{flow_removed, packet_in};
use crate::{Error, Repr, Result};

/// A named packet-miss handler. Handlers receive the packet, the flow
/// being decided, and the decision accumulated so far; they return the
/// refined decision.
pub type PacketMissHandler =
    Box<dyn Fn(&mut dyn TraceablePacket, &FlowRef, Decision) -> Result<Decision>>;

struct Handler {
    name: String,
    func: PacketMissHandler,
}

/// The reactive runtime for one worker's set of switches.
pub struct Runtime<T: Transport> {
    backend: OfBackend<T>,
    tree: TraceTree,
    pipeline: Vec<Handler>,
    flows: HashMap<u64, FlowRef>,
    next_flow_id: u32,
    config: Config,
}

impl<T: Transport> Runtime<T> {
    pub fn new(config: Config, transport: T) -> Runtime<T> {
        let backend = OfBackend::new(transport, config.table_id, config.miss_inspect_bytes);
        Runtime {
            backend,
            tree: TraceTree::new(config.priority_range),
            pipeline: Vec::new(),
            flows: HashMap::new(),
            next_flow_id: 1,
            config,
        }
    }

    /// Append a handler to the packet-miss pipeline. Handlers run in
    /// registration order; a decision marked
    /// [`return_`](Decision::return_) short-circuits the rest.
    pub fn register_handler(
        &mut self,
        name: &str,
        func: PacketMissHandler,
    ) {
        debug!("registering packet-miss handler {:?}", name);
        self.pipeline.push(Handler {
            name: name.to_string(),
            func,
        });
    }

    /// The backend, for embedders that need to send their own messages.
    pub fn backend(&mut self) -> &mut OfBackend<T> {
        &mut self.backend
    }

    /// The cookie marking sentinel-generated packet-ins.
    pub fn miss_cookie(&self) -> u64 {
        self.backend.miss_cookie()
    }

    /// The live flow installed for `cookie`, if any.
    pub fn flow_by_cookie(&self, cookie: u64) -> Option<FlowRef> {
        self.flows.get(&cookie).cloned()
    }

    /// The trace tree, for inspection.
    pub fn tree(&self) -> &TraceTree {
        &self.tree
    }

    /// The number of live flows.
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    fn mint_flow_id(&mut self) -> u32 {
        let id = self.next_flow_id;
        self.next_flow_id = self.next_flow_id.wrapping_add(1);
        id
    }

    /// A switch finished its handshake: remember it and program the
    /// goto chain plus the table-miss rule.
    pub fn switch_up(&mut self, dpid: u64) -> Result<()> {
        debug!("switch {:#x} up", dpid);
        self.backend.add_switch(dpid);
        self.backend.provision(dpid)
    }

    /// A switch connection died.
    pub fn switch_down(&mut self, dpid: u64) {
        debug!("switch {:#x} down", dpid);
        self.backend.remove_switch(dpid);
    }

    /// Link discovery signalled a topology change.
    pub fn link_changed(&mut self) -> Result<()> {
        if self.config.invalidate_on_link_change {
            self.invalidate()
        } else {
            Ok(())
        }
    }

    /// Drop the trace tree and clear the reactive table, forcing fresh
    /// learning on the next packet of every class.
    pub fn invalidate(&mut self) -> Result<()> {
        debug!("invalidating the trace tree");
        self.tree = TraceTree::new(self.config.priority_range);
        self.tree.commit(&mut self.backend)
    }

    /// Dispatch one raw message received from a switch. Per-packet
    /// errors are logged and swallowed; the worker keeps running.
    pub fn on_message(&mut self, dpid: u64, bytes: &[u8]) {
        let repr = match PacketRepr::parse(bytes) {
            Ok(repr) => repr,
            Err(e) => {
                warn!("dropping malformed message from {:#x}: {}", dpid, e);
                return;
            }
        };
        let xid = repr.xid;
        let result = match repr.payload {
            PayloadRepr::Hello(_) => {
                self.backend.add_switch(dpid);
                self.backend
                    .send(dpid, &PacketRepr::new(xid, PayloadRepr::FeaturesRequest))
            }
            PayloadRepr::EchoRequest(data) => self
                .backend
                .send(dpid, &PacketRepr::new(xid, PayloadRepr::EchoReply(data))),
            PayloadRepr::FeaturesReply(fr) => self.switch_up(fr.datapath_id),
            PayloadRepr::PacketIn(pi) => self.packet_in(dpid, xid, &pi),
            PayloadRepr::FlowRemoved(fr) => {
                self.flow_removed(&fr);
                Ok(())
            }
            PayloadRepr::Error(err) => {
                warn!(
                    "switch {:#x} reported {:?} code {}",
                    dpid, err.kind, err.code
                );
                Ok(())
            }
            PayloadRepr::MultipartReply(mp) => {
                debug!("multipart reply {:?} from {:#x}", mp.kind, dpid);
                Ok(())
            }
            PayloadRepr::BarrierReply => Ok(()),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("error handling message from {:#x}: {}", dpid, e);
        }
    }

    fn is_table_miss(&self, pi: &packet_in::PacketRepr) -> bool {
        match pi.reason {
            packet_in::Reason::NoMatch => true,
            packet_in::Reason::Action => pi.cookie == self.backend.miss_cookie(),
            _ => false,
        }
    }

    /// Handle one packet-in: look the packet up, and on a miss run the
    /// pipeline, augment the tree and install the resulting rules.
    pub fn packet_in(&mut self, dpid: u64, xid: u32, pi: &packet_in::PacketRepr) -> Result<()> {
        let in_port_field = pi.flow_match.0.load(&basic::IN_PORT.exact());
        if !in_port_field.is_exact() {
            warn!("packet-in from {:#x} without an in_port, dropped", dpid);
            return Err(Error::Malformed);
        }
        let in_port = in_port_field.value().to_u64()? as u32;
        let table_miss = self.is_table_miss(pi);
        debug!(
            "packet-in on switch {:#x} port {} ({})",
            dpid,
            PortNumber::from(in_port),
            if table_miss { "miss" } else { "inspect" }
        );

        let mut pkt = PacketParser::new(pi.frame.clone(), in_port);

        let flow = match self.tree.lookup(&mut pkt)? {
            Some(flow) if flow.state() != FlowState::Expired => flow,
            _ => {
                let flow = Flow::new(self.mint_flow_id());
                self.flows.insert(flow.cookie(), flow.clone());
                flow
            }
        };

        if Flow::preprocess(&flow, &mut pkt)? {
            // an inspect handler consumed the packet
            return Ok(());
        }
        flow.record_packet_in(dpid, pi.buffer_id, in_port, xid, pi.frame.clone());

        match flow.state() {
            FlowState::Egg | FlowState::Idle | FlowState::Evicted => self.learn(&mut pkt, &flow),
            FlowState::Active => {
                if table_miss {
                    // the switch no longer answers for this class:
                    // refresh the decision and re-emit the rules
                    let decision = self.run_pipeline_untracked(&mut pkt, &flow)?;
                    flow.set_decision(decision);
                }
                self.activate(&flow)
            }
            FlowState::Expired => {
                debug_assert!(false, "packet-in on an expired flow");
                error!("packet-in on expired flow {:#x}", flow.cookie());
                Ok(())
            }
        }
    }

    /// Run the policy under tracing, fold the trace into the tree, and
    /// install the new rules.
    fn learn(&mut self, pkt: &mut PacketParser, flow: &FlowRef) -> Result<()> {
        let mut trace = Trace::new();
        let mut mpkt = ModTrackingPacket::new(pkt);
        let outcome = {
            let mut tpkt = TracedPacket::new(&mut mpkt, &mut trace);
            self.run_pipeline(&mut tpkt, flow)
        };
        let decision = match outcome {
            Ok(decision) => decision,
            Err(e) => return Err(e.with_trace(trace.to_string())),
        };
        flow.set_decision(decision);
        flow.set_mods(mpkt.into_mods());

        let installer = self.augment_with_recovery(&trace, flow)?;
        flow.set_installer(installer);
        self.activate(flow)
    }

    fn augment_with_recovery(&mut self, trace: &Trace, flow: &FlowRef) -> Result<Installer> {
        match self.tree.augment(trace, flow) {
            Ok(installer) => return Ok(installer),
            Err(Error::PriorityExceeded { .. }) => {}
            Err(Error::InconsistentTrace) => {
                error!("non-deterministic policy, rebuilding the trace tree");
                self.invalidate()?;
                return Err(Error::InconsistentTrace);
            }
            Err(e) => return Err(e),
        }

        for _ in 0..self.config.max_retries_on_priority_exceeded {
            warn!("priority range collapsed, rebalancing the trace tree");
            self.tree.update();
            match self.tree.augment(trace, flow) {
                Ok(installer) => return Ok(installer),
                Err(Error::PriorityExceeded { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        // still no room after rebalancing: relearn from scratch
        warn!("priority range exhausted, invalidating the trace tree");
        self.invalidate()?;
        self.tree.augment(trace, flow)
    }

    fn activate(&mut self, flow: &FlowRef) -> Result<()> {
        if let Some(installer) = flow.installer() {
            installer.run(&mut self.backend)?;
        }
        flow.set_state(if flow.is_disposable() {
            FlowState::Evicted
        } else {
            FlowState::Active
        });
        Ok(())
    }

    fn run_pipeline(
        &self,
        pkt: &mut dyn TraceablePacket,
        flow: &FlowRef,
    ) -> Result<Decision> {
        let mut decision = Decision::undefined();
        for handler in &self.pipeline {
            decision = (handler.func)(pkt, flow, decision).map_err(|e| Error::InHandler {
                name: handler.name.clone(),
                source: Box::new(e),
                trace: String::new(),
            })?;
            if decision.is_return() {
                break;
            }
        }
        Ok(decision)
    }

    /// Re-run the pipeline without growing the trace tree.
    fn run_pipeline_untracked(
        &self,
        pkt: &mut PacketParser,
        flow: &FlowRef,
    ) -> Result<Decision> {
        let mut scratch = Trace::new();
        let mut tpkt = TracedPacket::new(pkt, &mut scratch);
        self.run_pipeline(&mut tpkt, flow)
    }

    /// A rule left a switch: advance the owning flow's lifecycle.
    pub fn flow_removed(&mut self, fr: &flow_removed::PacketRepr) {
        let flow = match self.flows.get(&fr.cookie) {
            Some(flow) => flow.clone(),
            None => return,
        };
        match fr.reason {
            flow_removed::Reason::Delete
            | flow_removed::Reason::GroupDelete
            | flow_removed::Reason::MeterDelete => {
                debug!("flow {:#x} evicted", fr.cookie);
                flow.set_state(FlowState::Evicted);
            }
            flow_removed::Reason::IdleTimeout => {
                debug!("flow {:#x} idled out", fr.cookie);
                flow.set_state(FlowState::Idle);
                // the class has gone quiet; its next appearance starts
                // a fresh flow with a fresh cookie
                self.flows.remove(&fr.cookie);
            }
            flow_removed::Reason::HardTimeout => {
                debug!("flow {:#x} expired", fr.cookie);
                flow.set_state(FlowState::Expired);
                self.flows.remove(&fr.cookie);
            }
            flow_removed::Reason::Unknown(reason) => {
                warn!("flow-removed with unknown reason {}", reason);
            }
        }
    }
}
