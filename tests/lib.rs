use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use oftrace::backend::Transport;
use oftrace::decision::{DecisionData, Timeout};
use oftrace::oxm::basic;
use oftrace::wire::openflow::{Kind, PacketRepr, PayloadRepr};
use oftrace::wire::{flow_match, flow_mod, flow_removed, packet_in, packet_out, OFP_NO_BUFFER};
use oftrace::{Config, FlowState, Packet, PacketParser, PortNumber, Repr, Result, Runtime};

/// Captures everything the runtime sends, per switch.
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

struct Harness {
    runtime: Runtime<LoopTransport>,
    sent: Rc<RefCell<Vec<(u64, Vec<u8>)>>>,
}

const DPID: u64 = 0xb;

fn harness(config: Config) -> Harness {
    let transport = LoopTransport::default();
    let sent = transport.sent.clone();
    let mut runtime = Runtime::new(config, transport);
    runtime.switch_up(DPID).unwrap();
    sent.borrow_mut().clear();
    Harness { runtime, sent }
}

impl Harness {
    fn drain(&self) -> Vec<PacketRepr> {
        self.sent
            .borrow_mut()
            .drain(..)
            .map(|(_, bytes)| PacketRepr::parse(&bytes).unwrap())
            .collect()
    }

    fn drain_flow_mods(&self) -> Vec<flow_mod::PacketRepr> {
        self.drain()
            .into_iter()
            .filter_map(|msg| match msg.payload {
                PayloadRepr::FlowMod(fm) => Some(fm),
                _ => None,
            })
            .collect()
    }

    fn packet_in(&mut self, frame: &[u8], in_port: u32) -> Result<()> {
        let pi = packet_in_repr(frame, in_port, packet_in::Reason::NoMatch, u64::MAX);
        self.runtime.packet_in(DPID, 1, &pi)
    }
}

fn packet_in_repr(
    frame: &[u8],
    in_port: u32,
    reason: packet_in::Reason,
    cookie: u64,
) -> packet_in::PacketRepr {
    packet_in::PacketRepr {
        buffer_id: OFP_NO_BUFFER,
        total_len: frame.len() as u16,
        reason,
        table_id: 0,
        cookie,
        flow_match: flow_match::PacketRepr(
            [basic::IN_PORT.value_of(u64::from(in_port)).to_exact_field()]
                .into_iter()
                .collect(),
        ),
        frame: frame.to_vec(),
    }
}

fn eth_frame(dst: u64, src: u64, ethertype: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(60);
    frame.extend_from_slice(&dst.to_be_bytes()[2..]);
    frame.extend_from_slice(&src.to_be_bytes()[2..]);
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame.resize(60, 0);
    frame
}

/// An L2 learning policy: source addresses are learned through untraced
/// watches, destinations through traced loads.
fn register_mac_learning(runtime: &mut Runtime<LoopTransport>) -> Rc<RefCell<HashMap<u64, u32>>> {
    let table: Rc<RefCell<HashMap<u64, u32>>> = Rc::new(RefCell::new(HashMap::new()));
    let learned = table.clone();
    runtime.register_handler(
        "mac-learning",
        Box::new(move |pkt, _flow, prev| {
            let src = pkt.watch(&basic::ETH_SRC.exact())?.value().to_u64()?;
            let port = pkt.watch(&basic::IN_PORT.exact())?.value().to_u64()? as u32;
            learned.borrow_mut().insert(src, port);

            let dst = pkt.load_u64(basic::ETH_DST)?;
            match learned.borrow().get(&dst) {
                Some(out) => prev.unicast(*out),
                None => prev.broadcast(),
            }
        }),
    );
    table
}

#[test]
fn mac_learning() {
    let mut h = harness(Config::default());
    register_mac_learning(&mut h.runtime);

    // A: broadcast from the not-yet-known host on port 1
    h.packet_in(&eth_frame(0xffff_ffff_ffff, 0x1122_3344_5566, 0x0800), 1)
        .unwrap();
    let mods = h.drain_flow_mods();
    assert_eq!(mods.len(), 1);

    // B: traffic towards the learned host
    h.packet_in(&eth_frame(0x1122_3344_5566, 0xaabb_ccdd_eeff, 0x0800), 2)
        .unwrap();

    // the tree now answers B's class with a unicast flow towards port 1
    let mut pkt = PacketParser::new(eth_frame(0x1122_3344_5566, 0xaabb_ccdd_eeff, 0x0800), 2);
    let flow = h.runtime.tree().lookup(&mut pkt).unwrap().unwrap();
    assert!(matches!(
        flow.decision().data(),
        DecisionData::Unicast { port: 1 }
    ));

    // and the installed rule matches exactly on eth_dst, forwarding to 1
    let mods = h.drain_flow_mods();
    let rule = mods
        .iter()
        .find(|fm| fm.cookie == flow.cookie())
        .expect("no rule for the learned flow");
    assert_eq!(
        rule.flow_match.0,
        [basic::ETH_DST.value_of(0x1122_3344_5566).to_exact_field()]
            .into_iter()
            .collect()
    );
    let actions: Vec<_> = match &rule.instructions[..] {
        [oftrace::wire::actions::Instruction::ApplyActions(list)] => list.iter().collect(),
        other => panic!("unexpected instructions {:?}", other),
    };
    assert_eq!(
        actions,
        vec![&oftrace::wire::actions::Action::Output {
            port: PortNumber::Regular(1),
            max_len: 0,
        }]
    );
}

#[test]
fn rules_are_installed_between_barriers() {
    let mut h = harness(Config::default());
    register_mac_learning(&mut h.runtime);

    h.packet_in(&eth_frame(0xffff_ffff_ffff, 0x1122_3344_5566, 0x0800), 1)
        .unwrap();

    let kinds: Vec<Kind> = h.drain().iter().map(|msg| msg.kind).collect();
    assert_eq!(kinds.first(), Some(&Kind::BarrierRequest));
    assert_eq!(kinds.last(), Some(&Kind::BarrierRequest));
    assert!(kinds.contains(&Kind::FlowMod));
}

#[test]
fn inspect_reactivation() {
    let mut h = harness(Config::default());

    let inspected: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));
    let counter = inspected.clone();
    h.runtime.register_handler(
        "dpi",
        Box::new(move |_pkt, _flow, prev| {
            let counter = counter.clone();
            prev.inspect(
                64,
                Rc::new(move |_pkt, _flow| {
                    *counter.borrow_mut() += 1;
                    Ok(true)
                }),
            )
        }),
    );

    let frame = eth_frame(0xaabb_ccdd_eeff, 0x1122_3344_5566, 0x0800);
    h.packet_in(&frame, 1).unwrap();
    assert_eq!(*inspected.borrow(), 0);
    assert_eq!(h.runtime.flow_count(), 1);

    // the installed rule copies 64 bytes to the controller
    let mods = h.drain_flow_mods();
    let cookie = mods[0].cookie;
    let actions = match &mods[0].instructions[..] {
        [oftrace::wire::actions::Instruction::ApplyActions(list)] => {
            list.iter().cloned().collect::<Vec<_>>()
        }
        other => panic!("unexpected instructions {:?}", other),
    };
    assert_eq!(
        actions,
        vec![oftrace::wire::actions::Action::Output {
            port: PortNumber::Controller,
            max_len: 64,
        }]
    );

    // a copy arrives under the flow's own cookie: only the handler runs
    let pi = packet_in_repr(&frame, 1, packet_in::Reason::Action, cookie);
    h.runtime.packet_in(DPID, 2, &pi).unwrap();
    assert_eq!(*inspected.borrow(), 1);
    assert_eq!(h.runtime.flow_count(), 1);
    assert!(h.drain_flow_mods().is_empty());
}

#[test]
fn idle_timeout_restarts_with_a_fresh_cookie() {
    let mut h = harness(Config::default());
    h.runtime.register_handler(
        "short-lived",
        Box::new(|pkt, _flow, prev| {
            let _dst = pkt.load_u64(basic::ETH_DST)?;
            prev.unicast(3).map(|d| d.idle_timeout(Timeout::Seconds(2)))
        }),
    );

    let frame = eth_frame(0xaabb_ccdd_eeff, 0x1122_3344_5566, 0x0800);
    h.packet_in(&frame, 1).unwrap();

    let mods = h.drain_flow_mods();
    assert_eq!(mods[0].idle_timeout, 2);
    let first_cookie = mods[0].cookie;
    {
        let flow = h.runtime.flow_by_cookie(first_cookie).unwrap();
        assert_eq!(flow.state(), FlowState::Active);
    }

    // two seconds of silence: the switch reports the idle timeout
    h.runtime.flow_removed(&flow_removed::PacketRepr {
        cookie: first_cookie,
        priority: 0,
        reason: flow_removed::Reason::IdleTimeout,
        table_id: 0,
        duration_sec: 2,
        duration_nsec: 0,
        idle_timeout: 2,
        hard_timeout: 0,
        packet_count: 1,
        byte_count: 60,
        flow_match: flow_match::PacketRepr::default(),
    });
    assert!(h.runtime.flow_by_cookie(first_cookie).is_none());

    // the same class starts over under a fresh cookie
    h.packet_in(&frame, 1).unwrap();
    let mods = h.drain_flow_mods();
    assert_eq!(mods.len(), 1);
    assert_ne!(mods[0].cookie, first_cookie);
}

#[test]
fn link_break_invalidates_and_relearns() {
    let mut h = harness(Config::default());
    register_mac_learning(&mut h.runtime);

    h.packet_in(&eth_frame(0x0000_0000_0001, 0x0000_0000_0002, 0x0800), 1)
        .unwrap();
    h.packet_in(&eth_frame(0x0000_0000_0002, 0x0000_0000_0001, 0x2000), 2)
        .unwrap();
    let first_mods = h.drain_flow_mods();
    assert_eq!(first_mods.len(), 2);

    h.runtime.link_changed().unwrap();

    // the reactive table is cleared, limited to the reactive cookie space
    let wipe = h
        .drain_flow_mods()
        .into_iter()
        .find(|fm| fm.command == flow_mod::Command::Delete)
        .expect("no delete sent on invalidation");
    let (base, mask) = oftrace::Flow::cookie_space();
    assert_eq!(wipe.cookie, base);
    assert_eq!(wipe.cookie_mask, mask);

    // the switch confirms the evictions
    for fm in &first_mods {
        h.runtime.flow_removed(&flow_removed::PacketRepr {
            cookie: fm.cookie,
            priority: fm.priority,
            reason: flow_removed::Reason::Delete,
            table_id: 0,
            duration_sec: 0,
            duration_nsec: 0,
            idle_timeout: 0,
            hard_timeout: 0,
            packet_count: 0,
            byte_count: 0,
            flow_match: fm.flow_match.clone(),
        });
    }

    // the next packet of each class repopulates the fresh tree
    h.packet_in(&eth_frame(0x0000_0000_0001, 0x0000_0000_0002, 0x0800), 1)
        .unwrap();
    let relearned = h.drain_flow_mods();
    assert_eq!(relearned.len(), 1);
    assert!(first_mods.iter().all(|fm| fm.cookie != relearned[0].cookie));
}

#[test]
fn arp_responder() {
    let mut h = harness(Config::default());

    // the responder owns 10.0.0.2 with a known mac, and answers
    // requests directly through its own transport handle
    let known_mac: u64 = 0xcafe_d00d_beef;
    let known_ip: u32 = 0x0a00_0002;
    let wire = h.sent.clone();

    h.runtime.register_handler(
        "arp-responder",
        Box::new(move |pkt, _flow, prev| {
            let is_arp = pkt.test(&basic::ETH_TYPE.value_of(0x0806).to_exact_field())?;
            if !is_arp {
                return Ok(prev);
            }
            let op = pkt.watch(&basic::ARP_OP.exact())?.value().to_u64()?;
            let tpa = pkt.watch(&basic::ARP_TPA.exact())?.value().to_u64()? as u32;
            if op != 1 || tpa != known_ip {
                return Ok(prev.discard().return_());
            }
            let sha = pkt.watch(&basic::ARP_SHA.exact())?.value().to_u64()?;
            let spa = pkt.watch(&basic::ARP_SPA.exact())?.value().to_u64()? as u32;
            let in_port = pkt.watch(&basic::IN_PORT.exact())?.value().to_u64()? as u32;

            let mut reply = Vec::with_capacity(42);
            reply.extend_from_slice(&sha.to_be_bytes()[2..]); // eth dst
            reply.extend_from_slice(&known_mac.to_be_bytes()[2..]); // eth src
            reply.extend_from_slice(&[0x08, 0x06]); // arp
            reply.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 0x06, 0x04]);
            reply.extend_from_slice(&[0x00, 0x02]); // op = reply
            reply.extend_from_slice(&known_mac.to_be_bytes()[2..]); // sha
            reply.extend_from_slice(&known_ip.to_be_bytes()); // spa
            reply.extend_from_slice(&sha.to_be_bytes()[2..]); // tha
            reply.extend_from_slice(&spa.to_be_bytes()); // tpa

            let po = packet_out::PacketRepr {
                buffer_id: OFP_NO_BUFFER,
                in_port: PortNumber::Controller.into(),
                actions: [oftrace::wire::actions::Action::Output {
                    port: PortNumber::Regular(in_port),
                    max_len: 0,
                }]
                .into_iter()
                .collect(),
                frame: reply,
            };
            let msg = PacketRepr::new(0, PayloadRepr::PacketOut(po));
            wire.borrow_mut().push((DPID, msg.to_bytes()?));

            Ok(prev
                .discard()
                .idle_timeout(Timeout::Seconds(0))
                .return_())
        }),
    );

    // an ARP request for the known host, from 10.0.0.1
    let mut frame = eth_frame(0xffff_ffff_ffff, 0x1122_3344_5566, 0x0806);
    frame.truncate(14);
    frame.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 0x06, 0x04]);
    frame.extend_from_slice(&[0x00, 0x01]); // op = request
    frame.extend_from_slice(&0x1122_3344_5566u64.to_be_bytes()[2..]); // sha
    frame.extend_from_slice(&[0x0a, 0x00, 0x00, 0x01]); // spa
    frame.extend_from_slice(&[0; 6]); // tha
    frame.extend_from_slice(&[0x0a, 0x00, 0x00, 0x02]); // tpa

    h.packet_in(&frame, 7).unwrap();

    // exactly one of the emitted packet-outs decodes to an ARP reply,
    // with the known host's mac in sha and the querier's ip in tpa
    let replies: Vec<PacketParser> = h
        .drain()
        .into_iter()
        .filter_map(|msg| match msg.payload {
            PayloadRepr::PacketOut(po) => Some(po),
            _ => None,
        })
        .filter(|po| !po.frame.is_empty())
        .map(|po| PacketParser::new(po.frame, 0))
        .filter(|parsed| parsed.clone().load_u64(basic::ARP_OP) == Ok(2))
        .collect();
    assert_eq!(replies.len(), 1);

    let mut parsed = replies.into_iter().next().unwrap();
    assert_eq!(parsed.load_u64(basic::ARP_SHA).unwrap(), known_mac);
    assert_eq!(parsed.load_u64(basic::ARP_TPA).unwrap(), 0x0a00_0001);
    assert_eq!(parsed.load_u64(basic::ETH_SRC).unwrap(), known_mac);
}

#[test]
fn hello_handshake_provisions_the_switch() {
    let transport = LoopTransport::default();
    let sent = transport.sent.clone();
    let mut runtime = Runtime::new(Config::default(), transport);

    let hello = PacketRepr::new(1, PayloadRepr::Hello(Vec::new()));
    runtime.on_message(0xc, &hello.to_bytes().unwrap());

    let features = PacketRepr::new(
        2,
        PayloadRepr::FeaturesReply(oftrace::wire::features::PacketRepr {
            datapath_id: 0xc,
            n_buffers: 256,
            n_tables: 254,
            auxiliary_id: 0,
            capabilities: Default::default(),
            reserved: 0,
        }),
    );
    runtime.on_message(0xc, &features.to_bytes().unwrap());

    let kinds: Vec<Kind> = sent
        .borrow()
        .iter()
        .map(|(_, bytes)| PacketRepr::parse(bytes).unwrap().kind)
        .collect();
    assert_eq!(kinds.first(), Some(&Kind::FeaturesRequest));
    // the reactive table-miss rule lands after the handshake
    assert!(kinds.contains(&Kind::FlowMod));
}

#[test]
fn undefined_decision_is_reported() {
    let mut h = harness(Config::default());
    h.runtime
        .register_handler("indifferent", Box::new(|_pkt, _flow, prev| Ok(prev)));

    let err = h
        .packet_in(&eth_frame(0xaabb_ccdd_eeff, 0x1122_3344_5566, 0x0800), 1)
        .unwrap_err();
    assert_eq!(err, oftrace::Error::UnhandledPacket);
}
