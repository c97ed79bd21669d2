//! Packet decorators used while a policy runs.

use super::Tracer;
use crate::oxm::{Field, FieldSet, Mask};
use crate::packet::{Packet, TraceablePacket};
use crate::Result;

/// Wraps a packet and reports every load and test to a tracer.
///
/// A cache field-set remembers the bits already revealed to the policy,
/// so equivalent reads do not produce duplicate trace entries and tests
/// whose outcome is already determined produce none at all. The less a
/// policy reveals, the wider the compiled rules.
pub struct TracedPacket<'a, P: Packet + ?Sized, T: Tracer> {
    pkt: &'a mut P,
    tracer: &'a mut T,
    cache: FieldSet,
}

impl<'a, P: Packet + ?Sized, T: Tracer> TracedPacket<'a, P, T> {
    pub fn new(pkt: &'a mut P, tracer: &'a mut T) -> Self {
        TracedPacket {
            pkt,
            tracer,
            cache: FieldSet::new(),
        }
    }
}

impl<P: Packet + ?Sized, T: Tracer> Packet for TracedPacket<'_, P, T> {
    fn load(&mut self, mask: &Mask) -> Result<Field> {
        // read requested bits from the packet
        let read = self.pkt.load(mask)?;
        // read the bits explored before
        let explored = self.cache.load(mask);
        // find requested bits that haven't been explored yet
        let unexplored = read.without(&explored.mask())?;

        if !unexplored.is_wildcard() {
            self.tracer.load(unexplored.clone());
            // mark them as explored (and copy their data)
            self.cache.modify(&unexplored);
        }

        Ok(read)
    }

    fn test(&mut self, need: &Field) -> Result<bool> {
        let read = self.pkt.load(&need.mask())?;
        let explored = self.cache.load(&need.mask());
        let unexplored = read.without(&explored.mask())?;

        // the explored bits may already contradict the predicate
        if !explored.matches(need)? {
            return Ok(false);
        }
        // fully determined by previous calls
        if unexplored.is_wildcard() {
            return Ok(true);
        }

        let outcome = unexplored.matches(need)?;
        self.tracer
            .test(need.restrict(&unexplored.mask())?, outcome);

        // bits read by a test become known only when they matched; a
        // negative test reveals less than a positive one
        if outcome {
            self.cache.modify(&unexplored);
        }
        Ok(outcome)
    }

    fn modify(&mut self, patch: &Field) -> Result<()> {
        // may fail without touching the cache
        self.pkt.modify(patch)?;
        self.cache.modify(patch);
        Ok(())
    }
}

impl<P: Packet + ?Sized, T: Tracer> TraceablePacket for TracedPacket<'_, P, T> {
    fn watch(&mut self, mask: &Mask) -> Result<Field> {
        self.pkt.load(mask)
    }

    fn vload(&mut self, by: &Field, what: &Field) {
        self.tracer.vload(by.clone(), what.clone());
    }
}

/// Wraps a packet and accumulates the rewrites applied through it, so
/// they can later be emitted as SET_FIELD actions.
pub struct ModTrackingPacket<'a, P: Packet + ?Sized> {
    pkt: &'a mut P,
    mods: FieldSet,
}

impl<'a, P: Packet + ?Sized> ModTrackingPacket<'a, P> {
    pub fn new(pkt: &'a mut P) -> Self {
        ModTrackingPacket {
            pkt,
            mods: FieldSet::new(),
        }
    }

    pub fn mods(&self) -> &FieldSet {
        &self.mods
    }

    pub fn into_mods(self) -> FieldSet {
        self.mods
    }
}

impl<P: Packet + ?Sized> Packet for ModTrackingPacket<'_, P> {
    fn load(&mut self, mask: &Mask) -> Result<Field> {
        self.pkt.load(mask)
    }

    fn test(&mut self, need: &Field) -> Result<bool> {
        self.pkt.test(need)
    }

    fn modify(&mut self, patch: &Field) -> Result<()> {
        self.pkt.modify(patch)?;
        self.mods.modify(patch);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oxm::basic::{ETH_DST, ETH_SRC, IN_PORT, TCP_DST, TCP_SRC};
    use crate::trace::{Trace, TraceEntry};

    fn sample_packet() -> FieldSet {
        [
            IN_PORT.value_of(3).to_exact_field(),
            ETH_SRC.value_of(0x1122_3344_5566).to_exact_field(),
            ETH_DST.value_of(0xaabb_ccdd_eeff).to_exact_field(),
            TCP_SRC.value_of(45678).to_exact_field(),
            TCP_DST.value_of(80).to_exact_field(),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_load_records_only_new_bits() {
        let mut raw = sample_packet();
        let mut trace = Trace::new();
        let mut pkt = TracedPacket::new(&mut raw, &mut trace);

        let low_nibbles = ETH_SRC.mask_of(0xf0).unwrap();
        let loaded = pkt.load(&low_nibbles).unwrap();
        assert_eq!(loaded.value_bits().to_u64(), Some(0x60));

        // loading a superset reveals only the difference
        let wider = ETH_SRC.mask_of(0xff).unwrap();
        pkt.load(&wider).unwrap();

        assert_eq!(
            trace.entries(),
            &[
                TraceEntry::Load(ETH_SRC.mask_of(0xf0).unwrap().matching(0x60)),
                TraceEntry::Load(ETH_SRC.mask_of(0x0f).unwrap().matching(0x06)),
            ]
        );
    }

    #[test]
    fn test_test_deduced_from_cache() {
        let mut raw = sample_packet();
        let mut trace = Trace::new();
        let mut pkt = TracedPacket::new(&mut raw, &mut trace);

        pkt.load(&ETH_SRC.mask_of(0xf0).unwrap()).unwrap();
        // contradicted by the cache without touching the tracer
        assert!(!pkt
            .test(&ETH_SRC.mask_of(0xff0).unwrap().matching(0x570))
            .unwrap());
        // this one must really look at the packet
        assert!(pkt
            .test(&ETH_SRC.mask_of(0xff).unwrap().matching(0x66))
            .unwrap());

        assert_eq!(
            trace.entries(),
            &[
                TraceEntry::Load(ETH_SRC.mask_of(0xf0).unwrap().matching(0x60)),
                TraceEntry::Test {
                    pred: ETH_SRC.mask_of(0x0f).unwrap().matching(0x06),
                    outcome: true,
                },
            ]
        );
    }

    #[test]
    fn test_negative_test_reveals_nothing() {
        let mut raw = sample_packet();
        let mut trace = Trace::new();
        let mut pkt = TracedPacket::new(&mut raw, &mut trace);

        for dport in 0..160u64 {
            let outcome = pkt
                .test(&TCP_DST.exact().matching(dport))
                .unwrap();
            assert_eq!(outcome, dport == 80);
        }

        // every negative test re-tested the full field; the positive one
        // pinned it, and everything after was answered from the cache
        let positives = trace
            .entries()
            .iter()
            .filter(|e| matches!(e, TraceEntry::Test { outcome: true, .. }))
            .count();
        assert_eq!(positives, 1);
        for entry in trace.entries() {
            match entry {
                TraceEntry::Test { pred, .. } => {
                    assert_eq!(pred.mask_bits().to_u64(), Some(0xffff))
                }
                other => panic!("unexpected entry {}", other),
            }
        }
        assert_eq!(trace.entries().len(), 81);
    }

    #[test]
    fn test_modify_feeds_cache() {
        let mut raw = sample_packet();
        let mut trace = Trace::new();
        let mut pkt = TracedPacket::new(&mut raw, &mut trace);

        pkt.modify(&ETH_DST.mask_of(0xff).unwrap().matching(0xee))
            .unwrap();
        // the test over modified bits resolves from the cache, only the
        // untouched byte is traced
        assert!(pkt
            .test(&ETH_DST.mask_of(0xffff).unwrap().matching(0xeeee))
            .unwrap());

        assert_eq!(
            trace.entries(),
            &[TraceEntry::Test {
                pred: ETH_DST.mask_of(0xff00).unwrap().matching(0xee00),
                outcome: true,
            }]
        );
    }

    #[test]
    fn test_watch_is_untraced() {
        let mut raw = sample_packet();
        let mut trace = Trace::new();
        let mut pkt = TracedPacket::new(&mut raw, &mut trace);

        let port = pkt.watch(&IN_PORT.exact()).unwrap();
        assert_eq!(port.value_bits().to_u64(), Some(3));
        assert!(trace.is_empty());
    }

    #[test]
    fn test_mod_tracking() {
        let mut raw = sample_packet();
        let mut mpkt = ModTrackingPacket::new(&mut raw);
        mpkt.modify(&ETH_DST.value_of(0x1020_3040_5060).to_exact_field())
            .unwrap();

        let mods = mpkt.into_mods();
        assert_eq!(mods.len(), 1);
        assert_eq!(
            raw.load(&ETH_DST.exact()).value_bits().to_u64(),
            Some(0x1020_3040_5060)
        );
    }
}
