//! Forwarding across simulated servers.

use meridian_core::{MessageId, ObjectId, ServerId};
use meridian_routing::{DropCause, RouteOutcome, TraceEvent};

use crate::properties::check_exactly_once;
use crate::scenarios::topologies::THREE_SERVERS;
use crate::scenarios::workloads::UniformTraffic;
use crate::simulation::{SimConfig, Simulation};

const S1: ServerId = ServerId::new(1);
const S2: ServerId = ServerId::new(2);
const S3: ServerId = ServerId::new(3);

fn event_msg(event: &TraceEvent) -> MessageId {
    match event {
        TraceEvent::ForwardingStarted { msg, .. }
        | TraceEvent::CacheHit { msg, .. }
        | TraceEvent::CacheMiss { msg }
        | TraceEvent::LookupFinished { msg, .. }
        | TraceEvent::Enqueued { msg, .. }
        | TraceEvent::Sent { msg, .. }
        | TraceEvent::DeliveredLocally { msg }
        | TraceEvent::Dropped { msg, .. } => *msg,
    }
}

fn saw(sim: &Simulation, server: ServerId, msg: MessageId) -> bool {
    sim.server(server)
        .trace()
        .count(|e| event_msg(e) == msg)
        > 0
}

fn delivered_on(sim: &Simulation, server: ServerId, msg: MessageId) -> bool {
    sim.server(server)
        .host()
        .delivered()
        .iter()
        .any(|m| m.id == msg)
}

#[test]
fn test_space_bound_message_bypasses_lookup() {
    let mut sim = Simulation::with_servers(SimConfig::default(), THREE_SERVERS);
    sim.place_object(ObjectId::new(100), S1);
    let msg = sim.message(ObjectId::new(100), ObjectId::SPACE, 16);
    let id = msg.id;

    assert!(matches!(sim.send(S1, msg), Ok(RouteOutcome::DeliveredLocally)));
    assert!(delivered_on(&sim, S1, id));
    let stats = sim.server(S1).forwarder().stats();
    assert_eq!(stats.lookups_issued, 0);
    assert_eq!(stats.cache_misses, 0);
}

#[test]
fn test_remote_object_reached_through_lookup() {
    let mut sim = Simulation::with_servers(SimConfig::default(), THREE_SERVERS);
    sim.place_object(ObjectId::new(100), S1);
    sim.place_object(ObjectId::new(300), S3);

    let msg = sim.message(ObjectId::new(100), ObjectId::new(300), 64);
    let id = msg.id;
    assert!(matches!(sim.send(S1, msg), Ok(RouteOutcome::LookupPending)));
    sim.run_for(10_000);

    assert!(delivered_on(&sim, S3, id));
    assert!(!saw(&sim, S2, id));
    let cached = sim.server(S1).forwarder().cache().get(ObjectId::new(300), sim.now_us());
    assert_eq!(cached.map(|e| e.server()), Some(S3));

    // The second message uses the cache.
    let msg = sim.message(ObjectId::new(100), ObjectId::new(300), 64);
    assert!(matches!(sim.send(S1, msg), Ok(RouteOutcome::Enqueued { dest: S3 })));
    assert_eq!(sim.server(S1).forwarder().stats().lookups_issued, 1);
    assert_eq!(sim.server(S1).forwarder().stats().cache_hits, 1);
}

#[test]
fn test_stale_cache_corrected_by_previous_hop() {
    let mut sim = Simulation::with_servers(SimConfig::default(), THREE_SERVERS);
    let sender = ObjectId::new(100);
    let mover = ObjectId::new(7);
    sim.place_object(sender, S1);
    sim.place_object(mover, S2);

    let first = sim.message(sender, mover, 32);
    let first_id = first.id;
    let _ = sim.send(S1, first);
    sim.run_for(10_000);
    assert!(delivered_on(&sim, S2, first_id));

    // Server 1 still believes the object is on server 2.
    sim.place_object(mover, S3);
    let second = sim.message(sender, mover, 32);
    let second_id = second.id;
    assert!(matches!(sim.send(S1, second), Ok(RouteOutcome::Enqueued { dest: S2 })));
    sim.run_for(20_000);

    assert!(delivered_on(&sim, S3, second_id));
    assert!(!delivered_on(&sim, S2, second_id));
    assert_eq!(sim.server(S2).forwarder().stats().cache_updates_sent, 1);
    assert_eq!(sim.server(S1).forwarder().stats().cache_updates_received, 1);
    let cached = sim.server(S1).forwarder().cache().get(mover, sim.now_us());
    assert_eq!(cached.map(|e| e.server()), Some(S3));

    let third = sim.message(sender, mover, 32);
    let third_id = third.id;
    assert!(matches!(sim.send(S1, third), Ok(RouteOutcome::Enqueued { dest: S3 })));
    sim.run_for(10_000);
    assert!(delivered_on(&sim, S3, third_id));
    assert!(!saw(&sim, S2, third_id));
}

#[test]
fn test_unknown_object_dropped_after_lookup() {
    let mut sim = Simulation::with_servers(SimConfig::default(), THREE_SERVERS);
    sim.place_object(ObjectId::new(100), S1);
    let msg = sim.message(ObjectId::new(100), ObjectId::new(555), 16);
    let id = msg.id;

    assert!(matches!(sim.send(S1, msg), Ok(RouteOutcome::LookupPending)));
    sim.run_for(5_000);

    assert_eq!(sim.server(S1).trace().drops(DropCause::LookupFailed), 1);
    assert_eq!(
        sim.server(S1).forwarder().stats().drops(DropCause::LookupFailed),
        1
    );
    assert!(sim.deliveries().iter().all(|(_, m)| m.id != id));
    assert_eq!(sim.server(S1).forwarder().pending_lookups(), 0);
}

#[test]
fn test_weight_updates_flow_between_all_peers() {
    let mut sim = Simulation::with_servers(SimConfig::default(), THREE_SERVERS);
    sim.run_for(100_000);

    for id in sim.server_ids() {
        let stats = sim.server(id).forwarder().stats();
        // Two peers, one update each per 10ms.
        assert!(stats.weight_updates_sent >= 10, "{id}: sent {}", stats.weight_updates_sent);
        assert!(
            stats.weight_updates_received >= 10,
            "{id}: received {}",
            stats.weight_updates_received
        );
    }
}

#[test]
fn test_uniform_traffic_delivered_exactly_once() {
    let mut sim = Simulation::with_servers(SimConfig::default(), THREE_SERVERS);
    let workload = UniformTraffic::default();
    workload.place(&mut sim);
    let sent = workload.run(&mut sim, 42);
    sim.run_for(2_000_000);

    let violations = check_exactly_once(&sim, &sent);
    assert!(violations.is_empty(), "violations: {violations:?}");
    // Unconstrained links and region scheduling drop nothing.
    assert_eq!(sim.deliveries().len(), sent.len());
}
