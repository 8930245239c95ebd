//! CSFQ behaviour under sustained congestion.
//!
//! Two flows share a link drained at 1000 B/s: a heavy flow offering
//! 2000 B/s and a light one offering 250 or 500 B/s. With equal weights the
//! light flow is within its fair share and should pass untouched while the
//! heavy flow absorbs the drops.

use std::sync::Arc;

use meridian_core::{BoundingBox3, LocationEntry, MessageId, ObjectId, ObjectMessage, ServerId};
use meridian_flow::{
    CsfqConfig, CsfqFlowScheduler, FlowError, FlowScheduler, NoObjectLocator, SchedulerContext,
    ServiceQueue, SpatialPartition,
};

use crate::scenarios::seeds::REGRESSION_SEEDS;

const HEAVY: u64 = 1;
const LIGHT: u64 = 2;
const STEP_MS: u64 = 10;
const HEAVY_PERIOD_MS: u64 = 50;
const LIGHT_PERIOD_MS: u64 = 400;
const HALF_SHARE_PERIOD_MS: u64 = 200;
const SERVICE_PERIOD_MS: u64 = 100;

struct Unpartitioned;

impl SpatialPartition for Unpartitioned {
    fn server_region(&self, _server: ServerId) -> Vec<BoundingBox3> {
        Vec::new()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    sent: u64,
    dropped: u64,
}

impl Tally {
    #[allow(clippy::cast_precision_loss)]
    fn drop_rate(self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        self.dropped as f64 / self.sent as f64
    }
}

fn scheduler(seed: u64) -> CsfqFlowScheduler {
    let ctx = SchedulerContext::new(
        ServerId::new(1),
        Arc::new(Unpartitioned),
        Arc::new(NoObjectLocator),
    );
    let sched = CsfqFlowScheduler::new(
        CsfqConfig::for_testing().with_seed(seed),
        ctx,
        ServerId::new(2),
        4000,
    );
    sched.update_sender_stats(0.0, 1000.0);
    sched
}

/// 100 bytes from `src` to object 99.
fn message(id: u64, src: u64) -> ObjectMessage {
    ObjectMessage::new(
        MessageId::new(id),
        ObjectId::new(src),
        0,
        ObjectId::new(99),
        0,
        vec![0u8; 68],
    )
}

/// Drives both flows for `until_ms`, the heavy one only until
/// `heavy_stops_ms`, the light one every `light_period_ms`. Returns tallies
/// counted from `measure_from_ms`.
fn run(
    seed: u64,
    light_period_ms: u64,
    until_ms: u64,
    heavy_stops_ms: u64,
    measure_from_ms: u64,
) -> (Tally, Tally) {
    let mut sched = scheduler(seed);
    let here = LocationEntry::new(ServerId::new(1), 1.0);
    let there = LocationEntry::new(ServerId::new(2), 1.0);
    let mut heavy = Tally::default();
    let mut light = Tally::default();
    let mut next_id = 0;

    let mut t_ms = 0;
    while t_ms < until_ms {
        let now_us = t_ms * 1000;
        let measuring = t_ms >= measure_from_ms;

        let mut offer = |src: u64, tally: &mut Tally| {
            next_id += 1;
            let refused = match sched.push(message(next_id, src), &here, &there, now_us) {
                Ok(_) => false,
                Err(FlowError::Dropped { .. } | FlowError::ZeroWeight) => true,
                Err(e) => panic!("unexpected push error: {e}"),
            };
            if measuring {
                tally.sent += 1;
                tally.dropped += u64::from(refused);
            }
        };
        if t_ms < heavy_stops_ms && t_ms % HEAVY_PERIOD_MS == 0 {
            offer(HEAVY, &mut heavy);
        }
        if t_ms % light_period_ms == 0 {
            offer(LIGHT, &mut light);
        }
        if t_ms % SERVICE_PERIOD_MS == 0 {
            let _ = ServiceQueue::pop(&mut sched);
        }
        t_ms += STEP_MS;
    }
    (heavy, light)
}

#[test]
fn test_heavy_flow_absorbs_drops() {
    for &seed in REGRESSION_SEEDS.iter().take(3) {
        let (heavy, light) = run(seed, LIGHT_PERIOD_MS, 120_000, u64::MAX, 30_000);
        let heavy_rate = heavy.drop_rate();
        let light_rate = light.drop_rate();
        assert!(
            (0.6..=0.9).contains(&heavy_rate),
            "seed {seed}: heavy flow drop rate {heavy_rate:.3}"
        );
        assert!(light_rate < 0.1, "seed {seed}: light flow drop rate {light_rate:.3}");
    }
}

#[test]
fn test_fair_split_against_half_share_flow() {
    // 2000 B/s against 500 B/s on a 1000 B/s link: the heavy flow keeps
    // about a quarter of its offer, the light one nearly all of it.
    for &seed in REGRESSION_SEEDS {
        let (heavy, light) = run(seed, HALF_SHARE_PERIOD_MS, 120_000, u64::MAX, 30_000);
        let heavy_rate = heavy.drop_rate();
        let light_rate = light.drop_rate();
        assert!(
            (0.70..=0.82).contains(&heavy_rate),
            "seed {seed}: heavy flow drop rate {heavy_rate:.3}"
        );
        assert!(light_rate < 0.05, "seed {seed}: light flow drop rate {light_rate:.3}");
    }
}

#[test]
fn test_drops_stop_once_congestion_clears() {
    for &seed in REGRESSION_SEEDS.iter().take(3) {
        let (heavy, light) = run(seed, LIGHT_PERIOD_MS, 120_000, 60_000, 65_000);
        assert_eq!(heavy.sent, 0);
        assert!(light.sent > 100);
        assert_eq!(light.dropped, 0, "seed {seed}: light flow dropped after recovery");
    }
}

#[test]
fn test_alpha_tracks_link_capacity() {
    let mut sched = scheduler(42);
    let here = LocationEntry::new(ServerId::new(1), 1.0);
    let there = LocationEntry::new(ServerId::new(2), 1.0);
    let mut id = 0;
    for t_ms in (0..30_000u64).step_by(STEP_MS as usize) {
        if t_ms % HEAVY_PERIOD_MS == 0 {
            id += 1;
            let _ = sched.push(message(id, HEAVY), &here, &there, t_ms * 1000);
        }
        if t_ms % SERVICE_PERIOD_MS == 0 {
            let _ = ServiceQueue::pop(&mut sched);
        }
    }
    let stats = sched.stats();
    assert!(stats.congested);
    assert!(stats.alpha > 0.0 && stats.alpha <= 1000.0, "alpha {}", stats.alpha);
    assert!(stats.probabilistic_drops > 0);
}
