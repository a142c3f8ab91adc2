//! Demo cluster used by `simulate` and `run-sim`.
//!
//! A home node plus a few purchased servers, one node without access,
//! and a handful of targets in various states of preparation.

use batchgrid_core::{BatchConfig, Clock};
use batchgrid_oracle::{SimCluster, SimNode, SimTarget};

const PSERV_COUNT: usize = 4;
const PSERV_CAPACITY: f64 = 256.0;
const HOME_CAPACITY: f64 = 1_024.0;

/// Seed a simulated cluster driven by `clock`.
pub fn demo_world(clock: impl Clock + 'static, config: &BatchConfig, realistic: bool) -> SimCluster {
    let mut sim = SimCluster::new(clock, config).with_player_level(120);
    if realistic {
        sim = sim.realistic();
    }

    sim.add_node(SimNode::new(&config.capacity.home_node, HOME_CAPACITY));
    for i in 0..PSERV_COUNT {
        sim.add_node(SimNode::new(&format!("pserv-{i}"), PSERV_CAPACITY));
    }
    sim.add_node(SimNode::new("n00dles", 4.0).without_access());

    // name, max money, min security, money %, security, level, hack ms
    let targets = [
        ("joesguns", 2.5e8, 5.0, 0.40, 15.0, 10, 900.0),
        ("phantasy", 6.0e8, 7.0, 1.00, 7.0, 100, 1_400.0),
        ("omega-net", 1.7e9, 10.0, 0.25, 22.0, 110, 2_100.0),
        ("the-hub", 1.2e9, 12.0, 0.80, 12.0, 300, 2_600.0),
        ("foodnstuff", 5.0e7, 3.0, 1.00, 3.0, 1, 600.0),
    ];
    for (id, max_money, min_security, money_pct, security, level, hack_ms) in targets {
        let mut target = SimTarget::new(id, max_money, min_security);
        target.money = max_money * money_pct;
        target.security = security;
        target.required_level = level;
        target.base_hack_ms = hack_ms;
        sim.add_target(target);
    }
    sim
}
