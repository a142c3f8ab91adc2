//! Target selection.
//!
//! Candidates are filtered on size, level and success chance, then ranked
//! by expected extraction per unit of weaken time:
//! `max_money × fraction_per_thread × chance / weaken_ms`.
//! A pinned target bypasses scoring entirely.

use tracing::debug;

use batchgrid_core::{ActionKind, BatchConfig, TargetId};
use batchgrid_oracle::{ClusterOracle, OracleResult, TargetOracle};

/// Scored candidate, kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetScore {
    pub target: TargetId,
    /// Higher is better.
    pub score: f64,
    pub max_money: f64,
    pub chance: f64,
    pub weaken_ms: f64,
}

/// Targets to schedule this refresh cycle, best first.
pub fn select_targets<E>(env: &E, config: &BatchConfig) -> Vec<TargetId>
where
    E: TargetOracle + ClusterOracle,
{
    if let Some(pinned) = &config.targets.pinned {
        debug!(target = %pinned, "using pinned target");
        return vec![pinned.clone()];
    }

    let keep = config.targets.max_targets.max(1) as usize;
    rank_targets(env, config)
        .into_iter()
        .take(keep)
        .map(|s| s.target)
        .collect()
}

/// Every eligible target with its score, sorted descending.
pub fn rank_targets<E>(env: &E, config: &BatchConfig) -> Vec<TargetScore>
where
    E: TargetOracle + ClusterOracle,
{
    let mut scores: Vec<TargetScore> = env
        .known_targets()
        .into_iter()
        .filter(|t| *t != config.capacity.home_node)
        .filter_map(|target| match score_target(env, config, &target) {
            Ok(score) => score,
            Err(e) => {
                debug!(%target, error = %e, "target not scored");
                None
            }
        })
        .collect();

    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.target.cmp(&b.target))
    });
    scores
}

fn score_target<E>(env: &E, config: &BatchConfig, target: &str) -> OracleResult<Option<TargetScore>>
where
    E: TargetOracle + ClusterOracle,
{
    let filters = &config.targets;

    let max_money = env.max_money(target)?;
    if max_money < filters.min_max_money {
        return Ok(None);
    }
    if filters.only_hackable && env.required_level(target)? > env.player_level() {
        return Ok(None);
    }
    if filters.only_rooted && !env.has_usable_access(target) {
        return Ok(None);
    }
    let chance = env.success_chance(target)?;
    if chance < filters.min_chance {
        return Ok(None);
    }

    let fraction = env.extraction_fraction_per_thread(target)?;
    let weaken_ms = env.action_duration(ActionKind::Weaken, target)?.max(1.0);
    Ok(Some(TargetScore {
        target: target.to_string(),
        score: max_money * fraction * chance / weaken_ms,
        max_money,
        chance,
        weaken_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchgrid_core::ManualClock;
    use batchgrid_oracle::{SimCluster, SimNode, SimTarget};

    fn target(id: &str, max_money: f64) -> SimTarget {
        SimTarget::new(id, max_money, 5.0)
    }

    fn cluster() -> SimCluster {
        let sim = SimCluster::new(ManualClock::new(0), &BatchConfig::default()).with_player_level(50);
        sim.add_node(SimNode::new("home", 64.0));
        sim.add_target(target("small", 1e9));
        sim.add_target(target("big", 5e9));
        sim.add_target(target("tiny", 1e6));

        let mut slow = target("slow", 5e9);
        slow.base_hack_ms = 10_000.0;
        sim.add_target(slow);

        let mut locked = target("locked", 1e11);
        locked.required_level = 500;
        sim.add_target(locked);

        let mut unlucky = target("unlucky", 1e11);
        unlucky.chance = 0.3;
        sim.add_target(unlucky);
        sim
    }

    #[test]
    fn ranks_by_value_per_weaken_time() {
        let sim = cluster();
        let ranked = rank_targets(&sim, &BatchConfig::default());
        let ids: Vec<&str> = ranked.iter().map(|s| s.target.as_str()).collect();
        assert_eq!(ids, vec!["big", "small", "slow"]);
    }

    #[test]
    fn keeps_at_most_max_targets() {
        let sim = cluster();
        let mut config = BatchConfig::default();
        config.targets.max_targets = 2;
        assert_eq!(select_targets(&sim, &config), vec!["big", "small"]);

        config.targets.max_targets = 0;
        assert_eq!(select_targets(&sim, &config), vec!["big"]);
    }

    #[test]
    fn level_filter_can_be_disabled() {
        let sim = cluster();
        let mut config = BatchConfig::default();
        config.targets.only_hackable = false;
        assert_eq!(select_targets(&sim, &config)[0], "locked");
    }

    #[test]
    fn pinned_target_skips_scoring() {
        let sim = cluster();
        let mut config = BatchConfig::default();
        config.targets.pinned = Some("tiny".to_string());
        assert_eq!(select_targets(&sim, &config), vec!["tiny"]);
    }

    #[test]
    fn rooted_filter_requires_access() {
        let sim = cluster();
        let mut config = BatchConfig::default();
        config.targets.only_rooted = true;
        assert!(select_targets(&sim, &config).is_empty());
    }
}
