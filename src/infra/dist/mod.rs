// ============================================================
// Layer 6 — Distributed Process Group
// ============================================================
// One peer per device, cooperating through burn's collective
// server (burn::collective). A launch hosts every rank of the
// world in this process, one thread per rank, the way burn's own
// DDP strategy runs one worker per device:
//
//   env.rs    — MASTER_ADDR / MASTER_PORT / RANK / LOCAL_RANK /
//               WORLD_SIZE with defaults, no env mutation
//   group.rs  — ProcessGroup: register / all-reduce / broadcast /
//               barrier / finish on the collective server
//
// Rank-zero gating:
//
//   print0!(group, "...")  — println! on rank 0 only
//   warn0!(group, "...")   — tracing::warn! on rank 0 only
//
// `group` is an Option<&impl Rank>; None behaves as rank 0.

/// Print only on rank 0.
macro_rules! print0 {
    ($group:expr, $($arg:tt)*) => {
        if $crate::infra::dist::rank($group) == 0 {
            println!($($arg)*);
        }
    };
}

/// Warn only on rank 0.
macro_rules! warn0 {
    ($group:expr, $($arg:tt)*) => {
        if $crate::infra::dist::rank($group) == 0 {
            tracing::warn!($($arg)*);
        }
    };
}

pub mod env;
pub mod group;

use anyhow::{anyhow, Context, Result};
use std::thread;

pub use env::DistEnv;
pub use group::ProcessGroup;

/// Anything that knows its position in a group.
pub trait Rank {
    fn rank(&self) -> usize;
}

impl Rank for DistEnv {
    fn rank(&self) -> usize {
        self.rank
    }
}

/// Rank of the caller, or 0 when no group is active.
pub fn rank<R: Rank + ?Sized>(group: Option<&R>) -> usize {
    group.map(|g| g.rank()).unwrap_or(0)
}

/// Run `run` for every rank of `env`'s world, one thread per rank, and
/// return the results in rank order. A world of one runs inline.
pub fn launch<T, F>(env: &DistEnv, run: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(DistEnv) -> Result<T> + Sync,
{
    if env.world_size == 1 {
        return Ok(vec![run(env.clone())?]);
    }

    let run = &run;
    thread::scope(|s| {
        let handles = env
            .peers()
            .into_iter()
            .map(|peer| {
                thread::Builder::new()
                    .name(format!("rank-{}", peer.rank))
                    .spawn_scoped(s, move || run(peer))
                    .context("Failed to spawn a rank thread")
            })
            .collect::<Result<Vec<_>>>()?;

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .map_err(|_| anyhow!("Rank {rank} panicked"))?
                    .with_context(|| format!("Rank {rank} failed"))
            })
            .collect()
    })
}


#[cfg(test)]
mod tests {
    use super::testing::capture_logs;
    use super::*;

    fn env(rank: usize, world_size: usize) -> DistEnv {
        DistEnv { rank, local_rank: rank, world_size, ..DistEnv::default() }
    }

    #[test]
    fn test_rank_without_group_is_zero() {
        assert_eq!(rank::<DistEnv>(None), 0);
        assert_eq!(rank(Some(&env(3, 4))), 3);
    }

    #[test]
    fn test_warn0_is_silent_off_rank_zero() {
        let ((), off) = capture_logs(|| warn0!(Some(&env(1, 2)), "gated warning"));
        assert!(off.is_empty());

        let ((), on) = capture_logs(|| warn0!(Some(&env(0, 2)), "gated warning"));
        assert_eq!(on.matches("gated warning").count(), 1);
        assert!(on.contains("WARN"));
    }

    #[test]
    fn test_launch_runs_every_rank_in_order() {
        let ranks = launch(&env(0, 3), |peer| Ok((peer.rank, peer.local_rank, peer.world_size))).unwrap();
        assert_eq!(ranks, vec![(0, 0, 3), (1, 1, 3), (2, 2, 3)]);
    }

    #[test]
    fn test_launch_reports_the_failing_rank() {
        let err = launch(&env(0, 2), |peer| {
            if peer.rank == 1 { anyhow::bail!("boom") } else { Ok(()) }
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("Rank 1 failed"));
    }
}
