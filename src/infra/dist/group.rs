// Process group on top of burn's collective server.
//
// Every rank is a peer of the in-process collective server for its
// (inner, non-autodiff) backend. `init` registers the peer and
// blocks until `world_size` peers have registered with the same
// configuration; a peer that disagrees on the world size is turned
// away with an error. `destroy` unregisters.
//
// A group of one never touches the collective server: every
// collective is then the identity.

use burn::{
    collective::{
        self, AllReduceStrategy, CollectiveConfig, CollectiveError, PeerId, ReduceOperation,
    },
    prelude::*,
    tensor::TensorPrimitive,
};
use thiserror::Error;

use super::env::DistEnv;
use super::Rank;

#[derive(Debug, Error)]
pub enum DistError {
    #[error("invalid {key}={value:?}: {reason}")]
    InvalidEnv { key: &'static str, value: String, reason: String },

    #[error("rank {rank} is outside a group of {world_size}")]
    RankOutOfRange { rank: usize, world_size: usize },

    #[error("collective {op} failed on rank {rank}: {reason}")]
    Collective { op: &'static str, rank: usize, reason: String },
}

pub struct ProcessGroup<B: Backend> {
    env:    DistEnv,
    peer:   PeerId,
    device: B::Device,
}

impl<B: Backend> ProcessGroup<B> {
    /// Join the group described by `env` with `device` as this rank's device.
    pub fn init(env: &DistEnv, device: B::Device) -> Result<Self, DistError> {
        env.validate()?;
        let group = Self { env: env.clone(), peer: PeerId::from(env.rank), device };
        if group.world_size() == 1 {
            return Ok(group);
        }

        collective::register::<B>(group.peer, group.device.clone(), collective_config(env))
            .map_err(|e| group.error("register", e))?;
        tracing::debug!(
            "Rank {} joined a group of {} (master {}:{})",
            env.rank,
            env.world_size,
            env.master_addr,
            env.master_port,
        );
        Ok(group)
    }

    pub fn world_size(&self) -> usize {
        self.env.world_size
    }

    pub fn is_primary(&self) -> bool {
        self.env.rank == 0
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Element-wise sum of `tensor` over every rank.
    pub fn all_reduce_sum<const D: usize>(&self, tensor: Tensor<B, D>) -> Result<Tensor<B, D>, DistError> {
        if self.world_size() == 1 {
            return Ok(tensor);
        }
        let reduced = collective::all_reduce::<B>(
            self.peer,
            tensor.into_primitive().tensor(),
            ReduceOperation::Sum,
        )
        .map_err(|e| self.error("all_reduce", e))?;
        Ok(Tensor::from_primitive(TensorPrimitive::Float(reduced)))
    }

    /// Rank 0's `tensor` on every rank; the values other ranks pass are ignored.
    pub fn broadcast<const D: usize>(&self, tensor: Tensor<B, D>) -> Result<Tensor<B, D>, DistError> {
        if self.world_size() == 1 {
            return Ok(tensor);
        }
        let source = self.is_primary().then(|| tensor.into_primitive().tensor());
        let received = collective::broadcast::<B>(self.peer, source)
            .map_err(|e| self.error("broadcast", e))?;
        Ok(Tensor::from_primitive(TensorPrimitive::Float(received)))
    }

    /// Block until every rank has reached the barrier.
    pub fn barrier(&self) -> Result<(), DistError> {
        let token = Tensor::<B, 1>::zeros([1], &self.device);
        self.all_reduce_sum(token).map(|_| ())
    }

    /// Leave the group.
    pub fn destroy(self) -> Result<(), DistError> {
        if self.world_size() == 1 {
            return Ok(());
        }
        collective::finish_collective::<B>(self.peer).map_err(|e| self.error("finish", e))?;
        tracing::debug!("Rank {} left the group", self.env.rank);
        Ok(())
    }

    fn error(&self, op: &'static str, e: CollectiveError) -> DistError {
        DistError::Collective { op, rank: self.env.rank, reason: format!("{e:?}") }
    }
}

impl<B: Backend> Rank for ProcessGroup<B> {
    fn rank(&self) -> usize {
        self.env.rank
    }
}

/// All peers of one launch share this configuration; the server
/// refuses a registration whose configuration differs.
fn collective_config(env: &DistEnv) -> CollectiveConfig {
    CollectiveConfig::default()
        .with_num_devices(env.world_size)
        .with_local_all_reduce_strategy(AllReduceStrategy::Tree(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::dist::testing::{collective_lock, TestInner};
    use crate::ml::host::to_host;
    use std::thread;

    fn env(rank: usize, world_size: usize) -> DistEnv {
        DistEnv { rank, local_rank: rank, world_size, ..DistEnv::default() }
    }

    #[test]
    fn test_single_rank_collectives_are_identity() {
        let group = ProcessGroup::<TestInner>::init(&env(0, 1), Default::default()).unwrap();
        let x = Tensor::<TestInner, 1>::from_floats([1.0, 2.0], group.device());
        assert_eq!(to_host(group.all_reduce_sum(x.clone()).unwrap()).unwrap(), vec![1.0, 2.0]);
        assert_eq!(to_host(group.broadcast(x).unwrap()).unwrap(), vec![1.0, 2.0]);
        group.barrier().unwrap();
        group.destroy().unwrap();
    }

    #[test]
    fn test_all_reduce_sums_and_broadcast_takes_rank_zero() {
        let _lock = collective_lock();

        let run = |rank: usize| {
            let group = ProcessGroup::<TestInner>::init(&env(rank, 3), Default::default()).unwrap();
            let x = Tensor::<TestInner, 1>::full([2], (rank + 1) as f32, group.device());
            let sum = to_host(group.all_reduce_sum(x.clone()).unwrap()).unwrap();
            let root = to_host(group.broadcast(x).unwrap()).unwrap();
            group.barrier().unwrap();
            group.destroy().unwrap();
            (sum, root)
        };

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..3).map(|rank| s.spawn(move || run(rank))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for (sum, root) in results {
            assert_eq!(sum, vec![6.0, 6.0]);
            assert_eq!(root, vec![1.0, 1.0]);
        }
    }

    #[test]
    fn test_mismatched_world_size_fails_the_join() {
        let _lock = collective_lock();

        let (first, second) = thread::scope(|s| {
            let first  = s.spawn(|| ProcessGroup::<TestInner>::init(&env(0, 2), Default::default()));
            let second = s.spawn(|| ProcessGroup::<TestInner>::init(&env(1, 2), Default::default()));
            (first.join().unwrap().unwrap(), second.join().unwrap().unwrap())
        });

        // A third rank that believes in a group of three is turned away
        let err = ProcessGroup::<TestInner>::init(&env(2, 3), Default::default()).err().unwrap();
        assert!(matches!(err, DistError::Collective { op: "register", rank: 2, .. }));

        first.destroy().unwrap();
        second.destroy().unwrap();
    }

    #[test]
    fn test_rank_outside_world_is_rejected_before_joining() {
        let err = ProcessGroup::<TestInner>::init(&env(2, 2), Default::default()).err().unwrap();
        assert!(matches!(err, DistError::RankOutOfRange { rank: 2, world_size: 2 }));
    }
}
