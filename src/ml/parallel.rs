// ============================================================
// Layer 5 — Data-Parallel Wrapper
// ============================================================
// Keeps one model replica per rank in lock step:
//
//   1. broadcast_parameters — after construction every rank
//      replaces its weights with rank 0's, so all replicas
//      start identical. Parameter ids are taken from rank 0 as
//      well: the collective gradient sync walks parameters in id
//      order, so the ids must agree across ranks.
//   2. sync_gradients — after each backward the gradients of
//      all ranks are averaged (GradientsParams::all_reduce), so
//      every replica takes the same optimizer step.
//
// A group of one rank short-circuits both operations.

use anyhow::{anyhow, Result};
use burn::{
    collective::ReduceOperation,
    module::{ModuleMapper, Param, ParamId},
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::infra::dist::{group::DistError, ProcessGroup, Rank};

pub struct DataParallel<'g, B: AutodiffBackend> {
    group: &'g ProcessGroup<B::InnerBackend>,
}

impl<'g, B: AutodiffBackend> DataParallel<'g, B> {
    pub fn new(group: &'g ProcessGroup<B::InnerBackend>) -> Self {
        Self { group }
    }

    pub fn broadcast_parameters<M: Module<B>>(&self, model: M) -> Result<M> {
        if self.group.world_size() == 1 {
            return Ok(model);
        }

        let mut mapper = FromRankZero::<B> { group: self.group, error: None };
        let model = model.map(&mut mapper);
        match mapper.error {
            Some(e) => Err(anyhow!("Cannot broadcast model parameters: {e}")),
            None => {
                tracing::debug!("Rank {} holds rank 0's parameters", self.group.rank());
                Ok(model)
            }
        }
    }

    pub fn sync_gradients(&self, grads: GradientsParams) -> Result<GradientsParams> {
        if self.group.world_size() == 1 {
            return Ok(grads);
        }
        grads
            .all_reduce::<B::InnerBackend>(self.group.peer(), ReduceOperation::Mean)
            .map_err(|e| anyhow!("Gradient all-reduce failed: {e:?}"))
    }
}

/// Replaces every float parameter (value and id) with rank 0's.
struct FromRankZero<'g, B: AutodiffBackend> {
    group: &'g ProcessGroup<B::InnerBackend>,
    error: Option<DistError>,
}

impl<B: AutodiffBackend> FromRankZero<'_, B> {
    fn broadcast<const D: usize>(
        &self,
        id:     ParamId,
        tensor: Tensor<B, D>,
    ) -> Result<(ParamId, Tensor<B, D>), DistError> {
        let require_grad = tensor.is_require_grad();
        let values = self.group.broadcast(tensor.inner())?;
        let tensor = Tensor::from_inner(values).set_require_grad(require_grad);

        // Four 16-bit limbs, each exact in f32
        let limbs: Vec<f32> = (0..4).map(|i| ((id.val() >> (16 * i)) & 0xffff) as f32).collect();
        let limbs = Tensor::<B::InnerBackend, 1>::from_floats(limbs.as_slice(), self.group.device());
        let limbs = self.group.broadcast(limbs)?.into_data().convert::<f32>();
        let limbs = limbs.to_vec::<f32>().map_err(|e| DistError::Collective {
            op:     "broadcast",
            rank:   self.group.rank(),
            reason: format!("{e:?}"),
        })?;
        let id = limbs
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &limb)| acc | ((limb as u64) << (16 * i)));

        Ok((ParamId::from(id), tensor))
    }
}

impl<B: AutodiffBackend> ModuleMapper<B> for FromRankZero<'_, B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let (id, tensor, mapper) = param.consume();
        if self.error.is_some() {
            return Param::from_mapped_value(id, tensor, mapper);
        }
        match self.broadcast(id, tensor.clone()) {
            Ok((id, tensor)) => Param::from_mapped_value(id, tensor, mapper),
            Err(e) => {
                self.error = Some(e);
                Param::from_mapped_value(id, tensor, mapper)
            }
        }
    }
}
