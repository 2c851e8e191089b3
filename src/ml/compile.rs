// ============================================================
// Layer 5 — Model Compilation (kernel warm-up)
// ============================================================
// Burn backends build and autotune their kernels lazily, on the
// first forward pass that needs them. "Compiling" a model here
// means paying that cost up front: run a few forward passes on a
// probe batch before training starts.
//
//   Default      — 1 warm-up pass
//   MaxAutotune  — 3 passes, so autotuning sees repeated shapes
//
// Compilation is best-effort. A backend panic during warm-up, or a
// probe output that is not finite, is returned as a CompileError;
// callers log it and train uncompiled. The panic hook is silenced
// for the warm-up thread while the passes run, so a failed warm-up
// prints nothing besides the caller's own warning.

use std::{
    panic::{self, catch_unwind, AssertUnwindSafe, PanicHookInfo},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ml::host::to_host;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompileMode {
    Default,
    #[default]
    MaxAutotune,
}

impl CompileMode {
    pub fn warmup_passes(self) -> usize {
        match self {
            CompileMode::Default     => 1,
            CompileMode::MaxAutotune => 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("warm-up pass {pass} panicked: {message}")]
    WarmupPanicked { pass: usize, message: String },

    #[error("warm-up pass {pass} produced non-finite output")]
    NonFinite { pass: usize },

    #[error("cannot read warm-up output: {0}")]
    Readback(String),
}

#[derive(Debug, Clone)]
pub struct CompileReport {
    pub mode:    CompileMode,
    pub passes:  usize,
    pub elapsed: Duration,
}

/// Run the warm-up passes of `mode` through `forward` on `probe`.
pub fn try_compile<B, F>(
    mode:    CompileMode,
    probe:   Tensor<B, 4>,
    forward: F,
) -> Result<CompileReport, CompileError>
where
    B: Backend,
    F: Fn(Tensor<B, 4>) -> Tensor<B, 2>,
{
    let start  = Instant::now();
    let passes = mode.warmup_passes();
    silence_panics(|| run_passes(passes, &probe, &forward))?;
    Ok(CompileReport { mode, passes, elapsed: start.elapsed() })
}

fn run_passes<B, F>(passes: usize, probe: &Tensor<B, 4>, forward: &F) -> Result<(), CompileError>
where
    B: Backend,
    F: Fn(Tensor<B, 4>) -> Tensor<B, 2>,
{
    for pass in 1..=passes {
        let input  = probe.clone();
        let output = catch_unwind(AssertUnwindSafe(|| forward(input)))
            .map_err(|payload| CompileError::WarmupPanicked {
                pass,
                message: panic_message(payload.as_ref()),
            })?;

        let values = to_host(output).map_err(|e| CompileError::Readback(e.to_string()))?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CompileError::NonFinite { pass });
        }
        tracing::debug!("Warm-up pass {pass}/{passes} done");
    }
    Ok(())
}

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

/// The panic hook is process-wide; one swap at a time.
static HOOK_SWAP: Mutex<()> = Mutex::new(());

/// Run `f` with panics on this thread kept off stderr. Panics on other
/// threads still reach the previous hook.
fn silence_panics<T>(f: impl FnOnce() -> T) -> T {
    let _swap = HOOK_SWAP.lock().unwrap_or_else(|e| e.into_inner());
    let owner = thread::current().id();

    let previous: Arc<PanicHook> = Arc::new(panic::take_hook());
    let forward = Arc::clone(&previous);
    panic::set_hook(Box::new(move |info| {
        if thread::current().id() != owner {
            forward(info);
        }
    }));

    let out = f();

    drop(panic::take_hook());
    match Arc::try_unwrap(previous) {
        Ok(hook) => panic::set_hook(hook),
        Err(shared) => panic::set_hook(Box::new(move |info| shared(info))),
    }
    out
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::amp::Autocast;
    use crate::ml::model::ExampleModelConfig;
    use burn::backend::NdArray;
    use std::{
        cell::Cell,
        sync::atomic::{AtomicUsize, Ordering},
    };

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_pass_counts() {
        assert_eq!(CompileMode::Default.warmup_passes(), 1);
        assert_eq!(CompileMode::MaxAutotune.warmup_passes(), 3);
    }

    #[test]
    fn test_compiles_matching_probe() {
        let device = Default::default();
        let model  = ExampleModelConfig::new().init::<TestBackend>(&device);
        let calls  = Cell::new(0);
        let report = try_compile(
            CompileMode::MaxAutotune,
            Tensor::zeros([1, 1, 28, 28], &device),
            |x| {
                calls.set(calls.get() + 1);
                model.forward(x, &Autocast::disabled())
            },
        )
        .unwrap();
        assert_eq!(report.passes, 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_shape_mismatch_is_reported_not_raised() {
        let device = Default::default();
        let model  = ExampleModelConfig::new().init::<TestBackend>(&device);
        // 27 * 27 inputs cannot feed a 784-wide linear layer
        let result = try_compile(
            CompileMode::Default,
            Tensor::zeros([1, 1, 27, 27], &device),
            |x| model.forward(x, &Autocast::disabled()),
        );
        assert!(matches!(result, Err(CompileError::WarmupPanicked { pass: 1, .. })));
    }

    #[test]
    fn test_non_finite_output_fails() {
        let device = Default::default();
        let result = try_compile::<TestBackend, _>(
            CompileMode::Default,
            Tensor::zeros([1, 1, 2, 2], &device),
            |x| x.flatten::<2>(1, 3).div_scalar(0.0),
        );
        assert!(matches!(result, Err(CompileError::NonFinite { pass: 1 })));
    }

    #[test]
    fn test_failed_warmup_does_not_reach_the_panic_hook() {
        let device = Default::default();
        let model  = ExampleModelConfig::new().init::<TestBackend>(&device);

        // Count panics of this thread only; other tests may panic meanwhile
        let seen  = Arc::new(AtomicUsize::new(0));
        let me    = thread::current().id();
        let outer: Arc<PanicHook> = Arc::new(panic::take_hook());
        let (counter, fallback) = (Arc::clone(&seen), Arc::clone(&outer));
        panic::set_hook(Box::new(move |info| {
            if thread::current().id() == me {
                counter.fetch_add(1, Ordering::SeqCst);
            } else {
                fallback(info);
            }
        }));

        let result = try_compile(
            CompileMode::Default,
            Tensor::zeros([1, 1, 27, 27], &device),
            |x| model.forward(x, &Autocast::disabled()),
        );

        drop(panic::take_hook());
        panic::set_hook(Box::new(move |info| outer(info)));

        assert!(result.is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
