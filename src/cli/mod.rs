// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// `clap`, picks the burn backend for `--device`, and hands off
// to a Layer 2 use case.
//
//   --device gpu  → Autodiff<Wgpu>     (one GPU per rank, indexed
//                                       by LOCAL_RANK)
//   --device cpu  → Autodiff<NdArray>
//
// `ddp` and `combined` launch every rank of WORLD_SIZE in this
// process and print rank 0's report.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::{Context, Result};
use burn::backend::{
    ndarray::NdArrayDevice,
    wgpu::WgpuDevice,
    Autodiff, NdArray, Wgpu,
};
use clap::Parser;
use commands::{AmpArgs, AugmentArgs, CombinedArgs, Commands, DdpArgs, DeviceArg};

use crate::application::{
    amp_use_case::AmpUseCase,
    augment_use_case::AugmentUseCase,
    combined_use_case::CombinedUseCase,
    ddp_use_case::DdpUseCase,
    TrainingReport,
};
use crate::infra::dist::{self, DistEnv};

type GpuBackend = Autodiff<Wgpu>;
type CpuBackend = Autodiff<NdArray>;

#[derive(Parser, Debug)]
#[command(
    name = "train-recipes",
    version = "0.1.0",
    about = "Mixed precision, data-parallel, device augmentation and checkpoint recipes."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let report = match self.command {
            Commands::Amp(args)      => run_amp(args)?,
            Commands::Ddp(args)      => run_ddp(args)?,
            Commands::Augment(args)  => run_augment(args)?,
            Commands::Combined(args) => run_combined(args)?,
        };
        tracing::debug!("Report: {}", serde_json::to_string(&report)?);
        Ok(())
    }
}

fn run_amp(args: AmpArgs) -> Result<TrainingReport> {
    let device   = args.device.device;
    let use_case = AmpUseCase::new(args.into());
    match device {
        DeviceArg::Gpu => use_case.execute::<GpuBackend>(&WgpuDevice::default()),
        DeviceArg::Cpu => use_case.execute::<CpuBackend>(&NdArrayDevice::Cpu),
    }
}

fn run_ddp(args: DdpArgs) -> Result<TrainingReport> {
    let env      = DistEnv::from_process_env()?;
    let device   = args.device.device;
    let use_case = DdpUseCase::new(args.into());
    let reports  = match device {
        DeviceArg::Gpu => dist::launch(&env, |peer| {
            use_case.execute::<GpuBackend>(&peer, WgpuDevice::DiscreteGpu(peer.local_rank))
        })?,
        DeviceArg::Cpu => dist::launch(&env, |peer| {
            use_case.execute::<CpuBackend>(&peer, NdArrayDevice::Cpu)
        })?,
    };
    rank_zero(reports)
}

fn run_augment(args: AugmentArgs) -> Result<TrainingReport> {
    let device   = args.device.device;
    let use_case = AugmentUseCase::new(args.into());
    match device {
        DeviceArg::Gpu => use_case.execute::<GpuBackend>(&WgpuDevice::default()),
        DeviceArg::Cpu => use_case.execute::<CpuBackend>(&NdArrayDevice::Cpu),
    }
}

fn run_combined(args: CombinedArgs) -> Result<TrainingReport> {
    let env      = DistEnv::from_process_env()?;
    let device   = args.device.device;
    let use_case = CombinedUseCase::new(args.into());
    let reports  = match device {
        DeviceArg::Gpu => dist::launch(&env, |peer| {
            use_case.execute::<GpuBackend>(&peer, WgpuDevice::DiscreteGpu(peer.local_rank))
        })?,
        DeviceArg::Cpu => dist::launch(&env, |peer| {
            use_case.execute::<CpuBackend>(&peer, NdArrayDevice::Cpu)
        })?,
    };
    rank_zero(reports)
}

fn rank_zero(reports: Vec<TrainingReport>) -> Result<TrainingReport> {
    reports.into_iter().next().context("No rank reported back")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::combined_use_case::CombinedConfig;
    use crate::ml::compile::CompileMode;

    #[test]
    fn test_combined_defaults_match_config() {
        let cli = Cli::try_parse_from(["train-recipes", "combined", "--device", "cpu"]).unwrap();
        let Commands::Combined(args) = cli.command else { panic!("wrong subcommand") };
        assert_eq!(args.device.device, DeviceArg::Cpu);

        let cfg: CombinedConfig = args.into();
        let default = CombinedConfig::default();
        assert_eq!(cfg.batch_size, default.batch_size);
        assert_eq!(cfg.num_epochs, default.num_epochs);
        assert_eq!(cfg.compile.mode, Some(CompileMode::MaxAutotune));
        assert!(cfg.use_amp);
        assert!(cfg.data.download);
    }

    #[test]
    fn test_augment_flags() {
        let cli = Cli::try_parse_from([
            "train-recipes", "augment", "--accumulation", "4", "--synthetic-samples", "100",
        ])
        .unwrap();
        let Commands::Augment(args) = cli.command else { panic!("wrong subcommand") };
        assert_eq!(args.device.device, DeviceArg::Gpu);
        assert_eq!(args.accumulation, Some(4));
        assert_eq!(args.data.synthetic_samples, Some(100));
    }

    #[test]
    fn test_compile_off() {
        let cli = Cli::try_parse_from(["train-recipes", "combined", "--compile", "off"]).unwrap();
        let Commands::Combined(args) = cli.command else { panic!("wrong subcommand") };
        let cfg: CombinedConfig = args.into();
        assert_eq!(cfg.compile.mode, None);
    }
}
