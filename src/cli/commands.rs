// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// One subcommand per recipe: `amp`, `ddp`, `augment`, `combined`.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for bad flags
//   - type conversion (string → usize, f64, enums)
//
// Distributed settings (MASTER_ADDR, MASTER_PORT, RANK, LOCAL_RANK,
// WORLD_SIZE) come from the environment, not from flags. WORLD_SIZE
// is the number of ranks launched, one per device.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand, ValueEnum};

use crate::application::{
    amp_use_case::AmpConfig,
    augment_use_case::AugmentConfig,
    combined_use_case::{CombinedConfig, CompileSettings},
    ddp_use_case::DdpConfig,
    DataConfig,
};
use crate::domain::{image::IMAGE_SIDE, precision::Precision};
use crate::ml::{amp::GradScalerConfig, compile::CompileMode};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mixed-precision training of a deep linear stack on random data
    Amp(AmpArgs),

    /// One distributed data-parallel step on FashionMNIST
    Ddp(DdpArgs),

    /// Gaussian-blur augmentation on the device with gradient accumulation
    Augment(AugmentArgs),

    /// Mixed precision + data parallel + augmentation + compile + checkpointing
    Combined(CombinedArgs),
}

/// Where the tensors live.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceArg {
    /// wgpu backend (Vulkan / Metal / DX12)
    Gpu,
    /// ndarray backend
    Cpu,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrecisionArg {
    Fp16,
    Bf16,
}

impl From<PrecisionArg> for Precision {
    fn from(p: PrecisionArg) -> Self {
        match p {
            PrecisionArg::Fp16 => Precision::F16,
            PrecisionArg::Bf16 => Precision::BF16,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompileArg {
    Off,
    Default,
    MaxAutotune,
}

impl From<CompileArg> for Option<CompileMode> {
    fn from(c: CompileArg) -> Self {
        match c {
            CompileArg::Off         => None,
            CompileArg::Default     => Some(CompileMode::Default),
            CompileArg::MaxAutotune => Some(CompileMode::MaxAutotune),
        }
    }
}

// ─── Shared Arguments ─────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct DeviceArgs {
    #[arg(long, value_enum, default_value_t = DeviceArg::Gpu)]
    pub device: DeviceArg,
}

#[derive(Args, Debug)]
pub struct DataArgs {
    /// Root directory for FashionMNIST
    #[arg(long, default_value = "data")]
    pub data_root: String,

    /// Fail instead of downloading missing files
    #[arg(long)]
    pub no_download: bool,

    /// Train on this many generated images instead of FashionMNIST
    #[arg(long)]
    pub synthetic_samples: Option<usize>,
}

impl From<DataArgs> for DataConfig {
    fn from(a: DataArgs) -> Self {
        DataConfig {
            data_root:         a.data_root,
            download:          !a.no_download,
            synthetic_samples: a.synthetic_samples,
        }
    }
}

// ─── amp ──────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct AmpArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[arg(long, default_value_t = 256)]
    pub batch_size: usize,

    /// Width of every linear layer
    #[arg(long, default_value_t = 4096)]
    pub in_size: usize,

    #[arg(long, default_value_t = 4096)]
    pub out_size: usize,

    #[arg(long, default_value_t = 12)]
    pub num_layers: usize,

    /// Random batches per epoch
    #[arg(long, default_value_t = 50)]
    pub num_batches: usize,

    #[arg(long, default_value_t = 3)]
    pub epochs: usize,

    #[arg(long, default_value_t = 0.001)]
    pub lr: f64,

    /// Run in full precision with the scaler disabled
    #[arg(long)]
    pub no_amp: bool,

    #[arg(long, value_enum, default_value_t = PrecisionArg::Fp16)]
    pub precision: PrecisionArg,
}

impl From<AmpArgs> for AmpConfig {
    fn from(a: AmpArgs) -> Self {
        AmpConfig {
            batch_size:  a.batch_size,
            in_size:     a.in_size,
            out_size:    a.out_size,
            num_layers:  a.num_layers,
            num_batches: a.num_batches,
            epochs:      a.epochs,
            lr:          a.lr,
            use_amp:     !a.no_amp,
            precision:   a.precision.into(),
            init_scale:  GradScalerConfig::default().init_scale,
        }
    }
}

// ─── ddp ──────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct DdpArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(flatten)]
    pub data: DataArgs,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,
}

impl From<DdpArgs> for DdpConfig {
    fn from(a: DdpArgs) -> Self {
        DdpConfig {
            data:       a.data.into(),
            batch_size: a.batch_size,
            lr:         a.lr,
        }
    }
}

// ─── augment ──────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct AugmentArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(flatten)]
    pub data: DataArgs,

    #[arg(long, default_value_t = 3)]
    pub epochs: usize,

    #[arg(long, default_value_t = 1024)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// Gaussian kernel size (odd)
    #[arg(long, default_value_t = 11)]
    pub blur_kernel: usize,

    #[arg(long, default_value_t = 128)]
    pub hidden_size: usize,

    /// Batches per optimizer step; default is one step per epoch
    #[arg(long)]
    pub accumulation: Option<usize>,
}

impl From<AugmentArgs> for AugmentConfig {
    fn from(a: AugmentArgs) -> Self {
        AugmentConfig {
            data:         a.data.into(),
            epochs:       a.epochs,
            batch_size:   a.batch_size,
            lr:           a.lr,
            blur_kernel:  a.blur_kernel,
            hidden_size:  a.hidden_size,
            accumulation: a.accumulation,
        }
    }
}

// ─── combined ─────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct CombinedArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(flatten)]
    pub data: DataArgs,

    #[arg(long, default_value_t = 3)]
    pub num_epochs: usize,

    #[arg(long)]
    pub no_amp: bool,

    #[arg(long, value_enum, default_value_t = PrecisionArg::Fp16)]
    pub precision: PrecisionArg,

    #[arg(long, default_value_t = 128)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    #[arg(long, value_enum, default_value_t = CompileArg::MaxAutotune)]
    pub compile: CompileArg,

    /// Keep the dataset order instead of reshuffling every epoch
    #[arg(long)]
    pub no_shuffle: bool,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Seed augmentation draws for reproducible runs
    #[arg(long)]
    pub augment_seed: Option<u64>,

    /// Write metrics.csv into this directory (rank 0)
    #[arg(long)]
    pub metrics_dir: Option<String>,
}

impl From<CombinedArgs> for CombinedConfig {
    fn from(a: CombinedArgs) -> Self {
        CombinedConfig {
            data:         a.data.into(),
            num_epochs:   a.num_epochs,
            use_amp:      !a.no_amp,
            precision:    a.precision.into(),
            batch_size:   a.batch_size,
            lr:           a.lr,
            compile:      CompileSettings { mode: a.compile.into(), probe_side: IMAGE_SIDE },
            shuffle:      !a.no_shuffle,
            seed:         a.seed,
            augment_seed: a.augment_seed,
            metrics_dir:  a.metrics_dir,
        }
    }
}
