use clap::{Parser, ValueEnum};

/// Headless benchmark for the GPU skinning engine
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Compute backend used to run the skinning kernel
    #[arg(short, long, value_enum, default_value_t = Backend::Wgpu)]
    pub backend: Backend,

    /// Number of vertices in the synthetic rig
    #[arg(short = 'n', long, default_value_t = 4096)]
    pub vertices: u32,

    /// Number of skinned instances sharing the rig
    #[arg(short, long, default_value_t = 8)]
    pub instances: usize,

    /// Number of animated frames to dispatch
    #[arg(short, long, default_value_t = 60)]
    pub frames: usize,

    /// Path to a .json file with engine settings
    #[arg(short, long)]
    pub config: Option<String>,

    /// Read back the last frame and compare it with the host reference kernel
    #[arg(long)]
    pub verify: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Backend {
    Wgpu,
    Software,
}

impl From<Backend> for skinning_engine::args::Backend {
    fn from(value: Backend) -> Self {
        match value {
            Backend::Wgpu => skinning_engine::args::Backend::Wgpu,
            Backend::Software => skinning_engine::args::Backend::Software,
        }
    }
}
