use clap::Parser;

use crate::cli::Cli;
use skinning_engine::args::Args;
use skinning_engine::run;

mod cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(Args {
        backend: cli.backend.into(),
        vertices: cli.vertices,
        instances: cli.instances,
        frames: cli.frames,
        config: cli.config,
        verify: cli.verify,
    })
}
