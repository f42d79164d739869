use anyhow::Result;

use crate::args::{Args, Backend};
use crate::config::SkinningConfig;
use crate::demo::BenchmarkReport;
use crate::skinning::software::SoftwareComputeContext;
use crate::skinning::wgpu_context::WgpuComputeContext;

pub mod args;
pub mod config;
pub mod data;
pub mod demo;
pub mod error;
pub mod skinning;

pub fn run(args: Args) -> Result<()> {
    env_logger::init();

    let config = match &args.config {
        Some(path) => SkinningConfig::from_path(path)?,
        None => SkinningConfig::default(),
    };

    let report = match args.backend {
        Backend::Software => {
            demo::run_benchmark(SoftwareComputeContext::new(), config, &args)?
        }
        Backend::Wgpu => {
            let context = pollster::block_on(WgpuComputeContext::new(&config.adapter))?;
            demo::run_benchmark(context, config, &args)?
        }
    };

    print_report(&args, &report);

    Ok(())
}

fn print_report(args: &Args, report: &BenchmarkReport) {
    let dispatch_time = if report.dispatches > 0 {
        report.elapsed / report.dispatches as u32
    } else {
        Default::default()
    };

    println!(
        "{:?}: {} frames x {} instances x {} vertices, {} dispatches in {:.2?} ({:.2?} per dispatch)",
        args.backend,
        report.frames,
        report.instances,
        report.vertices,
        report.dispatches,
        report.elapsed,
        dispatch_time
    );

    if let Some(max_error) = report.max_error {
        println!("Verified against the reference kernel, max deviation {max_error:e}");
    }
}
