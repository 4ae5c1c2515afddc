use std::path::PathBuf;
use std::process::ExitCode;

use bytemuck::{Pod, Zeroable};
use clap::Parser;

use rt_pipeline::cuda::{self, Nvrtc};
use rt_pipeline::{
    logging, CompileOutcome, DeviceContext, Driver, Error, KernelCompiler, Material, PipelineConfig,
};

#[derive(Parser)]
#[command(
    name = "rt_pipeline",
    about = "Compile a ray-tracing kernel and set up a device context",
    version
)]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Kernel source, overrides `kernel_path` from the configuration
    #[arg(long)]
    kernel: Option<PathBuf>,
    /// Write the compiled IR to this file
    #[arg(long)]
    dump_ir: Option<PathBuf>,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RenderData {
    dof: f32,
}

#[cfg(feature = "optix")]
fn native_driver() -> rt_pipeline::driver::optix::OptixDriver {
    rt_pipeline::driver::optix::OptixDriver::new()
}

#[cfg(not(feature = "optix"))]
fn native_driver() -> rt_pipeline::driver::host::HostDriver {
    tracing::warn!("built without the optix feature, using the host emulation driver");
    rt_pipeline::driver::host::HostDriver::new()
}

/// Logs `err` and aborts; device state is undefined past this point.
fn fatal(err: Error) -> ! {
    tracing::error!("fatal: {err}");
    std::process::abort()
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match PipelineConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::from(2);
            }
        },
        None => PipelineConfig::default(),
    };
    if let Some(kernel) = cli.kernel {
        config.kernel_path = kernel;
    }
    if let Some(dump) = cli.dump_ir {
        config.compiler.ir_dump_path = Some(dump);
    }
    if let Err(err) = logging::init(&config.logging) {
        eprintln!("{err}");
        return ExitCode::from(2);
    }

    match run(&config, native_driver()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => fatal(err),
    }
}

/// Returns `Ok(false)` when the kernel did not compile.
fn run<D: Driver>(config: &PipelineConfig, driver: D) -> rt_pipeline::Result<bool> {
    let compiler = KernelCompiler::new(config.compiler.clone(), Nvrtc);
    let ir = match compiler.compile(&config.kernel_path)? {
        CompileOutcome::Compiled(ir) => ir,
        CompileOutcome::Rejected(_) => {
            tracing::error!("no program produced from {}", config.kernel_path.display());
            return Ok(false);
        }
    };

    cuda::init_driver()?;

    let mut context = DeviceContext::new(driver);
    context.init()?;
    context.configure(&config.context)?;
    {
        let render_data = context.declare_variable("renderData")?;
        render_data.set_value(&RenderData { dof: 0.0 })?;

        context.set_ray_generation_program(&ir, "generatePrimaryRay")?;
        context.set_exception_program(&ir, "exception")?;

        let mut material = Material::new(&context)?;
        material.set_closest_hit_program(&ir, 0, "materialHit")?;
        material.set_any_hit_program(&ir, 0, "materialMiss")?;
        material.destroy()?;
    }
    context.destroy()?;

    tracing::info!("pipeline set up and torn down cleanly");
    Ok(true)
}
