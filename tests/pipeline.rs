use std::path::PathBuf;

use bytemuck::{Pod, Zeroable};
use rt_pipeline::driver::host::HostDriver;
use rt_pipeline::{
    CompileOutcome, CompiledProgram, CompilerOptions, DeviceContext, Error, JitBackend, JitFailure,
    KernelCompiler, LoadedSource, Material, NativeCode,
};

/// Stand-in for the device compiler: every `RT_PROGRAM` or `__global__`
/// function becomes an `.entry` symbol, unbalanced braces are a syntax error.
struct StubJit;

impl JitBackend for StubJit {
    fn compile(
        &self,
        source: &str,
        program_name: &str,
        flags: &[String],
    ) -> Result<Vec<u8>, JitFailure> {
        let depth = source.chars().try_fold(0i32, |depth, c| match c {
            '{' => Some(depth + 1),
            '}' if depth == 0 => None,
            '}' => Some(depth - 1),
            _ => Some(depth),
        });
        if depth != Some(0) {
            let log = format!(
                "{program_name}(1): error: expected a \"}}\"\n\
                 1 error detected in the compilation of \"{program_name}\".\n"
            );
            return Err(JitFailure::Rejected { log });
        }

        let mut ir = format!("// flags: {}\n.version 6.0\n.target sm_20\n", flags.join(" "));
        for marker in ["RT_PROGRAM void", "__global__ void"] {
            for rest in source.split(marker).skip(1) {
                let name: String = rest
                    .trim_start()
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                    .collect();
                ir.push_str(&format!(".visible .entry {name}()\n{{\n\tret;\n}}\n"));
            }
        }
        let mut bytes = ir.into_bytes();
        bytes.push(0);
        Ok(bytes)
    }
}

const KERNEL: &str = r#"
#include <optix_world.h>
rtDeclareVariable(RenderData, renderData, , );
RT_PROGRAM void generatePrimaryRay() { }
RT_PROGRAM void exception() { }
RT_PROGRAM void materialHit() { }
RT_PROGRAM void materialMiss() { }
"#;

const KERNEL_WITHOUT_RAYGEN: &str = r#"
RT_PROGRAM void exception() { }
"#;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RenderData {
    dof: f32,
}

fn compile(source: &str) -> CompiledProgram {
    let compiler = KernelCompiler::new(CompilerOptions::default(), StubJit);
    compiler
        .compile_loaded(LoadedSource::inline(source))
        .unwrap()
        .program()
        .expect("kernel should compile")
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("rt_pipeline_it_{}_{name}", std::process::id()))
}

#[test]
fn full_setup_and_teardown() {
    let ir = compile(KERNEL);
    assert!(!ir.is_empty());

    let mut context = DeviceContext::new(HostDriver::new());
    context.init().unwrap();
    context.set_ray_type_count(1).unwrap();
    context.set_stack_size(14000).unwrap();
    let ctx = context.handle().unwrap();
    {
        let render_data = context.declare_variable("renderData").unwrap();
        render_data.set_value(&RenderData { dof: 0.0 }).unwrap();
        assert_eq!(render_data.size(), Some(4));
        assert_eq!(context.driver().variable_named(ctx, "renderData"), Some(vec![0u8; 4]));

        context.set_ray_generation_program(&ir, "generatePrimaryRay").unwrap();
        context.set_exception_program(&ir, "exception").unwrap();
        assert_eq!(context.driver().stack_size(ctx), Some(14000));
        assert_eq!(context.driver().entry_point_count(ctx), Some(1));
        assert!(context.driver().ray_generation_program(ctx, 0).is_some());
        assert!(context.driver().exception_program(ctx, 0).is_some());

        let mut material = Material::new(&context).unwrap();
        material.set_closest_hit_program(&ir, 0, "materialHit").unwrap();
        material.set_any_hit_program(&ir, 0, "materialMiss").unwrap();
        material.destroy().unwrap();
    }
    context.destroy().unwrap();

    assert!(context.handle().is_none());
    assert_eq!(context.driver().live_contexts(), 0);
    assert_eq!(context.driver().live_programs(), 0);
}

#[test]
fn missing_ray_generation_symbol_is_fatal_at_that_step() {
    let ir = compile(KERNEL_WITHOUT_RAYGEN);

    let mut context = DeviceContext::new(HostDriver::new());
    context.init().unwrap();
    context.set_ray_type_count(1).unwrap();
    context.set_stack_size(14000).unwrap();
    {
        let render_data = context.declare_variable("renderData").unwrap();
        render_data.set_value(&RenderData { dof: 0.0 }).unwrap();
    }

    let err = context.set_ray_generation_program(&ir, "generatePrimaryRay").unwrap_err();
    assert_eq!(err.code(), Some(NativeCode::ILLEGAL_SYMBOL));
    let message = err.to_string();
    assert!(message.contains("0x507"), "{message}");
    assert!(message.contains("generatePrimaryRay"), "{message}");
    assert!(message.contains("pipeline.rs"), "{message}");
    assert!(context.ray_generation_program().is_none());

    context.destroy().unwrap();
}

#[test]
fn invalid_source_yields_diagnostics_and_no_ir() {
    let compiler = KernelCompiler::new(CompilerOptions::default(), StubJit);
    let outcome = compiler
        .compile_loaded(LoadedSource::inline("RT_PROGRAM void generatePrimaryRay() {"))
        .unwrap();
    match outcome {
        CompileOutcome::Rejected(diagnostics) => {
            assert!(diagnostics.log().contains("error"));
            assert!(diagnostics.log().contains("compiled_kernel"));
        }
        CompileOutcome::Compiled(_) => panic!("broken source compiled"),
    }
}

#[test]
fn compiled_ir_round_trips_into_a_program() {
    let path = temp_path("kernel.cu");
    std::fs::write(&path, KERNEL).unwrap();
    let compiler = KernelCompiler::new(CompilerOptions::default(), StubJit);
    let outcome = compiler.compile(&path).unwrap();
    assert!(outcome.diagnostics().is_none());
    let ir = outcome.program().unwrap();
    assert!(ir.as_text().contains("--maxrregcount=64"));

    let mut context = DeviceContext::new(HostDriver::new());
    context.init().unwrap();
    let program = context.create_program(&ir, "materialHit").unwrap();
    assert_eq!(context.driver().program_entry_name(program).as_deref(), Some("materialHit"));
    context.destroy().unwrap();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn missing_kernel_file_is_fatal() {
    let compiler = KernelCompiler::new(CompilerOptions::default(), StubJit);
    let err = compiler.compile(&temp_path("nowhere.cu")).unwrap_err();
    assert!(matches!(err, Error::SourceUnreadable { .. }));
}

#[test]
fn two_materials_keep_their_own_programs() {
    let ir = compile(KERNEL);
    let mut context = DeviceContext::new(HostDriver::new());
    context.init().unwrap();
    context.set_ray_type_count(1).unwrap();
    {
        let mut a = Material::new(&context).unwrap();
        let mut b = Material::new(&context).unwrap();
        a.set_closest_hit_program(&ir, 0, "materialHit").unwrap();
        b.set_closest_hit_program(&ir, 0, "materialMiss").unwrap();

        let pa = a.hit_programs(0).closest_hit.unwrap();
        let pb = b.hit_programs(0).closest_hit.unwrap();
        assert_ne!(pa, pb);
        let driver = context.driver();
        assert_eq!(driver.closest_hit_program(a.handle().unwrap(), 0), Some(pa));
        assert_eq!(driver.closest_hit_program(b.handle().unwrap(), 0), Some(pb));
        assert_eq!(driver.program_entry_name(pa).as_deref(), Some("materialHit"));
        assert_eq!(driver.program_entry_name(pb).as_deref(), Some("materialMiss"));

        b.destroy().unwrap();
        a.destroy().unwrap();
    }
    context.destroy().unwrap();
}

#[test]
fn native_failure_mid_setup_is_reported_with_context_message() {
    let ir = compile(KERNEL);
    let driver = HostDriver::new();
    driver.inject_failure("rtMaterialSetAnyHitProgram", NativeCode::INVALID_VALUE);
    let mut context = DeviceContext::new(driver);
    context.init().unwrap();
    context.set_ray_type_count(1).unwrap();
    {
        let mut material = Material::new(&context).unwrap();
        material.set_closest_hit_program(&ir, 0, "materialHit").unwrap();
        let err = material.set_any_hit_program(&ir, 0, "materialMiss").unwrap_err();
        assert_eq!(err.code(), Some(NativeCode::INVALID_VALUE));
        assert!(err.to_string().contains("Invalid value"));
        assert!(material.hit_programs(0).any_hit.is_none());
        material.destroy().unwrap();
    }
    context.destroy().unwrap();
}
