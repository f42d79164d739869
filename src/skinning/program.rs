use anyhow::Result;

use crate::error::{Error, ErrorKind};
use crate::skinning::context::{ComputeContext, KernelBuildError, UniformLocation};
use crate::skinning::kernel::{
    KernelSource, UNIFORM_MAX_BONES, UNIFORM_MORPH_COUNT, UNIFORM_UV_MORPH_COUNT,
    UNIFORM_VERTEX_COUNT,
};

/// Locations of the four per-dispatch parameters. `None` when the backend reports the
/// parameter as absent; setting it is then skipped.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UniformHandles {
    pub vertex_count: Option<UniformLocation>,
    pub morph_count: Option<UniformLocation>,
    pub max_bones: Option<UniformLocation>,
    pub uv_morph_count: Option<UniformLocation>,
}

pub struct SkinningProgram<C: ComputeContext> {
    gpu_program: Option<C::Program>,
    uniforms: UniformHandles,
}

impl<C: ComputeContext> Default for SkinningProgram<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ComputeContext> SkinningProgram<C> {
    pub fn new() -> Self {
        Self {
            gpu_program: None,
            uniforms: Default::default(),
        }
    }

    /// Builds the kernel once. A failed build leaves the program unusable until the next call.
    pub fn initialize(&mut self, context: &mut C) -> Result<()> {
        if self.gpu_program.is_some() {
            return Ok(());
        }

        let source = KernelSource::skinning()?;

        let gpu_program = match context.build_program("SKINNING_PROGRAM", &source) {
            Ok(gpu_program) => gpu_program,
            Err(error) => {
                log::error!("{error}");
                let kind = match error {
                    KernelBuildError::Compile { .. } => ErrorKind::KernelCompile,
                    KernelBuildError::Link { .. } => ErrorKind::KernelLink,
                };
                return Err(Error::new(kind, error.to_string()).into());
            }
        };

        self.uniforms = UniformHandles {
            vertex_count: context.uniform_location(&gpu_program, UNIFORM_VERTEX_COUNT),
            morph_count: context.uniform_location(&gpu_program, UNIFORM_MORPH_COUNT),
            max_bones: context.uniform_location(&gpu_program, UNIFORM_MAX_BONES),
            uv_morph_count: context.uniform_location(&gpu_program, UNIFORM_UV_MORPH_COUNT),
        };
        self.gpu_program = Some(gpu_program);

        log::info!("Skinning compute program initialized");

        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.gpu_program.is_some()
    }

    pub fn shutdown(&mut self) {
        if self.gpu_program.take().is_some() {
            log::debug!("Skinning compute program released");
        }
        self.uniforms = Default::default();
    }

    pub fn gpu_program(&self) -> Option<&C::Program> {
        self.gpu_program.as_ref()
    }

    pub fn uniforms(&self) -> &UniformHandles {
        &self.uniforms
    }
}
