use anyhow::Result;

pub const WORKGROUP_SIZE: u32 = 256;
pub const MAX_VERTEX_MORPHS: u32 = 128;
pub const MAX_UV_MORPHS: u32 = 32;
pub const WEIGHT_EPSILON: f32 = 0.001;

pub const ENTRY_POINT: &str = "skin_vertices";

pub const UNIFORM_NAMES: [&str; 4] = ["vertex_count", "morph_count", "max_bones", "uv_morph_count"];

pub const UNIFORM_VERTEX_COUNT: &str = UNIFORM_NAMES[0];
pub const UNIFORM_MORPH_COUNT: &str = UNIFORM_NAMES[1];
pub const UNIFORM_MAX_BONES: &str = UNIFORM_NAMES[2];
pub const UNIFORM_UV_MORPH_COUNT: &str = UNIFORM_NAMES[3];

/// `uv_morph_count` value that skips UV processing entirely.
pub const UV_DISABLED: i32 = -1;

const TEMPLATE_NAME: &str = "skinning.comp.wgsl";
const TEMPLATE_SOURCE: &str = include_str!("../../shaders/skinning.comp.wgsl");

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SkinningParams {
    pub vertex_count: i32,
    pub morph_count: i32,
    pub max_bones: i32,
    pub uv_morph_count: i32,
}

impl SkinningParams {
    pub fn from_values(values: [i32; 4]) -> Self {
        Self {
            vertex_count: values[0],
            morph_count: values[1],
            max_bones: values[2],
            uv_morph_count: values[3],
        }
    }
}

pub fn group_count(vertex_count: u32) -> u32 {
    vertex_count.div_ceil(WORKGROUP_SIZE)
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct KernelTemplateConfiguration {
    pub workgroup_size: u32,
    pub max_vertex_morphs: u32,
    pub max_uv_morphs: u32,
    pub weight_epsilon: f64,
    pub entry_point: &'static str,
    pub uniform_names: [&'static str; 4],
}

impl Default for KernelTemplateConfiguration {
    fn default() -> Self {
        Self {
            workgroup_size: WORKGROUP_SIZE,
            max_vertex_morphs: MAX_VERTEX_MORPHS,
            max_uv_morphs: MAX_UV_MORPHS,
            weight_epsilon: 0.001,
            entry_point: ENTRY_POINT,
            uniform_names: UNIFORM_NAMES,
        }
    }
}

#[derive(Clone, Debug)]
pub struct KernelSource {
    pub label: String,
    pub wgsl: String,
    pub configuration: KernelTemplateConfiguration,
}

impl KernelSource {
    pub fn from_template(name: &str, configuration: KernelTemplateConfiguration) -> Result<Self> {
        let mut tera = tera::Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, TEMPLATE_SOURCE)?;

        let context = tera::Context::from_serialize(&configuration)?;
        let wgsl = tera.render(TEMPLATE_NAME, &context)?;

        log::debug!("Rendered skinning kernel {name} from config: {:?}", configuration);

        Ok(Self {
            label: format!("{name}_COMPUTE_SHADER_MODULE"),
            wgsl,
            configuration,
        })
    }

    pub fn skinning() -> Result<Self> {
        Self::from_template("SKINNING", Default::default())
    }

    pub fn entry_point(&self) -> &str {
        self.configuration.entry_point
    }
}
