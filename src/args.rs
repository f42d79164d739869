#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Backend {
    #[default]
    Wgpu,
    Software,
}

#[derive(Clone, Debug)]
pub struct Args {
    pub backend: Backend,
    pub vertices: u32,
    pub instances: usize,
    pub frames: usize,
    pub config: Option<String>,
    pub verify: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            vertices: 4096,
            instances: 8,
            frames: 60,
            config: None,
            verify: false,
        }
    }
}
