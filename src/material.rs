//! Materials: a pass's shader source plus its cache of compiled variants.
//!
//! A variant is identified by a [`ProgramKey`]: the keyword set, the
//! target format and the blend mode. Each variant compiles once, on first
//! use, and is reused for the rest of the session.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

use crate::error::ShaderError;
use crate::gpu::GpuContext;
use crate::shader::{self, KeywordSet, VertexStage};

/// How a pass's output combines with what is already in the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Overwrite.
    #[default]
    Opaque,
    /// `dst + src`, used by the bloom upsample.
    Additive,
    /// `src + dst * (1 - src.a)`, used to composite dye over a background.
    Premultiplied,
}

impl BlendMode {
    pub fn state(self) -> Option<wgpu::BlendState> {
        match self {
            BlendMode::Opaque => None,
            BlendMode::Additive => {
                let add = wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                };
                Some(wgpu::BlendState { color: add, alpha: add })
            }
            BlendMode::Premultiplied => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
        }
    }
}

/// Identity of one compiled variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    pub keywords: KeywordSet,
    pub format: wgpu::TextureFormat,
    pub blend: BlendMode,
}

/// Compile-once map from key to program.
#[derive(Debug)]
pub struct ProgramCache<K, P> {
    programs: HashMap<K, P>,
    compiled: usize,
}

impl<K: Eq + Hash + Copy, P> ProgramCache<K, P> {
    pub fn new() -> Self {
        Self {
            programs: HashMap::new(),
            compiled: 0,
        }
    }

    /// Return the cached program for `key`, compiling it first if needed.
    /// A failed compile is not cached.
    pub fn get_or_compile<E>(&mut self, key: K, compile: impl FnOnce(&K) -> Result<P, E>) -> Result<&P, E> {
        match self.programs.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let program = compile(&key)?;
                self.compiled += 1;
                Ok(entry.insert(program))
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.programs.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Number of successful compiles since creation.
    pub fn compiled(&self) -> usize {
        self.compiled
    }
}

impl<K: Eq + Hash + Copy, P> Default for ProgramCache<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

/// One pass's shader and its compiled variants.
#[derive(Debug)]
pub struct Material {
    label: &'static str,
    vertex: VertexStage,
    fragment: &'static str,
    textures: usize,
    cache: ProgramCache<ProgramKey, wgpu::RenderPipeline>,
    active: Option<ProgramKey>,
}

impl Material {
    pub fn new(label: &'static str, vertex: VertexStage, fragment: &'static str, textures: usize) -> Self {
        Self {
            label,
            vertex,
            fragment,
            textures,
            cache: ProgramCache::new(),
            active: None,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Number of texture inputs the pass binds.
    pub fn textures(&self) -> usize {
        self.textures
    }

    /// Key of the variant last bound.
    pub fn active(&self) -> Option<ProgramKey> {
        self.active
    }

    pub fn variants(&self) -> usize {
        self.cache.len()
    }

    /// Full WGSL for a keyword set.
    pub fn source(&self, keywords: KeywordSet) -> Result<String, ShaderError> {
        shader::compose(self.vertex, self.fragment, keywords).map_err(|message| self.error(keywords, message))
    }

    /// Select the variant for `keywords` rendering into `format` with
    /// `blend`, compiling it on first use.
    pub fn bind(
        &mut self,
        gpu: &GpuContext,
        keywords: KeywordSet,
        format: wgpu::TextureFormat,
        blend: BlendMode,
    ) -> Result<&wgpu::RenderPipeline, ShaderError> {
        let key = ProgramKey { keywords, format, blend };
        if self.active != Some(key) {
            log::trace!("{}: binding [{}] {:?} {:?}", self.label, keywords, format, blend);
            self.active = Some(key);
        }

        let (label, vertex, fragment, textures) = (self.label, self.vertex, self.fragment, self.textures);
        self.cache.get_or_compile(key, |key| {
            let source = shader::compose(vertex, fragment, key.keywords).map_err(|message| ShaderError {
                material: label,
                keywords: key.keywords.to_string(),
                message,
            })?;
            compile(gpu, label, &source, textures, key)
        })
    }

    fn error(&self, keywords: KeywordSet, message: String) -> ShaderError {
        ShaderError {
            material: self.label,
            keywords: keywords.to_string(),
            message,
        }
    }
}

fn compile(
    gpu: &GpuContext,
    label: &'static str,
    source: &str,
    textures: usize,
    key: &ProgramKey,
) -> Result<wgpu::RenderPipeline, ShaderError> {
    let fail = |message: String| ShaderError {
        material: label,
        keywords: key.keywords.to_string(),
        message,
    };

    // naga gives a readable diagnostic; wgpu would only log it.
    shader::validate(source).map_err(fail)?;

    gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline = gpu.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(gpu.pipeline_layout(textures)),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: key.format,
                blend: key.blend.state(),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    if let Some(error) = pollster::block_on(gpu.device.pop_error_scope()) {
        return Err(fail(error.to_string()));
    }

    log::debug!("Compiled {} [{}] for {:?}", label, key.keywords, key.format);
    Ok(pipeline)
}

/// Every material the fluid uses.
#[derive(Debug)]
pub struct Programs {
    pub copy: Material,
    pub clear: Material,
    pub splat: Material,
    pub curl: Material,
    pub vorticity: Material,
    pub divergence: Material,
    pub pressure: Material,
    pub gradient_subtract: Material,
    pub advection: Material,
    pub bloom_prefilter: Material,
    pub bloom_blur: Material,
    pub bloom_final: Material,
    pub sunrays_mask: Material,
    pub sunrays: Material,
    pub blur: Material,
    pub checkerboard: Material,
    pub display: Material,
}

impl Programs {
    pub fn new() -> Self {
        use VertexStage::{Base, Blur};
        Self {
            copy: Material::new("copy", Base, shader::COPY, 1),
            clear: Material::new("clear", Base, shader::CLEAR, 1),
            splat: Material::new("splat", Base, shader::SPLAT, 1),
            curl: Material::new("curl", Base, shader::CURL, 1),
            vorticity: Material::new("vorticity", Base, shader::VORTICITY, 2),
            divergence: Material::new("divergence", Base, shader::DIVERGENCE, 1),
            pressure: Material::new("pressure", Base, shader::PRESSURE, 2),
            gradient_subtract: Material::new("gradient subtract", Base, shader::GRADIENT_SUBTRACT, 2),
            advection: Material::new("advection", Base, shader::ADVECTION, 2),
            bloom_prefilter: Material::new("bloom prefilter", Base, shader::BLOOM_PREFILTER, 1),
            bloom_blur: Material::new("bloom blur", Base, shader::BLOOM_BLUR, 1),
            bloom_final: Material::new("bloom final", Base, shader::BLOOM_FINAL, 1),
            sunrays_mask: Material::new("sunrays mask", Base, shader::SUNRAYS_MASK, 1),
            sunrays: Material::new("sunrays", Base, shader::SUNRAYS, 1),
            blur: Material::new("blur", Blur, shader::BLUR, 1),
            checkerboard: Material::new("checkerboard", Base, shader::CHECKERBOARD, 0),
            display: Material::new("display", Base, shader::DISPLAY, 4),
        }
    }

    pub fn all(&self) -> [&Material; 17] {
        [
            &self.copy,
            &self.clear,
            &self.splat,
            &self.curl,
            &self.vorticity,
            &self.divergence,
            &self.pressure,
            &self.gradient_subtract,
            &self.advection,
            &self.bloom_prefilter,
            &self.bloom_blur,
            &self.bloom_final,
            &self.sunrays_mask,
            &self.sunrays,
            &self.blur,
            &self.checkerboard,
            &self.display,
        ]
    }

    /// Compiled variants across all materials.
    pub fn variants(&self) -> usize {
        self.all().iter().map(|m| m.variants()).sum()
    }
}

impl Default for Programs {
    fn default() -> Self {
        Self::new()
    }
}
