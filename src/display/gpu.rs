//! WebGPU render surface
//!
//! Presents into a winit window's swapchain. The drawable for a frame is
//! acquired in `make_current` and handed back in `present`; between the two the
//! surface only records what the pass should do, and `present` encodes and
//! submits the whole pass at once.

use std::sync::Arc;
use std::thread::ThreadId;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info, instrument, warn};
use wgpu::*;
use winit::window::Window;

use super::{BlendMode, Color as ClearColor, ContextScope, RenderSurface, SurfaceGeometry};
use crate::error::RenderError;
use crate::filter::Image;
use crate::pipeline::crop::Rect;

const SHADER: &str = r#"
struct Quad {
    dest: vec4<f32>,
    src: vec4<f32>,
};

@group(0) @binding(0) var frame_tex: texture_2d<f32>;
@group(0) @binding(1) var frame_sampler: sampler;
@group(0) @binding(2) var<uniform> quad: Quad;

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VsOut {
    // Triangle strip over the four corners of the destination quad
    let corner = vec2<f32>(f32(index & 1u), f32(index >> 1u));
    var out: VsOut;
    out.pos = vec4<f32>(
        mix(quad.dest.x, quad.dest.z, corner.x),
        mix(quad.dest.y, quad.dest.w, corner.y),
        0.0,
        1.0,
    );
    out.uv = vec2<f32>(
        mix(quad.src.x, quad.src.z, corner.x),
        mix(quad.src.y, quad.src.w, corner.y),
    );
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = textureSample(frame_tex, frame_sampler, in.uv);
    return vec4<f32>(c.rgb * c.a, c.a);
}
"#;

/// Destination quad in clip space and source region in texture space,
/// both as (min_x, min_y, max_x, max_y).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct QuadUniforms {
    dest: [f32; 4],
    src: [f32; 4],
}

struct FrameTexture {
    texture: Texture,
    bind_group: BindGroup,
    width: u32,
    height: u32,
}

/// What the next `present` should encode
#[derive(Debug, Clone, Copy)]
struct PendingPass {
    clear: ClearColor,
    blend: BlendMode,
    draw: bool,
}

impl Default for PendingPass {
    fn default() -> Self {
        Self {
            clear: super::FALLBACK_COLOR,
            blend: BlendMode::default(),
            draw: false,
        }
    }
}

/// GPU-accelerated surface using WebGPU
pub struct GpuSurface {
    window: Arc<Window>,
    device: Device,
    queue: Queue,
    surface: Surface<'static>,
    config: SurfaceConfiguration,
    replace_pipeline: RenderPipeline,
    over_pipeline: RenderPipeline,
    bind_group_layout: BindGroupLayout,
    sampler: Sampler,
    uniforms: Buffer,
    texture: Option<FrameTexture>,
    pending: PendingPass,
    frame: Option<SurfaceTexture>,
    current_thread: Option<ThreadId>,
}

impl GpuSurface {
    /// Initialize WebGPU against `window`. The surface is configured on the
    /// first [`RenderSurface::bind`].
    #[instrument(skip(window))]
    pub async fn new(window: Arc<Window>, vsync: bool) -> Result<Self, RenderError> {
        info!("Initializing WebGPU surface");

        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| RenderError::Surface(e.to_string()))?;

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::Device("No suitable GPU adapter found".into()))?;

        info!("GPU: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("Lumen GPU Device"),
                    required_features: Features::empty(),
                    required_limits: Limits::downlevel_webgl2_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| RenderError::Device(e.to_string()))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first())
            .copied()
            .ok_or_else(|| RenderError::Surface("Surface is incompatible with the adapter".into()))?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(CompositeAlphaMode::Auto);

        let size = window.inner_size();
        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if vsync {
                PresentMode::AutoVsync
            } else {
                PresentMode::AutoNoVsync
            },
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Frame Bind Group Layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::VERTEX,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let replace_pipeline =
            Self::create_render_pipeline(&device, &bind_group_layout, format, BlendState::REPLACE);
        let over_pipeline = Self::create_render_pipeline(
            &device,
            &bind_group_layout,
            format,
            BlendState::PREMULTIPLIED_ALPHA_BLENDING,
        );

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("Frame Sampler"),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });

        let uniforms = device.create_buffer(&BufferDescriptor {
            label: Some("Quad Uniforms"),
            size: std::mem::size_of::<QuadUniforms>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            window,
            device,
            queue,
            surface,
            config,
            replace_pipeline,
            over_pipeline,
            bind_group_layout,
            sampler,
            uniforms,
            texture: None,
            pending: PendingPass::default(),
            frame: None,
            current_thread: None,
        })
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    fn create_render_pipeline(
        device: &Device,
        layout: &BindGroupLayout,
        format: TextureFormat,
        blend: BlendState,
    ) -> RenderPipeline {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Frame Shader"),
            source: ShaderSource::Wgsl(SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Frame Pipeline Layout"),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Frame Pipeline"),
            layout: Some(&pipeline_layout),
            cache: None,
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(ColorTargetState {
                    format,
                    blend: Some(blend),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
        })
    }

    fn create_texture(&self, width: u32, height: u32) -> FrameTexture {
        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some("Frame Texture"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8UnormSrgb,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());

        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Frame Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.sampler),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: self.uniforms.as_entire_binding(),
                },
            ],
        });

        debug!("Frame texture allocated at {}x{}", width, height);
        FrameTexture {
            texture,
            bind_group,
            width,
            height,
        }
    }

    fn acquire(&mut self) -> Result<SurfaceTexture, RenderError> {
        match self.surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(SurfaceError::Outdated | SurfaceError::Lost) => {
                warn!("Swapchain outdated, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                self.surface
                    .get_current_texture()
                    .map_err(|e| RenderError::Surface(e.to_string()))
            }
            Err(e) => Err(RenderError::Surface(e.to_string())),
        }
    }

    /// Clear colour in the space the render target expects.
    fn clear_value(&self, color: ClearColor) -> wgpu::Color {
        let channel = |c: f32| {
            let c = c.clamp(0.0, 1.0) as f64;
            if self.config.format.is_srgb() {
                srgb_to_linear(c)
            } else {
                c
            }
        };
        wgpu::Color {
            r: channel(color.r),
            g: channel(color.g),
            b: channel(color.b),
            a: color.a.clamp(0.0, 1.0) as f64,
        }
    }
}

fn srgb_to_linear(c: f64) -> f64 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Map `dest` (pixels, top-left origin) to clip space and `src` (image pixels)
/// to normalised texture coordinates.
fn quad_uniforms(dest: Rect, src: Rect, target: (u32, u32), image: (u32, u32)) -> QuadUniforms {
    let (tw, th) = (target.0 as f64, target.1 as f64);
    let (iw, ih) = (image.0 as f64, image.1 as f64);
    QuadUniforms {
        dest: [
            (dest.x / tw * 2.0 - 1.0) as f32,
            (1.0 - dest.y / th * 2.0) as f32,
            (dest.max_x() / tw * 2.0 - 1.0) as f32,
            (1.0 - dest.max_y() / th * 2.0) as f32,
        ],
        src: [
            (src.x / iw) as f32,
            (src.y / ih) as f32,
            (src.max_x() / iw) as f32,
            (src.max_y() / ih) as f32,
        ],
    }
}

impl RenderSurface for GpuSurface {
    fn bind(&mut self) -> Result<SurfaceGeometry, RenderError> {
        // Device pixels, not logical points
        let size = self.window.inner_size();
        let geometry = SurfaceGeometry::new(size.width, size.height)
            .map_err(|e| RenderError::Surface(e.to_string()))?;

        self.frame = None;
        self.config.width = geometry.width;
        self.config.height = geometry.height;
        self.surface.configure(&self.device, &self.config);
        debug!(
            "Surface configured at {}x{} ({:?})",
            geometry.width, geometry.height, self.config.format
        );
        Ok(geometry)
    }

    fn make_current(&mut self, scope: &ContextScope) -> Result<(), RenderError> {
        if self.current_thread != Some(scope.thread()) {
            if self.current_thread.is_some() {
                debug!("Rendering moved to {:?}", scope.thread());
            }
            self.current_thread = Some(scope.thread());
        }
        if self.frame.is_none() {
            self.frame = Some(self.acquire()?);
        }
        self.pending = PendingPass::default();
        Ok(())
    }

    fn clear(&mut self, _scope: &ContextScope, color: ClearColor) {
        self.pending.clear = color;
        self.pending.draw = false;
    }

    fn set_blend(&mut self, _scope: &ContextScope, mode: BlendMode) {
        self.pending.blend = mode;
    }

    fn draw(
        &mut self,
        _scope: &ContextScope,
        image: &Image,
        dest: Rect,
        src: Rect,
    ) -> Result<(), RenderError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(());
        }

        let stale = self
            .texture
            .as_ref()
            .map_or(true, |t| t.width != width || t.height != height);
        if stale {
            self.texture = Some(self.create_texture(width, height));
        }
        let Some(frame_texture) = self.texture.as_ref() else {
            return Ok(());
        };

        self.queue.write_texture(
            ImageCopyTexture {
                texture: &frame_texture.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            image.as_raw(),
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        let uniforms = quad_uniforms(
            dest,
            src,
            (self.config.width, self.config.height),
            (width, height),
        );
        self.queue
            .write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));
        self.pending.draw = true;
        Ok(())
    }

    fn present(&mut self, _scope: &ContextScope) -> Result<(), RenderError> {
        let Some(output) = self.frame.take() else {
            return Err(RenderError::Surface("present without an acquired frame".into()));
        };
        let view = output
            .texture
            .create_view(&TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(self.clear_value(self.pending.clear)),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            if let (true, Some(texture)) = (self.pending.draw, self.texture.as_ref()) {
                let pipeline = match self.pending.blend {
                    BlendMode::Replace => &self.replace_pipeline,
                    BlendMode::SourceOver => &self.over_pipeline,
                };
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, &texture.bind_group, &[]);
                render_pass.draw(0..4, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        self.window.pre_present_notify();
        output.present();
        Ok(())
    }

    fn release(&mut self, _scope: ContextScope) {
        // A frame still held here was never presented; dropping discards it.
        self.frame = None;
    }
}
