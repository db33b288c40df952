use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;
use wgpu::SurfaceError;
use winit::window::Window;

use super::mipmap::MipmapGenerator;
use super::{IDENTITY_MATRIX, MinFilter, QuadMatrix, RenderBackend, TextureFiltering};
use crate::error::RenderError;
use crate::events::RasterImage;

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

// Two triangles covering clip space; texture v runs top to bottom.
const POSITIONS: [[f32; 2]; 6] = [
    [-1.0, -1.0],
    [1.0, -1.0],
    [-1.0, 1.0],
    [-1.0, 1.0],
    [1.0, -1.0],
    [1.0, 1.0],
];
const TEX_COORDS: [[f32; 2]; 6] = [
    [0.0, 1.0],
    [1.0, 1.0],
    [0.0, 0.0],
    [0.0, 0.0],
    [1.0, 1.0],
    [1.0, 0.0],
];

/// `mat3x3<f32>` uniform layout: three columns padded to 16 bytes.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct MatrixUniform {
    columns: [[f32; 4]; 3],
}

impl MatrixUniform {
    fn from_matrix(m: &QuadMatrix) -> Self {
        Self {
            columns: [
                [m[0], m[1], m[2], 0.0],
                [m[3], m[4], m[5], 0.0],
                [m[6], m[7], m[8], 0.0],
            ],
        }
    }
}

struct ImageTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

struct DeviceState {
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    positions: wgpu::Buffer,
    tex_coords: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    linear_sampler: wgpu::Sampler,
    mipmap_sampler: wgpu::Sampler,
    mipmaps: MipmapGenerator,
    texture: Option<ImageTexture>,
}

/// wgpu implementation of [`RenderBackend`] drawing into a winit window.
pub struct WgpuRenderer {
    _window: Arc<Window>,
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    size: (u32, u32),
    on_device_lost: Arc<dyn Fn() + Send + Sync>,
    state: Option<DeviceState>,
}

impl WgpuRenderer {
    /// Sets up surface, device and pipeline for `window`. `on_device_lost`
    /// runs on a wgpu thread when the device is lost for any reason other
    /// than our own teardown.
    pub fn new(
        window: Arc<Window>,
        on_device_lost: impl Fn() + Send + Sync + 'static,
    ) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window.clone())
            .map_err(|err| RenderError::Init(format!("failed to create surface: {err}")))?;
        let inner = window.inner_size();

        let mut renderer = Self {
            _window: window,
            instance,
            surface,
            size: (inner.width.max(1), inner.height.max(1)),
            on_device_lost: Arc::new(on_device_lost),
            state: None,
        };
        renderer.state = Some(renderer.create_device_state()?);
        Ok(renderer)
    }

    fn create_device_state(&self) -> Result<DeviceState, RenderError> {
        let adapter = pollster::block_on(self.instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&self.surface),
                force_fallback_adapter: false,
            },
        ))
        .map_err(|err| RenderError::Init(format!("failed to acquire GPU adapter: {err}")))?;

        let caps = self.surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|fmt| fmt.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| RenderError::Init("surface reports no supported formats".into()))?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("viewer-device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            ..Default::default()
        }))
        .map_err(|err| RenderError::Init(format!("failed to acquire GPU device: {err}")))?;

        let lost = self.on_device_lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            if matches!(reason, wgpu::DeviceLostReason::Destroyed) {
                return;
            }
            warn!(?reason, %message, "GPU device lost");
            lost();
        });

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: self.size.0,
            height: self.size.1,
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        self.surface.configure(&device, &config);
        info!(
            width = config.width,
            height = config.height,
            format = ?config.format,
            "viewer surface configured",
        );

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("quad-shader"),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!(
                "shaders/quad.wgsl"
            ))),
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("quad-uniform-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("quad-texture-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad-matrix"),
            contents: bytemuck::bytes_of(&MatrixUniform::from_matrix(&IDENTITY_MATRIX)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("quad-uniform-bind"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let positions = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad-positions"),
            contents: bytemuck::cast_slice(&POSITIONS),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let tex_coords = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad-tex-coords"),
            contents: bytemuck::cast_slice(&TEX_COORDS),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("quad-pipeline-layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        let vec2_stride = std::mem::size_of::<[f32; 2]>() as u64;
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("quad-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[
                    wgpu::VertexBufferLayout {
                        array_stride: vec2_stride,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &[wgpu::VertexAttribute {
                            format: wgpu::VertexFormat::Float32x2,
                            offset: 0,
                            shader_location: 0,
                        }],
                    },
                    wgpu::VertexBufferLayout {
                        array_stride: vec2_stride,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &[wgpu::VertexAttribute {
                            format: wgpu::VertexFormat::Float32x2,
                            offset: 0,
                            shader_location: 1,
                        }],
                    },
                ],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = |label, mipmap_filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter,
                ..Default::default()
            })
        };
        let linear_sampler = sampler("image-linear", wgpu::FilterMode::Nearest);
        let mipmap_sampler = sampler("image-linear-mipmap", wgpu::FilterMode::Linear);

        let mipmaps = MipmapGenerator::new(&device, TEXTURE_FORMAT);

        Ok(DeviceState {
            device,
            queue,
            config,
            pipeline,
            positions,
            tex_coords,
            uniform_buffer,
            uniform_bind_group,
            texture_layout,
            linear_sampler,
            mipmap_sampler,
            mipmaps,
            texture: None,
        })
    }
}

/// Shrinks `raster` so neither side exceeds `max_dimension`, keeping aspect.
fn downscale(raster: &RasterImage, max_dimension: u32) -> Result<image::RgbaImage, RenderError> {
    let longest = raster.width.max(raster.height) as f64;
    let factor = max_dimension as f64 / longest;
    let width = ((raster.width as f64 * factor).round() as u32).clamp(1, max_dimension);
    let height = ((raster.height as f64 * factor).round() as u32).clamp(1, max_dimension);
    let source = image::RgbaImage::from_raw(raster.width, raster.height, raster.pixels.clone())
        .ok_or_else(|| RenderError::Upload("raster buffer does not match its size".into()))?;
    warn!(
        from_w = raster.width,
        from_h = raster.height,
        to_w = width,
        to_h = height,
        "image exceeds GPU texture limit; downscaling",
    );
    Ok(image::imageops::resize(
        &source,
        width,
        height,
        image::imageops::FilterType::Triangle,
    ))
}

impl RenderBackend for WgpuRenderer {
    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width.max(1), height.max(1));
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.config.width = self.size.0;
        state.config.height = self.size.1;
        self.surface.configure(&state.device, &state.config);
        debug!(
            width = state.config.width,
            height = state.config.height,
            "viewer surface resized",
        );
    }

    fn upload_texture(&mut self, raster: &RasterImage) -> Result<(), RenderError> {
        let state = self.state.as_mut().ok_or(RenderError::ContextLost)?;
        let expected = raster.width as usize * raster.height as usize * 4;
        if raster.width == 0 || raster.height == 0 || raster.pixels.len() != expected {
            return Err(RenderError::Upload(format!(
                "raster {}x{} carries {} bytes",
                raster.width,
                raster.height,
                raster.pixels.len()
            )));
        }

        let max_dimension = state.device.limits().max_texture_dimension_2d;
        let resized;
        let (width, height, pixels) =
            if raster.width > max_dimension || raster.height > max_dimension {
                resized = downscale(raster, max_dimension)?;
                (resized.width(), resized.height(), resized.as_raw().as_slice())
            } else {
                (raster.width, raster.height, raster.pixels.as_slice())
            };

        let filtering = TextureFiltering::for_size(width, height);
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        if filtering.has_mipmaps() {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = state.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("image-texture"),
            size: extent,
            mip_level_count: filtering.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage,
            view_formats: &[],
        });
        state.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            extent,
        );

        if filtering.has_mipmaps() {
            let mut encoder = state
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("mipmap-encoder"),
                });
            state
                .mipmaps
                .generate(&state.device, &mut encoder, &texture, filtering.mip_levels);
            state.queue.submit(std::iter::once(encoder.finish()));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = match filtering.min_filter {
            MinFilter::Linear => &state.linear_sampler,
            MinFilter::LinearMipmapLinear => &state.mipmap_sampler,
        };
        let bind_group = state.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("image-bind"),
            layout: &state.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        if let Some(previous) = state.texture.replace(ImageTexture {
            texture,
            bind_group,
        }) {
            previous.texture.destroy();
        }
        debug!(
            width,
            height,
            mip_levels = filtering.mip_levels,
            "image texture uploaded"
        );
        Ok(())
    }

    fn draw(&mut self, matrix: Option<&QuadMatrix>) -> Result<bool, RenderError> {
        let state = self.state.as_ref().ok_or(RenderError::ContextLost)?;

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(SurfaceError::Outdated) | Err(SurfaceError::Lost) => {
                info!("viewer surface lost; reconfiguring");
                self.surface.configure(&state.device, &state.config);
                return Ok(false);
            }
            Err(SurfaceError::OutOfMemory) => {
                return Err(RenderError::Surface("out of memory".into()));
            }
            Err(SurfaceError::Timeout) => {
                warn!("viewer surface acquisition timed out");
                return Ok(false);
            }
            Err(SurfaceError::Other) => {
                warn!("viewer surface reported an unknown error; retrying");
                self.surface.configure(&state.device, &state.config);
                return Ok(false);
            }
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = state
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("viewer-encoder"),
            });

        let quad = matrix.zip(state.texture.as_ref());
        if let Some((matrix, _)) = quad {
            state.queue.write_buffer(
                &state.uniform_buffer,
                0,
                bytemuck::bytes_of(&MatrixUniform::from_matrix(matrix)),
            );
        }

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("viewer-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            if let Some((_, texture)) = quad {
                pass.set_pipeline(&state.pipeline);
                pass.set_bind_group(0, &state.uniform_bind_group, &[]);
                pass.set_bind_group(1, &texture.bind_group, &[]);
                pass.set_vertex_buffer(0, state.positions.slice(..));
                pass.set_vertex_buffer(1, state.tex_coords.slice(..));
                pass.draw(0..POSITIONS.len() as u32, 0..1);
            }
        }

        state.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(true)
    }

    fn rebuild(&mut self) -> Result<(), RenderError> {
        self.release();
        self.state = Some(self.create_device_state()?);
        Ok(())
    }

    fn release(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        if let Some(image) = state.texture {
            image.texture.destroy();
        }
        state.positions.destroy();
        state.tex_coords.destroy();
        state.uniform_buffer.destroy();
        debug!("gpu device state dropped");
    }
}
