//! Off-screen wgpu implementation of [`GpuBackend`].

use crate::core::config::GpuRenderingConfig;
use crate::core::geo::MapId;
use crate::prelude::{Arc, HashMap, HashSet};
use crate::rendering::backend::{GpuBackend, MapDrawCall, Vertex};
use crate::rendering::style::EffectiveStyle;
use crate::tiles::{TileImage, TileKey, TileRegion};
use crate::{MapError, Result};
use wgpu::util::DeviceExt;

pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Per-draw uniforms, mirrors `DrawUniforms` in `warped_map.wgsl`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniforms {
    pub tile_rect: [f32; 4],
    pub colorize: [f32; 4],
    pub remove_background: [f32; 4],
    pub params: [f32; 4],
}

impl DrawUniforms {
    pub fn new(style: &EffectiveStyle, region: &TileRegion) -> Self {
        let colorize = match style.colorize {
            Some(c) => [c.color.r, c.color.g, c.color.b, 1.0],
            None => [0.0; 4],
        };
        let (remove_background, threshold, hardness) = match style.remove_background {
            Some(rb) => (
                [rb.color.r, rb.color.g, rb.color.b, 1.0],
                rb.threshold,
                rb.hardness,
            ),
            None => ([0.0; 4], 0.0, 0.0),
        };

        Self {
            tile_rect: [
                region.x as f32,
                region.y as f32,
                region.width.max(1) as f32,
                region.height.max(1) as f32,
            ],
            colorize,
            remove_background,
            params: [style.opacity.clamp(0.0, 1.0), threshold, hardness, 0.0],
        }
    }
}

/// Bytes per row of a texture copy, padded to wgpu's copy alignment
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

struct GpuTile {
    image: Arc<TileImage>,
    view: wgpu::TextureView,
}

struct VertexBuffer {
    buffer: wgpu::Buffer,
    count: u32,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    width: u32,
    height: u32,
    clear_color: wgpu::Color,
    vertex_buffers: HashMap<MapId, VertexBuffer>,
    tiles: HashMap<TileKey, GpuTile>,
    used_tiles: HashSet<TileKey>,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuBackend {
    /// Creates a backend rendering into a `width` x `height` off-screen target
    pub async fn new(width: u32, height: u32, config: &GpuRenderingConfig) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(MapError::Validation(format!(
                "invalid render target size {}x{}",
                width, height
            )));
        }

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            dx12_shader_compiler: Default::default(),
            flags: wgpu::InstanceFlags::default(),
            gles_minor_version: wgpu::Gles3MinorVersion::Automatic,
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| MapError::BackendUnavailable("no suitable adapter".to_string()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Warped Map Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await
            .map_err(|e| MapError::BackendUnavailable(format!("failed to create device: {}", e)))?;

        log::info!(
            "created wgpu backend on {} ({}x{})",
            adapter.get_info().name,
            width,
            height
        );

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Warped Map Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/warped_map.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Warped Map Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Warped Map Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Warped Map Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute {
                            format: wgpu::VertexFormat::Float32x2,
                            offset: 0,
                            shader_location: 0,
                        },
                        wgpu::VertexAttribute {
                            format: wgpu::VertexFormat::Float32x2,
                            offset: 8,
                            shader_location: 1,
                        },
                    ],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                // Warping may mirror triangles
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        });

        let (mag_filter, min_filter) = config.texture_filter.to_wgpu_filter();
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Tile Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter,
            min_filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Warped Map Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let [r, g, b, a] = config.clear_color;
        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            target,
            target_view,
            width,
            height,
            clear_color: wgpu::Color { r, g, b, a },
            vertex_buffers: HashMap::default(),
            tiles: HashMap::default(),
            used_tiles: HashSet::default(),
            encoder: None,
        })
    }

    /// Blocking version of [`new`](Self::new)
    pub fn new_blocking(width: u32, height: u32, config: &GpuRenderingConfig) -> Result<Self> {
        pollster::block_on(Self::new(width, height, config))
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn texture_count(&self) -> usize {
        self.tiles.len()
    }

    /// Reads back the render target as tightly packed premultiplied RGBA8
    pub fn read_pixels(&self) -> Result<Vec<u8>> {
        let padded = padded_bytes_per_row(self.width);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded * self.height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| MapError::Render(format!("readback channel closed: {}", e)))?
            .map_err(|e| MapError::Render(format!("failed to map readback buffer: {}", e)))?;

        let row_bytes = (self.width * 4) as usize;
        let mut pixels = Vec::with_capacity(row_bytes * self.height as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded as usize) {
                pixels.extend_from_slice(&row[..row_bytes]);
            }
        }
        buffer.unmap();
        Ok(pixels)
    }

    fn tile_view(&mut self, key: &TileKey, image: &Arc<TileImage>) -> Result<()> {
        if let Some(existing) = self.tiles.get(key) {
            if Arc::ptr_eq(&existing.image, image) {
                return Ok(());
            }
        }
        if image.width == 0 || image.height == 0 || image.pixels.len() != image.byte_len() {
            return Err(MapError::Render(format!("malformed tile image {}", key)));
        }

        let size = wgpu::Extent3d {
            width: image.width,
            height: image.height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Tile Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &image.pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * image.width),
                rows_per_image: Some(image.height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.tiles.insert(
            key.clone(),
            GpuTile {
                image: image.clone(),
                view,
            },
        );
        Ok(())
    }
}

impl GpuBackend for WgpuBackend {
    fn upload_vertices(&mut self, map_id: &MapId, vertices: &[Vertex]) -> Result<()> {
        if let Some(existing) = self.vertex_buffers.get(map_id) {
            if existing.count as usize == vertices.len() {
                self.queue
                    .write_buffer(&existing.buffer, 0, bytemuck::cast_slice(vertices));
                return Ok(());
            }
        }

        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Warped Map Vertex Buffer"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            });
        self.vertex_buffers.insert(
            map_id.clone(),
            VertexBuffer {
                buffer,
                count: vertices.len() as u32,
            },
        );
        Ok(())
    }

    fn release(&mut self, map_id: &MapId) {
        self.vertex_buffers.remove(map_id);
        self.tiles.retain(|key, _| &key.map_id != map_id);
        self.used_tiles.retain(|key| &key.map_id != map_id);
    }

    fn begin_frame(&mut self) -> Result<()> {
        if self.encoder.is_some() {
            return Err(MapError::Render("frame already started".to_string()));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Warped Map Encoder"),
            });
        {
            let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }

        self.used_tiles.clear();
        self.encoder = Some(encoder);
        Ok(())
    }

    fn draw_map(&mut self, call: &MapDrawCall<'_>) -> Result<()> {
        if self.encoder.is_none() {
            return Err(MapError::Render("draw outside of a frame".to_string()));
        }
        for tile in call.tiles {
            self.tile_view(&tile.key, &tile.image)?;
            self.used_tiles.insert(tile.key.clone());
        }

        let vertices = self
            .vertex_buffers
            .get(call.map_id)
            .ok_or_else(|| MapError::Render(format!("no vertex buffer for {}", call.map_id)))?;

        let mut bind_groups = Vec::with_capacity(call.tiles.len());
        for tile in call.tiles {
            let Some(gpu_tile) = self.tiles.get(&tile.key) else {
                continue;
            };
            let uniforms = DrawUniforms::new(&call.style, &tile.region);
            let uniform_buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Draw Uniforms"),
                    contents: bytemuck::bytes_of(&uniforms),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            bind_groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Tile Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&gpu_tile.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            }));
        }

        let Some(encoder) = self.encoder.as_mut() else {
            return Err(MapError::Render("draw outside of a frame".to_string()));
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Warped Map Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.target_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_vertex_buffer(0, vertices.buffer.slice(..));
        for bind_group in &bind_groups {
            pass.set_bind_group(0, bind_group, &[]);
            pass.draw(0..vertices.count, 0..1);
        }

        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| MapError::Render("no frame in progress".to_string()))?;
        self.queue.submit(std::iter::once(encoder.finish()));

        let used = &self.used_tiles;
        self.tiles.retain(|key, _| used.contains(key));
        Ok(())
    }
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("vertex_buffers", &self.vertex_buffers.len())
            .field("tiles", &self.tiles.len())
            .finish()
    }
}
