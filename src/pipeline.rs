//! Pipeline layouts, caches and the graphics/compute pipelines built on them.
//!
//! The graphics pipeline builder owns every piece of fixed-function state so
//! that the `vk::*CreateInfo` structs, which only borrow, can be assembled in
//! one place right before the driver call.

use std::{
    ffi::{CStr, CString},
    slice,
    sync::{Arc, Weak},
};

use anyhow::Context;
use ash::vk;

use crate::{
    descriptor::DescriptorSetLayout,
    device::{self, Device},
    error::Error,
    render_pass::RenderPass,
    shader::ShaderModule,
};

pub struct PipelineLayout {
    pub handle: vk::PipelineLayout,
    device: Weak<Device>,
}

impl PipelineLayout {
    pub fn builder() -> PipelineLayoutBuilder {
        PipelineLayoutBuilder::default()
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping pipeline layout {:?}", self.handle);
                unsafe { device.handle.destroy_pipeline_layout(self.handle, None) };
            }
            None => tracing::warn!(
                "Device dropped before pipeline layout {:?}, leaking it",
                self.handle
            ),
        }
    }
}

#[derive(Default)]
pub struct PipelineLayoutBuilder {
    device: Option<Weak<Device>>,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayoutBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn set_layout(mut self, layout: &DescriptorSetLayout) -> Self {
        self.set_layouts.push(layout.handle);
        self
    }

    pub fn push_constant_range(
        mut self,
        stage_flags: vk::ShaderStageFlags,
        offset: u32,
        size: u32,
    ) -> Self {
        self.push_constant_ranges.push(vk::PushConstantRange {
            stage_flags,
            offset,
            size,
        });
        self
    }

    pub fn build(self) -> anyhow::Result<PipelineLayout> {
        let device = device::resolve(&self.device, "PipelineLayout")?;
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&self.set_layouts)
            .push_constant_ranges(&self.push_constant_ranges);
        let handle = unsafe { device.handle.create_pipeline_layout(&create_info, None) }
            .context("PipelineLayout::build: vkCreatePipelineLayout")?;
        tracing::debug!("Created pipeline layout {:?}", handle);
        Ok(PipelineLayout {
            handle,
            device: Arc::downgrade(&device),
        })
    }
}

pub struct PipelineCache {
    pub handle: vk::PipelineCache,
    device: Weak<Device>,
}

impl PipelineCache {
    pub fn builder() -> PipelineCacheBuilder {
        PipelineCacheBuilder::default()
    }

    /// Serialized cache contents, suitable for [`PipelineCacheBuilder::initial_data`].
    pub fn data(&self) -> anyhow::Result<Vec<u8>> {
        let device = device::upgrade(&self.device)?;
        unsafe { device.handle.get_pipeline_cache_data(self.handle) }
            .context("vkGetPipelineCacheData")
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping pipeline cache {:?}", self.handle);
                unsafe { device.handle.destroy_pipeline_cache(self.handle, None) };
            }
            None => tracing::warn!(
                "Device dropped before pipeline cache {:?}, leaking it",
                self.handle
            ),
        }
    }
}

#[derive(Default)]
pub struct PipelineCacheBuilder {
    device: Option<Weak<Device>>,
    initial_data: Vec<u8>,
}

impl PipelineCacheBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn initial_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.initial_data = data.into();
        self
    }

    pub fn build(self) -> anyhow::Result<PipelineCache> {
        let device = device::resolve(&self.device, "PipelineCache")?;
        let create_info = vk::PipelineCacheCreateInfo::builder().initial_data(&self.initial_data);
        let handle = unsafe { device.handle.create_pipeline_cache(&create_info, None) }
            .context("PipelineCache::build: vkCreatePipelineCache")?;
        tracing::debug!("Created pipeline cache {:?}", handle);
        Ok(PipelineCache {
            handle,
            device: Arc::downgrade(&device),
        })
    }
}

/// A graphics or compute pipeline.
pub struct Pipeline {
    pub handle: vk::Pipeline,
    pub bind_point: vk::PipelineBindPoint,
    device: Weak<Device>,
}

impl Pipeline {
    pub fn graphics() -> GraphicsPipelineBuilder {
        GraphicsPipelineBuilder::default()
    }

    pub fn compute() -> ComputePipelineBuilder {
        ComputePipelineBuilder::default()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping pipeline {:?}", self.handle);
                unsafe { device.handle.destroy_pipeline(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before pipeline {:?}, leaking it", self.handle),
        }
    }
}

#[derive(Debug, Clone)]
struct ShaderStage {
    stage: vk::ShaderStageFlags,
    module: vk::ShaderModule,
    entry_point: CString,
}

impl ShaderStage {
    fn to_vk(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage)
            .module(self.module)
            .name(&self.entry_point)
            .build()
    }
}

/// Where a graphics pipeline renders to.
#[derive(Debug, Clone)]
enum RenderTarget {
    RenderPass {
        handle: vk::RenderPass,
        subpass: u32,
    },
    Dynamic {
        color_formats: Vec<vk::Format>,
        depth_format: vk::Format,
    },
}

pub struct GraphicsPipelineBuilder {
    device: Option<Weak<Device>>,
    layout: Option<vk::PipelineLayout>,
    cache: vk::PipelineCache,
    stages: Vec<ShaderStage>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    samples: vk::SampleCountFlags,
    depth_compare_op: Option<vk::CompareOp>,
    color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    viewports: Vec<vk::Viewport>,
    scissors: Vec<vk::Rect2D>,
    dynamic_states: Vec<vk::DynamicState>,
    target: Option<RenderTarget>,
}

impl Default for GraphicsPipelineBuilder {
    fn default() -> Self {
        Self {
            device: None,
            layout: None,
            cache: vk::PipelineCache::null(),
            stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_compare_op: None,
            color_blend_attachments: Vec::new(),
            viewports: Vec::new(),
            scissors: Vec::new(),
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            target: None,
        }
    }
}

impl GraphicsPipelineBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn layout(mut self, layout: &PipelineLayout) -> Self {
        self.layout = Some(layout.handle);
        self
    }

    pub fn cache(mut self, cache: &PipelineCache) -> Self {
        self.cache = cache.handle;
        self
    }

    pub fn stage(
        mut self,
        stage: vk::ShaderStageFlags,
        module: &ShaderModule,
        entry_point: &CStr,
    ) -> Self {
        self.stages.push(ShaderStage {
            stage,
            module: module.handle,
            entry_point: entry_point.to_owned(),
        });
        self
    }

    pub fn vertex_binding(
        mut self,
        binding: u32,
        stride: u32,
        input_rate: vk::VertexInputRate,
    ) -> Self {
        self.vertex_bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate,
        });
        self
    }

    pub fn vertex_attribute(
        mut self,
        location: u32,
        binding: u32,
        format: vk::Format,
        offset: u32,
    ) -> Self {
        self.vertex_attributes
            .push(vk::VertexInputAttributeDescription {
                location,
                binding,
                format,
                offset,
            });
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, polygon_mode: vk::PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }

    pub fn cull_mode(mut self, cull_mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.cull_mode = cull_mode;
        self.front_face = front_face;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Enables depth test and write.
    pub fn depth_test(mut self, compare_op: vk::CompareOp) -> Self {
        self.depth_compare_op = Some(compare_op);
        self
    }

    pub fn color_blend_attachment(
        mut self,
        attachment: vk::PipelineColorBlendAttachmentState,
    ) -> Self {
        self.color_blend_attachments.push(attachment);
        self
    }

    /// Static viewport and scissor; drops them from the dynamic states.
    pub fn viewport(mut self, extent: vk::Extent2D) -> Self {
        self.viewports = vec![vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        self.scissors = vec![vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        }];
        self.dynamic_states.retain(|state| {
            *state != vk::DynamicState::VIEWPORT && *state != vk::DynamicState::SCISSOR
        });
        self
    }

    pub fn dynamic_states(mut self, states: impl Into<Vec<vk::DynamicState>>) -> Self {
        self.dynamic_states = states.into();
        self
    }

    pub fn render_pass(mut self, render_pass: &RenderPass, subpass: u32) -> Self {
        self.target = Some(RenderTarget::RenderPass {
            handle: render_pass.handle,
            subpass,
        });
        self
    }

    /// Targets dynamic rendering with the given attachment formats.
    pub fn rendering_formats(
        mut self,
        color_formats: impl Into<Vec<vk::Format>>,
        depth_format: vk::Format,
    ) -> Self {
        self.target = Some(RenderTarget::Dynamic {
            color_formats: color_formats.into(),
            depth_format,
        });
        self
    }

    fn blend_attachments(&self) -> Vec<vk::PipelineColorBlendAttachmentState> {
        if !self.color_blend_attachments.is_empty() {
            return self.color_blend_attachments.clone();
        }
        let color_count = match &self.target {
            Some(RenderTarget::Dynamic { color_formats, .. }) => color_formats.len(),
            _ => 1,
        };
        vec![
            vk::PipelineColorBlendAttachmentState {
                color_write_mask: vk::ColorComponentFlags::RGBA,
                ..Default::default()
            };
            color_count
        ]
    }

    pub fn build(self) -> anyhow::Result<Pipeline> {
        let device = device::resolve(&self.device, "GraphicsPipeline")?;
        let layout = self.layout.ok_or(Error::MissingField {
            builder: "GraphicsPipeline",
            field: "layout",
        })?;
        let target = self.target.clone().ok_or(Error::MissingField {
            builder: "GraphicsPipeline",
            field: "render_pass",
        })?;
        if self.stages.is_empty() {
            return Err(Error::MissingField {
                builder: "GraphicsPipeline",
                field: "stages",
            }
            .into());
        }

        let stages: Vec<_> = self.stages.iter().map(ShaderStage::to_vk).collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::builder().topology(self.topology);
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let viewport_state = if self.viewports.is_empty() {
            viewport_state
        } else {
            viewport_state
                .viewports(&self.viewports)
                .scissors(&self.scissors)
        };
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(self.polygon_mode)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .line_width(1.0);
        let multisample =
            vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(self.samples);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(self.depth_compare_op.is_some())
            .depth_write_enable(self.depth_compare_op.is_some())
            .depth_compare_op(self.depth_compare_op.unwrap_or(vk::CompareOp::ALWAYS));
        let blend_attachments = self.blend_attachments();
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&self.dynamic_states);

        let mut create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout);
        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder();
        match &target {
            RenderTarget::RenderPass { handle, subpass } => {
                create_info = create_info.render_pass(*handle).subpass(*subpass);
            }
            RenderTarget::Dynamic {
                color_formats,
                depth_format,
            } => {
                rendering_info = rendering_info
                    .color_attachment_formats(color_formats)
                    .depth_attachment_format(*depth_format);
                create_info = create_info.push_next(&mut rendering_info);
            }
        }
        let create_info = create_info.build();

        let handle = unsafe {
            device
                .handle
                .create_graphics_pipelines(self.cache, slice::from_ref(&create_info), None)
        }
        .map_err(|(_, result)| result)
        .context("GraphicsPipeline::build: vkCreateGraphicsPipelines")?[0];
        tracing::debug!("Created graphics pipeline {:?}", handle);
        Ok(Pipeline {
            handle,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            device: Arc::downgrade(&device),
        })
    }
}

#[derive(Default)]
pub struct ComputePipelineBuilder {
    device: Option<Weak<Device>>,
    layout: Option<vk::PipelineLayout>,
    cache: vk::PipelineCache,
    stage: Option<ShaderStage>,
}

impl ComputePipelineBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn layout(mut self, layout: &PipelineLayout) -> Self {
        self.layout = Some(layout.handle);
        self
    }

    pub fn cache(mut self, cache: &PipelineCache) -> Self {
        self.cache = cache.handle;
        self
    }

    pub fn shader(mut self, module: &ShaderModule, entry_point: &CStr) -> Self {
        self.stage = Some(ShaderStage {
            stage: vk::ShaderStageFlags::COMPUTE,
            module: module.handle,
            entry_point: entry_point.to_owned(),
        });
        self
    }

    pub fn build(self) -> anyhow::Result<Pipeline> {
        let device = device::resolve(&self.device, "ComputePipeline")?;
        let layout = self.layout.ok_or(Error::MissingField {
            builder: "ComputePipeline",
            field: "layout",
        })?;
        let stage = self.stage.as_ref().ok_or(Error::MissingField {
            builder: "ComputePipeline",
            field: "shader",
        })?;
        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage.to_vk())
            .layout(layout)
            .build();
        let handle = unsafe {
            device
                .handle
                .create_compute_pipelines(self.cache, slice::from_ref(&create_info), None)
        }
        .map_err(|(_, result)| result)
        .context("ComputePipeline::build: vkCreateComputePipelines")?[0];
        tracing::debug!("Created compute pipeline {:?}", handle);
        Ok(Pipeline {
            handle,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            device: Arc::downgrade(&device),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_viewport_removes_dynamic_viewport_state() {
        let builder = Pipeline::graphics().viewport(vk::Extent2D {
            width: 640,
            height: 480,
        });
        assert!(builder.dynamic_states.is_empty());
        assert_eq!(builder.scissors[0].extent.width, 640);
        assert_eq!(builder.viewports[0].height, 480.0);
    }

    #[test]
    fn default_blend_state_covers_each_color_format() {
        let builder = Pipeline::graphics().rendering_formats(
            [vk::Format::B8G8R8A8_SRGB, vk::Format::R16G16B16A16_SFLOAT],
            vk::Format::D32_SFLOAT,
        );
        let attachments = builder.blend_attachments();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].color_write_mask, vk::ColorComponentFlags::RGBA);
        assert_eq!(attachments[0].blend_enable, vk::FALSE);
    }

    #[test]
    fn graphics_pipeline_requires_device() {
        let error = Pipeline::graphics().build().err().unwrap();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::MissingField {
                builder: "GraphicsPipeline",
                field: "device"
            })
        ));
    }

    #[test]
    fn compute_pipeline_requires_device() {
        let error = Pipeline::compute().build().err().unwrap();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::MissingField {
                builder: "ComputePipeline",
                field: "device"
            })
        ));
    }
}
