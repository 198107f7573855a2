use std::sync::{Arc, Weak};

use anyhow::Context;
use ash::vk;

use crate::{
    device::{self, Device},
    error::Error,
};

/// Owned counterpart of `vk::SubpassDescription`.
#[derive(Debug, Clone, Default)]
pub struct SubpassDescription {
    pub pipeline_bind_point: vk::PipelineBindPoint,
    pub input_attachments: Vec<vk::AttachmentReference>,
    pub color_attachments: Vec<vk::AttachmentReference>,
    pub resolve_attachments: Vec<vk::AttachmentReference>,
    pub depth_stencil_attachment: Option<vk::AttachmentReference>,
    pub preserve_attachments: Vec<u32>,
}

impl SubpassDescription {
    pub fn graphics() -> Self {
        Self {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            ..Default::default()
        }
    }

    pub fn color_attachment(mut self, attachment: u32, layout: vk::ImageLayout) -> Self {
        self.color_attachments
            .push(vk::AttachmentReference { attachment, layout });
        self
    }

    pub fn resolve_attachment(mut self, attachment: u32, layout: vk::ImageLayout) -> Self {
        self.resolve_attachments
            .push(vk::AttachmentReference { attachment, layout });
        self
    }

    pub fn depth_stencil_attachment(mut self, attachment: u32, layout: vk::ImageLayout) -> Self {
        self.depth_stencil_attachment = Some(vk::AttachmentReference { attachment, layout });
        self
    }

    /// The returned description points into `self`.
    fn to_vk(&self) -> vk::SubpassDescription {
        let mut description = vk::SubpassDescription::builder()
            .pipeline_bind_point(self.pipeline_bind_point)
            .input_attachments(&self.input_attachments)
            .color_attachments(&self.color_attachments)
            .preserve_attachments(&self.preserve_attachments);
        // resolve_attachments also writes color_attachment_count.
        if !self.resolve_attachments.is_empty() {
            description = description.resolve_attachments(&self.resolve_attachments);
        }
        if let Some(depth_stencil) = &self.depth_stencil_attachment {
            description = description.depth_stencil_attachment(depth_stencil);
        }
        description.build()
    }
}

pub struct RenderPass {
    pub handle: vk::RenderPass,
    device: Weak<Device>,
}

impl RenderPass {
    pub fn builder() -> RenderPassBuilder {
        RenderPassBuilder::default()
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping render pass {:?}", self.handle);
                unsafe { device.handle.destroy_render_pass(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before render pass {:?}, leaking it", self.handle),
        }
    }
}

#[derive(Default)]
pub struct RenderPassBuilder {
    device: Option<Weak<Device>>,
    attachments: Vec<vk::AttachmentDescription>,
    subpasses: Vec<SubpassDescription>,
    dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn attachment(mut self, attachment: vk::AttachmentDescription) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn subpass(mut self, subpass: SubpassDescription) -> Self {
        self.subpasses.push(subpass);
        self
    }

    pub fn dependency(mut self, dependency: vk::SubpassDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn build(self) -> anyhow::Result<RenderPass> {
        let device = device::resolve(&self.device, "RenderPass")?;
        if self.subpasses.is_empty() {
            return Err(Error::MissingField {
                builder: "RenderPass",
                field: "subpasses",
            }
            .into());
        }
        let subpasses: Vec<vk::SubpassDescription> =
            self.subpasses.iter().map(SubpassDescription::to_vk).collect();
        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&self.attachments)
            .subpasses(&subpasses)
            .dependencies(&self.dependencies);
        let handle = unsafe { device.handle.create_render_pass(&create_info, None) }
            .context("RenderPass::build: vkCreateRenderPass")?;
        tracing::debug!(
            "Created render pass {:?} ({} attachments, {} subpasses)",
            handle,
            self.attachments.len(),
            subpasses.len()
        );
        Ok(RenderPass {
            handle,
            device: Arc::downgrade(&device),
        })
    }
}

pub struct Framebuffer {
    pub handle: vk::Framebuffer,
    pub extent: vk::Extent2D,
    device: Weak<Device>,
}

impl Framebuffer {
    pub fn builder() -> FramebufferBuilder {
        FramebufferBuilder::default()
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        match self.device.upgrade() {
            Some(device) => {
                tracing::debug!("Dropping framebuffer {:?}", self.handle);
                unsafe { device.handle.destroy_framebuffer(self.handle, None) };
            }
            None => tracing::warn!("Device dropped before framebuffer {:?}, leaking it", self.handle),
        }
    }
}

#[derive(Default)]
pub struct FramebufferBuilder {
    device: Option<Weak<Device>>,
    render_pass: Option<vk::RenderPass>,
    attachments: Vec<vk::ImageView>,
    extent: Option<vk::Extent2D>,
}

impl FramebufferBuilder {
    pub fn device(mut self, device: &Arc<Device>) -> Self {
        self.device = Some(Arc::downgrade(device));
        self
    }

    pub fn render_pass(mut self, render_pass: &RenderPass) -> Self {
        self.render_pass = Some(render_pass.handle);
        self
    }

    pub fn attachments(mut self, attachments: impl Into<Vec<vk::ImageView>>) -> Self {
        self.attachments = attachments.into();
        self
    }

    pub fn extent(mut self, extent: vk::Extent2D) -> Self {
        self.extent = Some(extent);
        self
    }

    pub fn build(self) -> anyhow::Result<Framebuffer> {
        let device = device::resolve(&self.device, "Framebuffer")?;
        let render_pass = self.render_pass.ok_or(Error::MissingField {
            builder: "Framebuffer",
            field: "render_pass",
        })?;
        let extent = self.extent.ok_or(Error::MissingField {
            builder: "Framebuffer",
            field: "extent",
        })?;
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&self.attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let handle = unsafe { device.handle.create_framebuffer(&create_info, None) }
            .context("Framebuffer::build: vkCreateFramebuffer")?;
        tracing::debug!("Created framebuffer {:?}", handle);
        Ok(Framebuffer {
            handle,
            extent,
            device: Arc::downgrade(&device),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subpass_without_resolve_keeps_color_count() {
        let subpass = SubpassDescription::graphics()
            .color_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .color_attachment(1, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let raw = subpass.to_vk();
        assert_eq!(raw.color_attachment_count, 2);
        assert!(raw.p_resolve_attachments.is_null());
        assert!(raw.p_depth_stencil_attachment.is_null());
    }

    #[test]
    fn subpass_points_at_owned_depth_reference() {
        let subpass = SubpassDescription::graphics()
            .color_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .depth_stencil_attachment(1, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .resolve_attachment(2, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let raw = subpass.to_vk();
        assert_eq!(raw.pipeline_bind_point, vk::PipelineBindPoint::GRAPHICS);
        assert_eq!(raw.color_attachment_count, 1);
        let depth = subpass.depth_stencil_attachment.as_ref().unwrap();
        assert_eq!(raw.p_depth_stencil_attachment, depth as *const _);
        assert_eq!(raw.p_resolve_attachments, subpass.resolve_attachments.as_ptr());
    }
}
