// Graphics pipeline creation
//
// The fixed-function state lives in a plain `PipelineConfig` so render
// systems can tweak it before building. Viewport and scissor are dynamic,
// which keeps a pipeline valid across swapchain recreation.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;

use super::shader;
use super::VulkanDevice;
use crate::model::Vertex;

const ENTRY_POINT: &CStr = c"main";

/// Fixed-function state for one graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub binding_descriptions: Vec<vk::VertexInputBindingDescription>,
    pub attribute_descriptions: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
    pub blend_enable: bool,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub render_pass: vk::RenderPass,
    pub pipeline_layout: vk::PipelineLayout,
    pub subpass: u32,
}

impl PipelineConfig {
    /// Opaque, depth-tested triangles with `Vertex` input.
    pub fn default_for(render_pass: vk::RenderPass, pipeline_layout: vk::PipelineLayout) -> Self {
        Self {
            binding_descriptions: Vertex::binding_descriptions(),
            attribute_descriptions: Vertex::attribute_descriptions(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS,
            blend_enable: false,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            render_pass,
            pipeline_layout,
            subpass: 0,
        }
    }
}

/// Owned pipeline layout: descriptor set layouts plus push constant ranges
pub struct PipelineLayout {
    pub layout: vk::PipelineLayout,
    device: Arc<VulkanDevice>,
}

impl PipelineLayout {
    pub fn new(
        device: Arc<VulkanDevice>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        Ok(Self { layout, device })
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// A graphics pipeline and the shader modules it was built from
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    vert_module: vk::ShaderModule,
    frag_module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl Pipeline {
    pub fn new(
        device: Arc<VulkanDevice>,
        vert_path: &Path,
        frag_path: &Path,
        config: &PipelineConfig,
    ) -> Result<Self> {
        anyhow::ensure!(
            config.render_pass != vk::RenderPass::null(),
            "Cannot create pipeline: no render pass in config"
        );
        anyhow::ensure!(
            config.pipeline_layout != vk::PipelineLayout::null(),
            "Cannot create pipeline: no pipeline layout in config"
        );

        let vert_code = shader::read_spirv(vert_path)?;
        let frag_code = shader::read_spirv(frag_path)?;

        // Modules are owned by `this` from the start so Drop cleans up on failure
        let mut this = Self {
            pipeline: vk::Pipeline::null(),
            vert_module: vk::ShaderModule::null(),
            frag_module: vk::ShaderModule::null(),
            device,
        };
        this.vert_module = shader::create_shader_module(&this.device, &vert_code)?;
        this.frag_module = shader::create_shader_module(&this.device, &frag_code)?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(this.vert_module)
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(this.frag_module)
                .name(ENTRY_POINT)
                .build(),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&config.binding_descriptions)
            .vertex_attribute_descriptions(&config.attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(config.topology)
            .primitive_restart_enable(false);

        // Counts only; the actual rectangles are set per frame
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(config.polygon_mode)
            .line_width(1.0)
            .cull_mode(config.cull_mode)
            .front_face(config.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(config.depth_test)
            .depth_write_enable(config.depth_write)
            .depth_compare_op(config.depth_compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(config.blend_enable)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&config.dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(config.pipeline_layout)
            .render_pass(config.render_pass)
            .subpass(config.subpass)
            .build();

        let pipelines = unsafe {
            this.device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)
                .context("Failed to create graphics pipeline")?
        };
        this.pipeline = pipelines
            .into_iter()
            .next()
            .context("Driver returned no pipeline")?;

        log::debug!("Created pipeline from {:?} + {:?}", vert_path, frag_path);
        Ok(this)
    }

    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline,
            );
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_shader_module(self.frag_module, None);
            self.device.device.destroy_shader_module(self.vert_module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default_for(
            vk::RenderPass::from_raw(1),
            vk::PipelineLayout::from_raw(2),
        );
        assert_eq!(config.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(config.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(config.depth_compare_op, vk::CompareOp::LESS);
        assert!(config.depth_test && config.depth_write);
        assert!(!config.blend_enable);
        assert_eq!(
            config.dynamic_states,
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
        assert_eq!(config.binding_descriptions.len(), 1);
        assert_eq!(config.attribute_descriptions.len(), 4);
    }
}
