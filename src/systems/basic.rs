// Basic lit render system
//
// One pipeline, one global descriptor set (camera + light UBO and the
// texture), and a push constant block per object for its matrices.

use anyhow::Result;
use ash::vk;
use glam::{Mat4, Vec3, Vec4};
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::pipeline::{Pipeline, PipelineConfig, PipelineLayout};
use crate::backend::VulkanDevice;
use crate::frame::FrameInfo;
use crate::scene::GameObject;

/// Per-frame uniform data, set 0 binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GlobalUbo {
    pub projection_view: Mat4,
    /// xyz points towards the light (up is -Y), w unused
    pub light_direction: Vec4,
}

impl Default for GlobalUbo {
    fn default() -> Self {
        Self {
            projection_view: Mat4::IDENTITY,
            light_direction: Vec3::new(3.0, -5.0, 1.0).normalize().extend(0.0),
        }
    }
}

/// Per-object push constants
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PushConstantData {
    pub model_matrix: Mat4,
    /// Upper 3x3 holds the normal matrix. The otherwise unused last column
    /// carries the object color in xyz, which tints the vertex colors.
    pub normal_matrix: Mat4,
}

impl PushConstantData {
    pub fn for_object(object: &GameObject) -> Self {
        let mut normal_matrix = Mat4::from_mat3(object.transform.normal_matrix());
        normal_matrix.w_axis = object.color.extend(1.0);
        Self {
            model_matrix: object.transform.mat4(),
            normal_matrix,
        }
    }
}

const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

pub struct BasicRenderSystem {
    // Dropped before the layout
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    device: Arc<VulkanDevice>,
}

impl BasicRenderSystem {
    pub fn new(
        device: Arc<VulkanDevice>,
        render_pass: vk::RenderPass,
        global_set_layout: vk::DescriptorSetLayout,
        vertex_shader: &Path,
        fragment_shader: &Path,
    ) -> Result<Self> {
        let push_constant_range = vk::PushConstantRange {
            stage_flags: PUSH_CONSTANT_STAGES,
            offset: 0,
            size: size_of::<PushConstantData>() as u32,
        };
        let pipeline_layout =
            PipelineLayout::new(device.clone(), &[global_set_layout], &[push_constant_range])?;

        let config = PipelineConfig::default_for(render_pass, pipeline_layout.layout);
        let pipeline = Pipeline::new(device.clone(), vertex_shader, fragment_shader, &config)?;

        Ok(Self {
            pipeline,
            pipeline_layout,
            vertex_shader: vertex_shader.to_path_buf(),
            fragment_shader: fragment_shader.to_path_buf(),
            device,
        })
    }

    /// Rebuild the pipeline from the shader files on disk.
    ///
    /// The old pipeline stays in place if the new one fails to build. The
    /// caller must make sure the GPU is no longer using the old pipeline.
    pub fn rebuild_pipeline(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        let config = PipelineConfig::default_for(render_pass, self.pipeline_layout.layout);
        let pipeline = Pipeline::new(
            self.device.clone(),
            &self.vertex_shader,
            &self.fragment_shader,
            &config,
        )?;
        self.pipeline = pipeline;
        log::info!("Rebuilt basic pipeline");
        Ok(())
    }

    pub fn render_game_objects(&self, frame_info: &FrameInfo, objects: &[GameObject]) {
        let command_buffer = frame_info.command_buffer;
        let raw = &self.device.device;

        self.pipeline.bind(command_buffer);
        unsafe {
            raw.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout.layout,
                0,
                &[frame_info.global_descriptor_set],
                &[],
            );
        }

        for object in objects {
            let Some(model) = &object.model else {
                continue;
            };

            let push = PushConstantData::for_object(object);
            unsafe {
                raw.cmd_push_constants(
                    command_buffer,
                    self.pipeline_layout.layout,
                    PUSH_CONSTANT_STAGES,
                    0,
                    bytemuck::bytes_of(&push),
                );
            }
            model.bind(command_buffer);
            model.draw(command_buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constants_fit_guaranteed_minimum() {
        // Every implementation supports at least 128 bytes
        assert_eq!(size_of::<PushConstantData>(), 128);
    }

    #[test]
    fn test_global_ubo_layout() {
        assert_eq!(size_of::<GlobalUbo>(), 80);
        let ubo = GlobalUbo::default();
        assert!((ubo.light_direction.truncate().length() - 1.0).abs() < 1e-6);
        assert_eq!(ubo.light_direction.w, 0.0);
    }

    #[test]
    fn test_object_color_rides_in_normal_matrix() {
        let mut ids = crate::scene::GameObjectIds::default();
        let mut object = GameObject::new(&mut ids);
        object.color = Vec3::new(0.8, 0.1, 0.3);
        object.transform.rotation = Vec3::new(0.4, 1.1, -0.2);
        object.transform.scale = Vec3::new(2.0, 1.0, 0.5);

        let push = PushConstantData::for_object(&object);

        assert_eq!(push.normal_matrix.w_axis, Vec4::new(0.8, 0.1, 0.3, 1.0));
        let normal = glam::Mat3::from_mat4(push.normal_matrix);
        assert!(normal.abs_diff_eq(object.transform.normal_matrix(), 1e-6));
        assert!(push.model_matrix.abs_diff_eq(object.transform.mat4(), 1e-6));
    }

    #[test]
    fn test_default_color_leaves_vertices_untinted() {
        let mut ids = crate::scene::GameObjectIds::default();
        let push = PushConstantData::for_object(&GameObject::new(&mut ids));
        assert_eq!(push.normal_matrix.w_axis, Vec4::ONE);
    }

    #[test]
    fn test_push_constant_stages() {
        assert!(PUSH_CONSTANT_STAGES.contains(vk::ShaderStageFlags::VERTEX));
        assert!(PUSH_CONSTANT_STAGES.contains(vk::ShaderStageFlags::FRAGMENT));
    }
}
