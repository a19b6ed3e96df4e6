// Meshes: vertex layout, OBJ loading and GPU buffers
//
// OBJ files index positions, normals and texture coordinates separately;
// the loader expands each face corner into a full Vertex and merges
// identical ones so the index buffer can share them.

use anyhow::{Context, Result};
use ash::vk;
use glam::{Vec2, Vec3};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::BufRead;
use std::mem::{offset_of, size_of};
use std::path::Path;
use std::sync::Arc;

use crate::backend::buffer::Buffer;
use crate::backend::VulkanDevice;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            normal: Vec3::ZERO,
            uv: Vec2::ZERO,
        }
    }
}

impl Vertex {
    fn bits(&self) -> [u32; 11] {
        let p = self.position;
        let c = self.color;
        let n = self.normal;
        let t = self.uv;
        [p.x, p.y, p.z, c.x, c.y, c.z, n.x, n.y, n.z, t.x, t.y].map(f32::to_bits)
    }

    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        let attribute = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };
        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
            attribute(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
            attribute(3, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
        ]
    }
}

// Bitwise, so vertices can key a HashMap during de-duplication
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// CPU-side mesh data
#[derive(Debug, Default, Clone)]
pub struct ModelBuilder {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl ModelBuilder {
    pub fn from_obj_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let (models, _) = tobj::load_obj(path, &Self::load_options())
            .with_context(|| format!("Failed to load model {:?}", path))?;
        let builder = Self::from_models(&models)?;
        log::info!(
            "Loaded model {:?}: {} vertices, {} indices",
            path,
            builder.vertices.len(),
            builder.indices.len()
        );
        Ok(builder)
    }

    /// Parse OBJ text. Material libraries are ignored.
    pub fn from_obj_reader<R: BufRead>(reader: &mut R) -> Result<Self> {
        let (models, _) =
            tobj::load_obj_buf(reader, &Self::load_options(), |_| Ok(Default::default()))
                .context("Failed to parse OBJ data")?;
        Self::from_models(&models)
    }

    fn load_options() -> tobj::LoadOptions {
        tobj::LoadOptions {
            triangulate: true,
            single_index: false,
            ..Default::default()
        }
    }

    fn from_models(models: &[tobj::Model]) -> Result<Self> {
        let mut builder = Self::default();
        let mut unique_vertices: HashMap<Vertex, u32> = HashMap::new();

        for model in models {
            let mesh = &model.mesh;
            for (corner, &position_index) in mesh.indices.iter().enumerate() {
                let vertex = Vertex {
                    position: vec3_at(&mesh.positions, position_index)
                        .with_context(|| format!("Position {} out of range", position_index))?,
                    color: vec3_at(&mesh.vertex_color, position_index).unwrap_or(Vec3::ONE),
                    normal: mesh
                        .normal_indices
                        .get(corner)
                        .and_then(|&i| vec3_at(&mesh.normals, i))
                        .unwrap_or(Vec3::ZERO),
                    uv: mesh
                        .texcoord_indices
                        .get(corner)
                        .and_then(|&i| vec2_at(&mesh.texcoords, i))
                        .unwrap_or(Vec2::ZERO),
                };

                let index = match unique_vertices.get(&vertex) {
                    Some(&index) => index,
                    None => {
                        let index = builder.vertices.len() as u32;
                        unique_vertices.insert(vertex, index);
                        builder.vertices.push(vertex);
                        index
                    }
                };
                builder.indices.push(index);
            }
        }

        Ok(builder)
    }
}

fn vec3_at(data: &[f32], index: u32) -> Option<Vec3> {
    let start = 3 * index as usize;
    data.get(start..start + 3).map(Vec3::from_slice)
}

fn vec2_at(data: &[f32], index: u32) -> Option<Vec2> {
    let start = 2 * index as usize;
    data.get(start..start + 2).map(Vec2::from_slice)
}

/// Mesh uploaded to device-local buffers
pub struct Model {
    vertex_buffer: Buffer,
    vertex_count: u32,
    index_buffer: Option<Buffer>,
    index_count: u32,
    device: Arc<VulkanDevice>,
}

impl Model {
    pub fn new(device: Arc<VulkanDevice>, builder: &ModelBuilder) -> Result<Self> {
        anyhow::ensure!(
            builder.vertices.len() >= 3,
            "A model needs at least 3 vertices, got {}",
            builder.vertices.len()
        );

        let vertex_buffer = Buffer::device_local_with_data(
            device.clone(),
            "vertex buffer",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&builder.vertices),
        )?;

        let index_buffer = if builder.indices.is_empty() {
            None
        } else {
            Some(Buffer::device_local_with_data(
                device.clone(),
                "index buffer",
                vk::BufferUsageFlags::INDEX_BUFFER,
                bytemuck::cast_slice(&builder.indices),
            )?)
        };

        Ok(Self {
            vertex_buffer,
            vertex_count: builder.vertices.len() as u32,
            index_buffer,
            index_count: builder.indices.len() as u32,
            device,
        })
    }

    pub fn from_file<P: AsRef<Path>>(device: Arc<VulkanDevice>, path: P) -> Result<Self> {
        let builder = ModelBuilder::from_obj_file(path)?;
        Self::new(device, &builder)
    }

    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.device.cmd_bind_vertex_buffers(
                command_buffer,
                0,
                &[self.vertex_buffer.buffer],
                &[0],
            );
            if let Some(index_buffer) = &self.index_buffer {
                self.device.device.cmd_bind_index_buffer(
                    command_buffer,
                    index_buffer.buffer,
                    0,
                    vk::IndexType::UINT32,
                );
            }
        }
    }

    pub fn draw(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            if self.index_buffer.is_some() {
                self.device
                    .device
                    .cmd_draw_indexed(command_buffer, self.index_count, 1, 0, 0, 0);
            } else {
                self.device
                    .device
                    .cmd_draw(command_buffer, self.vertex_count, 1, 0, 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::io::Cursor;

    const QUAD: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
f 1/1/1 2/2/1 3/3/1
f 1/1/1 3/3/1 4/4/1
";

    fn hash_of(vertex: &Vertex) -> u64 {
        let mut hasher = DefaultHasher::new();
        vertex.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(size_of::<Vertex>(), 44);

        let bindings = Vertex::binding_descriptions();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 44);

        let offsets: Vec<u32> = Vertex::attribute_descriptions()
            .iter()
            .map(|a| a.offset)
            .collect();
        assert_eq!(offsets, vec![0, 12, 24, 36]);

        let locations: Vec<u32> = Vertex::attribute_descriptions()
            .iter()
            .map(|a| a.location)
            .collect();
        assert_eq!(locations, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_vertex_equality_is_bitwise() {
        let a = Vertex {
            position: Vec3::new(0.0, 1.0, 2.0),
            ..Default::default()
        };
        let b = a;
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = Vertex {
            position: Vec3::new(-0.0, 1.0, 2.0),
            ..a
        };
        assert_ne!(a, c);
    }

    #[test]
    fn test_default_vertex_color_is_white() {
        assert_eq!(Vertex::default().color, Vec3::ONE);
    }

    #[test]
    fn test_obj_shared_corners_are_deduplicated() {
        let builder = ModelBuilder::from_obj_reader(&mut Cursor::new(QUAD)).unwrap();
        assert_eq!(builder.vertices.len(), 4);
        assert_eq!(builder.indices, vec![0, 1, 2, 0, 2, 3]);

        let corner = builder.vertices[2];
        assert_eq!(corner.position, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(corner.uv, Vec2::new(1.0, 1.0));
        assert_eq!(corner.normal, Vec3::Z);
        assert_eq!(corner.color, Vec3::ONE);
    }

    #[test]
    fn test_obj_polygon_is_triangulated() {
        let obj = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let builder = ModelBuilder::from_obj_reader(&mut Cursor::new(obj)).unwrap();
        assert_eq!(builder.vertices.len(), 4);
        assert_eq!(builder.indices.len(), 6);
        // No normals or texture coordinates in the file
        assert!(builder.vertices.iter().all(|v| v.normal == Vec3::ZERO));
        assert!(builder.vertices.iter().all(|v| v.uv == Vec2::ZERO));
    }

    #[test]
    fn test_obj_vertex_colors() {
        let obj = "v 0 0 0 1 0 0\nv 1 0 0 0 1 0\nv 0 1 0 0 0 1\nf 1 2 3\n";
        let builder = ModelBuilder::from_obj_reader(&mut Cursor::new(obj)).unwrap();
        assert_eq!(builder.vertices[0].color, Vec3::X);
        assert_eq!(builder.vertices[1].color, Vec3::Y);
        assert_eq!(builder.vertices[2].color, Vec3::Z);
    }

    #[test]
    fn test_same_position_different_normal_stays_distinct() {
        let obj = "\
v 0 0 0
v 1 0 0
v 0 1 0
vn 0 0 1
vn 0 0 -1
f 1//1 2//1 3//1
f 1//2 3//2 2//2
";
        let builder = ModelBuilder::from_obj_reader(&mut Cursor::new(obj)).unwrap();
        assert_eq!(builder.vertices.len(), 6);
        assert_eq!(builder.indices.len(), 6);
    }

    #[test]
    fn test_missing_obj_file() {
        assert!(ModelBuilder::from_obj_file("models/does-not-exist.obj").is_err());
    }
}
