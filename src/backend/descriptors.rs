// Descriptor set layouts, pools and writers
//
// Builders collect plain Vulkan structs and only touch the device in
// `build`, so layout validation can run without a GPU.

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::VulkanDevice;

pub struct DescriptorSetLayout {
    pub layout: vk::DescriptorSetLayout,
    bindings: BTreeMap<u32, vk::DescriptorSetLayoutBinding>,
    device: Arc<VulkanDevice>,
}

#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: BTreeMap<u32, vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Result<Self> {
        anyhow::ensure!(
            !self.bindings.contains_key(&binding),
            "Binding {} already in use",
            binding
        );
        anyhow::ensure!(count > 0, "Binding {} has a descriptor count of zero", binding);

        let layout_binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(binding)
            .descriptor_type(descriptor_type)
            .descriptor_count(count)
            .stage_flags(stage_flags)
            .build();
        self.bindings.insert(binding, layout_binding);
        Ok(self)
    }

    pub fn build(self, device: &Arc<VulkanDevice>) -> Result<DescriptorSetLayout> {
        let bindings: Vec<_> = self.bindings.values().copied().collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create descriptor set layout")?;

        Ok(DescriptorSetLayout {
            layout,
            bindings: self.bindings,
            device: device.clone(),
        })
    }
}

impl DescriptorSetLayout {
    pub fn builder() -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder::default()
    }

    fn descriptor_type_for_write(&self, binding: u32) -> Result<vk::DescriptorType> {
        descriptor_type_for_write(&self.bindings, binding)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Type of a single-descriptor binding that a writer may target.
fn descriptor_type_for_write(
    bindings: &BTreeMap<u32, vk::DescriptorSetLayoutBinding>,
    binding: u32,
) -> Result<vk::DescriptorType> {
    let description = bindings
        .get(&binding)
        .with_context(|| format!("Layout does not contain binding {}", binding))?;
    anyhow::ensure!(
        description.descriptor_count == 1,
        "Binding {} expects {} descriptors, writer only supports one",
        binding,
        description.descriptor_count
    );
    Ok(description.descriptor_type)
}

pub struct DescriptorPool {
    pub pool: vk::DescriptorPool,
    device: Arc<VulkanDevice>,
}

pub struct DescriptorPoolBuilder {
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    max_sets: u32,
    pool_flags: vk::DescriptorPoolCreateFlags,
}

impl Default for DescriptorPoolBuilder {
    fn default() -> Self {
        Self {
            pool_sizes: Vec::new(),
            max_sets: 1000,
            pool_flags: vk::DescriptorPoolCreateFlags::empty(),
        }
    }
}

impl DescriptorPoolBuilder {
    pub fn add_pool_size(mut self, descriptor_type: vk::DescriptorType, count: u32) -> Self {
        self.pool_sizes.push(vk::DescriptorPoolSize {
            ty: descriptor_type,
            descriptor_count: count,
        });
        self
    }

    pub fn pool_flags(mut self, flags: vk::DescriptorPoolCreateFlags) -> Self {
        self.pool_flags = flags;
        self
    }

    pub fn max_sets(mut self, count: u32) -> Self {
        self.max_sets = count;
        self
    }

    pub fn build(self, device: &Arc<VulkanDevice>) -> Result<DescriptorPool> {
        anyhow::ensure!(!self.pool_sizes.is_empty(), "Descriptor pool has no pool sizes");

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&self.pool_sizes)
            .max_sets(self.max_sets)
            .flags(self.pool_flags);

        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        Ok(DescriptorPool {
            pool,
            device: device.clone(),
        })
    }
}

impl DescriptorPool {
    pub fn builder() -> DescriptorPoolBuilder {
        DescriptorPoolBuilder::default()
    }

    /// Allocate one set. `None` means the pool is exhausted or fragmented.
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> Result<Option<vk::DescriptorSet>> {
        let layouts = [layout.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        match unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => Ok(sets.into_iter().next()),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                log::warn!("Descriptor pool exhausted");
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to allocate descriptor set"),
        }
    }

    /// Only valid for pools built with `FREE_DESCRIPTOR_SET`.
    pub fn free(&self, sets: &[vk::DescriptorSet]) -> Result<()> {
        unsafe { self.device.device.free_descriptor_sets(self.pool, sets) }
            .context("Failed to free descriptor sets")
    }

    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .device
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
        }
        .context("Failed to reset descriptor pool")
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

enum PendingWrite {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// Collects writes for one set, then allocates and fills it.
pub struct DescriptorWriter<'a> {
    layout: &'a DescriptorSetLayout,
    pool: &'a DescriptorPool,
    writes: Vec<(u32, vk::DescriptorType, PendingWrite)>,
}

impl<'a> DescriptorWriter<'a> {
    pub fn new(layout: &'a DescriptorSetLayout, pool: &'a DescriptorPool) -> Self {
        Self {
            layout,
            pool,
            writes: Vec::new(),
        }
    }

    pub fn write_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> Result<Self> {
        let descriptor_type = self.layout.descriptor_type_for_write(binding)?;
        self.writes
            .push((binding, descriptor_type, PendingWrite::Buffer(info)));
        Ok(self)
    }

    pub fn write_image(mut self, binding: u32, info: vk::DescriptorImageInfo) -> Result<Self> {
        let descriptor_type = self.layout.descriptor_type_for_write(binding)?;
        self.writes
            .push((binding, descriptor_type, PendingWrite::Image(info)));
        Ok(self)
    }

    /// Allocate a set from the pool and apply all writes to it.
    pub fn build(&self) -> Result<Option<vk::DescriptorSet>> {
        let Some(set) = self.pool.allocate(self.layout)? else {
            return Ok(None);
        };
        self.overwrite(set);
        Ok(Some(set))
    }

    /// Apply all writes to an existing set.
    pub fn overwrite(&self, set: vk::DescriptorSet) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|(binding, descriptor_type, pending)| {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .dst_array_element(0)
                    .descriptor_type(*descriptor_type);
                match pending {
                    PendingWrite::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                    PendingWrite::Image(info) => write.image_info(std::slice::from_ref(info)),
                }
                .build()
            })
            .collect();

        unsafe {
            self.pool.device.device.update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_layout_bindings() -> BTreeMap<u32, vk::DescriptorSetLayoutBinding> {
        DescriptorSetLayout::builder()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                1,
            )
            .unwrap()
            .add_binding(
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
                1,
            )
            .unwrap()
            .add_binding(2, vk::DescriptorType::SAMPLED_IMAGE, vk::ShaderStageFlags::FRAGMENT, 4)
            .unwrap()
            .bindings
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let result = DescriptorSetLayout::builder()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX, 1)
            .unwrap()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX, 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_count_rejected() {
        let result = DescriptorSetLayout::builder().add_binding(
            3,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::ShaderStageFlags::COMPUTE,
            0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_write_binding_lookup() {
        let bindings = global_layout_bindings();
        assert_eq!(
            descriptor_type_for_write(&bindings, 0).unwrap(),
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(
            descriptor_type_for_write(&bindings, 1).unwrap(),
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn test_write_to_unknown_binding() {
        let bindings = global_layout_bindings();
        assert!(descriptor_type_for_write(&bindings, 7).is_err());
    }

    #[test]
    fn test_write_to_array_binding() {
        let bindings = global_layout_bindings();
        assert!(descriptor_type_for_write(&bindings, 2).is_err());
    }

    #[test]
    fn test_pool_builder_defaults() {
        let builder = DescriptorPool::builder()
            .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, 2)
            .add_pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4);
        assert_eq!(builder.max_sets, 1000);
        assert!(builder.pool_flags.is_empty());
        assert_eq!(builder.pool_sizes.len(), 2);
        assert_eq!(builder.pool_sizes[1].descriptor_count, 4);

        let builder = builder
            .max_sets(4)
            .pool_flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        assert_eq!(builder.max_sets, 4);
        assert!(builder
            .pool_flags
            .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET));
    }
}
