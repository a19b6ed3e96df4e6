// Buffers for vertex, index, and uniform data
//
// Memory comes from gpu-allocator. Host-visible buffers (CpuToGpu) stay
// persistently mapped; device-local ones are filled through a staging copy.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use super::VulkanDevice;

/// Round `instance_size` up to a multiple of `min_offset_alignment`.
///
/// Vulkan alignments are powers of two; zero means "no requirement".
pub fn aligned_size(
    instance_size: vk::DeviceSize,
    min_offset_alignment: vk::DeviceSize,
) -> vk::DeviceSize {
    if min_offset_alignment > 0 {
        (instance_size + min_offset_alignment - 1) & !(min_offset_alignment - 1)
    } else {
        instance_size
    }
}

/// A GPU buffer holding `instance_count` aligned instances
pub struct Buffer {
    pub buffer: vk::Buffer,
    instance_size: vk::DeviceSize,
    instance_count: u32,
    alignment_size: vk::DeviceSize,
    buffer_size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        min_offset_alignment: vk::DeviceSize,
    ) -> Result<Self> {
        let alignment_size = aligned_size(instance_size, min_offset_alignment);
        let buffer_size = alignment_size * instance_count as vk::DeviceSize;
        anyhow::ensure!(buffer_size > 0, "Buffer {} would be empty", name);

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(buffer_size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer {}", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
        let allocation = match device.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };

        let this = Self {
            buffer,
            instance_size,
            instance_count,
            alignment_size,
            buffer_size,
            allocation: Some(allocation),
            device,
        };

        unsafe { this.device.device.bind_buffer_memory(buffer, memory, offset) }
            .with_context(|| format!("Failed to bind buffer memory for {}", name))?;

        Ok(this)
    }

    /// Upload `data` into a new device-local buffer through a staging copy.
    pub fn device_local_with_data(
        device: Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> Result<Self> {
        let size = data.len() as vk::DeviceSize;

        let mut staging = Self::new(
            device.clone(),
            &format!("{} staging", name),
            size,
            1,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            1,
        )?;
        staging.write_to_buffer(data)?;

        let buffer = Self::new(
            device.clone(),
            name,
            size,
            1,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            1,
        )?;

        device.copy_buffer(staging.buffer, buffer.buffer, size)?;
        Ok(buffer)
    }

    fn mapped(&mut self) -> Result<&mut [u8]> {
        self.allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer is not host visible")
    }

    /// Copy `data` to the start of the buffer.
    pub fn write_to_buffer(&mut self, data: &[u8]) -> Result<()> {
        self.write_at(data, 0)
    }

    /// Copy `data` into the aligned slot for instance `index`.
    pub fn write_to_index(&mut self, data: &[u8], index: u32) -> Result<()> {
        anyhow::ensure!(
            index < self.instance_count,
            "Instance {} out of range ({} instances)",
            index,
            self.instance_count
        );
        anyhow::ensure!(
            data.len() as vk::DeviceSize <= self.instance_size,
            "{} bytes do not fit an instance of {} bytes",
            data.len(),
            self.instance_size
        );
        self.write_at(data, index as vk::DeviceSize * self.alignment_size)
    }

    fn write_at(&mut self, data: &[u8], offset: vk::DeviceSize) -> Result<()> {
        let end = offset + data.len() as vk::DeviceSize;
        anyhow::ensure!(
            end <= self.buffer_size,
            "Write of {} bytes at {} overruns buffer of {} bytes",
            data.len(),
            offset,
            self.buffer_size
        );
        let mapped = self.mapped()?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    pub fn descriptor_info_for_index(&self, index: u32) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: index as vk::DeviceSize * self.alignment_size,
            range: self.alignment_size,
        }
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.buffer_size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_size_rounds_up() {
        assert_eq!(aligned_size(80, 64), 128);
        assert_eq!(aligned_size(64, 64), 64);
        assert_eq!(aligned_size(1, 256), 256);
    }

    #[test]
    fn test_aligned_size_without_requirement() {
        assert_eq!(aligned_size(44, 0), 44);
        assert_eq!(aligned_size(44, 1), 44);
    }
}
