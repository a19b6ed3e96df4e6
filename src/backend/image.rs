// GPU images: depth attachments and sampled textures
//
// Memory comes from the device allocator; every image owns its view.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::path::Path;
use std::sync::Arc;

use super::buffer::Buffer;
use super::VulkanDevice;

/// 2D image with its memory and a default view
pub struct Image {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Image {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create image {}", name))?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation =
            match device.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { device.device.destroy_image(image, None) };
                    return Err(e);
                }
            };

        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };

        // From here on Drop releases whatever has been created
        let mut this = Self {
            image,
            view: vk::ImageView::null(),
            format,
            extent,
            allocation: Some(allocation),
            device,
        };

        unsafe { this.device.device.bind_image_memory(image, memory, offset) }
            .with_context(|| format!("Failed to bind memory for image {}", name))?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        this.view = unsafe { this.device.device.create_image_view(&view_info, None) }
            .with_context(|| format!("Failed to create view for image {}", name))?;

        Ok(this)
    }

    /// Depth attachment matching a swapchain extent
    pub fn depth(device: Arc<VulkanDevice>, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        Self::new(
            device,
            "depth",
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

/// Byte size of a tightly packed RGBA8 image, `None` if it overflows.
pub fn rgba8_size(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(4)
}

/// Sampled RGBA texture
pub struct Texture {
    pub image: Image,
    pub sampler: vk::Sampler,
}

impl Texture {
    const FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

    /// Decode an image file and upload it as an sRGB texture.
    pub fn from_file(device: Arc<VulkanDevice>, path: &Path) -> Result<Self> {
        let pixels = image::open(path)
            .with_context(|| format!("Failed to open texture {:?}", path))?
            .to_rgba8();
        let (width, height) = pixels.dimensions();
        log::info!("Loaded texture {:?} ({}x{})", path, width, height);
        Self::from_rgba8(device, width, height, pixels.as_raw())
    }

    /// 1x1 texture of a single color, used when no texture is configured.
    pub fn solid(device: Arc<VulkanDevice>, rgba: [u8; 4]) -> Result<Self> {
        let pixels = image::RgbaImage::from_pixel(1, 1, image::Rgba(rgba));
        Self::from_rgba8(device, 1, 1, pixels.as_raw())
    }

    fn from_rgba8(device: Arc<VulkanDevice>, width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
        let expected = rgba8_size(width, height)
            .with_context(|| format!("Texture of {}x{} is too large", width, height))?;
        anyhow::ensure!(
            pixels.len() == expected,
            "Texture data is {} bytes, expected {}",
            pixels.len(),
            expected
        );

        let mut staging = Buffer::new(
            device.clone(),
            "texture staging",
            pixels.len() as vk::DeviceSize,
            1,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            1,
        )?;
        staging.write_to_buffer(pixels)?;

        let image = Image::new(
            device.clone(),
            "texture",
            vk::Extent2D { width, height },
            Self::FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;

        device.transition_image_layout(
            image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        device.copy_buffer_to_image(staging.buffer, image.image, width, height)?;
        device.transition_image_layout(
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(device.properties.limits.max_sampler_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = unsafe { device.device.create_sampler(&sampler_info, None) }
            .context("Failed to create texture sampler")?;

        Ok(Self { image, sampler })
    }

    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.image.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.image.device.device.destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba8_size() {
        assert_eq!(rgba8_size(1, 1), Some(4));
        assert_eq!(rgba8_size(0, 512), Some(0));
        assert_eq!(rgba8_size(640, 480), Some(640 * 480 * 4));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_rgba8_size_beyond_u32() {
        // 32768 * 32768 * 4 does not fit in a u32
        assert_eq!(rgba8_size(32768, 32768), Some(1usize << 32));
        assert_eq!(rgba8_size(u32::MAX, u32::MAX), None);
    }
}
