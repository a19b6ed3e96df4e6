// Shader module loading
//
// Shaders are compiled to SPIR-V ahead of time (see build.rs) and read from
// disk at runtime so the pipeline can be rebuilt when they change.

use anyhow::{Context, Result};
use ash::vk;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use super::VulkanDevice;

/// Read a SPIR-V binary into aligned 32-bit words.
pub fn read_spirv<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let mut file =
        File::open(path).with_context(|| format!("Failed to open shader {:?}", path))?;
    parse_spirv(&mut file).with_context(|| format!("Invalid SPIR-V in {:?}", path))
}

/// Decode SPIR-V from any seekable reader. Handles either byte order and
/// rejects input that is not a whole number of words.
pub fn parse_spirv<R: Read + Seek>(reader: &mut R) -> Result<Vec<u32>> {
    Ok(ash::util::read_spv(reader)?)
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_parse_spirv_words() {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0000, 7, 42] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let words = parse_spirv(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000, 7, 42]);
    }

    #[test]
    fn test_parse_spirv_big_endian() {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 5] {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        let words = parse_spirv(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 5]);
    }

    #[test]
    fn test_parse_spirv_rejects_partial_word() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.push(0);
        assert!(parse_spirv(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_read_spirv_missing_file() {
        assert!(read_spirv("does/not/exist.spv").is_err());
    }
}
