// GPU buffers and memory
//
// Allocation is one VkDeviceMemory per buffer, sized from the driver's
// memory requirements. Device-local vertex data goes through a host-visible
// staging buffer and a one-shot transfer; the staging buffer is dropped as
// soon as the copy completes.

use ash::vk;
use std::sync::Arc;

use super::commands::Commands;
use super::device::Device;
use crate::error::RenderError;

/// Find a memory type index accepted by `type_filter` whose property flags
/// contain all of `properties`.
pub fn find_memory_type(
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
    memory: &vk::PhysicalDeviceMemoryProperties,
) -> Option<u32> {
    (0..memory.memory_type_count).find(|&i| {
        let allowed = type_filter & (1 << i) != 0;
        let flags = memory.memory_types[i as usize].property_flags;
        allowed && flags.contains(properties)
    })
}

pub struct Buffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    device: Arc<Device>,
}

impl Buffer {
    pub fn new(
        device: Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self, RenderError> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let alloc = device.alloc();
        let buffer = unsafe { device.raw().create_buffer(&create_info, alloc)? };
        let requirements = unsafe { device.raw().get_buffer_memory_requirements(buffer) };

        let memory_type = match find_memory_type(
            requirements.memory_type_bits,
            properties,
            &device.physical().memory_properties,
        ) {
            Some(index) => index,
            None => {
                unsafe { device.raw().destroy_buffer(buffer, alloc) };
                return Err(RenderError::NoDeviceMemory);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = unsafe {
            match device.raw().allocate_memory(&alloc_info, alloc) {
                Ok(memory) => memory,
                Err(e) => {
                    device.raw().destroy_buffer(buffer, alloc);
                    return Err(e.into());
                }
            }
        };

        if let Err(e) = unsafe { device.raw().bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.raw().destroy_buffer(buffer, alloc);
                device.raw().free_memory(memory, alloc);
            }
            return Err(e.into());
        }

        Ok(Self {
            buffer,
            memory,
            size,
            device,
        })
    }

    /// Host-visible, host-coherent buffer pre-filled with `data`.
    pub fn host_visible_with_data<T: bytemuck::Pod>(
        device: Arc<Device>,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self, RenderError> {
        let bytes = bytemuck::cast_slice(data);
        let buffer = Self::new(
            device,
            bytes.len() as vk::DeviceSize,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        buffer.write(bytes)?;
        Ok(buffer)
    }

    /// Device-local buffer filled via a staging copy. `usage` gains
    /// TRANSFER_DST so the one-shot copy can target it.
    pub fn device_local_with_data<T: bytemuck::Pod>(
        device: Arc<Device>,
        commands: &Commands,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self, RenderError> {
        let staging = Self::host_visible_with_data(
            device.clone(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            data,
        )?;

        let buffer = Self::new(
            device,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        commands.one_shot(|device, cmd| {
            let region = vk::BufferCopy::builder().size(staging.size).build();
            unsafe { device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]) };
        })?;

        Ok(buffer)
    }

    /// Map, copy `bytes` in, unmap. Requires host-visible memory.
    pub fn write(&self, bytes: &[u8]) -> Result<(), RenderError> {
        debug_assert!(bytes.len() as vk::DeviceSize <= self.size);
        unsafe {
            let ptr = self.device.raw().map_memory(
                self.memory,
                0,
                bytes.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            self.device.raw().unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Map and copy the buffer's contents out. Requires host-visible memory.
    pub fn read_back(&self) -> Result<Vec<u8>, RenderError> {
        let mut out = vec![0u8; self.size as usize];
        unsafe {
            let ptr = self.device.raw().map_memory(
                self.memory,
                0,
                self.size,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr(), out.len());
            self.device.raw().unmap_memory(self.memory);
        }
        Ok(out)
    }

    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .raw()
                .destroy_buffer(self.buffer, self.device.alloc());
            self.device.raw().free_memory(self.memory, self.device.alloc());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::instance::{AllocationHooks, Instance};

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = flags.len() as u32;
        for (i, &f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = f;
        }
        props
    }

    #[test]
    fn picks_first_type_with_required_flags() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let found = find_memory_type(
            0b111,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            &props,
        );
        assert_eq!(found, Some(1));
    }

    #[test]
    fn respects_type_filter_bits() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        // Type 0 has the right flags but is excluded by the filter.
        let found = find_memory_type(0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL, &props);
        assert_eq!(found, Some(1));
    }

    #[test]
    fn no_match_yields_none() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let found = find_memory_type(0b1, vk::MemoryPropertyFlags::HOST_VISIBLE, &props);
        assert_eq!(found, None);
    }

    #[test]
    #[ignore = "requires a Vulkan driver"]
    fn host_visible_upload_round_trips_bytes() {
        let instance = Instance::new("buffer-test", None, AllocationHooks::none()).unwrap();
        let device = Device::headless(instance).unwrap();

        let data: [u32; 4] = [0xDEAD_BEEF, 1, 2, 3];
        let buffer = Buffer::host_visible_with_data(
            device,
            vk::BufferUsageFlags::TRANSFER_SRC,
            &data,
        )
        .unwrap();

        assert_eq!(buffer.size(), 16);
        assert_eq!(buffer.read_back().unwrap(), bytemuck::cast_slice::<u32, u8>(&data));
    }
}
