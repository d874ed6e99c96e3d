use smallvec::SmallVec;

use crate::{
    buffer::{write_host_memory, Buffer, BufferUsage},
    dimensions::{Extent3, Offset3},
    format::AspectFlags,
    native::{
        self, AccessFlags, BufferCopy, BufferImageCopy, Driver, ImageBlit, ImageCopy,
        ImageLayout, ImageResolve, ImageSubresourceLayers, MemoryBarrier, PipelineStageFlags,
    },
    texture::{Texture, TextureSampleCount, TextureShared, TextureUsage},
    Error,
};

use super::CommandList;

/// Texel position inside one subresource of a texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureLocation {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub mip_level: u32,
    pub array_layer: u32,
}

impl TextureLocation {
    pub const fn mip(mip_level: u32) -> Self {
        TextureLocation {
            x: 0,
            y: 0,
            z: 0,
            mip_level,
            array_layer: 0,
        }
    }

    fn offset(&self) -> Offset3 {
        Offset3::new(self.x as i32, self.y as i32, self.z as i32)
    }
}

/// Region copied between two textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureCopyRegion {
    pub src: TextureLocation,
    pub dst: TextureLocation,
    pub extent: Extent3,
    pub layer_count: u32,
}

impl TextureCopyRegion {
    /// Whole mip level of every layer.
    pub fn whole_mip(texture: &Texture, mip_level: u32) -> Self {
        TextureCopyRegion {
            src: TextureLocation::mip(mip_level),
            dst: TextureLocation::mip(mip_level),
            extent: texture.extent().mip_level(mip_level),
            layer_count: texture.shared().actual_array_layers(),
        }
    }
}

pub(crate) fn check_location(
    texture: &TextureShared,
    location: &TextureLocation,
    extent: Extent3,
    layer_count: u32,
    what: &str,
) -> Result<(), Error> {
    let info = texture.info();
    if location.mip_level >= info.mip_levels
        || location.array_layer + layer_count > texture.actual_array_layers()
    {
        return Err(Error::invalid(format!(
            "Copy {} subresource mip {} layers {}..{} is out of texture bounds",
            what,
            location.mip_level,
            location.array_layer,
            location.array_layer + layer_count
        )));
    }

    let mip = texture.mip_extent(location.mip_level);
    if location.x + extent.width > mip.width
        || location.y + extent.height > mip.height
        || location.z + extent.depth > mip.depth
    {
        return Err(Error::invalid(format!(
            "Copy {} region {:?} at ({}, {}, {}) exceeds mip extent {:?}",
            what, extent, location.x, location.y, location.z, mip
        )));
    }
    Ok(())
}

/// Aspect used for image/buffer copies. Depth-stencil images copy depth only.
fn copy_aspect(texture: &TextureShared) -> AspectFlags {
    if texture.info().usage.contains(TextureUsage::DEPTH_STENCIL) {
        AspectFlags::DEPTH
    } else {
        AspectFlags::COLOR
    }
}

fn is_sampled(texture: &TextureShared) -> bool {
    texture.info().usage.contains(TextureUsage::SAMPLED)
}

/// Records a copy between two textures of any kind.
///
/// Optimal images are moved to transfer layouts for the copy
/// and back to shader-read-only afterwards when they are sampled.
/// Staging textures are addressed through their subresource layouts.
pub(crate) fn record_texture_copy(
    driver: &dyn Driver,
    cb: native::CommandBuffer,
    src: &TextureShared,
    dst: &TextureShared,
    region: &TextureCopyRegion,
) {
    let TextureCopyRegion {
        src: from,
        dst: to,
        extent,
        layer_count,
    } = *region;

    match (src.is_staging(), dst.is_staging()) {
        (false, false) => {
            src.transition_image_layout(
                cb,
                from.mip_level,
                1,
                from.array_layer,
                layer_count,
                ImageLayout::TransferSrcOptimal,
            );
            dst.transition_image_layout(
                cb,
                to.mip_level,
                1,
                to.array_layer,
                layer_count,
                ImageLayout::TransferDstOptimal,
            );

            driver.cmd_copy_image(
                cb,
                src.image(),
                ImageLayout::TransferSrcOptimal,
                dst.image(),
                ImageLayout::TransferDstOptimal,
                &[ImageCopy {
                    src_subresource: ImageSubresourceLayers {
                        aspect: AspectFlags::COLOR,
                        mip_level: from.mip_level,
                        base_array_layer: from.array_layer,
                        layer_count,
                    },
                    src_offset: from.offset(),
                    dst_subresource: ImageSubresourceLayers {
                        aspect: AspectFlags::COLOR,
                        mip_level: to.mip_level,
                        base_array_layer: to.array_layer,
                        layer_count,
                    },
                    dst_offset: to.offset(),
                    extent,
                }],
            );

            if is_sampled(src) {
                src.transition_image_layout(
                    cb,
                    from.mip_level,
                    1,
                    from.array_layer,
                    layer_count,
                    ImageLayout::ShaderReadOnlyOptimal,
                );
            }
            if is_sampled(dst) {
                dst.transition_image_layout(
                    cb,
                    to.mip_level,
                    1,
                    to.array_layer,
                    layer_count,
                    ImageLayout::ShaderReadOnlyOptimal,
                );
            }
        }
        (true, false) => {
            let src_layout = src.subresource_layout(from.mip_level, from.array_layer);
            dst.transition_image_layout(
                cb,
                to.mip_level,
                1,
                to.array_layer,
                layer_count,
                ImageLayout::TransferDstOptimal,
            );

            let format = src.format();
            let mip = src.mip_extent(from.mip_level);
            let block_size = format.block_size();
            let row_length = mip.width.max(block_size);
            let image_height = mip.height.max(block_size);
            let row_pitch = format.row_pitch(row_length);
            let depth_pitch = format.depth_pitch(row_pitch, image_height);

            let buffer_offset = src_layout.offset
                + u64::from(from.z) * u64::from(depth_pitch)
                + u64::from(from.y / block_size) * u64::from(row_pitch)
                + u64::from(from.x / block_size) * u64::from(format.size_in_bytes());

            driver.cmd_copy_buffer_to_image(
                cb,
                src.staging_buffer(),
                dst.image(),
                ImageLayout::TransferDstOptimal,
                &[BufferImageCopy {
                    buffer_offset,
                    buffer_row_length: row_length,
                    buffer_image_height: image_height,
                    image_subresource: ImageSubresourceLayers {
                        aspect: copy_aspect(dst),
                        mip_level: to.mip_level,
                        base_array_layer: to.array_layer,
                        layer_count,
                    },
                    image_offset: to.offset(),
                    image_extent: Extent3::new(
                        extent.width.min(mip.width),
                        extent.height.min(mip.height),
                        extent.depth,
                    ),
                }],
            );

            if is_sampled(dst) {
                dst.transition_image_layout(
                    cb,
                    to.mip_level,
                    1,
                    to.array_layer,
                    layer_count,
                    ImageLayout::ShaderReadOnlyOptimal,
                );
            }
        }
        (false, true) => {
            src.transition_image_layout(
                cb,
                from.mip_level,
                1,
                from.array_layer,
                layer_count,
                ImageLayout::TransferSrcOptimal,
            );

            let format = dst.format();
            let mip = dst.mip_extent(to.mip_level);
            let block_size = src.format().block_size();
            let row_length = mip.width.max(block_size);
            let image_height = mip.height.max(block_size);
            let row_pitch = format.row_pitch(row_length);
            let depth_pitch = format.depth_pitch(row_pitch, image_height);
            let aspect = copy_aspect(src);

            let regions: SmallVec<[BufferImageCopy; 6]> = (0..layer_count)
                .map(|layer| {
                    let dst_layout = dst.subresource_layout(to.mip_level, to.array_layer + layer);
                    BufferImageCopy {
                        buffer_offset: dst_layout.offset
                            + u64::from(to.z) * u64::from(depth_pitch)
                            + u64::from(to.y / block_size) * u64::from(row_pitch)
                            + u64::from(to.x / block_size) * u64::from(format.size_in_bytes()),
                        buffer_row_length: row_length,
                        buffer_image_height: image_height,
                        image_subresource: ImageSubresourceLayers {
                            aspect,
                            mip_level: from.mip_level,
                            base_array_layer: from.array_layer + layer,
                            layer_count: 1,
                        },
                        image_offset: from.offset(),
                        image_extent: extent,
                    }
                })
                .collect();

            driver.cmd_copy_image_to_buffer(
                cb,
                src.image(),
                ImageLayout::TransferSrcOptimal,
                dst.staging_buffer(),
                &regions,
            );

            if is_sampled(src) {
                src.transition_image_layout(
                    cb,
                    from.mip_level,
                    1,
                    from.array_layer,
                    layer_count,
                    ImageLayout::ShaderReadOnlyOptimal,
                );
            }
        }
        (true, true) => {
            let src_layout = src.subresource_layout(from.mip_level, from.array_layer);
            let dst_layout = dst.subresource_layout(to.mip_level, to.array_layer);
            let format = src.format();

            // Layers of a staging texture are addressed as depth slices.
            let z_limit = extent.depth.max(layer_count);
            let block_size = format.block_size();
            let element_size = u64::from(format.size_in_bytes());
            let row_size = u64::from(format.row_pitch(extent.width));
            let rows = format.num_rows(extent.height);

            let mut regions: SmallVec<[BufferCopy; 16]> = SmallVec::new();
            for zz in 0..z_limit {
                for row in 0..rows {
                    regions.push(BufferCopy {
                        src_offset: src_layout.offset
                            + src_layout.depth_pitch * u64::from(zz + from.z)
                            + src_layout.row_pitch * u64::from(row + from.y / block_size)
                            + element_size * u64::from(from.x / block_size),
                        dst_offset: dst_layout.offset
                            + dst_layout.depth_pitch * u64::from(zz + to.z)
                            + dst_layout.row_pitch * u64::from(row + to.y / block_size)
                            + element_size * u64::from(to.x / block_size),
                        size: row_size,
                    });
                }
            }

            driver.cmd_copy_buffer(cb, src.staging_buffer(), dst.staging_buffer(), &regions);
        }
    }
}

impl CommandList {
    /// Copies `data` into `buffer` at `offset` through a staging buffer owned by this list.
    pub fn update_buffer(&mut self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<(), Error> {
        self.check_recording()?;
        if data.is_empty() {
            return Ok(());
        }
        check_buffer_range(buffer, offset, data.len() as u64, "Update")?;

        let size = data.len() as u64;
        let staging = self.take_staging_buffer(size)?;
        if let Err(err) = write_host_memory(&*self.shared.driver, staging.memory(), 0, data) {
            self.shared.return_staging_buffer(staging);
            return Err(err);
        }

        self.ensure_no_render_pass();
        self.record_buffer_copy(&staging, 0, buffer, offset, size);
        if let Some(info) = &mut self.staging {
            info.buffers_used.push(staging);
        }
        Ok(())
    }

    pub fn copy_buffer(
        &mut self,
        src: &Buffer,
        src_offset: u64,
        dst: &Buffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), Error> {
        self.check_recording()?;
        check_buffer_range(src, src_offset, size, "Source")?;
        check_buffer_range(dst, dst_offset, size, "Destination")?;
        if size == 0 {
            return Ok(());
        }

        self.ensure_no_render_pass();
        self.record_buffer_copy(src, src_offset, dst, dst_offset, size);
        Ok(())
    }

    fn record_buffer_copy(
        &mut self,
        src: &Buffer,
        src_offset: u64,
        dst: &Buffer,
        dst_offset: u64,
        size: u64,
    ) {
        self.capture(src.ref_count());
        self.capture(dst.ref_count());

        let driver = &self.shared.driver;
        driver.cmd_copy_buffer(
            self.cb,
            src.handle(),
            dst.handle(),
            &[BufferCopy {
                src_offset,
                dst_offset,
                size,
            }],
        );

        let (dst_access, dst_stages) = if dst.usage().contains(BufferUsage::UNIFORM) {
            (
                AccessFlags::UNIFORM_READ,
                PipelineStageFlags::VERTEX_SHADER
                    | PipelineStageFlags::COMPUTE_SHADER
                    | PipelineStageFlags::FRAGMENT_SHADER
                    | PipelineStageFlags::GEOMETRY_SHADER
                    | PipelineStageFlags::TESSELLATION_CONTROL_SHADER
                    | PipelineStageFlags::TESSELLATION_EVALUATION_SHADER,
            )
        } else {
            (
                AccessFlags::VERTEX_ATTRIBUTE_READ,
                PipelineStageFlags::VERTEX_INPUT,
            )
        };

        driver.cmd_pipeline_barrier(
            self.cb,
            PipelineStageFlags::TRANSFER,
            dst_stages,
            &[MemoryBarrier {
                src_access: AccessFlags::TRANSFER_WRITE,
                dst_access,
            }],
            &[],
        );
    }

    /// Copies a region between two textures.
    /// Either side may be a staging texture.
    pub fn copy_texture(
        &mut self,
        src: &Texture,
        dst: &Texture,
        region: &TextureCopyRegion,
    ) -> Result<(), Error> {
        self.check_recording()?;
        check_location(src.shared(), &region.src, region.extent, region.layer_count, "source")?;
        check_location(dst.shared(), &region.dst, region.extent, region.layer_count, "destination")?;

        self.ensure_no_render_pass();
        record_texture_copy(
            &*self.shared.driver,
            self.cb,
            src.shared(),
            dst.shared(),
            region,
        );
        self.capture(src.ref_count());
        self.capture(dst.ref_count());
        Ok(())
    }

    /// Copies every mip level and layer of `src` into `dst`.
    pub fn copy_texture_all(&mut self, src: &Texture, dst: &Texture) -> Result<(), Error> {
        self.check_recording()?;
        if src.mip_levels() != dst.mip_levels()
            || src.shared().actual_array_layers() != dst.shared().actual_array_layers()
        {
            return Err(Error::invalid(
                "Textures copied whole must have equal mip level and array layer counts",
            ));
        }

        for level in 0..src.mip_levels() {
            self.copy_texture(src, dst, &TextureCopyRegion::whole_mip(src, level))?;
        }
        Ok(())
    }

    /// Fills mip levels `1..` by successive blits from the level above.
    pub fn generate_mipmaps(&mut self, texture: &Texture) -> Result<(), Error> {
        self.check_recording()?;
        if !texture.usage().contains(TextureUsage::GENERATE_MIPMAPS) {
            return Err(Error::invalid(
                "`generate_mipmaps` requires a texture created with `TextureUsage::GENERATE_MIPMAPS`",
            ));
        }

        self.ensure_no_render_pass();
        self.capture(texture.ref_count());

        let shared = texture.shared();
        let layer_count = shared.actual_array_layers();
        let mip_levels = shared.info().mip_levels;
        let filter = self.filters.filter(shared.format());
        let driver = &self.shared.driver;

        let mut extent = shared.extent();
        for level in 1..mip_levels {
            shared.transition_image_layout_nonmatching(
                self.cb,
                level - 1,
                1,
                0,
                layer_count,
                ImageLayout::TransferSrcOptimal,
            );
            shared.transition_image_layout_nonmatching(
                self.cb,
                level,
                1,
                0,
                layer_count,
                ImageLayout::TransferDstOptimal,
            );

            let mip = extent.mip_level(1);
            driver.cmd_blit_image(
                self.cb,
                shared.image(),
                ImageLayout::TransferSrcOptimal,
                shared.image(),
                ImageLayout::TransferDstOptimal,
                &[ImageBlit {
                    src_subresource: ImageSubresourceLayers {
                        aspect: AspectFlags::COLOR,
                        mip_level: level - 1,
                        base_array_layer: 0,
                        layer_count,
                    },
                    src_offsets: [
                        Offset3::ZERO,
                        Offset3::new(extent.width as i32, extent.height as i32, extent.depth as i32),
                    ],
                    dst_subresource: ImageSubresourceLayers {
                        aspect: AspectFlags::COLOR,
                        mip_level: level,
                        base_array_layer: 0,
                        layer_count,
                    },
                    dst_offsets: [
                        Offset3::ZERO,
                        Offset3::new(mip.width as i32, mip.height as i32, mip.depth as i32),
                    ],
                }],
                filter,
            );

            extent = mip;
        }

        if texture.usage().contains(TextureUsage::SAMPLED) {
            shared.transition_image_layout_nonmatching(
                self.cb,
                0,
                mip_levels,
                0,
                layer_count,
                ImageLayout::ShaderReadOnlyOptimal,
            );
        }
        Ok(())
    }

    /// Resolves multisampled `src` into single-sampled `dst`.
    pub fn resolve_texture(&mut self, src: &Texture, dst: &Texture) -> Result<(), Error> {
        self.check_recording()?;
        if src.info().samples == TextureSampleCount::Count1 {
            return Err(Error::invalid("Resolve source must be multisampled"));
        }
        if dst.info().samples != TextureSampleCount::Count1 {
            return Err(Error::invalid("Resolve destination must not be multisampled"));
        }

        self.ensure_no_render_pass();
        self.capture(src.ref_count());
        self.capture(dst.ref_count());

        let aspect = if src.usage().contains(TextureUsage::DEPTH_STENCIL) {
            AspectFlags::DEPTH | AspectFlags::STENCIL
        } else {
            AspectFlags::COLOR
        };
        let subresource = ImageSubresourceLayers {
            aspect,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };

        let (src, dst) = (src.shared(), dst.shared());
        src.transition_image_layout(self.cb, 0, 1, 0, 1, ImageLayout::TransferSrcOptimal);
        dst.transition_image_layout(self.cb, 0, 1, 0, 1, ImageLayout::TransferDstOptimal);

        self.shared.driver.cmd_resolve_image(
            self.cb,
            src.image(),
            ImageLayout::TransferSrcOptimal,
            dst.image(),
            ImageLayout::TransferDstOptimal,
            &[ImageResolve {
                src_subresource: subresource,
                src_offset: Offset3::ZERO,
                dst_subresource: subresource,
                dst_offset: Offset3::ZERO,
                extent: src.extent(),
            }],
        );

        if is_sampled(dst) {
            dst.transition_image_layout(self.cb, 0, 1, 0, 1, ImageLayout::ShaderReadOnlyOptimal);
        }
        Ok(())
    }
}

fn check_buffer_range(buffer: &Buffer, offset: u64, size: u64, what: &str) -> Result<(), Error> {
    if offset + size > buffer.size() {
        return Err(Error::invalid(format!(
            "{} range {}+{} exceeds buffer size {}",
            what,
            offset,
            size,
            buffer.size()
        )));
    }
    Ok(())
}
