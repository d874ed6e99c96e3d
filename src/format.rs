/// Texel format.
/// Textures can have different texel formats.
/// Some of which are color or depth and/or stencil.
/// Format defines components, number of bits, layout and representation of
/// texels, or of 4x4 texel blocks for block-compressed formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8Unorm,
    R8Snorm,
    R8Uint,
    R8Sint,
    R16Unorm,
    R16Snorm,
    R16Uint,
    R16Sint,
    R16Sfloat,
    R32Uint,
    R32Sint,
    R32Sfloat,
    RG8Unorm,
    RG8Snorm,
    RG8Uint,
    RG8Sint,
    RG16Unorm,
    RG16Snorm,
    RG16Uint,
    RG16Sint,
    RG16Sfloat,
    RG32Uint,
    RG32Sint,
    RG32Sfloat,
    RGBA8Unorm,
    RGBA8Snorm,
    RGBA8Uint,
    RGBA8Sint,
    RGBA8Srgb,
    BGRA8Unorm,
    BGRA8Srgb,
    RGBA16Unorm,
    RGBA16Snorm,
    RGBA16Uint,
    RGBA16Sint,
    RGBA16Sfloat,
    RGBA32Uint,
    RGBA32Sint,
    RGBA32Sfloat,
    A2BGR10Unorm,
    A2BGR10Uint,
    B10GR11Ufloat,
    D16Unorm,
    D32Sfloat,
    D24UnormS8Uint,
    D32SfloatS8Uint,
    BC1RgbUnorm,
    BC1RgbSrgb,
    BC1RgbaUnorm,
    BC1RgbaSrgb,
    BC2Unorm,
    BC2Srgb,
    BC3Unorm,
    BC3Srgb,
    BC4Unorm,
    BC4Snorm,
    BC5Unorm,
    BC5Snorm,
    BC7Unorm,
    BC7Srgb,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Uint,
    Sint,
    Srgb,
    Unorm,
    Snorm,
    Sfloat,
    Ufloat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channels {
    R,
    RG,
    RGB,
    RGBA,
    BGRA,
    D,
    DS,
}

/// Layout of a format: its channels, bits per channel and representation.
///
/// For packed formats `bits` is the width of the widest channel.
/// For block-compressed formats `bits` is the number of bits per texel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FormatDescription {
    pub channels: Channels,
    pub bits: u32,
    pub ty: Type,
}

bitflags::bitflags! {
    /// Image aspects. Bits match native aspect mask.
    pub struct AspectFlags: u32 {
        const COLOR = 0x1;
        const DEPTH = 0x2;
        const STENCIL = 0x4;
    }
}

/// Edge of the texel block for block-compressed formats.
pub const COMPRESSED_BLOCK_SIZE: u32 = 4;

impl PixelFormat {
    pub fn aspect_flags(&self) -> AspectFlags {
        let mut flags = AspectFlags::empty();

        if self.is_color() {
            flags |= AspectFlags::COLOR;
        }

        if self.is_depth() {
            flags |= AspectFlags::DEPTH;
        }

        if self.is_stencil() {
            flags |= AspectFlags::STENCIL;
        }

        flags
    }

    pub fn is_color(&self) -> bool {
        !self.is_depth()
    }

    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            Self::D16Unorm | Self::D32Sfloat | Self::D24UnormS8Uint | Self::D32SfloatS8Uint
        )
    }

    pub fn is_stencil(&self) -> bool {
        matches!(self, Self::D24UnormS8Uint | Self::D32SfloatS8Uint)
    }

    pub fn is_compressed(&self) -> bool {
        matches!(
            self,
            Self::BC1RgbUnorm
                | Self::BC1RgbSrgb
                | Self::BC1RgbaUnorm
                | Self::BC1RgbaSrgb
                | Self::BC2Unorm
                | Self::BC2Srgb
                | Self::BC3Unorm
                | Self::BC3Srgb
                | Self::BC4Unorm
                | Self::BC4Snorm
                | Self::BC5Unorm
                | Self::BC5Snorm
                | Self::BC7Unorm
                | Self::BC7Srgb
        )
    }

    pub fn is_srgb(&self) -> bool {
        self.description().ty == Type::Srgb
    }

    /// Edge of the texel block. 1 for uncompressed formats.
    pub fn block_size(&self) -> u32 {
        if self.is_compressed() {
            COMPRESSED_BLOCK_SIZE
        } else {
            1
        }
    }

    /// Size in bytes of one texel, or of one block for block-compressed formats.
    pub fn size_in_bytes(&self) -> u32 {
        match self {
            Self::BC1RgbUnorm
            | Self::BC1RgbSrgb
            | Self::BC1RgbaUnorm
            | Self::BC1RgbaSrgb
            | Self::BC4Unorm
            | Self::BC4Snorm => 8,
            Self::BC2Unorm
            | Self::BC2Srgb
            | Self::BC3Unorm
            | Self::BC3Srgb
            | Self::BC5Unorm
            | Self::BC5Snorm
            | Self::BC7Unorm
            | Self::BC7Srgb => 16,
            Self::A2BGR10Unorm | Self::A2BGR10Uint | Self::B10GR11Ufloat => 4,
            Self::D24UnormS8Uint => 4,
            Self::D32SfloatS8Uint => 8,
            _ => {
                let desc = self.description();
                let channels = match desc.channels {
                    Channels::R | Channels::D | Channels::DS => 1,
                    Channels::RG => 2,
                    Channels::RGB => 3,
                    Channels::RGBA | Channels::BGRA => 4,
                };
                channels * desc.bits / 8
            }
        }
    }

    /// Bytes between rows of texels (or of blocks) for an image `width` texels wide.
    pub fn row_pitch(&self, width: u32) -> u32 {
        let block = self.block_size();
        let blocks = (width + block - 1) / block;
        blocks * self.size_in_bytes()
    }

    /// Number of rows of texels (or of blocks) for an image `height` texels tall.
    pub fn num_rows(&self, height: u32) -> u32 {
        let block = self.block_size();
        (height + block - 1) / block
    }

    /// Bytes between depth slices.
    pub fn depth_pitch(&self, row_pitch: u32, height: u32) -> u32 {
        row_pitch * self.num_rows(height)
    }

    /// Tightly packed size of a region in bytes.
    pub fn region_size(&self, width: u32, height: u32, depth: u32) -> u64 {
        let row_pitch = self.row_pitch(width);
        u64::from(self.depth_pitch(row_pitch, height)) * u64::from(depth)
    }

    pub fn description(&self) -> FormatDescription {
        use self::{Channels::*, Type::*};

        let (channels, bits, ty) = match self {
            Self::R8Unorm => (R, 8, Unorm),
            Self::R8Snorm => (R, 8, Snorm),
            Self::R8Uint => (R, 8, Uint),
            Self::R8Sint => (R, 8, Sint),
            Self::R16Unorm => (R, 16, Unorm),
            Self::R16Snorm => (R, 16, Snorm),
            Self::R16Uint => (R, 16, Uint),
            Self::R16Sint => (R, 16, Sint),
            Self::R16Sfloat => (R, 16, Sfloat),
            Self::R32Uint => (R, 32, Uint),
            Self::R32Sint => (R, 32, Sint),
            Self::R32Sfloat => (R, 32, Sfloat),
            Self::RG8Unorm => (RG, 8, Unorm),
            Self::RG8Snorm => (RG, 8, Snorm),
            Self::RG8Uint => (RG, 8, Uint),
            Self::RG8Sint => (RG, 8, Sint),
            Self::RG16Unorm => (RG, 16, Unorm),
            Self::RG16Snorm => (RG, 16, Snorm),
            Self::RG16Uint => (RG, 16, Uint),
            Self::RG16Sint => (RG, 16, Sint),
            Self::RG16Sfloat => (RG, 16, Sfloat),
            Self::RG32Uint => (RG, 32, Uint),
            Self::RG32Sint => (RG, 32, Sint),
            Self::RG32Sfloat => (RG, 32, Sfloat),
            Self::RGBA8Unorm => (RGBA, 8, Unorm),
            Self::RGBA8Snorm => (RGBA, 8, Snorm),
            Self::RGBA8Uint => (RGBA, 8, Uint),
            Self::RGBA8Sint => (RGBA, 8, Sint),
            Self::RGBA8Srgb => (RGBA, 8, Srgb),
            Self::BGRA8Unorm => (BGRA, 8, Unorm),
            Self::BGRA8Srgb => (BGRA, 8, Srgb),
            Self::RGBA16Unorm => (RGBA, 16, Unorm),
            Self::RGBA16Snorm => (RGBA, 16, Snorm),
            Self::RGBA16Uint => (RGBA, 16, Uint),
            Self::RGBA16Sint => (RGBA, 16, Sint),
            Self::RGBA16Sfloat => (RGBA, 16, Sfloat),
            Self::RGBA32Uint => (RGBA, 32, Uint),
            Self::RGBA32Sint => (RGBA, 32, Sint),
            Self::RGBA32Sfloat => (RGBA, 32, Sfloat),
            Self::A2BGR10Unorm => (RGBA, 10, Unorm),
            Self::A2BGR10Uint => (RGBA, 10, Uint),
            Self::B10GR11Ufloat => (RGB, 11, Ufloat),
            Self::D16Unorm => (D, 16, Unorm),
            Self::D32Sfloat => (D, 32, Sfloat),
            Self::D24UnormS8Uint => (DS, 24, Unorm),
            Self::D32SfloatS8Uint => (DS, 32, Sfloat),
            Self::BC1RgbUnorm => (RGB, 4, Unorm),
            Self::BC1RgbSrgb => (RGB, 4, Srgb),
            Self::BC1RgbaUnorm => (RGBA, 4, Unorm),
            Self::BC1RgbaSrgb => (RGBA, 4, Srgb),
            Self::BC2Unorm => (RGBA, 8, Unorm),
            Self::BC2Srgb => (RGBA, 8, Srgb),
            Self::BC3Unorm => (RGBA, 8, Unorm),
            Self::BC3Srgb => (RGBA, 8, Srgb),
            Self::BC4Unorm => (R, 4, Unorm),
            Self::BC4Snorm => (R, 4, Snorm),
            Self::BC5Unorm => (RG, 8, Unorm),
            Self::BC5Snorm => (RG, 8, Snorm),
            Self::BC7Unorm => (RGBA, 8, Unorm),
            Self::BC7Srgb => (RGBA, 8, Srgb),
        };

        FormatDescription { channels, bits, ty }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_stencil_aspects() {
        assert_eq!(
            PixelFormat::D24UnormS8Uint.aspect_flags(),
            AspectFlags::DEPTH | AspectFlags::STENCIL
        );
        assert_eq!(PixelFormat::D32Sfloat.aspect_flags(), AspectFlags::DEPTH);
        assert_eq!(PixelFormat::RGBA8Unorm.aspect_flags(), AspectFlags::COLOR);
    }

    #[test]
    fn uncompressed_pitches() {
        let format = PixelFormat::RGBA8Unorm;
        assert_eq!(format.size_in_bytes(), 4);
        assert_eq!(format.row_pitch(10), 40);
        assert_eq!(format.depth_pitch(40, 3), 120);
        assert_eq!(format.region_size(10, 3, 2), 240);
    }

    #[test]
    fn compressed_pitches_round_up_to_blocks() {
        let format = PixelFormat::BC1RgbaUnorm;
        assert!(format.is_compressed());
        assert_eq!(format.block_size(), 4);
        // 5 texels wide is two blocks of 8 bytes.
        assert_eq!(format.row_pitch(5), 16);
        assert_eq!(format.num_rows(5), 2);
        assert_eq!(format.region_size(5, 5, 1), 32);
        assert_eq!(PixelFormat::BC7Unorm.row_pitch(4), 16);
    }

    #[test]
    fn packed_sizes() {
        assert_eq!(PixelFormat::RGBA32Sfloat.size_in_bytes(), 16);
        assert_eq!(PixelFormat::B10GR11Ufloat.size_in_bytes(), 4);
        assert_eq!(PixelFormat::D32SfloatS8Uint.size_in_bytes(), 8);
        assert_eq!(PixelFormat::R16Sfloat.size_in_bytes(), 2);
        assert!(PixelFormat::BGRA8Srgb.is_srgb());
    }
}
