/// Image size is defined to `u32` which is standard for graphics API of today.
pub type ImageSize = u32;

/// Image offset is defined to `i32` which is standard for graphics API of today.
pub type ImageOffset = i32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Extent2 {
    pub width: ImageSize,
    pub height: ImageSize,
}

impl Extent2 {
    pub const fn new(width: ImageSize, height: ImageSize) -> Self {
        Extent2 { width, height }
    }

    pub const fn into_3d(self) -> Extent3 {
        Extent3 {
            width: self.width,
            height: self.height,
            depth: 1,
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Clamps each dimension into `[min, max]`.
    pub fn clamp(self, min: Extent2, max: Extent2) -> Self {
        Extent2 {
            width: self.width.max(min.width).min(max.width),
            height: self.height.max(min.height).min(max.height),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Extent3 {
    pub width: ImageSize,
    pub height: ImageSize,
    pub depth: ImageSize,
}

impl Extent3 {
    pub const fn new(width: ImageSize, height: ImageSize, depth: ImageSize) -> Self {
        Extent3 {
            width,
            height,
            depth,
        }
    }

    pub const fn into_2d(self) -> Extent2 {
        Extent2 {
            width: self.width,
            height: self.height,
        }
    }

    /// Returns extent of the given mip level.
    /// No dimension goes below 1.
    pub fn mip_level(self, level: u32) -> Self {
        Extent3 {
            width: mip_dimension(self.width, level),
            height: mip_dimension(self.height, level),
            depth: mip_dimension(self.depth, level),
        }
    }

    pub fn min(self, rhs: Self) -> Self {
        Extent3 {
            width: self.width.min(rhs.width),
            height: self.height.min(rhs.height),
            depth: self.depth.min(rhs.depth),
        }
    }
}

/// Size of a dimension at given mip level.
pub fn mip_dimension(largest: ImageSize, level: u32) -> ImageSize {
    (largest >> level.min(31)).max(1)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Offset3 {
    pub x: ImageOffset,
    pub y: ImageOffset,
    pub z: ImageOffset,
}

impl Offset3 {
    pub const ZERO: Self = Offset3 { x: 0, y: 0, z: 0 };

    pub const fn new(x: ImageOffset, y: ImageOffset, z: ImageOffset) -> Self {
        Offset3 { x, y, z }
    }
}

/// Integer rectangle used for scissors and render areas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Rect {
    pub x: ImageOffset,
    pub y: ImageOffset,
    pub width: ImageSize,
    pub height: ImageSize,
}

impl Rect {
    pub const fn new(x: ImageOffset, y: ImageOffset, width: ImageSize, height: ImageSize) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_extent(extent: Extent2) -> Self {
        Rect {
            x: 0,
            y: 0,
            width: extent.width,
            height: extent.height,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn from_extent(extent: Extent2) -> Self {
        Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// RGBA color with `f32` components.
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct RgbaFloat {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl RgbaFloat {
    pub const BLACK: Self = RgbaFloat::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = RgbaFloat::new(1.0, 1.0, 1.0, 1.0);
    pub const CLEAR: Self = RgbaFloat::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        RgbaFloat { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}
