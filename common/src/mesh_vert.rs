use glam::{Vec2, Vec3, Vec4};

pub const MAX_UVS: usize = 4;

/// Number of 32 bit words in a [`MeshVert`], used as an exact hash key.
pub const MESH_VERT_WORDS: usize = 18;

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, bincode::Decode, bincode::Encode, bytemuck::Pod, bytemuck::Zeroable,
)]
pub struct MeshVert {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
    pub uvs: [[f32; 2]; MAX_UVS],
}

impl Default for MeshVert {
    fn default() -> Self {
        Self {
            pos: [0.0; 3],
            normal: [0.0, 0.0, 1.0],
            color: [1.0; 4],
            uvs: [[0.0; 2]; MAX_UVS],
        }
    }
}

impl MeshVert {
    pub fn new(pos: Vec3, normal: Vec3) -> Self {
        Self {
            pos: pos.to_array(),
            normal: normal.to_array(),
            ..Default::default()
        }
    }

    pub fn with_uv(mut self, channel: usize, uv: Vec2) -> Self {
        self.uvs[channel] = uv.to_array();
        self
    }

    pub fn with_color(mut self, color: Vec4) -> Self {
        self.color = color.to_array();
        self
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.pos)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }

    pub fn color(&self) -> Vec4 {
        Vec4::from_array(self.color)
    }

    pub fn uv(&self, channel: usize) -> Vec2 {
        Vec2::from_array(self.uvs[channel])
    }

    /// Bitwise identity of the vertex. Two vertices with equal keys encode identically.
    pub fn key(&self) -> [u32; MESH_VERT_WORDS] {
        bytemuck::cast(*self)
    }

    /// Bitwise identity of the position alone.
    pub fn position_key(&self) -> [u32; 3] {
        bytemuck::cast(self.pos)
    }

    /// Color quantized to 8 bits per channel.
    pub fn color_bytes(&self) -> [u8; 4] {
        self.color
            .map(|c| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u8)
    }
}

/// Which optional attributes a mesh carries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, bincode::Decode, bincode::Encode)]
pub struct VertexFormat {
    pub num_uvs: u32,
    pub has_colors: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_distinguishes_attributes() {
        let a = MeshVert::new(Vec3::ONE, Vec3::Z);
        let b = a.with_uv(1, Vec2::new(0.5, 0.5));
        assert_eq!(a.position_key(), b.position_key());
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_color_bytes_round() {
        let v = MeshVert::default().with_color(Vec4::new(0.0, 0.5, 1.0, 2.0));
        assert_eq!(v.color_bytes(), [0, 128, 255, 255]);
    }
}
