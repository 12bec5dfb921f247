//! Cube geometry and camera.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use vkw_gpu::vk;

/// Position and color, both as `vec4`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 4],
    pub color: [f32; 4],
}

impl Vertex {
    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: std::mem::offset_of!(Self, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: std::mem::offset_of!(Self, color) as u32,
            },
        ]
    }
}

/// Corners of each face and its color; triangles are `p0 p1 p2` and `p2 p1 p3`.
const FACES: [([[f32; 3]; 4], [f32; 3]); 6] = [
    // red
    (
        [[-1.0, -1.0, 1.0], [-1.0, 1.0, 1.0], [1.0, -1.0, 1.0], [1.0, 1.0, 1.0]],
        [1.0, 0.0, 0.0],
    ),
    // green
    (
        [[-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [-1.0, 1.0, -1.0], [1.0, 1.0, -1.0]],
        [0.0, 1.0, 0.0],
    ),
    // blue
    (
        [[-1.0, 1.0, 1.0], [-1.0, -1.0, 1.0], [-1.0, 1.0, -1.0], [-1.0, -1.0, -1.0]],
        [0.0, 0.0, 1.0],
    ),
    // yellow
    (
        [[1.0, 1.0, 1.0], [1.0, 1.0, -1.0], [1.0, -1.0, 1.0], [1.0, -1.0, -1.0]],
        [1.0, 1.0, 0.0],
    ),
    // magenta
    (
        [[1.0, 1.0, 1.0], [-1.0, 1.0, 1.0], [1.0, 1.0, -1.0], [-1.0, 1.0, -1.0]],
        [1.0, 0.0, 1.0],
    ),
    // cyan
    (
        [[1.0, -1.0, 1.0], [1.0, -1.0, -1.0], [-1.0, -1.0, 1.0], [-1.0, -1.0, -1.0]],
        [0.0, 1.0, 1.0],
    ),
];

/// 36 vertices, one solid color per face.
pub fn colored_cube() -> Vec<Vertex> {
    FACES
        .iter()
        .flat_map(|(corners, [r, g, b])| {
            let [p0, p1, p2, p3] = *corners;
            [p0, p1, p2, p2, p1, p3].map(|[x, y, z]| Vertex {
                position: [x, y, z, 1.0],
                color: [*r, *g, *b, 1.0],
            })
        })
        .collect()
}

/// Model-view-projection matrix in Vulkan clip space (y down, depth 0..1).
pub fn model_view_projection(extent: vk::Extent2D) -> Mat4 {
    let mut fov = 45.0_f32.to_radians();
    if extent.width > extent.height {
        fov *= extent.height as f32 / extent.width as f32;
    }

    let model = Mat4::IDENTITY;
    let view = Mat4::look_at_rh(Vec3::new(-5.0, 3.0, -10.0), Vec3::ZERO, Vec3::NEG_Y);
    let projection = Mat4::perspective_rh(fov, 1.0, 0.1, 100.0);
    let clip = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0));

    clip * projection * view * model
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn cube_has_six_solid_faces() {
        let vertices = colored_cube();
        assert_eq!(vertices.len(), 36);
        for face in vertices.chunks(6) {
            assert!(face.iter().all(|v| v.color == face[0].color));
            assert!(face
                .iter()
                .all(|v| v.position[..3].iter().all(|c| c.abs() == 1.0)));
        }
    }

    #[test]
    fn vertex_layout_matches_shader_inputs() {
        assert_eq!(Vertex::binding().stride, 32);
        let offsets: Vec<_> = Vertex::attributes().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 16]);
    }

    #[test]
    fn origin_projects_inside_depth_range() {
        let mvp = model_view_projection(vk::Extent2D {
            width: 1280,
            height: 1024,
        });
        let clip = mvp * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let depth = clip.z / clip.w;
        assert!(clip.w > 0.0);
        assert!((0.0..=1.0).contains(&depth));
        assert!((clip.x / clip.w).abs() < 1e-5);
        assert!((clip.y / clip.w).abs() < 1e-5);
    }
}
