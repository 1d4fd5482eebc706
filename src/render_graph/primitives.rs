//! Geometry used by the sky and probe passes

/// Vertices in the skybox buffer
pub const SKYBOX_VERTEX_COUNT: u32 = 36;

const CORNERS: [[f32; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

// Two triangles per face, wound to face the inside of the cube
const FACES: [[usize; 6]; 6] = [
    [3, 0, 1, 1, 2, 3], // -z
    [4, 0, 3, 3, 7, 4], // -x
    [1, 5, 6, 6, 2, 1], // +x
    [4, 7, 6, 6, 5, 4], // +z
    [3, 2, 6, 6, 7, 3], // +y
    [0, 4, 1, 1, 4, 5], // -y
];

/// Position-only unit cube drawn as a non-indexed triangle list
pub fn skybox_vertices() -> Vec<[f32; 3]> {
    FACES.iter().flatten().map(|&corner| CORNERS[corner]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skybox_is_unit_cube() {
        let vertices = skybox_vertices();
        assert_eq!(vertices.len() as u32, SKYBOX_VERTEX_COUNT);
        assert!(vertices.iter().flatten().all(|c| c.abs() == 1.0));
        assert_eq!(vertices[0], [-1.0, 1.0, -1.0]);
    }
}
