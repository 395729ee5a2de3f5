//! Procedural scene: a grid of cubes and quads with per-instance materials.

use bytemuck::{Pod, Zeroable};
use uuid::Uuid;

use redlilium_framegraph::draw::{DrawMeshId, DrawRegistry, InstanceBufferId, InstanceRecord, MeshData, MeshProvider};
use redlilium_framegraph::{GraphicsError, StagingRing};

/// Cells per side of the grid.
pub const GRID_SIZE: usize = 5;
/// Distance between neighbouring cells.
pub const GRID_SPACING: f32 = 1.5;

pub const CUBE_MESH: Uuid = Uuid::from_u128(0x5eed_0001);
pub const QUAD_MESH: Uuid = Uuid::from_u128(0x5eed_0002);

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

/// Per-instance table entry read by the G-buffer pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GridInstance {
    /// xyz translation, w uniform scale.
    pub transform: [f32; 4],
    /// Metallic, roughness, then padding.
    pub material: [f32; 4],
}

static_assertions::const_assert_eq!(std::mem::size_of::<GridInstance>(), 32);

/// Builds the built-in meshes on request.
#[derive(Debug, Default)]
pub struct BuiltinMeshes;

impl MeshProvider for BuiltinMeshes {
    fn load_mesh(&self, uuid: Uuid) -> Option<MeshData> {
        match uuid {
            CUBE_MESH => Some(cube()),
            QUAD_MESH => Some(quad()),
            _ => None,
        }
    }
}

fn cube() -> MeshData {
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u16;
        for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let position = std::array::from_fn(|i| normal[i] * 0.5 + u[i] * su + v[i] * sv);
            vertices.push(Vertex { position, normal });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    MeshData::with_u16_indices(&vertices, &indices)
}

fn quad() -> MeshData {
    let normal = [0.0, 1.0, 0.0];
    let vertices = [
        Vertex { position: [-0.5, 0.0, -0.5], normal },
        Vertex { position: [0.5, 0.0, -0.5], normal },
        Vertex { position: [0.5, 0.0, 0.5], normal },
        Vertex { position: [-0.5, 0.0, 0.5], normal },
    ];
    MeshData::with_u16_indices(&vertices, &[0, 1, 2, 2, 3, 0])
}

/// Grid of cubes on a quad floor.
///
/// Metallic grows along x and roughness along z, one cube per cell, each
/// resting on its own floor tile.
#[derive(Debug)]
pub struct GridScene {
    instances: Vec<(DrawMeshId, GridInstance)>,
    instance_data: InstanceBufferId,
}

impl GridScene {
    /// Load the meshes into `draw` and lay out the grid.
    pub fn new(draw: &mut DrawRegistry, staging: &mut StagingRing) -> Result<Self, GraphicsError> {
        redlilium_core::profile_function!();

        let instance_data = draw.register_instance_data("grid_instance", std::mem::size_of::<GridInstance>() as u64);
        let cube = load(draw, staging, CUBE_MESH)?;
        let quad = load(draw, staging, QUAD_MESH)?;

        let half = (GRID_SIZE as f32 - 1.0) * GRID_SPACING * 0.5;
        let step = 1.0 / (GRID_SIZE as f32 - 1.0).max(1.0);
        let mut instances = Vec::with_capacity(GRID_SIZE * GRID_SIZE * 2);
        for row in 0..GRID_SIZE {
            for col in 0..GRID_SIZE {
                let x = col as f32 * GRID_SPACING - half;
                let z = row as f32 * GRID_SPACING - half;
                let metallic = col as f32 * step;
                let roughness = (row as f32 * step).clamp(0.05, 1.0);

                instances.push((
                    cube,
                    GridInstance {
                        transform: [x, 0.5, z, 1.0],
                        material: [metallic, roughness, 0.0, 0.0],
                    },
                ));
                instances.push((
                    quad,
                    GridInstance {
                        transform: [x, 0.0, z, GRID_SPACING],
                        material: [0.0, 0.9, 0.0, 0.0],
                    },
                ));
            }
        }

        log::info!("GridScene: {} instances", instances.len());
        Ok(Self {
            instances,
            instance_data,
        })
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Hand every instance to the registry for this frame.
    ///
    /// Entity ids are the instance positions in the grid.
    pub fn submit(&self, draw: &mut DrawRegistry, staging: &mut StagingRing) -> Result<(), GraphicsError> {
        redlilium_core::profile_function!();

        let data: Vec<[(InstanceBufferId, &[u8]); 1]> = self
            .instances
            .iter()
            .map(|(_, instance)| [(self.instance_data, bytemuck::bytes_of(instance))])
            .collect();
        let records: Vec<InstanceRecord<'_>> = self
            .instances
            .iter()
            .zip(&data)
            .enumerate()
            .map(|(entity, ((mesh, _), data))| InstanceRecord {
                entity: entity as u64,
                mesh: *mesh,
                data,
            })
            .collect();

        draw.generate_draw_calls(&records, staging)
    }
}

fn load(draw: &mut DrawRegistry, staging: &mut StagingRing, uuid: Uuid) -> Result<DrawMeshId, GraphicsError> {
    draw.get_or_create_mesh(uuid, &BuiltinMeshes, staging)
        .ok_or_else(|| GraphicsError::ResourceCreationFailed(format!("mesh {uuid} could not be loaded")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use redlilium_framegraph::{DummyDevice, FrameGraphConfig, RenderContext};
    use rstest::rstest;

    #[rstest]
    #[case(CUBE_MESH, 24, 36)]
    #[case(QUAD_MESH, 4, 6)]
    fn test_builtin_meshes(#[case] uuid: Uuid, #[case] vertices: u32, #[case] indices: u32) {
        let mesh = BuiltinMeshes.load_mesh(uuid).unwrap();
        assert_eq!(mesh.vertex_count(), vertices);
        assert_eq!(mesh.index_count(), indices);
    }

    #[test]
    fn test_unknown_mesh_is_not_built() {
        assert!(BuiltinMeshes.load_mesh(Uuid::nil()).is_none());
    }

    #[test]
    fn test_grid_submits_one_batch() {
        let config = FrameGraphConfig::default();
        let device = Arc::new(DummyDevice::new());
        let mut render = RenderContext::new(device.clone(), &config).unwrap();
        let mut draw = DrawRegistry::new(device, config.draw).unwrap();

        render.begin_frame().unwrap();
        let scene = GridScene::new(&mut draw, &mut render.staging).unwrap();
        scene.submit(&mut draw, &mut render.staging).unwrap();

        assert_eq!(scene.instance_count(), GRID_SIZE * GRID_SIZE * 2);
        assert_eq!(draw.mesh_count(), 2);
        // Both meshes use 16-bit indices and carry the same instance data.
        assert_eq!(draw.draw_calls().len(), 1);
        assert_eq!(draw.draw_calls()[0].num_instances as usize, scene.instance_count());
    }
}
