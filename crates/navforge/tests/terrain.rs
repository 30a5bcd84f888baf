//! Structural properties checked on seeded random height maps.

mod common;

use std::collections::HashSet;

use approx::assert_relative_eq;
use common::{assert_detail_seams_agree, assert_polygon_mesh_is_well_formed, config};
use glam::{UVec3, Vec3A};
use navforge::{CompiledNavmesh, NavmeshBuilder, NavmeshConfig, NavmeshQuery, PathStatus, TriMesh};
use rand::{Rng as _, SeedableRng as _, rngs::StdRng};

const SEEDS: [u64; 4] = [1, 7, 42, 1234];
/// Quads per side of the height map.
const QUADS: u32 = 12;
const SPACING: f32 = 2.0;

/// Rolling hills with per-vertex noise. Slopes steeper than 45 degrees stay unwalkable.
fn terrain(seed: u64) -> TriMesh {
    let mut rng = StdRng::seed_from_u64(seed);
    let phase_x = rng.gen_range(0.0..std::f32::consts::TAU);
    let phase_z = rng.gen_range(0.0..std::f32::consts::TAU);
    let mut trimesh = TriMesh::default();
    for z in 0..=QUADS {
        for x in 0..=QUADS {
            let (fx, fz) = (x as f32 * SPACING, z as f32 * SPACING);
            let hills = 2.0 * (fx * 0.3 + phase_x).sin() * (fz * 0.25 + phase_z).cos();
            let y = 3.0 + hills + rng.gen_range(-0.4..0.4);
            trimesh.vertices.push(Vec3A::new(fx, y, fz));
        }
    }
    let index = |x: u32, z: u32| z * (QUADS + 1) + x;
    for z in 0..QUADS {
        for x in 0..QUADS {
            let [a, b, c, d] = [index(x, z), index(x + 1, z), index(x + 1, z + 1), index(x, z + 1)];
            trimesh.indices.push(UVec3::new(a, c, b));
            trimesh.indices.push(UVec3::new(a, d, c));
        }
    }
    trimesh.mark_walkable_triangles(45.0_f32.to_radians());
    trimesh
}

fn terrain_config() -> NavmeshConfig {
    let extent = QUADS as f32 * SPACING;
    let mut config = config([extent, 10.0, extent]);
    config.max_edge_len = 6;
    config.detail_sample_dist = 2.0;
    config.detail_sample_max_error = 0.25;
    config
}

fn build(seed: u64) -> (NavmeshBuilder, CompiledNavmesh) {
    let mut builder = NavmeshBuilder::new(terrain_config());
    let navmesh = builder.build(terrain(seed).triangles()).unwrap();
    assert!(!navmesh.is_empty(), "seed {seed} built an empty navmesh");
    (builder, navmesh)
}

#[test]
fn polygons_are_convex_with_area() {
    for seed in SEEDS {
        let (builder, _) = build(seed);
        assert_polygon_mesh_is_well_formed(builder.overlays().polygon_mesh.unwrap());
    }
}

#[test]
fn detail_samples_agree_on_shared_edges() {
    let mut shared = 0;
    for seed in SEEDS {
        let (builder, _) = build(seed);
        let overlays = builder.overlays();
        shared += assert_detail_seams_agree(
            overlays.polygon_mesh.unwrap(),
            overlays.detail_navmesh.unwrap(),
        );
    }
    assert!(shared > 0);
}

#[test]
fn centroids_resolve_to_their_own_polygon() {
    for seed in SEEDS {
        let (_, navmesh) = build(seed);
        let query = NavmeshQuery::new(&navmesh);
        for (polygon, data) in navmesh.polygons() {
            let nearest = query.find_nearest_polygon(data.centroid).unwrap();
            assert!(nearest.inside, "seed {seed}: centroid of {polygon:?} is off the mesh");
            // Simplified outlines of regions split by a hole may overlap slightly.
            let region = navmesh.polygon(nearest.polygon).unwrap().region;
            assert!(
                nearest.polygon == polygon || region != data.region,
                "seed {seed}: centroid of {polygon:?} resolves to {:?}",
                nearest.polygon
            );
        }
    }
}

#[test]
fn paths_terminate_and_cost_their_length() {
    for seed in SEEDS {
        let (_, navmesh) = build(seed);
        let query = NavmeshQuery::new(&navmesh);
        let polygons: Vec<_> = navmesh
            .polygons()
            .map(|(polygon, data)| (polygon, data.centroid))
            .collect();
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..40 {
            let (from, start) = polygons[rng.gen_range(0..polygons.len())];
            let (to, goal) = polygons[rng.gen_range(0..polygons.len())];
            let path = query.find_path_between(start, goal, from, to);
            assert_ne!(path.status, PathStatus::Partial);
            assert_eq!(path.nodes.first().unwrap().polygon, from);
            if path.status == PathStatus::Success {
                assert_eq!(path.nodes.last().unwrap().polygon, to);
            }

            let unique: HashSet<_> = path.polygons().collect();
            assert_eq!(unique.len(), path.nodes.len(), "seed {seed}: path revisits a polygon");
            for pair in path.nodes.windows(2) {
                assert!(navmesh.portal(pair[0].polygon, pair[1].polygon).is_some());
            }
            let length: f32 = path
                .points()
                .windows(2)
                .map(|pair| pair[0].distance(pair[1]))
                .sum();
            assert_relative_eq!(path.cost, length, epsilon = 1e-3, max_relative = 1e-4);
        }
    }
}
