#![allow(dead_code)]

use glam::{Vec3A, Vec3Swizzles as _};
use navforge::{
    Aabb3d, AreaType, DetailNavmesh, DetailSubMesh, NavmeshConfig, NavmeshConfigBuilder, PolygonMesh,
    Triangle,
};

/// Unit cells, an agent two cells tall that climbs one cell and is not eroded.
pub fn config(max: impl Into<Vec3A>) -> NavmeshConfig {
    NavmeshConfig {
        walkable_height: 2,
        walkable_climb: 1,
        walkable_radius: 0,
        min_region_area: 1,
        max_vertices_per_polygon: 6,
        max_edge_len: 0,
        detail_sample_dist: 0.0,
        detail_sample_max_error: 0.5,
        ..NavmeshConfigBuilder {
            cell_size: 1.0,
            cell_height: 1.0,
            aabb: Aabb3d::new(Vec3A::ZERO, max),
            ..Default::default()
        }
        .build()
    }
}

/// A horizontal rectangle at height `y`.
pub fn quad(min: [f32; 2], max: [f32; 2], y: f32, area: AreaType) -> [Triangle; 2] {
    ramp(min, max, [y, y], area)
}

/// A rectangle whose height goes linearly from `y[0]` at `min[1]` to `y[1]` at `max[1]` along z.
pub fn ramp(min: [f32; 2], max: [f32; 2], y: [f32; 2], area: AreaType) -> [Triangle; 2] {
    let a = Vec3A::new(min[0], y[0], min[1]);
    let b = Vec3A::new(max[0], y[0], min[1]);
    let c = Vec3A::new(max[0], y[1], max[1]);
    let d = Vec3A::new(min[0], y[1], max[1]);
    [
        Triangle::with_area(a, b, c, area),
        Triangle::with_area(a, c, d, area),
    ]
}

pub fn walkable_quad(min: [f32; 2], max: [f32; 2], y: f32) -> [Triangle; 2] {
    quad(min, max, y, AreaType::DEFAULT_WALKABLE)
}

/// Every polygon is bounded by the vertex limit, turns left at every corner and links back
/// to its neighbors.
pub fn assert_polygon_mesh_is_well_formed(mesh: &PolygonMesh) {
    mesh.validate_adjacency().unwrap();
    for (i, polygon) in mesh.polygons.iter().enumerate() {
        let count = polygon.vertices.len();
        assert!((3..=mesh.max_vertices_per_polygon).contains(&count));
        assert_eq!(polygon.neighbors.len(), count);
        let vertex = |j: usize| mesh.vertices[polygon.vertices[j % count] as usize].as_ivec3();
        for j in 0..count {
            let (a, b, c) = (vertex(j), vertex(j + 1), vertex(j + 2));
            let turn = (b.x - a.x) * (c.z - a.z) - (c.x - a.x) * (b.z - a.z);
            assert!(turn < 0, "polygon {i} does not turn left at {b}: {polygon:?}");
        }
    }
}

/// Compares the detail vertices lying on every edge shared by two polygons and returns how many
/// shared edges were checked.
pub fn assert_detail_seams_agree(mesh: &PolygonMesh, detail: &DetailNavmesh) -> usize {
    let world = |v: u32| {
        let v = mesh.vertices[v as usize].as_vec3();
        mesh.aabb.min
            + Vec3A::new(
                v.x * mesh.cell_size,
                v.y * mesh.cell_height,
                v.z * mesh.cell_size,
            )
    };
    let mut shared = 0;
    for (p, polygon) in mesh.polygons.iter().enumerate() {
        for ((a, b), neighbor) in polygon.edges().zip(&polygon.neighbors) {
            let Some(q) = neighbor.map(|q| q as usize) else {
                continue;
            };
            if q < p {
                continue;
            }
            let (a, b) = (world(a), world(b));
            let on_edge = |sub_mesh: &DetailSubMesh| {
                let mut samples: Vec<Vec3A> = sub_mesh
                    .vertices
                    .iter()
                    .copied()
                    .filter(|v| distance_xz_to_segment(*v, a, b) < 1.0e-3)
                    .collect();
                samples.sort_by(|l, r| {
                    let l = l.xz().distance_squared(a.xz());
                    let r = r.xz().distance_squared(a.xz());
                    l.total_cmp(&r)
                });
                samples
            };
            let ours = on_edge(&detail.meshes[p]);
            let theirs = on_edge(&detail.meshes[q]);
            assert!(ours.len() >= 2, "edge {a} -> {b} lost its endpoints");
            assert_eq!(
                ours.len(),
                theirs.len(),
                "polygons {p} and {q} sample {a} -> {b} differently: {ours:?} vs {theirs:?}"
            );
            for (o, t) in ours.iter().zip(&theirs) {
                assert!(
                    o.distance(*t) < 1.0e-4,
                    "polygons {p} and {q} disagree on {a} -> {b}: {o} vs {t}"
                );
            }
            shared += 1;
        }
    }
    shared
}

fn distance_xz_to_segment(point: Vec3A, a: Vec3A, b: Vec3A) -> f32 {
    let (p, a, b) = (point.xz(), a.xz(), b.xz());
    let segment = b - a;
    let t = (p - a).dot(segment) / segment.length_squared().max(f32::EPSILON);
    p.distance(a + segment * t.clamp(0.0, 1.0))
}
