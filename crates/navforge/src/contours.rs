//! Region outlines traced from a [`CompactHeightfield`] and simplified into [`ContourSet`]s.

use glam::U16Vec3;
use tracing::warn;

use crate::{
    Aabb3d, AreaType, CompactHeightfield, RegionId,
    math::{
        dir_offset_x, dir_offset_z, distance_squared_point_segment_lattice, equal_xz, intersect,
        left, left_on, next, prev,
    },
};

impl CompactHeightfield {
    /// The raw contours will match the region outlines exactly. The `max_error` and `max_edge_len`
    /// parameters control how closely the simplified contours will match the raw contours.
    ///
    /// Simplified contours are generated such that the vertices for portals between areas match up.
    /// (They are considered mandatory vertices.)
    ///
    /// Setting `max_edge_len` to zero will disable the edge length feature.
    ///
    /// Holes inside a region are spliced into the region's outline, so every region ends up with a
    /// single counter-clockwise loop (viewed from +Y).
    ///
    /// # Arguments
    ///
    /// - `max_error` - The maximum distance a simplified contour's border edges should deviate from the original raw contour. [Limit: >=0] [Units: vx]
    /// - `max_edge_len` - The maximum allowed length for contour edges along the border of the mesh. [Limit: >=0] [Units: vx]
    /// - `build_flags` - Which kinds of edges are split when longer than `max_edge_len`.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> ContourSet {
        let mut cset = ContourSet {
            contours: Vec::with_capacity((self.max_region.0 as usize).max(8)),
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width,
            depth: self.depth,
            max_error,
        };

        let mut flags = vec![0_u8; self.spans.len()];

        // Mark boundaries
        for (i, span) in self.spans.iter().enumerate() {
            if !span.region.is_region() {
                continue;
            }
            let mut res = 0;
            for dir in 0..4 {
                let region = span
                    .neighbor(dir)
                    .map_or(RegionId::NONE, |neighbor| self.spans[neighbor].region);
                if region == span.region {
                    res |= 1 << dir;
                }
            }
            // Inverse, mark non connected edges.
            flags[i] = res ^ 0xf;
        }

        let mut raw_vertices = Vec::with_capacity(256);
        let mut simplified = Vec::with_capacity(64);

        for (x, z, i) in self.iter_span_indices() {
            if flags[i] == 0 || flags[i] == 0xf {
                flags[i] = 0;
                continue;
            }
            let region = self.spans[i].region;
            if !region.is_region() {
                continue;
            }
            let area = self.areas[i];

            raw_vertices.clear();
            simplified.clear();

            self.walk_contour(x, z, i, &mut flags, &mut raw_vertices);

            simplify_contour(
                &raw_vertices,
                &mut simplified,
                max_error,
                max_edge_len,
                build_flags,
            );
            remove_degenerate_segments(&mut simplified);

            // Store region->contour remap info.
            // Create contour.
            if simplified.len() >= 3 {
                cset.contours.push(Contour {
                    vertices: simplified.clone(),
                    raw_vertices: raw_vertices.clone(),
                    region,
                    area,
                });
            } else {
                warn!(
                    region = region.0,
                    vertices = simplified.len(),
                    "Dropping degenerate contour"
                );
            }
        }

        cset.merge_holes();
        cset
    }

    fn walk_contour(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        flags: &mut [u8],
        points: &mut Vec<ContourVertex>,
    ) {
        // Choose the first non-connected edge
        let mut dir = 0_u8;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        for _ in 0..40_000 {
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner
                let y = self.corner_height(i, dir);
                let (p_x, p_z) = match dir {
                    0 => (x, z + 1),
                    1 => (x + 1, z + 1),
                    2 => (x + 1, z),
                    _ => (x, z),
                };
                let mut vertex_flags = ContourVertexFlags::empty();
                if let Some(neighbor) = self.spans[i].neighbor(dir) {
                    vertex_flags = ContourVertexFlags::from_region(self.spans[neighbor].region);
                    if area != self.areas[neighbor] {
                        vertex_flags |= ContourVertexFlags::AREA_BORDER;
                    }
                }
                points.push(ContourVertex {
                    position: U16Vec3::new(p_x, y, p_z),
                    flags: vertex_flags,
                });

                // Remove visited edges
                flags[i] &= !(1 << dir);
                // Rotate clockwise
                dir = (dir + 1) & 0x3;
            } else {
                let Some(neighbor) = self.spans[i].neighbor(dir) else {
                    // The edge is connected, so the neighbor must exist.
                    warn!(x, z, dir, "Contour walk reached an unconnected edge");
                    return;
                };
                x = (x as i32 + dir_offset_x(dir) as i32) as u16;
                z = (z as i32 + dir_offset_z(dir) as i32) as u16;
                i = neighbor;
                // Rotate counterclockwise
                dir = (dir + 3) & 0x3;
            }
            if start_i == i && start_dir == dir {
                break;
            }
        }
    }

    /// The height of the corner between direction `dir` and the next clockwise direction:
    /// the highest floor among the up to four spans sharing that corner.
    fn corner_height(&self, i: usize, dir: u8) -> u16 {
        let span = &self.spans[i];
        let mut height = span.y;
        let dir_p = (dir + 1) & 0x3;

        if let Some(a) = span.neighbor(dir) {
            height = height.max(self.spans[a].y);
            if let Some(b) = self.spans[a].neighbor(dir_p) {
                height = height.max(self.spans[b].y);
            }
        }
        if let Some(a) = span.neighbor(dir_p) {
            height = height.max(self.spans[a].y);
            if let Some(b) = self.spans[a].neighbor(dir) {
                height = height.max(self.spans[b].y);
            }
        }
        height
    }
}

/// Vertex of a simplified contour while it is being built, with the index of the raw vertex it came from.
#[derive(Debug, Clone, Copy)]
struct SimplifiedVertex {
    position: U16Vec3,
    raw_index: usize,
}

fn simplify_contour(
    points: &[ContourVertex],
    simplified_out: &mut Vec<ContourVertex>,
    max_error: f32,
    max_edge_len: u16,
    build_flags: BuildContoursFlags,
) {
    let pn = points.len();
    if pn == 0 {
        return;
    }
    let mut simplified: Vec<SimplifiedVertex> = Vec::with_capacity(64);

    // Add initial points.
    let has_connections = points.iter().any(|p| p.flags.region().is_region());

    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        for (i, point) in points.iter().enumerate() {
            let next_point = &points[next(i, pn)];
            let different_regs = point.flags.region() != next_point.flags.region();
            let area_borders = point.flags.contains(ContourVertexFlags::AREA_BORDER)
                != next_point.flags.contains(ContourVertexFlags::AREA_BORDER);
            if different_regs || area_borders {
                simplified.push(SimplifiedVertex {
                    position: point.position,
                    raw_index: i,
                });
            }
        }
    }

    if simplified.is_empty() {
        // If there is no connections at all,
        // create some initial points for the simplification process.
        // Find lower-left and upper-right vertices of the contour.
        let mut lower_left = 0;
        let mut upper_right = 0;
        for (i, point) in points.iter().enumerate() {
            let p = point.position;
            let ll = points[lower_left].position;
            let ur = points[upper_right].position;
            if p.x < ll.x || (p.x == ll.x && p.z < ll.z) {
                lower_left = i;
            }
            if p.x > ur.x || (p.x == ur.x && p.z > ur.z) {
                upper_right = i;
            }
        }
        simplified.push(SimplifiedVertex {
            position: points[lower_left].position,
            raw_index: lower_left,
        });
        simplified.push(SimplifiedVertex {
            position: points[upper_right].position,
            raw_index: upper_right,
        });
    }

    // Add points until all raw points are within
    // error tolerance to the simplified shape.
    let max_error_sq = (max_error as f64) * (max_error as f64);
    let mut i = 0;
    while i < simplified.len() {
        let ii = next(i, simplified.len());
        let mut a = simplified[i];
        let mut b = simplified[ii];

        // Traverse the segment in lexilogical order so that the
        // max deviation is calculated similarly when traversing
        // opposite segments.
        let (c_inc, mut ci, end_i) = if is_lexically_after(b.position, a.position) {
            (1, next(a.raw_index, pn), b.raw_index)
        } else {
            // Walk backwards from `b` towards `a`.
            std::mem::swap(&mut a, &mut b);
            (pn - 1, (a.raw_index + pn - 1) % pn, b.raw_index)
        };
        let (a_pos, b_pos) = (a.position, b.position);

        let mut max_d = 0.0;
        let mut max_i = None;
        // Tessellate only outer edges or edges between areas.
        let ci_flags = points[ci].flags;
        if !ci_flags.region().is_region() || ci_flags.contains(ContourVertexFlags::AREA_BORDER) {
            while ci != end_i {
                let p = points[ci].position;
                let d = distance_squared_point_segment_lattice(
                    (p.x as i32, p.z as i32),
                    (a_pos.x as i32, a_pos.z as i32),
                    (b_pos.x as i32, b_pos.z as i32),
                );
                if d > max_d {
                    max_d = d;
                    max_i = Some(ci);
                }
                ci = (ci + c_inc) % pn;
            }
        }

        // If the max deviation is larger than accepted error,
        // add new point, else continue to next segment.
        match max_i {
            Some(max_i) if max_d > max_error_sq => {
                simplified.insert(
                    i + 1,
                    SimplifiedVertex {
                        position: points[max_i].position,
                        raw_index: max_i,
                    },
                );
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    let tessellate_walls = build_flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES);
    let tessellate_areas = build_flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES);
    if max_edge_len > 0 && (tessellate_walls || tessellate_areas) {
        let max_edge_len_sq = max_edge_len as i64 * max_edge_len as i64;
        let mut i = 0;
        while i < simplified.len() {
            let ii = next(i, simplified.len());
            let a = simplified[i];
            let b = simplified[ii];

            // Find maximum deviation from the segment.
            let mut max_i = None;
            let ci = next(a.raw_index, pn);

            // Tessellate only outer edges or edges between areas.
            let ci_flags = points[ci].flags;
            let tessellate = (tessellate_walls && !ci_flags.region().is_region())
                || (tessellate_areas && ci_flags.contains(ContourVertexFlags::AREA_BORDER));

            if tessellate {
                let dx = b.position.x as i64 - a.position.x as i64;
                let dz = b.position.z as i64 - a.position.z as i64;
                if dx * dx + dz * dz > max_edge_len_sq {
                    // Round based on the segments in lexilogical order so that the
                    // max tesselation is consistent regardless in which direction
                    // segments are traversed.
                    let n = if b.raw_index < a.raw_index {
                        b.raw_index + pn - a.raw_index
                    } else {
                        b.raw_index - a.raw_index
                    };
                    if n > 1 {
                        max_i = Some(if is_lexically_after(b.position, a.position) {
                            (a.raw_index + n / 2) % pn
                        } else {
                            (a.raw_index + n.div_ceil(2)) % pn
                        });
                    }
                }
            }

            // If the max deviation is larger than accepted error,
            // add new point, else continue to next segment.
            match max_i {
                Some(max_i) => simplified.insert(
                    i + 1,
                    SimplifiedVertex {
                        position: points[max_i].position,
                        raw_index: max_i,
                    },
                ),
                None => i += 1,
            }
        }
    }

    // The edge vertex flag is taken from the current raw point,
    // and the neighbour region is taken from the next raw point.
    simplified_out.extend(simplified.iter().map(|vertex| {
        let next_raw = points[next(vertex.raw_index, pn)].flags;
        ContourVertex {
            position: vertex.position,
            flags: next_raw & (ContourVertexFlags::REGION_MASK | ContourVertexFlags::AREA_BORDER),
        }
    }));
}

#[inline]
fn is_lexically_after(b: U16Vec3, a: U16Vec3) -> bool {
    b.x > a.x || (b.x == a.x && b.z > a.z)
}

/// Removes vertices that share their XZ position with the following vertex.
fn remove_degenerate_segments(simplified: &mut Vec<ContourVertex>) {
    let mut i = 0;
    while i < simplified.len() && simplified.len() > 1 {
        let ni = next(i, simplified.len());
        if equal_xz(simplified[i].position, simplified[ni].position) {
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Twice the signed area of a contour. Outlines are positive, holes negative.
fn signed_area(vertices: &[ContourVertex]) -> i64 {
    let mut area = 0;
    let Some(mut j) = vertices.len().checked_sub(1) else {
        return 0;
    };
    for i in 0..vertices.len() {
        let vi = vertices[i].position;
        let vj = vertices[j].position;
        area += vi.x as i64 * vj.z as i64 - vj.x as i64 * vi.z as i64;
        j = i;
    }
    area
}

impl ContourSet {
    /// Splices every hole into the outline of its region.
    fn merge_holes(&mut self) {
        let is_hole: Vec<bool> = self
            .contours
            .iter()
            .map(|contour| signed_area(&contour.vertices) < 0)
            .collect();
        if !is_hole.iter().any(|hole| *hole) {
            return;
        }

        let max_region = self
            .contours
            .iter()
            .map(|contour| contour.region.0 as usize)
            .max()
            .unwrap_or_default();
        let mut outlines: Vec<Option<usize>> = vec![None; max_region + 1];
        let mut holes: Vec<Vec<usize>> = vec![Vec::new(); max_region + 1];
        for (index, contour) in self.contours.iter().enumerate() {
            let region = contour.region.0 as usize;
            if is_hole[index] {
                holes[region].push(index);
            } else if outlines[region].is_some() {
                warn!(region, "Multiple outlines for region");
            } else {
                outlines[region] = Some(index);
            }
        }

        let mut dropped = vec![false; self.contours.len()];
        for (region, region_holes) in holes.iter().enumerate() {
            if region_holes.is_empty() {
                continue;
            }
            let Some(outline) = outlines[region] else {
                warn!(region, "Missing outline for region, dropping its holes");
                for hole in region_holes {
                    dropped[*hole] = true;
                }
                continue;
            };
            for hole in self.merge_region_holes(outline, region_holes) {
                warn!(region, "Failed to find merge points for hole, dropping it");
                dropped[hole] = true;
            }
            for hole in region_holes {
                dropped[*hole] = true;
            }
        }

        let mut index = 0;
        self.contours.retain(|_| {
            let keep = !dropped[index];
            index += 1;
            keep
        });
    }

    /// Merges holes into `outline` left to right. Returns the holes that could not be merged.
    fn merge_region_holes(&mut self, outline: usize, region_holes: &[usize]) -> Vec<usize> {
        // Sort holes from left to right.
        let mut holes: Vec<HoleInfo> = region_holes
            .iter()
            .map(|&contour| {
                let (min_x, min_z, leftmost) =
                    find_leftmost_vertex(&self.contours[contour].vertices);
                HoleInfo {
                    contour,
                    min_x,
                    min_z,
                    leftmost,
                }
            })
            .collect();
        holes.sort_by_key(|hole| (hole.min_x, hole.min_z));

        let mut unmerged = Vec::new();
        let mut diagonals: Vec<PotentialDiagonal> = Vec::new();
        for i in 0..holes.len() {
            let hole = &self.contours[holes[i].contour].vertices;
            let outline_vertices = &self.contours[outline].vertices;
            let mut index = None;
            let mut best_vertex = holes[i].leftmost;
            for _ in 0..hole.len() {
                // Find potential diagonals.
                // The 'best' vertex must be in the cone described by 3 consecutive vertices of the outline.
                diagonals.clear();
                let corner = hole[best_vertex].position;
                for j in 0..outline_vertices.len() {
                    if in_cone(j, outline_vertices, corner) {
                        let p = outline_vertices[j].position;
                        let dx = p.x as i64 - corner.x as i64;
                        let dz = p.z as i64 - corner.z as i64;
                        diagonals.push(PotentialDiagonal {
                            vertex: j,
                            distance: dx * dx + dz * dz,
                        });
                    }
                }
                // Sort potential diagonals by distance, we want to make the connection as short as possible.
                diagonals.sort_by_key(|diagonal| diagonal.distance);

                // Find a diagonal that is not intersecting the outline nor the remaining holes.
                index = diagonals
                    .iter()
                    .find(|diagonal| {
                        let pt = outline_vertices[diagonal.vertex].position;
                        let crosses_outline =
                            intersect_seg_contour(pt, corner, Some(diagonal.vertex), outline_vertices);
                        let crosses_hole = holes[i..].iter().any(|other| {
                            intersect_seg_contour(
                                pt,
                                corner,
                                None,
                                &self.contours[other.contour].vertices,
                            )
                        });
                        !crosses_outline && !crosses_hole
                    })
                    .map(|diagonal| diagonal.vertex);
                // If found non-intersecting diagonal, stop looking.
                if index.is_some() {
                    break;
                }
                // All the potential diagonals for the current vertex were intersecting, try next vertex.
                best_vertex = next(best_vertex, hole.len());
            }

            let Some(index) = index else {
                unmerged.push(holes[i].contour);
                continue;
            };
            let merged = merge_contours(
                &self.contours[outline].vertices,
                &self.contours[holes[i].contour].vertices,
                index,
                best_vertex,
            );
            self.contours[outline].vertices = merged;
            self.contours[holes[i].contour].vertices.clear();
        }
        unmerged
    }
}

struct HoleInfo {
    contour: usize,
    min_x: u16,
    min_z: u16,
    leftmost: usize,
}

struct PotentialDiagonal {
    vertex: usize,
    distance: i64,
}

fn find_leftmost_vertex(vertices: &[ContourVertex]) -> (u16, u16, usize) {
    let mut min_x = vertices[0].position.x;
    let mut min_z = vertices[0].position.z;
    let mut leftmost = 0;
    for (i, vertex) in vertices.iter().enumerate().skip(1) {
        let p = vertex.position;
        if p.x < min_x || (p.x == min_x && p.z < min_z) {
            min_x = p.x;
            min_z = p.z;
            leftmost = i;
        }
    }
    (min_x, min_z, leftmost)
}

/// Whether the diagonal from vertex `i` to `pj` lies inside the contour at `i`.
fn in_cone(i: usize, vertices: &[ContourVertex], pj: U16Vec3) -> bool {
    let n = vertices.len();
    let pi = vertices[i].position;
    let pi1 = vertices[next(i, n)].position;
    let pin1 = vertices[prev(i, n)].position;

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Whether the segment `d0, d1` crosses an edge of the contour, ignoring edges incident to `skip`
/// and edges sharing an endpoint with the segment.
fn intersect_seg_contour(
    d0: U16Vec3,
    d1: U16Vec3,
    skip: Option<usize>,
    vertices: &[ContourVertex],
) -> bool {
    let n = vertices.len();
    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i.
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = vertices[k].position;
        let p1 = vertices[k1].position;
        if equal_xz(d0, p0) || equal_xz(d1, p0) || equal_xz(d0, p1) || equal_xz(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

/// Splices `hole` into `outline` through the bridge `outline[ia]` -> `hole[ib]`.
/// Both bridge endpoints appear twice in the result.
fn merge_contours(
    outline: &[ContourVertex],
    hole: &[ContourVertex],
    ia: usize,
    ib: usize,
) -> Vec<ContourVertex> {
    let mut merged = Vec::with_capacity(outline.len() + hole.len() + 2);
    // Copy contour A.
    for i in 0..=outline.len() {
        merged.push(outline[(ia + i) % outline.len()]);
    }
    // Copy contour B
    for i in 0..=hole.len() {
        merged.push(hole[(ib + i) % hole.len()]);
    }
    merged
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    /// An array of the contours in the set.
    pub contours: Vec<Contour>,
    /// The AABB in world space
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u16,
    /// The depth of the set. (Along the z-axis in cell units.)
    pub depth: u16,
    /// The max edge error that this contour set was simplified with.
    pub max_error: f32,
}

/// Represents a simple, non-overlapping contour in field space.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// Simplified contour vertex and connection data.
    pub vertices: Vec<ContourVertex>,
    /// Raw contour vertex and connection data.
    pub raw_vertices: Vec<ContourVertex>,
    /// Region ID of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

/// A lattice vertex of a [`Contour`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourVertex {
    /// Position in voxels relative to the field's AABB minimum.
    pub position: U16Vec3,
    /// Describes the edge that starts at this vertex.
    pub flags: ContourVertexFlags,
}

bitflags::bitflags! {
    /// Connection data of a contour vertex.
    ///
    /// The low 16 bits hold the region on the other side of the edge that starts at the vertex,
    /// or [`RegionId::NONE`] for walls.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct ContourVertexFlags: u32 {
        /// Extracts the neighbor region id.
        const REGION_MASK = 0xffff;

        /// Area border flag.
        /// Set when the edge separates two different area types.
        const AREA_BORDER = 0x20_000;
    }
}

impl ContourVertexFlags {
    /// Flags pointing at `region` with no other bits set.
    #[inline]
    pub fn from_region(region: RegionId) -> Self {
        Self::from_bits_retain(region.0 as u32)
    }

    /// The region on the other side of the edge.
    #[inline]
    pub fn region(self) -> RegionId {
        RegionId((self.bits() & Self::REGION_MASK.bits()) as u16)
    }
}

bitflags::bitflags! {
    /// Contour build flags used in [`CompactHeightfield::build_contours`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct BuildContoursFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec3A, u16vec3};

    use crate::{HeightfieldBuilder, heightfield::Heightfield, math::area2};

    use super::*;

    fn heightfield(width: f32, depth: f32) -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [width, 4.0, depth]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn add_rect(heightfield: &mut Heightfield, min: [f32; 2], max: [f32; 2], area: AreaType) {
        let a = Vec3A::new(min[0], 0.0, min[1]);
        let b = Vec3A::new(max[0], 0.0, min[1]);
        let c = Vec3A::new(max[0], 0.0, max[1]);
        let d = Vec3A::new(min[0], 0.0, max[1]);
        heightfield.rasterize_triangle([a, c, b], area, 1).unwrap();
        heightfield.rasterize_triangle([a, d, c], area, 1).unwrap();
    }

    fn contours(heightfield: &Heightfield) -> ContourSet {
        let mut compact = CompactHeightfield::from_heightfield(heightfield, 2, 1);
        compact.build_distance_field();
        compact.build_regions(1).unwrap();
        compact.build_contours(1.3, 0, BuildContoursFlags::default())
    }

    fn positions(contour: &Contour) -> Vec<U16Vec3> {
        contour.vertices.iter().map(|v| v.position).collect()
    }

    #[test]
    fn square_floor_simplifies_to_its_corners() {
        let mut heightfield = heightfield(4.0, 4.0);
        add_rect(&mut heightfield, [0.0, 0.0], [4.0, 4.0], AreaType::DEFAULT_WALKABLE);
        let cset = contours(&heightfield);
        assert_eq!(cset.contours.len(), 1);
        let contour = &cset.contours[0];
        let mut corners = positions(contour);
        corners.sort_by_key(|p| (p.x, p.z));
        assert_eq!(
            corners,
            vec![
                u16vec3(0, 1, 0),
                u16vec3(0, 1, 4),
                u16vec3(4, 1, 0),
                u16vec3(4, 1, 4)
            ]
        );
        assert_eq!(contour.raw_vertices.len(), 16);
        assert!(signed_area(&contour.vertices) > 0);
    }

    #[test]
    fn contours_keep_interior_on_the_left() {
        let mut heightfield = heightfield(4.0, 4.0);
        add_rect(&mut heightfield, [0.0, 0.0], [4.0, 4.0], AreaType::DEFAULT_WALKABLE);
        let cset = contours(&heightfield);
        let vertices = positions(&cset.contours[0]);
        let n = vertices.len();
        for i in 0..n {
            let a = vertices[i];
            let b = vertices[(i + 1) % n];
            assert!(area2(a, b, u16vec3(2, 0, 2)) < 0.0);
        }
    }

    #[test]
    fn long_wall_edges_are_split() {
        let mut heightfield = heightfield(8.0, 2.0);
        add_rect(&mut heightfield, [0.0, 0.0], [8.0, 2.0], AreaType::DEFAULT_WALKABLE);
        let mut compact = CompactHeightfield::from_heightfield(&heightfield, 2, 1);
        compact.build_distance_field();
        compact.build_regions(1).unwrap();
        let cset = compact.build_contours(1.3, 3, BuildContoursFlags::default());
        let vertices = positions(&cset.contours[0]);
        for i in 0..vertices.len() {
            let a = vertices[i];
            let b = vertices[(i + 1) % vertices.len()];
            let dx = a.x as i32 - b.x as i32;
            let dz = a.z as i32 - b.z as i32;
            assert!(dx * dx + dz * dz <= 9, "{a} -> {b}");
        }
    }

    #[test]
    fn portal_vertices_point_at_the_neighbor_region() {
        let mut heightfield = heightfield(8.0, 4.0);
        add_rect(&mut heightfield, [0.0, 0.0], [4.0, 4.0], AreaType(1));
        add_rect(&mut heightfield, [4.0, 0.0], [8.0, 4.0], AreaType(2));
        let cset = contours(&heightfield);
        assert_eq!(cset.contours.len(), 2);
        for contour in &cset.contours {
            let portals: Vec<_> = contour
                .vertices
                .iter()
                .filter(|v| v.flags.region().is_region())
                .collect();
            assert_eq!(portals.len(), 1);
            assert!(portals[0].flags.contains(ContourVertexFlags::AREA_BORDER));
            assert_eq!(portals[0].position.x, 4);
        }
    }

    #[test]
    fn holes_are_merged_into_the_outline() {
        let mut heightfield = heightfield(9.0, 9.0);
        add_rect(&mut heightfield, [0.0, 0.0], [9.0, 3.0], AreaType::DEFAULT_WALKABLE);
        add_rect(&mut heightfield, [0.0, 6.0], [9.0, 9.0], AreaType::DEFAULT_WALKABLE);
        add_rect(&mut heightfield, [0.0, 3.0], [3.0, 6.0], AreaType::DEFAULT_WALKABLE);
        add_rect(&mut heightfield, [6.0, 3.0], [9.0, 6.0], AreaType::DEFAULT_WALKABLE);
        let cset = contours(&heightfield);
        assert!(!cset.contours.is_empty());
        for contour in &cset.contours {
            assert!(signed_area(&contour.vertices) > 0);
        }
    }

    #[test]
    fn flags_round_trip_region() {
        let flags = ContourVertexFlags::from_region(RegionId(7)) | ContourVertexFlags::AREA_BORDER;
        assert_eq!(flags.region(), RegionId(7));
        assert!(flags.contains(ContourVertexFlags::AREA_BORDER));
    }
}
