//! Geometry helpers shared by the build stages and the query runtime.
//!
//! All planar predicates work on the XZ projection and are evaluated in `f64`.
//! Y is carried along by callers but never consumed here.
//!
//! Winding convention: viewed from +Y, a point `c` lies to the *left* of the
//! directed edge `a -> b` when [`area2`] is negative. Contours and polygons keep
//! their interior on the left.

use glam::{U16Vec3, UVec3, Vec2, Vec3A, Vec3Swizzles as _};

/// An axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner.
    pub min: Vec3A,
    /// The maximum corner.
    pub max: Vec3A,
}

impl Aabb3d {
    /// Creates a new AABB from its corners.
    pub fn new(min: impl Into<Vec3A>, max: impl Into<Vec3A>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Computes the AABB enclosing `verts`.
    /// Returns `None` if `verts` is empty.
    pub fn from_verts(verts: &[Vec3A]) -> Option<Self> {
        let (first, rest) = verts.split_first()?;
        let mut aabb = Self {
            min: *first,
            max: *first,
        };
        for vert in rest {
            aabb.min = aabb.min.min(*vert);
            aabb.max = aabb.max.max(*vert);
        }
        Some(aabb)
    }

    /// The extent of the box along each axis.
    #[inline]
    pub fn size(&self) -> Vec3A {
        self.max - self.min
    }

    /// Closed overlap test: touching boxes intersect.
    #[inline]
    pub fn intersects(&self, other: &Aabb3d) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Whether the point lies inside the box or on its boundary.
    #[inline]
    pub fn contains(&self, point: Vec3A) -> bool {
        self.min.cmple(point).all() && self.max.cmpge(point).all()
    }

    /// Whether both corners are finite and `min < max` on every axis.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min.cmplt(self.max).all()
    }
}

pub(crate) trait TriangleIndices {
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A;
}

impl TriangleIndices for UVec3 {
    #[inline]
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A {
        let a = vertices[self[0] as usize];
        let b = vertices[self[1] as usize];
        let c = vertices[self[2] as usize];
        (b - a).cross(c - a).normalize_or_zero()
    }
}

pub(crate) trait TriangleVertices {
    fn aabb(&self) -> Aabb3d;
}

impl TriangleVertices for [Vec3A; 3] {
    #[inline]
    fn aabb(&self) -> Aabb3d {
        let min = self[0].min(self[1]).min(self[2]);
        let max = self[0].max(self[1]).max(self[2]);
        Aabb3d { min, max }
    }
}

/// Gets the standard width (x-axis) offset for the specified direction.
/// Directions are `0: -x`, `1: +z`, `2: +x`, `3: -z`.
#[inline]
pub(crate) fn dir_offset_x(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [-1, 0, 1, 0];
    OFFSET[direction as usize & 0x03]
}

/// Gets the standard depth (z-axis) offset for the specified direction.
#[inline]
pub(crate) fn dir_offset_z(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [0, 1, 0, -1];
    OFFSET[direction as usize & 0x03]
}

/// Inverse of [`dir_offset_x`] and [`dir_offset_z`] for unit offsets.
#[inline]
pub(crate) fn dir_for_offset(offset_x: i32, offset_z: i32) -> u8 {
    const DIRS: [u8; 5] = [3, 0, u8::MAX, 2, 1];
    DIRS[(((offset_z + 1) << 1) + offset_x) as usize]
}

/// The direction pointing the other way.
#[inline]
pub(crate) fn opposite(direction: u8) -> u8 {
    (direction + 2) & 0x3
}

#[inline]
pub(crate) fn next(i: usize, n: usize) -> usize {
    if i + 1 < n { i + 1 } else { 0 }
}

#[inline]
pub(crate) fn prev(i: usize, n: usize) -> usize {
    if i >= 1 { i - 1 } else { n - 1 }
}

/// Twice the signed XZ area of the triangle `a, b, c`.
#[inline]
pub(crate) fn area2(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> f64 {
    let (ax, az) = (a.x as f64, a.z as f64);
    (b.x as f64 - ax) * (c.z as f64 - az) - (c.x as f64 - ax) * (b.z as f64 - az)
}

#[inline]
pub(crate) fn left(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    area2(a, b, c) < 0.0
}

#[inline]
pub(crate) fn left_on(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    area2(a, b, c) <= 0.0
}

#[inline]
pub(crate) fn collinear(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    area2(a, b, c) == 0.0
}

/// XZ equality; heights are ignored.
#[inline]
pub(crate) fn equal_xz(a: U16Vec3, b: U16Vec3) -> bool {
    a.x == b.x && a.z == b.z
}

/// Proper intersection: the segments share a point interior to both.
pub(crate) fn intersect_prop(a: U16Vec3, b: U16Vec3, c: U16Vec3, d: U16Vec3) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Whether `c` lies on the closed segment `a, b`.
fn between(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.z <= c.z && c.z <= b.z) || (a.z >= c.z && c.z >= b.z)
    }
}

/// Whether the segments `a, b` and `c, d` intersect, touching included.
pub(crate) fn intersect(a: U16Vec3, b: U16Vec3, c: U16Vec3, d: U16Vec3) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

/// Squared XZ distance from `p` to the segment `a, b` on the lattice.
pub(crate) fn distance_squared_point_segment_lattice(
    p: (i32, i32),
    a: (i32, i32),
    b: (i32, i32),
) -> f64 {
    let (px, pz) = (p.0 as f64, p.1 as f64);
    let (ax, az) = (a.0 as f64, a.1 as f64);
    let segment_x = b.0 as f64 - ax;
    let segment_z = b.1 as f64 - az;
    let dx = px - ax;
    let dz = pz - az;
    let length_squared = segment_x * segment_x + segment_z * segment_z;
    let mut t = segment_x * dx + segment_z * dz;
    if length_squared > 0.0 {
        t /= length_squared;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = ax + t * segment_x - px;
    let dz = az + t * segment_z - pz;
    dx * dx + dz * dz
}

/// Squared XZ distance from `p` to the segment `a, b`.
pub(crate) fn distance_squared_between_point_and_line_vec2(p: Vec2, (a, b): (Vec2, Vec2)) -> f32 {
    let p = p.as_dvec2();
    let a = a.as_dvec2();
    let b = b.as_dvec2();
    let segment = b - a;
    let length_squared = segment.length_squared();
    let mut t = segment.dot(p - a);
    if length_squared > 0.0 {
        t /= length_squared;
    }
    let t = t.clamp(0.0, 1.0);
    (a + segment * t).distance_squared(p) as f32
}

/// Squared distance from `p` to the segment `a, b` in 3D.
pub(crate) fn distance_squared_between_point_and_line_vec3(
    p: Vec3A,
    (a, b): (Vec3A, Vec3A),
) -> f32 {
    let segment = b - a;
    let length_squared = segment.length_squared();
    let mut t = segment.dot(p - a);
    if length_squared > 0.0 {
        t /= length_squared;
    }
    let t = t.clamp(0.0, 1.0);
    (a + segment * t).distance_squared(p)
}

/// XZ cross product of `b - a` and `c - a` for float vertices.
#[inline]
pub(crate) fn cross_xz(a: Vec3A, b: Vec3A, c: Vec3A) -> f64 {
    let (ax, az) = (a.x as f64, a.z as f64);
    (b.x as f64 - ax) * (c.z as f64 - az) - (b.z as f64 - az) * (c.x as f64 - ax)
}

/// Containment test for a convex polygon whose interior is on the left of every edge.
/// Points on the boundary count as inside. Polygons without a left-hand interior,
/// such as collinear slivers, contain nothing.
pub(crate) fn point_in_convex_polygon_xz(point: Vec3A, vertices: &[Vec3A]) -> bool {
    const EPS: f64 = 1.0e-6;
    if vertices.len() < 3 {
        return false;
    }
    let signed_area: f64 = vertices
        .windows(2)
        .skip(1)
        .map(|pair| cross_xz(vertices[0], pair[0], pair[1]))
        .sum();
    if signed_area > -EPS {
        return false;
    }
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        if cross_xz(vertices[j], vertices[i], point) > EPS {
            return false;
        }
        j = i;
    }
    true
}

/// Crossing-number containment test on the XZ plane; works for any winding.
pub(crate) fn point_in_polygon_xz(point: Vec3A, vertices: &[Vec3A]) -> bool {
    let mut inside = false;
    let Some(mut j) = vertices.len().checked_sub(1) else {
        return false;
    };
    for i in 0..vertices.len() {
        let vi = vertices[i];
        let vj = vertices[j];
        if (vi.z > point.z) != (vj.z > point.z)
            && point.x < (vj.x - vi.x) * (point.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Height of the triangle `a, b, c` at the XZ position of `p`,
/// or `None` if `p` falls outside the triangle.
pub(crate) fn height_on_triangle(p: Vec3A, a: Vec3A, b: Vec3A, c: Vec3A) -> Option<f32> {
    const EPS: f32 = 1.0e-4;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.xz().dot(v0.xz());
    let dot01 = v0.xz().dot(v1.xz());
    let dot02 = v0.xz().dot(v2.xz());
    let dot11 = v1.xz().dot(v1.xz());
    let dot12 = v1.xz().dot(v2.xz());

    let denom = dot00 * dot11 - dot01 * dot01;
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let inv_denom = 1.0 / denom;
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    (u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS).then(|| a.y + v0.y * u + v1.y * v)
}
