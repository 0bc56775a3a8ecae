use glam::{IVec2, U16Vec3, UVec3, UVec4, Vec3A};

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
    /// Creates a new AABB from its center and half size.
    #[inline]
    pub fn new(center: impl Into<Vec3A>, half_size: impl Into<Vec3A>) -> Self {
        let center = center.into();
        let half_size = half_size.into();
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// Computes the smallest AABB containing all `verts`.
    /// Returns `None` if `verts` is empty.
    pub fn from_verts(verts: &[Vec3A]) -> Option<Self> {
        let mut iter = verts.iter();
        let first = *iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), point| {
            (point.min(min), point.max(max))
        });
        Some(Self { min, max })
    }

    /// The extent of the box along each axis.
    #[inline]
    pub fn size(&self) -> Vec3A {
        self.max - self.min
    }

    /// Returns `true` if the two boxes overlap, touching faces included.
    #[inline]
    pub fn intersects(&self, other: &Aabb3d) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
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
        let ab = b - a;
        let ac = c - a;
        ab.cross(ac).normalize_or_zero()
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
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The width offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_x(direction: u8) -> i32 {
    const OFFSET: [i32; 4] = [-1, 0, 1, 0];
    OFFSET[direction as usize & 0x03]
}

/// Gets the standard height (z-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The height offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_z(direction: u8) -> i32 {
    const OFFSET: [i32; 4] = [0, 1, 0, -1];
    OFFSET[direction as usize & 0x03]
}

/// Index of the next vertex in a closed polygon of `n` vertices.
#[inline]
pub(crate) fn next(i: usize, n: usize) -> usize {
    if i + 1 < n { i + 1 } else { 0 }
}

/// Index of the previous vertex in a closed polygon of `n` vertices.
#[inline]
pub(crate) fn prev(i: usize, n: usize) -> usize {
    if i >= 1 { i - 1 } else { n - 1 }
}

/// A vertex on the voxel lattice, projected onto the xz-plane for 2D predicates.
pub(crate) trait LatticePoint {
    fn xz(&self) -> IVec2;
}

impl LatticePoint for UVec4 {
    #[inline]
    fn xz(&self) -> IVec2 {
        IVec2::new(self.x as i32, self.z as i32)
    }
}

impl LatticePoint for U16Vec3 {
    #[inline]
    fn xz(&self) -> IVec2 {
        IVec2::new(self.x as i32, self.z as i32)
    }
}

/// Twice the signed area of the triangle `abc`. Negative when `c` lies left of `ab`.
#[inline]
pub(crate) fn area2(a: IVec2, b: IVec2, c: IVec2) -> i32 {
    (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)
}

/// Returns true iff `c` is strictly to the left of the directed line through `a` to `b`.
#[inline]
pub(crate) fn left(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub(crate) fn collinear(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) == 0
}

/// Returns true iff `ab` properly intersects `cd`: they share a point interior to both segments.
pub(crate) fn intersect_prop(a: IVec2, b: IVec2, c: IVec2, d: IVec2) -> bool {
    // Eliminate improper cases.
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Returns true iff `c` lies on the closed segment `ab`.
fn between(a: IVec2, b: IVec2, c: IVec2) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    // If ab not vertical, check betweenness on x; else on y.
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.y <= c.y && c.y <= b.y) || (a.y >= c.y && c.y >= b.y)
    }
}

/// Returns true iff segments `ab` and `cd` intersect, properly or improperly.
pub(crate) fn intersect(a: IVec2, b: IVec2, c: IVec2, d: IVec2) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

/// Squared distance from `point` to the segment `pq` on the xz-plane.
pub(crate) fn distance_point_segment_2d_sqr(point: IVec2, p: IVec2, q: IVec2) -> f32 {
    let pq = (q - p).as_vec2();
    let d = (point - p).as_vec2();
    let len_sqr = pq.length_squared();
    let mut t = pq.dot(d);
    if len_sqr > 0.0 {
        t /= len_sqr;
    }
    let t = t.clamp(0.0, 1.0);
    (p.as_vec2() + pq * t - point.as_vec2()).length_squared()
}
