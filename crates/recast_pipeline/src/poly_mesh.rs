use std::{cmp::Reverse, collections::VecDeque};

use glam::{IVec2, U16Vec3, UVec4, Vec3A};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    Aabb3d, AreaType, RegionId,
    contours::{ContourSet, RegionVertexId},
    math::{LatticePoint as _, intersect, intersect_prop, left, left_on, next, prev},
};

/// Marks an unused vertex or neighbor slot of a polygon.
pub const RC_MESH_NULL_IDX: u16 = 0xffff;

/// The largest supported number of vertices per polygon.
pub const MAX_VERTICES_PER_POLYGON: usize = 12;

const VERTEX_BUCKET_COUNT: usize = 1 << 12;

/// Set on a triangulation index whose vertex can be clipped as an ear.
const REMOVABLE: u32 = 0x8000_0000;
const INDEX_MASK: u32 = 0x0fff_ffff;

/// Represents a polygon mesh suitable for use in building a navigation mesh.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonMesh {
    /// The mesh vertices, in lattice coordinates relative to [`PolygonMesh::aabb`].
    pub vertices: Vec<U16Vec3>,
    /// Polygon and neighbor data. Each polygon takes `2 * vertices_per_polygon` slots:
    /// the vertex indices padded with [`RC_MESH_NULL_IDX`], then one neighbor per edge.
    pub polygons: Vec<u16>,
    /// The region id assigned to each polygon.
    pub regions: Vec<RegionId>,
    /// The flags assigned to each polygon. Left zeroed for the user to fill.
    pub flags: Vec<u16>,
    /// The area id assigned to each polygon.
    pub areas: Vec<AreaType>,
    /// The number of polygons the mesh was sized for.
    pub max_polygons: usize,
    /// The maximum number of vertices per polygon
    pub vertices_per_polygon: usize,
    /// The bounding box of the mesh in world space.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The AABB border size used to generate the source data from which the mesh was derived.
    pub border_size: u16,
    /// The max error of the polygon edges in the mesh.
    pub max_edge_error: f32,
}

impl PolygonMesh {
    /// Number of polygons in the mesh.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        self.regions.len()
    }

    /// The vertex indices of polygon `i`, without padding.
    pub fn polygon(&self, i: usize) -> &[u16] {
        let nvp = self.vertices_per_polygon;
        let start = i * nvp * 2;
        let slots = &self.polygons[start..start + nvp];
        let len = slots
            .iter()
            .position(|v| *v == RC_MESH_NULL_IDX)
            .unwrap_or(nvp);
        &slots[..len]
    }

    /// The neighbor slots of polygon `i`. Entry `j` belongs to the edge starting at vertex `j`.
    ///
    /// [`RC_MESH_NULL_IDX`] marks an edge without neighbor. Entries with the `0x8000` bit set are
    /// portals to a neighboring tile, the low bits give the side.
    pub fn neighbors(&self, i: usize) -> &[u16] {
        let nvp = self.vertices_per_polygon;
        let start = i * nvp * 2 + nvp;
        &self.polygons[start..start + nvp]
    }

    /// Converts vertex `i` to world space.
    pub fn world_vertex(&self, i: usize) -> Vec3A {
        let scale = Vec3A::new(self.cell_size, self.cell_height, self.cell_size);
        self.aabb.min + Vec3A::from(self.vertices[i].as_vec3()) * scale
    }

    fn push_polygon(&mut self, vertices: &[u16], region: RegionId, area: AreaType) {
        let start = self.polygons.len();
        self.polygons.extend_from_slice(vertices);
        self.polygons
            .resize(start + self.vertices_per_polygon * 2, RC_MESH_NULL_IDX);
        self.regions.push(region);
        self.areas.push(area);
    }

    /// Replaces polygon `i` with the last polygon.
    fn swap_remove_polygon(&mut self, i: usize) {
        let stride = self.vertices_per_polygon * 2;
        let last = self.polygon_count() - 1;
        if i != last {
            self.polygons
                .copy_within(last * stride..(last + 1) * stride, i * stride);
        }
        self.polygons.truncate(last * stride);
        self.regions.swap_remove(i);
        self.areas.swap_remove(i);
    }

    /// Whether removing vertex `rem` leaves a hole that can be retriangulated.
    fn can_remove_vertex(&self, rem: u16) -> bool {
        // Count number of polygons to remove.
        let mut touched = 0;
        let mut remaining_edges = 0;
        for i in 0..self.polygon_count() {
            let poly = self.polygon(i);
            let removed = poly.iter().filter(|v| **v == rem).count();
            if removed > 0 {
                touched += removed;
                remaining_edges += poly.len() - (removed + 1);
            }
        }

        // There would be too few edges remaining to create a polygon.
        // This can happen for example when a tip of a triangle is marked
        // as deletion, but there are no other polys that share the vertex.
        // In this case, the vertex should not be removed.
        if remaining_edges <= 2 {
            return false;
        }

        // Find edges which share the removed vertex.
        let mut edges: Vec<(u16, usize)> = Vec::with_capacity(touched * 2);
        for i in 0..self.polygon_count() {
            let poly = self.polygon(i);
            let nv = poly.len();
            // Collect edges which touches the removed vertex.
            for j in 0..nv {
                let k = prev(j, nv);
                if poly[j] != rem && poly[k] != rem {
                    continue;
                }
                // Arrange edge so that a=rem.
                let other = if poly[k] == rem { poly[j] } else { poly[k] };
                // Check if the edge exists
                match edges.iter_mut().find(|(b, _)| *b == other) {
                    // Exists, increment vertex share count.
                    Some((_, share_count)) => *share_count += 1,
                    None => edges.push((other, 1)),
                }
            }
        }

        // There should be no more than 2 open edges.
        // This catches the case that two non-adjacent polygons
        // share the removed vertex. In that case, do not remove the vertex.
        let open_edges = edges.iter().filter(|(_, share_count)| *share_count < 2).count();
        open_edges <= 2
    }

    /// Removes vertex `rem` together with all polygons using it and retriangulates the hole.
    /// Returns the number of imperfect triangulations.
    fn remove_vertex(&mut self, rem: u16, max_polygons: usize) -> usize {
        let nvp = self.vertices_per_polygon;

        // Collect edges which do not touch the removed vertex, and remove the polygons using it.
        let mut edges: Vec<(u16, u16, RegionId, AreaType)> = Vec::new();
        let mut i = 0;
        while i < self.polygon_count() {
            let poly = self.polygon(i);
            if !poly.contains(&rem) {
                i += 1;
                continue;
            }
            let nv = poly.len();
            for j in 0..nv {
                let k = prev(j, nv);
                if poly[j] != rem && poly[k] != rem {
                    edges.push((poly[k], poly[j], self.regions[i], self.areas[i]));
                }
            }
            self.swap_remove_polygon(i);
        }

        // Remove vertex.
        self.vertices.remove(rem as usize);

        // Adjust indices to match the removed vertex layout.
        for polygon in self.polygons.chunks_exact_mut(nvp * 2) {
            for v in &mut polygon[..nvp] {
                if *v != RC_MESH_NULL_IDX && *v > rem {
                    *v -= 1;
                }
            }
        }
        for (a, b, _, _) in &mut edges {
            if *a > rem {
                *a -= 1;
            }
            if *b > rem {
                *b -= 1;
            }
        }

        let Some(&(first, _, region, area)) = edges.first() else {
            return 0;
        };

        // Start with one vertex, keep appending connected
        // segments to the start and end of the hole.
        let mut hole: VecDeque<(u16, RegionId, AreaType)> = VecDeque::from([(first, region, area)]);
        while !edges.is_empty() {
            let mut matched = false;
            let mut i = 0;
            while i < edges.len() {
                let (ea, eb, region, area) = edges[i];
                let added = if hole.front().is_some_and(|h| h.0 == eb) {
                    // The segment matches the beginning of the hole boundary.
                    hole.push_front((ea, region, area));
                    true
                } else if hole.back().is_some_and(|h| h.0 == ea) {
                    // The segment matches the end of the hole boundary.
                    hole.push_back((eb, region, area));
                    true
                } else {
                    false
                };
                if added {
                    // The edge segment was added, remove it.
                    edges.swap_remove(i);
                    matched = true;
                } else {
                    i += 1;
                }
            }
            if !matched {
                break;
            }
        }

        // Generate temp vertex array for triangulation.
        let hole_vertices: Vec<UVec4> = hole
            .iter()
            .map(|(v, _, _)| {
                let p = self.vertices[*v as usize];
                UVec4::new(p.x as u32, p.y as u32, p.z as u32, 0)
            })
            .collect();
        let mut indices: Vec<u32> = (0..hole.len() as u32).collect();
        let mut tris = Vec::with_capacity(hole.len());

        // Triangulate the hole.
        let mut bad_triangulations = 0;
        if !triangulate(&hole_vertices, &mut indices, &mut tris) {
            warn!("triangulating the hole of a removed vertex returned bad results");
            bad_triangulations += 1;
        }

        // Merge the hole triangles back to polygons.
        let mut polys: Vec<WorkPolygon> = tris
            .iter()
            .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
            .map(|t| {
                let (v0, r0, a0) = hole[t[0]];
                let (v1, r1, _) = hole[t[1]];
                let (v2, r2, _) = hole[t[2]];
                // If this polygon covers multiple region types then mark it as such
                let region = if r0 != r1 || r1 != r2 { RegionId::NONE } else { r0 };
                WorkPolygon {
                    vertices: vec![v0, v1, v2],
                    region,
                    area: a0,
                }
            })
            .collect();
        if nvp > 3 {
            merge_polygons(&mut polys, &self.vertices, nvp);
        }

        // Store polygons.
        for poly in polys {
            if self.polygon_count() >= max_polygons {
                warn!("polygon budget exhausted while retriangulating a removed vertex");
                break;
            }
            self.push_polygon(&poly.vertices, poly.region, poly.area);
        }
        bad_triangulations
    }

    /// Fills the neighbor slots from the edges shared between polygons.
    fn build_adjacency(&mut self) {
        struct Edge {
            vert: [u16; 2],
            poly_edge: [usize; 2],
            poly: [usize; 2],
        }

        let nvp = self.vertices_per_polygon;
        let polygon_count = self.polygon_count();
        let mut first_edge: Vec<Option<usize>> = vec![None; self.vertices.len()];
        let mut next_edge: Vec<Option<usize>> = Vec::with_capacity(polygon_count * nvp);
        let mut edges: Vec<Edge> = Vec::with_capacity(polygon_count * nvp);

        for i in 0..polygon_count {
            let poly = self.polygon(i);
            let nv = poly.len();
            for j in 0..nv {
                let v0 = poly[j];
                let v1 = poly[next(j, nv)];
                if v0 < v1 {
                    edges.push(Edge {
                        vert: [v0, v1],
                        poly_edge: [j, 0],
                        poly: [i, i],
                    });
                    // Insert edge
                    next_edge.push(first_edge[v0 as usize]);
                    first_edge[v0 as usize] = Some(edges.len() - 1);
                }
            }
        }

        for i in 0..polygon_count {
            let poly = self.polygon(i);
            let nv = poly.len();
            for j in 0..nv {
                let v0 = poly[j];
                let v1 = poly[next(j, nv)];
                if v0 <= v1 {
                    continue;
                }
                let mut e = first_edge[v1 as usize];
                while let Some(ei) = e {
                    let edge = &mut edges[ei];
                    if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                        edge.poly[1] = i;
                        edge.poly_edge[1] = j;
                        break;
                    }
                    e = next_edge[ei];
                }
            }
        }

        // Store adjacency
        let stride = nvp * 2;
        for edge in edges.iter().filter(|edge| edge.poly[0] != edge.poly[1]) {
            self.polygons[edge.poly[0] * stride + nvp + edge.poly_edge[0]] = edge.poly[1] as u16;
            self.polygons[edge.poly[1] * stride + nvp + edge.poly_edge[1]] = edge.poly[0] as u16;
        }
    }

    /// Marks open edges on the outer rim of a tile as portals to the neighboring tile.
    fn mark_portal_edges(&mut self, width: u16, height: u16) {
        let nvp = self.vertices_per_polygon;
        let stride = nvp * 2;
        for i in 0..self.polygon_count() {
            let nv = self.polygon(i).len();
            for j in 0..nv {
                let slot = i * stride + nvp + j;
                // Skip connected edges.
                if self.polygons[slot] != RC_MESH_NULL_IDX {
                    continue;
                }
                let va = self.vertices[self.polygons[i * stride + j] as usize];
                let vb = self.vertices[self.polygons[i * stride + next(j, nv)] as usize];
                let side = if va.x == 0 && vb.x == 0 {
                    Some(0)
                } else if va.z == height && vb.z == height {
                    Some(1)
                } else if va.x == width && vb.x == width {
                    Some(2)
                } else if va.z == 0 && vb.z == 0 {
                    Some(3)
                } else {
                    None
                };
                if let Some(side) = side {
                    self.polygons[slot] = 0x8000 | side;
                }
            }
        }
    }
}

impl ContourSet {
    /// Builds a polygon mesh from the contours.
    ///
    /// Each contour is triangulated and the triangles are greedily merged into convex polygons
    /// of at most `vertices_per_polygon` vertices. Vertices on tile borders are removed and
    /// the neighbor links between polygons are filled in.
    pub fn into_polygon_mesh(
        self,
        vertices_per_polygon: usize,
    ) -> Result<PolygonMesh, PolygonMeshError> {
        self.build_polygon_mesh(vertices_per_polygon)
            .map(|(mesh, _)| mesh)
    }

    /// Builds the polygon mesh and returns it together with the number of contours that could only be
    /// partially triangulated.
    pub(crate) fn build_polygon_mesh(
        &self,
        nvp: usize,
    ) -> Result<(PolygonMesh, usize), PolygonMeshError> {
        if !(3..=MAX_VERTICES_PER_POLYGON).contains(&nvp) {
            return Err(PolygonMeshError::InvalidVerticesPerPolygon {
                vertices_per_polygon: nvp,
            });
        }

        let mut max_vertices = 0;
        let mut max_tris = 0;
        let mut max_verts_per_contour = 0;
        for contour in self.contours.iter().filter(|c| c.vertices.len() >= 3) {
            max_vertices += contour.vertices.len();
            max_tris += contour.vertices.len() - 2;
            max_verts_per_contour = max_verts_per_contour.max(contour.vertices.len());
        }
        if max_vertices >= RC_MESH_NULL_IDX as usize - 1 {
            return Err(PolygonMeshError::TooManyVertices {
                vertex_count: max_vertices,
            });
        }

        let mut mesh = PolygonMesh {
            vertices: Vec::with_capacity(max_vertices),
            polygons: Vec::with_capacity(max_tris * nvp * 2),
            regions: Vec::with_capacity(max_tris),
            flags: Vec::new(),
            areas: Vec::with_capacity(max_tris),
            max_polygons: max_tris,
            vertices_per_polygon: nvp,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            border_size: self.border_size,
            max_edge_error: self.max_error,
        };

        let mut remove_flags = vec![false; max_vertices];
        let mut buckets = VertexBuckets::new(max_vertices);
        let mut indices: Vec<u32> = Vec::with_capacity(max_verts_per_contour);
        let mut tris = Vec::with_capacity(max_verts_per_contour);
        let mut polys: Vec<WorkPolygon> = Vec::with_capacity(max_verts_per_contour);
        let mut bad_triangulations = 0;

        for (i, contour) in self.contours.iter().enumerate() {
            if contour.vertices.len() < 3 {
                continue;
            }

            // Triangulate contour
            indices.clear();
            indices.extend(0..contour.vertices.len() as u32);
            if !triangulate(&contour.vertices, &mut indices, &mut tris) {
                // Bad triangulation, should not happen.
                warn!("bad triangulation of contour {i} (region {})", contour.region.bits());
                bad_triangulations += 1;
            }
            if tris.is_empty() {
                return Err(PolygonMeshError::NoTriangles {
                    region: contour.region,
                });
            }

            // Add and merge vertices.
            let vertex_indices: Vec<u16> = contour
                .vertices
                .iter()
                .map(|v| {
                    let index = buckets.add_vertex(
                        U16Vec3::new(v.x as u16, v.y as u16, v.z as u16),
                        &mut mesh.vertices,
                    );
                    if RegionVertexId::from_bits_retain(v.w).contains(RegionVertexId::BORDER_VERTEX)
                    {
                        // This vertex should be removed.
                        remove_flags[index as usize] = true;
                    }
                    index
                })
                .collect();

            // Build initial polygons.
            polys.clear();
            polys.extend(
                tris.iter()
                    .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
                    .map(|t| WorkPolygon {
                        vertices: vec![
                            vertex_indices[t[0]],
                            vertex_indices[t[1]],
                            vertex_indices[t[2]],
                        ],
                        region: contour.region,
                        area: contour.area,
                    }),
            );
            if polys.is_empty() {
                continue;
            }

            // Merge polygons.
            if nvp > 3 {
                merge_polygons(&mut polys, &mesh.vertices, nvp);
            }

            // Store polygons.
            for poly in &polys {
                mesh.push_polygon(&poly.vertices, contour.region, contour.area);
            }
        }

        // Remove edge vertices.
        let mut i = 0;
        while i < mesh.vertices.len() {
            if remove_flags.get(i).copied().unwrap_or(false) && mesh.can_remove_vertex(i as u16) {
                bad_triangulations += mesh.remove_vertex(i as u16, max_tris);
                // The vertex at `i` is now the former `i + 1`, check it next.
                remove_flags.remove(i);
                continue;
            }
            i += 1;
        }

        // Calculate adjacency.
        mesh.build_adjacency();

        // Find portal edges
        if mesh.border_size > 0 {
            mesh.mark_portal_edges(self.width, self.height);
        }

        // Just allocate the mesh flags array. The user is responsible to fill it.
        mesh.flags = vec![0; mesh.polygon_count()];

        if mesh.polygon_count() > RC_MESH_NULL_IDX as usize {
            return Err(PolygonMeshError::TooManyPolygons {
                polygon_count: mesh.polygon_count(),
            });
        }

        debug!(
            "built polygon mesh with {} polygons and {} vertices",
            mesh.polygon_count(),
            mesh.vertices.len()
        );
        Ok((mesh, bad_triangulations))
    }
}

/// A polygon under construction.
#[derive(Debug, Clone)]
struct WorkPolygon {
    vertices: Vec<u16>,
    region: RegionId,
    area: AreaType,
}

/// Spatial hash welding vertices that share x and z and are within 2 units on y.
struct VertexBuckets {
    first: Vec<u16>,
    next: Vec<u16>,
}

impl VertexBuckets {
    fn new(capacity: usize) -> Self {
        Self {
            first: vec![RC_MESH_NULL_IDX; VERTEX_BUCKET_COUNT],
            next: Vec::with_capacity(capacity),
        }
    }

    fn add_vertex(&mut self, vertex: U16Vec3, vertices: &mut Vec<U16Vec3>) -> u16 {
        let bucket = vertex_hash(vertex.x, vertex.z);
        let mut i = self.first[bucket];
        while i != RC_MESH_NULL_IDX {
            let existing = vertices[i as usize];
            if existing.x == vertex.x && existing.y.abs_diff(vertex.y) <= 2 && existing.z == vertex.z {
                return i;
            }
            i = self.next[i as usize];
        }

        // Could not find, create new.
        let i = vertices.len() as u16;
        vertices.push(vertex);
        self.next.push(self.first[bucket]);
        self.first[bucket] = i;
        i
    }
}

fn vertex_hash(x: u16, z: u16) -> usize {
    // Large multiplicative constants, arbitrarily chosen primes.
    const H1: u32 = 0x8da6_b343;
    const H3: u32 = 0xcb1a_b31f;
    let n = H1.wrapping_mul(x as u32).wrapping_add(H3.wrapping_mul(z as u32));
    n as usize & (VERTEX_BUCKET_COUNT - 1)
}

/// Twice the unsigned area of a polygon on the xz-plane.
fn polygon_area2(polygon: &[u16], vertices: &[U16Vec3]) -> i32 {
    let n = polygon.len();
    let area: i32 = (0..n)
        .map(|i| {
            let a = vertices[polygon[i] as usize].xz();
            let b = vertices[polygon[next(i, n)] as usize].xz();
            a.x * b.y - b.x * a.y
        })
        .sum();
    area.abs()
}

/// Merged area, then the shorter shared edge.
type MergeValue = (i32, Reverse<i32>);

/// Checks whether `pa` and `pb` share an edge and form a convex polygon of at most `nvp`
/// vertices when merged. Returns the merge value and the shared edge in both polygons.
fn poly_merge_value(
    pa: &[u16],
    pb: &[u16],
    vertices: &[U16Vec3],
    nvp: usize,
) -> Option<(MergeValue, usize, usize)> {
    let na = pa.len();
    let nb = pb.len();

    // If the merged polygon would be too big, do not merge.
    if na + nb - 2 > nvp {
        return None;
    }

    // Check if the polygons share an edge.
    let sorted = |a: u16, b: u16| if a > b { (b, a) } else { (a, b) };
    let (ea, eb) = (0..na).find_map(|i| {
        let edge_a = sorted(pa[i], pa[next(i, na)]);
        (0..nb)
            .find(|&j| sorted(pb[j], pb[next(j, nb)]) == edge_a)
            .map(|j| (i, j))
    })?;

    // Check to see if the merged polygon would be convex.
    let v = |i: u16| vertices[i as usize].xz();
    if !left(v(pa[(ea + na - 1) % na]), v(pa[ea]), v(pb[(eb + 2) % nb])) {
        return None;
    }
    if !left(v(pb[(eb + nb - 1) % nb]), v(pb[eb]), v(pa[(ea + 2) % na])) {
        return None;
    }

    let edge = v(pa[ea]) - v(pa[next(ea, na)]);
    let area = polygon_area2(pa, vertices) + polygon_area2(pb, vertices);
    Some(((area, Reverse(edge.length_squared())), ea, eb))
}

/// Joins `pb` into `pa` along their shared edge `ea`/`eb`.
fn merge_poly_verts(pa: &[u16], pb: &[u16], ea: usize, eb: usize) -> Vec<u16> {
    let na = pa.len();
    let nb = pb.len();
    let mut merged = Vec::with_capacity(na + nb - 2);
    // Add pa
    merged.extend((0..na - 1).map(|i| pa[(ea + 1 + i) % na]));
    // Add pb
    merged.extend((0..nb - 1).map(|i| pb[(eb + 1 + i) % nb]));
    merged
}

/// Greedily merges pairs of polygons until no pair can be merged into a convex polygon.
/// Each step takes the pair with the largest merged area, then the shortest shared edge,
/// then the earliest pair.
fn merge_polygons(polys: &mut Vec<WorkPolygon>, vertices: &[U16Vec3], nvp: usize) {
    loop {
        // Find best polygons to merge.
        let mut best: Option<(MergeValue, usize, usize, usize, usize)> = None;
        for j in 0..polys.len() {
            for k in j + 1..polys.len() {
                let Some((value, ea, eb)) =
                    poly_merge_value(&polys[j].vertices, &polys[k].vertices, vertices, nvp)
                else {
                    continue;
                };
                if best.as_ref().is_none_or(|best| value > best.0) {
                    best = Some((value, j, k, ea, eb));
                }
            }
        }

        let Some((_, a, b, ea, eb)) = best else {
            break;
        };
        // Found best, merge.
        let pb = polys.swap_remove(b);
        let pa = &mut polys[a];
        pa.vertices = merge_poly_verts(&pa.vertices, &pb.vertices, ea, eb);
        if pa.region != pb.region {
            pa.region = RegionId::NONE;
        }
    }
}

fn vertex_at(vertices: &[UVec4], indices: &[u32], i: usize) -> IVec2 {
    vertices[(indices[i] & INDEX_MASK) as usize].xz()
}

/// Returns true iff `(v_i, v_j)` is a proper internal diagonal of the polygon.
fn in_cone(i: usize, j: usize, vertices: &[UVec4], indices: &[u32]) -> bool {
    let n = indices.len();
    let pi = vertex_at(vertices, indices, i);
    let pj = vertex_at(vertices, indices, j);
    let pi1 = vertex_at(vertices, indices, next(i, n));
    let pin1 = vertex_at(vertices, indices, prev(i, n));

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Like [`in_cone`], but accepts diagonals lying on the cone boundary.
fn in_cone_loose(i: usize, j: usize, vertices: &[UVec4], indices: &[u32]) -> bool {
    let n = indices.len();
    let pi = vertex_at(vertices, indices, i);
    let pj = vertex_at(vertices, indices, j);
    let pi1 = vertex_at(vertices, indices, next(i, n));
    let pin1 = vertex_at(vertices, indices, prev(i, n));

    if left_on(pin1, pi, pi1) {
        return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Returns true iff `(v_i, v_j)` does not cross any polygon edge that is not incident to it.
fn diagonalie(
    i: usize,
    j: usize,
    vertices: &[UVec4],
    indices: &[u32],
    crosses: fn(IVec2, IVec2, IVec2, IVec2) -> bool,
) -> bool {
    let n = indices.len();
    let d0 = vertex_at(vertices, indices, i);
    let d1 = vertex_at(vertices, indices, j);

    // For each edge (k,k+1) of P
    (0..n).all(|k| {
        let k1 = next(k, n);
        // Skip edges incident to i or j
        if k == i || k1 == i || k == j || k1 == j {
            return true;
        }
        let p0 = vertex_at(vertices, indices, k);
        let p1 = vertex_at(vertices, indices, k1);
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            return true;
        }
        !crosses(d0, d1, p0, p1)
    })
}

fn diagonal(i: usize, j: usize, vertices: &[UVec4], indices: &[u32]) -> bool {
    in_cone(i, j, vertices, indices) && diagonalie(i, j, vertices, indices, intersect)
}

fn diagonal_loose(i: usize, j: usize, vertices: &[UVec4], indices: &[u32]) -> bool {
    in_cone_loose(i, j, vertices, indices)
        && diagonalie(i, j, vertices, indices, intersect_prop)
}

/// Ear-clips the polygon `indices` into `vertices`, always cutting the shortest diagonal first.
///
/// Returns `false` if the polygon could only be partially triangulated, in which case `tris`
/// holds the triangles found so far.
fn triangulate(vertices: &[UVec4], indices: &mut Vec<u32>, tris: &mut Vec<[usize; 3]>) -> bool {
    tris.clear();
    if indices.len() < 3 {
        return false;
    }

    let set_removable = |indices: &mut [u32], i: usize, removable: bool| {
        if removable {
            indices[i] |= REMOVABLE;
        } else {
            indices[i] &= INDEX_MASK;
        }
    };
    let index = |indices: &[u32], i: usize| (indices[i] & INDEX_MASK) as usize;

    // The last bit of the index is used to indicate if the vertex can be removed.
    let n = indices.len();
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, vertices, indices) {
            indices[i1] |= REMOVABLE;
        }
    }

    while indices.len() > 3 {
        let n = indices.len();
        let diagonal_length = |i: usize, indices: &[u32]| {
            let i2 = next(next(i, n), n);
            (vertex_at(vertices, indices, i2) - vertex_at(vertices, indices, i)).length_squared()
        };

        let mut best: Option<(i32, usize)> = None;
        for i in 0..n {
            if indices[next(i, n)] & REMOVABLE != 0 {
                let len = diagonal_length(i, indices);
                if best.is_none_or(|(min_len, _)| len < min_len) {
                    best = Some((len, i));
                }
            }
        }

        if best.is_none() {
            // We might get here because the contour has overlapping segments, like this:
            //
            //  A o-o=====o---o B
            //   /  |C   D|    \.
            //  o   o     o     o
            //  :   :     :     :
            // We'll try to recover by loosing up the inCone test a bit so that a diagonal
            // like A-B or C-D can be found and we can continue.
            for i in 0..n {
                let i2 = next(next(i, n), n);
                if diagonal_loose(i, i2, vertices, indices) {
                    let len = diagonal_length(i, indices);
                    if best.is_none_or(|(min_len, _)| len < min_len) {
                        best = Some((len, i));
                    }
                }
            }
        }

        let Some((_, i)) = best else {
            // The contour is messed up. This sometimes happens
            // if the contour simplification is too aggressive.
            return false;
        };

        let i1 = next(i, n);
        let i2 = next(i1, n);
        tris.push([index(indices, i), index(indices, i1), index(indices, i2)]);

        // Removes P[i1] by copying P[i+1]...P[n-1] left one index.
        indices.remove(i1);
        let n = indices.len();
        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);

        // Update diagonal flags.
        let removable = diagonal(prev(i, n), i1, vertices, indices);
        set_removable(indices, i, removable);
        let removable = diagonal(i, next(i1, n), vertices, indices);
        set_removable(indices, i1, removable);
    }

    // Append the remaining triangle.
    tris.push([index(indices, 0), index(indices, 1), index(indices, 2)]);
    true
}

/// Errors that can occur while building a [`PolygonMesh`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolygonMeshError {
    /// The requested polygon size is not supported.
    #[error("vertices per polygon must be within 3..={MAX_VERTICES_PER_POLYGON}, got {vertices_per_polygon}")]
    InvalidVerticesPerPolygon {
        /// The requested number of vertices per polygon.
        vertices_per_polygon: usize,
    },
    /// The contours have more vertices than a polygon mesh can index.
    #[error("too many vertices: {vertex_count}, the maximum is {}", RC_MESH_NULL_IDX - 1)]
    TooManyVertices {
        /// The number of contour vertices.
        vertex_count: usize,
    },
    /// The mesh has more polygons than neighbor links can address.
    #[error("too many polygons: {polygon_count}, the maximum is {RC_MESH_NULL_IDX}")]
    TooManyPolygons {
        /// The number of polygons.
        polygon_count: usize,
    },
    /// A contour did not produce a single triangle.
    #[error("contour of region {} could not be triangulated", region.bits())]
    NoTriangles {
        /// The region of the contour.
        region: RegionId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BuildContoursFlags, distance_field::tests::flat_field};

    fn square_contours(size: u16) -> ContourSet {
        let mut chf = flat_field(size);
        chf.build_distance_field();
        chf.build_regions(0, 0, 0).unwrap();
        chf.build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .unwrap()
    }

    #[test]
    fn square_contour_merges_into_one_quad() {
        let mesh = square_contours(10).into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.polygon(0).len(), 4);
        assert!(mesh.neighbors(0).iter().all(|n| *n == RC_MESH_NULL_IDX));
        assert_eq!(mesh.regions[0], RegionId::from(1));
        assert_eq!(mesh.flags, vec![0]);
        assert_eq!(mesh.polygons.len(), 12);
    }

    #[test]
    fn triangles_only_are_linked_as_neighbors() {
        let mesh = square_contours(10).into_polygon_mesh(3).unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        for i in 0..2 {
            assert_eq!(mesh.polygon(i).len(), 3);
            let links: Vec<_> = mesh
                .neighbors(i)
                .iter()
                .filter(|n| **n != RC_MESH_NULL_IDX)
                .collect();
            assert_eq!(links, vec![&((1 - i) as u16)], "polygon {i}");
        }
    }

    #[test]
    fn world_vertices_stay_within_the_bounds() {
        let mesh = square_contours(10).into_polygon_mesh(6).unwrap();
        for i in 0..mesh.vertices.len() {
            let v = mesh.world_vertex(i);
            assert!(v.x >= mesh.aabb.min.x && v.x <= mesh.aabb.max.x + 1e-4);
            assert!(v.z >= mesh.aabb.min.z && v.z <= mesh.aabb.max.z + 1e-4);
        }
    }

    #[test]
    fn rejects_unsupported_polygon_sizes() {
        let contours = square_contours(6);
        assert_eq!(
            contours.clone().into_polygon_mesh(2),
            Err(PolygonMeshError::InvalidVerticesPerPolygon {
                vertices_per_polygon: 2
            })
        );
        assert!(contours.into_polygon_mesh(13).is_err());
    }

    #[test]
    fn concave_outline_is_triangulated_completely() {
        // An L-shape.
        let vertices: Vec<UVec4> = [(0, 0), (0, 4), (2, 4), (2, 2), (4, 2), (4, 0)]
            .into_iter()
            .map(|(x, z)| UVec4::new(x, 0, z, 0))
            .collect();
        let mut indices: Vec<u32> = (0..vertices.len() as u32).collect();
        let mut tris = Vec::new();
        assert!(triangulate(&vertices, &mut indices, &mut tris));
        assert_eq!(tris.len(), vertices.len() - 2);
    }

    #[test]
    fn vertices_are_welded_within_the_height_tolerance() {
        let mut buckets = VertexBuckets::new(4);
        let mut vertices = Vec::new();
        let a = buckets.add_vertex(U16Vec3::new(3, 10, 4), &mut vertices);
        let b = buckets.add_vertex(U16Vec3::new(3, 12, 4), &mut vertices);
        let c = buckets.add_vertex(U16Vec3::new(3, 13, 4), &mut vertices);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(vertices.len(), 2);
    }

    #[test]
    fn merge_prefers_the_largest_polygon() {
        //      5
        //  1 ----- 2
        //  |       |   4
        //  0 ----- 3
        // Both triangles can be merged into the square, the larger one wins.
        let vertices: Vec<U16Vec3> = [(0, 0), (0, 2), (2, 2), (2, 0), (5, 1), (1, 3)]
            .into_iter()
            .map(|(x, z)| U16Vec3::new(x, 0, z))
            .collect();
        let polygon = |vertices: Vec<u16>| WorkPolygon {
            vertices,
            region: RegionId::from(1),
            area: AreaType::DEFAULT_WALKABLE,
        };
        let mut polys = vec![
            polygon(vec![0, 1, 2, 3]),
            polygon(vec![2, 1, 5]),
            polygon(vec![3, 2, 4]),
        ];
        merge_polygons(&mut polys, &vertices, 5);
        assert_eq!(polys.len(), 2);
        assert_eq!(polys[0].vertices.len(), 5);
        assert!(polys[0].vertices.contains(&4));
        assert_eq!(polys[1].vertices, vec![2, 1, 5]);
    }

    #[test]
    fn collinear_merges_are_rejected() {
        let vertices: Vec<U16Vec3> = [(0, 0), (0, 2), (2, 2), (2, 0), (0, 4), (2, 4)]
            .into_iter()
            .map(|(x, z)| U16Vec3::new(x, 0, z))
            .collect();
        assert!(poly_merge_value(&[0, 1, 2, 3], &[1, 4, 5, 2], &vertices, 6).is_none());
    }
}
