use std::collections::{TryReserveError, VecDeque};

use glam::{IVec3, U16Vec3, Vec2, Vec3A, Vec3Swizzles as _};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    CompactHeightfield, PolygonMesh, RegionId,
    math::{dir_offset_x, dir_offset_z, next, prev},
};

/// Contains triangle meshes that represent detailed height data associated
/// with the polygons in its associated polygon mesh object.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailNavmesh {
    /// The sub-mesh data, one per polygon of the source mesh.
    pub meshes: Vec<SubMesh>,
    /// The mesh vertices in world space.
    pub vertices: Vec<Vec3A>,
    /// The mesh triangles. Indices are local to the sub-mesh they belong to.
    pub triangles: Vec<DetailTriangle>,
}

/// The slice of a [`DetailNavmesh`] covering one polygon.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SubMesh {
    /// Index of the first vertex of this sub-mesh in [`DetailNavmesh::vertices`].
    pub first_vertex_index: usize,
    /// Number of vertices in this sub-mesh.
    pub vertex_count: usize,
    /// Index of the first triangle of this sub-mesh in [`DetailNavmesh::triangles`].
    pub first_triangle_index: usize,
    /// Number of triangles in this sub-mesh.
    pub triangle_count: usize,
}

impl SubMesh {
    /// Translates a local triangle index into an index of [`DetailNavmesh::vertices`].
    #[inline]
    pub fn global_vertex_index(&self, local: u8) -> usize {
        self.first_vertex_index + local as usize
    }
}

/// A triangle of a [`DetailNavmesh`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailTriangle {
    /// Vertex indices, local to the owning [`SubMesh`].
    pub vertices: [u8; 3],
    /// Two bits per edge, starting with the edge `vertices[0] -> vertices[1]`.
    /// [`DetailTriangle::EDGE_BOUNDARY`] marks an edge on the polygon outline.
    pub flags: u8,
}

impl DetailTriangle {
    /// Marks an edge that lies on the outline of the source polygon.
    pub const EDGE_BOUNDARY: u8 = 0x1;

    /// Whether edge `edge` (0, 1 or 2) lies on the outline of the source polygon.
    #[inline]
    pub fn is_boundary_edge(&self, edge: usize) -> bool {
        (self.flags >> (edge * 2)) & Self::EDGE_BOUNDARY != 0
    }
}

const RC_UNSET_HEIGHT: u16 = 0xffff;
const MAX_VERTS: usize = 127;
// Max tris for delaunay is 2n-2-k (n=num verts, k=num hull verts).
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

impl DetailNavmesh {
    /// Builds a detail mesh from the provided polygon mesh.
    ///
    /// `sample_distance` is the sampling spacing in world units, zero disables sampling so that
    /// every polygon is only triangulated. `sample_max_error` is the largest tolerated height
    /// deviation in world units.
    pub fn new(
        mesh: &PolygonMesh,
        heightfield: &CompactHeightfield,
        sample_distance: f32,
        sample_max_error: f32,
    ) -> Result<Self, DetailNavmeshError> {
        Self::build(mesh, heightfield, sample_distance, sample_max_error).map(|(dmesh, _)| dmesh)
    }

    /// Builds the detail mesh and returns it together with the number of polygons whose detail
    /// triangulation was truncated or failed.
    pub(crate) fn build(
        mesh: &PolygonMesh,
        chf: &CompactHeightfield,
        sample_distance: f32,
        sample_max_error: f32,
    ) -> Result<(Self, usize), DetailNavmeshError> {
        let mut dmesh = DetailNavmesh::default();
        if mesh.vertices.is_empty() || mesh.polygon_count() == 0 {
            return Ok((dmesh, 0));
        }
        let cs = mesh.cell_size;
        let ch = mesh.cell_height;
        let orig = mesh.aabb.min;
        let border_size = mesh.border_size;
        let height_search_radius = 1.max(mesh.max_edge_error.ceil() as i32);

        let mut bounds = Vec::with_capacity(mesh.polygon_count());
        let mut max_hw = 0;
        let mut max_hh = 0;
        let mut poly_vert_count = 0;

        // Find max size for a polygon area.
        for i in 0..mesh.polygon_count() {
            let poly = mesh.polygon(i);
            let mut b = Bounds {
                xmin: chf.width,
                xmax: 0,
                zmin: chf.height,
                zmax: 0,
            };
            for v in poly.iter().map(|v| mesh.vertices[*v as usize]) {
                b.xmin = b.xmin.min(v.x);
                b.xmax = b.xmax.max(v.x);
                b.zmin = b.zmin.min(v.z);
                b.zmax = b.zmax.max(v.z);
            }
            poly_vert_count += poly.len();
            b.xmin = b.xmin.saturating_sub(1);
            b.xmax = chf.width.min(b.xmax + 1);
            b.zmin = b.zmin.saturating_sub(1);
            b.zmax = chf.height.min(b.zmax + 1);
            if b.xmin < b.xmax && b.zmin < b.zmax {
                max_hw = max_hw.max(b.width());
                max_hh = max_hh.max(b.height());
            }
            bounds.push(b);
        }

        let mut hp = HeightPatch {
            data: vec![RC_UNSET_HEIGHT; max_hw as usize * max_hh as usize],
            ..Default::default()
        };

        dmesh.meshes.try_reserve_exact(mesh.polygon_count())?;
        dmesh
            .vertices
            .try_reserve(poly_vert_count + poly_vert_count / 2)?;
        dmesh.triangles.try_reserve(poly_vert_count * 3)?;

        let mut queue = VecDeque::with_capacity(512 / 3);
        let mut work = PolyDetail::default();
        let mut poly_verts = Vec::with_capacity(mesh.vertices_per_polygon);
        let mut failures = 0;

        for (i, b) in bounds.iter().enumerate() {
            let poly = mesh.polygon(i);

            // Store polygon vertices for processing.
            poly_verts.clear();
            poly_verts.extend(poly.iter().map(|v| {
                Vec3A::from(mesh.vertices[*v as usize].as_vec3()) * Vec3A::new(cs, ch, cs)
            }));

            // Get the height data from the area of the polygon.
            hp.xmin = b.xmin;
            hp.zmin = b.zmin;
            hp.width = b.width();
            hp.height = b.height();
            if hp.width == 0 || hp.height == 0 {
                warn!("polygon {i} has an empty footprint, skipping its detail mesh");
                dmesh.meshes.push(SubMesh {
                    first_vertex_index: dmesh.vertices.len(),
                    first_triangle_index: dmesh.triangles.len(),
                    ..Default::default()
                });
                failures += 1;
                continue;
            }
            hp.get_height_data(
                chf,
                poly,
                &mesh.vertices,
                border_size,
                &mut queue,
                mesh.regions[i],
            )
            .map_err(|()| DetailNavmeshError::NoSeedSpan { polygon: i })?;

            // Build detail mesh.
            let outcome = work.build(
                &poly_verts,
                sample_distance,
                sample_max_error,
                height_search_radius,
                chf,
                &hp,
            );
            if outcome != DetailOutcome::Complete {
                failures += 1;
            }

            // Store detail submesh
            dmesh.meshes.push(SubMesh {
                first_vertex_index: dmesh.vertices.len(),
                vertex_count: work.verts.len(),
                first_triangle_index: dmesh.triangles.len(),
                triangle_count: work.tris.len(),
            });

            // Move detail verts to world space.
            dmesh.vertices.try_reserve(work.verts.len())?;
            dmesh.vertices.extend(work.verts.iter().map(|v| {
                let mut v = *v + orig;
                // Lift the surface onto the top of the spans.
                v.y += chf.cell_height;
                v
            }));

            dmesh.triangles.try_reserve(work.tris.len())?;
            dmesh.triangles.extend(work.tris.iter().map(|t| DetailTriangle {
                vertices: [t.vertices[0] as u8, t.vertices[1] as u8, t.vertices[2] as u8],
                flags: t.flags,
            }));
        }

        debug!(
            "built detail mesh with {} vertices and {} triangles",
            dmesh.vertices.len(),
            dmesh.triangles.len()
        );
        Ok((dmesh, failures))
    }

    /// All triangles of all sub-meshes, with indices into [`DetailNavmesh::vertices`].
    pub fn global_triangles(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        self.meshes.iter().flat_map(move |sub_mesh| {
            self.triangles[sub_mesh.first_triangle_index..][..sub_mesh.triangle_count]
                .iter()
                .map(move |t| t.vertices.map(|v| sub_mesh.global_vertex_index(v)))
        })
    }
}

/// Errors that can occur while building a [`DetailNavmesh`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetailNavmeshError {
    /// No span of the compact heightfield lies under the polygon.
    #[error("found no span under polygon {polygon} to sample heights from")]
    NoSeedSpan {
        /// The polygon index.
        polygon: usize,
    },
    /// The detail mesh arrays could not be allocated.
    #[error("Failed to allocate detail mesh: {0}")]
    AllocationFailed(#[from] TryReserveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetailOutcome {
    Complete,
    /// The polygon could not be triangulated at all.
    Untriangulated,
    /// Triangles had to be dropped to fit the local index range.
    Truncated,
}

#[derive(Debug, Clone, Copy, Default)]
struct WorkTriangle {
    vertices: [usize; 3],
    flags: u8,
}

/// Scratch buffers reused across polygons.
#[derive(Debug, Default)]
struct PolyDetail {
    verts: Vec<Vec3A>,
    tris: Vec<WorkTriangle>,
    hull: Vec<usize>,
    edges: Vec<DelaunayEdge>,
    samples: Vec<Sample>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    position: IVec3,
    added: bool,
}

impl PolyDetail {
    fn build(
        &mut self,
        poly: &[Vec3A],
        sample_dist: f32,
        sample_max_error: f32,
        height_search_radius: i32,
        chf: &CompactHeightfield,
        hp: &HeightPatch,
    ) -> DetailOutcome {
        let nin = poly.len();
        self.verts.clear();
        self.verts.extend_from_slice(poly);
        self.tris.clear();
        self.hull.clear();
        self.edges.clear();

        let cs = chf.cell_size;
        let ch = chf.cell_height;
        let ics = 1.0 / cs;

        // Calculate minimum extents of the polygon based on input data.
        let min_extent_squared = poly_min_extent_squared(poly);

        // Tessellate outlines.
        // This is done in separate pass in order to ensure
        // seamless height values across the ply boundaries.
        if sample_dist > 0.0 {
            let mut edge = [Vec3A::ZERO; MAX_VERTS_PER_EDGE + 1];
            let mut idx: Vec<usize> = Vec::with_capacity(MAX_VERTS_PER_EDGE);
            for i in 0..nin {
                let j = prev(i, nin);
                let mut vj = poly[j];
                let mut vi = poly[i];
                let mut swapped = false;
                // Make sure the segments are always handled in same order
                // using lexological sort or else there will be seams.
                if (vj.x - vi.x).abs() < 1.0e-6 {
                    if vj.z > vi.z {
                        std::mem::swap(&mut vj, &mut vi);
                        swapped = true;
                    }
                } else if vj.x > vi.x {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }
                // Create samples along the edge.
                let dij = vi - vj;
                let d = dij.xz().length();
                let nn = (1 + (d / sample_dist).floor() as usize)
                    .min(MAX_VERTS_PER_EDGE - 1)
                    .min((MAX_VERTS - 1).saturating_sub(self.verts.len()))
                    .max(1);
                for (k, pos) in edge[..=nn].iter_mut().enumerate() {
                    let u = k as f32 / nn as f32;
                    *pos = vj + dij * u;
                    pos.y = get_height(*pos, ics, ch, height_search_radius, hp) as f32 * ch;
                }

                // Simplify samples.
                idx.clear();
                idx.extend([0, nn]);
                let mut k = 0;
                while k + 1 < idx.len() {
                    let a = idx[k];
                    let b = idx[k + 1];
                    let va = edge[a];
                    let vb = edge[b];
                    // Find maximum deviation along the segment.
                    let mut max_d = 0.0;
                    let mut max_i = None;
                    for (m, pos) in edge.iter().enumerate().take(b).skip(a + 1) {
                        let dev = distance_point_segment_sqr(*pos, va, vb);
                        if dev > max_d {
                            max_d = dev;
                            max_i = Some(m);
                        }
                    }
                    // If the max deviation is larger than accepted error,
                    // add new point, else continue to next segment.
                    match max_i {
                        Some(max_i) if max_d > sample_max_error * sample_max_error => {
                            idx.insert(k + 1, max_i);
                        }
                        _ => k += 1,
                    }
                }

                self.hull.push(j);
                // Add new vertices.
                let inner = &idx[1..idx.len() - 1];
                if swapped {
                    for k in inner.iter().rev() {
                        self.hull.push(self.verts.len());
                        self.verts.push(edge[*k]);
                    }
                } else {
                    for k in inner {
                        self.hull.push(self.verts.len());
                        self.verts.push(edge[*k]);
                    }
                }
            }
        } else {
            self.hull.extend(0..nin);
        }

        // If the polygon minimum extent is small (sliver or small triangle), do not try to add internal points.
        if min_extent_squared < (sample_dist * 2.0) * (sample_dist * 2.0) {
            triangulate_hull(&self.verts, &self.hull, nin, &mut self.tris);
            set_tri_flags(&mut self.tris, &self.hull);
            return DetailOutcome::Complete;
        }

        // Tessellate the base mesh.
        // We're using the triangulateHull instead of delaunayHull as it tends to
        // create a bit better triangulation for long thin triangles when there
        // are no internal points.
        triangulate_hull(&self.verts, &self.hull, nin, &mut self.tris);

        if self.tris.is_empty() {
            // Could not triangulate the poly, make sure there is some valid data there.
            warn!("could not triangulate polygon ({} verts)", self.verts.len());
            return DetailOutcome::Untriangulated;
        }

        if sample_dist > 0.0 {
            // Create sample locations in a grid.
            let (bmin, bmax) = poly[1..]
                .iter()
                .fold((poly[0], poly[0]), |(min, max), v| (min.min(*v), max.max(*v)));
            let x0 = (bmin.x / sample_dist).floor() as i32;
            let x1 = (bmax.x / sample_dist).ceil() as i32;
            let z0 = (bmin.z / sample_dist).floor() as i32;
            let z1 = (bmax.z / sample_dist).ceil() as i32;
            self.samples.clear();
            for z in z0..z1 {
                for x in x0..x1 {
                    let pt = Vec3A::new(
                        x as f32 * sample_dist,
                        (bmax.y + bmin.y) * 0.5,
                        z as f32 * sample_dist,
                    );
                    // Make sure the samples are not too close to the edges.
                    if dist_to_poly(poly, pt) > -sample_dist / 2.0 {
                        continue;
                    }
                    let y = get_height(pt, ics, ch, height_search_radius, hp);
                    self.samples.push(Sample {
                        position: IVec3::new(x, y as i32, z),
                        added: false,
                    });
                }
            }

            // Add the samples starting from the one that has the most
            // error. The procedure stops when all samples are added
            // or when the max error is within treshold.
            for _ in 0..self.samples.len() {
                if self.verts.len() >= MAX_VERTS {
                    break;
                }

                // Find sample with most error.
                let mut best: Option<(f32, usize, Vec3A)> = None;
                for (i, sample) in self.samples.iter().enumerate() {
                    if sample.added {
                        continue;
                    }
                    // The sample location is jittered to get rid of some bad triangulations
                    // which are cause by symmetrical data from the grid structure.
                    let pt = Vec3A::new(
                        sample.position.x as f32 * sample_dist + jitter_x(i) * cs * 0.1,
                        sample.position.y as f32 * ch,
                        sample.position.z as f32 * sample_dist + jitter_z(i) * cs * 0.1,
                    );
                    // Samples that miss the mesh are skipped.
                    let Some(d) = dist_to_tri_mesh(pt, &self.verts, &self.tris) else {
                        continue;
                    };
                    if best.is_none_or(|(best_d, _, _)| d > best_d) {
                        best = Some((d, i, pt));
                    }
                }
                // If the max error is within accepted threshold, stop tesselating.
                let Some((best_d, best_i, best_pt)) = best else {
                    break;
                };
                if best_d <= sample_max_error {
                    break;
                }
                // Mark sample as added.
                self.samples[best_i].added = true;
                // Add the new sample point.
                self.verts.push(best_pt);

                // Create new triangulation.
                // TODO: insert the sample into the existing triangulation instead of rebuilding it.
                delaunay_hull(&self.verts, &self.hull, &mut self.tris, &mut self.edges);
            }
        }

        let mut outcome = DetailOutcome::Complete;
        if self.tris.len() > MAX_TRIS {
            error!(
                "too many detail triangles, shrinking triangle count from {} to {MAX_TRIS}",
                self.tris.len()
            );
            self.tris.truncate(MAX_TRIS);
            outcome = DetailOutcome::Truncated;
        }
        set_tri_flags(&mut self.tris, &self.hull);
        outcome
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeFace {
    Undefined,
    Hull,
    Face(usize),
}

/// An edge of the Delaunay triangulation with the faces on both of its sides.
#[derive(Debug, Clone, Copy)]
struct DelaunayEdge {
    s: usize,
    t: usize,
    /// The face left of `s -> t`.
    left: EdgeFace,
    /// The face left of `t -> s`.
    right: EdgeFace,
}

impl DelaunayEdge {
    fn update_left_face(&mut self, s: usize, t: usize, face: EdgeFace) {
        if self.s == s && self.t == t && self.left == EdgeFace::Undefined {
            self.left = face;
        } else if self.t == s && self.s == t && self.right == EdgeFace::Undefined {
            self.right = face;
        }
    }
}

fn find_edge(edges: &[DelaunayEdge], s: usize, t: usize) -> Option<usize> {
    edges
        .iter()
        .position(|e| (e.s == s && e.t == t) || (e.s == t && e.t == s))
}

fn add_edge(
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    s: usize,
    t: usize,
    left: EdgeFace,
    right: EdgeFace,
) {
    if edges.len() >= max_edges {
        error!("too many Delaunay edges ({}/{max_edges})", edges.len());
        return;
    }
    // Add edge if not already in the triangulation.
    if find_edge(edges, s, t).is_none() {
        edges.push(DelaunayEdge { s, t, left, right });
    }
}

/// Twice the signed area of the triangle `p1 p2 p3` on the xz-plane.
fn vcross2(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> f32 {
    let u = p2.xz() - p1.xz();
    let v = p3.xz() - p1.xz();
    u.x * v.y - u.y * v.x
}

/// Circumcircle of three points on the xz-plane. `None` for collinear points.
fn circum_circle(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> Option<(Vec2, f32)> {
    const EPS: f32 = 1e-6;
    // Calculate the circle relative to p1, to avoid some precision issues.
    let v2 = p2.xz() - p1.xz();
    let v3 = p3.xz() - p1.xz();
    let cp = v2.x * v3.y - v2.y * v3.x;
    if cp.abs() <= EPS {
        return None;
    }
    let v2_sq = v2.length_squared();
    let v3_sq = v3.length_squared();
    let center = Vec2::new(
        (v2_sq * v3.y - v3_sq * v2.y) / (2.0 * cp),
        (v3_sq * v2.x - v2_sq * v3.x) / (2.0 * cp),
    );
    Some((center + p1.xz(), center.length()))
}

fn overlap_seg_seg_2d(a: Vec3A, b: Vec3A, c: Vec3A, d: Vec3A) -> bool {
    let a1 = vcross2(a, b, d);
    let a2 = vcross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = vcross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

fn overlap_edges(pts: &[Vec3A], edges: &[DelaunayEdge], s1: usize, t1: usize) -> bool {
    edges.iter().any(|e| {
        // Same or connected edges do not overlap.
        if e.s == s1 || e.s == t1 || e.t == s1 || e.t == t1 {
            return false;
        }
        overlap_seg_seg_2d(pts[e.s], pts[e.t], pts[s1], pts[t1])
    })
}

fn complete_facet(
    pts: &[Vec3A],
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    face_count: &mut usize,
    e: usize,
) {
    const EPS: f32 = 1e-5;
    const TOLERANCE: f32 = 0.001;

    // Cache s and t.
    let edge = edges[e];
    let (s, t) = if edge.left == EdgeFace::Undefined {
        (edge.s, edge.t)
    } else if edge.right == EdgeFace::Undefined {
        (edge.t, edge.s)
    } else {
        // Edge already completed.
        return;
    };

    // Find best point on left of edge.
    let mut pt = None;
    let mut circle: Option<(Vec2, f32)> = None;
    for u in 0..pts.len() {
        if u == s || u == t {
            continue;
        }
        if vcross2(pts[s], pts[t], pts[u]) <= EPS {
            continue;
        }
        let Some((center, radius)) = circle else {
            // The circle is not updated yet, do it now.
            pt = Some(u);
            circle = Some(circum_circle(pts[s], pts[t], pts[u]).unwrap_or((pts[s].xz(), 0.0)));
            continue;
        };
        let d = center.distance(pts[u].xz());
        if d > radius * (1.0 + TOLERANCE) {
            // Outside current circumcircle, skip.
            continue;
        }
        if d >= radius * (1.0 - TOLERANCE) {
            // Inside epsilon circum circle, do extra tests to make sure the edge is valid.
            // s-u and t-u cannot overlap with s-pt nor t-pt if they exists.
            if overlap_edges(pts, edges, s, u) || overlap_edges(pts, edges, t, u) {
                continue;
            }
        }
        // Edge is valid.
        pt = Some(u);
        circle = Some(circum_circle(pts[s], pts[t], pts[u]).unwrap_or((pts[s].xz(), 0.0)));
    }

    // Add new triangle or update edge info if s-t is on hull.
    let Some(pt) = pt else {
        edges[e].update_left_face(s, t, EdgeFace::Hull);
        return;
    };
    let face = EdgeFace::Face(*face_count);
    // Update face information of edge being completed.
    edges[e].update_left_face(s, t, face);

    // Add new edge or update face info of old edge.
    match find_edge(edges, pt, s) {
        Some(e) => edges[e].update_left_face(pt, s, face),
        None => add_edge(edges, max_edges, pt, s, face, EdgeFace::Undefined),
    }
    // Add new edge or update face info of old edge.
    match find_edge(edges, t, pt) {
        Some(e) => edges[e].update_left_face(t, pt, face),
        None => add_edge(edges, max_edges, t, pt, face, EdgeFace::Undefined),
    }
    *face_count += 1;
}

/// Delaunay triangulation of `pts` constrained to the polygon outline `hull`.
fn delaunay_hull(
    pts: &[Vec3A],
    hull: &[usize],
    tris: &mut Vec<WorkTriangle>,
    edges: &mut Vec<DelaunayEdge>,
) {
    let mut face_count = 0;
    let max_edges = pts.len() * 10;
    edges.clear();

    for i in 0..hull.len() {
        let j = prev(i, hull.len());
        add_edge(
            edges,
            max_edges,
            hull[j],
            hull[i],
            EdgeFace::Hull,
            EdgeFace::Undefined,
        );
    }

    let mut current_edge = 0;
    while current_edge < edges.len() {
        if edges[current_edge].left == EdgeFace::Undefined {
            complete_facet(pts, edges, max_edges, &mut face_count, current_edge);
        }
        if edges[current_edge].right == EdgeFace::Undefined {
            complete_facet(pts, edges, max_edges, &mut face_count, current_edge);
        }
        current_edge += 1;
    }

    // Create tris
    let mut faces: Vec<[Option<usize>; 3]> = vec![[None; 3]; face_count];
    for e in edges.iter() {
        if let EdgeFace::Face(f) = e.right {
            let t = &mut faces[f];
            if t[0].is_none() {
                t[0] = Some(e.s);
                t[1] = Some(e.t);
            } else if t[0] == Some(e.t) {
                t[2] = Some(e.s);
            } else if t[1] == Some(e.s) {
                t[2] = Some(e.t);
            }
        }
        if let EdgeFace::Face(f) = e.left {
            let t = &mut faces[f];
            if t[0].is_none() {
                t[0] = Some(e.t);
                t[1] = Some(e.s);
            } else if t[0] == Some(e.s) {
                t[2] = Some(e.t);
            } else if t[1] == Some(e.t) {
                t[2] = Some(e.s);
            }
        }
    }

    tris.clear();
    for (i, face) in faces.iter().enumerate() {
        match face {
            [Some(a), Some(b), Some(c)] => tris.push(WorkTriangle {
                vertices: [*a, *b, *c],
                flags: 0,
            }),
            _ => warn!("removing dangling Delaunay face {i} {face:?}"),
        }
    }
}

/// Height error of `p` against the triangle mesh, `None` if `p` is outside of every triangle.
fn dist_to_tri_mesh(p: Vec3A, verts: &[Vec3A], tris: &[WorkTriangle]) -> Option<f32> {
    tris.iter()
        .filter_map(|tri| {
            let [a, b, c] = tri.vertices.map(|v| verts[v]);
            dist_pt_tri(p, a, b, c)
        })
        .min_by(f32::total_cmp)
}

/// Distance from point p to triangle defined by vertices a, b, and c.
/// Returns None if the point is outside the triangle.
fn dist_pt_tri(p: Vec3A, a: Vec3A, b: Vec3A, c: Vec3A) -> Option<f32> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.xz().dot(v0.xz());
    let dot01 = v0.xz().dot(v1.xz());
    let dot02 = v0.xz().dot(v2.xz());
    let dot11 = v1.xz().dot(v1.xz());
    let dot12 = v1.xz().dot(v2.xz());

    // Compute barycentric coordinates
    let denom = dot00 * dot11 - dot01 * dot01;
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let inv_denom = 1.0 / denom;
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    // If point lies inside the triangle, return interpolated y-coord.
    const EPS: f32 = 1.0e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a.y + v0.y * u + v1.y * v;
        Some((y - p.y).abs())
    } else {
        None
    }
}

fn jitter_x(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0x8da6_b343) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

fn jitter_z(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0xd816_3841) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

/// Distance from `p` to the polygon outline on the xz-plane. Negative inside the polygon.
fn dist_to_poly(verts: &[Vec3A], p: Vec3A) -> f32 {
    let mut dmin = f32::MAX;
    let mut inside = false;
    for i in 0..verts.len() {
        let vi = verts[i];
        let vj = verts[prev(i, verts.len())];
        if (vi.z > p.z) != (vj.z > p.z)
            && p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        dmin = dmin.min(distance_point_segment_sqr_2d(p.xz(), vj.xz(), vi.xz()));
    }
    let dmin = dmin.sqrt();
    if inside { -dmin } else { dmin }
}

fn distance_point_segment_sqr_2d(pt: Vec2, p: Vec2, q: Vec2) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let t = if d > 0.0 { pq.dot(pt - p) / d } else { 0.0 };
    (p + pq * t.clamp(0.0, 1.0)).distance_squared(pt)
}

fn distance_point_segment_sqr(pt: Vec3A, p: Vec3A, q: Vec3A) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let t = if d > 0.0 { pq.dot(pt - p) / d } else { 0.0 };
    (p + pq * t.clamp(0.0, 1.0)).distance_squared(pt)
}

/// Find edges that lie on hull and mark them as such.
fn set_tri_flags(tris: &mut [WorkTriangle], hull: &[usize]) {
    for tri in tris {
        let [a, b, c] = tri.vertices;
        let boundary = |from, to| {
            if on_hull(from, to, hull) {
                DetailTriangle::EDGE_BOUNDARY
            } else {
                0
            }
        };
        tri.flags = boundary(a, b) | boundary(b, c) << 2 | boundary(c, a) << 4;
    }
}

fn on_hull(a: usize, b: usize, hull: &[usize]) -> bool {
    // All internal sampled points come after the hull so we can early out for those.
    if a >= hull.len() || b >= hull.len() {
        return false;
    }
    (0..hull.len()).any(|i| a == hull[prev(i, hull.len())] && b == hull[i])
}

/// Fan-like triangulation of the hull, starting from the ear with the shortest perimeter.
fn triangulate_hull(verts: &[Vec3A], hull: &[usize], nin: usize, tris: &mut Vec<WorkTriangle>) {
    tris.clear();
    let nhull = hull.len();
    if nhull < 3 {
        return;
    }
    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;

    // Start from an ear with shortest perimeter.
    // This tends to favor well formed triangles as starting point.
    let mut dmin = f32::MAX;
    for i in 0..nhull {
        if hull[i] >= nin {
            // Ears are triangles with original vertices as middle vertex while others are actually line segments on edges
            continue;
        }
        let pi = prev(i, nhull);
        let ni = next(i, nhull);
        let pv = verts[hull[pi]].xz();
        let cv = verts[hull[i]].xz();
        let nv = verts[hull[ni]].xz();
        let d = pv.distance(cv) + cv.distance(nv) + nv.distance(pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    let triangle = |a: usize, b: usize, c: usize| WorkTriangle {
        vertices: [hull[a], hull[b], hull[c]],
        flags: 0,
    };

    // Add first triangle
    tris.push(triangle(start, left, right));

    // Triangulate the polygon by moving left or right,
    // depending on which triangle has shorter perimeter.
    // This heuristic was chose empirically, since it seems
    // handle tessellated straight edges well.
    while next(left, nhull) != right {
        // Check to see if se should advance left or right.
        let nleft = next(left, nhull);
        let nright = prev(right, nhull);

        let cvleft = verts[hull[left]].xz();
        let nvleft = verts[hull[nleft]].xz();
        let cvright = verts[hull[right]].xz();
        let nvright = verts[hull[nright]].xz();
        let dleft = cvleft.distance(nvleft) + nvleft.distance(cvright);
        let dright = cvright.distance(nvright) + cvleft.distance(nvright);
        if dleft < dright {
            tris.push(triangle(left, nleft, right));
            left = nleft;
        } else {
            tris.push(triangle(left, nright, right));
            right = nright;
        }
    }
}

/// Looks up the height under `f`, searching outwards in rings when the cell itself has no data.
fn get_height(f: Vec3A, ics: f32, ch: f32, radius: i32, hp: &HeightPatch) -> u16 {
    let ix = (f.x * ics + 0.01).floor() as i32;
    let iz = (f.z * ics + 0.01).floor() as i32;
    let ix = (ix - hp.xmin as i32).clamp(0, hp.width as i32 - 1);
    let iz = (iz - hp.zmin as i32).clamp(0, hp.height as i32 - 1);
    let mut h = hp.data_at(ix, iz);
    if h != RC_UNSET_HEIGHT {
        return h;
    }

    // Special case when data might be bad.
    // Walk adjacent cells in a spiral up to 'radius', and look
    // for a pixel which has a valid height.
    let (mut x, mut z, mut dx, mut dz) = (1, 0, 1, 0);
    let max_size = radius * 2 + 1;
    let max_iter = max_size * max_size - 1;

    let mut next_ring_iter_start = 8;
    let mut next_ring_iters = 16;

    let mut dmin = f32::MAX;
    for i in 0..max_iter {
        let nx = ix + x;
        let nz = iz + z;
        if nx >= 0 && nz >= 0 && nx < hp.width as i32 && nz < hp.height as i32 {
            let nh = hp.data_at(nx, nz);
            if nh != RC_UNSET_HEIGHT {
                let d = (nh as f32 * ch - f.y).abs();
                if d < dmin {
                    h = nh;
                    dmin = d;
                }
            }
        }
        // The rings around the center hold 8, 16, 24, ... cells. Once a ring has produced a
        // height, the search does not continue into the next ring.
        if i + 1 == next_ring_iter_start {
            if h != RC_UNSET_HEIGHT {
                break;
            }
            next_ring_iter_start += next_ring_iters;
            next_ring_iters += 8;
        }

        if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
            (dx, dz) = (-dz, dx);
        }
        x += dx;
        z += dz;
    }
    h
}

/// Squared minimum extent of the polygon: the smallest over all edges of the largest distance
/// of any vertex to that edge.
fn poly_min_extent_squared(verts: &[Vec3A]) -> f32 {
    let n = verts.len();
    (0..n)
        .map(|i| {
            let p1 = verts[i].xz();
            let p2 = verts[next(i, n)].xz();
            (0..n)
                .filter(|j| *j != i && *j != next(i, n))
                .map(|j| distance_point_segment_sqr_2d(verts[j].xz(), p1, p2))
                .fold(0.0_f32, f32::max)
        })
        .fold(f32::MAX, f32::min)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct HeightPatch {
    data: Vec<u16>,
    xmin: u16,
    zmin: u16,
    width: u16,
    height: u16,
}

impl HeightPatch {
    /// Collects the span heights under a polygon.
    ///
    /// Reads from the compact heightfield are offset by `bs`, since the border is already removed
    /// from the polygon mesh vertices.
    fn get_height_data(
        &mut self,
        chf: &CompactHeightfield,
        poly: &[u16],
        verts: &[U16Vec3],
        bs: u16,
        queue: &mut VecDeque<(i32, i32, usize)>,
        region: RegionId,
    ) -> Result<(), ()> {
        queue.clear();
        // Set all heights to RC_UNSET_HEIGHT.
        self.reset(RC_UNSET_HEIGHT);

        let mut empty = true;

        // We cannot sample from this poly if it was created from polys
        // of different regions. If it was then it could potentially be overlapping
        // with polys of that region and the heights sampled here could be wrong.
        if region != RegionId::NONE {
            // Copy the height from the same region, and mark region borders
            // as seed points to fill the rest.
            for hz in 0..self.height {
                let z = self.zmin + hz + bs;
                for hx in 0..self.width {
                    let x = self.xmin + hx + bs;
                    let Some(cell) = chf.get_cell_at(x, z) else {
                        continue;
                    };
                    let Some(i) = cell.index_range().find(|i| chf.spans[*i].region == region)
                    else {
                        continue;
                    };
                    // Store height
                    *self.data_at_mut(hx as i32, hz as i32) = chf.spans[i].y;
                    empty = false;

                    // If any of the neighbours is not in same region,
                    // add the current location as flood fill start
                    let border = (0..4).any(|dir| {
                        chf.neighbor(x as i32, z as i32, i, dir)
                            .is_some_and(|(_, _, ai)| chf.spans[ai].region != region)
                    });
                    if border {
                        queue.push_back((x as i32, z as i32, i));
                    }
                }
            }
        }

        // if the polygon does not contain any points from the current region (rare, but happens)
        // or if it could potentially be overlapping polygons of the same region,
        // then use the center as the seed point.
        if empty {
            self.seed_with_poly_center(chf, poly, verts, bs, queue)?;
        }

        // We assume the seed is centered in the polygon, so a BFS to collect
        // height data will ensure we do not move onto overlapping polygons and
        // sample wrong heights.
        while let Some((cx, cz, ci)) = queue.pop_front() {
            for dir in 0..4 {
                let Some((ax, az, ai)) = chf.neighbor(cx, cz, ci, dir) else {
                    continue;
                };
                let hx = ax - self.xmin as i32 - bs as i32;
                let hz = az - self.zmin as i32 - bs as i32;
                if !self.contains(hx, hz) || self.data_at(hx, hz) != RC_UNSET_HEIGHT {
                    continue;
                }
                *self.data_at_mut(hx, hz) = chf.spans[ai].y;
                queue.push_back((ax, az, ai));
            }
        }
        Ok(())
    }

    /// Seeds the queue with the span nearest to the polygon center, reached by walking from the
    /// span nearest to one of the polygon vertices.
    fn seed_with_poly_center(
        &mut self,
        chf: &CompactHeightfield,
        poly: &[u16],
        verts: &[U16Vec3],
        bs: u16,
        queue: &mut VecDeque<(i32, i32, usize)>,
    ) -> Result<(), ()> {
        const OFFSET: [(i32, i32); 9] = [
            (0, 0),
            (-1, -1),
            (0, -1),
            (1, -1),
            (1, 0),
            (1, 1),
            (0, 1),
            (-1, 1),
            (-1, 0),
        ];
        let bs = bs as i32;

        // Find cell closest to a poly vertex
        let mut start: Option<(i32, i32, usize)> = None;
        let mut dmin = RC_UNSET_HEIGHT as i32;
        'search: for v in poly.iter().map(|p| verts[*p as usize]) {
            for (ox, oz) in OFFSET {
                let ax = v.x as i32 + ox;
                let az = v.z as i32 + oz;
                if !self.contains(ax - self.xmin as i32, az - self.zmin as i32)
                    || !chf.contains(ax + bs, az + bs)
                {
                    continue;
                }
                for i in chf.cell_at((ax + bs) as u16, (az + bs) as u16).index_range() {
                    let d = (v.y as i32 - chf.spans[i].y as i32).abs();
                    if d < dmin {
                        start = Some((ax, az, i));
                        dmin = d;
                    }
                }
                if dmin <= 0 {
                    break 'search;
                }
            }
        }
        let start = start.ok_or(())?;

        // Find center of the polygon
        let (sum_x, sum_z) = poly.iter().map(|p| verts[*p as usize]).fold((0, 0), |acc, v| {
            (acc.0 + v.x as i32, acc.1 + v.z as i32)
        });
        let pcx = sum_x / poly.len() as i32;
        let pcz = sum_z / poly.len() as i32;

        // DFS to move to the center. Note that we need a DFS here and can not just move
        // directly towards the center without recording intermediate nodes, even though the polygons
        // are convex. In very rare we can get stuck due to contour simplification if we do not
        // record nodes.
        let mut stack = vec![start];
        let mut dirs = [0, 1, 2, 3];
        self.reset(0);
        let mut current = start;
        loop {
            let Some((cx, cz, ci)) = stack.pop() else {
                warn!("walk towards polygon center failed to reach center");
                break;
            };
            current = (cx, cz, ci);
            if cx == pcx && cz == pcz {
                break;
            }

            // If we are already at the correct X-position, prefer direction
            // directly towards the center in the Z-axis; otherwise prefer
            // direction in the X-axis
            let direct_dir: usize = match (cx == pcx, pcz > cz, pcx > cx) {
                (true, true, _) => 1,
                (true, false, _) => 3,
                (false, _, true) => 2,
                (false, _, false) => 0,
            };

            // Push the direct dir last so we start with this on next iteration
            dirs.swap(direct_dir, 3);

            for dir in dirs {
                let Some(con) = chf.spans[ci].con(dir) else {
                    continue;
                };
                let new_x = cx + dir_offset_x(dir);
                let new_z = cz + dir_offset_z(dir);
                let hpx = new_x - self.xmin as i32;
                let hpz = new_z - self.zmin as i32;
                if !self.contains(hpx, hpz) || self.data_at(hpx, hpz) != 0 {
                    continue;
                }
                *self.data_at_mut(hpx, hpz) = 1;
                let new_index = chf.cell_at((new_x + bs) as u16, (new_z + bs) as u16).index()
                    as usize
                    + con as usize;
                stack.push((new_x, new_z, new_index));
            }
            dirs.swap(direct_dir, 3);
        }

        // The seeds of the height BFS are given in coordinates with borders.
        let (cx, cz, ci) = current;
        queue.clear();
        queue.push_back((cx + bs, cz + bs, ci));
        self.reset(RC_UNSET_HEIGHT);
        *self.data_at_mut(cx - self.xmin as i32, cz - self.zmin as i32) = chf.spans[ci].y;
        Ok(())
    }

    fn reset(&mut self, value: u16) {
        let len = self.width as usize * self.height as usize;
        self.data[..len].fill(value);
    }

    #[inline]
    fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && z >= 0 && x < self.width as i32 && z < self.height as i32
    }

    #[inline]
    fn data_at(&self, x: i32, z: i32) -> u16 {
        self.data[(x + z * self.width as i32) as usize]
    }

    #[inline]
    fn data_at_mut(&mut self, x: i32, z: i32) -> &mut u16 {
        &mut self.data[(x + z * self.width as i32) as usize]
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Bounds {
    xmin: u16,
    xmax: u16,
    zmin: u16,
    zmax: u16,
}

impl Bounds {
    #[inline]
    fn width(&self) -> u16 {
        self.xmax.saturating_sub(self.xmin)
    }

    #[inline]
    fn height(&self) -> u16 {
        self.zmax.saturating_sub(self.zmin)
    }
}
