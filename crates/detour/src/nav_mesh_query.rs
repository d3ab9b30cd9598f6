//! Navigation mesh query implementation for Detour
//!
//! This module contains the NavMeshQuery structure, which is used to perform
//! nearest-polygon lookups, surface height queries and A* corridor searches on the
//! navigation mesh.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use glam::Vec3;

use super::{NavMesh, PolyRef, QueryFilter, Status, TileRef};
use recast_common::Result;

/// Maximum number of nodes in the search pool
const DT_MAX_NODES: usize = 4096;
/// Heuristic scale; slightly below one to keep A* admissible
const H_SCALE: f32 = 0.999;

/// State of a node in the search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    /// Node is in the open list
    Open,
    /// Node is in the closed list
    Closed,
}

/// Node in the A* search algorithm
#[derive(Debug, Clone)]
struct Node {
    /// Polygon reference
    poly: PolyRef,
    /// Parent node
    parent: Option<usize>,
    /// Position the node is entered at
    pos: Vec3,
    /// Cost from start to this node
    g: f32,
    /// Estimated cost from this node to goal
    h: f32,
    state: NodeState,
}

/// Node wrapper for the binary heap (priority queue)
#[derive(Debug, Clone, Copy)]
struct HeapNode {
    index: usize,
    /// Total cost (f value)
    f: f32,
}

impl PartialEq for HeapNode {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f
    }
}

impl Eq for HeapNode {}

impl PartialOrd for HeapNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (lowest f value first)
        other.f.total_cmp(&self.f)
    }
}

/// Navigation mesh query structure
#[derive(Debug)]
pub struct NavMeshQuery<'a> {
    /// Reference to the navigation mesh
    nav_mesh: &'a NavMesh,
    max_nodes: usize,
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a new query over `nav_mesh`
    pub fn new(nav_mesh: &'a NavMesh) -> Self {
        Self {
            nav_mesh,
            max_nodes: DT_MAX_NODES,
        }
    }

    /// Limits the number of polygons a path search may visit
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes.max(1);
        self
    }

    /// Gets the navigation mesh this query runs on
    pub fn nav_mesh(&self) -> &'a NavMesh {
        self.nav_mesh
    }

    /// References of the installed tiles overlapping a box on the xz-plane
    fn tiles_in_box(&self, bmin: Vec3, bmax: Vec3) -> Vec<(TileRef, usize)> {
        let (minx, miny) = self.nav_mesh.calc_tile_loc(bmin);
        let (maxx, maxy) = self.nav_mesh.calc_tile_loc(bmax);
        let mut out = Vec::new();
        for ty in miny..=maxy {
            for tx in minx..=maxx {
                for idx in self.nav_mesh.tile_indices_at(tx, ty) {
                    let tile = self.nav_mesh.tile_by_index(idx);
                    let base = self.nav_mesh.encode_poly_ref(tile.salt, idx as u32, 0);
                    out.push((TileRef::new(base.id()), idx));
                }
            }
        }
        out
    }

    /// Polygons whose bounds overlap the query box and pass the filter
    pub fn query_polygons(&self, center: Vec3, half_extents: Vec3, filter: &QueryFilter) -> Vec<PolyRef> {
        let qmin = center - half_extents;
        let qmax = center + half_extents;
        let mut out = Vec::new();
        for (tile_ref, idx) in self.tiles_in_box(qmin, qmax) {
            let tile = self.nav_mesh.tile_by_index(idx);
            let base = tile_ref.id();
            for i in tile.query_polygons(qmin, qmax) {
                if filter.pass_filter(tile.polys[i].flags) {
                    out.push(PolyRef::new(base | i as u32));
                }
            }
        }
        out
    }

    /// Finds the polygon nearest to `center` within `half_extents`, with the nearest point on it
    pub fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Result<Option<(PolyRef, Vec3)>> {
        if !center.is_finite() || !half_extents.is_finite() || half_extents.min_element() < 0.0 {
            return Err(Status::InvalidParam.into());
        }

        let mut nearest: Option<(PolyRef, Vec3, f32)> = None;
        for poly_ref in self.query_polygons(center, half_extents, filter) {
            let (tile, ip) = self.nav_mesh.get_tile_and_poly_index(poly_ref)?;
            let (closest, over) = tile.closest_point_on_poly(ip, center);
            let diff = center - closest;
            let climb = tile.header.as_ref().map_or(0.0, |h| h.walkable_climb);
            // A point over the polygon is as good as on it while within climb height
            let d = if over {
                let dy = (diff.y.abs() - climb).max(0.0);
                dy * dy
            } else {
                diff.length_squared()
            };
            match nearest {
                Some((_, _, best)) if best <= d => {}
                _ => nearest = Some((poly_ref, closest, d)),
            }
        }
        Ok(nearest.map(|(r, p, _)| (r, p)))
    }

    /// Closest point on a polygon to `pos`
    pub fn closest_point_on_poly(&self, poly_ref: PolyRef, pos: Vec3) -> Result<Vec3> {
        let (tile, ip) = self.nav_mesh.get_tile_and_poly_index(poly_ref)?;
        Ok(tile.closest_point_on_poly(ip, pos).0)
    }

    /// Surface height of a polygon under `pos`, or `None` when `pos` is outside it
    pub fn get_poly_height(&self, poly_ref: PolyRef, pos: Vec3) -> Result<Option<f32>> {
        let (tile, ip) = self.nav_mesh.get_tile_and_poly_index(poly_ref)?;
        Ok(tile.get_poly_height(ip, pos))
    }

    /// Finds a polygon corridor from `start_ref` to `end_ref`.
    ///
    /// When the end cannot be reached the corridor leads to the visited polygon closest to
    /// `end_pos`.
    pub fn find_path(
        &self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> Result<Vec<PolyRef>> {
        // Validate the input
        if !self.nav_mesh.is_valid_poly_ref(start_ref) || !self.nav_mesh.is_valid_poly_ref(end_ref) {
            return Err(Status::InvalidParam.into());
        }

        // Return early if start and end are the same
        if start_ref == end_ref {
            return Ok(vec![start_ref]);
        }

        let mut nodes: Vec<Node> = Vec::new();
        let mut lookup: HashMap<PolyRef, usize> = HashMap::new();
        let mut open_list = BinaryHeap::new();

        let start_h = start_pos.distance(end_pos) * H_SCALE;
        nodes.push(Node {
            poly: start_ref,
            parent: None,
            pos: start_pos,
            g: 0.0,
            h: start_h,
            state: NodeState::Open,
        });
        lookup.insert(start_ref, 0);
        open_list.push(HeapNode { index: 0, f: start_h });

        let mut best_idx = 0;
        let mut best_cost = start_h;
        let mut reached = false;

        while let Some(HeapNode { index: current, f }) = open_list.pop() {
            // Skip entries superseded by a cheaper visit
            if nodes[current].state == NodeState::Closed || f > nodes[current].g + nodes[current].h {
                continue;
            }
            nodes[current].state = NodeState::Closed;

            if nodes[current].poly == end_ref {
                best_idx = current;
                reached = true;
                break;
            }

            let cur_ref = nodes[current].poly;
            let cur_pos = nodes[current].pos;
            let cur_g = nodes[current].g;
            let parent_ref = nodes[current].parent.map(|p| nodes[p].poly);
            let (_, cur_poly) = self.nav_mesh.get_tile_and_poly_by_ref(cur_ref)?;
            let cur_area = cur_poly.area;

            for link in self.nav_mesh.get_links(cur_ref)? {
                let nei_ref = link.reference;
                if Some(nei_ref) == parent_ref {
                    continue;
                }
                let Ok((_, nei_poly)) = self.nav_mesh.get_tile_and_poly_by_ref(nei_ref) else {
                    continue;
                };
                if !filter.pass_filter(nei_poly.flags) {
                    continue;
                }

                let nei_pos = self.nav_mesh.get_edge_mid_point(cur_ref, nei_ref)?;
                let (g, h) = if nei_ref == end_ref {
                    let g = cur_g
                        + filter.get_cost(cur_pos, nei_pos, cur_area)
                        + filter.get_cost(nei_pos, end_pos, nei_poly.area);
                    (g, 0.0)
                } else {
                    let g = cur_g + filter.get_cost(cur_pos, nei_pos, cur_area);
                    (g, nei_pos.distance(end_pos) * H_SCALE)
                };

                let idx = match lookup.get(&nei_ref) {
                    Some(&idx) => {
                        if g + h >= nodes[idx].g + nodes[idx].h {
                            continue;
                        }
                        idx
                    }
                    None => {
                        if nodes.len() >= self.max_nodes {
                            continue;
                        }
                        nodes.push(Node {
                            poly: nei_ref,
                            parent: None,
                            pos: nei_pos,
                            g,
                            h,
                            state: NodeState::Open,
                        });
                        lookup.insert(nei_ref, nodes.len() - 1);
                        nodes.len() - 1
                    }
                };

                let node = &mut nodes[idx];
                node.parent = Some(current);
                node.pos = nei_pos;
                node.g = g;
                node.h = h;
                node.state = NodeState::Open;
                open_list.push(HeapNode { index: idx, f: g + h });

                if h < best_cost {
                    best_cost = h;
                    best_idx = idx;
                }
            }
        }

        if !reached {
            log::debug!("path search did not reach {:?}; returning partial corridor", end_ref);
        }

        let mut path = Vec::new();
        let mut cur = Some(best_idx);
        while let Some(i) = cur {
            path.push(nodes[i].poly);
            cur = nodes[i].parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Point to steer towards from `pos` along `path` when heading for `target`:
    /// the midpoint of the next portal, or `target` once on the last polygon
    pub fn next_steer_point(&self, path: &[PolyRef], target: Vec3) -> Result<Vec3> {
        match path {
            [] | [_] => Ok(target),
            [from, to, ..] => self.nav_mesh.get_edge_mid_point(*from, *to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{plane_params, plane_tile_data};

    fn two_tile_mesh() -> NavMesh {
        let mut nav = NavMesh::new(plane_params(16)).unwrap();
        nav.add_tile(plane_tile_data(19.2, 0, 0), None).unwrap();
        nav.add_tile(plane_tile_data(19.2, 1, 0), None).unwrap();
        nav
    }

    #[test]
    fn test_find_nearest_poly() {
        let nav = two_tile_mesh();
        let query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let (r, p) = query
            .find_nearest_poly(Vec3::new(5.0, 1.0, 5.0), Vec3::new(2.0, 4.0, 2.0), &filter)
            .unwrap()
            .unwrap();
        assert!(nav.is_valid_poly_ref(r));
        assert!((p.x - 5.0).abs() < 1e-4 && (p.z - 5.0).abs() < 1e-4);
        assert!(p.y.abs() < 0.5);

        // Far away from everything
        let none = query
            .find_nearest_poly(Vec3::new(100.0, 0.0, 100.0), Vec3::splat(1.0), &filter)
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_filter_excludes_polygons() {
        let nav = two_tile_mesh();
        let query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::new(crate::PolyFlags::SWIM, crate::PolyFlags::empty());
        let found = query
            .find_nearest_poly(Vec3::new(5.0, 0.0, 5.0), Vec3::splat(2.0), &filter)
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_find_path_across_tiles() {
        let nav = two_tile_mesh();
        let query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let ext = Vec3::new(1.0, 2.0, 1.0);
        let start = Vec3::new(3.0, 0.0, 5.0);
        let end = Vec3::new(16.0, 0.0, 5.0);
        let (sref, _) = query.find_nearest_poly(start, ext, &filter).unwrap().unwrap();
        let (eref, _) = query.find_nearest_poly(end, ext, &filter).unwrap().unwrap();
        assert_ne!(nav.decode_poly_ref(sref).1, nav.decode_poly_ref(eref).1);

        let path = query.find_path(sref, eref, start, end, &filter).unwrap();
        assert_eq!(path.first(), Some(&sref));
        assert_eq!(path.last(), Some(&eref));
        for pair in path.windows(2) {
            assert!(nav.get_links(pair[0]).unwrap().iter().any(|l| l.reference == pair[1]));
        }

        let steer = query.next_steer_point(&path, end).unwrap();
        assert!(steer.x > start.x);
    }

    #[test]
    fn test_find_path_same_poly_and_invalid() {
        let nav = two_tile_mesh();
        let query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let (r, p) = query
            .find_nearest_poly(Vec3::new(5.0, 0.0, 5.0), Vec3::splat(2.0), &filter)
            .unwrap()
            .unwrap();
        assert_eq!(query.find_path(r, r, p, p, &filter).unwrap(), vec![r]);
        assert!(query.find_path(PolyRef::new(0), r, p, p, &filter).is_err());
        assert_eq!(query.next_steer_point(&[r], p).unwrap(), p);
    }

    #[test]
    fn test_poly_height_outside_is_none() {
        let nav = two_tile_mesh();
        let query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let (r, _) = query
            .find_nearest_poly(Vec3::new(5.0, 0.0, 5.0), Vec3::splat(2.0), &filter)
            .unwrap()
            .unwrap();
        assert!(query.get_poly_height(r, Vec3::new(-50.0, 0.0, -50.0)).unwrap().is_none());
    }
}
