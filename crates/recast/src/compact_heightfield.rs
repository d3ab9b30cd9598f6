//! Compact heightfield representation for Recast
//!
//! The compact heightfield stores only the open space above walkable spans, packed densely per
//! cell, together with the connectivity of each span to its four axis-aligned neighbours.

use glam::Vec3;

use super::heightfield::{get_dir_offset_x, get_dir_offset_y, Heightfield, MAX_HEIGHT, RC_NULL_AREA};
use recast_common::{Error, Result};

/// Connection value of a span side without a neighbour
pub const RC_NOT_CONNECTED: u32 = 0x3f;
/// Maximum number of spans per column that a connection can address
const MAX_LAYERS: u32 = RC_NOT_CONNECTED - 1;
/// Region id flag of the tile border regions
pub const RC_BORDER_REG: u16 = 0x8000;

/// A compact cell: a range into the span array
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCell {
    /// Index of the first span in the cell
    pub index: u32,
    /// Number of spans in the cell
    pub count: u32,
}

/// A compact span: the open space above a walkable surface
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactSpan {
    /// Floor height (cells)
    pub y: u16,
    /// Region id, 0 when unassigned
    pub reg: u16,
    /// Packed neighbour connections, 6 bits per direction
    pub con: u32,
    /// Open height above the floor (cells)
    pub h: u8,
}

impl CompactSpan {
    /// Neighbour layer index in direction `dir`, or `RC_NOT_CONNECTED`
    #[inline]
    pub fn con(&self, dir: usize) -> u32 {
        (self.con >> (dir * 6)) & 0x3f
    }

    #[inline]
    fn set_con(&mut self, dir: usize, layer: u32) {
        let shift = dir * 6;
        self.con = (self.con & !(0x3f << shift)) | ((layer & 0x3f) << shift);
    }
}

/// Compact heightfield structure
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    /// Width of the heightfield along the x-axis
    pub width: i32,
    /// Height (depth) of the heightfield along the z-axis
    pub height: i32,
    /// Walkable height used during the build (cells)
    pub walkable_height: i32,
    /// Walkable climb used during the build (cells)
    pub walkable_climb: i32,
    /// Border size the regions were built with (cells)
    pub border_size: i32,
    /// Largest value in the distance field
    pub max_distance: u16,
    /// Largest region id assigned
    pub max_regions: u16,
    /// The minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the heightfield's AABB
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,
    /// Cells, `width * height`
    pub cells: Vec<CompactCell>,
    /// Spans, grouped by cell
    pub spans: Vec<CompactSpan>,
    /// Distance to the nearest region boundary per span (empty until computed)
    pub dist: Vec<u16>,
    /// Area id per span
    pub areas: Vec<u8>,
}

impl CompactHeightfield {
    /// Builds the compact heightfield from the walkable spans of `hf`, keeping only spans with
    /// at least `walkable_height` of clearance and connecting neighbours reachable within
    /// `walkable_climb`.
    pub fn build_from_heightfield(
        hf: &Heightfield,
        walkable_height: i32,
        walkable_climb: i32,
    ) -> Result<Self> {
        let w = hf.width;
        let h = hf.height;
        let span_count = hf.walkable_span_count();

        let mut spans = Vec::new();
        spans
            .try_reserve_exact(span_count)
            .map_err(|e| Error::ResourceExhaustion(format!("compact spans: {}", e)))?;
        let mut areas = Vec::with_capacity(span_count);
        let mut cells = vec![CompactCell::default(); (w * h) as usize];

        let mut bmax = hf.bmax;
        bmax.y += walkable_height as f32 * hf.ch;

        for z in 0..h {
            for x in 0..w {
                let column = hf.column(x, z);
                let cell = &mut cells[(x + z * w) as usize];
                cell.index = spans.len() as u32;
                for (si, s) in column.iter().enumerate() {
                    if s.area == RC_NULL_AREA {
                        continue;
                    }
                    let bot = s.smax as i32;
                    let top = column.get(si + 1).map_or(MAX_HEIGHT, |n| n.smin as i32);
                    spans.push(CompactSpan {
                        y: bot.clamp(0, 0xffff) as u16,
                        reg: 0,
                        con: 0,
                        h: (top - bot).clamp(0, 0xff) as u8,
                    });
                    areas.push(s.area);
                    cell.count += 1;
                }
            }
        }

        let mut chf = Self {
            width: w,
            height: h,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_regions: 0,
            bmin: hf.bmin,
            bmax,
            cs: hf.cs,
            ch: hf.ch,
            cells,
            spans,
            dist: Vec::new(),
            areas,
        };
        chf.connect_neighbours();
        Ok(chf)
    }

    fn connect_neighbours(&mut self) {
        let w = self.width;
        let h = self.height;
        let mut too_high_layer = 0u32;

        for z in 0..h {
            for x in 0..w {
                let cell = self.cells[(x + z * w) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    for dir in 0..4 {
                        self.spans[i].set_con(dir, RC_NOT_CONNECTED);
                        let nx = x + get_dir_offset_x(dir);
                        let nz = z + get_dir_offset_y(dir);
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            continue;
                        }

                        let s = self.spans[i];
                        let ncell = self.cells[(nx + nz * w) as usize];
                        for k in ncell.index..ncell.index + ncell.count {
                            let ns = self.spans[k as usize];
                            let bot = s.y.max(ns.y) as i32;
                            let top = (s.y as i32 + s.h as i32).min(ns.y as i32 + ns.h as i32);
                            if top - bot >= self.walkable_height
                                && (ns.y as i32 - s.y as i32).abs() <= self.walkable_climb
                            {
                                let layer = k - ncell.index;
                                if layer > MAX_LAYERS {
                                    too_high_layer = too_high_layer.max(layer);
                                    continue;
                                }
                                self.spans[i].set_con(dir, layer);
                                break;
                            }
                        }
                    }
                }
            }
        }

        if too_high_layer > MAX_LAYERS {
            log::warn!(
                "heightfield has too many layers {} (max {})",
                too_high_layer,
                MAX_LAYERS
            );
        }
    }

    /// Number of spans
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Index of the neighbour of span `i` (in cell x, z) in direction `dir`, if connected
    #[inline]
    pub fn neighbour(&self, x: i32, z: i32, i: usize, dir: usize) -> Option<(i32, i32, usize)> {
        let con = self.spans[i].con(dir);
        if con == RC_NOT_CONNECTED {
            return None;
        }
        let nx = x + get_dir_offset_x(dir);
        let nz = z + get_dir_offset_y(dir);
        let cell = self.cells[(nx + nz * self.width) as usize];
        Some((nx, nz, (cell.index + con) as usize))
    }

    /// Span index range of the cell at (x, z)
    #[inline]
    pub fn cell_spans(&self, x: i32, z: i32) -> std::ops::Range<usize> {
        let cell = self.cells[(x + z * self.width) as usize];
        cell.index as usize..(cell.index + cell.count) as usize
    }

    /// Number of distinct non-border regions
    pub fn region_count(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        for s in &self.spans {
            if s.reg != 0 && s.reg & RC_BORDER_REG == 0 {
                seen.insert(s.reg);
            }
        }
        seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::RC_WALKABLE_AREA;

    fn flat_field(w: i32, h: i32) -> Heightfield {
        let mut hf =
            Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 5.0, h as f32), 1.0, 0.5)
                .unwrap();
        for z in 0..h {
            for x in 0..w {
                hf.add_span(x, z, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        hf
    }

    #[test]
    fn test_flat_field_fully_connected_inside() {
        let hf = flat_field(4, 4);
        let chf = CompactHeightfield::build_from_heightfield(&hf, 3, 1).unwrap();
        assert_eq!(chf.span_count(), 16);

        let i = chf.cell_spans(1, 1).start;
        for dir in 0..4 {
            assert_ne!(chf.spans[i].con(dir), RC_NOT_CONNECTED);
        }

        let corner = chf.cell_spans(0, 0).start;
        assert_eq!(chf.spans[corner].con(0), RC_NOT_CONNECTED);
        assert_eq!(chf.spans[corner].con(3), RC_NOT_CONNECTED);
        assert!(chf.neighbour(0, 0, corner, 2).is_some());
    }

    #[test]
    fn test_step_too_high_not_connected() {
        let mut hf = flat_field(2, 1);
        hf.add_span(1, 0, 0, 10, RC_WALKABLE_AREA, 1).unwrap();
        let chf = CompactHeightfield::build_from_heightfield(&hf, 3, 2).unwrap();
        let a = chf.cell_spans(0, 0).start;
        assert_eq!(chf.spans[a].con(2), RC_NOT_CONNECTED);
    }

    #[test]
    fn test_unwalkable_spans_are_dropped() {
        let mut hf = flat_field(2, 2);
        hf.add_span(0, 0, 5, 6, RC_NULL_AREA, 0).unwrap();
        let chf = CompactHeightfield::build_from_heightfield(&hf, 3, 1).unwrap();
        // The null span on top caps the clearance but is not itself stored
        assert_eq!(chf.span_count(), 4);
        let i = chf.cell_spans(0, 0).start;
        assert_eq!(chf.spans[i].h, 3);
    }
}
