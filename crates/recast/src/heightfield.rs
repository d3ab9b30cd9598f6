//! Heightfield representation for Recast
//!
//! The heightfield is the first data structure in the Recast pipeline. It is a 2D grid of
//! columns; each column holds the solid spans rasterized into it, sorted bottom-up and never
//! overlapping.

use glam::Vec3;

use recast_common::{Error, Result};

/// Area id of spans that are not walkable
pub const RC_NULL_AREA: u8 = 0;
/// Default area id of walkable spans
pub const RC_WALKABLE_AREA: u8 = 63;
/// Largest representable span height (in cells)
pub const RC_SPAN_MAX_HEIGHT: i32 = 0x1fff;
/// Open height above the topmost span of a column
pub(crate) const MAX_HEIGHT: i32 = 0xffff;

/// Offsets of the four axis-aligned neighbours: 0 = -x, 1 = +z, 2 = +x, 3 = -z
const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];

/// X offset of the neighbour in direction `dir`
#[inline]
pub fn get_dir_offset_x(dir: usize) -> i32 {
    DIR_OFFSET_X[dir & 0x3]
}

/// Z offset of the neighbour in direction `dir`
#[inline]
pub fn get_dir_offset_y(dir: usize) -> i32 {
    DIR_OFFSET_Z[dir & 0x3]
}

/// A solid span: the vertical range `[smin, smax)` of a column that is occupied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Bottom of the span (cells)
    pub smin: u16,
    /// Top of the span (cells); the walkable surface when the area is walkable
    pub smax: u16,
    /// Area id, `RC_NULL_AREA` when not walkable
    pub area: u8,
}

/// Dynamic heightfield of solid spans
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// Width of the heightfield along the x-axis
    pub width: i32,
    /// Height (depth) of the heightfield along the z-axis
    pub height: i32,
    /// The minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the heightfield's AABB
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,
    columns: Vec<Vec<Span>>,
}

impl Heightfield {
    /// Creates a new empty heightfield
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(Error::Configuration(format!(
                "heightfield size {}x{} is empty",
                width, height
            )));
        }
        let cells = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| Error::ResourceExhaustion("heightfield too large".to_string()))?;
        let mut columns = Vec::new();
        columns
            .try_reserve_exact(cells)
            .map_err(|e| Error::ResourceExhaustion(format!("heightfield columns: {}", e)))?;
        columns.resize_with(cells, Vec::new);

        Ok(Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns,
        })
    }

    #[inline]
    fn column_index(&self, x: i32, z: i32) -> usize {
        (x + z * self.width) as usize
    }

    /// Spans of the column at (x, z), bottom-up
    pub fn column(&self, x: i32, z: i32) -> &[Span] {
        &self.columns[self.column_index(x, z)]
    }

    /// Total number of spans
    pub fn span_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    /// Number of walkable spans
    pub fn walkable_span_count(&self) -> usize {
        self.columns
            .iter()
            .flatten()
            .filter(|s| s.area != RC_NULL_AREA)
            .count()
    }

    /// Adds a span to the column at (x, z), merging it with every span it overlaps.
    ///
    /// When the tops of two merged spans are within `flag_merge_threshold` the walkable area
    /// with the higher id wins.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) -> Result<()> {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return Err(Error::Recast(format!(
                "span column ({}, {}) outside heightfield",
                x, z
            )));
        }
        if smin > smax {
            return Err(Error::Recast(format!("inverted span {}..{}", smin, smax)));
        }

        let idx = self.column_index(x, z);
        let column = &mut self.columns[idx];
        let mut new_span = Span { smin, smax, area };

        let mut i = 0;
        while i < column.len() {
            let cur = column[i];
            if cur.smin > new_span.smax {
                break;
            }
            if cur.smax < new_span.smin {
                i += 1;
                continue;
            }

            new_span.smin = new_span.smin.min(cur.smin);
            new_span.smax = new_span.smax.max(cur.smax);
            if (new_span.smax as i32 - cur.smax as i32).abs() <= flag_merge_threshold {
                new_span.area = new_span.area.max(cur.area);
            }
            column.remove(i);
        }
        column.insert(i, new_span);
        Ok(())
    }

    /// Lets walkable area extend over low obstacles (curbs, stairs) no taller than `walkable_climb`
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: i32) {
        for column in &mut self.columns {
            let mut previous_walkable = false;
            let mut previous_area = RC_NULL_AREA;
            let mut previous_smax = 0i32;

            for span in column.iter_mut() {
                let walkable = span.area != RC_NULL_AREA;
                if !walkable
                    && previous_walkable
                    && (span.smax as i32 - previous_smax).abs() <= walkable_climb
                {
                    span.area = previous_area;
                }
                previous_walkable = walkable;
                previous_area = span.area;
                previous_smax = span.smax as i32;
            }
        }
    }

    /// Marks spans next to drops deeper than `walkable_climb` (ledges) as not walkable, as well
    /// as spans whose accessible neighbours differ too much in height (steep terrain).
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) {
        let w = self.width;
        let h = self.height;
        let mut unwalkable = Vec::new();

        for z in 0..h {
            for x in 0..w {
                let column = self.column(x, z);
                for (si, span) in column.iter().enumerate() {
                    if span.area == RC_NULL_AREA {
                        continue;
                    }

                    let bot = span.smax as i32;
                    let top = column.get(si + 1).map_or(MAX_HEIGHT, |n| n.smin as i32);

                    let mut min_neighbor_height = MAX_HEIGHT;
                    let mut accessible_min = bot;
                    let mut accessible_max = bot;

                    for dir in 0..4 {
                        let dx = x + get_dir_offset_x(dir);
                        let dz = z + get_dir_offset_y(dir);
                        if dx < 0 || dz < 0 || dx >= w || dz >= h {
                            min_neighbor_height = min_neighbor_height.min(-walkable_climb - bot);
                            continue;
                        }

                        let neighbor = self.column(dx, dz);

                        // Gap from the minimum height to the first neighbour span
                        let nbot = -walkable_climb;
                        let ntop = neighbor.first().map_or(MAX_HEIGHT, |n| n.smin as i32);
                        if top.min(ntop) - bot.max(nbot) > walkable_height {
                            min_neighbor_height = min_neighbor_height.min(nbot - bot);
                        }

                        for (ni, ns) in neighbor.iter().enumerate() {
                            let nbot = ns.smax as i32;
                            let ntop = neighbor.get(ni + 1).map_or(MAX_HEIGHT, |n| n.smin as i32);
                            if top.min(ntop) - bot.max(nbot) > walkable_height {
                                min_neighbor_height = min_neighbor_height.min(nbot - bot);
                                if (nbot - bot).abs() <= walkable_climb {
                                    accessible_min = accessible_min.min(nbot);
                                    accessible_max = accessible_max.max(nbot);
                                }
                            }
                        }
                    }

                    if min_neighbor_height < -walkable_climb
                        || accessible_max - accessible_min > walkable_climb
                    {
                        unwalkable.push((self.column_index(x, z), si));
                    }
                }
            }
        }

        for (ci, si) in unwalkable {
            self.columns[ci][si].area = RC_NULL_AREA;
        }
    }

    /// Marks spans without `walkable_height` of open space above them as not walkable
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: i32) {
        for column in &mut self.columns {
            for si in 0..column.len() {
                let bot = column[si].smax as i32;
                let top = column.get(si + 1).map_or(MAX_HEIGHT, |n| n.smin as i32);
                if top - bot < walkable_height {
                    column[si].area = RC_NULL_AREA;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(w: i32, h: i32) -> Heightfield {
        Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 10.0, h as f32), 1.0, 0.1).unwrap()
    }

    #[test]
    fn test_add_span_keeps_columns_sorted() {
        let mut hf = field(4, 4);
        hf.add_span(1, 1, 20, 30, 1, 1).unwrap();
        hf.add_span(1, 1, 0, 5, 1, 1).unwrap();
        let column = hf.column(1, 1);
        assert_eq!(column.len(), 2);
        assert_eq!(column[0].smax, 5);
        assert_eq!(column[1].smin, 20);
    }

    #[test]
    fn test_add_span_merges_overlaps() {
        let mut hf = field(4, 4);
        hf.add_span(2, 2, 10, 20, RC_NULL_AREA, 1).unwrap();
        hf.add_span(2, 2, 15, 21, RC_WALKABLE_AREA, 1).unwrap();
        let column = hf.column(2, 2);
        assert_eq!(column.len(), 1);
        assert_eq!(column[0].smin, 10);
        assert_eq!(column[0].smax, 21);
        assert_eq!(column[0].area, RC_WALKABLE_AREA);

        // Tops too far apart: the higher top keeps its own area
        hf.add_span(2, 2, 0, 12, RC_WALKABLE_AREA, 1).unwrap();
        hf.add_span(2, 2, 30, 40, RC_NULL_AREA, 1).unwrap();
        hf.add_span(2, 2, 35, 50, 5, 1).unwrap();
        let column = hf.column(2, 2);
        assert_eq!(column.len(), 2);
        assert_eq!(column[1].smax, 50);
        assert_eq!(column[1].area, 5);
    }

    #[test]
    fn test_add_span_out_of_bounds() {
        let mut hf = field(2, 2);
        assert!(hf.add_span(5, 0, 0, 1, 1, 1).is_err());
    }

    #[test]
    fn test_low_height_filter() {
        let mut hf = field(3, 3);
        hf.add_span(1, 1, 0, 10, RC_WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 1, 12, 14, RC_NULL_AREA, 1).unwrap();
        hf.filter_walkable_low_height_spans(5);
        assert_eq!(hf.column(1, 1)[0].area, RC_NULL_AREA);
    }

    #[test]
    fn test_low_hanging_obstacle_filter() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 0, 10, RC_WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 0, 11, 12, RC_NULL_AREA, 1).unwrap();
        hf.filter_low_hanging_walkable_obstacles(3);
        assert_eq!(hf.column(0, 0)[1].area, RC_WALKABLE_AREA);
    }

    #[test]
    fn test_ledge_filter_marks_border_and_keeps_interior() {
        let mut hf = field(5, 5);
        for z in 0..5 {
            for x in 0..5 {
                hf.add_span(x, z, 0, 10, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        hf.filter_ledge_spans(5, 2);
        // Edge columns drop off the heightfield
        assert_eq!(hf.column(0, 2)[0].area, RC_NULL_AREA);
        assert_eq!(hf.column(2, 2)[0].area, RC_WALKABLE_AREA);
    }
}
