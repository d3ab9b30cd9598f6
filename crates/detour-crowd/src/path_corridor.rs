//! Path corridor implementation for Detour
//!
//! This module contains the PathCorridor structure: the polygon corridor an agent follows
//! from the polygon it stands on to the polygon holding its target.

use detour::{NavMesh, NavMeshQuery, PolyRef, QueryFilter, Status};
use glam::Vec3;
use recast_common::Result;

/// Path corridor for path following
#[derive(Debug, Clone, Default)]
pub struct PathCorridor {
    /// Current position in the corridor
    pos: Vec3,
    /// Target position in the corridor
    target: Vec3,
    /// Path polygon references, starting at the agent's polygon
    path: Vec<PolyRef>,
}

impl PathCorridor {
    /// Creates a new path corridor
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the corridor to a single polygon
    pub fn reset(&mut self, poly: PolyRef, pos: Vec3) {
        self.pos = pos;
        self.target = pos;
        self.path.clear();
        if !poly.is_null() {
            self.path.push(poly);
        }
    }

    /// Plans a new corridor from the first polygon to `target_ref`
    pub fn find_path(
        &mut self,
        query: &NavMeshQuery,
        target_ref: PolyRef,
        target: Vec3,
        filter: &QueryFilter,
    ) -> Result<()> {
        let start = *self.path.first().ok_or(Status::Failure)?;
        let path = query.find_path(start, target_ref, self.pos, target, filter)?;
        if path.is_empty() {
            return Err(Status::PathInvalid.into());
        }
        self.path = path;
        self.target = target;
        Ok(())
    }

    /// Moves the start of the corridor to `poly` at `pos`.
    ///
    /// Returns false when `poly` is not part of the corridor and a replan is needed.
    pub fn move_position(&mut self, poly: PolyRef, pos: Vec3) -> bool {
        self.pos = pos;
        match self.path.iter().position(|&p| p == poly) {
            Some(k) => {
                self.path.drain(..k);
                true
            }
            None => {
                self.path.clear();
                self.path.push(poly);
                false
            }
        }
    }

    /// Whether every polygon of the corridor still exists and passes the filter
    pub fn is_valid(&self, nav_mesh: &NavMesh, filter: &QueryFilter) -> bool {
        self.path.iter().all(|&r| {
            nav_mesh
                .get_tile_and_poly_by_ref(r)
                .map(|(_, poly)| filter.pass_filter(poly.flags))
                .unwrap_or(false)
        })
    }

    /// Whether the agent stands on the last polygon of the corridor
    pub fn at_last_poly(&self) -> bool {
        self.path.len() <= 1
    }

    pub fn get_pos(&self) -> Vec3 {
        self.pos
    }

    pub fn get_target(&self) -> Vec3 {
        self.target
    }

    pub fn get_path(&self) -> &[PolyRef] {
        &self.path
    }

    /// First polygon of the corridor
    pub fn get_first_poly(&self) -> Option<PolyRef> {
        self.path.first().copied()
    }

    /// Last polygon of the corridor
    pub fn get_last_poly(&self) -> Option<PolyRef> {
        self.path.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset() {
        let mut corridor = PathCorridor::new();
        corridor.reset(PolyRef::new(7), Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(corridor.get_path(), &[PolyRef::new(7)]);
        assert_eq!(corridor.get_target(), Vec3::new(1.0, 0.0, 2.0));
        assert!(corridor.at_last_poly());

        corridor.reset(PolyRef::new(0), Vec3::ZERO);
        assert!(corridor.get_path().is_empty());
    }

    #[test]
    fn test_move_position_trims_or_restarts() {
        let mut corridor = PathCorridor::new();
        corridor.path = vec![PolyRef::new(1), PolyRef::new(2), PolyRef::new(3)];

        assert!(corridor.move_position(PolyRef::new(2), Vec3::X));
        assert_eq!(corridor.get_path(), &[PolyRef::new(2), PolyRef::new(3)]);
        assert_eq!(corridor.get_pos(), Vec3::X);

        assert!(!corridor.move_position(PolyRef::new(9), Vec3::Z));
        assert_eq!(corridor.get_path(), &[PolyRef::new(9)]);
    }
}
