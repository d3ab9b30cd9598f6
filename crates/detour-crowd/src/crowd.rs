//! Crowd management for Detour
//!
//! A crowd owns a fixed number of agent slots. Each call to [`Crowd::update`] is one atomic
//! simulation step: paths are planned, every desired velocity is computed from the state
//! all agents had at the end of the previous step, and only then are the agents integrated
//! and projected back onto the navigation mesh.

use detour::{NavMesh, NavMeshQuery, PolyRef, QueryFilter, Status};
use glam::Vec3;
use recast_common::{Error, Result};

use super::path_corridor::PathCorridor;

/// Default radius of an agent
const DEFAULT_AGENT_RADIUS: f32 = 0.6;

/// Default height of an agent
const DEFAULT_AGENT_HEIGHT: f32 = 2.0;

/// Default max acceleration of an agent
const DEFAULT_AGENT_MAX_ACCELERATION: f32 = 8.0;

/// Default max speed of an agent
const DEFAULT_AGENT_MAX_SPEED: f32 = 3.5;

/// Speeds below this are treated as standing still
const MIN_SPEED: f32 = 0.0001;

/// State of an agent with respect to the navigation mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrowdAgentState {
    /// The agent is not on the navigation mesh
    #[default]
    Invalid,
    /// The agent is walking on a navigation mesh polygon
    Walking,
}

/// Move request state for agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveRequestState {
    /// No target; the agent slows to a stop
    #[default]
    None,
    /// Planning the target failed
    Failed,
    /// A target was requested and a corridor must be planned
    Requesting,
    /// Following a planned corridor
    Valid,
    /// Driven by a requested velocity
    Velocity,
}

/// Update flags for crowd agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct UpdateFlags(pub u8);

impl UpdateFlags {
    pub const ANTICIPATE_TURNS: UpdateFlags = UpdateFlags(1);
    pub const OBSTACLE_AVOIDANCE: UpdateFlags = UpdateFlags(2);
    pub const SEPARATION: UpdateFlags = UpdateFlags(4);
    pub const OPTIMIZE_VIS: UpdateFlags = UpdateFlags(8);
    pub const OPTIMIZE_TOPO: UpdateFlags = UpdateFlags(16);

    /// Check if flags contain the specified flag
    pub fn contains(&self, other: UpdateFlags) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for UpdateFlags {
    fn default() -> Self {
        UpdateFlags(
            UpdateFlags::ANTICIPATE_TURNS.0
                | UpdateFlags::OBSTACLE_AVOIDANCE.0
                | UpdateFlags::SEPARATION.0,
        )
    }
}

/// Agent parameters for crowd
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct AgentParams {
    /// Radius of the agent
    pub radius: f32,
    /// Height of the agent
    pub height: f32,
    /// Maximum acceleration of the agent
    pub max_acceleration: f32,
    /// Maximum speed of the agent
    pub max_speed: f32,
    /// Range within which other agents are considered for separation
    pub collision_query_range: f32,
    /// Path optimization range
    pub path_optimization_range: f32,
    /// How strongly the agent keeps away from its neighbours
    pub separation_weight: f32,
    /// Update flags for the agent
    pub update_flags: UpdateFlags,
    /// Obstacle avoidance quality (0 = disabled, 1-3 quality levels)
    pub obstacle_avoidance_type: u8,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            radius: DEFAULT_AGENT_RADIUS,
            height: DEFAULT_AGENT_HEIGHT,
            max_acceleration: DEFAULT_AGENT_MAX_ACCELERATION,
            max_speed: DEFAULT_AGENT_MAX_SPEED,
            collision_query_range: 12.0,
            path_optimization_range: 30.0,
            separation_weight: 2.0,
            update_flags: UpdateFlags::default(),
            obstacle_avoidance_type: 3,
        }
    }
}

/// Agent in the crowd
#[derive(Debug, Clone, Default)]
pub struct CrowdAgent {
    active: bool,
    state: CrowdAgentState,
    params: AgentParams,
    pos: Vec3,
    vel: Vec3,
    desired_vel: Vec3,
    /// Polygon the agent stands on
    poly: PolyRef,
    corridor: PathCorridor,
    target_state: MoveRequestState,
    target_ref: PolyRef,
    target_pos: Vec3,
    /// Requested velocity while in `MoveRequestState::Velocity`
    target_vel: Vec3,
}

impl CrowdAgent {
    /// Gets the agent's position
    pub fn get_pos(&self) -> Vec3 {
        self.pos
    }

    /// Gets the agent's velocity
    pub fn get_vel(&self) -> Vec3 {
        self.vel
    }

    /// Gets the velocity the agent was steering towards in the last update
    pub fn get_desired_vel(&self) -> Vec3 {
        self.desired_vel
    }

    /// Gets the agent's target position
    pub fn get_target(&self) -> Vec3 {
        self.target_pos
    }

    pub fn get_state(&self) -> CrowdAgentState {
        self.state
    }

    pub fn get_target_state(&self) -> MoveRequestState {
        self.target_state
    }

    /// Gets the agent's parameters
    pub fn get_params(&self) -> &AgentParams {
        &self.params
    }

    /// Gets the polygon the agent stands on
    pub fn get_poly(&self) -> PolyRef {
        self.poly
    }

    pub fn get_corridor(&self) -> &PathCorridor {
        &self.corridor
    }

    /// Gets whether the slot holds an agent
    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Crowd manager
#[derive(Debug)]
pub struct Crowd {
    max_agent_radius: f32,
    agents: Vec<CrowdAgent>,
}

impl Crowd {
    /// Creates a crowd with `max_agents` slots
    pub fn new(max_agents: usize, max_agent_radius: f32) -> Self {
        Self {
            max_agent_radius,
            agents: vec![CrowdAgent::default(); max_agents],
        }
    }

    /// Number of agent slots
    pub fn get_agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Number of slots holding an agent
    pub fn get_active_agent_count(&self) -> usize {
        self.agents.iter().filter(|a| a.active).count()
    }

    /// Gets an active agent
    pub fn get_agent(&self, idx: usize) -> Option<&CrowdAgent> {
        self.agents.get(idx).filter(|a| a.active)
    }

    /// Half extents used to place agents on the navigation mesh
    fn placement_extents(&self, params: &AgentParams) -> Vec3 {
        let r = self.max_agent_radius.max(params.radius);
        Vec3::new(r * 2.0, r * 1.5 + params.height * 0.5, r * 2.0)
    }

    fn active_agent_mut(&mut self, idx: usize) -> Result<&mut CrowdAgent> {
        match self.agents.get_mut(idx) {
            Some(agent) if agent.active => Ok(agent),
            _ => Err(Status::NotFound.into()),
        }
    }

    /// Adds an agent at `pos`, snapped to the nearest polygon when there is one.
    ///
    /// Returns the agent's slot index.
    pub fn add_agent(
        &mut self,
        pos: Vec3,
        params: AgentParams,
        nav_mesh: &NavMesh,
        filter: &QueryFilter,
    ) -> Result<usize> {
        if !pos.is_finite() {
            return Err(Status::InvalidParam.into());
        }
        let idx = self
            .agents
            .iter()
            .position(|a| !a.active)
            .ok_or_else(|| Error::ResourceExhaustion(format!("all {} crowd slots are in use", self.agents.len())))?;

        let query = NavMeshQuery::new(nav_mesh);
        let nearest = query.find_nearest_poly(pos, self.placement_extents(&params), filter)?;

        let mut agent = CrowdAgent {
            active: true,
            params,
            pos,
            ..CrowdAgent::default()
        };
        match nearest {
            Some((poly, nearest_pos)) => {
                agent.pos = nearest_pos;
                agent.poly = poly;
                agent.state = CrowdAgentState::Walking;
            }
            None => {
                log::debug!("crowd agent {} added off the navigation mesh at {:?}", idx, pos);
            }
        }
        agent.corridor.reset(agent.poly, agent.pos);
        self.agents[idx] = agent;
        Ok(idx)
    }

    /// Removes an agent, freeing its slot
    pub fn remove_agent(&mut self, idx: usize) -> Result<()> {
        let agent = self.active_agent_mut(idx)?;
        *agent = CrowdAgent::default();
        Ok(())
    }

    /// Replaces an agent's parameters
    pub fn update_agent_parameters(&mut self, idx: usize, params: AgentParams) -> Result<()> {
        self.active_agent_mut(idx)?.params = params;
        Ok(())
    }

    /// Requests a new move target; the corridor is planned in the next update
    pub fn request_move_target(&mut self, idx: usize, target_ref: PolyRef, pos: Vec3) -> Result<()> {
        if target_ref.is_null() || !pos.is_finite() {
            return Err(Status::InvalidParam.into());
        }
        let agent = self.active_agent_mut(idx)?;
        agent.target_ref = target_ref;
        agent.target_pos = pos;
        agent.target_state = MoveRequestState::Requesting;
        Ok(())
    }

    /// Requests the agent to move with a fixed velocity
    pub fn request_move_velocity(&mut self, idx: usize, vel: Vec3) -> Result<()> {
        if !vel.is_finite() {
            return Err(Status::InvalidParam.into());
        }
        let agent = self.active_agent_mut(idx)?;
        agent.target_ref = PolyRef::default();
        agent.target_vel = vel;
        agent.target_state = MoveRequestState::Velocity;
        Ok(())
    }

    /// Clears any move request; the agent slows to a stop
    pub fn reset_move_target(&mut self, idx: usize) -> Result<()> {
        let agent = self.active_agent_mut(idx)?;
        agent.target_ref = PolyRef::default();
        agent.target_vel = Vec3::ZERO;
        agent.target_state = MoveRequestState::None;
        let (poly, pos) = (agent.poly, agent.pos);
        agent.corridor.reset(poly, pos);
        Ok(())
    }

    /// Advances the whole crowd by `dt` seconds
    pub fn update(&mut self, dt: f32, nav_mesh: &NavMesh, filter: &QueryFilter) -> Result<()> {
        if !dt.is_finite() || dt <= 0.0 {
            return Ok(());
        }
        let query = NavMeshQuery::new(nav_mesh);

        self.check_path_validity(&query, filter)?;
        self.update_move_requests(&query, filter);

        // Everything below reads the previous step's positions
        let snapshot: Vec<(bool, Vec3)> = self
            .agents
            .iter()
            .map(|a| (a.active && a.state == CrowdAgentState::Walking, a.pos))
            .collect();

        for idx in 0..self.agents.len() {
            if !snapshot[idx].0 {
                continue;
            }
            let dvel = self.calc_desired_velocity(idx, &query)?;
            let dvel = self.apply_separation(idx, dvel, &snapshot);
            self.agents[idx].desired_vel = dvel;
        }

        for agent in self.agents.iter_mut().filter(|a| a.active && a.state == CrowdAgentState::Walking) {
            integrate(agent, dt);
        }

        for idx in 0..self.agents.len() {
            if snapshot[idx].0 {
                self.project_to_surface(idx, snapshot[idx].1, &query, filter)?;
            }
        }
        Ok(())
    }

    /// Re-places agents whose polygon disappeared and replans corridors through removed tiles
    fn check_path_validity(&mut self, query: &NavMeshQuery, filter: &QueryFilter) -> Result<()> {
        let nav_mesh = query.nav_mesh();
        for idx in 0..self.agents.len() {
            if !self.agents[idx].active {
                continue;
            }
            let ext = self.placement_extents(&self.agents[idx].params);
            let agent = &mut self.agents[idx];

            if !nav_mesh.is_valid_poly_ref(agent.poly) {
                match query.find_nearest_poly(agent.pos, ext, filter)? {
                    Some((poly, pos)) => {
                        agent.poly = poly;
                        agent.pos = pos;
                        agent.state = CrowdAgentState::Walking;
                        agent.corridor.reset(poly, pos);
                        if agent.target_state == MoveRequestState::Valid {
                            agent.target_state = MoveRequestState::Requesting;
                        }
                    }
                    None => {
                        agent.state = CrowdAgentState::Invalid;
                        agent.vel = Vec3::ZERO;
                        agent.desired_vel = Vec3::ZERO;
                        agent.corridor.reset(PolyRef::default(), agent.pos);
                        continue;
                    }
                }
            }

            if agent.target_state == MoveRequestState::Valid {
                let target_ok = nav_mesh.is_valid_poly_ref(agent.target_ref);
                if !target_ok {
                    // Try to keep the same target position on whatever replaced its polygon
                    match query.find_nearest_poly(agent.target_pos, ext, filter)? {
                        Some((r, p)) => {
                            agent.target_ref = r;
                            agent.target_pos = p;
                            agent.target_state = MoveRequestState::Requesting;
                        }
                        None => agent.target_state = MoveRequestState::Failed,
                    }
                } else if !agent.corridor.is_valid(nav_mesh, filter) {
                    agent.target_state = MoveRequestState::Requesting;
                }
            }
        }
        Ok(())
    }

    fn update_move_requests(&mut self, query: &NavMeshQuery, filter: &QueryFilter) {
        for (idx, agent) in self.agents.iter_mut().enumerate() {
            if !agent.active
                || agent.state != CrowdAgentState::Walking
                || agent.target_state != MoveRequestState::Requesting
            {
                continue;
            }
            agent.corridor.reset(agent.poly, agent.pos);
            match agent.corridor.find_path(query, agent.target_ref, agent.target_pos, filter) {
                Ok(()) => {
                    // A partial corridor retargets to the closest reachable polygon
                    if agent.corridor.get_last_poly() != Some(agent.target_ref) {
                        if let Some(last) = agent.corridor.get_last_poly() {
                            if let Ok(p) = query.closest_point_on_poly(last, agent.target_pos) {
                                agent.target_pos = p;
                                agent.target_ref = last;
                            }
                        }
                    }
                    agent.target_state = MoveRequestState::Valid;
                }
                Err(e) => {
                    log::debug!("crowd agent {} failed to plan a path: {}", idx, e);
                    agent.target_state = MoveRequestState::Failed;
                }
            }
        }
    }

    fn calc_desired_velocity(&mut self, idx: usize, query: &NavMeshQuery) -> Result<Vec3> {
        let agent = &mut self.agents[idx];
        match agent.target_state {
            MoveRequestState::Velocity => Ok(agent.target_vel),
            MoveRequestState::Valid => {
                let to_target = flat(agent.target_pos - agent.pos);
                let arrive_dist = (agent.params.radius * 0.25).max(0.01);
                if agent.corridor.at_last_poly() && to_target.length() <= arrive_dist {
                    agent.target_state = MoveRequestState::None;
                    return Ok(Vec3::ZERO);
                }

                let steer = query.next_steer_point(agent.corridor.get_path(), agent.target_pos)?;
                let dir = flat(steer - agent.pos).normalize_or_zero();

                // Slow down within two radii of the goal
                let slow_down_radius = agent.params.radius * 2.0;
                let speed_scale = if agent.corridor.at_last_poly() && slow_down_radius > 0.0 {
                    (to_target.length() / slow_down_radius).min(1.0)
                } else {
                    1.0
                };
                Ok(dir * agent.params.max_speed * speed_scale)
            }
            MoveRequestState::None | MoveRequestState::Failed | MoveRequestState::Requesting => {
                Ok(Vec3::ZERO)
            }
        }
    }

    fn apply_separation(&self, idx: usize, dvel: Vec3, snapshot: &[(bool, Vec3)]) -> Vec3 {
        let agent = &self.agents[idx];
        let params = &agent.params;
        if !params.update_flags.contains(UpdateFlags::SEPARATION) || params.separation_weight <= 0.0 {
            return dvel;
        }

        let separation_dist = params.collision_query_range;
        if separation_dist <= 0.0 {
            return dvel;
        }
        let pos = snapshot[idx].1;
        let mut disp = Vec3::ZERO;
        let mut w = 0.0;
        for (j, &(walking, other)) in snapshot.iter().enumerate() {
            if j == idx || !walking {
                continue;
            }
            let diff = flat(pos - other);
            let dist_sqr = diff.length_squared();
            if dist_sqr < 0.00001 || dist_sqr > separation_dist * separation_dist {
                continue;
            }
            let dist = dist_sqr.sqrt();
            let weight = params.separation_weight * (1.0 - (dist / separation_dist).powi(2));
            disp += diff * (weight / dist);
            w += 1.0;
        }
        if w <= 0.0001 {
            return dvel;
        }

        let desired_speed = dvel.length();
        let mut out = dvel + disp * (1.0 / w);
        // Separation may steer but never speed up the agent
        let speed_sqr = out.length_squared();
        let desired_sqr = desired_speed * desired_speed;
        if speed_sqr > desired_sqr && speed_sqr > 0.0 {
            out *= desired_sqr / speed_sqr;
        }
        out
    }

    /// Moves the agent onto the navigation mesh surface, or back to `prev` when it left the mesh
    fn project_to_surface(&mut self, idx: usize, prev: Vec3, query: &NavMeshQuery, filter: &QueryFilter) -> Result<()> {
        let ext = self.placement_extents(&self.agents[idx].params);
        let agent = &mut self.agents[idx];
        match query.find_nearest_poly(agent.pos, ext, filter)? {
            Some((poly, pos)) => {
                agent.pos = pos;
                agent.poly = poly;
                if !agent.corridor.move_position(poly, pos) && agent.target_state == MoveRequestState::Valid {
                    agent.target_state = MoveRequestState::Requesting;
                }
            }
            None => {
                agent.pos = prev;
                agent.vel = Vec3::ZERO;
            }
        }
        Ok(())
    }
}

#[inline]
fn flat(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

/// Acceleration-limited velocity update followed by position integration
fn integrate(agent: &mut CrowdAgent, dt: f32) {
    let max_delta = agent.params.max_acceleration * dt;
    let mut dv = agent.desired_vel - agent.vel;
    let ds = dv.length();
    if ds > max_delta && ds > 0.0 {
        dv *= max_delta / ds;
    }
    agent.vel += dv;
    agent.vel = agent.vel.clamp_length_max(agent.params.max_speed.max(agent.target_vel.length()));

    if agent.vel.length() > MIN_SPEED {
        agent.pos += agent.vel * dt;
    } else {
        agent.vel = Vec3::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{plane_nav_mesh, walk_filter};

    #[test]
    fn test_add_and_remove_agent() {
        let nav = plane_nav_mesh();
        let filter = walk_filter();
        let mut crowd = Crowd::new(2, 0.6);
        let a = crowd.add_agent(Vec3::new(5.0, 1.0, 5.0), AgentParams::default(), &nav, &filter).unwrap();
        let b = crowd.add_agent(Vec3::new(6.0, 1.0, 5.0), AgentParams::default(), &nav, &filter).unwrap();
        assert_ne!(a, b);
        assert_eq!(crowd.get_active_agent_count(), 2);

        // Snapped to the surface
        let agent = crowd.get_agent(a).unwrap();
        assert_eq!(agent.get_state(), CrowdAgentState::Walking);
        assert!(agent.get_pos().y.abs() < 0.5);

        let err = crowd
            .add_agent(Vec3::new(7.0, 1.0, 5.0), AgentParams::default(), &nav, &filter)
            .unwrap_err();
        assert!(err.is_resource_exhaustion());

        crowd.remove_agent(a).unwrap();
        assert!(crowd.get_agent(a).is_none());
        assert!(crowd.remove_agent(a).is_err());
        assert_eq!(crowd.get_active_agent_count(), 1);
    }

    #[test]
    fn test_agent_off_mesh_is_invalid() {
        let nav = plane_nav_mesh();
        let mut crowd = Crowd::new(1, 0.6);
        let idx = crowd
            .add_agent(Vec3::new(100.0, 0.0, 100.0), AgentParams::default(), &nav, &walk_filter())
            .unwrap();
        assert_eq!(crowd.get_agent(idx).unwrap().get_state(), CrowdAgentState::Invalid);
        crowd.update(0.1, &nav, &walk_filter()).unwrap();
        assert_eq!(crowd.get_agent(idx).unwrap().get_pos(), Vec3::new(100.0, 0.0, 100.0));
    }

    #[test]
    fn test_agent_reaches_target() {
        let nav = plane_nav_mesh();
        let filter = walk_filter();
        let query = NavMeshQuery::new(&nav);
        let mut crowd = Crowd::new(4, 0.6);
        let idx = crowd.add_agent(Vec3::new(3.0, 0.0, 3.0), AgentParams::default(), &nav, &filter).unwrap();

        let target = Vec3::new(12.0, 0.0, 7.0);
        let (tref, tpos) = query
            .find_nearest_poly(target, Vec3::new(1.0, 2.0, 1.0), &filter)
            .unwrap()
            .unwrap();
        crowd.request_move_target(idx, tref, tpos).unwrap();

        crowd.update(0.1, &nav, &filter).unwrap();
        assert_eq!(crowd.get_agent(idx).unwrap().get_target_state(), MoveRequestState::Valid);
        assert!(crowd.get_agent(idx).unwrap().get_vel().length() > 0.0);

        for _ in 0..200 {
            crowd.update(0.1, &nav, &filter).unwrap();
        }
        let agent = crowd.get_agent(idx).unwrap();
        let d = flat(agent.get_pos() - tpos).length();
        assert!(d < 0.5, "agent stopped {} from its target", d);
        assert!(agent.get_vel().length() < 0.5);
    }

    #[test]
    fn test_velocity_request_and_reset() {
        let nav = plane_nav_mesh();
        let filter = walk_filter();
        let mut crowd = Crowd::new(1, 0.6);
        let idx = crowd.add_agent(Vec3::new(5.0, 0.0, 5.0), AgentParams::default(), &nav, &filter).unwrap();

        crowd.request_move_velocity(idx, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        for _ in 0..10 {
            crowd.update(0.1, &nav, &filter).unwrap();
        }
        let agent = crowd.get_agent(idx).unwrap();
        assert!(agent.get_pos().x > 5.5);
        assert!((agent.get_vel().x - 1.0).abs() < 1e-3);

        crowd.reset_move_target(idx).unwrap();
        for _ in 0..10 {
            crowd.update(0.1, &nav, &filter).unwrap();
        }
        assert_eq!(crowd.get_agent(idx).unwrap().get_vel(), Vec3::ZERO);
    }

    #[test]
    fn test_agents_stay_on_mesh() {
        let nav = plane_nav_mesh();
        let filter = walk_filter();
        let mut crowd = Crowd::new(1, 0.6);
        let idx = crowd.add_agent(Vec3::new(5.0, 0.0, 5.0), AgentParams::default(), &nav, &filter).unwrap();
        crowd.request_move_velocity(idx, Vec3::new(-3.0, 0.0, 0.0)).unwrap();
        for _ in 0..100 {
            crowd.update(0.1, &nav, &filter).unwrap();
        }
        // The plane starts at x = 0 and is eroded by the agent radius
        assert!(crowd.get_agent(idx).unwrap().get_pos().x > 0.0);
    }

    #[test]
    fn test_separation_pushes_agents_apart() {
        let nav = plane_nav_mesh();
        let filter = walk_filter();
        let params = AgentParams {
            collision_query_range: 2.0,
            ..AgentParams::default()
        };
        let mut crowd = Crowd::new(2, 0.6);
        let a = crowd.add_agent(Vec3::new(8.0, 0.0, 5.0), params.clone(), &nav, &filter).unwrap();
        let b = crowd.add_agent(Vec3::new(8.5, 0.0, 5.0), params, &nav, &filter).unwrap();
        let query = NavMeshQuery::new(&nav);
        let (tref, tpos) = query
            .find_nearest_poly(Vec3::new(8.0, 0.0, 9.0), Vec3::splat(1.0), &filter)
            .unwrap()
            .unwrap();
        crowd.request_move_target(a, tref, tpos).unwrap();
        crowd.update(0.1, &nav, &filter).unwrap();
        crowd.update(0.1, &nav, &filter).unwrap();
        // Agent a steers away from b while heading for its target
        assert!(crowd.get_agent(a).unwrap().get_desired_vel().x < 0.0);
        assert_eq!(crowd.get_agent(b).unwrap().get_desired_vel(), Vec3::ZERO);
    }

    #[test]
    fn test_removed_tile_invalidates_agent() {
        let mut nav = plane_nav_mesh();
        let filter = walk_filter();
        let mut crowd = Crowd::new(1, 0.6);
        let idx = crowd.add_agent(Vec3::new(5.0, 0.0, 5.0), AgentParams::default(), &nav, &filter).unwrap();
        let tref = nav.get_tile_ref_at(0, 0, 0).unwrap();
        nav.remove_tile(tref).unwrap();
        crowd.update(0.1, &nav, &filter).unwrap();
        assert_eq!(crowd.get_agent(idx).unwrap().get_state(), CrowdAgentState::Invalid);
    }
}
