//! Crowd agents as seen by the scene: spawn state, move requests, ground snapping and
//! throttled move/steady events

use std::sync::{Arc, Mutex, Weak};

use detour_crowd::{AgentParams, UpdateFlags};
use glam::Vec3;
use recast_common::heading_from_direction;
use serde::{Deserialize, Serialize};

use crate::agent_registry::{AgentIndex, AgentLink};
use crate::collaborators::{CrowdAgentEvent, EventSink, RayCaster};
use crate::nav_mesh::{NavMesh, NavMeshHandle};
use crate::scheduler::lock;
use crate::throttle::ThrottledEvent;

/// Shared handle to a crowd agent
pub type CrowdAgentHandle = Arc<Mutex<CrowdAgent>>;

/// How an agent's simulated position is turned into its scene position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// The simulated position is used as is
    #[default]
    Surface,
    /// The vertical coordinate comes from a downward ray cast against the physics world
    SurfaceWithGroundSnap,
}

/// Crowd simulation parameters of an agent; radius and height come from the navigation mesh
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrowdAgentParams {
    pub max_acceleration: f32,
    pub max_speed: f32,
    pub collision_query_range: f32,
    pub path_optimization_range: f32,
    pub separation_weight: f32,
    pub update_flags: UpdateFlags,
    /// 0 disables avoidance, 1-3 are quality levels
    pub obstacle_avoidance_type: u8,
}

impl Default for CrowdAgentParams {
    fn default() -> Self {
        Self {
            max_acceleration: 8.0,
            max_speed: 3.5,
            collision_query_range: 12.0,
            path_optimization_range: 30.0,
            separation_weight: 2.0,
            update_flags: UpdateFlags::default(),
            obstacle_avoidance_type: 3,
        }
    }
}

impl CrowdAgentParams {
    pub fn to_agent_params(&self, radius: f32, height: f32) -> AgentParams {
        AgentParams {
            radius,
            height,
            max_acceleration: self.max_acceleration,
            max_speed: self.max_speed,
            collision_query_range: self.collision_query_range,
            path_optimization_range: self.path_optimization_range,
            separation_weight: self.separation_weight,
            update_flags: self.update_flags,
            obstacle_avoidance_type: self.obstacle_avoidance_type,
        }
    }
}

/// Last movement request made on an agent, replayed when it is registered
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MoveRequest {
    #[default]
    None,
    Target(Vec3),
    Velocity(Vec3),
}

/// What a navigation mesh hands its agents after each crowd step
pub(crate) struct AgentUpdateEnv<'a> {
    pub ray_caster: &'a dyn RayCaster,
    pub events: &'a dyn EventSink,
    pub movement_type: MovementType,
    pub agent_height: f32,
    pub ground_snap_offset: f32,
    pub ray_mask: u32,
}

/// A crowd agent
#[derive(Debug)]
pub struct CrowdAgent {
    name: String,
    params: Option<CrowdAgentParams>,
    /// `None` follows the navigation mesh's movement type
    movement_type: Option<MovementType>,
    position: Vec3,
    heading: f32,
    velocity: Vec3,
    request: MoveRequest,
    move_event: ThrottledEvent,
    steady_event: ThrottledEvent,
    link: Arc<AgentLink>,
    nav_mesh: Weak<Mutex<NavMesh>>,
}

impl CrowdAgent {
    pub fn new(name: impl Into<String>, position: Vec3) -> Self {
        let name = name.into();
        Self {
            move_event: ThrottledEvent::new(format!("{}_CrowdAgent_Move", name), 30.0),
            steady_event: ThrottledEvent::new(format!("{}_CrowdAgent_Steady", name), 30.0),
            name,
            params: None,
            movement_type: None,
            position,
            heading: 0.0,
            velocity: Vec3::ZERO,
            request: MoveRequest::None,
            link: Arc::new(AgentLink::new()),
            nav_mesh: Weak::new(),
        }
    }

    pub fn new_handle(name: impl Into<String>, position: Vec3) -> CrowdAgentHandle {
        Arc::new(Mutex::new(Self::new(name, position)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Moves an unregistered agent; registered agents are placed by the simulation
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Yaw in radians, following the horizontal direction of travel
    pub fn heading(&self) -> f32 {
        self.heading
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// Own parameters, if set; otherwise the navigation mesh's apply
    pub fn params(&self) -> Option<&CrowdAgentParams> {
        self.params.as_ref()
    }

    pub fn movement_type(&self) -> Option<MovementType> {
        self.movement_type
    }

    pub fn set_movement_type(&mut self, movement_type: Option<MovementType>) {
        self.movement_type = movement_type;
    }

    pub fn move_request(&self) -> MoveRequest {
        self.request
    }

    pub fn move_event(&self) -> &ThrottledEvent {
        &self.move_event
    }

    pub fn move_event_mut(&mut self) -> &mut ThrottledEvent {
        &mut self.move_event
    }

    pub fn steady_event(&self) -> &ThrottledEvent {
        &self.steady_event
    }

    pub fn steady_event_mut(&mut self) -> &mut ThrottledEvent {
        &mut self.steady_event
    }

    pub fn link(&self) -> &Arc<AgentLink> {
        &self.link
    }

    /// Navigation mesh id and crowd slot while registered
    pub fn registration(&self) -> Option<AgentIndex> {
        self.link.get()
    }

    pub fn is_registered(&self) -> bool {
        self.link.is_linked()
    }

    /// The navigation mesh the agent is registered with, if it still exists
    pub fn nav_mesh(&self) -> Option<NavMeshHandle> {
        if !self.is_registered() {
            return None;
        }
        self.nav_mesh.upgrade()
    }

    pub(crate) fn attach(&mut self, nav_mesh: Weak<Mutex<NavMesh>>, move_frequency: f32, steady_frequency: f32) {
        self.nav_mesh = nav_mesh;
        self.move_event.set_frequency(move_frequency);
        self.steady_event.set_frequency(steady_frequency);
        self.move_event.reset();
        self.steady_event.reset();
    }

    pub(crate) fn detach(&mut self) {
        self.nav_mesh = Weak::new();
        self.velocity = Vec3::ZERO;
    }

    /// Applies the result of one crowd step
    pub(crate) fn post_update(&mut self, dt: f32, position: Vec3, velocity: Vec3, env: &AgentUpdateEnv) {
        let mut position = position;
        if velocity.length_squared() > 0.0 {
            if self.movement_type.unwrap_or(env.movement_type) == MovementType::SurfaceWithGroundSnap {
                position.y = ground_snap_height(position, env);
            }
            let horizontal = Vec3::new(velocity.x, 0.0, velocity.z);
            if horizontal.length_squared() > 0.0 {
                self.heading = heading_from_direction(horizontal);
            }
            self.position = position;
            self.velocity = velocity;
            self.steady_event.reset();
            if self.move_event.tick(dt) {
                env.events.throw_event(self.move_event.name(), self.event_payload());
            }
        } else {
            self.position = position;
            self.velocity = Vec3::ZERO;
            self.move_event.reset();
            if self.steady_event.tick(dt) {
                env.events.throw_event(self.steady_event.name(), self.event_payload());
            }
        }
    }

    fn event_payload(&self) -> CrowdAgentEvent {
        CrowdAgentEvent {
            agent: self.name.clone(),
            position: self.position,
            velocity: self.velocity,
        }
    }
}

impl Drop for CrowdAgent {
    fn drop(&mut self) {
        // The navigation mesh prunes the slot on its next update
        if let Some(index) = self.link.invalidate() {
            log::debug!(
                "crowd agent {} dropped while registered in slot {} of navigation mesh {}",
                self.name,
                index.slot,
                index.nav_mesh
            );
        }
    }
}

/// Height of the ground under `position`, or its own height when the ray hits nothing
fn ground_snap_height(position: Vec3, env: &AgentUpdateEnv) -> f32 {
    let max_error = env.agent_height.abs();
    let origin = position + Vec3::new(0.0, max_error, 0.0);
    let end = origin - Vec3::new(0.0, 10.0 * max_error, 0.0);
    match env.ray_caster.ray_test_closest(origin, end, env.ray_mask) {
        Some(hit) => hit.y + env.ground_snap_offset,
        None => position.y,
    }
}

/// Stores `request` and forwards it to the crowd when registered
fn request_move(agent: &CrowdAgentHandle, request: MoveRequest) -> bool {
    let nav = {
        let mut guard = lock(agent);
        guard.request = request;
        guard.nav_mesh()
    };
    match nav {
        Some(nav) => lock(&nav).sync_crowd_agent(agent),
        None => false,
    }
}

/// Sets a move target; returns whether it reached a crowd simulation
pub fn set_crowd_agent_target(agent: &CrowdAgentHandle, target: Vec3) -> bool {
    request_move(agent, MoveRequest::Target(target))
}

/// Drives the agent by velocity instead of a target
pub fn set_crowd_agent_velocity(agent: &CrowdAgentHandle, velocity: Vec3) -> bool {
    request_move(agent, MoveRequest::Velocity(velocity))
}

/// Clears any move request so the agent stops
pub fn reset_crowd_agent_target(agent: &CrowdAgentHandle) -> bool {
    request_move(agent, MoveRequest::None)
}

/// Replaces the agent's own parameters; `None` falls back to the navigation mesh's
pub fn set_crowd_agent_params(agent: &CrowdAgentHandle, params: Option<CrowdAgentParams>) -> bool {
    let nav = {
        let mut guard = lock(agent);
        guard.params = params;
        guard.nav_mesh()
    };
    match nav {
        Some(nav) => lock(&nav).sync_crowd_agent(agent),
        None => false,
    }
}

/// Removes the agent from whatever navigation mesh it is registered with
pub fn remove_from_nav_mesh(agent: &CrowdAgentHandle) -> bool {
    let nav = lock(agent).nav_mesh();
    match nav {
        Some(nav) => lock(&nav).remove_crowd_agent(agent),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct StepRayCaster;

    impl RayCaster for StepRayCaster {
        fn ray_test_closest(&self, origin: Vec3, end: Vec3, _mask: u32) -> Option<Vec3> {
            let ground = if origin.x > 5.0 { 0.5 } else { 0.0 };
            (ground <= origin.y && ground >= end.y).then(|| Vec3::new(origin.x, ground, origin.z))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<String>>,
    }

    impl EventSink for RecordingSink {
        fn throw_event(&self, name: &str, _payload: CrowdAgentEvent) {
            self.events.lock().unwrap().push(name.to_string());
        }
    }

    fn env<'a>(sink: &'a RecordingSink, movement_type: MovementType) -> AgentUpdateEnv<'a> {
        AgentUpdateEnv {
            ray_caster: &StepRayCaster,
            events: sink,
            movement_type,
            agent_height: 2.0,
            ground_snap_offset: 0.1,
            ray_mask: u32::MAX,
        }
    }

    #[test]
    fn test_params_force_radius_and_height() {
        let params = CrowdAgentParams::default().to_agent_params(0.5, 1.8);
        assert_eq!(params.radius, 0.5);
        assert_eq!(params.height, 1.8);
        assert_eq!(params.max_speed, 3.5);
        assert_eq!(params.max_acceleration, 8.0);
    }

    #[test]
    fn test_ground_snap_uses_ray_hit() {
        let sink = RecordingSink::default();
        let mut agent = CrowdAgent::new("walker", Vec3::ZERO);
        let env = env(&sink, MovementType::SurfaceWithGroundSnap);
        agent.post_update(0.1, Vec3::new(6.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.0), &env);
        assert!((agent.position().y - 0.6).abs() < 1e-6);
        agent.post_update(0.1, Vec3::new(4.0, 0.0, 1.0), Vec3::new(-1.0, 0.0, 0.0), &env);
        assert!((agent.position().y - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_surface_mode_keeps_simulated_height() {
        let sink = RecordingSink::default();
        let mut agent = CrowdAgent::new("walker", Vec3::ZERO);
        agent.post_update(0.1, Vec3::new(6.0, 0.25, 1.0), Vec3::X, &env(&sink, MovementType::Surface));
        assert_eq!(agent.position().y, 0.25);
    }

    #[test]
    fn test_heading_follows_velocity() {
        let sink = RecordingSink::default();
        let mut agent = CrowdAgent::new("walker", Vec3::ZERO);
        let env = env(&sink, MovementType::Surface);
        agent.post_update(0.1, Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), &env);
        assert!((agent.heading() - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        // Standing still keeps the last heading
        agent.post_update(0.1, Vec3::ZERO, Vec3::ZERO, &env);
        assert!((agent.heading() - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_move_and_steady_events_alternate() {
        let sink = RecordingSink::default();
        let mut agent = CrowdAgent::new("bob", Vec3::ZERO);
        let env = env(&sink, MovementType::Surface);
        agent.post_update(0.01, Vec3::ZERO, Vec3::X, &env);
        agent.post_update(0.01, Vec3::ZERO, Vec3::X, &env);
        agent.post_update(0.01, Vec3::ZERO, Vec3::ZERO, &env);
        agent.post_update(0.01, Vec3::ZERO, Vec3::X, &env);
        let events = sink.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                "bob_CrowdAgent_Move".to_string(),
                "bob_CrowdAgent_Steady".to_string(),
                "bob_CrowdAgent_Move".to_string(),
            ]
        );
    }

    #[test]
    fn test_unregistered_requests_are_stored() {
        let agent = CrowdAgent::new_handle("idle", Vec3::ZERO);
        assert!(!set_crowd_agent_target(&agent, Vec3::ONE));
        assert_eq!(lock(&agent).move_request(), MoveRequest::Target(Vec3::ONE));
        assert!(!set_crowd_agent_params(&agent, Some(CrowdAgentParams::default())));
        assert!(lock(&agent).params().is_some());
        assert!(!remove_from_nav_mesh(&agent));
    }

    #[test]
    fn test_params_json_defaults() {
        let params: CrowdAgentParams = serde_json::from_str(r#"{"max_speed": 5.0}"#).unwrap();
        assert_eq!(params.max_speed, 5.0);
        assert_eq!(params.separation_weight, 2.0);
        let mode: MovementType = serde_json::from_str(r#""surface_with_ground_snap""#).unwrap();
        assert_eq!(mode, MovementType::SurfaceWithGroundSnap);
    }
}
