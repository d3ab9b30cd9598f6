//! The navigation mesh entity
//!
//! [`NavMesh`] owns the input geometry, the build pipeline, the build context and a crowd
//! simulation. Agents join through [`NavMesh::add_crowd_agent`], which defers the insertion
//! to the scheduler collaborator until the mesh is built.
//!
//! Lock order is always navigation mesh first, then agent.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use detour::{NavMeshQuery, PolyFlags, PolyRef, QueryFilter};
use detour_crowd::Crowd;
use glam::Vec3;
use recast::{BuildContext, ConvexVolume, TimerCategory};
use recast_common::{Error, Result};
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::agent_registry::{AgentIndex, AgentRegistry};
use crate::collaborators::Collaborators;
use crate::crowd_agent::{AgentUpdateEnv, CrowdAgentHandle, CrowdAgentParams, MoveRequest, MovementType};
use crate::geometry::{InputGeometry, OffMeshConnection};
use crate::pipeline::{BuildInput, BuildOutcome, BuildPipeline, IntermediateMeshes, Pipeline, SoloMesh};
use crate::scheduler::{lock, Scheduler, TaskId};
use crate::settings::{AreaFlagsTable, MeshType, NavMeshConfig, NavMeshSettings, NavMeshTileSettings};
use crate::tile_grid::TileMesh;

/// Shared handle to a navigation mesh
pub type NavMeshHandle = Arc<Mutex<NavMesh>>;

static NEXT_NAV_MESH_ID: AtomicU32 = AtomicU32::new(1);

/// Lifecycle of a navigation mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavMeshState {
    #[default]
    Uninitialized,
    /// Geometry and settings are in place, no tile is installed
    Configured,
    /// At least one tile is installed
    Built,
    Rebuilding,
    TornDown,
}

/// Debug drawing state; drawing itself belongs to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugNode {
    pub visible: bool,
}

fn build_input<'a>(geometry: &'a InputGeometry, config: &'a NavMeshConfig) -> BuildInput<'a> {
    BuildInput {
        geometry,
        settings: config.settings,
        area_flags: &config.area_flags,
        convex_volumes: &config.convex_volumes,
        off_mesh_connections: &config.off_mesh_connections,
    }
}

fn no_geometry() -> Error {
    Error::Configuration("navigation mesh has no input geometry".to_string())
}

fn not_tiled() -> Error {
    Error::Configuration("tile operations need a built tile grid".to_string())
}

/// A navigation mesh with its crowd
pub struct NavMesh {
    id: u32,
    name: String,
    state: NavMeshState,
    config: NavMeshConfig,
    geometry: Option<InputGeometry>,
    pipeline: Option<Pipeline>,
    ctx: BuildContext,
    crowd: Crowd,
    filter: QueryFilter,
    registry: AgentRegistry,
    debug_node: Option<DebugNode>,
    collaborators: Collaborators,
    update_task: Option<TaskId>,
}

impl NavMesh {
    /// Creates an unconfigured navigation mesh.
    ///
    /// The crowd gets `config.max_agents` slots; later configuration changes keep that count.
    pub fn new(name: impl Into<String>, config: NavMeshConfig, collaborators: Collaborators) -> Self {
        let config = config.sanitized();
        let filter = config
            .area_flags
            .query_filter(config.crowd_include_flags, config.crowd_exclude_flags);
        let crowd = Crowd::new(config.max_agents, config.settings.agent_radius);
        Self {
            id: NEXT_NAV_MESH_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            state: NavMeshState::Uninitialized,
            config,
            geometry: None,
            pipeline: None,
            ctx: BuildContext::new(),
            crowd,
            filter,
            registry: AgentRegistry::default(),
            debug_node: None,
            collaborators,
            update_task: None,
        }
    }

    pub fn new_handle(name: impl Into<String>, config: NavMeshConfig, collaborators: Collaborators) -> NavMeshHandle {
        Arc::new(Mutex::new(Self::new(name, config, collaborators)))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> NavMeshState {
        self.state
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    // Configuration. Changes take effect on the next build, except crowd related values
    // which apply to registered agents immediately.

    pub fn config(&self) -> &NavMeshConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: NavMeshConfig) {
        self.config = config.sanitized();
        self.refresh_filter();
        self.refresh_agents();
    }

    pub fn nav_mesh_settings(&self) -> NavMeshSettings {
        self.config.settings
    }

    pub fn set_nav_mesh_settings(&mut self, settings: NavMeshSettings) {
        self.config.settings = settings.sanitized();
        self.refresh_agents();
    }

    pub fn tile_settings(&self) -> NavMeshTileSettings {
        self.config.tile_settings
    }

    pub fn set_tile_settings(&mut self, tile_settings: NavMeshTileSettings) {
        self.config.tile_settings = tile_settings.sanitized();
    }

    pub fn mesh_type(&self) -> MeshType {
        self.config.mesh_type
    }

    pub fn set_mesh_type(&mut self, mesh_type: MeshType) {
        self.config.mesh_type = mesh_type;
    }

    pub fn area_flags(&self) -> &AreaFlagsTable {
        &self.config.area_flags
    }

    pub fn set_area_flags(&mut self, area_flags: AreaFlagsTable) {
        self.config.area_flags = area_flags;
        self.refresh_filter();
    }

    pub fn crowd_flags(&self) -> (PolyFlags, PolyFlags) {
        (self.config.crowd_include_flags, self.config.crowd_exclude_flags)
    }

    pub fn set_crowd_flags(&mut self, include: PolyFlags, exclude: PolyFlags) {
        self.config.crowd_include_flags = include;
        self.config.crowd_exclude_flags = exclude;
        self.refresh_filter();
    }

    pub fn query_filter(&self) -> &QueryFilter {
        &self.filter
    }

    pub fn convex_volumes(&self) -> &[ConvexVolume] {
        &self.config.convex_volumes
    }

    pub fn add_convex_volume(&mut self, volume: ConvexVolume) {
        self.config.convex_volumes.push(volume);
    }

    pub fn clear_convex_volumes(&mut self) {
        self.config.convex_volumes.clear();
    }

    pub fn off_mesh_connections(&self) -> &[OffMeshConnection] {
        &self.config.off_mesh_connections
    }

    pub fn add_off_mesh_connection(&mut self, connection: OffMeshConnection) {
        self.config.off_mesh_connections.push(connection);
    }

    pub fn clear_off_mesh_connections(&mut self) {
        self.config.off_mesh_connections.clear();
    }

    pub fn movement_type(&self) -> MovementType {
        self.config.movement_type
    }

    pub fn set_movement_type(&mut self, movement_type: MovementType) {
        self.config.movement_type = movement_type;
    }

    pub fn ground_snap_offset(&self) -> f32 {
        self.config.ground_snap_offset
    }

    pub fn set_ground_snap_offset(&mut self, offset: f32) {
        self.config.ground_snap_offset = offset;
    }

    pub fn ray_mask(&self) -> u32 {
        self.config.ray_mask
    }

    pub fn set_ray_mask(&mut self, mask: u32) {
        self.config.ray_mask = mask;
    }

    /// Parameters of agents without their own
    pub fn crowd_agent_params(&self) -> CrowdAgentParams {
        self.config.agent_params
    }

    pub fn set_crowd_agent_params(&mut self, params: CrowdAgentParams) {
        self.config.agent_params = params;
        self.refresh_agents();
    }

    fn refresh_filter(&mut self) {
        self.filter = self
            .config
            .area_flags
            .query_filter(self.config.crowd_include_flags, self.config.crowd_exclude_flags);
    }

    /// Pushes current agent parameters and event frequencies to every registered agent
    fn refresh_agents(&mut self) {
        let settings = self.config.settings;
        for (slot, entry) in self.registry.iter() {
            let Some(agent) = entry.agent.upgrade() else {
                continue;
            };
            let mut guard = lock(&agent);
            guard.move_event_mut().set_frequency(self.config.move_event_frequency);
            guard.steady_event_mut().set_frequency(self.config.steady_event_frequency);
            let params = guard
                .params()
                .copied()
                .unwrap_or(self.config.agent_params)
                .to_agent_params(settings.agent_radius, settings.agent_height);
            if let Err(e) = self.crowd.update_agent_parameters(slot, params) {
                log::debug!("crowd slot {} not updated: {}", slot, e);
            }
        }
    }

    // Building

    /// Installs the input geometry, discarding any built mesh
    pub fn setup(&mut self, geometry: InputGeometry) -> bool {
        if self.state == NavMeshState::TornDown {
            log::warn!("navigation mesh {} is torn down; setup ignored", self.name);
            return false;
        }
        self.geometry = Some(geometry);
        self.pipeline = None;
        self.state = NavMeshState::Configured;
        true
    }

    /// Drops the geometry, the built mesh and every registered agent
    pub fn cleanup(&mut self) {
        self.unregister_all();
        self.pipeline = None;
        self.geometry = None;
        if self.state != NavMeshState::TornDown {
            self.state = NavMeshState::Uninitialized;
        }
    }

    pub fn geometry(&self) -> Option<&InputGeometry> {
        self.geometry.as_ref()
    }

    /// Builds or rebuilds the whole mesh; failures are left in the build context log
    pub fn build(&mut self) -> bool {
        match self.try_build() {
            Ok(_) => true,
            Err(e) => {
                log::warn!("navigation mesh {} build failed: {}", self.name, e);
                false
            }
        }
    }

    pub fn try_build(&mut self) -> Result<BuildOutcome> {
        self.ensure_live()?;
        let geometry = self.geometry.as_ref().ok_or_else(no_geometry)?;
        if self.state == NavMeshState::Built {
            self.state = NavMeshState::Rebuilding;
        }
        self.ctx.reset();

        let keep_intermediate = self.config.keep_intermediate || self.debug_node.is_some();
        let pipeline = self.pipeline.insert(match self.config.mesh_type {
            MeshType::Solo => Pipeline::Solo(SoloMesh::new(keep_intermediate)),
            MeshType::Tile => Pipeline::Tiled(TileMesh::new(self.config.tile_settings, keep_intermediate)),
        });
        let input = build_input(geometry, &self.config);
        let result = pipeline.build(&input, &mut self.ctx);
        if let Err(e) = &result {
            self.ctx.error(TimerCategory::Total, e.to_string());
            self.pipeline = None;
        }
        self.refresh_state();
        if let Ok(outcome) = &result {
            log::info!(
                "navigation mesh {} build finished ({:?}, {} tiles)",
                self.name,
                outcome,
                self.tile_count()
            );
        }
        result
    }

    /// Builds the tile containing `pos`; tiled meshes only
    pub fn build_tile(&mut self, pos: Vec3) -> bool {
        match self.try_build_tile(pos) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("navigation mesh {} tile build at {:?} failed: {}", self.name, pos, e);
                false
            }
        }
    }

    pub fn try_build_tile(&mut self, pos: Vec3) -> Result<BuildOutcome> {
        self.ensure_live()?;
        let geometry = self.geometry.as_ref().ok_or_else(no_geometry)?;
        let tiles = self
            .pipeline
            .as_mut()
            .and_then(Pipeline::as_tiled_mut)
            .ok_or_else(not_tiled)?;
        self.ctx.reset();
        let input = build_input(geometry, &self.config);
        let result = tiles.build_tile(&input, &mut self.ctx, pos);
        self.refresh_state();
        result
    }

    /// Removes the tile containing `pos`; returns whether one was installed there
    pub fn remove_tile(&mut self, pos: Vec3) -> bool {
        let removed = self
            .pipeline
            .as_mut()
            .and_then(Pipeline::as_tiled_mut)
            .is_some_and(|tiles| tiles.remove_tile(pos));
        self.refresh_state();
        removed
    }

    pub fn build_all_tiles(&mut self) -> bool {
        match self.try_build_all_tiles() {
            Ok(_) => true,
            Err(e) => {
                log::warn!("navigation mesh {} tile builds failed: {}", self.name, e);
                false
            }
        }
    }

    /// Builds every tile of the grid, returning how many were installed
    pub fn try_build_all_tiles(&mut self) -> Result<usize> {
        self.ensure_live()?;
        let geometry = self.geometry.as_ref().ok_or_else(no_geometry)?;
        let tiles = self
            .pipeline
            .as_mut()
            .and_then(Pipeline::as_tiled_mut)
            .ok_or_else(not_tiled)?;
        self.ctx.reset();
        let input = build_input(geometry, &self.config);
        let result = tiles.build_all_tiles(&input, &mut self.ctx);
        self.refresh_state();
        result
    }

    pub fn remove_all_tiles(&mut self) -> bool {
        let Some(tiles) = self.pipeline.as_mut().and_then(Pipeline::as_tiled_mut) else {
            return false;
        };
        tiles.remove_all_tiles();
        self.refresh_state();
        true
    }

    /// Grid coordinate of the tile containing `pos`
    pub fn get_tile_pos(&self, pos: Vec3) -> Option<(i32, i32)> {
        self.pipeline
            .as_ref()
            .and_then(Pipeline::as_tiled)
            .map(|tiles| tiles.get_tile_pos(pos))
    }

    pub fn tile_count(&self) -> usize {
        self.pipeline.as_ref().map_or(0, |p| p.tile_count())
    }

    /// Writes every installed tile to `path`; tiled meshes only
    pub fn save_all<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.pipeline
            .as_ref()
            .and_then(Pipeline::as_tiled)
            .ok_or_else(not_tiled)?
            .save_all(path)
    }

    /// Replaces the installed tiles with those stored at `path`
    pub fn load_all<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.ensure_live()?;
        let result = self
            .pipeline
            .as_mut()
            .and_then(Pipeline::as_tiled_mut)
            .ok_or_else(not_tiled)?
            .load_all(path);
        self.refresh_state();
        result
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref()
    }

    /// The installed Detour navigation mesh
    pub fn detour_nav_mesh(&self) -> Option<&detour::NavMesh> {
        self.pipeline.as_ref().and_then(|p| p.nav_mesh())
    }

    /// Log and timings of the last build
    pub fn build_context(&self) -> &BuildContext {
        &self.ctx
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state == NavMeshState::TornDown {
            return Err(Error::Configuration(format!("navigation mesh {} is torn down", self.name)));
        }
        Ok(())
    }

    fn refresh_state(&mut self) {
        if self.state == NavMeshState::TornDown {
            return;
        }
        self.state = if self.tile_count() > 0 {
            NavMeshState::Built
        } else if self.geometry.is_some() {
            NavMeshState::Configured
        } else {
            NavMeshState::Uninitialized
        };
    }

    // Queries

    /// Query extents of the configured agent
    fn query_extents(&self) -> Vec3 {
        let s = &self.config.settings;
        Vec3::new(s.agent_radius * 2.0, s.agent_height, s.agent_radius * 2.0)
    }

    /// Nearest polygon the crowd filter accepts
    pub fn find_nearest_poly(&self, pos: Vec3) -> Result<Option<(PolyRef, Vec3)>> {
        let nav = self.detour_nav_mesh().ok_or_else(no_nav_mesh)?;
        NavMeshQuery::new(nav).find_nearest_poly(pos, self.query_extents(), &self.filter)
    }

    /// Polygon corridor between two positions; empty when either end is off the mesh
    pub fn find_path(&self, start: Vec3, end: Vec3) -> Result<Vec<PolyRef>> {
        let nav = self.detour_nav_mesh().ok_or_else(no_nav_mesh)?;
        let query = NavMeshQuery::new(nav);
        let ext = self.query_extents();
        let (Some((start_ref, start_pos)), Some((end_ref, end_pos))) = (
            query.find_nearest_poly(start, ext, &self.filter)?,
            query.find_nearest_poly(end, ext, &self.filter)?,
        ) else {
            return Ok(Vec::new());
        };
        query.find_path(start_ref, end_ref, start_pos, end_pos, &self.filter)
    }

    // Debug

    pub fn create_debug_node(&mut self) {
        if self.debug_node.is_none() {
            self.debug_node = Some(DebugNode::default());
        }
    }

    pub fn debug_node(&self) -> Option<&DebugNode> {
        self.debug_node.as_ref()
    }

    /// Shows or hides the debug node; does nothing without one
    pub fn debug(&mut self, enable: bool) {
        match self.debug_node.as_mut() {
            Some(node) => node.visible = enable,
            None => log::debug!("navigation mesh {} has no debug node", self.name),
        }
    }

    /// Meshes to draw while the debug node is visible
    pub fn debug_meshes(&self) -> Option<&IntermediateMeshes> {
        if !self.debug_node.is_some_and(|node| node.visible) {
            return None;
        }
        self.pipeline.as_ref().and_then(|p| p.intermediate())
    }

    // Crowd

    pub fn crowd(&self) -> &Crowd {
        &self.crowd
    }

    pub fn registered_agent_count(&self) -> usize {
        self.registry.len()
    }

    /// Advances the crowd by `dt` and moves every registered agent to its new state
    pub fn update(&mut self, dt: f32) {
        if self.state == NavMeshState::TornDown {
            return;
        }
        self.prune_stale_agents();
        let Some(nav) = self.pipeline.as_ref().and_then(|p| p.nav_mesh()) else {
            return;
        };
        if let Err(e) = self.crowd.update(dt, nav, &self.filter) {
            log::warn!("navigation mesh {} crowd update failed: {}", self.name, e);
            return;
        }

        let env = AgentUpdateEnv {
            ray_caster: self.collaborators.ray_caster.as_ref(),
            events: self.collaborators.events.as_ref(),
            movement_type: self.config.movement_type,
            agent_height: self.config.settings.agent_height,
            ground_snap_offset: self.config.ground_snap_offset,
            ray_mask: self.config.ray_mask,
        };
        for (slot, entry) in self.registry.iter() {
            let (Some(agent), Some(state)) = (entry.agent.upgrade(), self.crowd.get_agent(slot)) else {
                continue;
            };
            lock(&agent).post_update(dt, state.get_pos(), state.get_vel(), &env);
        }
    }

    fn prune_stale_agents(&mut self) {
        for slot in self.registry.stale_slots(self.id) {
            self.registry.remove(slot);
            if let Err(e) = self.crowd.remove_agent(slot) {
                log::debug!("stale crowd slot {} already free: {}", slot, e);
            }
            log::debug!("navigation mesh {} released stale crowd slot {}", self.name, slot);
        }
    }

    /// Queues `agent` for insertion into the crowd of `nav`.
    ///
    /// The insertion runs on the scheduler collaborator and waits, one scheduling round at a
    /// time, until the mesh is built. Dropping the returned [`PendingRegistration`] cancels it.
    /// Must not be called while `nav` is locked.
    pub fn add_crowd_agent(nav: &NavMeshHandle, agent: &CrowdAgentHandle) -> PendingRegistration {
        let (sender, receiver) = oneshot::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let scheduler = lock(nav).collaborators.scheduler.clone();
        let task = RegistrationTask {
            nav: Arc::downgrade(nav),
            agent: Arc::downgrade(agent),
            cancel: cancel.clone(),
            sender,
            scheduler: scheduler.clone(),
        };
        scheduler.schedule_once(Box::new(move || task.run()));
        PendingRegistration {
            receiver: Some(receiver),
            result: None,
            cancel,
            armed: true,
        }
    }

    fn insert_crowd_agent(&mut self, agent: &CrowdAgentHandle, this: Weak<Mutex<NavMesh>>) -> Result<usize> {
        let nav = self.pipeline.as_ref().and_then(|p| p.nav_mesh()).ok_or_else(no_nav_mesh)?;
        let settings = self.config.settings;
        let mut guard = lock(agent);
        if guard.is_registered() {
            return Err(Error::Configuration(format!(
                "crowd agent {} is already registered",
                guard.name()
            )));
        }
        let params = guard
            .params()
            .copied()
            .unwrap_or(self.config.agent_params)
            .to_agent_params(settings.agent_radius, settings.agent_height);
        let slot = self.crowd.add_agent(guard.position(), params, nav, &self.filter)?;

        let link = guard.link().clone();
        if !link.set(AgentIndex { nav_mesh: self.id, slot }) {
            self.crowd.remove_agent(slot)?;
            return Err(Error::Configuration(format!(
                "crowd agent {} was registered concurrently",
                guard.name()
            )));
        }
        self.registry.insert(slot, link, Arc::downgrade(agent));
        guard.attach(
            this,
            self.config.move_event_frequency,
            self.config.steady_event_frequency,
        );
        let request = guard.move_request();
        drop(guard);

        self.forward_request(slot, request)?;
        Ok(slot)
    }

    fn forward_request(&mut self, slot: usize, request: MoveRequest) -> Result<()> {
        match request {
            MoveRequest::None => self.crowd.reset_move_target(slot),
            MoveRequest::Velocity(velocity) => self.crowd.request_move_velocity(slot, velocity),
            MoveRequest::Target(target) => {
                let ext = self.query_extents();
                let nav = self.pipeline.as_ref().and_then(|p| p.nav_mesh()).ok_or_else(no_nav_mesh)?;
                match NavMeshQuery::new(nav).find_nearest_poly(target, ext, &self.filter)? {
                    Some((poly, pos)) => self.crowd.request_move_target(slot, poly, pos),
                    None => {
                        log::debug!("move target {:?} is off the navigation mesh", target);
                        self.crowd.reset_move_target(slot)
                    }
                }
            }
        }
    }

    /// Forwards an agent's stored parameters and move request to its crowd slot
    pub(crate) fn sync_crowd_agent(&mut self, agent: &CrowdAgentHandle) -> bool {
        let (slot, params, request) = {
            let guard = lock(agent);
            match guard.registration() {
                Some(index) if index.nav_mesh == self.id => (
                    index.slot,
                    guard.params().copied().unwrap_or(self.config.agent_params),
                    guard.move_request(),
                ),
                _ => return false,
            }
        };
        let settings = self.config.settings;
        let params = params.to_agent_params(settings.agent_radius, settings.agent_height);
        if let Err(e) = self.crowd.update_agent_parameters(slot, params) {
            log::debug!("crowd slot {} not updated: {}", slot, e);
            return false;
        }
        match self.forward_request(slot, request) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("crowd slot {} move request not forwarded: {}", slot, e);
                false
            }
        }
    }

    /// Removes a registered agent from the crowd.
    ///
    /// Returns false when the agent is not registered here or a removal is already running.
    pub fn remove_crowd_agent(&mut self, agent: &CrowdAgentHandle) -> bool {
        let link = lock(agent).link().clone();
        if !link.begin_removal() {
            return false;
        }
        let removed = match link.get() {
            Some(index) if index.nav_mesh == self.id => {
                link.invalidate_if(index);
                self.registry.remove(index.slot);
                if let Err(e) = self.crowd.remove_agent(index.slot) {
                    log::debug!("crowd slot {} already free: {}", index.slot, e);
                }
                lock(agent).detach();
                true
            }
            _ => false,
        };
        link.end_removal();
        removed
    }

    fn unregister_all(&mut self) {
        let agents: Vec<_> = self.registry.iter().map(|(_, entry)| entry.agent.clone()).collect();
        for slot in self.registry.invalidate_all(self.id) {
            // Slots of dropped agents may already be free
            let _ = self.crowd.remove_agent(slot);
        }
        for agent in agents.iter().filter_map(Weak::upgrade) {
            let mut guard = lock(&agent);
            if !guard.is_registered() {
                guard.detach();
            }
        }
    }

    /// Runs [`NavMesh::update`] with a fixed `dt` on every round of the scheduler.
    ///
    /// Replaces any previously started update task. Must not be called while `nav` is locked.
    pub fn start_crowd_updates(nav: &NavMeshHandle, dt: f32) -> TaskId {
        let weak = Arc::downgrade(nav);
        let scheduler = lock(nav).collaborators.scheduler.clone();
        let id = scheduler.schedule_repeating(Box::new(move || {
            if let Some(nav) = weak.upgrade() {
                lock(&nav).update(dt);
            }
        }));
        let previous = lock(nav).update_task.replace(id);
        if let Some(previous) = previous {
            scheduler.cancel(previous);
        }
        id
    }

    pub fn stop_crowd_updates(&mut self) -> bool {
        match self.update_task.take() {
            Some(id) => self.collaborators.scheduler.cancel(id),
            None => false,
        }
    }

    /// Final shutdown: agents are unlinked and every later build fails
    pub fn teardown(&mut self) {
        if self.state == NavMeshState::TornDown {
            return;
        }
        self.stop_crowd_updates();
        self.cleanup();
        self.state = NavMeshState::TornDown;
        log::info!("navigation mesh {} torn down", self.name);
    }
}

fn no_nav_mesh() -> Error {
    Error::Configuration("navigation mesh is not built".to_string())
}

impl Drop for NavMesh {
    fn drop(&mut self) {
        self.stop_crowd_updates();
        self.unregister_all();
    }
}

impl std::fmt::Debug for NavMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavMesh")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("tiles", &self.tile_count())
            .field("agents", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Deferred insertion of one agent into one navigation mesh
struct RegistrationTask {
    nav: Weak<Mutex<NavMesh>>,
    agent: Weak<Mutex<crate::crowd_agent::CrowdAgent>>,
    cancel: Arc<AtomicBool>,
    sender: oneshot::Sender<bool>,
    scheduler: Arc<dyn Scheduler>,
}

impl RegistrationTask {
    fn run(self) {
        if self.cancel.load(Ordering::Acquire) {
            log::debug!("crowd agent registration cancelled");
            return;
        }
        let Some(nav) = self.nav.upgrade() else {
            log::debug!("navigation mesh dropped before crowd agent registration");
            let _ = self.sender.send(false);
            return;
        };
        let Some(agent) = self.agent.upgrade() else {
            log::debug!("crowd agent dropped before registration");
            let _ = self.sender.send(false);
            return;
        };

        let mut guard = lock(&nav);
        let state = guard.state;
        match state {
            NavMeshState::TornDown => {
                drop(guard);
                let _ = self.sender.send(false);
            }
            NavMeshState::Built => {
                let registered = match guard.insert_crowd_agent(&agent, Arc::downgrade(&nav)) {
                    Ok(slot) => {
                        log::debug!("navigation mesh {} registered crowd agent in slot {}", guard.name, slot);
                        true
                    }
                    Err(e) => {
                        log::warn!("navigation mesh {} rejected crowd agent: {}", guard.name, e);
                        false
                    }
                };
                drop(guard);
                let _ = self.sender.send(registered);
            }
            _ => {
                drop(guard);
                let scheduler = self.scheduler.clone();
                scheduler.schedule_next_round(Box::new(move || self.run()));
            }
        }
    }
}

/// Result of [`NavMesh::add_crowd_agent`]; dropping it before completion cancels the registration
#[derive(Debug)]
pub struct PendingRegistration {
    receiver: Option<oneshot::Receiver<bool>>,
    result: Option<bool>,
    cancel: Arc<AtomicBool>,
    armed: bool,
}

impl PendingRegistration {
    /// Lets the registration complete without anyone waiting for it
    pub fn detach(mut self) {
        self.armed = false;
    }

    /// `Some(registered)` once the registration has run; false when it could not happen
    pub fn try_result(&mut self) -> Option<bool> {
        if self.result.is_none() {
            if let Some(receiver) = self.receiver.as_mut() {
                match receiver.try_recv() {
                    Ok(registered) => self.result = Some(registered),
                    Err(TryRecvError::Closed) => self.result = Some(false),
                    Err(TryRecvError::Empty) => {}
                }
            }
        }
        self.result
    }

    pub async fn wait(mut self) -> bool {
        if let Some(result) = self.try_result() {
            return result;
        }
        let Some(receiver) = self.receiver.take() else {
            return false;
        };
        let registered = receiver.await.unwrap_or(false);
        self.result = Some(registered);
        registered
    }
}

impl Drop for PendingRegistration {
    fn drop(&mut self) {
        if self.armed && self.result.is_none() {
            self.cancel.store(true, Ordering::Release);
        }
    }
}
