//! Navigation mesh entities for scene hosts
//!
//! This crate ties the Recast build stages, the Detour runtime mesh and the crowd
//! simulation into one [`NavMesh`] object a host can configure, build, stream tiles into and
//! populate with crowd agents.
//!
//! # Example
//!
//! ```rust,ignore
//! use navmesh::{Collaborators, CrowdAgent, InputGeometry, NavMesh, NavMeshConfig};
//!
//! let config = NavMeshConfig::from_json_file("level.json")?;
//! let nav = NavMesh::new_handle("level", config, Collaborators::default());
//! {
//!     let mut nav = nav.lock().unwrap();
//!     nav.setup(InputGeometry::from_obj_file("level.obj")?);
//!     nav.build();
//! }
//!
//! let agent = CrowdAgent::new_handle("guard", spawn_pos);
//! NavMesh::add_crowd_agent(&nav, &agent).detach();
//! navmesh::set_crowd_agent_target(&agent, target);
//! ```
//!
//! # Architecture
//!
//! - [`NavMesh`]: the entity; state machine, build entry points, crowd registry
//! - [`Pipeline`]: [`SoloMesh`] or [`TileMesh`] behind the [`BuildPipeline`] trait
//! - [`Collaborators`]: ray casting, scheduling and events supplied by the host
//! - [`CrowdAgent`]: scene side of a crowd agent, with ground snapping and throttled events

pub mod agent_registry;
pub mod collaborators;
pub mod crowd_agent;
pub mod geometry;
pub mod nav_mesh;
pub mod pipeline;
pub mod scheduler;
pub mod settings;
pub mod throttle;
pub mod tile_grid;

pub use agent_registry::{AgentIndex, AgentLink};
pub use collaborators::{Collaborators, CrowdAgentEvent, EventSink, LogEventSink, NoRayCaster, RayCaster};
pub use crowd_agent::{
    remove_from_nav_mesh, reset_crowd_agent_target, set_crowd_agent_params, set_crowd_agent_target,
    set_crowd_agent_velocity, CrowdAgent, CrowdAgentHandle, CrowdAgentParams, MoveRequest, MovementType,
};
pub use geometry::{InputGeometry, OffMeshConnection};
pub use nav_mesh::{DebugNode, NavMesh, NavMeshHandle, NavMeshState, PendingRegistration};
pub use pipeline::{BuildInput, BuildOutcome, BuildPipeline, IntermediateMeshes, Pipeline, SoloMesh, TileBuildStats};
pub use scheduler::{FrameScheduler, Scheduler, TaskId, WorkerScheduler};
pub use settings::{AreaFlags, AreaFlagsTable, MeshType, NavMeshConfig, NavMeshSettings, NavMeshTileSettings};
pub use throttle::ThrottledEvent;
pub use tile_grid::TileMesh;

pub use recast_common::{Error, Result};
