//! Multi-agent crowd simulation on navigation meshes
//!
//! This crate manages a fixed pool of agents navigating on a shared navigation mesh.
//! Agents follow polygon corridors planned by [`detour::NavMeshQuery`], keep apart from
//! their neighbours and are projected back onto the mesh surface every step.
//!
//! # Example
//!
//! ```rust,ignore
//! use detour_crowd::{AgentParams, Crowd};
//!
//! let mut crowd = Crowd::new(32, 0.6);
//! let agent = crowd.add_agent(start_pos, AgentParams::default(), &nav_mesh, &filter)?;
//! crowd.request_move_target(agent, target_poly, target_pos)?;
//! crowd.update(delta_time, &nav_mesh, &filter)?;
//! ```
//!
//! # Architecture
//!
//! - [`Crowd`]: Main simulation manager
//! - [`PathCorridor`]: Manages agent path state

pub mod crowd;
pub mod path_corridor;

#[cfg(test)]
mod test_support;

pub use crowd::{AgentParams, Crowd, CrowdAgent, CrowdAgentState, MoveRequestState, UpdateFlags};
pub use path_corridor::PathCorridor;
