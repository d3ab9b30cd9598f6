//! Interfaces to the systems a navigation mesh depends on but does not own

use std::sync::Arc;

use glam::Vec3;

use crate::scheduler::{FrameScheduler, Scheduler};

/// Closest-hit ray queries against the physics world
pub trait RayCaster: Send + Sync {
    /// Position of the closest hit between `origin` and `end`, or `None`
    fn ray_test_closest(&self, origin: Vec3, end: Vec3, mask: u32) -> Option<Vec3>;
}

/// Payload of the events a crowd agent throws
#[derive(Debug, Clone, PartialEq)]
pub struct CrowdAgentEvent {
    pub agent: String,
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Receiver of named fire-and-forget events
pub trait EventSink: Send + Sync {
    fn throw_event(&self, name: &str, payload: CrowdAgentEvent);
}

/// Ray caster for worlds without physics: nothing is ever hit
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRayCaster;

impl RayCaster for NoRayCaster {
    fn ray_test_closest(&self, _origin: Vec3, _end: Vec3, _mask: u32) -> Option<Vec3> {
        None
    }
}

/// Event sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn throw_event(&self, name: &str, payload: CrowdAgentEvent) {
        log::trace!("event {}: {:?}", name, payload);
    }
}

/// The collaborators handed to a navigation mesh at construction
#[derive(Clone)]
pub struct Collaborators {
    pub ray_caster: Arc<dyn RayCaster>,
    pub scheduler: Arc<dyn Scheduler>,
    pub events: Arc<dyn EventSink>,
}

impl Collaborators {
    pub fn new(
        ray_caster: Arc<dyn RayCaster>,
        scheduler: Arc<dyn Scheduler>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            ray_caster,
            scheduler,
            events,
        }
    }

    /// No physics, a fresh frame scheduler and logged events
    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::new(Arc::new(NoRayCaster), scheduler, Arc::new(LogEventSink))
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::with_scheduler(Arc::new(FrameScheduler::new()))
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
