//! Scripted walk through the object lifecycle.
//!
//! Builds a small population of actors, reshapes them at run time, copies and
//! moves a few, and collects the registry counters afterwards.

use crate::settings::DemoSettings;
use anyhow::{ensure, Result};
use morph_core::define_mixin;
use morph_core::mixin::{component, composition, CompositionDescriptor, Mixin, TypeClass};
use morph_core::storage::{owner_of, AllocatorHandle, HeapAllocator, TrackingAllocator};
use morph_core::{CompositionTemplate, Object, RetypeStatus};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq)]
pub struct Health {
    pub value: i32,
}
define_mixin!(Health, 1, "Health", clone);

impl Default for Health {
    fn default() -> Self {
        Self { value: 100 }
    }
}

#[derive(Default, Clone, Debug, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
define_mixin!(Position, 2, "Position", clone);

#[derive(Default, Clone, Debug, PartialEq)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}
define_mixin!(Velocity, 3, "Velocity", clone);

/// Stands in for a resource that must not be duplicated.
#[derive(Default, Debug)]
pub struct Controller {
    pub port: u16,
}
define_mixin!(Controller, 4, "Controller");

fn is_mobile(c: &CompositionDescriptor) -> bool {
    c.has(Position::ID) && c.has(Velocity::ID)
}

pub const MOBILE: TypeClass = TypeClass::new("mobile", is_mobile);

#[derive(Debug, Default, Serialize)]
pub struct ComponentReport {
    pub name: String,
    pub live_instances: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct AllocatorReport {
    pub live_blocks: usize,
    pub total_blocks: usize,
    pub attached_objects: usize,
    pub live_cell_arrays: usize,
    pub moves: usize,
    pub copies: usize,
}

/// Counters collected while the demo population was still alive.
#[derive(Debug, Default, Serialize)]
pub struct DemoReport {
    pub objects: usize,
    pub mobile: usize,
    pub failed_copies: usize,
    pub components: Vec<ComponentReport>,
    pub allocator: Option<AllocatorReport>,
    /// Tracking allocator counters after every object was dropped.
    pub allocator_after: Option<AllocatorReport>,
}

fn allocator_report(tracker: &TrackingAllocator) -> AllocatorReport {
    AllocatorReport {
        live_blocks: tracker.live_blocks(),
        total_blocks: tracker.total_blocks(),
        attached_objects: tracker.attached_objects(),
        live_cell_arrays: tracker.live_cell_arrays(),
        moves: tracker.moves(),
        copies: tracker.copies(),
    }
}

pub fn run(settings: &DemoSettings) -> Result<DemoReport> {
    let tracker = settings
        .use_tracking_allocator
        .then(|| Arc::new(TrackingAllocator::new(HeapAllocator)));
    let handle = tracker.clone().map(AllocatorHandle::from_arc);

    let mut report = DemoReport::default();
    {
        let mut actors = spawn(settings.object_count, handle.as_ref())?;
        reshape(&mut actors)?;
        report.failed_copies = duplicate(&mut actors)?;
        relocate(&mut actors)?;

        report.objects = actors.len();
        report.mobile = actors.iter().filter(|actor| actor.is_a(&MOBILE)).count();
        report.components = [Health::ID, Position::ID, Velocity::ID, Controller::ID]
            .into_iter()
            .filter_map(component)
            .map(|info| ComponentReport {
                name: info.name().to_string(),
                live_instances: info.live_instances(),
            })
            .collect();
        report.allocator = tracker.as_deref().map(allocator_report);
    }
    report.allocator_after = tracker.as_deref().map(allocator_report);

    if let Some(after) = &report.allocator_after {
        ensure!(after.live_blocks == 0, "{} component blocks leaked", after.live_blocks);
        ensure!(after.attached_objects == 0, "{} objects never detached", after.attached_objects);
    }
    Ok(report)
}

fn spawn(count: usize, handle: Option<&AllocatorHandle>) -> Result<Vec<Object>> {
    let template = CompositionTemplate::new().with::<Health>().with::<Position>();
    let mut actors = Vec::with_capacity(count);
    for index in 0..count {
        let mut actor = Object::from_template(&template, handle.cloned())?;
        if let Some(position) = actor.get_mut::<Position>() {
            position.x = index as f32;
        }
        actors.push(actor);
    }
    info!(count, "spawned actors");
    Ok(actors)
}

/// Give every other actor a velocity, integrate once, then ground the first one.
fn reshape(actors: &mut [Object]) -> Result<()> {
    Velocity::descriptor();
    for actor in actors.iter_mut().step_by(2) {
        CompositionTemplate::of(actor).with::<Velocity>().apply_to(actor)?;
        if let Some(velocity) = actor.get_mut::<Velocity>() {
            velocity.dx = 1.0;
        }
    }

    for actor in actors.iter_mut().filter(|actor| actor.is_a(&MOBILE)) {
        let dx = actor.get_ref::<Velocity>().map_or(0.0, |v| v.dx);
        if let Some(position) = actor.get_mut::<Position>() {
            position.x += dx;
        }
    }

    if let Some(first) = actors.first_mut() {
        let grounded = composition(&[Health::ID])?;
        first.retype(grounded);
        ensure!(!first.has(Position::ID), "grounded actor kept its position");
    }
    Ok(())
}

/// Copy one actor, move another, and try copying an actor holding a
/// non-copyable controller. Returns the number of degraded copies.
fn duplicate(actors: &mut Vec<Object>) -> Result<usize> {
    let mut failed = 0;
    if let Some(last) = actors.last() {
        let copy = last.try_clone()?;
        actors.push(copy);
    }

    let mut controlled = Object::from_template(
        &CompositionTemplate::new().with::<Health>().with::<Controller>(),
        None,
    )?;
    if let Some(controller) = controlled.get_mut::<Controller>() {
        controller.port = 7;
    }
    if !controlled.copyable() {
        let mut replica = Object::new();
        if let Err(err) = replica.copy_from(&controlled) {
            warn!(%err, "controller could not be copied");
            failed += 1;
        }
        actors.push(replica);
    }

    let moved = controlled.take();
    for id in moved.composition().ids() {
        if let Some(data) = moved.get(id) {
            // SAFETY: `data` comes from a live cell of `moved`.
            let tag = unsafe { owner_of(data) };
            ensure!(tag.object() == moved.id(), "component {id} still points at its old owner");
        }
    }
    actors.push(moved);

    let status = CompositionTemplate::new().apply_to(&mut controlled)?;
    debug!(?status, "reset moved-from object");
    ensure!(status == RetypeStatus::Success && controlled.is_empty());
    Ok(failed)
}

#[cfg(feature = "relocation")]
fn relocate(actors: &mut [Object]) -> Result<()> {
    for actor in actors.iter_mut() {
        actor.reallocate_all()?;
    }
    debug!(count = actors.len(), "reallocated actors");
    Ok(())
}

#[cfg(not(feature = "relocation"))]
fn relocate(_actors: &mut [Object]) -> Result<()> {
    Ok(())
}
