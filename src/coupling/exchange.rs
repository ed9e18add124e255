//! Per-iteration field exchange.
//!
//! Each iteration the solver computes X, Y and Z velocities over its slice
//! of the grid, then runs three strictly sequential all-gathers over the
//! channel (X, then Y, then Z). Solver ranks contribute their slices;
//! tracker ranks contribute nothing and receive the whole field,
//! concatenated in solver rank order. No transfer overlaps another or the
//! next iteration's compute.

use std::time::Instant;

use super::{Coordinator, ProtocolState, Role};
use crate::config::{SolverConfig, TrackerConfig};
use crate::error::Result;
use crate::simulate;
use crate::stats::Stats;

/// One velocity component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    X,
    Y,
    Z,
}

impl Component {
    /// Transfer order within an iteration.
    pub const ALL: [Component; 3] = [Component::X, Component::Y, Component::Z];
}

/// Flat storage for one component, allocated once and overwritten in place.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBuffer {
    component: Component,
    values: Vec<f64>,
}

impl FieldBuffer {
    pub fn new(component: Component, len: usize) -> Self {
        Self {
            component,
            values: vec![0.0; len],
        }
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// X, Y and Z velocity buffers of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityField {
    components: [FieldBuffer; 3],
}

impl VelocityField {
    pub fn new(len: usize) -> Self {
        Self {
            components: Component::ALL.map(|c| FieldBuffer::new(c, len)),
        }
    }

    fn index(component: Component) -> usize {
        match component {
            Component::X => 0,
            Component::Y => 1,
            Component::Z => 2,
        }
    }

    pub fn component(&self, component: Component) -> &FieldBuffer {
        &self.components[Self::index(component)]
    }

    pub fn component_mut(&mut self, component: Component) -> &mut FieldBuffer {
        &mut self.components[Self::index(component)]
    }

    /// Points per component.
    pub fn len(&self) -> usize {
        self.components[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.components[0].is_empty()
    }

    /// Bytes held across all three components.
    pub fn bytes(&self) -> usize {
        self.len() * 3 * std::mem::size_of::<f64>()
    }
}

impl Coordinator<'_> {
    /// Transfer all three components across the channel.
    ///
    /// Solver ranks send their slice from `field`; tracker ranks overwrite
    /// `field` with the full concatenated field. A solver without a partner
    /// returns immediately. Any failure ends the protocol.
    pub fn exchange(&mut self, field: &mut VelocityField) -> Result<()> {
        self.expect(ProtocolState::Exchanging, "exchange")?;
        let Some(channel) = &self.channel else {
            return Ok(());
        };

        for component in Component::ALL {
            let buffer = field.component_mut(component);
            let result = match self.role {
                Role::Solver => channel.all_gather_into(self.comm, buffer.values(), &mut []),
                Role::Tracker => channel.all_gather_into(self.comm, &[], buffer.values_mut()),
            };
            if let Err(e) = result {
                self.state = ProtocolState::Done;
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Solver loop: compute, then hand the field to the tracker.
pub fn run_solver(
    coordinator: &mut Coordinator<'_>,
    config: &SolverConfig,
    mut stats: Option<&mut Stats>,
) -> Result<VelocityField> {
    let local_rank = coordinator.group().local_rank();
    let is_leader = coordinator.group().is_leader();
    let coupled = coordinator.channel().is_some();

    let mut field = VelocityField::new(config.grid_per_rank(coordinator.group().local_size()));

    for iteration in 0..config.iterations {
        let _span = tracing::debug_span!("iteration", iteration).entered();
        tracing::info!("Solving for velocities [solver {local_rank}]");

        let compute_start = Instant::now();
        simulate::solve_velocities(&mut field, local_rank, iteration, config.delay());
        if let Some(stats) = stats.as_deref_mut() {
            stats.compute += compute_start.elapsed();
        }

        if coupled {
            let transfer_start = Instant::now();
            coordinator.exchange(&mut field)?;
            let elapsed = transfer_start.elapsed();
            if is_leader {
                tracing::info!("{:.2}s to transfer solution", elapsed.as_secs_f64());
            }
            if let Some(stats) = stats.as_deref_mut() {
                stats.record_transfer(elapsed, field.bytes());
            }
        }
        if let Some(stats) = stats.as_deref_mut() {
            stats.iterations += 1;
        }
    }

    coordinator.finish()?;
    Ok(field)
}

/// Tracker loop: receive the field, then track particles through it.
pub fn run_tracker(
    coordinator: &mut Coordinator<'_>,
    config: &TrackerConfig,
    mut stats: Option<&mut Stats>,
) -> Result<VelocityField> {
    let global_rank = coordinator.context().global_rank();
    let particles = config.particles_per_rank(coordinator.group().local_size());

    let mut field = VelocityField::new(config.field_len());

    for iteration in 0..config.iterations {
        let _span = tracing::debug_span!("iteration", iteration).entered();

        let transfer_start = Instant::now();
        coordinator.exchange(&mut field)?;
        if let Some(stats) = stats.as_deref_mut() {
            stats.record_transfer(transfer_start.elapsed(), field.bytes());
        }

        tracing::info!("Tracking particles [tracker {global_rank}]");
        let compute_start = Instant::now();
        let mean_speed = simulate::track_particles(&field, particles, config.delay());
        tracing::debug!(mean_speed, particles, "particles advanced");
        if let Some(stats) = stats.as_deref_mut() {
            stats.compute += compute_start.elapsed();
            stats.iterations += 1;
        }
    }

    coordinator.finish()?;
    Ok(field)
}
