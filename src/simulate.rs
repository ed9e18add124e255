//! Toy stand-ins for the solver and tracker physics.
//!
//! Both sleep for the configured delay to mimic computation. The solver
//! fills its slice with `local_rank + iteration`, which makes the origin
//! and freshness of every received value easy to check.

use std::thread;
use std::time::Duration;

use crate::coupling::{Component, VelocityField};

/// Compute this rank's velocities for `iteration`.
pub fn solve_velocities(field: &mut VelocityField, local_rank: usize, iteration: usize, delay: Duration) {
    thread::sleep(delay);
    let value = (local_rank + iteration) as f64;
    for component in Component::ALL {
        field.component_mut(component).values_mut().fill(value);
    }
}

/// Advance this rank's particles through the field; returns the mean speed.
pub fn track_particles(field: &VelocityField, particles: usize, delay: Duration) -> f64 {
    thread::sleep(delay);
    if field.is_empty() || particles == 0 {
        return 0.0;
    }
    let x = field.component(Component::X).values();
    let y = field.component(Component::Y).values();
    let z = field.component(Component::Z).values();
    // Particles are spread evenly across the grid.
    let total: f64 = (0..particles)
        .map(|p| {
            let i = p * field.len() / particles;
            (x[i] * x[i] + y[i] * y[i] + z[i] * z[i]).sqrt()
        })
        .sum();
    total / particles as f64
}
