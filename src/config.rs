//! Run configuration for each role and its startup validation.
//!
//! Validation never fails outright: it returns a `ValidationReport` whose
//! issue count is broadcast during the startup handshake, so both coupled
//! programs make the same continue/abort decision.

use std::fmt;
use std::time::Duration;

use crate::coupling::Role;

/// A configuration problem found at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    InvalidDelay(f64),
    NoGridPoints(i64),
    GridNotDivisible { grid_points: i64, ranks: usize },
    NoParticles(i64),
    ParticlesNotDivisible { particles: i64, ranks: usize },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::InvalidDelay(delay) => {
                write!(f, "delay must be a representable non-negative number of seconds, got {delay}")
            }
            ValidationIssue::NoGridPoints(n) => write!(f, "no grid points specified ({n})"),
            ValidationIssue::GridNotDivisible { grid_points, ranks } => write!(
                f,
                "number of grid points ({grid_points}) must be divisible by number of ranks ({ranks})"
            ),
            ValidationIssue::NoParticles(n) => write!(f, "no particles specified ({n})"),
            ValidationIssue::ParticlesNotDivisible { particles, ranks } => write!(
                f,
                "number of particles ({particles}) must be divisible by number of ranks ({ranks})"
            ),
        }
    }
}

/// Issues found while validating one role's configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    /// The integer error count exchanged during the handshake.
    pub fn error_count(&self) -> u32 {
        self.issues.len() as u32
    }

    fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    /// Log every issue. Callers restrict this to group leaders.
    pub fn log(&self, role: Role) {
        for issue in &self.issues {
            tracing::error!(%role, "{issue}");
        }
    }
}

/// Negative, non-finite and too-large delays are all rejected.
fn check_delay(delay_secs: f64, report: &mut ValidationReport) {
    if Duration::try_from_secs_f64(delay_secs).is_err() {
        report.push(ValidationIssue::InvalidDelay(delay_secs));
    }
}

fn delay_of(delay_secs: f64) -> Duration {
    Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::ZERO)
}

/// Solver arguments: `<delay> <iterations> <grid points>`.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    pub delay_secs: f64,
    pub iterations: usize,
    pub grid_points: i64,
}

impl SolverConfig {
    pub fn validate(&self, group_size: usize) -> ValidationReport {
        let mut report = ValidationReport::default();
        check_delay(self.delay_secs, &mut report);
        if self.grid_points <= 0 {
            report.push(ValidationIssue::NoGridPoints(self.grid_points));
        } else if self.grid_points % group_size as i64 != 0 {
            report.push(ValidationIssue::GridNotDivisible {
                grid_points: self.grid_points,
                ranks: group_size,
            });
        }
        report
    }

    /// Grid points owned by each solver rank. Only meaningful once
    /// `validate` has passed.
    pub fn grid_per_rank(&self, group_size: usize) -> usize {
        usize::try_from(self.grid_points).unwrap_or(0) / group_size.max(1)
    }

    pub fn delay(&self) -> Duration {
        delay_of(self.delay_secs)
    }
}

/// Tracker arguments: `<delay> <iterations> <grid points> <particles>`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub delay_secs: f64,
    pub iterations: usize,
    pub grid_points: i64,
    pub particles: i64,
}

impl TrackerConfig {
    pub fn validate(&self, group_size: usize) -> ValidationReport {
        let mut report = ValidationReport::default();
        check_delay(self.delay_secs, &mut report);
        if self.grid_points <= 0 {
            report.push(ValidationIssue::NoGridPoints(self.grid_points));
        }
        if self.particles <= 0 {
            report.push(ValidationIssue::NoParticles(self.particles));
        } else if self.particles % group_size as i64 != 0 {
            report.push(ValidationIssue::ParticlesNotDivisible {
                particles: self.particles,
                ranks: group_size,
            });
        }
        report
    }

    /// Length of each full-field receive buffer.
    pub fn field_len(&self) -> usize {
        usize::try_from(self.grid_points).unwrap_or(0)
    }

    pub fn particles_per_rank(&self, group_size: usize) -> usize {
        usize::try_from(self.particles).unwrap_or(0) / group_size.max(1)
    }

    pub fn delay(&self) -> Duration {
        delay_of(self.delay_secs)
    }
}

/// Configuration of whichever role this process plays.
#[derive(Debug, Clone, PartialEq)]
pub enum RoleConfig {
    Solver(SolverConfig),
    Tracker(TrackerConfig),
}

impl RoleConfig {
    pub fn role(&self) -> Role {
        match self {
            RoleConfig::Solver(_) => Role::Solver,
            RoleConfig::Tracker(_) => Role::Tracker,
        }
    }

    pub fn validate(&self, group_size: usize) -> ValidationReport {
        match self {
            RoleConfig::Solver(config) => config.validate(group_size),
            RoleConfig::Tracker(config) => config.validate(group_size),
        }
    }
}
