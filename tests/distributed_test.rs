//! MPI-backed coupling tests.
//!
//! These tests require MPI and the `distributed` feature flag.
//! Run with: mpirun -n 1 cargo test --features distributed --test distributed_test
//!
//! Without MPI installed, these tests are excluded from the default build.

#![cfg(feature = "distributed")]

use mpmd_coupler::comm::mpi_backend::MpiComm;
use mpmd_coupler::comm::CommunicationBackend;
use mpmd_coupler::config::{RoleConfig, SolverConfig};
use mpmd_coupler::coupling::{self, Component};

#[test]
fn standalone_solver_single_rank() {
    // A single MPI rank running the solver alone exercises the backend's
    // self-broadcast and gather paths without a partner program.
    let _universe = mpi::initialize().expect("MPI init failed");
    let comm = MpiComm::new();
    assert_eq!(comm.num_ranks(), 1);

    let config = RoleConfig::Solver(SolverConfig {
        delay_secs: 0.0,
        iterations: 2,
        grid_points: 4,
    });
    let field = coupling::run(&comm, &config, None, None).expect("solver run failed");

    assert_eq!(field.len(), 4);
    assert_eq!(field.component(Component::Z).values(), &[1.0; 4]);
}
