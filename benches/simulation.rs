//! # Enzyme Kinetics Simulation Benchmark
//!
//! Integrates the reversible binding of an enzyme to its substrate followed by
//! product formation:
//!
//! ```text
//! S + E <-> C -> E + P,   E = E0 - C
//! ```
//!
//! with three state variables (S, C, P) and the Dormand-Prince 5th order method from
//! `ode_solvers`. The right-hand side is evaluated by hand-written Rust, by a [`Model`]
//! on each backend, and the Jacobian evaluation is measured separately.
//!
//! Run with: `cargo bench --bench simulation`

use std::cell::RefCell;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use ode_solvers::dopri5::*;
use ode_solvers::*;
use ratelaw_jit::prelude::*;

type State = Vector3<f64>;

const NAMES: [&str; 7] = ["S", "C", "P", "k1", "km1", "k2", "E0"];
const STATES: [&str; 3] = ["S", "C", "P"];
const FORMULAS: [&str; 3] = [
    "-k1 * S * (E0 - C) + km1 * C",
    "k1 * S * (E0 - C) - (km1 + k2) * C",
    "k2 * C",
];
const PARAMS: [f64; 4] = [0.01, 0.1, 0.5, 10.0];

/// Hand-written right-hand side, the performance ceiling.
struct DirectSystem;

impl System<f64, State> for DirectSystem {
    fn system(&self, _t: f64, y: &State, dy: &mut State) {
        let [k1, km1, k2, e0] = PARAMS;
        let binding = k1 * y[0] * (e0 - y[1]);
        dy[0] = -binding + km1 * y[1];
        dy[1] = binding - (km1 + k2) * y[1];
        dy[2] = k2 * y[1];
    }
}

/// Right-hand side evaluated through a compiled model.
struct ModelSystem<'a> {
    model: &'a RefCell<Model>,
}

impl System<f64, State> for ModelSystem<'_> {
    fn system(&self, t: f64, y: &State, dy: &mut State) {
        let mut values = [0.0; 7];
        values[..3].copy_from_slice(y.as_slice());
        values[3..].copy_from_slice(&PARAMS);

        let mut rates = [0.0; 3];
        self.model
            .borrow_mut()
            .eval_into(&values, t, &mut rates)
            .expect("value layout matches the model");
        dy.as_mut_slice().copy_from_slice(&rates);
    }
}

fn build_model(config: &CompilerConfig) -> Model {
    let formulas = FORMULAS
        .iter()
        .map(|text| parse_formula(text).expect("valid formula"))
        .collect();
    Model::with_config(formulas, &NAMES, &STATES, config).expect("valid model")
}

fn run_simulation<S: System<f64, State>>(system: S) {
    let y0 = State::new(100.0, 0.0, 0.0);
    let mut stepper = Dopri5::new(system, 0.0, 200.0, 0.1, y0, 1.0e-8, 1.0e-6);
    let _ = stepper.integrate();
}

fn benchmark_simulations(c: &mut Criterion) {
    let mut group = c.benchmark_group("Enzyme Kinetics Simulation");

    group.bench_function("Direct Implementation", |b| {
        b.iter(|| run_simulation(black_box(DirectSystem)))
    });

    let backends = [
        ("Native Model", CompilerConfig::default()),
        ("Stack Machine Model", CompilerConfig::stack_machine()),
        ("Interpreted Model", CompilerConfig::interpreter()),
    ];
    for (label, config) in backends {
        let model = RefCell::new(build_model(&config));
        group.bench_function(label, |b| {
            b.iter(|| run_simulation(black_box(ModelSystem { model: &model })))
        });
    }

    group.finish();
}

fn benchmark_jacobian(c: &mut Criterion) {
    let mut model = build_model(&CompilerConfig::default());
    let mut values = [0.0; 7];
    values[..3].copy_from_slice(&[80.0, 5.0, 15.0]);
    values[3..].copy_from_slice(&PARAMS);
    let mut jac: Vec<Vec<f64>> = Matrix::zeros(3, 3);

    c.bench_function("Jacobian", |b| {
        b.iter(|| {
            model
                .jacobian_into(black_box(&values), 0.0, &mut jac)
                .expect("value layout matches the model")
        })
    });
}

criterion_group!(benches, benchmark_simulations, benchmark_jacobian);
criterion_main!(benches);
