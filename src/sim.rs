//! Scenario driver
//!
//! Builds the frame, mass and body trees plus the time graph from a
//! [`ScenarioConfig`], then steps every root body through whole integration
//! cycles. Each cycle evaluates derivatives at every stage, advances the
//! clock by the fraction of the step the integrators actually took and brings
//! the time graph and frame timestamps up to date.

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use serde::Serialize;

use crate::body::{BodyDerivatives, BodyId, DynManager, IntegratedFrame};
use crate::config::{EnvironmentConfig, ScenarioConfig};
use crate::diagnostics::{codes, SharedSink};
use crate::error::{DynError, Result};
use crate::frame::{FrameId, FrameItems, RefFrameState};
use crate::integration::{IntegrationControls, IntegratorResult, IntegratorResultMerger, TimeInterface};
use crate::mass::{MassPoint, MassProperties};
use crate::time::{
    DynTaiConverter, StdUdeConverter, TaiOffsetConverter, TaiUtcConverter, TimeKind, TimeManager, TimeNode,
};

/// Name of the inertial integration frame every scenario starts with
pub const INERTIAL_FRAME: &str = "Earth.inertial";

/// Bound on stages within one integration cycle
const MAX_CYCLE_STAGES: u32 = 10_000;

/// Accelerations acting on a root body
///
/// Central-body gravity with an optional J2 term, and torque-free rigid body
/// rotation.
#[derive(Debug, Clone, Copy)]
pub struct DerivativeModel {
    pub mu: f64,
    /// J2 coefficient and reference radius, when enabled
    pub j2: Option<(f64, f64)>,
}

impl DerivativeModel {
    pub fn from_config(environment: &EnvironmentConfig) -> Self {
        Self {
            mu: environment.mu,
            j2: environment
                .include_j2
                .then_some((environment.j2, environment.equatorial_radius)),
        }
    }

    /// Point mass acceleration: a = -μ/r³ × r, plus J2 when enabled
    pub fn gravity(&self, position: &Vector3<f64>) -> Vector3<f64> {
        let r = position.norm();
        if r < 1.0 {
            return Vector3::zeros();
        }
        let r2 = r * r;
        let mut accel = -self.mu / (r2 * r) * position;

        if let Some((j2, radius)) = self.j2 {
            let factor = 1.5 * j2 * self.mu * radius * radius / (r2 * r2 * r);
            let z2_r2 = position.z * position.z / r2;
            accel += factor
                * Vector3::new(
                    position.x * (5.0 * z2_r2 - 1.0),
                    position.y * (5.0 * z2_r2 - 1.0),
                    position.z * (5.0 * z2_r2 - 3.0),
                );
        }
        accel
    }

    /// Euler's equations with no external torque: I ω̇ = -ω × I ω
    pub fn angular_acceleration(&self, rate: &Vector3<f64>, inertia: &Matrix3<f64>) -> Vector3<f64> {
        match inertia.try_inverse() {
            Some(inverse) => inverse * (-rate.cross(&(inertia * rate))),
            None => Vector3::zeros(),
        }
    }

    pub fn derivatives(&self, state: &RefFrameState, inertia: &Matrix3<f64>) -> BodyDerivatives {
        BodyDerivatives {
            trans_accel: self.gravity(&state.trans.position),
            rot_accel: self.angular_acceleration(state.rot.ang_vel_this(), inertia),
        }
    }
}

/// A named frame position in the final report
#[derive(Debug, Clone, Serialize)]
pub struct PointReport {
    pub name: String,
    pub position: [f64; 3],
}

/// Final inertial state of one body's composite frame
#[derive(Debug, Clone, Serialize)]
pub struct BodyReport {
    pub name: String,
    /// Root of the body's tree
    pub root: String,
    /// Composite mass (kg)
    pub mass: f64,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    /// Scalar first
    pub quaternion: [f64; 4],
    pub rate: [f64; 3],
    pub points: Vec<PointReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeReport {
    pub name: String,
    pub seconds: f64,
    pub days: f64,
    pub calendar: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub integrator: String,
    pub cycles: u64,
    pub dyn_seconds: f64,
    pub times: Vec<TimeReport>,
    pub bodies: Vec<BodyReport>,
}

/// Owns the body and time managers of one scenario
pub struct Simulation {
    config: ScenarioConfig,
    dynamics: DynManager,
    time: TimeManager,
    model: DerivativeModel,
    controls: IntegrationControls,
    clock: TimeInterface,
    inertial: FrameId,
}

fn vector(values: &[f64; 3]) -> Vector3<f64> {
    Vector3::new(values[0], values[1], values[2])
}

fn unit_quaternion(owner: &str, q: &[f64; 4]) -> Result<UnitQuaternion<f64>> {
    let raw = Quaternion::new(q[0], q[1], q[2], q[3]);
    if !(raw.norm() > 0.0) {
        return Err(DynError::Config {
            message: format!("{} has a zero quaternion", owner),
        });
    }
    Ok(UnitQuaternion::from_quaternion(raw))
}

impl Simulation {
    pub fn new(config: ScenarioConfig, sink: SharedSink) -> Result<Self> {
        config.validate()?;
        let mut dynamics = DynManager::new(sink.clone());
        let inertial = dynamics.add_integ_frame(INERTIAL_FRAME, None, RefFrameState::default())?;
        let time = build_time(&config, sink)?;

        let mut sim = Self {
            model: DerivativeModel::from_config(&config.environment),
            controls: IntegrationControls::new(config.integrator.step_size),
            clock: TimeInterface::new(config.time.time_scale),
            config,
            dynamics,
            time,
            inertial,
        };
        sim.build_bodies()?;
        log::info!(
            "Scenario ready: {} bodies, {} integration, step {} s",
            sim.dynamics.len(),
            sim.config.integrator.kind.name(),
            sim.config.integrator.step_size
        );
        Ok(sim)
    }

    fn build_bodies(&mut self) -> Result<()> {
        let bodies = self.config.bodies.clone();
        let mut ids = Vec::with_capacity(bodies.len());

        for body in &bodies {
            let [ixx, iyy, izz] = body.inertia;
            let core = MassProperties::new(
                body.mass,
                vector(&body.center_of_mass),
                Matrix3::from_diagonal(&Vector3::new(ixx, iyy, izz)),
            );
            let id = self.dynamics.add_body(&body.name, core, self.inertial)?;
            self.dynamics.set_three_dof(id, body.three_dof);
            self.dynamics.set_rotational_technique(id, body.rotational_technique);
            self.dynamics.set_integrated_frame(id, body.integrated)?;
            for point in &body.points {
                self.dynamics
                    .add_vehicle_point(id, MassPoint::aligned(&point.name, vector(&point.position)))?;
            }

            if body.attach.is_none() {
                let mut state = RefFrameState::default();
                state.trans.position = vector(&body.position);
                state.trans.velocity = vector(&body.velocity);
                state.rot.set_quaternion(unit_quaternion(&body.name, &body.quaternion)?);
                state.rot.set_ang_vel(vector(&body.rate));
                let frame = match body.state_frame {
                    IntegratedFrame::Structure => self.dynamics.body(id).structure,
                    IntegratedFrame::Composite => self.dynamics.body(id).composite_body,
                };
                self.dynamics.set_state(id, frame, &state, FrameItems::FULL);
                self.dynamics.propagate_state(id)?;
            }
            ids.push(id);
        }

        for (body, &id) in bodies.iter().zip(&ids) {
            if let Some(attach) = &body.attach {
                let parent = self.dynamics.find_body(&attach.parent).ok_or_else(|| DynError::Config {
                    message: format!("attach parent '{}' not found", attach.parent),
                })?;
                let offset = MassPoint::with_quaternion(
                    &format!("{}.attach", body.name),
                    vector(&attach.position),
                    unit_quaternion(&body.name, &attach.quaternion)?,
                );
                self.dynamics.attach(id, parent, offset)?;
            }
        }

        let constructor = self.config.integrator.kind.constructor(&self.config.integrator);
        for id in ids {
            self.dynamics.create_body_integrators(id, constructor.as_ref())?;
        }
        Ok(())
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn dynamics(&self) -> &DynManager {
        &self.dynamics
    }

    /// Structural edits between steps (attach, detach, frame switches)
    pub fn dynamics_mut(&mut self) -> &mut DynManager {
        &mut self.dynamics
    }

    pub fn time(&self) -> &TimeManager {
        &self.time
    }

    pub fn clock(&self) -> &TimeInterface {
        &self.clock
    }

    pub fn controls(&self) -> &IntegrationControls {
        &self.controls
    }

    pub fn model(&self) -> &DerivativeModel {
        &self.model
    }

    pub fn inertial_frame(&self) -> FrameId {
        self.inertial
    }

    /// Derivatives of a root body's integrated frame at its current state
    pub fn derivatives(&self, body: BodyId) -> BodyDerivatives {
        let entry = self.dynamics.body(body);
        let state = &self.dynamics.frames()[entry.integrated_frame()].state;
        let composite = &self.dynamics.mass()[entry.mass_body].composite_properties;
        let inertia = match entry.integrated() {
            IntegratedFrame::Composite => composite.inertia,
            IntegratedFrame::Structure => composite.inertia_in_structure(),
        };
        self.model.derivatives(state, &inertia)
    }

    /// Run one integration cycle over every root body, returning the dynamic
    /// time advanced
    pub fn step(&mut self) -> Result<f64> {
        let dyn_dt = self.clock.dyn_step(self.config.integrator.step_size);
        self.controls.step_size = dyn_dt;
        self.controls.begin_cycle();

        let roots: Vec<BodyId> = self
            .dynamics
            .body_ids()
            .filter(|id| self.dynamics.body(*id).is_root())
            .collect();
        let merger = IntegratorResultMerger::default();

        let time_scale_factor = loop {
            let stage = self.controls.cycle_stage;
            let mut merged = IntegratorResult::default();
            for &root in &roots {
                let derivatives = self.derivatives(root);
                let result = self.dynamics.integrate(root, dyn_dt, stage, &derivatives)?;
                merger.merge_integrator_result(&result, &mut merged).map_err(|e| {
                    self.dynamics
                        .sink()
                        .fail(codes::INTEGRATOR_MERGE, &format!("bodies disagree on step: {}", e))
                })?;
            }
            if merged.passed {
                break merged.time_scale_factor;
            }
            self.controls.next_stage();
            if self.controls.cycle_stage >= MAX_CYCLE_STAGES {
                return Err(self.dynamics.sink().fail(
                    codes::INTEGRATOR_FAILURE,
                    &format!("cycle did not complete within {} stages", MAX_CYCLE_STAGES),
                ));
            }
        };

        let advanced = self.controls.finish_cycle(time_scale_factor, &mut self.clock);
        let now = self.clock.seconds();
        self.time.update(now)?;
        for id in self.dynamics.body_ids().collect::<Vec<_>>() {
            for frame in self.dynamics.body(id).frames() {
                self.dynamics.frames[frame].timestamp = now;
            }
        }
        log::debug!(
            "Cycle {} advanced {:.3} s in {} stages",
            self.controls.cycles,
            advanced,
            self.controls.cycle_stage.max(1)
        );
        Ok(advanced)
    }

    /// Step until the configured duration has elapsed
    ///
    /// `progress` receives the elapsed and total dynamic time after each cycle.
    pub fn run(&mut self, mut progress: impl FnMut(f64, f64)) -> Result<SimulationReport> {
        let end = self.clock.dyn_step(self.config.integrator.duration);
        let slack = 1e-9 * end.max(1.0);
        while self.clock.seconds() < end - slack {
            self.step()?;
            progress(self.clock.seconds().min(end), end);
        }
        log::info!(
            "Finished {} cycles, {:.3} s of dynamic time",
            self.controls.cycles,
            self.clock.seconds()
        );
        Ok(self.report())
    }

    pub fn report(&self) -> SimulationReport {
        let frames = self.dynamics.frames();
        let bodies = self
            .dynamics
            .body_ids()
            .map(|id| {
                let body = self.dynamics.body(id);
                let state = &frames[body.composite_body].state;
                let q = state.rot.q_parent_this().quaternion();
                let root = self.dynamics.root_of(id);
                BodyReport {
                    name: body.name.clone(),
                    root: self.dynamics.body(root).name.clone(),
                    mass: self.dynamics.mass()[body.mass_body].composite_properties.mass,
                    position: state.trans.position.into(),
                    velocity: state.trans.velocity.into(),
                    quaternion: [q.w, q.i, q.j, q.k],
                    rate: (*state.rot.ang_vel_this()).into(),
                    points: body
                        .vehicle_points
                        .iter()
                        .map(|&frame| PointReport {
                            name: frames.name(frame).to_string(),
                            position: frames[frame].state.trans.position.into(),
                        })
                        .collect(),
                }
            })
            .collect();

        let times = self
            .time
            .nodes()
            .iter()
            .map(|node| TimeReport {
                name: node.name.clone(),
                seconds: node.seconds(),
                days: node.days(),
                calendar: node.calendar().map(|c| c.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
            })
            .collect();

        SimulationReport {
            integrator: self.config.integrator.kind.name().to_string(),
            cycles: self.controls.cycles,
            dyn_seconds: self.clock.seconds(),
            times,
            bodies,
        }
    }
}

/// Register the configured times with the converters that link them
fn build_time(config: &ScenarioConfig, sink: SharedSink) -> Result<TimeManager> {
    let time = &config.time;
    let mut manager = TimeManager::new(sink);
    for &kind in &time.kinds {
        manager.register_time(TimeNode::new(kind))?;
    }

    let has = |kind: TimeKind| time.kinds.contains(&kind);
    if has(TimeKind::Tai) {
        manager.register_converter(Box::new(DynTaiConverter::default()))?;
    }
    if has(TimeKind::Utc) {
        let converter = match &time.leap_seconds {
            Some(table) => TaiUtcConverter::new(table.clone()),
            None => TaiUtcConverter::standard(),
        };
        manager.register_converter(Box::new(converter))?;
    }
    if has(TimeKind::Tt) {
        manager.register_converter(Box::new(TaiOffsetConverter::tt()))?;
    }
    if has(TimeKind::Gps) {
        manager.register_converter(Box::new(TaiOffsetConverter::gps()))?;
    }
    if let Some(epoch) = &time.user_epoch {
        let mut tai_epoch = TimeNode::new(TimeKind::Tai);
        tai_epoch.set_calendar(epoch)?;
        manager.register_converter(Box::new(StdUdeConverter::new(TimeKind::Tai, tai_epoch.days())))?;
    }

    let initializer = manager.time_mut(time.initializer).ok_or_else(|| DynError::Config {
        message: format!("initializer {} is not registered", time.initializer.name()),
    })?;
    initializer.set_calendar(&time.epoch)?;
    manager.set_initializer(time.initializer);
    manager.initialize()?;
    Ok(manager)
}
