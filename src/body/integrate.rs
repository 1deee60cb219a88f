//! Per-body integration coordination
//!
//! A root body owns one translational integrator over the integrated frame's
//! position and velocity and, unless three-DOF, one rotational integrator over
//! its quaternion and body rate. Each stage runs both, merges their results
//! and re-propagates the tree so the next derivative evaluation sees current
//! state.

use nalgebra::Vector3;

use crate::diagnostics::codes;
use crate::error::{DynError, Result};
use crate::frame::FrameItems;
use crate::integration::rotation::{normalize_quaternion, quaternion_to_slice};
use crate::integration::{IntegratorConstructor, IntegratorResult, RotationalTechnique};

use super::{BodyId, DynManager};

/// Accelerations of a body's integrated frame at its current state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BodyDerivatives {
    /// Translational acceleration in integration frame axes (m/s²)
    pub trans_accel: Vector3<f64>,
    /// Angular acceleration in integrated frame axes (rad/s²)
    pub rot_accel: Vector3<f64>,
}

impl DynManager {
    pub fn set_three_dof(&mut self, body: BodyId, three_dof: bool) {
        self.bodies[body.0].three_dof = three_dof;
    }

    pub fn set_rotational_technique(&mut self, body: BodyId, technique: RotationalTechnique) {
        self.bodies[body.0].rotational_technique = technique;
    }

    /// Build the body's integrators from `constructor`
    ///
    /// If the constructor cannot handle the body's rotational technique, the
    /// first technique it does support is used instead and a warning is
    /// reported.
    pub fn create_body_integrators(&mut self, body: BodyId, constructor: &dyn IntegratorConstructor) -> Result<()> {
        let name = self.bodies[body.0].name.clone();
        let trans = constructor.create_translational()?;

        let rot = if self.bodies[body.0].three_dof {
            None
        } else {
            let wanted = self.bodies[body.0].rotational_technique;
            let technique = if constructor.supports(wanted) {
                wanted
            } else {
                let Some(fallback) = RotationalTechnique::all()
                    .iter()
                    .copied()
                    .find(|t| constructor.supports(*t))
                else {
                    let msg = format!(
                        "{} supports no rotational technique; cannot integrate '{}'",
                        constructor.name(),
                        name
                    );
                    return Err(self.sink.fail(codes::INTEGRATOR_MISMATCH, &msg));
                };
                let msg = format!(
                    "{} does not support {} for '{}'; using {}",
                    constructor.name(),
                    wanted.name(),
                    name,
                    fallback.name()
                );
                self.sink.warn(codes::INTEGRATOR_MISMATCH, &msg);
                self.bodies[body.0].rotational_technique = fallback;
                fallback
            };
            Some(constructor.create_rotational(technique)?)
        };

        let entry = &mut self.bodies[body.0];
        entry.trans_integ = Some(trans);
        entry.rot_integ = rot;
        log::debug!(
            "Created {} integrators for {} ({})",
            constructor.name(),
            name,
            if entry.three_dof { "3-DOF" } else { "6-DOF" }
        );
        Ok(())
    }

    /// Drop all integrator history; the next step starts fresh
    pub fn reset_integrators(&mut self, body: BodyId) {
        let entry = &mut self.bodies[body.0];
        if let Some(integ) = entry.trans_integ.as_mut() {
            integ.reset();
        }
        if let Some(integ) = entry.rot_integ.as_mut() {
            integ.reset();
        }
        entry.cycle_results = [None, None];
    }

    fn integration_failure(&self, body: BodyId, err: DynError) -> DynError {
        match err {
            DynError::Integration { integrator, message } => {
                let msg = format!("{} failed for '{}': {}", integrator, self.bodies[body.0].name, message);
                self.sink.fail(codes::INTEGRATOR_FAILURE, &msg)
            }
            other => other,
        }
    }

    fn merge_failure(&self, body: BodyId, err: DynError) -> DynError {
        let msg = format!("Cannot merge integrator results for '{}': {}", self.bodies[body.0].name, err);
        self.sink.fail(codes::INTEGRATOR_MERGE, &msg)
    }

    /// Advance one stage of a `dyn_dt` step of a root body
    ///
    /// Non-root bodies ride on their root and pass trivially. A body pinned to
    /// a frame is placed algebraically.
    pub fn integrate(
        &mut self,
        body: BodyId,
        dyn_dt: f64,
        target_stage: u32,
        derivatives: &BodyDerivatives,
    ) -> Result<IntegratorResult> {
        if !self.bodies[body.0].is_root() {
            return Ok(IntegratorResult::passed());
        }
        if self.bodies[body.0].frame_attachment.is_some() {
            self.update_frame_attachment(body)?;
            return Ok(IntegratorResult::passed());
        }

        let name = self.bodies[body.0].name.clone();
        if !self.bodies[body.0].has_integrators() {
            let msg = format!("'{}' has no integrators; create them before integrating", name);
            return Err(self.sink.fail(codes::INTEGRATOR_MISMATCH, &msg));
        }
        let three_dof = self.bodies[body.0].three_dof;
        let required = if three_dof { FrameItems::TRANS } else { FrameItems::FULL };
        if !self.bodies[body.0].initialized_states.contains(required) {
            let msg = format!(
                "'{}' has {:?} initialized but integration needs {:?}",
                name, self.bodies[body.0].initialized_states, required
            );
            return Err(self.sink.fail(codes::INTEGRATOR_FAILURE, &msg));
        }

        if target_stage == 0 {
            self.bodies[body.0].cycle_results = [None, None];
        }
        let integ = self.bodies[body.0].integrated_frame();
        let mut state = self.frames[integ].state;
        let merger = self.bodies[body.0].integ_results_merger;
        let mut merged = IntegratorResult::default();

        // An integrator that finished this cycle is not stepped again until
        // the other one catches up
        let trans_result = match self.bodies[body.0].cycle_results[0] {
            Some(done) => done,
            None => {
                let mut position: [f64; 3] = state.trans.position.into();
                let mut velocity: [f64; 3] = state.trans.velocity.into();
                let accel: [f64; 3] = derivatives.trans_accel.into();
                let outcome = match self.bodies[body.0].trans_integ.as_mut() {
                    Some(integrator) => integrator.integrate(dyn_dt, target_stage, &accel, &mut velocity, &mut position),
                    None => Ok(IntegratorResult::passed()),
                };
                let result = outcome.map_err(|e| self.integration_failure(body, e))?;
                state.trans.position = Vector3::from(position);
                state.trans.velocity = Vector3::from(velocity);
                if result.passed {
                    self.bodies[body.0].cycle_results[0] = Some(result);
                }
                result
            }
        };
        merger
            .merge_integrator_result(&trans_result, &mut merged)
            .map_err(|e| self.merge_failure(body, e))?;

        if !three_dof {
            let rot_result = match self.bodies[body.0].cycle_results[1] {
                Some(done) => done,
                None => {
                    let mut quaternion = [0.0; 4];
                    quaternion_to_slice(state.rot.q_parent_this().quaternion(), &mut quaternion);
                    let mut rate: [f64; 3] = (*state.rot.ang_vel_this()).into();
                    let accel: [f64; 3] = derivatives.rot_accel.into();
                    let outcome = match self.bodies[body.0].rot_integ.as_mut() {
                        Some(integrator) => {
                            integrator.integrate(dyn_dt, target_stage, &accel, &mut rate, &mut quaternion)
                        }
                        None => Ok(IntegratorResult::passed()),
                    };
                    let result = outcome.map_err(|e| self.integration_failure(body, e))?;
                    state.rot.set_quaternion(normalize_quaternion(&mut quaternion));
                    state.rot.set_ang_vel(Vector3::from(rate));
                    if result.passed {
                        self.bodies[body.0].cycle_results[1] = Some(result);
                    }
                    result
                }
            };
            merger
                .merge_integrator_result(&rot_result, &mut merged)
                .map_err(|e| self.merge_failure(body, e))?;
        }

        let entry = &mut self.bodies[body.0];
        let items = if three_dof {
            FrameItems::TRANS | (entry.initialized_states & FrameItems::ROT)
        } else {
            FrameItems::FULL
        };
        for item in items.iter() {
            entry.set_source(item, Some(integ));
        }
        entry.initialized_states |= items;

        let frame = &mut self.frames[integ];
        frame.state = state;
        frame.initialized_items |= items;
        log::trace!(
            "{} stage {} passed={} scale={}",
            name,
            target_stage,
            merged.passed,
            merged.time_scale_factor
        );

        self.propagate_state(body)?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::propagation::tests::{manager, offset_body};
    use crate::diagnostics::{RecordingSink, Severity};
    use crate::frame::{FrameId, RefFrameState};
    use crate::integration::{GaussJacksonConstructor, LsodeConfig, LsodeConstructor, Rk4Constructor};
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    const MU: f64 = 3.986004418e14;

    /// Step a body through whole cycles, evaluating `accel` at every stage
    fn run(
        manager: &mut DynManager,
        body: BodyId,
        dt: f64,
        steps: usize,
        accel: impl Fn(&RefFrameState) -> BodyDerivatives,
    ) -> f64 {
        let mut t = 0.0;
        for _ in 0..steps {
            let mut stage = 0;
            loop {
                let integ = manager.body(body).integrated_frame();
                let derivatives = accel(&manager.frames()[integ].state);
                let result = manager.integrate(body, dt, stage, &derivatives).unwrap();
                if result.passed {
                    t += dt * result.time_scale_factor;
                    break;
                }
                stage += 1;
                assert!(stage < 10_000, "step never completed");
            }
        }
        t
    }

    fn gravity(state: &RefFrameState) -> BodyDerivatives {
        let r = state.trans.position;
        BodyDerivatives {
            trans_accel: -MU * r / r.norm().powi(3),
            rot_accel: Vector3::zeros(),
        }
    }

    fn orbiting_body(manager: &mut DynManager, inertial: FrameId) -> (BodyId, f64, f64) {
        let body = offset_body(manager, "sat", 500.0, inertial);
        let composite = manager.body(body).composite_body;
        let radius = 7.0e6;
        let speed = (MU / radius).sqrt();
        let mut state = RefFrameState::default();
        state.trans.position = Vector3::new(radius, 0.0, 0.0);
        state.trans.velocity = Vector3::new(0.0, speed, 0.0);
        state.rot.set_ang_vel(Vector3::new(0.0, 0.0, 0.01));
        manager.set_state(body, composite, &state, FrameItems::FULL);
        manager.propagate_state(body).unwrap();
        (body, radius, speed)
    }

    fn check_orbit(manager: &DynManager, body: BodyId, radius: f64, speed: f64, t: f64, tolerance: f64, angle_tolerance: f64) {
        let state = manager.frames()[manager.body(body).composite_body].state;
        let angle = speed / radius * t;
        let expected = Vector3::new(radius * angle.cos(), radius * angle.sin(), 0.0);
        assert!(
            (state.trans.position - expected).norm() < tolerance,
            "Position error {} m after {} s",
            (state.trans.position - expected).norm(),
            t
        );

        // Torque-free spin about a fixed axis
        let spin = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.01 * t);
        assert!(state.rot.q_parent_this().angle_to(&spin) < angle_tolerance);
        assert_relative_eq!(state.rot.q_parent_this().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rk4_orbit_and_spin() {
        let (mut manager, inertial) = manager();
        let (body, radius, speed) = orbiting_body(&mut manager, inertial);
        manager.create_body_integrators(body, &Rk4Constructor).unwrap();

        let t = run(&mut manager, body, 10.0, 60, gravity);
        assert_relative_eq!(t, 600.0, epsilon = 1e-9);
        check_orbit(&manager, body, radius, speed, t, 1e-2, 1e-6);

        // Structure frame follows the integrated composite frame
        let structure = manager.frames()[manager.body(body).structure].initialized_items;
        assert!(structure.is_full());
    }

    #[test]
    fn test_gauss_jackson_orbit_and_spin() {
        let (mut manager, inertial) = manager();
        let (body, radius, speed) = orbiting_body(&mut manager, inertial);
        manager
            .create_body_integrators(body, &GaussJacksonConstructor::default())
            .unwrap();

        let t = run(&mut manager, body, 30.0, 40, gravity);
        assert!(t > 0.0);
        check_orbit(&manager, body, radius, speed, t, 1e-2, 1e-6);
    }

    #[test]
    fn test_lsode_orbit_and_spin() {
        let (mut manager, inertial) = manager();
        let (body, radius, speed) = orbiting_body(&mut manager, inertial);
        let constructor = LsodeConstructor {
            config: LsodeConfig {
                rtol: 1e-12,
                atol: 1e-9,
                ..LsodeConfig::default()
            },
        };
        manager.create_body_integrators(body, &constructor).unwrap();

        let t = run(&mut manager, body, 60.0, 10, gravity);
        assert_relative_eq!(t, 600.0, epsilon = 1e-9);
        check_orbit(&manager, body, radius, speed, t, 1.0, 1e-6);
    }

    #[test]
    fn test_unsupported_technique_falls_back() {
        let (recorder, sink) = RecordingSink::shared();
        let mut manager = DynManager::new(sink);
        let inertial = manager.add_integ_frame("inertial", None, RefFrameState::default()).unwrap();
        let body = offset_body(&mut manager, "sat", 10.0, inertial);
        manager.set_rotational_technique(body, RotationalTechnique::GeneralizedStep);

        manager
            .create_body_integrators(body, &GaussJacksonConstructor::default())
            .unwrap();
        assert_eq!(recorder.count(Severity::Warn), 1);
        assert!(recorder.contains_code(codes::INTEGRATOR_MISMATCH));
        assert_eq!(
            manager.body(body).rotational_technique,
            RotationalTechnique::GeneralizedDerivative
        );
        assert!(manager.body(body).has_integrators());
    }

    #[test]
    fn test_three_dof_keeps_attitude() {
        let (mut manager, inertial) = manager();
        let (body, _, _) = orbiting_body(&mut manager, inertial);
        manager.set_three_dof(body, true);
        manager.create_body_integrators(body, &Rk4Constructor).unwrap();
        let composite = manager.body(body).composite_body;
        let q0 = *manager.frames()[composite].state.rot.q_parent_this();

        run(&mut manager, body, 10.0, 5, gravity);
        assert_eq!(*manager.frames()[composite].state.rot.q_parent_this(), q0);
        assert!(manager.body(body).initialized_states.is_full());
    }

    #[test]
    fn test_integrate_preconditions() {
        let (mut manager, inertial) = manager();
        let body = offset_body(&mut manager, "sat", 10.0, inertial);
        let err = manager.integrate(body, 1.0, 0, &BodyDerivatives::default()).unwrap_err();
        assert!(err.is_fatal_code(codes::INTEGRATOR_MISMATCH));

        manager.create_body_integrators(body, &Rk4Constructor).unwrap();
        let err = manager.integrate(body, 1.0, 0, &BodyDerivatives::default()).unwrap_err();
        assert!(err.is_fatal_code(codes::INTEGRATOR_FAILURE));
    }

    #[test]
    fn test_child_and_pinned_bodies_skip_integration() {
        let (mut manager, inertial) = manager();
        let parent = offset_body(&mut manager, "parent", 10.0, inertial);
        let child = offset_body(&mut manager, "child", 10.0, inertial);
        manager
            .attach(child, parent, crate::mass::MassPoint::aligned("port", Vector3::x()))
            .unwrap();
        let result = manager.integrate(child, 1.0, 0, &BodyDerivatives::default()).unwrap();
        assert!(result.passed);

        let mut pad_state = RefFrameState::default();
        pad_state.trans.position = Vector3::new(1.0, 0.0, 0.0);
        let pad = manager.add_ref_frame("pad", Some(inertial), pad_state).unwrap();
        manager.attach_to_frame(parent, pad, RefFrameState::default()).unwrap();

        manager.frames[pad].state.trans.position = Vector3::new(5.0, 0.0, 0.0);
        let result = manager.integrate(parent, 1.0, 0, &BodyDerivatives::default()).unwrap();
        assert!(result.passed);
        let structure = manager.frames()[manager.body(parent).structure].state;
        assert_relative_eq!(structure.trans.position, Vector3::new(5.0, 0.0, 0.0), epsilon = 1e-12);
    }
}
