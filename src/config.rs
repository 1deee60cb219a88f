//! Scenario configuration
//!
//! A scenario is a JSON document describing the time system, the integration
//! technique, the gravitational environment and the vehicles. Every section
//! has defaults, so a document only needs to carry what it changes.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::body::IntegratedFrame;
use crate::error::{DynError, Result};
use crate::integration::{
    GaussJacksonConfig, GaussJacksonConstructor, IntegratorConstructor, LsodeConfig, LsodeConstructor,
    Rk4Constructor, RotationalTechnique,
};
use crate::time::{LeapSecond, TimeKind};

/// Earth gravitational parameter (m³/s²)
pub const MU_EARTH: f64 = 3.986004418e14;

/// Earth equatorial radius (m)
pub const EARTH_EQUATORIAL_RADIUS: f64 = 6_378_137.0;

/// Earth J2 zonal coefficient
pub const EARTH_J2: f64 = 1.08263e-3;

/// Integration technique selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegratorKind {
    Rk4,
    GaussJackson,
    Lsode,
}

impl IntegratorKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rk4 => "RK4",
            Self::GaussJackson => "Gauss-Jackson",
            Self::Lsode => "LSODE",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Rk4 => "Classical fourth-order Runge-Kutta. Four stages per step, no history.",
            Self::GaussJackson => {
                "Fixed-step multistep predictor-corrector primed with RK4. Cheap once operational."
            }
            Self::Lsode => "Variable-order BDF with internal step control. Best for stiff or demanding runs.",
        }
    }

    pub fn all() -> &'static [IntegratorKind] {
        &[IntegratorKind::Rk4, IntegratorKind::GaussJackson, IntegratorKind::Lsode]
    }

    pub fn constructor(&self, settings: &IntegratorSettings) -> Box<dyn IntegratorConstructor> {
        match self {
            Self::Rk4 => Box::new(Rk4Constructor),
            Self::GaussJackson => Box::new(GaussJacksonConstructor::new(settings.gauss_jackson)),
            Self::Lsode => Box::new(LsodeConstructor::new(settings.lsode)),
        }
    }
}

impl FromStr for IntegratorKind {
    type Err = DynError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "rk4" => Ok(Self::Rk4),
            "gauss-jackson" | "gj" => Ok(Self::GaussJackson),
            "lsode" => Ok(Self::Lsode),
            other => Err(DynError::Config {
                message: format!("unknown integrator '{}' (expected rk4, gauss-jackson or lsode)", other),
            }),
        }
    }
}

/// Time system setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Time kinds to maintain besides Dyn
    pub kinds: Vec<TimeKind>,
    /// Kind whose value seeds the others
    pub initializer: TimeKind,
    /// Calendar value of the initializer at dynamic time zero
    pub epoch: String,
    /// Dynamic seconds per simulation second
    pub time_scale: f64,
    /// TAI calendar instant at which user-defined elapsed time is zero
    pub user_epoch: Option<String>,
    /// Replaces the built-in leap-second table
    pub leap_seconds: Option<Vec<LeapSecond>>,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            kinds: vec![TimeKind::Tai, TimeKind::Utc, TimeKind::Tt, TimeKind::Gps],
            initializer: TimeKind::Utc,
            epoch: "2024-01-01T00:00:00".to_string(),
            time_scale: 1.0,
            user_epoch: None,
            leap_seconds: None,
        }
    }
}

/// Integration technique and stepping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub kind: IntegratorKind,
    /// Simulation step (s)
    pub step_size: f64,
    /// Simulation duration (s)
    pub duration: f64,
    pub gauss_jackson: GaussJacksonConfig,
    pub lsode: LsodeConfig,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            kind: IntegratorKind::Rk4,
            step_size: 10.0,
            duration: 5_400.0,
            gauss_jackson: GaussJacksonConfig::default(),
            lsode: LsodeConfig::default(),
        }
    }
}

impl IntegratorSettings {
    /// Large steps, loose tolerances
    pub fn fast() -> Self {
        Self {
            step_size: 60.0,
            lsode: LsodeConfig {
                rtol: 1e-8,
                atol: 1e-6,
                ..LsodeConfig::default()
            },
            ..Default::default()
        }
    }

    /// Multistep integration at a short step
    pub fn high_precision() -> Self {
        Self {
            kind: IntegratorKind::GaussJackson,
            step_size: 5.0,
            gauss_jackson: GaussJacksonConfig {
                edit_tolerance: 1e-13,
                ..GaussJacksonConfig::default()
            },
            ..Default::default()
        }
    }
}

/// Central-body gravity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Gravitational parameter (m³/s²)
    pub mu: f64,
    pub include_j2: bool,
    pub j2: f64,
    /// Equatorial radius used by the J2 term (m)
    pub equatorial_radius: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            mu: MU_EARTH,
            include_j2: false,
            j2: EARTH_J2,
            equatorial_radius: EARTH_EQUATORIAL_RADIUS,
        }
    }
}

/// Rigid placement of a body on its parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachConfig {
    /// Name of the parent body
    pub parent: String,
    /// Child structure origin in parent structure axes (m)
    pub position: [f64; 3],
    /// Parent-to-child structure rotation, scalar first
    #[serde(default = "identity_quaternion")]
    pub quaternion: [f64; 4],
}

/// Named point on a body's structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointConfig {
    pub name: String,
    pub position: [f64; 3],
}

fn identity_quaternion() -> [f64; 4] {
    [1.0, 0.0, 0.0, 0.0]
}

/// One vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyConfig {
    pub name: String,
    /// Mass (kg)
    pub mass: f64,
    /// Center of mass in structure axes (m)
    pub center_of_mass: [f64; 3],
    /// Principal moments of inertia about the center of mass (kg·m²)
    pub inertia: [f64; 3],
    /// Frame the initial state below describes
    pub state_frame: IntegratedFrame,
    /// Frame advanced by the integrator
    pub integrated: IntegratedFrame,
    /// Inertial position (m)
    pub position: [f64; 3],
    /// Inertial velocity (m/s)
    pub velocity: [f64; 3],
    /// Inertial-to-body rotation, scalar first
    pub quaternion: [f64; 4],
    /// Body rate in body axes (rad/s)
    pub rate: [f64; 3],
    pub three_dof: bool,
    pub rotational_technique: RotationalTechnique,
    /// Attach to another body instead of using the initial state
    pub attach: Option<AttachConfig>,
    pub points: Vec<PointConfig>,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            mass: 1.0,
            center_of_mass: [0.0; 3],
            inertia: [1.0; 3],
            state_frame: IntegratedFrame::Structure,
            integrated: IntegratedFrame::Composite,
            position: [0.0; 3],
            velocity: [0.0; 3],
            quaternion: identity_quaternion(),
            rate: [0.0; 3],
            three_dof: false,
            rotational_technique: RotationalTechnique::GeneralizedDerivative,
            attach: None,
            points: Vec::new(),
        }
    }
}

impl BodyConfig {
    /// Body on a circular equatorial orbit of the given radius
    pub fn circular(name: &str, mass: f64, radius: f64, mu: f64) -> Self {
        Self {
            name: name.to_string(),
            mass,
            position: [radius, 0.0, 0.0],
            velocity: [0.0, (mu / radius).sqrt(), 0.0],
            ..Default::default()
        }
    }
}

/// Complete scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub time: TimeConfig,
    pub integrator: IntegratorSettings,
    pub environment: EnvironmentConfig,
    pub bodies: Vec<BodyConfig>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::single_satellite()
    }
}

impl ScenarioConfig {
    /// One spinning satellite in a 7000 km circular orbit
    pub fn single_satellite() -> Self {
        let mut satellite = BodyConfig::circular("satellite", 500.0, 7.0e6, MU_EARTH);
        satellite.center_of_mass = [0.1, 0.0, -0.05];
        satellite.inertia = [120.0, 150.0, 90.0];
        satellite.rate = [0.0, 0.0, 0.01];
        satellite.points = vec![PointConfig {
            name: "antenna".to_string(),
            position: [0.0, 0.0, 1.5],
        }];
        Self {
            time: TimeConfig::default(),
            integrator: IntegratorSettings::default(),
            environment: EnvironmentConfig::default(),
            bodies: vec![satellite],
        }
    }

    /// A station with a docked vehicle and a free-flying inspector
    pub fn docked_stack() -> Self {
        let mut station = BodyConfig::circular("station", 20_000.0, 6.8e6, MU_EARTH);
        station.inertia = [4.0e5, 6.0e5, 8.0e5];
        station.rate = [0.0, 0.0, (MU_EARTH / 6.8e6_f64.powi(3)).sqrt()];
        station.points = vec![PointConfig {
            name: "docking_port".to_string(),
            position: [8.0, 0.0, 0.0],
        }];

        let vehicle = BodyConfig {
            name: "vehicle".to_string(),
            mass: 8_000.0,
            center_of_mass: [2.0, 0.0, 0.0],
            inertia: [2.0e4, 3.0e4, 3.0e4],
            attach: Some(AttachConfig {
                parent: "station".to_string(),
                position: [8.0, 0.0, 0.0],
                quaternion: [0.0, 0.0, 0.0, 1.0],
            }),
            ..Default::default()
        };

        let mut inspector = BodyConfig::circular("inspector", 50.0, 6.8e6, MU_EARTH);
        inspector.position[2] = 100.0;
        inspector.three_dof = true;

        Self {
            time: TimeConfig::default(),
            integrator: IntegratorSettings::default(),
            environment: EnvironmentConfig {
                include_j2: true,
                ..EnvironmentConfig::default()
            },
            bodies: vec![station, vehicle, inspector],
        }
    }

    /// Parse and validate a JSON scenario
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ScenarioConfig = serde_json::from_str(text).map_err(|e| DynError::Config {
            message: format!("malformed scenario: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| DynError::Config {
            message: format!("cannot serialize scenario: {}", e),
        })
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| -> Result<()> { Err(DynError::Config { message }) };

        if !(self.integrator.step_size > 0.0) || !(self.integrator.duration > 0.0) {
            return invalid("step size and duration must be positive".to_string());
        }
        if !(self.time.time_scale > 0.0) {
            return invalid(format!("time scale {} must be positive", self.time.time_scale));
        }
        self.integrator.gauss_jackson.validate()?;
        self.integrator.lsode.validate()?;

        if !self.time.initializer.is_standard() {
            return invalid(format!(
                "initializer {} has no calendar value",
                self.time.initializer.name()
            ));
        }
        if !self.time.kinds.contains(&self.time.initializer) {
            return invalid(format!(
                "initializer {} is not among the configured times",
                self.time.initializer.name()
            ));
        }
        if self.time.kinds.contains(&TimeKind::Dyn) {
            return invalid("Dyn time is always present and cannot be listed".to_string());
        }
        if self.time.kinds.contains(&TimeKind::Ude) != self.time.user_epoch.is_some() {
            return invalid("UDE time and a user epoch must be configured together".to_string());
        }

        if self.bodies.is_empty() {
            return invalid("scenario has no bodies".to_string());
        }
        let mut names = HashSet::new();
        for body in &self.bodies {
            if body.name.is_empty() || !names.insert(body.name.as_str()) {
                return invalid(format!("body name '{}' is empty or repeated", body.name));
            }
            if !(body.mass > 0.0) || body.inertia.iter().any(|i| !(*i > 0.0)) {
                return invalid(format!("body '{}' needs positive mass and inertia", body.name));
            }
        }
        for body in &self.bodies {
            if let Some(attach) = &body.attach {
                if attach.parent == body.name || !names.contains(attach.parent.as_str()) {
                    return invalid(format!(
                        "body '{}' attaches to unknown body '{}'",
                        body.name, attach.parent
                    ));
                }
            }
        }
        Ok(())
    }
}
