//! Controller telemetry records
//!
//! Wire format (UTF-8 JSON text, one record per DataChannel message):
//!
//! ```text
//! {
//!   "timestamp": 1700000000000,
//!   "leftController":  { "hand": "left",  "position": {..}, "quaternion": {..},
//!                        "gripActive": true, "trigger": 0.4, "menuPressed": false },
//!   "rightController": { ... }
//! }
//! ```
//!
//! Absent hands are omitted from the record, never serialized as `null`.

use serde::{Deserialize, Serialize};

/// Quaternions shorter than this are left un-normalized
const QUAT_EPSILON: f64 = 1e-8;

/// Controller hand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Left,
    Right,
}

impl std::fmt::Display for Hand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hand::Left => write!(f, "left"),
            Hand::Right => write!(f, "right"),
        }
    }
}

impl std::str::FromStr for Hand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Hand::Left),
            "right" => Ok(Hand::Right),
            other => Err(format!("unknown hand '{}'", other)),
        }
    }
}

/// Controller position in metres
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Controller orientation (x/y/z/w order)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// Unit-length copy, or `self` when the norm is too small to divide by
    pub fn normalized(&self) -> Self {
        let norm = self.norm();
        if norm < QUAT_EPSILON {
            return *self;
        }
        Self {
            x: self.x / norm,
            y: self.y / norm,
            z: self.z / norm,
            w: self.w / norm,
        }
    }
}

/// Pose and button state of one controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerState {
    pub hand: Hand,
    pub position: Position,
    pub quaternion: Quaternion,
    pub grip_active: bool,
    /// Analog trigger value in [0, 1]
    pub trigger: f64,
    pub menu_pressed: bool,
}

impl ControllerState {
    /// Build a validated record: unit quaternion, trigger clamped into [0, 1]
    pub fn new(hand: Hand, position: Position, quaternion: Quaternion) -> Self {
        Self {
            hand,
            position,
            quaternion: quaternion.normalized(),
            grip_active: false,
            trigger: 0.0,
            menu_pressed: false,
        }
    }

    pub fn with_grip(mut self, active: bool) -> Self {
        self.grip_active = active;
        self
    }

    pub fn with_trigger(mut self, value: f64) -> Self {
        self.trigger = if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_menu(mut self, pressed: bool) -> Self {
        self.menu_pressed = pressed;
        self
    }
}

/// One telemetry sample, constructed per send and never retained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    /// Wall-clock time in epoch milliseconds
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_controller: Option<ControllerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_controller: Option<ControllerState>,
}

impl TelemetryPayload {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            left_controller: None,
            right_controller: None,
        }
    }

    /// Place a controller record in the slot matching its hand
    pub fn with_controller(mut self, state: ControllerState) -> Self {
        match state.hand {
            Hand::Left => self.left_controller = Some(state),
            Hand::Right => self.right_controller = Some(state),
        }
        self
    }

    pub fn has_controllers(&self) -> bool {
        self.left_controller.is_some() || self.right_controller.is_some()
    }

    pub fn controllers(&self) -> impl Iterator<Item = &ControllerState> {
        self.left_controller
            .iter()
            .chain(self.right_controller.iter())
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_hands_are_omitted() {
        let payload = TelemetryPayload::new(1).with_controller(ControllerState::new(
            Hand::Right,
            Position::new(0.1, 1.2, -0.3),
            Quaternion::IDENTITY,
        ));
        let json = payload.to_json().unwrap();

        assert!(json.contains("\"rightController\""));
        assert!(!json.contains("leftController"));
        assert!(!json.contains("null"));
    }

    #[test]
    fn test_controller_field_names() {
        let state = ControllerState::new(Hand::Left, Position::default(), Quaternion::IDENTITY)
            .with_grip(true)
            .with_trigger(0.25)
            .with_menu(true);
        let value = serde_json::to_value(&state).unwrap();

        assert_eq!(value["hand"], "left");
        assert_eq!(value["gripActive"], true);
        assert_eq!(value["trigger"], 0.25);
        assert_eq!(value["menuPressed"], true);
        assert_eq!(value["quaternion"]["w"], 1.0);
        assert_eq!(value["position"]["z"], 0.0);
    }

    #[test]
    fn test_quaternion_normalized() {
        let state = ControllerState::new(
            Hand::Left,
            Position::default(),
            Quaternion::new(0.0, 0.0, 0.0, 2.0),
        );
        assert_eq!(state.quaternion, Quaternion::IDENTITY);

        let tiny = Quaternion::new(0.0, 0.0, 0.0, 1e-12);
        assert_eq!(tiny.normalized(), tiny);
    }

    #[test]
    fn test_trigger_clamped() {
        let state = ControllerState::new(Hand::Left, Position::default(), Quaternion::IDENTITY);
        assert_eq!(state.clone().with_trigger(1.7).trigger, 1.0);
        assert_eq!(state.clone().with_trigger(-0.2).trigger, 0.0);
        assert_eq!(state.with_trigger(f64::NAN).trigger, 0.0);
    }

    #[test]
    fn test_hand_from_str() {
        assert_eq!("Left".parse::<Hand>().unwrap(), Hand::Left);
        assert_eq!(" right ".parse::<Hand>().unwrap(), Hand::Right);
        assert!("both".parse::<Hand>().is_err());
    }
}
