//! Device type registry.
//!
//! Maps the numeric type id the board reports for an attached device to a
//! tagged [`DeviceClass`], and each class to the set of [`Capability`]s it
//! offers. Port access checks the requested capability against this table.

use serde::Serialize;
use std::fmt;

/// Concrete kind of attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceClass {
    PassiveMotor,
    Motor,
    Light,
    TiltSensor,
    MotionSensor,
    ColorDistanceSensor,
    ColorSensor,
    DistanceSensor,
    ForceSensor,
    Matrix,
    /// A device whose type id is not in the table.
    Unknown,
}

/// What a caller can require of the device on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Capability {
    /// Any attached device.
    Device,
    /// Can be driven with `set`/`pwm`/`plimit`/`bias`. Every motor qualifies.
    PassiveMotor,
    /// Has an encoder: speed/position modes and PID control.
    Motor,
    /// Reports measurements.
    Sensor,
    Light,
    Matrix,
}

impl DeviceClass {
    /// Capabilities this class offers.
    pub fn capabilities(self) -> &'static [Capability] {
        use Capability::*;
        match self {
            DeviceClass::PassiveMotor => &[Device, PassiveMotor],
            DeviceClass::Motor => &[Device, PassiveMotor, Motor],
            DeviceClass::Light => &[Device, Light],
            DeviceClass::TiltSensor
            | DeviceClass::MotionSensor
            | DeviceClass::ColorDistanceSensor
            | DeviceClass::ColorSensor
            | DeviceClass::DistanceSensor
            | DeviceClass::ForceSensor => &[Device, Sensor],
            DeviceClass::Matrix => &[Device, Matrix],
            DeviceClass::Unknown => &[Device],
        }
    }

    pub fn has(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::PassiveMotor => "PassiveMotor",
            DeviceClass::Motor => "Motor",
            DeviceClass::Light => "Light",
            DeviceClass::TiltSensor => "TiltSensor",
            DeviceClass::MotionSensor => "MotionSensor",
            DeviceClass::ColorDistanceSensor => "ColorDistanceSensor",
            DeviceClass::ColorSensor => "ColorSensor",
            DeviceClass::DistanceSensor => "DistanceSensor",
            DeviceClass::ForceSensor => "ForceSensor",
            DeviceClass::Matrix => "Matrix",
            DeviceClass::Unknown => "Device",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Device => "Device",
            Capability::PassiveMotor => "PassiveMotor",
            Capability::Motor => "Motor",
            Capability::Sensor => "Sensor",
            Capability::Light => "Light",
            Capability::Matrix => "Matrix",
        };
        f.write_str(name)
    }
}

/// Resolved type of a device id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceType {
    pub id: u32,
    pub class: DeviceClass,
    pub description: String,
}

impl DeviceType {
    pub fn is_known(&self) -> bool {
        self.class != DeviceClass::Unknown
    }
}

const DEVICE_TYPES: &[(u32, DeviceClass, &str)] = &[
    (1, DeviceClass::PassiveMotor, "Passive Motor"),
    (2, DeviceClass::PassiveMotor, "Passive Motor"),
    (8, DeviceClass::Light, "Light"),
    (34, DeviceClass::TiltSensor, "WeDo 2.0 Tilt Sensor"),
    (35, DeviceClass::MotionSensor, "Motion Sensor"),
    (37, DeviceClass::ColorDistanceSensor, "Color & Distance Sensor"),
    (61, DeviceClass::ColorSensor, "Color Sensor"),
    (62, DeviceClass::DistanceSensor, "Distance Sensor"),
    (63, DeviceClass::ForceSensor, "Force Sensor"),
    (64, DeviceClass::Matrix, "3x3 Color Light Matrix"),
    (38, DeviceClass::Motor, "Medium Linear Motor"),
    (46, DeviceClass::Motor, "Large Motor"),
    (47, DeviceClass::Motor, "XL Motor"),
    (48, DeviceClass::Motor, "Medium Angular Motor (Cyan)"),
    (49, DeviceClass::Motor, "Large Angular Motor (Cyan)"),
    (65, DeviceClass::Motor, "Small Angular Motor"),
    (75, DeviceClass::Motor, "Medium Angular Motor (Grey)"),
    (76, DeviceClass::Motor, "Large Angular Motor (Grey)"),
];

/// Resolve a type id. Unknown ids resolve to [`DeviceClass::Unknown`].
pub fn lookup_type(id: u32) -> DeviceType {
    match DEVICE_TYPES.iter().find(|(known, _, _)| *known == id) {
        Some(&(_, class, description)) => DeviceType {
            id,
            class,
            description: description.to_string(),
        },
        None => DeviceType {
            id,
            class: DeviceClass::Unknown,
            description: format!("Unknown device {id}"),
        },
    }
}
