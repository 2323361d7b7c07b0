// Message classification and sample construction
// Pure transform: one decoded message in, one draft sample or a skip reason out.

use std::collections::BTreeSet;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::constants::{
    FIELD_INSTANCE, MSG_AHR2, MSG_ATT, MSG_BARO, MSG_IMU, MSG_MAG, NAV_SOURCE_AHR2, NAV_SOURCE_ATT,
};
use crate::db::schema::SensorType;
use crate::telemetry::LogMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Inertial,
    Magnetic,
    Pressure,
    Navigation,
}

impl SampleKind {
    /// Sensor type a sample of this kind is attributed to. Navigation has none.
    pub fn sensor_type(&self) -> Option<SensorType> {
        match self {
            SampleKind::Inertial => Some(SensorType::Imu),
            SampleKind::Magnetic => Some(SensorType::Compass),
            SampleKind::Pressure => Some(SensorType::Pressure),
            SampleKind::Navigation => None,
        }
    }
}

/// Configured sensor instances per kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFilters {
    pub imu: BTreeSet<u8>,
    pub mag: BTreeSet<u8>,
    pub baro: BTreeSet<u8>,
}

impl InstanceFilters {
    pub fn allows(&self, kind: SampleKind, instance: u8) -> bool {
        match kind {
            SampleKind::Inertial => self.imu.contains(&instance),
            SampleKind::Magnetic => self.mag.contains(&instance),
            SampleKind::Pressure => self.baro.contains(&instance),
            SampleKind::Navigation => true,
        }
    }
}

/// Inclusive mission window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts <= self.end
    }
}

// ----- Field tables -----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Zero,
    Null,
}

/// A message field and what to use when the firmware didn't log it
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub default: FieldDefault,
}

impl FieldSpec {
    const fn zero(name: &'static str) -> Self {
        Self { name, default: FieldDefault::Zero }
    }

    const fn null(name: &'static str) -> Self {
        Self { name, default: FieldDefault::Null }
    }

    pub fn read(&self, msg: &LogMessage) -> Option<f64> {
        match (msg.field(self.name), self.default) {
            (Some(v), _) => Some(v),
            (None, FieldDefault::Zero) => Some(0.0),
            (None, FieldDefault::Null) => None,
        }
    }

    fn value(&self, msg: &LogMessage) -> f64 {
        self.read(msg).unwrap_or_default()
    }
}

pub const IMU_FIELDS: [FieldSpec; 6] = [
    FieldSpec::zero("GyrX"),
    FieldSpec::zero("GyrY"),
    FieldSpec::zero("GyrZ"),
    FieldSpec::zero("AccX"),
    FieldSpec::zero("AccY"),
    FieldSpec::zero("AccZ"),
];

pub const MAG_FIELDS: [FieldSpec; 3] = [
    FieldSpec::zero("MagX"),
    FieldSpec::zero("MagY"),
    FieldSpec::zero("MagZ"),
];

pub const BARO_PRESS: FieldSpec = FieldSpec::zero("Press");
pub const BARO_TEMP: FieldSpec = FieldSpec::null("Temp");

pub const NAV_ATTITUDE_FIELDS: [FieldSpec; 3] = [
    FieldSpec::null("Roll"),
    FieldSpec::null("Pitch"),
    FieldSpec::null("Yaw"),
];

pub const NAV_DEPTH: FieldSpec = FieldSpec::null("Alt");

// ----- Outcomes -----

#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Inertial { gyr: [f64; 3], acc: [f64; 3] },
    Magnetic { field: [f64; 3] },
    Pressure { pressure_pa: f64, temperature_c: Option<f64> },
    Navigation {
        source: &'static str,
        roll_deg: Option<f64>,
        pitch_deg: Option<f64>,
        yaw_deg: Option<f64>,
        depth_m: Option<f64>,
    },
}

/// A constructed sample that has not been attributed or persisted yet
#[derive(Debug, Clone, PartialEq)]
pub struct SampleDraft {
    pub kind: SampleKind,
    pub instance: Option<u8>,
    pub timestamp: DateTime<Utc>,
    pub reading: Reading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    OutOfWindow,
    UnhandledType,
    MissingInstance,
    InstanceFiltered,
    NoDeployment,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::OutOfWindow => "out_of_window",
            SkipReason::UnhandledType => "unhandled_type",
            SkipReason::MissingInstance => "missing_instance",
            SkipReason::InstanceFiltered => "instance_filtered",
            SkipReason::NoDeployment => "no_deployment",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Draft(SampleDraft),
    Skip(SkipReason),
    /// Malformed message; counted as an error, processing continues
    Error(String),
}

/// Everything the classifier needs from the run
#[derive(Debug, Clone)]
pub struct ClassifyContext {
    pub reference_time: DateTime<Utc>,
    pub window: TimeWindow,
    pub filters: InstanceFilters,
}

/// Absolute time of a message: reference time plus onboard clock offset.
/// Messages without a clock value fall back to the reference time.
pub fn resolve_timestamp(msg: &LogMessage, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match msg.time_us {
        Some(us) => {
            let us = i64::try_from(us).ok()?;
            reference.checked_add_signed(Duration::microseconds(us))
        }
        None => Some(reference),
    }
}

/// Kind of a message type tag, plus the instance implied by older
/// suffix-style tags (IMU2, MAG2, BAR2 ...).
fn kind_for_tag(tag: &str) -> Option<(SampleKind, Option<u8>)> {
    let kind = match tag {
        MSG_IMU => (SampleKind::Inertial, None),
        "IMU2" => (SampleKind::Inertial, Some(1)),
        "IMU3" => (SampleKind::Inertial, Some(2)),
        MSG_MAG => (SampleKind::Magnetic, None),
        "MAG2" => (SampleKind::Magnetic, Some(1)),
        "MAG3" => (SampleKind::Magnetic, Some(2)),
        MSG_BARO => (SampleKind::Pressure, None),
        "BAR2" => (SampleKind::Pressure, Some(1)),
        "BAR3" => (SampleKind::Pressure, Some(2)),
        MSG_ATT | MSG_AHR2 => (SampleKind::Navigation, None),
        _ => return None,
    };
    Some(kind)
}

fn read_instance(msg: &LogMessage, implied: Option<u8>) -> std::result::Result<Option<u8>, String> {
    match msg.field(FIELD_INSTANCE) {
        Some(v) if v.fract() == 0.0 && (0.0..=255.0).contains(&v) => Ok(Some(v as u8)),
        Some(v) => Err(format!("malformed instance value {}", v)),
        None => Ok(implied),
    }
}

fn sensor_reading(kind: SampleKind, msg: &LogMessage) -> Option<Reading> {
    let reading = match kind {
        SampleKind::Inertial => {
            let v = IMU_FIELDS.map(|f| f.value(msg));
            Reading::Inertial {
                gyr: [v[0], v[1], v[2]],
                acc: [v[3], v[4], v[5]],
            }
        }
        SampleKind::Magnetic => Reading::Magnetic {
            field: MAG_FIELDS.map(|f| f.value(msg)),
        },
        SampleKind::Pressure => Reading::Pressure {
            pressure_pa: BARO_PRESS.value(msg),
            temperature_c: BARO_TEMP.read(msg),
        },
        SampleKind::Navigation => return None,
    };
    Some(reading)
}

pub fn classify(msg: &LogMessage, ctx: &ClassifyContext) -> Outcome {
    let Some(timestamp) = resolve_timestamp(msg, ctx.reference_time) else {
        return Outcome::Error(format!("clock value {:?} out of range", msg.time_us));
    };
    if !ctx.window.contains(&timestamp) {
        return Outcome::Skip(SkipReason::OutOfWindow);
    }

    let Some((kind, implied)) = kind_for_tag(&msg.msg_type) else {
        return Outcome::Skip(SkipReason::UnhandledType);
    };

    if kind == SampleKind::Navigation {
        let [roll, pitch, yaw] = NAV_ATTITUDE_FIELDS.map(|f| f.read(msg));
        let (source, depth_m) = if msg.msg_type == MSG_AHR2 {
            (NAV_SOURCE_AHR2, NAV_DEPTH.read(msg))
        } else {
            (NAV_SOURCE_ATT, None)
        };
        return Outcome::Draft(SampleDraft {
            kind,
            instance: None,
            timestamp,
            reading: Reading::Navigation {
                source,
                roll_deg: roll,
                pitch_deg: pitch,
                yaw_deg: yaw,
                depth_m,
            },
        });
    }

    let instance = match read_instance(msg, implied) {
        Ok(Some(i)) => i,
        Ok(None) => return Outcome::Skip(SkipReason::MissingInstance),
        Err(detail) => return Outcome::Error(detail),
    };
    if !ctx.filters.allows(kind, instance) {
        return Outcome::Skip(SkipReason::InstanceFiltered);
    }

    let Some(reading) = sensor_reading(kind, msg) else {
        return Outcome::Skip(SkipReason::UnhandledType);
    };

    Outcome::Draft(SampleDraft {
        kind,
        instance: Some(instance),
        timestamp,
        reading,
    })
}
