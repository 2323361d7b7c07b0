// Test-only DataFlash log builder
// Produces byte-exact logs so decoder and pipeline tests need no binary fixtures.

use crate::constants::{DF_FMT_TYPE, DF_HEAD1, DF_HEAD2, DF_HEADER_LEN};

pub const IMU_TYPE: u8 = 130;
pub const MAG_TYPE: u8 = 131;
pub const BARO_TYPE: u8 = 132;
pub const ATT_TYPE: u8 = 133;
pub const AHR2_TYPE: u8 = 134;

/// Little-endian message body
#[derive(Default)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.0.push(v);
        self
    }

    pub fn i16(mut self, v: i16) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u16(mut self, v: u16) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32(mut self, v: f32) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Centi-scaled signed 16-bit ('c')
    pub fn centi(self, v: f64) -> Self {
        self.i16((v * 100.0).round() as i16)
    }

    /// Centi-scaled unsigned 16-bit ('C')
    pub fn centi_u(self, v: f64) -> Self {
        self.u16((v * 100.0).round() as u16)
    }
}

fn padded(text: &str, width: usize) -> Vec<u8> {
    let mut out = text.as_bytes().to_vec();
    out.resize(width, 0);
    out
}

fn format_length(format: &str) -> usize {
    format.bytes().map(|c| match c {
        b'b' | b'B' | b'M' => 1,
        b'h' | b'H' | b'c' | b'C' => 2,
        b'i' | b'I' | b'f' | b'e' | b'E' | b'L' | b'n' => 4,
        b'd' | b'q' | b'Q' => 8,
        b'N' => 16,
        b'Z' | b'a' => 64,
        other => panic!("unsupported format char {}", other as char),
    }).sum::<usize>() + DF_HEADER_LEN
}

pub struct LogBuilder {
    bytes: Vec<u8>,
}

impl LogBuilder {
    /// Empty log. The first call must be `format` to make a valid file.
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Log declaring IMU, MAG, BARO, ATT and AHR2 the way ArduSub firmware does.
    pub fn standard() -> Self {
        Self::new()
            .format(IMU_TYPE, "IMU", "QBffffff", "TimeUS,I,GyrX,GyrY,GyrZ,AccX,AccY,AccZ")
            .format(MAG_TYPE, "MAG", "QBfff", "TimeUS,I,MagX,MagY,MagZ")
            .format(BARO_TYPE, "BARO", "QBffc", "TimeUS,I,Alt,Press,Temp")
            .format(ATT_TYPE, "ATT", "QccccCC", "TimeUS,DesRoll,Roll,DesPitch,Pitch,DesYaw,Yaw")
            .format(AHR2_TYPE, "AHR2", "QccCfLL", "TimeUS,Roll,Pitch,Yaw,Alt,Lat,Lng")
    }

    pub fn format(mut self, type_id: u8, name: &str, format: &str, columns: &str) -> Self {
        self.bytes.extend_from_slice(&[DF_HEAD1, DF_HEAD2, DF_FMT_TYPE]);
        self.bytes.push(type_id);
        self.bytes.push(format_length(format) as u8);
        self.bytes.extend(padded(name, 4));
        self.bytes.extend(padded(format, 16));
        self.bytes.extend(padded(columns, 64));
        self
    }

    pub fn message(mut self, type_id: u8, payload: Payload) -> Self {
        self.bytes.extend_from_slice(&[DF_HEAD1, DF_HEAD2, type_id]);
        self.bytes.extend(payload.0);
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn imu(self, time_us: u64, instance: u8, gyr: [f32; 3], acc: [f32; 3]) -> Self {
        self.message(IMU_TYPE, Payload::new()
            .u64(time_us).u8(instance)
            .f32(gyr[0]).f32(gyr[1]).f32(gyr[2])
            .f32(acc[0]).f32(acc[1]).f32(acc[2]))
    }

    pub fn mag(self, time_us: u64, instance: u8, field: [f32; 3]) -> Self {
        self.message(MAG_TYPE, Payload::new()
            .u64(time_us).u8(instance)
            .f32(field[0]).f32(field[1]).f32(field[2]))
    }

    pub fn baro(self, time_us: u64, instance: u8, press: f32, temp: f64) -> Self {
        self.message(BARO_TYPE, Payload::new()
            .u64(time_us).u8(instance)
            .f32(0.0).f32(press).centi(temp))
    }

    pub fn att(self, time_us: u64, roll: f64, pitch: f64, yaw: f64) -> Self {
        self.message(ATT_TYPE, Payload::new()
            .u64(time_us)
            .centi(roll).centi(roll)
            .centi(pitch).centi(pitch)
            .centi_u(yaw).centi_u(yaw))
    }

    pub fn ahr2(self, time_us: u64, roll: f64, pitch: f64, yaw: f64, alt: f32) -> Self {
        self.message(AHR2_TYPE, Payload::new()
            .u64(time_us)
            .centi(roll).centi(pitch).centi_u(yaw)
            .f32(alt).i32(0).i32(0))
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}
