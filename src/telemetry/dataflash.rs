// ArduPilot DataFlash (.bin) reader
//
// Record layout: 0xA3 0x95 <type id> <body>. Type 128 (FMT) declares the
// layout of every other type:
//   Type u8 | Length u8 | Name char[4] | Format char[16] | Columns char[64]
// Length counts the 3 header bytes. All numerics are little-endian.
//
// Unknown type ids and stray bytes are skipped by scanning for the next
// header. A truncated record at end of file ends the stream.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use serde::Serialize;

use super::LogMessage;
use crate::constants::{
    DF_FMT_LENGTH, DF_FMT_TYPE, DF_HEAD1, DF_HEAD2, DF_HEADER_LEN, FIELD_TIME_MS, FIELD_TIME_US,
};
use crate::error::{RovError, Result};

/// Layout of one message type, from its FMT record
#[derive(Debug, Clone)]
struct MessageFormat {
    name: String,
    length: usize,
    format: Vec<u8>,
    columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DecodeStats {
    pub messages: u64,
    pub formats: u64,
    pub skipped_bytes: u64,
    pub unknown_types: u64,
    pub truncated: bool,
}

pub struct DataFlashReader<R: Read> {
    reader: R,
    formats: HashMap<u8, MessageFormat>,
    pending_type: Option<u8>,
    stats: DecodeStats,
    finished: bool,
}

impl DataFlashReader<BufReader<File>> {
    /// Open a log file. Fails if the file is missing or not a DataFlash log.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => RovError::FileNotFound(path.display().to_string()),
            _ => RovError::Io(e),
        })?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> DataFlashReader<R> {
    /// Wrap a byte stream. The stream must begin with a FMT record.
    pub fn new(reader: R) -> Result<Self> {
        let mut this = Self {
            reader,
            formats: HashMap::new(),
            pending_type: None,
            stats: DecodeStats::default(),
            finished: false,
        };

        let mut header = [0u8; DF_HEADER_LEN];
        if !this.fill(&mut header)? {
            return Err(RovError::LogDecode("file too short for a DataFlash header".to_string()));
        }
        if header != [DF_HEAD1, DF_HEAD2, DF_FMT_TYPE] {
            return Err(RovError::LogDecode(format!(
                "not a DataFlash binary log (leading bytes {:02X} {:02X} {:02X})",
                header[0], header[1], header[2]
            )));
        }
        this.pending_type = Some(DF_FMT_TYPE);
        Ok(this)
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut b = [0u8; 1];
        Ok(if self.fill(&mut b)? { Some(b[0]) } else { None })
    }

    /// Read exactly `buf.len()` bytes. Returns false on end of input.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut read = 0;
        while read < buf.len() {
            match self.reader.read(&mut buf[read..]) {
                Ok(0) => return Ok(false),
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Consume bytes up to and including the next 0xA3 0x95 pair.
    fn sync(&mut self) -> io::Result<bool> {
        let mut prev: Option<u8> = None;
        let mut consumed: u64 = 0;
        loop {
            let Some(b) = self.read_byte()? else {
                self.stats.skipped_bytes += consumed;
                return Ok(false);
            };
            consumed += 1;
            if prev == Some(DF_HEAD1) && b == DF_HEAD2 {
                self.stats.skipped_bytes += consumed - 2;
                return Ok(true);
            }
            prev = Some(b);
        }
    }

    fn next_message(&mut self) -> Result<Option<LogMessage>> {
        loop {
            let type_id = match self.pending_type.take() {
                Some(t) => t,
                None => {
                    if !self.sync()? {
                        return Ok(None);
                    }
                    match self.read_byte()? {
                        Some(t) => t,
                        None => {
                            self.stats.truncated = true;
                            return Ok(None);
                        }
                    }
                }
            };

            if type_id == DF_FMT_TYPE {
                let mut body = [0u8; DF_FMT_LENGTH - DF_HEADER_LEN];
                if !self.fill(&mut body)? {
                    self.stats.truncated = true;
                    return Ok(None);
                }
                match parse_fmt_body(&body) {
                    Some((declared, fmt)) => {
                        let msg = LogMessage::new("FMT")
                            .with_field("Type", declared as f64)
                            .with_field("Length", fmt.length as f64);
                        self.formats.insert(declared, fmt);
                        self.stats.formats += 1;
                        self.stats.messages += 1;
                        return Ok(Some(msg));
                    }
                    None => {
                        log::debug!("Skipping malformed FMT record");
                        self.stats.skipped_bytes += DF_FMT_LENGTH as u64;
                        continue;
                    }
                }
            }

            let length = match self.formats.get(&type_id) {
                Some(fmt) => fmt.length,
                None => {
                    self.stats.unknown_types += 1;
                    self.stats.skipped_bytes += DF_HEADER_LEN as u64;
                    continue;
                }
            };

            let mut body = vec![0u8; length - DF_HEADER_LEN];
            if !self.fill(&mut body)? {
                self.stats.truncated = true;
                return Ok(None);
            }

            if let Some(fmt) = self.formats.get(&type_id) {
                self.stats.messages += 1;
                return Ok(Some(decode_body(fmt, &body)));
            }
        }
    }
}

impl<R: Read> Iterator for DataFlashReader<R> {
    type Item = Result<LogMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_message() {
            Ok(Some(msg)) => Some(Ok(msg)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

fn parse_fmt_body(body: &[u8]) -> Option<(u8, MessageFormat)> {
    if body.len() < DF_FMT_LENGTH - DF_HEADER_LEN {
        return None;
    }
    let type_id = body[0];
    let length = body[1] as usize;
    if length < DF_HEADER_LEN {
        return None;
    }
    let name = fixed_str(&body[2..6]);
    let format = fixed_str(&body[6..22]).into_bytes();
    let columns = fixed_str(&body[22..86])
        .split(',')
        .map(|c| c.trim().to_string())
        .collect();
    Some((type_id, MessageFormat { name, length, format, columns }))
}

/// Byte width of a format character, or None if unknown
fn field_width(c: u8) -> Option<usize> {
    match c {
        b'b' | b'B' | b'M' => Some(1),
        b'h' | b'H' | b'c' | b'C' => Some(2),
        b'i' | b'I' | b'f' | b'e' | b'E' | b'L' | b'n' => Some(4),
        b'd' | b'q' | b'Q' => Some(8),
        b'N' => Some(16),
        b'Z' | b'a' => Some(64),
        _ => None,
    }
}

fn le<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// Numeric value of one field; None for string and array fields
fn field_value(c: u8, bytes: &[u8]) -> Option<f64> {
    let v = match c {
        b'b' => i8::from_le_bytes(le(bytes)) as f64,
        b'B' | b'M' => bytes[0] as f64,
        b'h' => i16::from_le_bytes(le(bytes)) as f64,
        b'H' => u16::from_le_bytes(le(bytes)) as f64,
        b'i' => i32::from_le_bytes(le(bytes)) as f64,
        b'I' => u32::from_le_bytes(le(bytes)) as f64,
        b'f' => f32::from_le_bytes(le(bytes)) as f64,
        b'd' => f64::from_le_bytes(le(bytes)),
        b'q' => i64::from_le_bytes(le(bytes)) as f64,
        b'Q' => u64::from_le_bytes(le(bytes)) as f64,
        b'c' => i16::from_le_bytes(le(bytes)) as f64 * 0.01,
        b'C' => u16::from_le_bytes(le(bytes)) as f64 * 0.01,
        b'e' => i32::from_le_bytes(le(bytes)) as f64 * 0.01,
        b'E' => u32::from_le_bytes(le(bytes)) as f64 * 0.01,
        b'L' => i32::from_le_bytes(le(bytes)) as f64 * 1e-7,
        _ => return None,
    };
    Some(v)
}

fn decode_body(fmt: &MessageFormat, body: &[u8]) -> LogMessage {
    let mut msg = LogMessage::new(fmt.name.clone());
    let mut offset = 0;
    let mut raw_time_us: Option<u64> = None;

    for (i, &c) in fmt.format.iter().enumerate() {
        let Some(width) = field_width(c) else {
            log::debug!("{}: unknown format character '{}', stopping decode", fmt.name, c as char);
            break;
        };
        if offset + width > body.len() {
            log::debug!("{}: format longer than record, stopping decode", fmt.name);
            break;
        }
        let bytes = &body[offset..offset + width];
        offset += width;

        let Some(column) = fmt.columns.get(i) else { continue };
        if column == FIELD_TIME_US && c == b'Q' {
            raw_time_us = Some(u64::from_le_bytes(le(bytes)));
        }
        if let Some(value) = field_value(c, bytes) {
            msg.fields.insert(column.clone(), value);
        }
    }

    msg.time_us = raw_time_us
        .or_else(|| msg.field(FIELD_TIME_US).filter(|v| *v >= 0.0).map(|v| v as u64))
        .or_else(|| msg.field(FIELD_TIME_MS).filter(|v| *v >= 0.0).and_then(|v| (v as u64).checked_mul(1000)));
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::fixtures::{LogBuilder, Payload, IMU_TYPE};
    use std::io::{Cursor, Write};

    fn read_all(bytes: Vec<u8>) -> (Vec<LogMessage>, DecodeStats) {
        let mut reader = DataFlashReader::new(Cursor::new(bytes)).unwrap();
        let msgs: Vec<LogMessage> = reader.by_ref().map(|m| m.unwrap()).collect();
        (msgs, reader.stats())
    }

    #[test]
    fn test_decodes_declared_messages() {
        let bytes = LogBuilder::standard()
            .imu(1_500_000, 0, [0.1, 0.2, 0.3], [1.0, 2.0, -9.81])
            .att(2_000_000, 10.5, -3.25, 270.0)
            .build();
        let (msgs, stats) = read_all(bytes);

        let data: Vec<_> = msgs.iter().filter(|m| m.msg_type != "FMT").collect();
        assert_eq!(data.len(), 2);

        let imu = data[0];
        assert_eq!(imu.msg_type, "IMU");
        assert_eq!(imu.time_us, Some(1_500_000));
        assert_eq!(imu.field("I"), Some(0.0));
        assert!((imu.field("AccZ").unwrap() + 9.81).abs() < 1e-5);

        let att = data[1];
        assert_eq!(att.msg_type, "ATT");
        assert!((att.field("Roll").unwrap() - 10.5).abs() < 1e-9);
        assert!((att.field("Pitch").unwrap() + 3.25).abs() < 1e-9);
        assert!((att.field("Yaw").unwrap() - 270.0).abs() < 1e-9);

        assert_eq!(stats.skipped_bytes, 0);
        assert!(!stats.truncated);
    }

    #[test]
    fn test_resyncs_after_garbage_and_unknown_types() {
        let bytes = LogBuilder::standard()
            .imu(1_000, 0, [0.0; 3], [0.0; 3])
            .raw(&[0x00, 0x13, 0x37, 0xA3])
            .raw(&[DF_HEAD1, DF_HEAD2, 250, 1, 2, 3])
            .imu(2_000, 0, [0.0; 3], [0.0; 3])
            .build();
        let (msgs, stats) = read_all(bytes);

        let imus: Vec<_> = msgs.iter().filter(|m| m.msg_type == "IMU").collect();
        assert_eq!(imus.len(), 2);
        assert_eq!(imus[1].time_us, Some(2_000));
        assert_eq!(stats.unknown_types, 1);
        assert!(stats.skipped_bytes >= 4);
    }

    #[test]
    fn test_truncated_tail_ends_stream() {
        let mut bytes = LogBuilder::standard()
            .imu(1_000, 0, [0.0; 3], [0.0; 3])
            .imu(2_000, 0, [0.0; 3], [0.0; 3])
            .build();
        bytes.truncate(bytes.len() - 5);
        let (msgs, stats) = read_all(bytes);

        assert_eq!(msgs.iter().filter(|m| m.msg_type == "IMU").count(), 1);
        assert!(stats.truncated);
    }

    #[test]
    fn test_time_ms_fallback_for_old_firmware() {
        let bytes = LogBuilder::new()
            .format(IMU_TYPE, "IMU", "IBff", "TimeMS,I,GyrX,AccX")
            .message(IMU_TYPE, Payload::new().u32(1_234).u8(0).f32(0.5).f32(1.5))
            .build();
        let (msgs, _) = read_all(bytes);
        let imu = msgs.iter().find(|m| m.msg_type == "IMU").unwrap();
        assert_eq!(imu.time_us, Some(1_234_000));
    }

    #[test]
    fn test_oversized_time_ms_leaves_clock_unset() {
        let bytes = LogBuilder::new()
            .format(IMU_TYPE, "IMU", "QB", "TimeMS,I")
            .message(IMU_TYPE, Payload::new().u64(u64::MAX / 10).u8(0))
            .message(IMU_TYPE, Payload::new().u64(42).u8(1))
            .build();
        let (msgs, _) = read_all(bytes);
        let imus: Vec<_> = msgs.iter().filter(|m| m.msg_type == "IMU").collect();
        assert_eq!(imus.len(), 2);
        assert_eq!(imus[0].time_us, None);
        assert_eq!(imus[0].field("I"), Some(0.0));
        assert_eq!(imus[1].time_us, Some(42_000));
    }

    #[test]
    fn test_rejects_non_dataflash_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"GIF89a not a flight log").unwrap();
        match DataFlashReader::open(file.path()) {
            Err(RovError::LogDecode(_)) => {}
            other => panic!("expected LogDecode error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_missing_file_is_reported() {
        let result = DataFlashReader::open(Path::new("/nonexistent/dive.bin"));
        assert!(matches!(result, Err(RovError::FileNotFound(_))));
    }
}
