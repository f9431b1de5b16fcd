//! Line codec for resource records
//!
//! Encoding always emits the current 19-field layout:
//!
//! ```text
//! 2006-01-02 15:04:05,<name>,<cpu>,<cpuNorm>,<memMB>,<memPct>,<threads>,<diskR>,<diskW>,
//! <netS>,<netR>,<isActive>,"<command>","<workingDir>","<category>",<pid>,<ppid>,
//! <createTimeMs>,<cpuTimeSec>
//! ```
//!
//! Decoding accepts every historical layout and picks the version from the
//! field count alone. Quoted fields may contain commas; the lexer below keeps
//! an explicit quote state rather than delegating to a CSV library because
//! legacy writers emitted quotes mid-field.

use crate::error::{CodecError, CodecResult};
use crate::record::types::{ResourceRecord, SchemaVersion, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use std::fmt::Write;

/// Field separator
pub const SEPARATOR: char = ',';

const QUOTE: char = '"';
const ESCAPE: char = '\\';

/// Encode a record as one line (no trailing newline) in the current layout
pub fn encode(record: &ResourceRecord) -> String {
    let mut line = String::with_capacity(192);

    // write! into a String cannot fail
    let _ = write!(
        line,
        "{},{},{:.2},{:.2},{:.2},{:.2},{},{:.2},{:.2},{:.2},{:.2},{},",
        record.timestamp.format(TIMESTAMP_FORMAT),
        sanitize_bare(&record.name),
        record.cpu_percent,
        record.cpu_percent_normalized,
        record.memory_mb,
        record.memory_percent,
        record.threads,
        record.disk_read_mb,
        record.disk_write_mb,
        record.net_sent_kb,
        record.net_recv_kb,
        record.is_active,
    );
    push_quoted(&mut line, &record.command);
    line.push(SEPARATOR);
    push_quoted(&mut line, &record.working_dir);
    line.push(SEPARATOR);
    push_quoted(&mut line, &record.category);
    let _ = write!(
        line,
        ",{},{},{},{:.2}",
        record.pid, record.ppid, record.create_time, record.cpu_time
    );

    line
}

/// Decode a line, detecting the schema version from its field count
pub fn decode(line: &str) -> CodecResult<(ResourceRecord, SchemaVersion)> {
    let fields = split_fields(line);
    let version = SchemaVersion::from_field_count(fields.len())
        .ok_or(CodecError::FieldCount { count: fields.len() })?;
    let record = decode_fields(&fields, version)?;
    Ok((record, version))
}

/// Decode a line that the caller knows to be in `version`
pub fn decode_versioned(line: &str, version: SchemaVersion) -> CodecResult<ResourceRecord> {
    let fields = split_fields(line);
    if fields.len() != version.field_count() {
        return Err(CodecError::VersionMismatch {
            count: fields.len(),
            expected: version.as_str(),
        });
    }
    decode_fields(&fields, version)
}

/// Split a line on separators that appear outside quotes.
///
/// Quote characters toggle the quote state and are dropped. Inside or outside
/// quotes, `\"` and `\\` yield a literal quote/backslash; any other backslash
/// is kept as-is so legacy Windows paths survive.
pub fn split_fields(line: &str) -> Vec<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = Vec::with_capacity(SchemaVersion::CURRENT.field_count());
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE if matches!(chars.peek(), Some(&QUOTE) | Some(&ESCAPE)) => {
                // peek matched, next() is Some
                if let Some(escaped) = chars.next() {
                    field.push(escaped);
                }
            }
            QUOTE => in_quotes = !in_quotes,
            SEPARATOR if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);

    fields
}

fn decode_fields(fields: &[String], version: SchemaVersion) -> CodecResult<ResourceRecord> {
    let raw_ts = fields[0].trim();
    let timestamp = NaiveDateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT).map_err(|_| {
        CodecError::Timestamp {
            value: raw_ts.to_string(),
        }
    })?;

    let mut record = ResourceRecord::new(timestamp, fields[1].clone());
    let f = |i: usize| parse_f64(&fields[i]);

    match version {
        SchemaVersion::V1 | SchemaVersion::V2 | SchemaVersion::V3 => {
            record.cpu_percent = f(2);
            record.memory_mb = f(3);
            record.threads = parse_i32(&fields[4]);
            record.disk_read_mb = f(5);
            record.disk_write_mb = f(6);
            record.net_sent_kb = f(7);
            record.net_recv_kb = f(8);
            if version >= SchemaVersion::V2 {
                record.is_active = parse_bool(&fields[9]);
            }
            if version == SchemaVersion::V3 {
                record.command = fields[10].clone();
                record.working_dir = fields[11].clone();
                record.category = fields[12].clone();
            }
        }
        SchemaVersion::Extended | SchemaVersion::ExtendedPpid => {
            record.cpu_percent = f(2);
            record.cpu_percent_normalized = f(3);
            record.memory_mb = f(4);
            record.memory_percent = f(5);
            record.threads = parse_i32(&fields[6]);
            record.disk_read_mb = f(7);
            record.disk_write_mb = f(8);
            record.net_sent_kb = f(9);
            record.net_recv_kb = f(10);
            record.is_active = parse_bool(&fields[11]);
            record.command = fields[12].clone();
            record.working_dir = fields[13].clone();
            record.category = fields[14].clone();
            record.pid = parse_i32(&fields[15]);

            // ppid shifts the tail by one
            let tail = if version == SchemaVersion::ExtendedPpid {
                record.ppid = parse_i32(&fields[16]);
                17
            } else {
                16
            };
            record.create_time = parse_i64(&fields[tail]);
            record.cpu_time = f(tail + 1);
        }
    }

    Ok(record)
}

fn parse_f64(s: &str) -> f64 {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn parse_i32(s: &str) -> i32 {
    let s = s.trim();
    s.parse::<i32>()
        .ok()
        .or_else(|| {
            // Some writers emitted thread counts as floats
            s.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= i32::MIN as f64 && *v <= i32::MAX as f64)
                .map(|v| v as i32)
        })
        .unwrap_or(0)
}

fn parse_i64(s: &str) -> i64 {
    s.trim().parse::<i64>().unwrap_or(0)
}

fn parse_bool(s: &str) -> bool {
    let s = s.trim();
    s.eq_ignore_ascii_case("true") || s == "1"
}

fn push_quoted(line: &mut String, value: &str) {
    line.push(QUOTE);
    for c in value.chars() {
        match c {
            QUOTE | ESCAPE => {
                line.push(ESCAPE);
                line.push(c);
            }
            '\n' | '\r' => line.push(' '),
            _ => line.push(c),
        }
    }
    line.push(QUOTE);
}

/// Names are written unquoted, so anything the lexer would treat specially
/// has to be escaped.
fn sanitize_bare(value: &str) -> String {
    if !value.contains([SEPARATOR, QUOTE, ESCAPE, '\n', '\r']) {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    push_quoted(&mut out, value);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(10, 30, 45)
            .unwrap()
    }

    fn full_record() -> ResourceRecord {
        ResourceRecord {
            timestamp: ts(),
            name: "postgres".into(),
            cpu_percent: 150.25,
            cpu_percent_normalized: 18.78,
            memory_mb: 512.5,
            memory_percent: 3.13,
            threads: 12,
            disk_read_mb: 1.5,
            disk_write_mb: 0.25,
            net_sent_kb: 100.0,
            net_recv_kb: 42.42,
            is_active: true,
            command: "postgres -D /var/lib/pg,data".into(),
            working_dir: "/var/lib/postgresql".into(),
            category: "database, sql".into(),
            pid: 4242,
            ppid: 1,
            create_time: 1_710_000_000_000,
            cpu_time: 3600.5,
        }
    }

    #[test]
    fn test_encode_layout() {
        let line = encode(&full_record());
        assert!(line.starts_with("2024-03-15 10:30:45,postgres,150.25,18.78,512.50,3.13,12,"));
        assert!(line.contains(",true,\"postgres -D /var/lib/pg,data\","));
        assert!(line.ends_with(",4242,1,1710000000000,3600.50"));
        assert_eq!(split_fields(&line).len(), 19);
    }

    #[test]
    fn test_round_trip() {
        let record = full_record();
        let (decoded, version) = decode(&encode(&record)).unwrap();
        assert_eq!(version, SchemaVersion::CURRENT);
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_round_trip_with_quotes_and_backslashes() {
        let mut record = full_record();
        record.command = r#"sh -c "echo \"hi\"""#.into();
        record.working_dir = r"C:\Users\svc\".into();
        record.name = "weird,name".into();
        let (decoded, _) = decode(&encode(&record)).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_v1() {
        let (r, v) = decode("2024-03-15 10:30:45,nginx,12.50,256.00,4,1.00,2.00,3.00,4.00").unwrap();
        assert_eq!(v, SchemaVersion::V1);
        assert_eq!(r.name, "nginx");
        assert_eq!(r.cpu_percent, 12.5);
        assert_eq!(r.memory_mb, 256.0);
        assert_eq!(r.threads, 4);
        assert_eq!(r.net_recv_kb, 4.0);
        assert!(!r.is_active);
        assert_eq!(r.cpu_percent_normalized, 0.0);
        assert_eq!(r.memory_percent, 0.0);
        assert_eq!(r.command, "");
        assert_eq!(r.pid, 0);
    }

    #[test]
    fn test_decode_v2() {
        let (r, v) =
            decode("2024-03-15 10:30:45,nginx,12.50,256.00,4,1.00,2.00,3.00,4.00,true").unwrap();
        assert_eq!(v, SchemaVersion::V2);
        assert!(r.is_active);
        assert_eq!(r.category, "");
    }

    #[test]
    fn test_decode_v3_quoted_commas() {
        let line = r#"2024-03-15 10:30:45,node,5.00,100.00,8,0.00,0.00,1.00,1.00,false,"node server.js --a=1,2","/srv/app",web"#;
        let (r, v) = decode(line).unwrap();
        assert_eq!(v, SchemaVersion::V3);
        assert_eq!(r.command, "node server.js --a=1,2");
        assert_eq!(r.working_dir, "/srv/app");
        assert_eq!(r.category, "web");
        assert_eq!(r.ppid, 0);
    }

    #[test]
    fn test_decode_extended_without_ppid() {
        let line = r#"2024-03-15 10:30:45,redis,7.00,0.88,64.00,0.40,4,0.00,0.10,2.00,3.00,true,"redis-server","/",cache,900,1700000000000,12.50"#;
        let (r, v) = decode(line).unwrap();
        assert_eq!(v, SchemaVersion::Extended);
        assert_eq!(r.pid, 900);
        assert_eq!(r.ppid, 0);
        assert_eq!(r.create_time, 1_700_000_000_000);
        assert_eq!(r.cpu_time, 12.5);
    }

    #[test]
    fn test_quote_mid_field() {
        let fields = split_fields(r#"a,b"c,d"e,f"#);
        assert_eq!(fields, vec!["a", "bc,de", "f"]);
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        let err = decode("yesterday,nginx,1,2,3,4,5,6,7").unwrap_err();
        assert!(matches!(err, CodecError::Timestamp { .. }));
    }

    #[test]
    fn test_bad_numeric_zeroed() {
        let (r, _) = decode("2024-03-15 10:30:45,nginx,abc,256.00,x,1.00,NaN,3.00,4.00").unwrap();
        assert_eq!(r.cpu_percent, 0.0);
        assert_eq!(r.threads, 0);
        assert_eq!(r.disk_write_mb, 0.0);
        assert_eq!(r.memory_mb, 256.0);
    }

    #[test]
    fn test_unknown_field_count_rejected() {
        assert!(matches!(
            decode("2024-03-15 10:30:45,nginx,1,2"),
            Err(CodecError::FieldCount { count: 4 })
        ));
        assert!(matches!(
            decode("2024-03-15 10:30:45,a,1,2,3,4,5,6,7,true,x"),
            Err(CodecError::FieldCount { count: 11 })
        ));
        assert!(decode("").is_err());
    }

    #[test]
    fn test_decode_versioned_mismatch() {
        let line = encode(&full_record());
        assert!(decode_versioned(&line, SchemaVersion::ExtendedPpid).is_ok());
        assert!(matches!(
            decode_versioned(&line, SchemaVersion::V3),
            Err(CodecError::VersionMismatch { count: 19, .. })
        ));
    }

    #[test]
    fn test_legacy_backslash_kept() {
        let line = r#"2024-03-15 10:30:45,svc,1,2,3,4,5,6,7,true,"run.exe","C:\Program Files\svc",tools"#;
        let (r, _) = decode(line).unwrap();
        assert_eq!(r.working_dir, r"C:\Program Files\svc");
    }

    #[test]
    fn test_crlf_trimmed() {
        let (r, _) = decode("2024-03-15 10:30:45,nginx,1,2,3,4,5,6,7,1\r\n").unwrap();
        assert!(r.is_active);
    }
}
