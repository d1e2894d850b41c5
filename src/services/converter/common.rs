// Conversion helpers shared by the per-engine converters
use crate::error::ConversionError;
use crate::models::{ColumnDescriptor, NativeCell, PortableValue, ZoneId};
use crate::services::converter::ConversionContext;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

pub type Converted = Result<PortableValue, ConversionError>;

/// Declared type name split into a lowercase base and its first argument list.
///
/// `Nullable(...)` and `LowCardinality(...)` wrappers are removed, every
/// parenthesised group is dropped from the base (`timestamp(6) with time zone`
/// -> `timestamp with time zone`) and `T[]` becomes `array` with argument `T`.
/// Arguments keep their original case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName {
    pub base: String,
    pub args: Option<String>,
}

impl TypeName {
    pub fn parse(declared: &str) -> Self {
        let mut text = declared.trim();
        loop {
            let lower = text.to_ascii_lowercase();
            let inner = ["nullable(", "lowcardinality("]
                .iter()
                .find(|prefix| lower.starts_with(*prefix) && lower.ends_with(')'))
                .map(|prefix| text[prefix.len()..text.len() - 1].trim());
            match inner {
                Some(inner) => text = inner,
                None => break,
            }
        }

        if let Some(element) = text.strip_suffix("[]") {
            return TypeName {
                base: "array".to_string(),
                args: Some(element.trim().to_string()),
            };
        }

        let mut base = String::with_capacity(text.len());
        let mut args = None;
        let mut depth = 0usize;
        let mut group_start = 0;
        for (i, c) in text.char_indices() {
            match c {
                '(' => {
                    if depth == 0 {
                        group_start = i + 1;
                    }
                    depth += 1;
                }
                ')' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 && args.is_none() {
                        args = Some(text[group_start..i].trim().to_string());
                    }
                }
                _ if depth == 0 => base.push(c.to_ascii_lowercase()),
                _ => {}
            }
        }
        TypeName {
            base: base.split_whitespace().collect::<Vec<_>>().join(" "),
            args,
        }
    }

    /// Top-level comma separated arguments: `Map(String, Array(Int32))` -> [`String`, `Array(Int32)`]
    pub fn arg_list(&self) -> Vec<String> {
        self.args.as_deref().map(split_top_level).unwrap_or_default()
    }
}

pub fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth -= 1,
            ',' if depth == 0 && !quoted => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

pub fn mismatch(column: &ColumnDescriptor, cell: &NativeCell) -> ConversionError {
    ConversionError::new(
        &column.name,
        &column.type_name,
        format!("unexpected {} value", cell.kind()),
    )
}

pub fn unsupported(column: &ColumnDescriptor) -> ConversionError {
    ConversionError::unsupported(&column.name, &column.type_name)
}

/// Shared fallback: plain scalars by the kind of the native cell
pub fn baseline(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    match cell {
        NativeCell::Null => Ok(PortableValue::Null),
        NativeCell::Bool(b) => Ok(PortableValue::Boolean(*b)),
        NativeCell::Int(i) => Ok(PortableValue::Int64(*i)),
        NativeCell::UInt(u) => Ok(unsigned(*u)),
        NativeCell::Float(f) => Ok(PortableValue::Float32(*f)),
        NativeCell::Double(d) => Ok(PortableValue::Float64(*d)),
        NativeCell::Decimal(s) => Ok(PortableValue::Decimal(s.clone())),
        NativeCell::Text(s) => Ok(PortableValue::String(s.clone())),
        NativeCell::Bytes(b) => Ok(PortableValue::Bytes(b.clone())),
        NativeCell::Date(d) => Ok(PortableValue::Date(*d)),
        _ => {
            let type_name = if column.type_name.is_empty() {
                cell.kind()
            } else {
                column.type_name.as_str()
            };
            Err(ConversionError::unsupported(&column.name, type_name))
        }
    }
}

fn unsigned(value: u64) -> PortableValue {
    i64::try_from(value)
        .map(PortableValue::Int64)
        .unwrap_or_else(|_| PortableValue::Decimal(value.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

/// Integer of the given width; range violations fail
pub fn integer(column: &ColumnDescriptor, cell: &NativeCell, width: IntWidth) -> Converted {
    let out_of_range = || ConversionError::new(&column.name, &column.type_name, "value out of range");
    let value: i64 = match cell {
        NativeCell::Int(i) => *i,
        NativeCell::UInt(u) => match i64::try_from(*u) {
            Ok(v) => v,
            Err(_) if width == IntWidth::W64 => return Ok(PortableValue::Decimal(u.to_string())),
            Err(_) => return Err(out_of_range()),
        },
        NativeCell::Bool(b) => *b as i64,
        NativeCell::Decimal(s) | NativeCell::Text(s) => match s.trim().parse::<i64>() {
            Ok(v) => v,
            // unsigned 64-bit and wider integers keep their digits
            Err(_) if width == IntWidth::W64 && is_integer_text(s) => {
                return Ok(PortableValue::Decimal(s.trim().to_string()))
            }
            Err(_) => return Err(mismatch(column, cell)),
        },
        NativeCell::Double(d) if d.fract() == 0.0 && d.abs() < 9.007_199_254_740_992e15 => *d as i64,
        _ => return Err(mismatch(column, cell)),
    };
    match width {
        IntWidth::W8 => i8::try_from(value).map(PortableValue::Int8).map_err(|_| out_of_range()),
        IntWidth::W16 => i16::try_from(value).map(PortableValue::Int16).map_err(|_| out_of_range()),
        IntWidth::W32 => i32::try_from(value).map(PortableValue::Int32).map_err(|_| out_of_range()),
        IntWidth::W64 => Ok(PortableValue::Int64(value)),
    }
}

fn is_integer_text(text: &str) -> bool {
    let digits = text.trim().trim_start_matches(['-', '+']);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

pub fn float32(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    match cell {
        NativeCell::Float(f) => Ok(PortableValue::Float32(*f)),
        NativeCell::Double(d) => Ok(PortableValue::Float32(*d as f32)),
        NativeCell::Int(i) => Ok(PortableValue::Float32(*i as f32)),
        NativeCell::Decimal(s) | NativeCell::Text(s) => s
            .trim()
            .parse()
            .map(PortableValue::Float32)
            .map_err(|_| mismatch(column, cell)),
        _ => Err(mismatch(column, cell)),
    }
}

pub fn float64(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    match cell {
        NativeCell::Double(d) => Ok(PortableValue::Float64(*d)),
        NativeCell::Float(f) => Ok(PortableValue::Float64(*f as f64)),
        NativeCell::Int(i) => Ok(PortableValue::Float64(*i as f64)),
        NativeCell::UInt(u) => Ok(PortableValue::Float64(*u as f64)),
        NativeCell::Decimal(s) | NativeCell::Text(s) => s
            .trim()
            .parse()
            .map(PortableValue::Float64)
            .map_err(|_| mismatch(column, cell)),
        _ => Err(mismatch(column, cell)),
    }
}

/// Exact decimal text
pub fn decimal(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    match cell {
        NativeCell::Decimal(s) => Ok(PortableValue::Decimal(s.clone())),
        NativeCell::Text(s) if s.trim().parse::<f64>().is_ok() => Ok(PortableValue::Decimal(s.trim().to_string())),
        NativeCell::Int(i) => Ok(PortableValue::Decimal(i.to_string())),
        NativeCell::UInt(u) => Ok(PortableValue::Decimal(u.to_string())),
        // shortest representation that round-trips the binary value
        NativeCell::Double(d) if d.is_finite() => Ok(PortableValue::Decimal(d.to_string())),
        NativeCell::Float(f) if f.is_finite() => Ok(PortableValue::Decimal(f.to_string())),
        _ => Err(mismatch(column, cell)),
    }
}

pub fn boolean(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    match cell {
        NativeCell::Bool(b) => Ok(PortableValue::Boolean(*b)),
        NativeCell::Int(i) => Ok(PortableValue::Boolean(*i != 0)),
        NativeCell::UInt(u) => Ok(PortableValue::Boolean(*u != 0)),
        NativeCell::Bytes(b) if b.len() == 1 => Ok(PortableValue::Boolean(b[0] != 0)),
        NativeCell::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" => Ok(PortableValue::Boolean(true)),
            "false" | "f" | "0" | "no" | "n" => Ok(PortableValue::Boolean(false)),
            _ => Err(mismatch(column, cell)),
        },
        _ => Err(mismatch(column, cell)),
    }
}

pub fn text(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    match cell {
        NativeCell::Text(s) | NativeCell::Decimal(s) => Ok(PortableValue::String(s.clone())),
        NativeCell::Bytes(b) | NativeCell::Raw(b) => String::from_utf8(b.clone())
            .map(PortableValue::String)
            .map_err(|_| ConversionError::new(&column.name, &column.type_name, "invalid UTF-8 text")),
        NativeCell::Int(i) => Ok(PortableValue::String(i.to_string())),
        NativeCell::UInt(u) => Ok(PortableValue::String(u.to_string())),
        NativeCell::Double(d) => Ok(PortableValue::String(d.to_string())),
        NativeCell::Float(f) => Ok(PortableValue::String(f.to_string())),
        NativeCell::Bool(b) => Ok(PortableValue::String(b.to_string())),
        NativeCell::Json(v) => Ok(PortableValue::String(v.to_string())),
        _ => Err(mismatch(column, cell)),
    }
}

pub fn bytes(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    match cell {
        NativeCell::Bytes(b) | NativeCell::Raw(b) => Ok(PortableValue::Bytes(b.clone())),
        NativeCell::Text(s) => Ok(PortableValue::Bytes(s.as_bytes().to_vec())),
        _ => Err(mismatch(column, cell)),
    }
}

pub fn date(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    match cell {
        NativeCell::Date(d) => Ok(PortableValue::Date(*d)),
        NativeCell::Timestamp(ts) => Ok(PortableValue::Date(ts.date())),
        NativeCell::Text(s) => parse_date(s.trim())
            .map(PortableValue::Date)
            .ok_or_else(|| mismatch(column, cell)),
        _ => Err(mismatch(column, cell)),
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(text).map(|ts| ts.date()))
}

pub fn time(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    match cell {
        NativeCell::Time(t) => Ok(PortableValue::Time(*t)),
        NativeCell::Text(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
            .map(PortableValue::Time)
            .map_err(|_| mismatch(column, cell)),
        _ => Err(mismatch(column, cell)),
    }
}

/// Time of day with an offset, from `HH:MM:SS[.f]±hh[:mm]` text
pub fn time_tz(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    let NativeCell::Text(s) = cell else {
        return Err(mismatch(column, cell));
    };
    let s = s.trim();
    let split = s.rfind(['+', '-']).ok_or_else(|| mismatch(column, cell))?;
    let time = NaiveTime::parse_from_str(s[..split].trim(), "%H:%M:%S%.f").map_err(|_| mismatch(column, cell))?;
    let offset = match s[split..].parse::<ZoneId>() {
        Ok(ZoneId::Fixed(offset)) => offset,
        _ => return Err(mismatch(column, cell)),
    };
    Ok(PortableValue::TimeTz(time, offset))
}

pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParsedTimestamp {
    Zoned(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

fn parse_timestamp_text(text: &str) -> Option<ParsedTimestamp> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(ParsedTimestamp::Zoned(dt));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f %:z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(ParsedTimestamp::Zoned(dt));
        }
    }
    if let Some(naive) = parse_timestamp(text) {
        return Some(ParsedTimestamp::Naive(naive));
    }
    // "2024-01-01 10:00:00.000 Europe/Paris"
    let (wall, zone) = text.rsplit_once(' ')?;
    let zone: ZoneId = zone.parse().ok()?;
    let naive = parse_timestamp(wall.trim())?;
    zone.localize(naive).ok().map(ParsedTimestamp::Zoned)
}

fn epoch_millis(column: &ColumnDescriptor, millis: i64) -> Result<DateTime<FixedOffset>, ConversionError> {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| ConversionError::new(&column.name, &column.type_name, "epoch value out of range"))
}

fn localize(column: &ColumnDescriptor, zone: &ZoneId, naive: NaiveDateTime) -> Converted {
    zone.localize(naive)
        .map(PortableValue::TimestampTz)
        .map_err(|reason| ConversionError::new(&column.name, &column.type_name, reason))
}

/// Timestamp without zone: the wall-clock value is interpreted in the
/// configured zone.
pub fn timestamp_local(column: &ColumnDescriptor, cell: &NativeCell, ctx: &ConversionContext) -> Converted {
    match cell {
        NativeCell::Timestamp(naive) => localize(column, &ctx.zone, *naive),
        NativeCell::Date(d) => localize(column, &ctx.zone, d.and_time(NaiveTime::MIN)),
        NativeCell::TimestampTz(dt) => Ok(PortableValue::TimestampTz(ctx.zone.project(dt))),
        NativeCell::Int(millis) => Ok(PortableValue::TimestampTz(ctx.zone.project(&epoch_millis(column, *millis)?))),
        NativeCell::Text(s) => match parse_timestamp_text(s) {
            Some(ParsedTimestamp::Naive(naive)) => localize(column, &ctx.zone, naive),
            Some(ParsedTimestamp::Zoned(dt)) => Ok(PortableValue::TimestampTz(ctx.zone.project(&dt))),
            None => Err(mismatch(column, cell)),
        },
        _ => Err(mismatch(column, cell)),
    }
}

/// Timestamp with zone: the instant is re-expressed in the configured zone.
/// Zone-less values of such columns are UTC instants.
pub fn timestamp_zoned(column: &ColumnDescriptor, cell: &NativeCell, ctx: &ConversionContext) -> Converted {
    match cell {
        NativeCell::TimestampTz(dt) => Ok(PortableValue::TimestampTz(ctx.zone.project(dt))),
        NativeCell::Timestamp(naive) => Ok(PortableValue::TimestampTz(ctx.zone.project(&naive.and_utc()))),
        NativeCell::Int(millis) => Ok(PortableValue::TimestampTz(ctx.zone.project(&epoch_millis(column, *millis)?))),
        NativeCell::Text(s) => match parse_timestamp_text(s) {
            Some(ParsedTimestamp::Naive(naive)) => Ok(PortableValue::TimestampTz(ctx.zone.project(&naive.and_utc()))),
            Some(ParsedTimestamp::Zoned(dt)) => Ok(PortableValue::TimestampTz(ctx.zone.project(&dt))),
            None => Err(mismatch(column, cell)),
        },
        _ => Err(mismatch(column, cell)),
    }
}

/// Timestamp stored in an explicit column zone (ClickHouse `DateTime('Asia/Tokyo')`)
pub fn timestamp_in_zone(
    column: &ColumnDescriptor,
    cell: &NativeCell,
    column_zone: &ZoneId,
    ctx: &ConversionContext,
) -> Converted {
    let local = ConversionContext { zone: *column_zone };
    match timestamp_local(column, cell, &local)? {
        PortableValue::TimestampTz(dt) => Ok(PortableValue::TimestampTz(ctx.zone.project(&dt))),
        other => Ok(other),
    }
}

pub fn json(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    match cell {
        NativeCell::Json(v) => Ok(PortableValue::from_json(v)),
        NativeCell::Text(s) => serde_json::from_str(s)
            .map(|v| PortableValue::from_json(&v))
            .map_err(|e| ConversionError::new(&column.name, &column.type_name, format!("invalid JSON: {}", e))),
        NativeCell::Bytes(b) | NativeCell::Raw(b) => serde_json::from_slice(b)
            .map(|v| PortableValue::from_json(&v))
            .map_err(|e| ConversionError::new(&column.name, &column.type_name, format!("invalid JSON: {}", e))),
        _ => Err(mismatch(column, cell)),
    }
}

/// Sequence whose elements are converted with the element type
pub fn array<F>(column: &ColumnDescriptor, cell: &NativeCell, element_type: &str, convert: F) -> Converted
where
    F: Fn(&ColumnDescriptor, &NativeCell) -> Converted,
{
    let element = column.element_of(element_type);
    let items: Vec<NativeCell> = match cell {
        NativeCell::Array(items) => items.clone(),
        NativeCell::Json(serde_json::Value::Array(items)) => items.iter().cloned().map(NativeCell::from_json).collect(),
        NativeCell::Text(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(serde_json::Value::Array(items)) => items.into_iter().map(NativeCell::from_json).collect(),
            _ => return Err(mismatch(column, cell)),
        },
        _ => return Err(mismatch(column, cell)),
    };
    items
        .iter()
        .map(|item| match item {
            NativeCell::Null => Ok(PortableValue::Null),
            item => convert(&element, item),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(PortableValue::Array)
}

/// ISO-8601 duration text
pub fn interval(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    match cell {
        NativeCell::Interval { months, days, micros } => Ok(PortableValue::String(iso_duration(*months, *days, *micros))),
        NativeCell::Text(s) => parse_interval_text(s)
            .map(PortableValue::String)
            .ok_or_else(|| mismatch(column, cell)),
        _ => Err(mismatch(column, cell)),
    }
}

pub fn iso_duration(months: i32, days: i32, micros: i64) -> String {
    let mut out = String::from("P");
    let (years, months) = (months / 12, months % 12);
    if years != 0 {
        out.push_str(&format!("{}Y", years));
    }
    if months != 0 {
        out.push_str(&format!("{}M", months));
    }
    if days != 0 {
        out.push_str(&format!("{}D", days));
    }
    if micros != 0 {
        out.push('T');
        let hours = micros / 3_600_000_000;
        let minutes = (micros % 3_600_000_000) / 60_000_000;
        let seconds = micros % 60_000_000;
        if hours != 0 {
            out.push_str(&format!("{}H", hours));
        }
        if minutes != 0 {
            out.push_str(&format!("{}M", minutes));
        }
        if seconds != 0 {
            let sign = if seconds < 0 { "-" } else { "" };
            let whole = seconds.abs() / 1_000_000;
            let fraction = seconds.abs() % 1_000_000;
            if fraction == 0 {
                out.push_str(&format!("{}{}S", sign, whole));
            } else {
                let fraction = format!("{:06}", fraction);
                out.push_str(&format!("{}{}.{}S", sign, whole, fraction.trim_end_matches('0')));
            }
        }
    }
    if out == "P" {
        out.push_str("T0S");
    }
    out
}

/// Parses textual intervals into ISO-8601: ISO text passes through,
/// `[+-]D HH:MM:SS[.f]`, `[+-]HH:MM:SS[.f]` and year-month `[+-]Y-M`.
pub fn parse_interval_text(text: &str) -> Option<String> {
    let text = text.trim();
    if text.starts_with('P') || text.starts_with("-P") {
        return Some(text.to_string());
    }
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let sign = if negative { -1 } else { 1 };

    if !body.contains(':') {
        let (years, months) = body.split_once('-')?;
        let months = years.trim().parse::<i32>().ok()? * 12 + months.trim().parse::<i32>().ok()?;
        return Some(iso_duration(sign * months, 0, 0));
    }

    let (days, clock) = match body.split_once(' ') {
        Some((days, clock)) => (days.trim().parse::<i32>().ok()?, clock.trim()),
        None => (0, body),
    };
    let (clock, fraction) = clock.split_once('.').unwrap_or((clock, ""));
    let mut parts = clock.split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next()?.parse().ok()?;
    let fraction: i64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<6}", &fraction[..fraction.len().min(6)]).parse().ok()?
    };
    let micros = ((hours * 60 + minutes) * 60 + seconds) * 1_000_000 + fraction;
    Some(iso_duration(0, sign * days, sign as i64 * micros))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(type_name: &str) -> ColumnDescriptor {
        ColumnDescriptor::new("c", 0, type_name)
    }

    fn utc() -> ConversionContext {
        ConversionContext { zone: ZoneId::utc() }
    }

    #[test]
    fn test_type_name_parse() {
        assert_eq!(
            TypeName::parse("TIMESTAMP(6) WITH TIME ZONE"),
            TypeName { base: "timestamp with time zone".into(), args: Some("6".into()) }
        );
        assert_eq!(TypeName::parse("Nullable(DateTime64(3, 'Europe/Paris'))").base, "datetime64");
        assert_eq!(
            TypeName::parse("LowCardinality(Nullable(String))"),
            TypeName { base: "string".into(), args: None }
        );
        assert_eq!(TypeName::parse("INTEGER[]").args.as_deref(), Some("INTEGER"));
        assert_eq!(TypeName::parse("interval day(2) to second(6)").base, "interval day to second");
        assert_eq!(
            TypeName::parse("Map(String, Array(Int32))").arg_list(),
            vec!["String".to_string(), "Array(Int32)".to_string()]
        );
    }

    #[test]
    fn test_baseline() {
        assert_eq!(baseline(&column(""), &NativeCell::UInt(u64::MAX)).unwrap(), PortableValue::Decimal("18446744073709551615".into()));
        assert_eq!(baseline(&column(""), &NativeCell::Text("x".into())).unwrap(), PortableValue::from("x"));
        let err = baseline(&column("point"), &NativeCell::Raw(vec![1])).unwrap_err();
        assert_eq!(err.reason, "type point is not supported");
    }

    #[test]
    fn test_integer_ranges() {
        assert_eq!(integer(&column("int2"), &NativeCell::Int(7), IntWidth::W16).unwrap(), PortableValue::Int16(7));
        assert!(integer(&column("tinyint"), &NativeCell::Int(300), IntWidth::W8).is_err());
        assert_eq!(
            integer(&column("bigint unsigned"), &NativeCell::UInt(u64::MAX), IntWidth::W64).unwrap(),
            PortableValue::Decimal(u64::MAX.to_string())
        );
        assert_eq!(
            integer(&column("uint128"), &NativeCell::Text("340282366920938463463374607431768211455".into()), IntWidth::W64).unwrap(),
            PortableValue::Decimal("340282366920938463463374607431768211455".into())
        );
    }

    #[test]
    fn test_decimal_keeps_text() {
        assert_eq!(
            decimal(&column("numeric"), &NativeCell::Decimal("0.10".into())).unwrap(),
            PortableValue::Decimal("0.10".into())
        );
        assert_eq!(decimal(&column("number"), &NativeCell::Double(0.1)).unwrap(), PortableValue::Decimal("0.1".into()));
    }

    #[test]
    fn test_timestamp_paths_differ() {
        let paris = ConversionContext { zone: "Europe/Paris".parse().unwrap() };
        let wall = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(10, 0, 0).unwrap();

        let local = timestamp_local(&column("timestamp"), &NativeCell::Timestamp(wall), &paris).unwrap();
        assert_eq!(local.to_json(), serde_json::json!("2024-01-15T10:00:00+01:00"));

        let zoned = timestamp_zoned(&column("timestamptz"), &NativeCell::Timestamp(wall), &paris).unwrap();
        assert_eq!(zoned.to_json(), serde_json::json!("2024-01-15T11:00:00+01:00"));
    }

    #[test]
    fn test_timestamp_text_forms() {
        let ctx = utc();
        let value = timestamp_zoned(&column("TIMESTAMP"), &NativeCell::Text("2024-01-01T00:00:00.000Z".into()), &ctx).unwrap();
        assert_eq!(value.to_json(), serde_json::json!("2024-01-01T00:00:00Z"));
        let value = timestamp_zoned(
            &column("timestamp with time zone"),
            &NativeCell::Text("2024-01-01 01:00:00.000 Europe/Paris".into()),
            &ctx,
        )
        .unwrap();
        assert_eq!(value.to_json(), serde_json::json!("2024-01-01T00:00:00Z"));
        assert!(timestamp_local(&column("timestamp"), &NativeCell::Text("yesterday".into()), &ctx).is_err());
    }

    #[test]
    fn test_iso_durations() {
        assert_eq!(iso_duration(0, 0, 0), "PT0S");
        assert_eq!(iso_duration(14, 3, 3_723_500_000), "P1Y2M3DT1H2M3.5S");
        assert_eq!(iso_duration(0, 0, -3_600_000_000), "PT-1H");
        assert_eq!(parse_interval_text("+01 02:03:04.000000").as_deref(), Some("P1DT2H3M4S"));
        assert_eq!(parse_interval_text("-00:00:01.5").as_deref(), Some("PT-1.5S"));
        assert_eq!(parse_interval_text("1-2").as_deref(), Some("P1Y2M"));
        assert_eq!(parse_interval_text("P3D").as_deref(), Some("P3D"));
        assert!(parse_interval_text("soon").is_none());
    }

    #[test]
    fn test_array_converts_elements() {
        let cell = NativeCell::Array(vec![NativeCell::Int(1), NativeCell::Null, NativeCell::Int(3)]);
        let value = array(&column("_int4"), &cell, "int4", |c, v| integer(c, v, IntWidth::W32)).unwrap();
        assert_eq!(
            value,
            PortableValue::Array(vec![PortableValue::Int32(1), PortableValue::Null, PortableValue::Int32(3)])
        );
        let from_text = array(&column("Array(Int8)"), &NativeCell::Text("[1,2]".into()), "Int8", |c, v| {
            integer(c, v, IntWidth::W8)
        })
        .unwrap();
        assert_eq!(from_text, PortableValue::Array(vec![PortableValue::Int8(1), PortableValue::Int8(2)]));
    }

    #[test]
    fn test_time_tz() {
        let value = time_tz(&column("time with time zone"), &NativeCell::Text("10:15:00+02:00".into())).unwrap();
        assert_eq!(value.to_json(), serde_json::json!("10:15:00+02:00"));
    }
}
