//! Tag time-series codec
//!
//! Encodes the ordered readings of one tag into a single delimited string:
//!
//! ```text
//! stream  := reading (value-sep reading)*
//! reading := timestamp time-sep value [field-sep secondary field-sep status]
//! ```
//!
//! A tag uses the triple form when any reading carries a secondary value or a
//! non-zero status (string tags always do); otherwise the short form. Both
//! forms are accepted on decode, per reading. Any separator character or
//! backslash inside a field is escaped with a backslash.
//!
//! Primary values read back by shape rather than by tag kind: integral text is
//! an integer, other finite numbers are decimals (always written with a
//! decimal point), anything else is a state label. A label that would read as
//! a number is written with its first character escaped, which no separator
//! escape can produce since separators never contain number characters.

use super::{CodecError, CodecResult, Separators, ESCAPE};
use crate::model::{Reading, TagValue, ValueKind};

/// Render a primary value the way it appears in the stream
pub fn format_value(value: &TagValue) -> String {
    match value {
        TagValue::Empty => String::new(),
        TagValue::Decimal(v) if !v.is_finite() => String::new(),
        TagValue::Decimal(v) => format!("{:.8}", v),
        TagValue::Integer(i) => i.to_string(),
        TagValue::State(label) => label.clone(),
    }
}

/// Encode readings in order; an empty slice encodes to the empty string
pub fn encode_readings(readings: &[Reading], kind: ValueKind, seps: &Separators) -> String {
    let triple = kind == ValueKind::String || readings.iter().any(|r| !r.is_trivial());
    let mut out = String::new();

    for (i, reading) in readings.iter().enumerate() {
        if i > 0 {
            out.push_str(seps.value());
        }
        push_escaped(&mut out, &reading.timestamp, seps);
        out.push_str(seps.time());
        push_value(&mut out, &reading.value, kind, seps);

        if triple {
            out.push_str(seps.field());
            push_escaped(&mut out, &reading.secondary, seps);
            out.push_str(seps.field());
            out.push_str(&reading.status.to_string());
        }
    }

    out
}

/// Lazily decode an encoded stream
pub fn decode_readings<'a>(
    encoded: &'a str,
    kind: ValueKind,
    seps: &'a Separators,
) -> Readings<'a> {
    Readings {
        parts: split_unescaped(encoded, seps.value()),
        kind,
        seps,
    }
}

/// Decode one raw (still escaped) reading
pub fn decode_reading(raw: &str, kind: ValueKind, seps: &Separators) -> CodecResult<Reading> {
    let mut top = split_unescaped(raw, seps.time());
    let (timestamp, group) = match (top.next(), top.next(), top.next()) {
        (Some(ts), Some(group), None) => (ts, group),
        (_, _, Some(_)) => return Err(CodecError::malformed(raw, "unescaped time separator")),
        _ => return Err(CodecError::malformed(raw, "missing time separator")),
    };
    let timestamp = unescape(timestamp);

    let fields: Vec<&str> = split_unescaped(group, seps.field()).collect();
    match fields.as_slice() {
        [value] => {
            if kind == ValueKind::String {
                Ok(Reading::text(timestamp, unescape(value)))
            } else {
                Ok(Reading::new(timestamp, decode_value(value, kind, seps)))
            }
        }
        [value, secondary, status] => {
            let status = status.trim().parse::<i32>().map_err(|_| {
                CodecError::malformed(raw, format!("status '{}' is not an integer", status))
            })?;
            Ok(Reading {
                timestamp,
                value: decode_value(value, kind, seps),
                secondary: unescape(secondary),
                status,
            })
        }
        other => Err(CodecError::malformed(
            raw,
            format!("expected 1 or 3 fields, found {}", other.len()),
        )),
    }
}

/// Iterator over the decoded readings of one stream
pub struct Readings<'a> {
    parts: SplitUnescaped<'a>,
    kind: ValueKind,
    seps: &'a Separators,
}

impl<'a> Iterator for Readings<'a> {
    type Item = CodecResult<Reading>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.parts.next()?;
        Some(decode_reading(raw, self.kind, self.seps))
    }
}

/// True when `text` would read back as a number
fn is_numeric(text: &str) -> bool {
    text.parse::<i64>().is_ok() || text.parse::<f64>().map_or(false, f64::is_finite)
}

fn push_value(out: &mut String, value: &TagValue, kind: ValueKind, seps: &Separators) {
    match value {
        TagValue::State(label) if kind != ValueKind::String && is_numeric(label) => {
            // Mark the label; its first character is never reserved
            out.push(ESCAPE);
            push_escaped(out, label, seps);
        }
        _ => push_escaped(out, &format_value(value), seps),
    }
}

/// Decode a raw (still escaped) primary value
fn decode_value(raw: &str, kind: ValueKind, seps: &Separators) -> TagValue {
    let mut chars = raw.chars();
    let marked =
        chars.next() == Some(ESCAPE) && chars.next().map_or(false, |c| !seps.is_reserved(c));

    let text = unescape(raw);
    if marked || kind == ValueKind::String {
        return TagValue::state(text);
    }
    if let Ok(i) = text.parse::<i64>() {
        return TagValue::Integer(i);
    }
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => TagValue::Decimal(v),
        _ => TagValue::state(text),
    }
}

fn push_escaped(out: &mut String, field: &str, seps: &Separators) {
    for c in field.chars() {
        if seps.is_reserved(c) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            // A trailing lone escape is kept as-is
            out.push(chars.next().unwrap_or(ESCAPE));
        } else {
            out.push(c);
        }
    }
    out
}

fn find_unescaped(s: &str, sep: &str) -> Option<usize> {
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == ESCAPE {
            chars.next();
            continue;
        }
        if s[i..].starts_with(sep) {
            return Some(i);
        }
    }
    None
}

fn split_unescaped<'a>(s: &'a str, sep: &'a str) -> SplitUnescaped<'a> {
    SplitUnescaped {
        rest: if s.is_empty() { None } else { Some(s) },
        sep,
    }
}

/// Splits on separator occurrences that are not escaped; yields raw slices
struct SplitUnescaped<'a> {
    rest: Option<&'a str>,
    sep: &'a str,
}

impl<'a> Iterator for SplitUnescaped<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let s = self.rest?;
        match find_unescaped(s, self.sep) {
            Some(i) => {
                self.rest = Some(&s[i + self.sep.len()..]);
                Some(&s[..i])
            }
            None => {
                self.rest = None;
                Some(s)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(encoded: &str, kind: ValueKind, seps: &Separators) -> Vec<Reading> {
        decode_readings(encoded, kind, seps)
            .collect::<CodecResult<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_decimal_formatting() {
        assert_eq!(format_value(&TagValue::Decimal(14.3021288)), "14.30212880");
        assert_eq!(format_value(&TagValue::Decimal(f64::NAN)), "");
        assert_eq!(format_value(&TagValue::Integer(-4)), "-4");
        assert_eq!(format_value(&TagValue::state("OPEN")), "OPEN");
        assert_eq!(format_value(&TagValue::Empty), "");
    }

    #[test]
    fn test_mixed_readings_use_triple_form() {
        let seps = Separators::default();
        let readings = vec![
            Reading::new("t1", TagValue::Decimal(14.3021288)),
            Reading::new("t2", TagValue::Empty).secondary("leaktest"),
        ];

        let encoded = encode_readings(&readings, ValueKind::Decimal, &seps);
        assert_eq!(encoded, "t1:14.30212880||0,t2:|leaktest|0");

        assert_eq!(decode_all(&encoded, ValueKind::Decimal, &seps), readings);
    }

    #[test]
    fn test_trivial_readings_use_short_form() {
        let seps = Separators::default();
        let readings = vec![
            Reading::new("t1", TagValue::Decimal(1.0)),
            Reading::new("t2", TagValue::Decimal(2.5)),
        ];

        let encoded = encode_readings(&readings, ValueKind::Decimal, &seps);
        assert_eq!(encoded, "t1:1.00000000,t2:2.50000000");
        assert_eq!(decode_all(&encoded, ValueKind::Decimal, &seps), readings);
    }

    #[test]
    fn test_status_forces_triple_form() {
        let seps = Separators::default();
        let readings = vec![
            Reading::new("t1", TagValue::Integer(3)),
            Reading::new("t2", TagValue::state("CLOSED")).status(-11059),
        ];

        let encoded = encode_readings(&readings, ValueKind::Integer, &seps);
        assert_eq!(encoded, "t1:3||0,t2:CLOSED||-11059");
        assert_eq!(decode_all(&encoded, ValueKind::Integer, &seps), readings);
    }

    #[test]
    fn test_string_tags_round_trip() {
        let seps = Separators::default();
        let readings = vec![
            Reading::text("t1", "leaktest"),
            Reading::text("t2", "rinse, then drain"),
        ];

        let encoded = encode_readings(&readings, ValueKind::String, &seps);
        assert_eq!(encoded, "t1:|leaktest|0,t2:|rinse\\, then drain|0");
        assert_eq!(decode_all(&encoded, ValueKind::String, &seps), readings);
    }

    #[test]
    fn test_short_form_string_moves_to_secondary() {
        let seps = Separators::default();
        let decoded = decode_all("t1:leaktest", ValueKind::String, &seps);
        assert_eq!(decoded, vec![Reading::text("t1", "leaktest")]);
    }

    #[test]
    fn test_separator_characters_are_escaped() {
        let seps = Separators::default();
        let readings = vec![Reading::new("2017-02-13T11:47:16", TagValue::state("A|B,C\\D"))];

        let encoded = encode_readings(&readings, ValueKind::Integer, &seps);
        assert_eq!(encoded, "2017-02-13T11\\:47\\:16:A\\|B\\,C\\\\D");
        assert_eq!(decode_all(&encoded, ValueKind::Integer, &seps), readings);
    }

    #[test]
    fn test_multi_char_separators_round_trip() {
        let seps = Separators::new("=>", "||", ";;").unwrap();
        let readings = vec![
            Reading::new("a=b", TagValue::Decimal(0.5)).secondary("x||y"),
            Reading::new("c", TagValue::Empty).status(1),
        ];

        let encoded = encode_readings(&readings, ValueKind::Decimal, &seps);
        assert_eq!(decode_all(&encoded, ValueKind::Decimal, &seps), readings);
    }

    #[test]
    fn test_nan_decodes_to_empty() {
        let seps = Separators::default();
        let readings = vec![Reading::new("t1", TagValue::decimal(f64::NAN))];
        let encoded = encode_readings(&readings, ValueKind::Decimal, &seps);
        assert_eq!(encoded, "t1:");
        assert_eq!(
            decode_all(&encoded, ValueKind::Decimal, &seps),
            vec![Reading::new("t1", TagValue::Empty)]
        );
    }

    #[test]
    fn test_decimal_tag_with_state_label() {
        let seps = Separators::default();
        let decoded = decode_all("t1:No Data", ValueKind::Decimal, &seps);
        assert_eq!(decoded[0].value, TagValue::state("No Data"));
    }

    #[test]
    fn test_decimal_round_trip_within_tolerance() {
        let seps = Separators::default();
        let readings = vec![Reading::new("t1", TagValue::Decimal(1.0 / 3.0))];
        let encoded = encode_readings(&readings, ValueKind::Decimal, &seps);
        let decoded = decode_all(&encoded, ValueKind::Decimal, &seps);

        match decoded[0].value {
            TagValue::Decimal(v) => assert!((v - 1.0 / 3.0).abs() < 1e-8),
            ref other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_malformed_reading_is_skipped() {
        let seps = Separators::default();
        let results: Vec<_> =
            decode_readings("t1:1.0,garbage,t3:3.0", ValueKind::Decimal, &seps).collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(CodecError::MalformedReading { ref reading, .. }) if reading == "garbage"
        ));
        assert_eq!(
            results[2].as_ref().unwrap(),
            &Reading::new("t3", TagValue::Decimal(3.0))
        );
    }

    #[test]
    fn test_numeric_labels_round_trip() {
        let seps = Separators::default();
        for kind in [ValueKind::Decimal, ValueKind::Integer] {
            let readings = vec![
                Reading::new("t1", TagValue::state("3")),
                Reading::new("t2", TagValue::state("-2.5")),
                Reading::new("t3", TagValue::state("inf")),
                Reading::new("t4", TagValue::state("NaN")),
                Reading::new("t5", TagValue::Integer(3)),
            ];

            let encoded = encode_readings(&readings, kind, &seps);
            assert_eq!(encoded, "t1:\\3,t2:\\-2.5,t3:inf,t4:NaN,t5:3");
            assert_eq!(decode_all(&encoded, kind, &seps), readings);
        }
    }

    #[test]
    fn test_numbers_keep_their_type_across_kinds() {
        let seps = Separators::default();
        let readings = vec![
            Reading::new("t1", TagValue::Integer(7)),
            Reading::new("t2", TagValue::Decimal(7.0)),
            Reading::new("t3", TagValue::Decimal(-0.5)),
        ];

        for kind in [ValueKind::Decimal, ValueKind::Integer] {
            let encoded = encode_readings(&readings, kind, &seps);
            assert_eq!(encoded, "t1:7,t2:7.00000000,t3:-0.50000000");
            assert_eq!(decode_all(&encoded, kind, &seps), readings);
        }
    }

    #[test]
    fn test_non_finite_decimals_are_empty() {
        assert_eq!(TagValue::decimal(f64::INFINITY), TagValue::Empty);
        assert_eq!(format_value(&TagValue::Decimal(f64::NEG_INFINITY)), "");
    }

    #[test]
    fn test_escaped_separator_is_not_a_label_marker() {
        let seps = Separators::default();
        let readings = vec![Reading::new("t1", TagValue::state(":7"))];

        let encoded = encode_readings(&readings, ValueKind::Integer, &seps);
        assert_eq!(encoded, "t1:\\:7");
        assert_eq!(decode_all(&encoded, ValueKind::Integer, &seps), readings);
    }

    #[test]
    fn test_extra_time_separator_is_malformed() {
        let seps = Separators::default();
        let err = decode_reading("t1:1.0:2.0", ValueKind::Decimal, &seps).unwrap_err();
        assert!(matches!(err, CodecError::MalformedReading { .. }));

        let escaped = decode_reading("10\\:30:1.0", ValueKind::Decimal, &seps).unwrap();
        assert_eq!(escaped.timestamp, "10:30");
    }

    #[test]
    fn test_wrong_field_count_is_malformed() {
        let seps = Separators::default();
        assert!(decode_reading("t1:1|2", ValueKind::Decimal, &seps).is_err());
        assert!(decode_reading("t1:1|x|y", ValueKind::Decimal, &seps).is_err());
    }

    #[test]
    fn test_empty_stream() {
        let seps = Separators::default();
        assert_eq!(encode_readings(&[], ValueKind::Decimal, &seps), "");
        assert_eq!(decode_readings("", ValueKind::Decimal, &seps).count(), 0);
    }

    #[test]
    fn test_readings_keep_received_order() {
        let seps = Separators::default();
        let readings = vec![
            Reading::new("t3", TagValue::Integer(3)),
            Reading::new("t1", TagValue::Integer(1)),
            Reading::new("t2", TagValue::Integer(2)),
        ];
        let encoded = encode_readings(&readings, ValueKind::Integer, &seps);
        assert_eq!(decode_all(&encoded, ValueKind::Integer, &seps), readings);
    }
}
