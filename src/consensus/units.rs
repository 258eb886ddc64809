//! Unit Parsing & Conversion
//! Numeric candidates arrive as "54 g", "1.8 m", "0.119 lb"; comparison
//! happens in the rule's canonical unit.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref QUANTITY: Regex =
        Regex::new(r"^\s*([-+]?\d[\d,]*\.?\d*)\s*([a-zA-Z\x22/%]+)?\s*$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuantity {
    pub value: f64,
    pub unit: Option<String>,
}

/// Parse "value unit" out of a raw candidate string
pub fn parse_quantity(raw: &str) -> Option<ParsedQuantity> {
    let caps = QUANTITY.captures(raw.trim())?;
    let number = caps[1].replace(',', "");
    let value: f64 = number.parse().ok()?;
    let unit = caps.get(2).map(|m| normalize_unit(m.as_str()));
    Some(ParsedQuantity { value, unit })
}

fn normalize_unit(unit: &str) -> String {
    let unit = unit.trim().to_lowercase();
    match unit.as_str() {
        "\"" | "inch" | "inches" => "in".to_string(),
        "grams" | "gram" | "gr" => "g".to_string(),
        "kilograms" | "kilogram" => "kg".to_string(),
        "ounce" | "ounces" => "oz".to_string(),
        "pound" | "pounds" | "lbs" => "lb".to_string(),
        "millimeters" | "millimetres" => "mm".to_string(),
        "centimeters" | "centimetres" => "cm".to_string(),
        "meters" | "metres" => "m".to_string(),
        "hours" | "hour" | "hr" | "hrs" => "h".to_string(),
        "seconds" | "sec" | "secs" => "s".to_string(),
        "milliseconds" | "msec" => "ms".to_string(),
        "cpi" => "dpi".to_string(),
        other => other.to_string(),
    }
}

/// Factor to the family base unit, if the unit is known
fn family_factor(unit: &str) -> Option<(&'static str, f64)> {
    let f = match unit {
        // mass, base g
        "g" => ("mass", 1.0),
        "kg" => ("mass", 1000.0),
        "oz" => ("mass", 28.349_523_125),
        "lb" => ("mass", 453.592_37),
        // length, base mm
        "mm" => ("length", 1.0),
        "cm" => ("length", 10.0),
        "m" => ("length", 1000.0),
        "in" => ("length", 25.4),
        // time, base ms
        "ms" => ("time", 1.0),
        "s" => ("time", 1000.0),
        "min" => ("time", 60_000.0),
        "h" => ("time", 3_600_000.0),
        // frequency, base hz
        "hz" => ("freq", 1.0),
        "khz" => ("freq", 1000.0),
        "mhz" => ("freq", 1_000_000.0),
        // counts that only compare to themselves
        "dpi" => ("dpi", 1.0),
        "ips" => ("ips", 1.0),
        "mah" => ("charge", 1.0),
        "%" => ("percent", 1.0),
        _ => return None,
    };
    Some(f)
}

/// Convert between units of the same family
pub fn convert(value: f64, from: &str, to: &str) -> Option<f64> {
    let from = normalize_unit(from);
    let to = normalize_unit(to);
    if from == to {
        return Some(value);
    }
    let (from_family, from_factor) = family_factor(&from)?;
    let (to_family, to_factor) = family_factor(&to)?;
    if from_family != to_family {
        return None;
    }
    Some(value * from_factor / to_factor)
}

/// Parse and convert a raw string into the canonical unit.
/// A bare number is assumed to already carry the canonical unit.
pub fn to_canonical(raw: &str, canonical_unit: Option<&str>) -> Option<f64> {
    let parsed = parse_quantity(raw)?;
    match (parsed.unit.as_deref(), canonical_unit) {
        (Some(from), Some(to)) => convert(parsed.value, from, to),
        _ => Some(parsed.value),
    }
}
