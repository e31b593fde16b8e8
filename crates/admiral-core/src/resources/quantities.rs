use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Name of the CPU resource; tracked in millicores
pub const RESOURCE_CPU: &str = "cpu";

/// Scalar requests keyed by resource name
///
/// CPU is expressed in millicores, every other resource in base units.
pub type Requests = BTreeMap<String, i64>;

const BINARY_SUFFIXES: [(&str, i64); 5] = [
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
];

const DECIMAL_SUFFIXES: [(&str, i64); 5] = [
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
];

/// Parse CPU string (e.g., "2", "1000m", "0.5") into millicores
pub fn parse_cpu(s: &str) -> Result<i64, String> {
    if let Some(m) = s.strip_suffix('m') {
        // Millicores
        m.parse::<i64>()
            .map_err(|e| format!("Invalid CPU millicore value: {}", e))
    } else if let Ok(cores) = s.parse::<f64>() {
        // Cores as float
        Ok((cores * 1000.0).round() as i64)
    } else {
        Err(format!("Invalid CPU format: {}", s))
    }
}

/// Parse a plain quantity (e.g., "128Mi", "1G", "4", "1500m") into base units
///
/// Fractional results are rounded up, matching how requests are counted
/// against quota.
pub fn parse_value(s: &str) -> Result<i64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty quantity".to_string());
    }

    for (suffix, factor) in BINARY_SUFFIXES.iter().chain(DECIMAL_SUFFIXES.iter()) {
        if let Some(num) = s.strip_suffix(suffix) {
            return scale(num, *factor as f64);
        }
    }

    if let Some(num) = s.strip_suffix('m') {
        return scale(num, 0.001);
    }

    scale(s, 1.0)
}

fn scale(num: &str, factor: f64) -> Result<i64, String> {
    if let Ok(n) = num.parse::<i64>() {
        if n < 0 {
            return Err(format!("Negative quantity: {}", num));
        }
        if factor >= 1.0 {
            return n
                .checked_mul(factor as i64)
                .ok_or_else(|| format!("Quantity overflows: {}", num));
        }
    }
    let value = num
        .parse::<f64>()
        .map_err(|e| format!("Invalid quantity '{}': {}", num, e))?;
    if value < 0.0 {
        return Err(format!("Negative quantity: {}", num));
    }
    Ok((value * factor).ceil() as i64)
}

/// Parse a quantity for the named resource
pub fn parse_quantity(resource: &str, quantity: &Quantity) -> Result<i64, String> {
    let value = if resource == RESOURCE_CPU {
        parse_cpu(&quantity.0)?
    } else {
        parse_value(&quantity.0)?
    };
    if value < 0 {
        return Err(format!("Negative quantity for {}: {}", resource, quantity.0));
    }
    Ok(value)
}

/// Convert a k8s resource list into scalar requests
///
/// Entries that fail to parse are reported through the error.
pub fn requests_from_resource_list(list: &BTreeMap<String, Quantity>) -> Result<Requests, String> {
    list.iter()
        .map(|(name, q)| Ok((name.clone(), parse_quantity(name, q)?)))
        .collect()
}

/// Add every entry of `other` into `into`, saturating at `i64::MAX`
pub fn add_requests(into: &mut Requests, other: &Requests) {
    for (name, value) in other {
        let entry = into.entry(name.clone()).or_insert(0);
        *entry = entry.saturating_add(*value);
    }
}

/// Raise every entry of `into` to at least the matching entry of `other`
pub fn max_requests(into: &mut Requests, other: &Requests) {
    for (name, value) in other {
        let entry = into.entry(name.clone()).or_insert(0);
        if *value > *entry {
            *entry = *value;
        }
    }
}

/// Multiply every entry by `count`
pub fn scale_requests(requests: &mut Requests, count: i64) {
    for value in requests.values_mut() {
        *value = value.saturating_mul(count);
    }
}

/// Render a scalar back into a human readable quantity for the named resource
pub fn format_quantity(resource: &str, value: i64) -> String {
    if resource == RESOURCE_CPU {
        if value % 1000 == 0 {
            return format!("{}", value / 1000);
        }
        return format!("{}m", value);
    }
    for (suffix, factor) in BINARY_SUFFIXES.iter().rev() {
        if value > 0 && value % factor == 0 {
            return format!("{}{}", value / factor, suffix);
        }
    }
    format!("{}", value)
}
