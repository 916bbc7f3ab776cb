use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static ADDRESS_IN_PARENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d{1,3}(?:\.\d{1,3}){3})\)").unwrap());

static DOTTED_QUAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}(?:\.\d{1,3}){3}$").unwrap());

static HOP_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(\d+)\s+(.*)$").unwrap());

// Leading whitespace keeps names such as "10ms.example.net" from reading as a latency
static LATENCY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s(\d+(?:\.\d+)?)\s*ms(?:\s|$)").unwrap());

/// One record of a parsed probe run, in the order it appeared in the output.
#[derive(Debug, Clone, PartialEq)]
pub enum HopRecord {
    /// Name the run was issued for, and the address the utility resolved it to.
    TargetInfo { fqdn: String, resolved_ip: String },
    Hop(Hop),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Hop {
    /// No reply for this TTL.
    Phantom,
    Responsive(RespondingHop),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RespondingHop {
    pub host: String,
    /// Dotted-quad when the utility printed one, otherwise the raw host field.
    pub ip: String,
    pub latency: Option<f64>,
}

impl HopRecord {
    pub fn is_phantom(&self) -> bool {
        matches!(self, HopRecord::Hop(Hop::Phantom))
    }

    pub fn responding(&self) -> Option<&RespondingHop> {
        match self {
            HopRecord::Hop(Hop::Responsive(hop)) => Some(hop),
            _ => None,
        }
    }
}

/// Returns true when `value` is written as four dot-separated decimal groups.
pub fn is_dotted_quad(value: &str) -> bool {
    DOTTED_QUAD.is_match(value)
}

/// Parse the text output of one traceroute run.
///
/// The header line may yield a [`HopRecord::TargetInfo`]; every following line
/// that starts with a hop number yields one [`HopRecord::Hop`]. Anything else is
/// skipped, so malformed or empty output simply produces fewer records.
pub fn parse_output(output: &str, target: &str) -> Vec<HopRecord> {
    let mut lines = output.lines();
    let mut records = Vec::new();

    let Some(header) = lines.next() else {
        return records;
    };

    if let Some(caps) = ADDRESS_IN_PARENS.captures(header) {
        records.push(HopRecord::TargetInfo {
            fqdn: target.to_string(),
            resolved_ip: caps[1].to_string(),
        });
    }

    for line in lines {
        match parse_hop_line(line) {
            Some(hop) => records.push(HopRecord::Hop(hop)),
            None => debug!("Skipping unparsable probe line: {:?}", line),
        }
    }

    records
}

/// Parse a single numbered hop line. Returns `None` for lines that are not hops.
pub fn parse_hop_line(line: &str) -> Option<Hop> {
    let caps = HOP_LINE.captures(line)?;
    let rest = caps.get(2)?.as_str();

    let latency_match = LATENCY.captures(rest);
    let host_field = match latency_match.as_ref().and_then(|c| c.get(0)) {
        Some(m) => rest[..m.start()].trim(),
        None => rest.trim(),
    };

    if host_field.is_empty() {
        return None;
    }

    if host_field.contains('*') {
        return Some(Hop::Phantom);
    }

    let latency = latency_match
        .as_ref()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());

    let (host, ip) = if let Some(caps) = ADDRESS_IN_PARENS.captures(host_field) {
        let name = host_field.split('(').next().unwrap_or_default().trim();
        (name.to_string(), caps[1].to_string())
    } else {
        // Either a bare address or an unresolved name; both double as the id
        (host_field.to_string(), host_field.to_string())
    };

    Some(Hop::Responsive(RespondingHop { host, ip, latency }))
}
