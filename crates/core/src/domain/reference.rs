use serde::{Deserialize, Serialize};

/// Human-facing reference families, each backed by its own per-year sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferencePrefix {
    Enquiry,
    Quote,
    Booking,
}

impl ReferencePrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enquiry => "ENQ",
            Self::Quote => "QUO",
            Self::Booking => "BKG",
        }
    }

    pub fn sequence_name(&self, year: i32) -> String {
        format!("{}-{year}", self.as_str())
    }

    /// `ENQ-2026-00042`. Values above 99999 widen rather than wrap.
    pub fn format(&self, year: i32, value: u64) -> String {
        format!("{}-{year}-{value:05}", self.as_str())
    }
}

pub fn parse_reference(reference: &str) -> Option<(ReferencePrefix, i32, u64)> {
    let mut parts = reference.trim().splitn(3, '-');
    let prefix = match parts.next()? {
        "ENQ" => ReferencePrefix::Enquiry,
        "QUO" => ReferencePrefix::Quote,
        "BKG" => ReferencePrefix::Booking,
        _ => return None,
    };
    let year = parts.next()?.parse().ok()?;
    let value = parts.next()?.parse().ok()?;
    Some((prefix, year, value))
}

#[cfg(test)]
mod tests {
    use super::{parse_reference, ReferencePrefix};

    #[test]
    fn references_are_zero_padded() {
        assert_eq!(ReferencePrefix::Enquiry.format(2026, 42), "ENQ-2026-00042");
        assert_eq!(ReferencePrefix::Booking.format(2026, 123_456), "BKG-2026-123456");
        assert_eq!(ReferencePrefix::Quote.sequence_name(2027), "QUO-2027");
    }

    #[test]
    fn parse_accepts_only_known_prefixes() {
        assert_eq!(parse_reference("QUO-2026-00007"), Some((ReferencePrefix::Quote, 2026, 7)));
        assert_eq!(parse_reference("INV-2026-00007"), None);
        assert_eq!(parse_reference("ENQ-2026"), None);
    }
}
