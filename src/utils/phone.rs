use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PhoneError {
    #[error("Invalid phone number format. Use format: 0712345678 or 254712345678")]
    InvalidFormat,
}

/// Normalizes a Kenyan mobile number to the `254XXXXXXXXX` form the gateway
/// expects. Accepts local (`07…`, `01…`), bare (`7…`, `1…`) and international
/// (`254…`, `+254…`) input; anything else is rejected.
pub fn normalize_phone(raw: &str) -> Result<String, PhoneError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let canonical = if let Some(rest) = digits.strip_prefix("254") {
        format!("254{rest}")
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("254{rest}")
    } else if digits.len() == 9 {
        format!("254{digits}")
    } else {
        return Err(PhoneError::InvalidFormat);
    };

    // Safaricom subscriber numbers: 9 digits starting with 7 or 1.
    let subscriber = &canonical[3..];
    if subscriber.len() == 9
        && (subscriber.starts_with('7') || subscriber.starts_with('1'))
        && subscriber.chars().all(|c| c.is_ascii_digit())
    {
        Ok(canonical)
    } else {
        Err(PhoneError::InvalidFormat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_local_format() {
        assert_eq!(normalize_phone("0712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("0112345678").unwrap(), "254112345678");
    }

    #[test]
    fn normalizes_international_format() {
        assert_eq!(normalize_phone("254712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("+254 712 345 678").unwrap(), "254712345678");
    }

    #[test]
    fn normalizes_bare_subscriber_number() {
        assert_eq!(normalize_phone("712345678").unwrap(), "254712345678");
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(normalize_phone("12345"), Err(PhoneError::InvalidFormat));
        assert_eq!(normalize_phone(""), Err(PhoneError::InvalidFormat));
        assert_eq!(normalize_phone("0812345678"), Err(PhoneError::InvalidFormat));
        assert_eq!(normalize_phone("2547123456789"), Err(PhoneError::InvalidFormat));
    }

    #[test]
    fn normalization_is_idempotent() {
        for input in ["0712345678", "254712345678", "712345678"] {
            let once = normalize_phone(input).unwrap();
            let twice = normalize_phone(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn canonical_output_shape() {
        let normalized = normalize_phone("0712345678").unwrap();
        assert!(normalized.starts_with("254"));
        assert_eq!(normalized.len(), 12);
        assert!(normalized.chars().all(|c| c.is_ascii_digit()));
    }
}
