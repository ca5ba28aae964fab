// taktsim-config/src/validation.rs
//! Custom validation functions for scenario fields.

use validator::ValidationError;

/// Node identifiers appear in wire frames and in file names derived from
/// them, so they are restricted to a filesystem- and protocol-safe alphabet.
pub fn validate_node_id(id: &str) -> Result<(), ValidationError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_node_id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_ids() {
        assert!(validate_node_id("sensor1").is_ok());
        assert!(validate_node_id("edge-gw_2").is_ok());
    }

    #[test]
    fn rejects_empty_and_spaced_ids() {
        assert!(validate_node_id("").is_err());
        assert!(validate_node_id("bad id").is_err());
    }
}
