//! Fingerprint command implementation.

use snapsync_codec::{fingerprint, from_json, Fingerprint};
use std::fs;
use std::path::Path;

/// Fingerprint of the JSON document in `path`.
pub fn fingerprint_file(path: &Path) -> Result<Fingerprint, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    let json: serde_json::Value = serde_json::from_str(&text)?;
    Ok(fingerprint(&from_json(&json)?))
}

/// Runs the fingerprint command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", fingerprint_file(path)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = write(r#"{"ref": "E-1", "lines": [1, 2]}"#);
        let b = write(r#"{"lines": [1, 2], "ref": "E-1"}"#);
        assert_eq!(
            fingerprint_file(a.path()).unwrap(),
            fingerprint_file(b.path()).unwrap()
        );
    }

    #[test]
    fn floats_are_rejected() {
        let file = write(r#"{"amount": 1.25}"#);
        assert!(fingerprint_file(file.path()).is_err());
    }
}
