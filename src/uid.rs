//
// uid.rs
// Dicom-Volume-Tools-rs
//
// Generates globally unique DICOM UIDs under the 2.25 (UUID-derived) root.
//
// Thales Matheus Mendonça Santos - November 2025

use uuid::Uuid;

/// New `2.25.<decimal>` UID from a random (version 4) UUID.
pub fn generate() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn uids_are_valid_and_unique() {
        let uids: HashSet<String> = (0..1000).map(|_| generate()).collect();
        assert_eq!(uids.len(), 1000);
        for uid in &uids {
            assert!(uid.starts_with("2.25."));
            assert!(uid.len() <= 64);
            assert!(uid.chars().all(|c| c.is_ascii_digit() || c == '.'));
        }
    }
}
