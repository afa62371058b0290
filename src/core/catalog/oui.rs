//! IEEE OUI registry loader
//!
//! Parses the IEEE `oui.csv` format (Registry, Assignment, Organization
//! Name, ...). Only the assignment (column 2) and organization (column 3)
//! are used; the assignment is normalized to six uppercase hex characters.

use std::collections::HashMap;
use std::path::Path;

/// Load vendor names keyed by OUI from an IEEE-format CSV file.
pub fn load_oui(path: &Path) -> Result<HashMap<String, String>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_path(path)?;

    let mut out = HashMap::with_capacity(1024);
    for record in reader.records() {
        let Ok(record) = record else { continue };
        if record.len() < 3 {
            continue;
        }
        let assignment = record[1]
            .trim()
            .to_uppercase()
            .replace(['-', ':'], "");
        if assignment.len() != 6 {
            continue;
        }
        let org = record[2].trim();
        if org.is_empty() {
            continue;
        }
        out.insert(assignment, org.to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_ieee_format() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Registry,Assignment,Organization Name,Organization Address").unwrap();
        writeln!(file, "MA-L,AABBCC,Acme Corp,\"1 Way, Somewhere\"").unwrap();
        writeln!(file, "MA-L,dd-ee-ff,\"Widgets, Inc\",addr").unwrap();
        writeln!(file, "MA-L,BAD,Short Assignment,addr").unwrap();
        file.flush().unwrap();

        let map = load_oui(file.path()).unwrap();
        assert_eq!(map.get("AABBCC").map(String::as_str), Some("Acme Corp"));
        assert_eq!(map.get("DDEEFF").map(String::as_str), Some("Widgets, Inc"));
        assert!(!map.contains_key("BAD"));
    }
}
