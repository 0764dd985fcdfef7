//! Reader for OpenSSL-style config files (`server.csr.cnf`, `v3.ext`).
//!
//! Only the subset those files use: `[section]` headers, `key = value` pairs
//! and `#`/`;` comment lines. Keys before the first header belong to the
//! unnamed default section `""`.

use std::collections::HashMap;

use crate::error::{Error, Result};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Cnf {
    sections: HashMap<String, Vec<(String, String)>>,
}

impl Cnf {
    pub fn parse(name: &str, text: &str) -> Result<Self> {
        let mut cnf = Self::default();
        let mut current = String::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[') {
                let section = header.strip_suffix(']').ok_or_else(|| {
                    Error::parse(name, format!("line {}: unterminated section header", index + 1))
                })?;
                current = section.trim().to_owned();
                cnf.sections.entry(current.clone()).or_default();
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::parse(name, format!("line {}: expected key = value", index + 1))
            })?;
            cnf.sections
                .entry(current.clone())
                .or_default()
                .push((key.trim().to_owned(), value.trim().to_owned()));
        }

        Ok(cnf)
    }

    /// Entries of a section in file order.
    pub fn section(&self, section: &str) -> Option<&[(String, String)]> {
        self.sections.get(section).map(Vec::as_slice)
    }

    /// Last value for `key` in `section`, matching OpenSSL's override rule.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections() {
        let cnf = Cnf::parse(
            "test.cnf",
            "top = level\n\n[req]\ndefault_bits = 2048\n# comment\n[dn]\nC=US\nCN = localhost.ssl\n",
        )
        .unwrap();

        assert_eq!(cnf.get("", "top"), Some("level"));
        assert_eq!(cnf.get("req", "default_bits"), Some("2048"));
        assert_eq!(cnf.get("dn", "C"), Some("US"));
        assert_eq!(cnf.get("dn", "CN"), Some("localhost.ssl"));
        assert_eq!(cnf.get("dn", "ST"), None);
        assert!(cnf.section("missing").is_none());
    }

    #[test]
    fn test_values_keep_inner_equals_and_spaces() {
        let cnf = Cnf::parse("v3.ext", "keyUsage = digitalSignature, nonRepudiation\nO=A = B\n")
            .unwrap();
        assert_eq!(cnf.get("", "keyUsage"), Some("digitalSignature, nonRepudiation"));
        assert_eq!(cnf.get("", "O"), Some("A = B"));
    }

    #[test]
    fn test_later_keys_win() {
        let cnf = Cnf::parse("x", "[dn]\nCN=a\nCN=b\n").unwrap();
        assert_eq!(cnf.get("dn", "CN"), Some("b"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            Cnf::parse("x", "[dn\n"),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            Cnf::parse("x", "[dn]\njust words\n"),
            Err(Error::Parse { .. })
        ));
    }
}
