//! Exporter mix specification: `kind:count[,kind:count...]`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::generator::GeneratorKind;

use super::validation::ConfigError;

/// A number of exporters of one generator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExporterSpec {
    pub kind: GeneratorKind,
    pub count: usize,
}

impl ExporterSpec {
    pub fn new(kind: GeneratorKind, count: usize) -> Self {
        Self { kind, count }
    }
}

impl FromStr for ExporterSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((name, count)) = s.trim().split_once(':') else {
            return Err(ConfigError::invalid(format!(
                "bad exporter spec '{s}': must be of the form 'name:count'"
            )));
        };

        let kind = name
            .parse::<GeneratorKind>()
            .map_err(|_| ConfigError::invalid(format!("invalid exporter name '{name}'")))?;
        let count = match count.parse::<usize>() {
            Ok(c) if c > 0 => c,
            _ => {
                return Err(ConfigError::invalid(format!(
                    "invalid exporter count '{count}'"
                )));
            }
        };

        Ok(Self { kind, count })
    }
}

impl fmt::Display for ExporterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.count)
    }
}

/// Ordered list of exporter specs making up one admission batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExporterSpecList(Vec<ExporterSpec>);

impl ExporterSpecList {
    pub fn new(specs: Vec<ExporterSpec>) -> Self {
        Self(specs)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExporterSpec> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of exporters in one batch.
    pub fn total(&self) -> usize {
        self.0.iter().map(|s| s.count).sum()
    }
}

impl FromStr for ExporterSpecList {
    type Err = ConfigError;

    fn from_str(v: &str) -> Result<Self, Self::Err> {
        if v.trim().is_empty() {
            return Err(ConfigError::invalid("exporter spec list is empty"));
        }
        v.split(',')
            .map(|s| {
                s.parse::<ExporterSpec>().map_err(|e| {
                    ConfigError::invalid(format!(
                        "error parsing exporter spec list '{v}', spec '{s}' has error: {e}"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl TryFrom<String> for ExporterSpecList {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExporterSpecList> for String {
    fn from(list: ExporterSpecList) -> Self {
        list.to_string()
    }
}

impl fmt::Display for ExporterSpecList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_spec() {
        let spec: ExporterSpec = "inc:3".parse().unwrap();
        assert_eq!(spec, ExporterSpec::new(GeneratorKind::Incrementing, 3));
    }

    #[test]
    fn test_parse_list() {
        let list: ExporterSpecList = "inc:1,static:2,randcyclic:3,oscillate:4".parse().unwrap();
        assert_eq!(list.total(), 10);
        assert_eq!(list.to_string(), "inc:1,static:2,randcyclic:3,oscillate:4");
    }

    #[test]
    fn test_reject_missing_count() {
        let err = "inc".parse::<ExporterSpec>().unwrap_err();
        assert!(err.to_string().contains("name:count"));
    }

    #[test]
    fn test_reject_unknown_kind() {
        let err = "sawtooth:2".parse::<ExporterSpec>().unwrap_err();
        assert!(err.to_string().contains("invalid exporter name"));
    }

    #[test]
    fn test_reject_non_positive_count() {
        assert!("inc:0".parse::<ExporterSpec>().is_err());
        assert!("inc:-1".parse::<ExporterSpec>().is_err());
        assert!("inc:x".parse::<ExporterSpec>().is_err());
    }

    #[test]
    fn test_list_error_names_bad_spec() {
        let err = "inc:1,bogus:2".parse::<ExporterSpecList>().unwrap_err();
        assert!(err.to_string().contains("spec 'bogus:2'"));
    }

    #[test]
    fn test_reject_empty_list() {
        assert!("".parse::<ExporterSpecList>().is_err());
    }

    #[test]
    fn test_deserialize_from_yaml_string() {
        let list: ExporterSpecList = serde_yaml::from_str("\"static:5\"").unwrap();
        assert_eq!(list.total(), 5);
    }
}
