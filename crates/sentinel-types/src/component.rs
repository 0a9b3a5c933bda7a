use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SentinelError;

const FIXED_KINDS: [&str; 4] = ["bridge", "scout", "sentinel", "journal"];
const GEAR_PREFIX: &str = "gear:";

/// Identifier for anything registered with the component registry.
///
/// Grammar: `bridge | scout | sentinel | journal | gear:<kebab-case>`.
/// The four fixed kinds name singleton core components; `gear:<kebab-case>`
/// names an installed capability handler. Validated once at construction so
/// every downstream consumer (registry, router, audit log) can trust the
/// value without re-parsing it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentId(String);

impl ComponentId {
    pub fn parse(raw: &str) -> Result<Self, SentinelError> {
        if FIXED_KINDS.contains(&raw) {
            return Ok(Self(raw.to_string()));
        }

        if let Some(suffix) = raw.strip_prefix(GEAR_PREFIX) {
            if is_kebab_case(suffix) {
                return Ok(Self(raw.to_string()));
            }
        }

        Err(SentinelError::validation(format!(
            "invalid component id '{raw}': expected one of {FIXED_KINDS:?} or 'gear:<kebab-case>'"
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_gear(&self) -> bool {
        self.0.starts_with(GEAR_PREFIX)
    }
}

fn is_kebab_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('-') || s.ends_with('-') || s.contains("--") {
        return false;
    }
    s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ComponentId {
    type Error = SentinelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ComponentId> for String {
    fn from(value: ComponentId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_kinds_parse() {
        for kind in FIXED_KINDS {
            assert!(ComponentId::parse(kind).is_ok());
        }
    }

    #[test]
    fn gear_kebab_case_parses() {
        let id = ComponentId::parse("gear:file-search").unwrap();
        assert!(id.is_gear());
        assert_eq!(id.as_str(), "gear:file-search");
    }

    #[test]
    fn gear_with_uppercase_or_underscore_rejected() {
        assert!(ComponentId::parse("gear:File_Search").is_err());
        assert!(ComponentId::parse("gear:file_search").is_err());
    }

    #[test]
    fn gear_with_leading_trailing_or_double_hyphen_rejected() {
        assert!(ComponentId::parse("gear:-search").is_err());
        assert!(ComponentId::parse("gear:search-").is_err());
        assert!(ComponentId::parse("gear:file--search").is_err());
    }

    #[test]
    fn empty_gear_suffix_rejected() {
        assert!(ComponentId::parse("gear:").is_err());
    }

    #[test]
    fn unknown_bare_word_rejected() {
        assert!(ComponentId::parse("bridges").is_err());
        assert!(ComponentId::parse("").is_err());
    }
}
