//! Artifact naming.
//!
//! ## Space Naming
//!
//! Space names can be up to 50 characters long and can only consist of
//! ASCII alphanumeric characters (A-Za-z0-9), dashes ('-'), underscores
//! ('_'), and plus signs ('+'). They must also start with an alphanumeric
//! character.
//!
//! ## Package Naming
//!
//! Raw package names, versions and groups follow the rules of the upload
//! form: names are alphanumeric with interior dashes/underscores, versions
//! additionally allow dots, and groups are dot-separated sequences of
//! names. Helm chart names are lowercase DNS-label-like names.

use std::hash::{Hash, Hasher};
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{de, Deserialize, Serialize};
use wildmatch::WildMatch;

use crate::error::{DepotError, DepotResult};

/// The maximum allowable length of a space name.
pub const MAX_SPACE_NAME_LENGTH: usize = 50;

lazy_static! {
    static ref SPACE_NAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-_+]{0,49}$").unwrap();
    static ref SPACE_NAME_PATTERN_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9*][A-Za-z0-9-_+*]{0,49}$").unwrap();
    static ref REPO_NAME_REGEX: Regex =
        Regex::new(r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*$").unwrap();
    static ref TAG_NAME_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").unwrap();
    static ref PACKAGE_NAME_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9_-]*[A-Za-z0-9])?$").unwrap();
    static ref PACKAGE_VERSION_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?$").unwrap();
    static ref CHART_NAME_REGEX: Regex = Regex::new(r"^[a-z][a-z0-9-]+[a-z0-9]$").unwrap();
}

/// The name of a space.
#[derive(Serialize, Deserialize, Clone, Debug, Hash, Eq, PartialEq)]
#[serde(transparent)]
pub struct SpaceName(#[serde(deserialize_with = "SpaceName::deserialize")] String);

/// A pattern of space names.
///
/// The keys in the custom JWT claim are patterns that can be matched
/// against space names. Patterns can only be created by trusted
/// entities.
///
/// In addition to what's allowed in space names, patterns can include
/// wildcards ('*') to enable a limited form of namespace-based access
/// control.
#[derive(Serialize, Clone, Debug)]
#[serde(transparent)]
pub struct SpaceNamePattern {
    pattern: String,

    /// The pattern matcher.
    ///
    /// If None, then `pattern` itself will be used to match exactly.
    /// This is a special case for converting a SpaceName to a
    /// SpaceNamePattern.
    #[serde(skip)]
    matcher: Option<WildMatch>,
}

/// The name of a container repository inside a space.
#[derive(Serialize, Deserialize, Clone, Debug, Hash, Eq, PartialEq)]
#[serde(transparent)]
pub struct RepoName(#[serde(deserialize_with = "RepoName::deserialize")] String);

/// A container tag.
#[derive(Serialize, Deserialize, Clone, Debug, Hash, Eq, PartialEq)]
#[serde(transparent)]
pub struct TagName(#[serde(deserialize_with = "TagName::deserialize")] String);

impl SpaceName {
    /// Creates a space name from a String.
    pub fn new(name: String) -> DepotResult<Self> {
        validate_space_name(&name)?;
        Ok(Self(name))
    }

    /// Returns the string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the corresponding pattern that only matches this space.
    pub fn to_pattern(&self) -> SpaceNamePattern {
        SpaceNamePattern {
            pattern: self.0.clone(),
            matcher: None,
        }
    }

    /// Deserializes a potentially-invalid space name.
    fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;
        String::deserialize(deserializer).and_then(|s| {
            validate_space_name(&s).map_err(|e| Error::custom(e.to_string()))?;
            Ok(s)
        })
    }
}

impl FromStr for SpaceName {
    type Err = DepotError;

    fn from_str(name: &str) -> DepotResult<Self> {
        Self::new(name.to_owned())
    }
}

impl SpaceNamePattern {
    /// Creates a space name pattern from a String.
    pub fn new(pattern: String) -> DepotResult<Self> {
        validate_space_name_pattern(&pattern)?;
        let matcher = WildMatch::new(&pattern);

        Ok(Self {
            pattern,
            matcher: Some(matcher),
        })
    }

    /// Returns the string.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Returns whether the pattern matches a space name.
    pub fn matches(&self, space: &SpaceName) -> bool {
        match &self.matcher {
            Some(matcher) => matcher.matches(space.as_str()),
            None => self.pattern == space.as_str(),
        }
    }
}

impl FromStr for SpaceNamePattern {
    type Err = DepotError;

    fn from_str(pattern: &str) -> DepotResult<Self> {
        Self::new(pattern.to_owned())
    }
}

impl<'de> Deserialize<'de> for SpaceNamePattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;

        String::deserialize(deserializer)
            .and_then(|s| Self::new(s).map_err(|e| Error::custom(e.to_string())))
    }
}

impl Hash for SpaceNamePattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
    }
}

impl PartialEq for SpaceNamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for SpaceNamePattern {}

impl RepoName {
    /// Creates a repository name from a String.
    pub fn new(name: String) -> DepotResult<Self> {
        validate_repo_name(&name)?;
        Ok(Self(name))
    }

    /// Returns the string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;
        String::deserialize(deserializer).and_then(|s| {
            validate_repo_name(&s).map_err(|e| Error::custom(e.to_string()))?;
            Ok(s)
        })
    }
}

impl FromStr for RepoName {
    type Err = DepotError;

    fn from_str(name: &str) -> DepotResult<Self> {
        Self::new(name.to_owned())
    }
}

impl TagName {
    /// Creates a tag name from a String.
    pub fn new(name: String) -> DepotResult<Self> {
        validate_tag_name(&name)?;
        Ok(Self(name))
    }

    /// Returns the string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;
        String::deserialize(deserializer).and_then(|s| {
            validate_tag_name(&s).map_err(|e| Error::custom(e.to_string()))?;
            Ok(s)
        })
    }
}

impl FromStr for TagName {
    type Err = DepotError;

    fn from_str(name: &str) -> DepotResult<Self> {
        Self::new(name.to_owned())
    }
}

fn validate_space_name(name: &str) -> DepotResult<()> {
    if SPACE_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(DepotError::InvalidSpaceName {
            name: name.to_owned(),
        })
    }
}

fn validate_space_name_pattern(pattern: &str) -> DepotResult<()> {
    if SPACE_NAME_PATTERN_REGEX.is_match(pattern) {
        Ok(())
    } else {
        Err(DepotError::InvalidSpaceName {
            name: pattern.to_owned(),
        })
    }
}

fn validate_repo_name(name: &str) -> DepotResult<()> {
    if REPO_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(DepotError::InvalidRepoName {
            name: name.to_owned(),
        })
    }
}

fn validate_tag_name(name: &str) -> DepotResult<()> {
    if TAG_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(DepotError::InvalidTagName {
            name: name.to_owned(),
        })
    }
}

/// Validates a raw package name.
pub fn validate_package_name(name: &str) -> DepotResult<()> {
    if PACKAGE_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(DepotError::InvalidPackageName {
            name: name.to_owned(),
        })
    }
}

/// Validates a package version.
pub fn validate_package_version(version: &str) -> DepotResult<()> {
    if PACKAGE_VERSION_REGEX.is_match(version) {
        Ok(())
    } else {
        Err(DepotError::InvalidPackageVersion {
            version: version.to_owned(),
        })
    }
}

/// Validates a dot-separated group, each segment being a package name.
pub fn validate_group_name(group: &str) -> DepotResult<()> {
    if group.is_empty() {
        return Ok(());
    }

    for segment in group.split('.') {
        if !PACKAGE_NAME_REGEX.is_match(segment) {
            return Err(DepotError::InvalidGroupName {
                group: group.to_owned(),
            });
        }
    }

    Ok(())
}

/// Validates a Helm chart name.
///
/// Chart names are RFC 1035 label-like: lowercase alphanumerics and
/// dashes, starting with a letter and ending with an alphanumeric.
pub fn validate_chart_name(name: &str) -> DepotResult<()> {
    if CHART_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(DepotError::InvalidPackageName {
            name: name.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_name() {
        assert!(SpaceName::new("s1".to_string()).is_ok());
        assert!(SpaceName::new("zhaofeng+cache".to_string()).is_ok());
        assert!(SpaceName::new("_nope".to_string()).is_err());
        assert!(SpaceName::new("".to_string()).is_err());
    }

    #[test]
    fn test_space_name_pattern() {
        let pattern = SpaceNamePattern::new("team-*".to_string()).unwrap();
        assert!(pattern.matches(&SpaceName::new("team-infra".to_string()).unwrap()));
        assert!(!pattern.matches(&SpaceName::new("ops".to_string()).unwrap()));

        let exact = SpaceName::new("s1".to_string()).unwrap().to_pattern();
        assert!(exact.matches(&SpaceName::new("s1".to_string()).unwrap()));
        assert!(!exact.matches(&SpaceName::new("s12".to_string()).unwrap()));

        assert!(SpaceNamePattern::new("".to_string()).is_err());
    }

    #[test]
    fn test_repo_name() {
        assert!(RepoName::new("alpine".to_string()).is_ok());
        assert!(RepoName::new("team.app-backend".to_string()).is_ok());
        assert!(RepoName::new("UPPER".to_string()).is_err());
        assert!(RepoName::new("-dash".to_string()).is_err());
    }

    #[test]
    fn test_tag_name() {
        assert!(TagName::new("v1".to_string()).is_ok());
        assert!(TagName::new("_tag".to_string()).is_ok());
        assert!(TagName::new("1.2.3-rc.1".to_string()).is_ok());
        assert!(TagName::new(".tag".to_string()).is_err());
        assert!(TagName::new("x".repeat(129)).is_err());
    }

    #[test]
    fn test_package_name() {
        assert!(validate_package_name("gitfox").is_ok());
        assert!(validate_package_name("a").is_ok());
        assert!(validate_package_name("my_pkg-1").is_ok());
        assert!(validate_package_name(".gitfox").is_err());
        assert!(validate_package_name("pkg-").is_err());
        assert!(validate_package_name("").is_err());
    }

    #[test]
    fn test_package_version() {
        assert!(validate_package_version("1.0.0").is_ok());
        assert!(validate_package_version("2022.8.3101").is_ok());
        assert!(validate_package_version("1.0.").is_err());
        assert!(validate_package_version("-1").is_err());
    }

    #[test]
    fn test_group_name() {
        assert!(validate_group_name("").is_ok());
        assert!(validate_group_name("easycorp").is_ok());
        assert!(validate_group_name("easycorp.pangu").is_ok());
        assert!(validate_group_name("easycorp..pangu").is_err());
        assert!(validate_group_name(".easycorp").is_err());
    }

    #[test]
    fn test_chart_name() {
        assert!(validate_chart_name("gitlab").is_ok());
        assert!(validate_chart_name("cert-manager").is_ok());
        assert!(validate_chart_name("2fauth").is_err());
        assert!(validate_chart_name("Nginx").is_err());
    }
}
