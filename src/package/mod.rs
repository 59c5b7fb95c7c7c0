//! Package identities for the supported ecosystems.
//!
//! A [`Scheme`] is one of a closed set of registries. Parsing and formatting
//! of names, versions, repository names and configuration strings is defined
//! per scheme here, so every package source shares the same rules.

pub mod version;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Package ecosystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Npm,
    Go,
    Crates,
    Python,
    Maven,
}

impl Scheme {
    pub const ALL: [Scheme; 5] = [
        Scheme::Npm,
        Scheme::Go,
        Scheme::Crates,
        Scheme::Python,
        Scheme::Maven,
    ];

    /// Public registry used when no override is configured.
    pub fn default_registry_url(&self) -> &'static str {
        match self {
            Scheme::Npm => "https://registry.npmjs.org",
            Scheme::Go => "https://proxy.golang.org",
            Scheme::Crates => "https://crates.io",
            Scheme::Python => "https://files.pythonhosted.org",
            Scheme::Maven => "https://repo1.maven.org/maven2",
        }
    }

    /// Whether versions in this ecosystem are semantic versions.
    pub fn uses_semver(&self) -> bool {
        matches!(self, Scheme::Npm | Scheme::Go | Scheme::Crates)
    }

    /// Parse a package name, validating it for this ecosystem.
    pub fn parse_package(&self, name: &str) -> Result<Package> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            bail!("Invalid {} package name: {:?}", self, name);
        }
        let valid = match self {
            Scheme::Npm => match name.split_once('/') {
                Some((scope, rest)) => {
                    scope.len() > 1
                        && scope.starts_with('@')
                        && is_simple_name(&scope[1..])
                        && is_simple_name(rest)
                }
                None => is_simple_name(name),
            },
            Scheme::Go => name
                .split('/')
                .all(|s| !s.is_empty() && s != "." && s != ".." && !s.contains('@')),
            Scheme::Crates | Scheme::Python => is_simple_name(name),
            Scheme::Maven => match name.split_once(':') {
                Some((group, artifact)) => is_simple_name(group) && is_simple_name(artifact),
                None => false,
            },
        };
        if !valid {
            bail!("Invalid {} package name: {:?}", self, name);
        }
        Ok(Package {
            scheme: *self,
            name: name.to_string(),
        })
    }

    /// Parse a package name and version into a [`VersionedPackage`].
    ///
    /// Go versions are normalized to carry their leading `v`.
    pub fn parse_versioned(&self, name: &str, version: &str) -> Result<VersionedPackage> {
        let package = self.parse_package(name)?;
        let version = self.normalize_version(version);

        let valid = match self {
            Scheme::Npm | Scheme::Crates => semver::Version::parse(&version).is_ok(),
            Scheme::Go => semver::Version::parse(&version[1..]).is_ok(),
            Scheme::Python | Scheme::Maven => {
                !version.is_empty()
                    && !version.starts_with('-')
                    && !version.contains('/')
                    && !version.chars().any(char::is_whitespace)
            }
        };
        if !valid {
            bail!("Invalid {} version for {}: {:?}", self, name, version);
        }
        Ok(VersionedPackage { package, version })
    }

    fn normalize_version(&self, version: &str) -> String {
        match self {
            Scheme::Go if !version.starts_with('v') => format!("v{}", version),
            _ => version.to_string(),
        }
    }

    /// Split a versioned package syntax string (`name@1.0.0`, `name==1.0`,
    /// `group:artifact:1.0`) into a [`VersionedPackage`].
    pub fn parse_versioned_syntax(&self, syntax: &str) -> Result<VersionedPackage> {
        let split = match self {
            // Scoped npm names start with `@`, so only an `@` past the first byte separates.
            Scheme::Npm => syntax
                .rfind('@')
                .filter(|&i| i > 0)
                .map(|i| (&syntax[..i], &syntax[i + 1..])),
            Scheme::Go | Scheme::Crates => syntax.rsplit_once('@'),
            Scheme::Python => syntax.split_once("=="),
            Scheme::Maven => syntax.rsplit_once(':'),
        };
        match split {
            Some((name, version)) => self.parse_versioned(name, version),
            None => bail!("Invalid {} versioned package: {:?}", self, syntax),
        }
    }

    /// Parse a configuration string of the form `<scheme>:<versioned syntax>`.
    pub fn parse_config_string(s: &str) -> Result<VersionedPackage> {
        let Some((scheme, syntax)) = s.split_once(':') else {
            bail!("Invalid package configuration {:?}. Expected '<scheme>:<package>'.", s);
        };
        scheme.parse::<Scheme>()?.parse_versioned_syntax(syntax)
    }

    /// Parse a synthetic repository name such as `npm/@types/node` or
    /// `maven/org.example/lib`.
    pub fn parse_repo_name(repo_name: &str) -> Result<Package> {
        let Some((prefix, rest)) = repo_name.split_once('/') else {
            bail!("Invalid package repository name: {:?}", repo_name);
        };
        let scheme: Scheme = prefix.parse()?;
        match scheme {
            Scheme::Maven => match rest.split_once('/') {
                Some((group, artifact)) => scheme.parse_package(&format!("{}:{}", group, artifact)),
                None => bail!("Invalid maven repository name: {:?}", repo_name),
            },
            _ => scheme.parse_package(rest),
        }
    }
}

fn is_simple_name(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Npm => write!(f, "npm"),
            Scheme::Go => write!(f, "go"),
            Scheme::Crates => write!(f, "crates"),
            Scheme::Python => write!(f, "python"),
            Scheme::Maven => write!(f, "maven"),
        }
    }
}

impl FromStr for Scheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "npm" => Ok(Scheme::Npm),
            "go" | "gomod" => Ok(Scheme::Go),
            "crates" | "rust" => Ok(Scheme::Crates),
            "python" | "pypi" => Ok(Scheme::Python),
            "maven" | "jvm" => Ok(Scheme::Maven),
            _ => bail!(
                "Unknown package scheme: {}. Expected npm, go, crates, python, or maven.",
                s
            ),
        }
    }
}

/// A package name scoped to its ecosystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Package {
    pub scheme: Scheme,
    pub name: String,
}

impl Package {
    /// Name of the synthetic repository holding this package's versions.
    pub fn repo_name(&self) -> String {
        match self.scheme {
            Scheme::Maven => format!("{}/{}", self.scheme, self.name.replacen(':', "/", 1)),
            _ => format!("{}/{}", self.scheme, self.name),
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repo_name())
    }
}

/// A package at one specific version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedPackage {
    pub package: Package,
    pub version: String,
}

impl VersionedPackage {
    pub fn scheme(&self) -> Scheme {
        self.package.scheme
    }

    pub fn name(&self) -> &str {
        &self.package.name
    }

    /// Tag under which this version lives in its synthetic repository.
    pub fn tag_name(&self) -> String {
        tag_for_version(&self.version)
    }

    /// Human-readable `name@version` form in the ecosystem's own syntax.
    pub fn versioned_syntax(&self) -> String {
        match self.scheme() {
            Scheme::Npm | Scheme::Go | Scheme::Crates => format!("{}@{}", self.name(), self.version),
            Scheme::Python => format!("{}=={}", self.name(), self.version),
            Scheme::Maven => format!("{}:{}", self.name(), self.version),
        }
    }

    /// Ecosystem-defined ordering of two versions of the same package.
    pub fn cmp_version(&self, other: &VersionedPackage) -> Ordering {
        version::compare(self.scheme(), &self.version, &other.version)
    }

    pub fn less(&self, other: &VersionedPackage) -> bool {
        self.cmp_version(other) == Ordering::Less
    }
}

impl fmt::Display for VersionedPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.versioned_syntax())
    }
}

/// `"v" + version`, collapsing an existing leading `v`.
pub fn tag_for_version(version: &str) -> String {
    format!("v{}", version.strip_prefix('v').unwrap_or(version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_parse_and_display() {
        for scheme in Scheme::ALL {
            assert_eq!(scheme.to_string().parse::<Scheme>().unwrap(), scheme);
        }
        assert_eq!("PyPI".parse::<Scheme>().unwrap(), Scheme::Python);
        assert!("cocoapods".parse::<Scheme>().is_err());
    }

    #[test]
    fn test_tag_name_collapses_v_prefix() {
        assert_eq!(tag_for_version("1.2.3"), "v1.2.3");
        assert_eq!(tag_for_version("v1.2.3"), "v1.2.3");

        let go = Scheme::Go.parse_versioned("github.com/x/y", "1.0.0").unwrap();
        assert_eq!(go.version, "v1.0.0");
        assert_eq!(go.tag_name(), "v1.0.0");
    }

    #[test]
    fn test_parse_versioned_validates_per_scheme() {
        assert!(Scheme::Npm.parse_versioned("react", "18.2.0").is_ok());
        assert!(Scheme::Npm.parse_versioned("react", "latest").is_err());
        assert!(Scheme::Crates.parse_versioned("serde", "1.0").is_err());
        assert!(Scheme::Python.parse_versioned("requests", "2.31.0.post1").is_ok());
        assert!(Scheme::Python.parse_versioned("requests", "2.0 beta").is_err());
        assert!(Scheme::Maven.parse_versioned("org.example:lib", "1.0-SNAPSHOT").is_ok());
        assert!(Scheme::Maven.parse_versioned("lib", "1.0").is_err());
    }

    #[test]
    fn test_parse_package_names() {
        assert!(Scheme::Npm.parse_package("@types/node").is_ok());
        assert!(Scheme::Npm.parse_package("types/node").is_err());
        assert!(Scheme::Npm.parse_package("../etc").is_err());
        assert!(Scheme::Go.parse_package("github.com/x/y").is_ok());
        assert!(Scheme::Go.parse_package("github.com//y").is_err());
        assert!(Scheme::Crates.parse_package("serde json").is_err());
    }

    #[test]
    fn test_versioned_syntax_round_trip_through_config_string() {
        let cases = [
            ("npm:@types/node@20.1.0", "@types/node", "20.1.0"),
            ("go:github.com/x/y@v1.2.3", "github.com/x/y", "v1.2.3"),
            ("crates:serde@1.0.0", "serde", "1.0.0"),
            ("python:requests==2.31.0", "requests", "2.31.0"),
            ("maven:org.example:lib:1.0", "org.example:lib", "1.0"),
        ];
        for (config, name, version) in cases {
            let pkg = Scheme::parse_config_string(config).unwrap();
            assert_eq!(pkg.name(), name);
            assert_eq!(pkg.version, version);
            assert_eq!(format!("{}:{}", pkg.scheme(), pkg.versioned_syntax()), config);
        }
        assert!(Scheme::parse_config_string("react@1.0.0").is_err());
        assert!(Scheme::parse_config_string("npm:@types/node").is_err());
    }

    #[test]
    fn test_repo_names() {
        let pkg = Scheme::parse_repo_name("npm/@types/node").unwrap();
        assert_eq!(pkg.scheme, Scheme::Npm);
        assert_eq!(pkg.name, "@types/node");
        assert_eq!(pkg.repo_name(), "npm/@types/node");

        let pkg = Scheme::parse_repo_name("maven/org.example/lib").unwrap();
        assert_eq!(pkg.name, "org.example:lib");
        assert_eq!(pkg.repo_name(), "maven/org.example/lib");

        assert!(Scheme::parse_repo_name("github.com/x/y").is_err());
        assert!(Scheme::parse_repo_name("npm").is_err());
    }

    #[test]
    fn test_less_uses_ecosystem_ordering() {
        let a = Scheme::Npm.parse_versioned("left-pad", "1.9.0").unwrap();
        let b = Scheme::Npm.parse_versioned("left-pad", "1.10.0").unwrap();
        assert!(a.less(&b));
        assert!(!b.less(&a));
    }
}
