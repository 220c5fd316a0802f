//! Static registry of upstream resource types.
//!
//! Every resource type maps to exactly one upstream path template, one
//! freshness policy, and one key prefix. Adding a resource type means adding a
//! row to [`RESOURCE_TABLE`]; nothing else branches on the type.

use crate::config::PolicyOverride;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Errors describing a request or configuration the catalog cannot serve.
///
/// These are programming or input errors, never retried at runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown resource type '{0}'")]
    UnknownResourceType(String),
    #[error("resource type '{kind}' requires a {expected} parameter")]
    MissingParam {
        kind: &'static str,
        expected: &'static str,
    },
    #[error("resource type '{kind}' takes no parameter")]
    UnexpectedParam { kind: &'static str },
    #[error("invalid {expected} parameter '{value}' for resource type '{kind}'")]
    InvalidParam {
        kind: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("freshness policy for '{kind}' must have stale_after < expire_after (got {stale_after:?} >= {expire_after:?})")]
    InvalidPolicy {
        kind: String,
        stale_after: Duration,
        expire_after: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Competitions,
    Competition,
    Standings,
    Matches,
    TeamMatches,
}

impl ResourceType {
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Competitions,
        ResourceType::Competition,
        ResourceType::Standings,
        ResourceType::Matches,
        ResourceType::TeamMatches,
    ];

    pub fn spec(self) -> &'static ResourceSpec {
        &RESOURCE_TABLE[self as usize]
    }

    pub fn slug(self) -> &'static str {
        self.spec().slug
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ResourceType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RESOURCE_TABLE
            .iter()
            .find(|spec| spec.slug == s)
            .map(|spec| spec.kind)
            .ok_or_else(|| CatalogError::UnknownResourceType(s.to_owned()))
    }
}

/// Shape of the single parameter a resource type takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    None,
    /// Numeric upstream id.
    Id,
    /// Calendar date, normalized to `YYYY-MM-DD`.
    Date,
}

impl ParamKind {
    fn describe(self) -> &'static str {
        match self {
            ParamKind::None => "no",
            ParamKind::Id => "numeric id",
            ParamKind::Date => "YYYY-MM-DD date",
        }
    }

    /// Validate and canonicalize a raw parameter.
    fn normalize(self, kind: &'static str, raw: Option<&str>) -> Result<Option<String>, CatalogError> {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty());
        match (self, raw) {
            (ParamKind::None, None) => Ok(None),
            (ParamKind::None, Some(_)) => Err(CatalogError::UnexpectedParam { kind }),
            (_, None) => Err(CatalogError::MissingParam {
                kind,
                expected: self.describe(),
            }),
            (ParamKind::Id, Some(value)) => value
                .parse::<u32>()
                .map(|id| Some(id.to_string()))
                .map_err(|_| self.invalid(kind, value)),
            (ParamKind::Date, Some(value)) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(|date| Some(date.format("%Y-%m-%d").to_string()))
                .map_err(|_| self.invalid(kind, value)),
        }
    }

    fn invalid(self, kind: &'static str, value: &str) -> CatalogError {
        CatalogError::InvalidParam {
            kind,
            expected: self.describe(),
            value: value.to_owned(),
        }
    }
}

/// `(stale_after, expire_after)`, both measured from when an entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub stale_after: Duration,
    pub expire_after: Duration,
}

impl FreshnessPolicy {
    pub const fn new(stale_after: Duration, expire_after: Duration) -> Self {
        Self {
            stale_after,
            expire_after,
        }
    }

    pub fn validate(&self, kind: &str) -> Result<(), CatalogError> {
        if self.stale_after < self.expire_after {
            Ok(())
        } else {
            Err(CatalogError::InvalidPolicy {
                kind: kind.to_owned(),
                stale_after: self.stale_after,
                expire_after: self.expire_after,
            })
        }
    }
}

/// One row of the resource registry.
#[derive(Debug)]
pub struct ResourceSpec {
    pub kind: ResourceType,
    /// Used in keys, URLs, and configuration.
    pub slug: &'static str,
    /// Upstream path; every `{}` is replaced by the parameter.
    pub path: &'static str,
    pub param: ParamKind,
    pub policy: FreshnessPolicy,
}

const fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

/// Indexed by `ResourceType as usize`.
pub static RESOURCE_TABLE: [ResourceSpec; 5] = [
    ResourceSpec {
        kind: ResourceType::Competitions,
        slug: "competitions",
        path: "competitions",
        param: ParamKind::None,
        policy: FreshnessPolicy::new(minutes(12 * 60), minutes(24 * 60)),
    },
    ResourceSpec {
        kind: ResourceType::Competition,
        slug: "competition",
        path: "competitions/{}",
        param: ParamKind::Id,
        policy: FreshnessPolicy::new(minutes(12 * 60), minutes(24 * 60)),
    },
    ResourceSpec {
        kind: ResourceType::Standings,
        slug: "standings",
        path: "competitions/{}/standings",
        param: ParamKind::Id,
        policy: FreshnessPolicy::new(minutes(15), minutes(30)),
    },
    ResourceSpec {
        kind: ResourceType::Matches,
        slug: "matches",
        path: "matches?dateFrom={}&dateTo={}",
        param: ParamKind::Date,
        policy: FreshnessPolicy::new(Duration::from_secs(150), Duration::from_secs(300)),
    },
    ResourceSpec {
        kind: ResourceType::TeamMatches,
        slug: "team-matches",
        path: "teams/{}/matches",
        param: ParamKind::Id,
        policy: FreshnessPolicy::new(minutes(15), minutes(30)),
    },
];

/// Deterministic identity of a resource; the dedup unit for in-flight
/// requests and queued jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated resource type plus its canonical parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    kind: ResourceType,
    param: Option<String>,
}

impl Resource {
    /// Build a resource from untrusted input, validating the parameter shape.
    pub fn new(kind: ResourceType, param: Option<&str>) -> Result<Self, CatalogError> {
        let spec = kind.spec();
        let param = spec.param.normalize(spec.slug, param)?;
        Ok(Self { kind, param })
    }

    /// Parse a resource type slug and parameter, as received at an outer boundary.
    pub fn parse(kind: &str, param: Option<&str>) -> Result<Self, CatalogError> {
        Self::new(kind.parse()?, param)
    }

    pub fn competitions() -> Self {
        Self {
            kind: ResourceType::Competitions,
            param: None,
        }
    }

    pub fn competition(id: u32) -> Self {
        Self {
            kind: ResourceType::Competition,
            param: Some(id.to_string()),
        }
    }

    pub fn standings(competition_id: u32) -> Self {
        Self {
            kind: ResourceType::Standings,
            param: Some(competition_id.to_string()),
        }
    }

    pub fn matches_on(date: NaiveDate) -> Self {
        Self {
            kind: ResourceType::Matches,
            param: Some(date.format("%Y-%m-%d").to_string()),
        }
    }

    pub fn team_matches(team_id: u32) -> Self {
        Self {
            kind: ResourceType::TeamMatches,
            param: Some(team_id.to_string()),
        }
    }

    pub fn kind(&self) -> ResourceType {
        self.kind
    }

    pub fn param(&self) -> Option<&str> {
        self.param.as_deref()
    }

    pub fn key(&self) -> ResourceKey {
        match &self.param {
            Some(param) => ResourceKey(format!("{}:{param}", self.kind.slug())),
            None => ResourceKey(self.kind.slug().to_owned()),
        }
    }

    /// Upstream path, relative to the API base URL.
    pub fn path(&self) -> String {
        let template = self.kind.spec().path;
        match &self.param {
            Some(param) => template.replace("{}", param),
            None => template.to_owned(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key().as_str())
    }
}

/// Effective freshness policies: the static defaults with configured overrides applied.
#[derive(Debug, Clone)]
pub struct Catalog {
    policies: HashMap<ResourceType, FreshnessPolicy>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            policies: RESOURCE_TABLE
                .iter()
                .map(|spec| (spec.kind, spec.policy))
                .collect(),
        }
    }
}

impl Catalog {
    /// Apply overrides keyed by resource slug. Unknown slugs and policies that
    /// violate `stale_after < expire_after` are configuration errors.
    pub fn with_overrides(overrides: &HashMap<String, PolicyOverride>) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for (slug, patch) in overrides {
            let kind: ResourceType = slug.parse()?;
            let policy = catalog.policies.entry(kind).or_insert(kind.spec().policy);
            if let Some(stale_after) = patch.stale_after {
                policy.stale_after = stale_after;
            }
            if let Some(expire_after) = patch.expire_after {
                policy.expire_after = expire_after;
            }
        }
        for (kind, policy) in &catalog.policies {
            policy.validate(kind.slug())?;
        }
        Ok(catalog)
    }

    pub fn policy(&self, kind: ResourceType) -> FreshnessPolicy {
        self.policies
            .get(&kind)
            .copied()
            .unwrap_or(kind.spec().policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_discriminant() {
        for kind in ResourceType::ALL {
            assert_eq!(RESOURCE_TABLE[kind as usize].kind, kind);
        }
    }

    #[test]
    fn default_policies_are_valid() {
        for spec in &RESOURCE_TABLE {
            spec.policy.validate(spec.slug).unwrap();
        }
    }

    #[test]
    fn slugs_round_trip() {
        for kind in ResourceType::ALL {
            assert_eq!(kind.slug().parse::<ResourceType>().unwrap(), kind);
        }
        assert_eq!(
            "fixtures".parse::<ResourceType>(),
            Err(CatalogError::UnknownResourceType("fixtures".into()))
        );
    }

    #[test]
    fn identical_requests_produce_identical_keys() {
        let a = Resource::parse("standings", Some("2021")).unwrap();
        let b = Resource::parse("standings", Some(" 02021 ")).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), Resource::standings(2021).key());
        assert_eq!(a.key().as_str(), "standings:2021");
        assert_eq!(Resource::competitions().key().as_str(), "competitions");
    }

    #[test]
    fn paths_fill_every_placeholder() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 15).unwrap();
        assert_eq!(
            Resource::matches_on(date).path(),
            "matches?dateFrom=2025-10-15&dateTo=2025-10-15"
        );
        assert_eq!(Resource::team_matches(57).path(), "teams/57/matches");
        assert_eq!(Resource::competitions().path(), "competitions");
    }

    #[test]
    fn parameter_shape_is_enforced() {
        assert!(matches!(
            Resource::parse("standings", None),
            Err(CatalogError::MissingParam { .. })
        ));
        assert!(matches!(
            Resource::parse("competitions", Some("1")),
            Err(CatalogError::UnexpectedParam { .. })
        ));
        assert!(matches!(
            Resource::parse("matches", Some("15/10/2025")),
            Err(CatalogError::InvalidParam { .. })
        ));
        assert!(matches!(
            Resource::parse("team-matches", Some("-4")),
            Err(CatalogError::InvalidParam { .. })
        ));
    }

    #[test]
    fn overrides_apply_and_are_validated() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "standings".to_string(),
            PolicyOverride {
                stale_after: Some(Duration::from_secs(60)),
                expire_after: None,
            },
        );
        let catalog = Catalog::with_overrides(&overrides).unwrap();
        assert_eq!(
            catalog.policy(ResourceType::Standings),
            FreshnessPolicy::new(Duration::from_secs(60), minutes(30))
        );

        overrides.insert(
            "matches".to_string(),
            PolicyOverride {
                stale_after: Some(Duration::from_secs(300)),
                expire_after: Some(Duration::from_secs(300)),
            },
        );
        assert!(matches!(
            Catalog::with_overrides(&overrides),
            Err(CatalogError::InvalidPolicy { .. })
        ));

        let mut unknown = HashMap::new();
        unknown.insert("scorers".to_string(), PolicyOverride::default());
        assert!(matches!(
            Catalog::with_overrides(&unknown),
            Err(CatalogError::UnknownResourceType(_))
        ));
    }
}
