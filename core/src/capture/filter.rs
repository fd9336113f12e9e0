use std::collections::HashSet;

use crate::config::FilterConfig;
use crate::util::normalize_domain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Excluded,
    /// `track_only_configured_sites` with an empty include list.
    NoSitesConfigured,
    NotIncluded,
    TypeNotIncluded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject(RejectReason),
}

impl Admission {
    pub fn is_admit(self) -> bool {
        matches!(self, Self::Admit)
    }
}

/// Admission policy over `(resource_type, domain)`.
///
/// Precedence: exclusions, then the include list (whose empty meaning depends
/// on `track_only_configured_sites`), then resource types.
#[derive(Debug, Clone, Default)]
pub struct FilterEvaluator {
    include_types: HashSet<String>,
    include_domains: Vec<String>,
    exclude_domains: Vec<String>,
    track_only_configured_sites: bool,
}

impl FilterEvaluator {
    pub fn new(cfg: &FilterConfig) -> Self {
        let clean = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|d| normalize_domain(d))
                .filter(|d| !d.is_empty())
                .collect()
        };
        Self {
            include_types: cfg
                .include_types
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            include_domains: clean(&cfg.include_domains),
            exclude_domains: clean(&cfg.exclude_domains),
            track_only_configured_sites: cfg.track_only_configured_sites,
        }
    }

    pub fn evaluate(&self, resource_type: &str, domain: &str) -> Admission {
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();

        if self.exclude_domains.iter().any(|d| covers(d, &domain)) {
            return Admission::Reject(RejectReason::Excluded);
        }

        if self.track_only_configured_sites && self.include_domains.is_empty() {
            return Admission::Reject(RejectReason::NoSitesConfigured);
        }

        if !self.include_domains.is_empty()
            && !self.include_domains.iter().any(|d| covers(d, &domain))
        {
            return Admission::Reject(RejectReason::NotIncluded);
        }

        if !self.include_types.is_empty()
            && !self
                .include_types
                .contains(&resource_type.trim().to_ascii_lowercase())
        {
            return Admission::Reject(RejectReason::TypeNotIncluded);
        }

        Admission::Admit
    }
}

/// `configured` covers the domain itself and every subdomain of it.
fn covers(configured: &str, domain: &str) -> bool {
    domain == configured
        || domain
            .strip_suffix(configured)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
