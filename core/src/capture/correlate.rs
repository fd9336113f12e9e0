//! Telemetry-to-transaction pairing.
//!
//! The telemetry channel does not always carry the transaction id. When it
//! does not, a sample is paired with the record whose url matches and whose
//! start time is closest to the sample's, within a tolerance. This is a
//! best-effort heuristic: two near-simultaneous requests to the same url can
//! be swapped. That approximation is accepted and kept in this one place.

use chrono::{DateTime, Duration, Utc};

use super::model::TelemetrySample;

#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub id: &'a str,
    pub url: &'a str,
    pub started_at: DateTime<Utc>,
    /// Already received a sample; used only when nothing fresher matches.
    pub has_telemetry: bool,
}

/// Returns the id of the best candidate for `sample`, if any lies within
/// `tolerance`. Records without telemetry are preferred, then the smallest
/// start-time distance, then the lowest id for a stable result.
pub fn match_sample<'a, I>(
    sample: &TelemetrySample,
    candidates: I,
    tolerance: Duration,
) -> Option<&'a str>
where
    I: IntoIterator<Item = Candidate<'a>>,
{
    let wanted = comparable_url(&sample.url);
    candidates
        .into_iter()
        .filter(|c| comparable_url(c.url) == wanted)
        .filter_map(|c| {
            let delta = c.started_at - sample.observed_at;
            let distance = if delta < Duration::zero() { -delta } else { delta };
            (distance <= tolerance).then_some((c.has_telemetry, distance, c.id))
        })
        .min()
        .map(|(_, _, id)| id)
}

/// Urls compare without their fragment; telemetry channels commonly drop it.
pub fn comparable_url(url: &str) -> &str {
    let trimmed = url.trim();
    match trimmed.find('#') {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    }
}
