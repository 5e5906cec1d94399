//! Postal code resolution and partner coverage validation.
//!
//! Postal codes are resolved to `{city, state}` through an external lookup
//! service; resolutions are cached per code to bound external calls. City and
//! state comparison is case- and accent-insensitive on both sides, because
//! partner-entered coverage lists and the lookup provider disagree on
//! spelling more often than not.

use crate::entities::coverage_area::{self, CoverageKind};
use crate::errors::ServiceError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub city: String,
    pub state: String,
}

/// Outcome of a coverage check. `NotCovered` carries the resolved location so
/// callers can offer nearby alternatives as a fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CoverageDecision {
    Covered,
    NotCovered {
        reason: String,
        resolved: Option<ResolvedLocation>,
    },
}

impl CoverageDecision {
    pub fn is_covered(&self) -> bool {
        matches!(self, CoverageDecision::Covered)
    }
}

#[derive(Debug, Deserialize)]
struct CepLookupResponse {
    #[serde(default)]
    localidade: Option<String>,
    #[serde(default)]
    uf: Option<String>,
    #[serde(default)]
    erro: bool,
}

/// HTTP client for the postal code lookup service, with a per-code cache.
pub struct CepClient {
    http: reqwest::Client,
    base_url: String,
    cache_ttl: Duration,
    cache: DashMap<String, (Instant, Option<ResolvedLocation>)>,
}

impl CepClient {
    pub fn new(base_url: String, cache_ttl: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            cache_ttl,
            cache: DashMap::new(),
        }
    }

    /// Resolve a postal code to a location. `None` means the code could not
    /// be resolved; lookup failures are treated as unresolvable rather than
    /// errors so a flaky provider can never take checkout down.
    #[instrument(skip(self))]
    pub async fn resolve(&self, postal_code: &str) -> Option<ResolvedLocation> {
        let digits: String = postal_code.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() != 8 {
            return None;
        }

        if let Some(entry) = self.cache.get(&digits) {
            let (cached_at, resolved) = entry.value();
            if cached_at.elapsed() < self.cache_ttl {
                debug!(cep = %digits, "postal code cache hit");
                return resolved.clone();
            }
        }

        let resolved = self.fetch(&digits).await;
        self.cache
            .insert(digits, (Instant::now(), resolved.clone()));
        resolved
    }

    async fn fetch(&self, digits: &str) -> Option<ResolvedLocation> {
        let url = format!("{}/{}/json/", self.base_url.trim_end_matches('/'), digits);

        let response = match self.http.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(cep = %digits, error = %e, "postal code lookup request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(cep = %digits, status = %response.status(), "postal code lookup rejected");
            return None;
        }

        let body: CepLookupResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(cep = %digits, error = %e, "postal code lookup returned invalid body");
                return None;
            }
        };

        if body.erro {
            return None;
        }

        match (body.localidade, body.uf) {
            (Some(city), Some(state)) if !city.is_empty() && !state.is_empty() => {
                Some(ResolvedLocation { city, state })
            }
            _ => None,
        }
    }
}

/// Validates a destination postal code against a partner's coverage area.
pub struct CoverageService {
    cep: std::sync::Arc<CepClient>,
}

impl CoverageService {
    pub fn new(cep: std::sync::Arc<CepClient>) -> Self {
        Self { cep }
    }

    /// Checks a destination against all of a partner's coverage areas. A
    /// partner with no declared areas ships nationwide; otherwise any single
    /// matching area is enough.
    pub async fn validate_any(
        &self,
        postal_code: &str,
        areas: &[coverage_area::Model],
    ) -> Result<CoverageDecision, ServiceError> {
        if areas.is_empty() {
            return Ok(CoverageDecision::Covered);
        }

        let resolved = self.cep.resolve(postal_code).await;

        let mut first_rejection = None;
        for area in areas {
            match decide(area, resolved.clone()) {
                CoverageDecision::Covered => return Ok(CoverageDecision::Covered),
                rejection => {
                    first_rejection.get_or_insert(rejection);
                }
            }
        }

        Ok(first_rejection.unwrap_or(CoverageDecision::Covered))
    }
}

/// Coverage rule evaluation against an already-resolved location.
pub fn decide(
    area: &coverage_area::Model,
    resolved: Option<ResolvedLocation>,
) -> CoverageDecision {
    let Some(location) = resolved else {
        return CoverageDecision::NotCovered {
            reason: "postal code not found".to_string(),
            resolved: None,
        };
    };

    let kind = match CoverageKind::from_str(&area.kind) {
        Ok(kind) => kind,
        Err(_) => {
            warn!(kind = %area.kind, "unrecognized coverage kind; treating as not covered");
            return CoverageDecision::NotCovered {
                reason: format!("unrecognized coverage kind \"{}\"", area.kind),
                resolved: Some(location),
            };
        }
    };

    match kind {
        CoverageKind::Country => CoverageDecision::Covered,
        CoverageKind::State => {
            let wanted = location.state.trim().to_uppercase();
            let allowed = area
                .state_list()
                .iter()
                .any(|s| s.trim().to_uppercase() == wanted);
            if allowed {
                CoverageDecision::Covered
            } else {
                CoverageDecision::NotCovered {
                    reason: format!("state {} is outside the partner's service area", wanted),
                    resolved: Some(location),
                }
            }
        }
        CoverageKind::City => {
            let wanted = normalize_place(&location.city);
            let allowed = area
                .city_list()
                .iter()
                .any(|c| normalize_place(c) == wanted);
            if allowed {
                CoverageDecision::Covered
            } else {
                CoverageDecision::NotCovered {
                    reason: format!(
                        "{} is outside the partner's service area",
                        location.city.trim()
                    ),
                    resolved: Some(location),
                }
            }
        }
    }
}

/// Uppercases, strips diacritics and collapses internal whitespace so that
/// "São  Paulo" and "sao paulo" compare equal.
pub fn normalize_place(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = true;

    for c in input.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
            continue;
        }
        last_was_space = false;
        out.push(fold_diacritic(c).to_ascii_uppercase());
    }

    while out.ends_with(' ') {
        out.pop();
    }
    out
}

fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ç' | 'Ç' => 'c',
        'ñ' | 'Ñ' => 'n',
        other => other,
    }
}
