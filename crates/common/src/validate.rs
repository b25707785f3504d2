//! Request validation
//!
//! Everything here runs before a run exists; a rejection never touches the
//! registry.

use url::Url;

use crate::error::ValidationError;
use crate::types::Agent;

const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// Validate a target URL and return it trimmed.
pub fn validate_url(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingUrl);
    }

    let parsed = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            return Err(ValidationError::MissingScheme)
        }
        Err(e) => return Err(ValidationError::MalformedUrl(e.to_string())),
    };

    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(ValidationError::UnsupportedScheme(parsed.scheme().to_string()));
    }

    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(trimmed.to_string()),
        _ => Err(ValidationError::MissingHost),
    }
}

/// Validate requested agent names.
///
/// `None` selects every agent. Duplicates collapse onto their first
/// occurrence.
pub fn validate_agents(requested: Option<&[String]>) -> Result<Vec<Agent>, ValidationError> {
    let Some(names) = requested else {
        return Ok(Agent::ALL.to_vec());
    };

    if names.is_empty() {
        return Err(ValidationError::NoAgents);
    }

    let mut agents = Vec::with_capacity(names.len());
    let mut unknown = Vec::new();
    for name in names {
        match name.parse::<Agent>() {
            Ok(agent) if !agents.contains(&agent) => agents.push(agent),
            Ok(_) => {}
            Err(bad) => unknown.push(bad),
        }
    }

    if !unknown.is_empty() {
        return Err(ValidationError::UnknownAgents(unknown));
    }

    Ok(agents)
}
