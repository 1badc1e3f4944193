/// Chrome match patterns (`*://*.example.com/*`) for content-script injection
use crate::config::ContentScriptConfig;
use regex::Regex;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchPatternError {
    #[error("match pattern {0:?} is missing a scheme separator")]
    MissingScheme(String),
    #[error("match pattern {0:?} has unsupported scheme")]
    InvalidScheme(String),
    #[error("match pattern {0:?} is missing a path")]
    MissingPath(String),
    #[error("match pattern {0:?} has an invalid host")]
    InvalidHost(String),
    #[error("match pattern {0:?} has an invalid path: {1}")]
    InvalidPath(String, String),
}

#[derive(Debug, Clone)]
enum HostPattern {
    Any,
    /// `*.example.com`: the domain itself and any subdomain
    Subdomains(String),
    Exact(String),
}

#[derive(Debug, Clone)]
pub struct MatchPattern {
    source: String,
    all_urls: bool,
    schemes: Vec<String>,
    host: HostPattern,
    path: Regex,
}

const WILDCARD_SCHEMES: &[&str] = &["http", "https"];
const KNOWN_SCHEMES: &[&str] = &["http", "https", "file", "ftp", "ws", "wss"];

impl MatchPattern {
    pub fn parse(pattern: &str) -> Result<MatchPattern, MatchPatternError> {
        if pattern == "<all_urls>" {
            return Ok(MatchPattern {
                source: pattern.to_string(),
                all_urls: true,
                schemes: KNOWN_SCHEMES.iter().map(|s| s.to_string()).collect(),
                host: HostPattern::Any,
                path: glob_to_regex(pattern, "/*")?,
            });
        }

        let (scheme, rest) = pattern
            .split_once("://")
            .ok_or_else(|| MatchPatternError::MissingScheme(pattern.to_string()))?;

        let schemes: Vec<String> = match scheme {
            "*" => WILDCARD_SCHEMES.iter().map(|s| s.to_string()).collect(),
            s if KNOWN_SCHEMES.contains(&s) => vec![s.to_string()],
            _ => return Err(MatchPatternError::InvalidScheme(pattern.to_string())),
        };

        let slash = rest
            .find('/')
            .ok_or_else(|| MatchPatternError::MissingPath(pattern.to_string()))?;
        let (host, path) = rest.split_at(slash);

        let host = match host {
            "*" => HostPattern::Any,
            "" if scheme == "file" => HostPattern::Any,
            h if h.starts_with("*.") && !h[2..].is_empty() && !h[2..].contains('*') => {
                HostPattern::Subdomains(h[2..].to_lowercase())
            }
            h if !h.is_empty() && !h.contains('*') => HostPattern::Exact(h.to_lowercase()),
            _ => return Err(MatchPatternError::InvalidHost(pattern.to_string())),
        };

        Ok(MatchPattern {
            source: pattern.to_string(),
            all_urls: false,
            schemes,
            host,
            path: glob_to_regex(pattern, path)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, href: &str) -> bool {
        let Ok(url) = Url::parse(href) else {
            return false;
        };

        if !self.schemes.iter().any(|s| s == url.scheme()) {
            return false;
        }

        let host = url.host_str().unwrap_or("").to_lowercase();
        let host_ok = match &self.host {
            HostPattern::Any => true,
            HostPattern::Exact(expected) => host == *expected,
            HostPattern::Subdomains(domain) => {
                host == *domain || host.ends_with(&format!(".{}", domain))
            }
        };
        if !host_ok {
            return false;
        }

        if self.all_urls {
            return true;
        }

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        self.path.is_match(&path)
    }
}

fn glob_to_regex(pattern: &str, glob: &str) -> Result<Regex, MatchPatternError> {
    let body = glob
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
        .map_err(|e| MatchPatternError::InvalidPath(pattern.to_string(), e.to_string()))
}

/// The compiled `content_scripts.matches` list
#[derive(Debug, Clone)]
pub struct ContentScriptMatcher {
    patterns: Vec<MatchPattern>,
}

impl ContentScriptMatcher {
    pub fn from_config(config: &ContentScriptConfig) -> Result<Self, MatchPatternError> {
        let patterns = config
            .matches
            .iter()
            .map(|pattern| MatchPattern::parse(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ContentScriptMatcher { patterns })
    }

    pub fn matches(&self, href: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(href))
    }
}
