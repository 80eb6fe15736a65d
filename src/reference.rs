//! Image reference parsing and the base/target preconditions of an append.
//!
//! References look like `localhost:5000/my-alpine:latest`. The tag is
//! mandatory: appending to an implicit `latest` is too easy to get wrong.

use crate::error::AppendError;
use anyhow::Result;
use std::fmt;

/// Registry assumed when the first path component is not a host name.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Host names that refer to Docker Hub.
const DOCKER_HUB_ALIASES: &[&str] = &[DEFAULT_REGISTRY, "index.docker.io", "registry-1.docker.io"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, with port when one was given (e.g. `localhost:5000`)
    pub registry: String,
    /// Repository path inside the registry (e.g. `my-alpine`, `library/nginx`)
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason: &str| AppendError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let reference_trimmed = reference.trim();
        if reference_trimmed.is_empty() {
            return Err(invalid("reference is empty").into());
        }
        if reference_trimmed.contains('@') {
            return Err(invalid("digest references cannot be tagged; use name:tag").into());
        }

        // The tag separator is the last ':' after the last '/', so a registry
        // port is never mistaken for a tag.
        let last_slash = reference_trimmed.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match reference_trimmed[last_slash..].rfind(':') {
            Some(colon) => {
                let split_at = last_slash + colon;
                (
                    &reference_trimmed[..split_at],
                    &reference_trimmed[split_at + 1..],
                )
            }
            None => return Err(invalid("missing ':tag'").into()),
        };

        if tag.is_empty() {
            return Err(invalid("tag is empty").into());
        }
        if !is_valid_tag(tag) {
            return Err(invalid("tag may only contain [A-Za-z0-9_.-] and be at most 128 characters").into());
        }
        if name.is_empty() {
            return Err(invalid("repository name is empty").into());
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if looks_like_host(first) => (first, rest),
            _ => (DEFAULT_REGISTRY, name),
        };
        let registry = if DOCKER_HUB_ALIASES.contains(&registry) {
            DEFAULT_REGISTRY.to_string()
        } else {
            registry.to_string()
        };
        // Official Docker Hub images live under `library/`.
        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository.to_string()
        };

        if repository.is_empty() || repository.split('/').any(|c| c.is_empty()) {
            return Err(invalid("repository path has an empty component").into());
        }
        if repository.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("repository path must be lowercase").into());
        }

        Ok(Self {
            registry,
            repository,
            tag: tag.to_string(),
        })
    }

    /// `registry/repository`, without the tag.
    pub fn repository_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Returns the same repository with a different tag.
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl std::str::FromStr for ImageReference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Checks that `target` can be produced from `base` by appending a layer.
///
/// Blobs are only shared within one repository, and the base tag must stay
/// untouched so that the source image remains available.
pub fn check_append_target(base: &ImageReference, target: &ImageReference) -> Result<()> {
    if base.repository_name() != target.repository_name() {
        return Err(AppendError::RepositoryMismatch {
            base: base.repository_name(),
            target: target.repository_name(),
        }
        .into());
    }
    if base.tag == target.tag {
        return Err(AppendError::TagUnchanged {
            tag: target.tag.clone(),
        }
        .into());
    }
    Ok(())
}

fn looks_like_host(component: &str) -> bool {
    component == "localhost" || component.contains('.') || component.contains(':')
}

fn is_valid_tag(tag: &str) -> bool {
    tag.len() <= 128
        && !tag.starts_with(['.', '-'])
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}
