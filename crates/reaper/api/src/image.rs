use core::fmt;

use k8s_openapi::api::core::v1::LocalObjectReference;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";

/// Describes a container image and how to pull it from its remote repository.
/// Every field is optional; unset fields are filled in by [`Image::resolve`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// The registry to use. Defaults to "docker.io", the official Docker Hub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    /// The repository to use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// The image name to use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The image tag to use. Defaults to "latest".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// The image pull policy to use. Defaults to "Always" if the resolved tag
    /// is "latest", otherwise to "IfNotPresent".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<PullPolicy>,

    /// The secret to use when pulling the image from a private repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secret_ref: Option<LocalObjectReference>,
}

#[derive(
    Copy, Clone, Debug, Display, EnumString, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub enum PullPolicy {
    Always,
    IfNotPresent,
    Never,
}

/// A fully-qualified image reference; the total outcome of [`Image::resolve`].
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedImage {
    pub registry: String,
    pub repository: String,
    pub name: String,
    pub tag: String,
    pub pull_policy: PullPolicy,
    pub pull_secret_ref: Option<LocalObjectReference>,
}

impl fmt::Display for ResolvedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            registry,
            repository,
            name,
            tag,
            ..
        } = self;
        write!(f, "{registry}/{repository}/{name}:{tag}")
    }
}

impl Image {
    /// Resolves an optional user-provided image against the given defaults.
    ///
    /// Field-by-field precedence: an explicit value on the override wins, then
    /// an explicit value on the defaults, then a hard fallback. The registry
    /// falls back to [`DEFAULT_REGISTRY`] and the tag to [`DEFAULT_TAG`]. The
    /// pull policy falls back to `Always` when the resolved tag is "latest"
    /// and `IfNotPresent` otherwise.
    pub fn resolve(image: Option<&Self>, defaults: &Self) -> ResolvedImage {
        let field = |f: fn(&Self) -> Option<String>| {
            image.and_then(f).or_else(|| f(defaults)).unwrap_or_default()
        };

        let tag = image
            .and_then(|image| image.tag.clone())
            .or_else(|| defaults.tag.clone())
            .unwrap_or_else(|| DEFAULT_TAG.into());
        let pull_policy = image
            .and_then(|image| image.pull_policy)
            .or(defaults.pull_policy)
            .unwrap_or(if tag == DEFAULT_TAG {
                PullPolicy::Always
            } else {
                PullPolicy::IfNotPresent
            });

        ResolvedImage {
            registry: image
                .and_then(|image| image.registry.clone())
                .or_else(|| defaults.registry.clone())
                .unwrap_or_else(|| DEFAULT_REGISTRY.into()),
            repository: field(|image| image.repository.clone()),
            name: field(|image| image.name.clone()),
            tag,
            pull_policy,
            pull_secret_ref: image
                .and_then(|image| image.pull_secret_ref.clone())
                .or_else(|| defaults.pull_secret_ref.clone()),
        }
    }
}

/// Returns the secret references required to pull all the given images,
/// de-duplicated by secret name in first-seen order. The result is empty if
/// none of the images requires a secret to be successfully pulled.
pub fn collect_pull_secrets(images: &[&ResolvedImage]) -> Vec<LocalObjectReference> {
    let mut secrets: Vec<LocalObjectReference> = Vec::new();
    for image in images {
        if let Some(secret) = &image.pull_secret_ref {
            if !secrets.iter().any(|s| s.name == secret.name) {
                secrets.push(secret.clone());
            }
        }
    }
    secrets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Image {
        Image {
            registry: None,
            repository: Some("thelastpickle".into()),
            name: Some("cassandra-reaper".into()),
            tag: Some("3.1.0".into()),
            pull_policy: None,
            pull_secret_ref: None,
        }
    }

    #[test]
    fn resolve_is_total_and_deterministic() {
        let first = Image::resolve(None, &Image::default());
        let second = Image::resolve(None, &Image::default());
        assert_eq!(first, second);
        assert_eq!(first.registry, DEFAULT_REGISTRY);
        assert_eq!(first.tag, DEFAULT_TAG);
        assert_eq!(first.pull_policy, PullPolicy::Always);
        assert_eq!(first.to_string(), "docker.io//:latest");
    }

    #[test]
    fn resolve_prefers_override_fields() {
        let image = Image {
            registry: Some("registry.example.com".into()),
            name: Some("cassandra-reaper-custom".into()),
            tag: Some("4.0.0".into()),
            ..Default::default()
        };
        let resolved = Image::resolve(Some(&image), &defaults());
        assert_eq!(
            resolved.to_string(),
            "registry.example.com/thelastpickle/cassandra-reaper-custom:4.0.0"
        );
        assert_eq!(resolved.pull_policy, PullPolicy::IfNotPresent);
    }

    #[test]
    fn latest_tag_defaults_to_pull_always() {
        let image = Image {
            name: Some("cassandra-reaper-custom".into()),
            ..Default::default()
        };
        let defaults = Image {
            tag: None,
            ..defaults()
        };
        let resolved = Image::resolve(Some(&image), &defaults);
        assert_eq!(resolved.tag, "latest");
        assert_eq!(resolved.pull_policy, PullPolicy::Always);
    }

    #[test]
    fn explicit_policy_beats_tag_rule() {
        let image = Image {
            tag: Some("latest".into()),
            pull_policy: Some(PullPolicy::Never),
            ..Default::default()
        };
        let resolved = Image::resolve(Some(&image), &defaults());
        assert_eq!(resolved.pull_policy, PullPolicy::Never);

        let defaults = Image {
            pull_policy: Some(PullPolicy::IfNotPresent),
            tag: None,
            ..defaults()
        };
        let resolved = Image::resolve(None, &defaults);
        assert_eq!(resolved.tag, "latest");
        assert_eq!(resolved.pull_policy, PullPolicy::IfNotPresent);
    }

    #[test]
    fn pull_secrets_are_deduplicated_in_first_seen_order() {
        let main = ResolvedImage {
            pull_secret_ref: Some(LocalObjectReference {
                name: Some("main-secret".into()),
            }),
            ..Image::resolve(None, &defaults())
        };
        let init = ResolvedImage {
            pull_secret_ref: Some(LocalObjectReference {
                name: Some("main-secret".into()),
            }),
            ..Image::resolve(None, &defaults())
        };
        let other = ResolvedImage {
            pull_secret_ref: Some(LocalObjectReference {
                name: Some("other-secret".into()),
            }),
            ..Image::resolve(None, &defaults())
        };

        let secrets = collect_pull_secrets(&[&main, &init, &other]);
        assert_eq!(
            secrets
                .iter()
                .filter_map(|s| s.name.as_deref())
                .collect::<Vec<_>>(),
            vec!["main-secret", "other-secret"],
        );

        assert!(collect_pull_secrets(&[&Image::resolve(None, &defaults())]).is_empty());
    }
}
