//! Logical test image names and their registry paths per environment.

use crate::errors::DriverError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Images pulled straight from Docker Hub.
    Public,
    /// Images served from a private mirror registry.
    Mirror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TestImage {
    Busybox,
    Alpine,
    Debian,
    Ubuntu,
    Nginx,
    Redis,
}

impl TestImage {
    pub const ALL: [TestImage; 6] = [
        Self::Busybox,
        Self::Alpine,
        Self::Debian,
        Self::Ubuntu,
        Self::Nginx,
        Self::Redis,
    ];

    pub fn repository(self) -> &'static str {
        match self {
            Self::Busybox => "busybox",
            Self::Alpine => "alpine",
            Self::Debian => "debian",
            Self::Ubuntu => "ubuntu",
            Self::Nginx => "nginx",
            Self::Redis => "redis",
        }
    }
}

/// Registry path for `image` in `environment`. `registry` is required for
/// the mirror environment and ignored otherwise.
pub fn image_ref(
    environment: Environment,
    registry: Option<&str>,
    image: TestImage,
) -> Result<String, DriverError> {
    match environment {
        Environment::Public => Ok(image.repository().to_string()),
        Environment::Mirror => {
            let host = registry
                .map(|r| r.trim().trim_end_matches('/'))
                .filter(|r| !r.is_empty())
                .ok_or_else(|| {
                    DriverError::InvalidConfig(
                        "images.mirror_registry is required for the mirror environment"
                            .to_string(),
                    )
                })?;
            Ok(format!("{host}/library/{}", image.repository()))
        }
    }
}

pub fn catalog(
    environment: Environment,
    registry: Option<&str>,
) -> Result<BTreeMap<TestImage, String>, DriverError> {
    TestImage::ALL
        .into_iter()
        .map(|image| image_ref(environment, registry, image).map(|path| (image, path)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_environment_uses_bare_repositories() {
        let images = catalog(Environment::Public, Some("ignored.example")).expect("catalog");
        assert_eq!(images.len(), TestImage::ALL.len());
        assert_eq!(images[&TestImage::Busybox], "busybox");
        assert_eq!(images[&TestImage::Nginx], "nginx");
    }

    #[test]
    fn mirror_environment_prefixes_registry_host() {
        let images = catalog(Environment::Mirror, Some("harbor.ci.local:443/")).expect("catalog");
        assert_eq!(images[&TestImage::Alpine], "harbor.ci.local:443/library/alpine");
    }

    #[test]
    fn mirror_without_registry_is_rejected() {
        for registry in [None, Some(""), Some("  ")] {
            let err = image_ref(Environment::Mirror, registry, TestImage::Redis)
                .expect_err("missing registry");
            assert!(matches!(err, DriverError::InvalidConfig(_)));
        }
    }
}
