//! Host environment detection.
//!
//! A public host identity (by default the `FLY_APP_NAME` env var) means the
//! process runs on a hosted, resource-constrained machine that suspends idle
//! instances: the heartbeat is enabled, semantic repair is disabled and the
//! output root moves to the mounted volume.

use std::path::PathBuf;

use crate::config::{AppConfig, expand_home};

/// Placeholder replaced with the host identity in the heartbeat URL.
const HOST_PLACEHOLDER: &str = "{host}";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnvironment {
    /// Public host identity; `None` on a local machine.
    pub public_host: Option<String>,
}

impl HostEnvironment {
    /// Read the host identity from the configured env var.
    pub fn detect(config: &AppConfig) -> Self {
        let public_host = std::env::var(&config.host.identity_var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Self { public_host }
    }

    /// A local, unconstrained host.
    pub fn local() -> Self {
        Self::default()
    }

    pub fn hosted(identity: impl Into<String>) -> Self {
        Self {
            public_host: Some(identity.into()),
        }
    }

    pub fn is_constrained(&self) -> bool {
        self.public_host.is_some()
    }

    /// Health-check URL built from `template`, or `None` without an identity.
    pub fn heartbeat_url(&self, template: &str) -> Option<String> {
        self.public_host
            .as_deref()
            .map(|host| template.replace(HOST_PLACEHOLDER, host))
    }

    /// Resolve the output root for this host.
    ///
    /// Precedence: explicit `paths.output_dir`, then (constrained hosts only)
    /// the output env var or the constrained default, then the local default.
    pub fn output_dir(&self, config: &AppConfig) -> PathBuf {
        let from_env = std::env::var(&config.paths.output_dir_var)
            .ok()
            .filter(|v| !v.trim().is_empty());
        self.output_dir_with(config, from_env)
    }

    fn output_dir_with(&self, config: &AppConfig, from_env: Option<String>) -> PathBuf {
        let paths = &config.paths;
        if !paths.output_dir.trim().is_empty() {
            return expand_home(&paths.output_dir);
        }
        if self.is_constrained() {
            return match from_env {
                Some(dir) => PathBuf::from(dir),
                None => PathBuf::from(&paths.constrained_output_dir),
            };
        }
        expand_home(&paths.local_output_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_host_has_no_heartbeat() {
        let host = HostEnvironment::local();
        assert!(!host.is_constrained());
        assert_eq!(host.heartbeat_url("https://{host}.fly.dev/"), None);
    }

    #[test]
    fn hosted_heartbeat_url() {
        let host = HostEnvironment::hosted("pdf-audit");
        assert!(host.is_constrained());
        assert_eq!(
            host.heartbeat_url("https://{host}.fly.dev/").as_deref(),
            Some("https://pdf-audit.fly.dev/")
        );
    }

    #[test]
    fn output_dir_precedence() {
        let mut config = AppConfig::default();
        let hosted = HostEnvironment::hosted("app");
        let local = HostEnvironment::local();

        assert_eq!(
            hosted.output_dir_with(&config, None),
            PathBuf::from("/data/output")
        );
        assert_eq!(
            hosted.output_dir_with(&config, Some("/mnt/vol".into())),
            PathBuf::from("/mnt/vol")
        );

        config.paths.local_output_dir = "/tmp/local-out".into();
        assert_eq!(
            local.output_dir_with(&config, Some("/mnt/vol".into())),
            PathBuf::from("/tmp/local-out")
        );

        config.paths.output_dir = "/srv/audits".into();
        assert_eq!(
            hosted.output_dir_with(&config, Some("/mnt/vol".into())),
            PathBuf::from("/srv/audits")
        );
    }
}
