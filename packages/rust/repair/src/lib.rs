//! Automated document repair.
//!
//! This crate provides:
//! - [`technical`] — the deterministic Ghostscript rewrite
//! - [`semantic`] — extraction, image description and PDF/UA re-rendering
//! - [`models`] — the helper models used by semantic reconstruction
//!
//! [`RepairOrchestrator`] picks one of the two paths per document and never
//! lets an error escape: every failure is logged and reported as `false`.

pub mod models;
pub mod semantic;
pub mod technical;

use std::path::Path;

use serde::Serialize;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tracing::{info, instrument, warn};

use pdfaudit_shared::{HostEnvironment, RepairConfig};

pub use models::{
    CommandCaptioner, CommandTranslator, FALLBACK_CAPTION, ImageCaptioner, LanguageDetector,
    ModelHandles, StopwordDetector, Translator,
};
pub use semantic::SemanticReconstructor;
pub use technical::TechnicalFixer;

/// Repair path chosen for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairMode {
    Technical,
    Semantic,
}

impl RepairMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Semantic => "semantic",
        }
    }
}

/// Semantic reconstruction only when requested, with enough memory, on an
/// unconstrained host.
pub fn select_mode(force_ai: bool, memory_bytes: u64, min_bytes: u64, constrained: bool) -> RepairMode {
    if force_ai && memory_bytes >= min_bytes && !constrained {
        RepairMode::Semantic
    } else {
        RepairMode::Technical
    }
}

/// Total physical memory of this machine in bytes.
pub fn host_memory_bytes() -> u64 {
    let system = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
    );
    system.total_memory()
}

#[derive(Debug, Clone)]
pub struct RepairOrchestrator {
    host: HostEnvironment,
    min_memory_bytes: u64,
    memory_bytes: u64,
    technical: TechnicalFixer,
    semantic: SemanticReconstructor,
}

impl RepairOrchestrator {
    /// Build an orchestrator, probing host memory once.
    pub fn new(config: &RepairConfig, host: HostEnvironment, models: ModelHandles) -> Self {
        Self::with_memory(config, host, models, host_memory_bytes())
    }

    pub fn with_memory(
        config: &RepairConfig,
        host: HostEnvironment,
        models: ModelHandles,
        memory_bytes: u64,
    ) -> Self {
        let technical = TechnicalFixer::new(
            config.ghostscript_command.clone(),
            config.technical_timeout,
        );
        let semantic = SemanticReconstructor::new(
            config.extraction_command.clone(),
            config.renderer_command.clone(),
            config.semantic_timeout,
            models,
            technical.clone(),
        );
        Self {
            host,
            min_memory_bytes: config.min_memory_bytes,
            memory_bytes,
            technical,
            semantic,
        }
    }

    pub fn mode_for(&self, force_ai: bool) -> RepairMode {
        select_mode(
            force_ai,
            self.memory_bytes,
            self.min_memory_bytes,
            self.host.is_constrained(),
        )
    }

    /// Repair `input` into `output`. Returns whether a repaired file was
    /// written.
    #[instrument(skip_all, fields(input = %input.display(), force_ai = force_ai))]
    pub async fn repair(&self, input: &Path, output: &Path, force_ai: bool) -> bool {
        let mode = self.mode_for(force_ai);
        if force_ai && mode == RepairMode::Technical {
            info!(
                memory_gb = self.memory_bytes as f64 / 1_073_741_824.0,
                constrained = self.host.is_constrained(),
                "semantic repair unavailable on this host, using technical fix"
            );
        }

        let result = match mode {
            RepairMode::Technical => self.technical.fix(input, output).await,
            RepairMode::Semantic => self.semantic.reconstruct(input, output).await,
        };

        match result {
            Ok(()) => {
                info!(mode = mode.as_str(), output = %output.display(), "document repaired");
                true
            }
            Err(e) => {
                warn!(mode = mode.as_str(), error = %e, "repair failed");
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fake_gs;
    use pdfaudit_shared::AppConfig;
    use std::time::Duration;

    const GB: u64 = 1024 * 1024 * 1024;

    fn config() -> RepairConfig {
        let mut config = RepairConfig::from(&AppConfig::default());
        config.ghostscript_command = fake_gs();
        config.technical_timeout = Duration::from_secs(5);
        config.extraction_command = vec!["sh".into(), "-c".into(), "exit 1".into()];
        config
    }

    #[test]
    fn semantic_needs_request_memory_and_free_host() {
        assert_eq!(select_mode(true, 8 * GB, 4 * GB, false), RepairMode::Semantic);
        assert_eq!(select_mode(true, 4 * GB, 4 * GB, false), RepairMode::Semantic);
        assert_eq!(select_mode(false, 8 * GB, 4 * GB, false), RepairMode::Technical);
        assert_eq!(select_mode(true, 2 * GB, 4 * GB, false), RepairMode::Technical);
        assert_eq!(select_mode(true, 8 * GB, 4 * GB, true), RepairMode::Technical);
    }

    #[test]
    fn mode_follows_host() {
        let models = ModelHandles::from_config(&config());
        let local = RepairOrchestrator::with_memory(&config(), HostEnvironment::local(), models.clone(), 16 * GB);
        assert_eq!(local.mode_for(true), RepairMode::Semantic);

        let hosted = RepairOrchestrator::with_memory(&config(), HostEnvironment::hosted("app"), models, 16 * GB);
        assert_eq!(hosted.mode_for(true), RepairMode::Technical);
    }

    #[tokio::test]
    async fn technical_repair_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.pdf");
        let output = dir.path().join("repaired").join("a.pdf");
        std::fs::write(&input, b"%PDF-1.7").unwrap();

        let orchestrator = RepairOrchestrator::with_memory(
            &config(),
            HostEnvironment::local(),
            ModelHandles::from_config(&config()),
            GB,
        );
        assert!(orchestrator.repair(&input, &output, true).await);
        assert!(output.exists());
    }

    #[tokio::test]
    async fn semantic_failure_is_reported_as_false() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.pdf");
        let output = dir.path().join("out.pdf");
        std::fs::write(&input, b"%PDF-1.7").unwrap();

        let orchestrator = RepairOrchestrator::with_memory(
            &config(),
            HostEnvironment::local(),
            ModelHandles::from_config(&config()),
            16 * GB,
        );
        assert!(!orchestrator.repair(&input, &output, true).await);
        assert!(!output.exists());
    }

    #[test]
    fn memory_probe_reports_something() {
        assert!(host_memory_bytes() > 0);
    }
}
