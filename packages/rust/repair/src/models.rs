//! Helper models used by semantic reconstruction.
//!
//! [`ModelHandles`] is built once per process and shared by every repair.
//! The defaults are lightweight: a stop-word language detector plus
//! command-backed captioning and translation that degrade to fixed fallbacks.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use pdfaudit_shared::{RepairConfig, run_command};

/// Caption used when no captioning model is available or it fails.
pub const FALLBACK_CAPTION: &str = "Visual representation";

/// Texts shorter than this (in characters) are not classified.
const MIN_DETECTABLE_CHARS: usize = 20;

/// Timeout for a single caption or translation call.
const HELPER_TIMEOUT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Detects the main language of a text as an ISO 639-1 code.
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> String;
}

/// Describes an image in English.
#[async_trait]
pub trait ImageCaptioner: Send + Sync {
    async fn caption(&self, image: &Path) -> String;
}

/// Translates English text into a target language.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_lang: &str) -> String;
}

/// Helper models handed to the repair orchestrator.
#[derive(Clone)]
pub struct ModelHandles {
    pub detector: Arc<dyn LanguageDetector>,
    pub captioner: Arc<dyn ImageCaptioner>,
    pub translator: Arc<dyn Translator>,
}

impl ModelHandles {
    pub fn from_config(config: &RepairConfig) -> Self {
        Self {
            detector: Arc::new(StopwordDetector::new(&config.default_language)),
            captioner: Arc::new(CommandCaptioner::new(config.captioner_command.clone())),
            translator: Arc::new(CommandTranslator::new(config.translator_command.clone())),
        }
    }
}

impl std::fmt::Debug for ModelHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandles").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// StopwordDetector
// ---------------------------------------------------------------------------

/// Stop-word lists, in tie-break order.
const STOPWORDS: &[(&str, &[&str])] = &[
    (
        "de",
        &[
            "der", "die", "und", "das", "ist", "nicht", "mit", "für", "ein", "eine", "zu", "den",
            "auf", "sich", "wir", "werden", "auch",
        ],
    ),
    (
        "en",
        &[
            "the", "and", "is", "of", "to", "in", "that", "for", "with", "are", "this", "on",
            "be", "was", "by",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "et", "est", "des", "une", "pour", "dans", "que", "pas", "sur",
            "au", "du",
        ],
    ),
    (
        "es",
        &[
            "el", "los", "las", "y", "es", "una", "para", "por", "con", "del", "que", "en",
        ],
    ),
    (
        "it",
        &[
            "il", "di", "che", "e", "per", "una", "non", "sono", "con", "della", "gli",
        ],
    ),
    (
        "nl",
        &[
            "het", "een", "en", "van", "is", "dat", "niet", "met", "voor", "op", "zijn",
        ],
    ),
];

/// Picks the language whose stop words occur most often.
#[derive(Debug, Clone)]
pub struct StopwordDetector {
    default_language: String,
}

impl StopwordDetector {
    pub fn new(default_language: &str) -> Self {
        Self {
            default_language: default_language.to_string(),
        }
    }
}

impl LanguageDetector for StopwordDetector {
    fn detect(&self, text: &str) -> String {
        if text.trim().chars().count() < MIN_DETECTABLE_CHARS {
            return self.default_language.clone();
        }

        let words: Vec<String> = text
            .split(|c: char| !c.is_alphabetic())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut best: Option<(&str, usize)> = None;
        for &(lang, list) in STOPWORDS {
            let list: HashSet<&str> = list.iter().copied().collect();
            let hits = words.iter().filter(|w| list.contains(w.as_str())).count();
            if hits > 0 && best.is_none_or(|(_, b)| hits > b) {
                best = Some((lang, hits));
            }
        }

        match best {
            Some((lang, hits)) => {
                debug!(lang, hits, "document language detected");
                lang.to_string()
            }
            None => self.default_language.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// CommandCaptioner
// ---------------------------------------------------------------------------

/// Runs an external captioning command with the image path appended.
#[derive(Debug, Clone)]
pub struct CommandCaptioner {
    command: Vec<String>,
}

impl CommandCaptioner {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ImageCaptioner for CommandCaptioner {
    async fn caption(&self, image: &Path) -> String {
        if self.command.is_empty() {
            return FALLBACK_CAPTION.to_string();
        }

        let arg = image.to_string_lossy().into_owned();
        match run_command(&self.command, &[arg], HELPER_TIMEOUT).await {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
                capitalize(out.stdout.trim())
            }
            Ok(out) => {
                warn!(image = %image.display(), exit = ?out.exit_code, "captioner produced no caption");
                FALLBACK_CAPTION.to_string()
            }
            Err(e) => {
                warn!(image = %image.display(), error = %e, "captioner failed");
                FALLBACK_CAPTION.to_string()
            }
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// CommandTranslator
// ---------------------------------------------------------------------------

/// Runs an external translation command with target language and text appended.
#[derive(Debug, Clone)]
pub struct CommandTranslator {
    command: Vec<String>,
}

impl CommandTranslator {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Translator for CommandTranslator {
    async fn translate(&self, text: &str, target_lang: &str) -> String {
        if text.is_empty() || target_lang == "en" || self.command.is_empty() {
            return text.to_string();
        }

        let extra = [target_lang.to_string(), text.to_string()];
        match run_command(&self.command, &extra, HELPER_TIMEOUT).await {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
                out.stdout.trim().to_string()
            }
            Ok(out) => {
                warn!(target_lang, exit = ?out.exit_code, "translation produced no text");
                text.to_string()
            }
            Err(e) => {
                warn!(target_lang, error = %e, "translation failed");
                text.to_string()
            }
        }
    }
}
