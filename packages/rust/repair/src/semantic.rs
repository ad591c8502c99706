//! Semantic reconstruction: extract the document to HTML, describe every
//! image, tag the language, render a fresh PDF/UA file and run the technical
//! fix on the result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use scraper::Html;
use tracing::{debug, info, instrument};

use pdfaudit_shared::{AuditError, Result, run_command};

use crate::models::ModelHandles;
use crate::technical::{TechnicalFixer, last_line, program_name};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

static IMG_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<img\b[^>]*>").expect("img tag regex"));

static SRC_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("src attr regex")
});

static ALT_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\salt\s*=\s*(?:"[^"]*"|'[^']*')"#).expect("alt attr regex")
});

static HTML_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<html\b[^>]*>").expect("html tag regex"));

static LANG_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\slang\s*=\s*(?:"[^"]*"|'[^']*')"#).expect("lang attr regex")
});

#[derive(Debug, Clone)]
pub struct SemanticReconstructor {
    extraction_command: Vec<String>,
    renderer_command: Vec<String>,
    timeout: Duration,
    models: ModelHandles,
    technical: TechnicalFixer,
}

impl SemanticReconstructor {
    pub fn new(
        extraction_command: Vec<String>,
        renderer_command: Vec<String>,
        timeout: Duration,
        models: ModelHandles,
        technical: TechnicalFixer,
    ) -> Self {
        Self {
            extraction_command,
            renderer_command,
            timeout,
            models,
            technical,
        }
    }

    /// Rebuild `input` as a tagged PDF at `output`.
    #[instrument(skip_all, fields(input = %input.display()))]
    pub async fn reconstruct(&self, input: &Path, output: &Path) -> Result<()> {
        let work = tempfile::Builder::new()
            .prefix("pdfaudit-semantic-")
            .tempdir()
            .map_err(|e| AuditError::io(std::env::temp_dir(), e))?;
        let extract_dir = work.path().join("extract");

        let args = vec![
            path_arg(input),
            "--output_dir".into(),
            path_arg(&extract_dir),
            "--output_format".into(),
            "html".into(),
        ];
        self.run_step(&self.extraction_command, &args).await?;

        let html_path = find_file(&extract_dir, &["html", "htm"])?
            .ok_or_else(|| AuditError::data("extraction produced no HTML file"))?;
        let html_dir = html_path.parent().unwrap_or(&extract_dir).to_path_buf();
        let html = tokio::fs::read_to_string(&html_path)
            .await
            .map_err(|e| AuditError::io(&html_path, e))?;

        let (text, sources) = text_and_image_sources(&html);
        let lang = self.models.detector.detect(&text);
        info!(%lang, images = sources.len(), "document extracted");

        let mut alt_texts: HashMap<String, String> = HashMap::new();
        for src in sources {
            if alt_texts.contains_key(&src) {
                continue;
            }
            let image = html_dir.join(&src);
            if !is_image(&image) || !image.exists() {
                debug!(%src, "image source not found locally, skipped");
                continue;
            }
            let caption = self.models.captioner.caption(&image).await;
            let alt = self.models.translator.translate(&caption, &lang).await;
            alt_texts.insert(src, alt);
        }

        let tagged = set_lang(&set_alt_texts(&html, &alt_texts), &lang);
        tokio::fs::write(&html_path, tagged)
            .await
            .map_err(|e| AuditError::io(&html_path, e))?;

        let rendered = work.path().join("rendered.pdf");
        let args = vec![
            path_arg(&html_path),
            path_arg(&rendered),
            "--pdf-variant".into(),
            "pdf/ua-1".into(),
        ];
        self.run_step(&self.renderer_command, &args).await?;
        if !rendered.exists() {
            return Err(AuditError::subprocess(
                program_name(&self.renderer_command),
                "no PDF rendered",
            ));
        }

        self.technical.fix(&rendered, output).await
    }

    async fn run_step(&self, command: &[String], args: &[String]) -> Result<()> {
        let out = run_command(command, args, self.timeout).await?;
        if out.success() {
            Ok(())
        } else {
            Err(AuditError::subprocess(
                program_name(command),
                format!("exit {:?}: {}", out.exit_code, last_line(&out.stderr)),
            ))
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// First file below `dir` with one of `extensions`, depth-first in name order.
fn find_file(dir: &Path, extensions: &[&str]) -> Result<Option<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| AuditError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in &entries {
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.contains(&e.to_ascii_lowercase().as_str()));
        if path.is_file() && matches {
            return Ok(Some(path.clone()));
        }
    }
    for path in entries.iter().filter(|p| p.is_dir()) {
        if let Some(found) = find_file(path, extensions)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Visible text and `<img src>` values of an HTML document.
fn text_and_image_sources(html: &str) -> (String, Vec<String>) {
    let doc = Html::parse_document(html);
    let text = doc
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let sources = IMG_TAG_RE
        .find_iter(html)
        .filter_map(|m| img_src(m.as_str()))
        .collect();
    (text, sources)
}

fn img_src(tag: &str) -> Option<String> {
    SRC_ATTR_RE.captures(tag).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    })
}

/// Replace the `alt` attribute of every `<img>` whose `src` has a text.
fn set_alt_texts(html: &str, alt_texts: &HashMap<String, String>) -> String {
    IMG_TAG_RE
        .replace_all(html, |caps: &Captures| {
            let tag = &caps[0];
            match img_src(tag).and_then(|src| alt_texts.get(&src)) {
                Some(alt) => {
                    let stripped = ALT_ATTR_RE.replace_all(tag, "");
                    // `<img` is 4 bytes; the attribute goes right after it.
                    format!(
                        "{} alt=\"{}\"{}",
                        &stripped[..4],
                        escape_attr(alt),
                        &stripped[4..]
                    )
                }
                None => tag.to_string(),
            }
        })
        .into_owned()
}

/// Set the document language on the `<html>` element, wrapping fragments.
fn set_lang(html: &str, lang: &str) -> String {
    let lang = escape_attr(lang);
    if HTML_TAG_RE.is_match(html) {
        HTML_TAG_RE
            .replace(html, |caps: &Captures| {
                let stripped = LANG_ATTR_RE.replace_all(&caps[0], "");
                format!("{} lang=\"{lang}\"{}", &stripped[..5], &stripped[5..])
            })
            .into_owned()
    } else {
        format!("<!DOCTYPE html><html lang=\"{lang}\"><body>{html}</body></html>")
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommandTranslator, StopwordDetector};
    use crate::test_support::{RecordingCaptioner, fake_gs};
    use std::sync::Arc;

    #[test]
    fn alt_texts_replace_existing_attributes() {
        let html = r#"<p>x</p><img src="a.png" alt="old"><IMG class="c" src='b.jpg'/><img src="c.png">"#;
        let alts = HashMap::from([
            ("a.png".to_string(), "A \"quoted\" chart".to_string()),
            ("b.jpg".to_string(), "Photo".to_string()),
        ]);

        let out = set_alt_texts(html, &alts);
        assert!(out.contains(r#"<img alt="A &quot;quoted&quot; chart" src="a.png">"#));
        assert!(out.contains(r#"<IMG alt="Photo" class="c" src='b.jpg'/>"#));
        assert!(out.contains(r#"<img src="c.png">"#));
        assert!(!out.contains("old"));
    }

    #[test]
    fn lang_is_set_or_document_wrapped() {
        assert_eq!(
            set_lang(r#"<html lang="en"><body>x</body></html>"#, "de"),
            r#"<html lang="de"><body>x</body></html>"#
        );
        assert_eq!(
            set_lang("<p>fragment</p>", "fr"),
            r#"<!DOCTYPE html><html lang="fr"><body><p>fragment</p></body></html>"#
        );
    }

    #[test]
    fn extracts_text_and_sources() {
        let (text, sources) = text_and_image_sources(
            r#"<html><body><h1>Title</h1><p>Body text</p><img src="x.png"><img alt="no src"></body></html>"#,
        );
        assert_eq!(text, "Title Body text");
        assert_eq!(sources, ["x.png"]);
    }

    #[tokio::test]
    async fn reconstruct_runs_full_chain() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("report.pdf");
        let output = dir.path().join("repaired").join("report.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();

        // Fake extraction: writes an HTML page and one image below --output_dir.
        let marker = r#"d="$3"; mkdir -p "$d/report"; printf '%s' '<html><body><p>This is the annual report of the club and the statement for the members.</p><img src="_page_0_Picture_1.jpeg"></body></html>' > "$d/report/report.html"; printf 'img' > "$d/report/_page_0_Picture_1.jpeg""#;
        // Fake renderer: copies the HTML to the PDF path.
        let renderer = r#"cp "$1" "$2""#;

        let captioner = Arc::new(RecordingCaptioner::default());
        let models = ModelHandles {
            detector: Arc::new(StopwordDetector::new("de")),
            captioner: captioner.clone(),
            translator: Arc::new(CommandTranslator::new(Vec::new())),
        };
        let reconstructor = SemanticReconstructor::new(
            vec!["sh".into(), "-c".into(), marker.into(), "marker".into()],
            vec!["sh".into(), "-c".into(), renderer.into(), "weasyprint".into()],
            Duration::from_secs(10),
            models,
            TechnicalFixer::new(fake_gs(), Duration::from_secs(10)),
        );

        reconstructor.reconstruct(&input, &output).await.unwrap();

        let result = std::fs::read_to_string(&output).unwrap();
        assert!(result.contains(r#"<html lang="en">"#));
        assert!(result.contains(r#"alt="A picture of _page_0_Picture_1.jpeg""#));
        assert_eq!(captioner.calls(), 1);
    }

    #[tokio::test]
    async fn extraction_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("report.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();

        let models = ModelHandles {
            detector: Arc::new(StopwordDetector::new("de")),
            captioner: Arc::new(RecordingCaptioner::default()),
            translator: Arc::new(CommandTranslator::new(Vec::new())),
        };
        let reconstructor = SemanticReconstructor::new(
            vec!["sh".into(), "-c".into(), "echo 'CUDA out of memory' >&2; exit 1".into()],
            vec!["true".into()],
            Duration::from_secs(10),
            models,
            TechnicalFixer::new(fake_gs(), Duration::from_secs(10)),
        );

        let err = reconstructor
            .reconstruct(&input, &dir.path().join("out.pdf"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CUDA out of memory"));
    }
}
