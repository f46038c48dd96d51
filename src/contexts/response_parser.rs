//! Turns a free-form model reply into file proposals.
//!
//! A file block looks like
//!
//! ````text
//! --- START FILE: src/main/java/com/example/MyService.java ---
//! ```java
//! ...complete file...
//! ```
//! --- END FILE: src/main/java/com/example/MyService.java ---
//! ````
//!
//! Parsing happens in two stages. The lexer finds every START/END marker with its path. The
//! matcher pairs a START with the marker that immediately follows it, and only when that is an
//! END echoing exactly the same path; anything else closes nothing. The text between a matched
//! pair is then parsed as a single fenced region.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::data::{
    is_known_language_tag, language_for_path, normalize_language_tag, Diagnostic, FileProposal,
    SourceLayout, PLAIN_TEXT,
};
use crate::project_root::ProjectRoot;

const FENCE: &str = "```";

/// Result of parsing one reply
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Proposals in order of appearance
    pub proposals: Vec<FileProposal>,
    /// Everything that was skipped or guessed, in order of discovery
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseOutcome {
    fn note(&mut self, diagnostic: Diagnostic) {
        warn!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerKind {
    Start,
    End,
}

#[derive(Debug, Clone, Copy)]
struct Marker<'t> {
    kind: MarkerKind,
    path: &'t str,
    span_start: usize,
    span_end: usize,
}

#[derive(Debug)]
struct RawBlock<'t> {
    path: &'t str,
    body: &'t str,
}

#[derive(Debug, PartialEq, Eq)]
struct Fence<'t> {
    language: Option<&'t str>,
    content: &'t str,
}

pub struct ResponseParser<'a> {
    root: &'a ProjectRoot,
    layout: &'a SourceLayout,
}

impl<'a> ResponseParser<'a> {
    pub fn new(root: &'a ProjectRoot, layout: &'a SourceLayout) -> Self {
        Self { root, layout }
    }

    /// Extracts proposals from `text`.
    ///
    /// A failure in one block never aborts its siblings. When no proposal survives but the
    /// reply contains a fenced region, the first region is returned as a single unlocated
    /// proposal for display only.
    pub fn parse(&self, text: &str) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();

        let markers = lex_markers(text);
        for block in match_blocks(&markers, text, &mut outcome) {
            if let Some(proposal) = self.build_proposal(&block, &mut outcome) {
                outcome.proposals.push(proposal);
            }
        }

        if outcome.proposals.is_empty() {
            if let Some(fence) = first_fence(text) {
                outcome.note(Diagnostic::ambiguity(
                    "reply did not use FILE markers; extracted the first code block, \
                     but its file path cannot be determined",
                ));
                let language = fence
                    .language
                    .map(normalize_language_tag)
                    .unwrap_or_else(|| PLAIN_TEXT.to_string());
                outcome.proposals.push(FileProposal::unlocated(
                    language,
                    fence.content.trim().to_string(),
                ));
            }
        }

        debug!(
            "Parsed {} proposal(s) with {} diagnostic(s)",
            outcome.proposals.len(),
            outcome.diagnostics.len()
        );
        outcome
    }

    fn build_proposal(&self, block: &RawBlock, outcome: &mut ParseOutcome) -> Option<FileProposal> {
        let declared = block.path.trim().replace('\\', "/");
        if declared.is_empty() {
            outcome.note(Diagnostic::ambiguity("file block with an empty path was skipped"));
            return None;
        }
        if declared.contains("..") {
            outcome.note(Diagnostic::security(format!(
                "proposed path '{}' contains '..'; proposal skipped",
                declared
            )));
            return None;
        }

        let Some(fence) = parse_enclosed_fence(block.body) else {
            outcome.note(Diagnostic::ambiguity(format!(
                "block for '{}' has no well-formed code fence; skipped",
                declared
            )));
            return None;
        };

        let resolved = self.place(&declared, outcome)?;

        let language = fence
            .language
            .map(normalize_language_tag)
            .or_else(|| language_for_path(&resolved).map(str::to_string))
            .unwrap_or_else(|| PLAIN_TEXT.to_string());

        Some(FileProposal::located(
            declared,
            resolved,
            language,
            fence.content.trim().to_string(),
        ))
    }

    /// Chooses the absolute target for a declared path and verifies containment.
    fn place(&self, declared: &str, outcome: &mut ParseOutcome) -> Option<PathBuf> {
        let candidate = if self.layout.is_rooted(declared) {
            self.root.join(declared)
        } else {
            let file_name = Path::new(declared)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(declared);
            match self.layout.classify_for_placement(file_name) {
                Some(category) => {
                    let base = self.layout.placement_dir(category, declared);
                    self.root.join(Path::new(base).join(declared))
                }
                None => {
                    outcome.note(Diagnostic::ambiguity(format!(
                        "could not determine a standard directory for '{}'; \
                         placing it relative to the project root",
                        declared
                    )));
                    self.root.join(declared)
                }
            }
        };

        if self.root.contains(&candidate) {
            Some(candidate)
        } else {
            outcome.note(Diagnostic::security(format!(
                "proposed path '{}' resolves outside the project root; proposal skipped",
                declared
            )));
            None
        }
    }
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)---[ \t]*(START|END)[ \t]+FILE:[ \t]*([^\r\n]*?)[ \t]*---")
            .expect("valid marker regex")
    })
}

/// Stage one: every START/END marker, in order.
fn lex_markers(text: &str) -> Vec<Marker<'_>> {
    marker_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let kind = if caps.get(1)?.as_str().eq_ignore_ascii_case("start") {
                MarkerKind::Start
            } else {
                MarkerKind::End
            };
            Some(Marker {
                kind,
                path: caps.get(2)?.as_str().trim(),
                span_start: whole.start(),
                span_end: whole.end(),
            })
        })
        .collect()
}

/// Stage two: pair each START with an immediately following END echoing the same path.
fn match_blocks<'t>(
    markers: &[Marker<'t>],
    text: &'t str,
    outcome: &mut ParseOutcome,
) -> Vec<RawBlock<'t>> {
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < markers.len() {
        let open = markers[i];
        if open.kind != MarkerKind::Start {
            debug!("Ignoring END FILE marker for '{}' without a START", open.path);
            i += 1;
            continue;
        }
        match markers.get(i + 1) {
            Some(close) if close.kind == MarkerKind::End && close.path == open.path => {
                blocks.push(RawBlock {
                    path: open.path,
                    body: &text[open.span_end..close.span_start],
                });
                i += 2;
            }
            Some(close) if close.kind == MarkerKind::End => {
                outcome.note(Diagnostic::ambiguity(format!(
                    "START FILE '{}' is followed by END FILE '{}'; markers do not match, block ignored",
                    open.path, close.path
                )));
                i += 2;
            }
            _ => {
                outcome.note(Diagnostic::ambiguity(format!(
                    "START FILE '{}' has no matching END FILE marker; block ignored",
                    open.path
                )));
                i += 1;
            }
        }
    }
    blocks
}

/// The region between matched markers must be exactly one fence, modulo surrounding whitespace.
fn parse_enclosed_fence(body: &str) -> Option<Fence<'_>> {
    let trimmed = body.trim();
    if trimmed.len() < 2 * FENCE.len() || !trimmed.starts_with(FENCE) || !trimmed.ends_with(FENCE) {
        return None;
    }
    let inner = &trimmed[FENCE.len()..trimmed.len() - FENCE.len()];
    Some(split_fence_header(inner))
}

/// First fenced region anywhere in the text, closed by the next fence.
fn first_fence(text: &str) -> Option<Fence<'_>> {
    let open = text.find(FENCE)?;
    let after = &text[open + FENCE.len()..];
    let close = after.find(FENCE)?;
    Some(split_fence_header(&after[..close]))
}

/// Splits an optional language tag off the opening fence line.
///
/// A fence written on one line only gives up its first word when that word is a known tag.
fn split_fence_header(inner: &str) -> Fence<'_> {
    let Some(newline) = inner.find('\n') else {
        let line = inner.trim();
        return match line.split_once(char::is_whitespace) {
            Some((tag, rest)) if is_known_language_tag(tag) => Fence {
                language: Some(tag),
                content: rest.trim(),
            },
            _ => Fence {
                language: None,
                content: line,
            },
        };
    };
    let header = inner[..newline].trim();
    let rest = &inner[newline + 1..];
    if header.is_empty() {
        Fence {
            language: None,
            content: rest.trim(),
        }
    } else if is_language_token(header) {
        Fence {
            language: Some(header),
            content: rest.trim(),
        }
    } else {
        Fence {
            language: None,
            content: inner.trim(),
        }
    }
}

fn is_language_token(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '#' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DiagnosticKind, UNLOCATED_PATH};
    use tempfile::TempDir;

    fn setup() -> (TempDir, ProjectRoot, SourceLayout) {
        let dir = TempDir::new().unwrap();
        let root = ProjectRoot::new(dir.path()).unwrap();
        (dir, root, SourceLayout::maven())
    }

    fn block(path: &str, tag: &str, body: &str) -> String {
        format!(
            "--- START FILE: {path} ---\n```{tag}\n{body}\n```\n--- END FILE: {path} ---\n"
        )
    }

    #[test]
    fn places_java_sources_by_test_suffix() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let reply = format!(
            "Here you go.\n{}{}",
            block("MyService.java", "java", "class MyService {}"),
            block("MyServiceTest.java", "java", "class MyServiceTest {}")
        );

        let outcome = parser.parse(&reply);
        assert_eq!(outcome.proposals.len(), 2);
        assert_eq!(
            outcome.proposals[0].resolved_path(),
            Some(root.path().join("src/main/java/MyService.java").as_path())
        );
        assert_eq!(
            outcome.proposals[1].resolved_path(),
            Some(root.path().join("src/test/java/MyServiceTest.java").as_path())
        );
        assert_eq!(outcome.proposals[0].content(), "class MyService {}");
    }

    #[test]
    fn rooted_paths_are_joined_directly() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let reply = block(
            "src\\main\\resources\\static\\js\\app.js",
            "",
            "console.log('hi');",
        );

        let outcome = parser.parse(&reply);
        let proposal = &outcome.proposals[0];
        assert_eq!(proposal.declared_path(), "src/main/resources/static/js/app.js");
        assert_eq!(
            proposal.resolved_path(),
            Some(root.path().join("src/main/resources/static/js/app.js").as_path())
        );
        assert_eq!(proposal.language(), "javascript");
    }

    #[test]
    fn web_robot_and_resource_files_get_convention_dirs() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let reply = [
            block("task.html", "HTML", "<p>x</p>"),
            block("login.robot", "", "*** Test Cases ***"),
            block("application.properties", "", "a=b"),
            block("test/logback.xml", "xml", "<configuration/>"),
        ]
        .concat();

        let outcome = parser.parse(&reply);
        let paths: Vec<_> = outcome
            .proposals
            .iter()
            .map(|p| root.relative_display(p.resolved_path().unwrap()).unwrap())
            .collect();
        assert_eq!(
            paths,
            vec![
                "src/main/resources/static/task.html",
                "src/test/robotframework/login.robot",
                "src/main/resources/application.properties",
                "src/test/resources/test/logback.xml",
            ]
        );
        assert_eq!(outcome.proposals[0].language(), "html");
        assert_eq!(outcome.proposals[1].language(), "robotframework");
        assert_eq!(outcome.proposals[2].language(), "properties");
    }

    #[test]
    fn unknown_extension_falls_back_to_root_with_diagnostic() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let outcome = parser.parse(&block("Dockerfile", "", "FROM eclipse-temurin:21"));

        assert_eq!(
            outcome.proposals[0].resolved_path(),
            Some(root.path().join("Dockerfile").as_path())
        );
        assert_eq!(outcome.proposals[0].language(), PLAIN_TEXT);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::ParseAmbiguity);
    }

    #[test]
    fn traversal_paths_are_dropped_but_siblings_survive() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let reply = [
            block("../../etc/cron.d/evil", "", "* * * * * root sh"),
            block("src/main/java/a/..hidden/X.java", "java", "class X {}"),
            block("Ok.java", "java", "class Ok {}"),
        ]
        .concat();

        let outcome = parser.parse(&reply);
        assert_eq!(outcome.proposals.len(), 1);
        assert_eq!(outcome.proposals[0].declared_path(), "Ok.java");
        let security: Vec<_> = outcome
            .diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::SecurityViolation)
            .collect();
        assert_eq!(security.len(), 2);
    }

    #[test]
    fn absolute_paths_outside_root_are_dropped() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let outcome = parser.parse(&block("/etc/passwd", "", "root:x:0:0"));

        assert!(outcome.proposals.iter().all(|p| !p.is_applicable()));
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::SecurityViolation));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_escape_is_dropped() {
        let outside = TempDir::new().unwrap();
        let (_dir, root, layout) = setup();
        std::fs::create_dir_all(root.path().join("src/main")).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("src/main/java")).unwrap();
        let parser = ResponseParser::new(&root, &layout);

        let outcome = parser.parse(&block("Evil.java", "java", "class Evil {}"));
        assert!(outcome.proposals.iter().all(|p| p.resolved_path().is_none()));
    }

    #[test]
    fn mismatched_end_marker_closes_nothing() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let reply = "--- START FILE: a.html ---\n```html\n<a/>\n```\n--- END FILE: b.html ---\n";

        let outcome = parser.parse(reply);
        assert_eq!(outcome.proposals.len(), 1);
        let fallback = &outcome.proposals[0];
        assert_eq!(fallback.declared_path(), UNLOCATED_PATH);
        assert!(fallback.resolved_path().is_none());
        assert_eq!(fallback.language(), "html");
        assert_eq!(fallback.content(), "<a/>");
    }

    #[test]
    fn mismatched_markers_without_fence_yield_nothing() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let outcome = parser.parse("--- START FILE: a.html ---\n<a/>\n--- END FILE: b.html ---");
        assert!(outcome.proposals.is_empty());
        assert!(!outcome.diagnostics.is_empty());
    }

    #[test]
    fn bare_fence_without_markers_is_unlocated() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let outcome = parser.parse("Try this:\n```\nSELECT 1;\n```\nand ```python\nprint()\n```");

        assert_eq!(outcome.proposals.len(), 1);
        assert_eq!(outcome.proposals[0].language(), PLAIN_TEXT);
        assert_eq!(outcome.proposals[0].content(), "SELECT 1;");
        assert!(!outcome.proposals[0].is_applicable());
    }

    #[test]
    fn plain_prose_yields_no_proposals() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let outcome = parser.parse("Dependency injection decouples construction from use.");
        assert!(outcome.proposals.is_empty());
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn unknown_language_tag_is_kept_lowercase() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let outcome = parser.parse(&block("scripts/build.sh", "Bash", "echo hi"));
        assert_eq!(outcome.proposals[0].language(), "bash");
    }

    #[test]
    fn nested_fences_inside_content_are_preserved() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let body = "# Readme\n\n```bash\nmvn test\n```";
        let outcome = parser.parse(&block("README.md", "md", body));
        assert_eq!(outcome.proposals[0].content(), body);
        assert_eq!(outcome.proposals[0].language(), "md");
    }

    #[test]
    fn marker_keywords_are_case_insensitive() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let reply = "--- start file: Foo.java ---\n```JAVA\n  class Foo {}  \n```\n--- End File: Foo.java ---";
        let outcome = parser.parse(reply);
        assert_eq!(outcome.proposals.len(), 1);
        assert_eq!(outcome.proposals[0].language(), "java");
        assert_eq!(outcome.proposals[0].content(), "class Foo {}");
    }

    #[test]
    fn fence_header_detection() {
        assert_eq!(
            split_fence_header("java\nclass A {}\n"),
            Fence {
                language: Some("java"),
                content: "class A {}"
            }
        );
        assert_eq!(
            split_fence_header("int x = 1; int y = 2;\nmore\n"),
            Fence {
                language: None,
                content: "int x = 1; int y = 2;\nmore"
            }
        );
        assert_eq!(parse_enclosed_fence("  no fence here "), None);
    }

    #[test]
    fn one_line_fence_keeps_known_tag() {
        assert_eq!(
            parse_enclosed_fence("```java class A {}```"),
            Some(Fence {
                language: Some("java"),
                content: "class A {}"
            })
        );
        assert_eq!(
            split_fence_header("return x;"),
            Fence {
                language: None,
                content: "return x;"
            }
        );
        assert_eq!(
            split_fence_header("html"),
            Fence {
                language: None,
                content: "html"
            }
        );
    }

    #[test]
    fn one_line_fenced_block_is_written_without_its_tag() {
        let (_dir, root, layout) = setup();
        let parser = ResponseParser::new(&root, &layout);
        let reply = "--- START FILE: Foo.java ---\n```java class Foo {}```\n--- END FILE: Foo.java ---";
        let outcome = parser.parse(reply);
        assert_eq!(outcome.proposals.len(), 1);
        assert_eq!(outcome.proposals[0].language(), "java");
        assert_eq!(outcome.proposals[0].content(), "class Foo {}");
    }
}
