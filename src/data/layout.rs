use serde::Serialize;
use std::path::Path;

/// Language tag used when neither the fence nor the extension says otherwise.
pub const PLAIN_TEXT: &str = "plaintext";

/// Fence tags recognised case-insensitively, with their canonical spelling.
const KNOWN_LANGUAGE_TAGS: &[(&str, &str)] = &[
    ("java", "java"),
    ("html", "html"),
    ("css", "css"),
    ("javascript", "javascript"),
    ("js", "javascript"),
    ("robotframework", "robotframework"),
    ("robot", "robotframework"),
    ("xml", "xml"),
    ("properties", "properties"),
    ("md", "md"),
];

/// Names that are treated as static web assets even when written without a directory.
const WELL_KNOWN_WEB_ASSETS: &[&str] = &["index.html", "styles.css", "script.js", "task.html"];

/// The kind of file, as far as directory placement is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    /// `.java` sources, split between the main and test roots
    JavaSource,
    /// `.html`, `.css`, `.js` served from the static resources folder
    WebAsset,
    /// `.robot` suites
    RobotSuite,
    /// `.xml` and `.properties`, split between main and test resources
    Resource,
}

/// Static table mapping file categories to base directories relative to the project root.
///
/// The table is configuration, not something discovered at runtime: it is shared by the
/// path resolver (searching for existing files) and the response parser (placing new ones).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLayout {
    pub java_main: &'static str,
    pub java_test: &'static str,
    pub static_assets: &'static str,
    pub main_resources: &'static str,
    pub test_resources: &'static str,
    pub robot_tests: &'static str,
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self::maven()
    }
}

impl SourceLayout {
    /// The Maven / Spring Boot layout the assistant targets
    pub const fn maven() -> Self {
        Self {
            java_main: "src/main/java",
            java_test: "src/test/java",
            static_assets: "src/main/resources/static",
            main_resources: "src/main/resources",
            test_resources: "src/test/resources",
            robot_tests: "src/test/robotframework",
        }
    }

    /// Directories a declared path may already start with, in which case it is taken as rooted.
    pub fn rooted_prefixes(&self) -> [&'static str; 6] {
        [
            self.java_main,
            self.java_test,
            self.static_assets,
            self.main_resources,
            self.test_resources,
            self.robot_tests,
        ]
    }

    /// Returns true if `relative` begins with one of the convention directories.
    ///
    /// The comparison is component-wise, so `src/main/javafoo/X.java` is not rooted.
    pub fn is_rooted(&self, relative: &str) -> bool {
        let path = Path::new(relative);
        self.rooted_prefixes()
            .iter()
            .any(|prefix| path.starts_with(prefix) && path != Path::new(prefix))
    }

    /// Classifies a file name for searching an existing project.
    ///
    /// Besides the extension table, a bare capitalised identifier (`MyService`) is guessed to be
    /// a Java type and a handful of well-known asset names map to the static folder.
    pub fn classify_for_search(&self, file_name: &str) -> Option<FileCategory> {
        match extension_of(file_name) {
            Some(ext) => category_for_extension(&ext).or_else(|| {
                WELL_KNOWN_WEB_ASSETS
                    .contains(&file_name)
                    .then_some(FileCategory::WebAsset)
            }),
            None if starts_uppercase(file_name) => Some(FileCategory::JavaSource),
            None => None,
        }
    }

    /// Classifies a file name for placing a new file. Only the extension counts here.
    pub fn classify_for_placement(&self, file_name: &str) -> Option<FileCategory> {
        extension_of(file_name).and_then(|ext| category_for_extension(&ext))
    }

    /// All base directories worth searching for a category, in search order.
    pub fn search_dirs(&self, category: FileCategory) -> Vec<&'static str> {
        match category {
            FileCategory::JavaSource => vec![self.java_main, self.java_test],
            FileCategory::WebAsset => vec![self.static_assets],
            FileCategory::RobotSuite => vec![self.robot_tests],
            FileCategory::Resource => vec![self.main_resources, self.test_resources],
        }
    }

    /// The single base directory a new file of this category belongs under.
    ///
    /// Java files go to the test root when their stem ends in `Test` or `Tests`. Resource files
    /// go to the test resources when the declared path mentions "test" anywhere (lowercased).
    pub fn placement_dir(&self, category: FileCategory, declared: &str) -> &'static str {
        match category {
            FileCategory::JavaSource => {
                if is_java_test_name(declared) {
                    self.java_test
                } else {
                    self.java_main
                }
            }
            FileCategory::WebAsset => self.static_assets,
            FileCategory::RobotSuite => self.robot_tests,
            FileCategory::Resource => {
                if declared.to_lowercase().contains("test") {
                    self.test_resources
                } else {
                    self.main_resources
                }
            }
        }
    }
}

/// Returns true for `FooTest.java` and `FooTests.java`.
pub fn is_java_test_name(path: &str) -> bool {
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);
    name.ends_with("Test.java") || name.ends_with("Tests.java")
}

/// Language tag for a path, judged by extension. `None` when the extension is unknown.
pub fn language_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let language = match ext.as_str() {
        "java" => "java",
        "html" => "html",
        "css" => "css",
        "js" => "javascript",
        "robot" => "robotframework",
        "xml" => "xml",
        "properties" => "properties",
        "md" => "markdown",
        _ => return None,
    };
    Some(language)
}

/// Normalises a fence tag: known tags get their canonical name, anything else is lowercased.
pub fn normalize_language_tag(tag: &str) -> String {
    let lowered = tag.trim().to_lowercase();
    KNOWN_LANGUAGE_TAGS
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lowered)
}

/// True for fence tags in the fixed recognised set, in any case.
pub fn is_known_language_tag(tag: &str) -> bool {
    KNOWN_LANGUAGE_TAGS
        .iter()
        .any(|(alias, _)| alias.eq_ignore_ascii_case(tag.trim()))
}

fn category_for_extension(ext: &str) -> Option<FileCategory> {
    match ext {
        "java" => Some(FileCategory::JavaSource),
        "html" | "css" | "js" => Some(FileCategory::WebAsset),
        "robot" => Some(FileCategory::RobotSuite),
        "xml" | "properties" => Some(FileCategory::Resource),
        _ => None,
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn starts_uppercase(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_uppercase())
}
