use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Words that may never appear in upper case inside a comment.
const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

// Directories that hold no project sources.
const SKIPPED_DIRS: [&str; 2] = ["./target", "./examples"];

// The source policies enforced on every Rust file of the project.
#[derive(Clone, Copy)]
enum Policy {
    UnderscorePrefix,
    ForbiddenWords,
    StarsInComments,
    AllCapsComments,
    AllowDeadCode,
}

impl Policy {
    fn pattern(self) -> String {
        match self {
            Policy::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Policy::ForbiddenWords => {
                format!(r"(//|/\*|///).*(?:{})", FORBIDDEN_WORDS.join("|"))
            }
            Policy::StarsInComments => r"(//|/\*).*\*\*".to_string(),
            Policy::AllCapsComments => r"(//|/\*|///).*".to_string(),
            Policy::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    // The build script may mention its own forbidden words; it is still held to the
    // underscore rule.
    fn covers_build_script(self) -> bool {
        matches!(self, Policy::UnderscorePrefix)
    }

    fn headline(self) -> &'static str {
        match self {
            Policy::UnderscorePrefix => "underscore-prefixed variables",
            Policy::ForbiddenWords | Policy::StarsInComments => "forbidden comment patterns",
            Policy::AllCapsComments => "comments with all uppercase alphabetic characters",
            Policy::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> String {
        match self {
            Policy::UnderscorePrefix => "\n⚠️ Underscore-prefixed variable names are not allowed in this project.\n   Either use the variable (removing the underscore) or remove it completely.\n".to_string(),
            Policy::ForbiddenWords | Policy::StarsInComments => format!(
                "\n⚠️ Comments containing {} are STRICTLY FORBIDDEN in this project.\n   Remove them completely rather than commenting them out.\n   The '**' pattern is not allowed in regular comments (but is allowed in doc comments).\n",
                FORBIDDEN_WORDS.map(|w| format!("'{w}'")).join(", ")
            ),
            Policy::AllCapsComments => "\n⚠️ Comments where all alphabetic characters are uppercase are STRICTLY FORBIDDEN in this project.\n   STRONGLY CONSIDER deleting the comment completely.\n".to_string(),
            Policy::AllowDeadCode => "\n⚠️ #[allow(dead_code)] attributes are STRICTLY FORBIDDEN in this project.\n   Either use the code (removing the attribute) or remove it completely.\n".to_string(),
        }
    }

    // Decides whether a line that matched the pattern is a real violation.
    fn is_violation(self, line_text: &str) -> bool {
        match self {
            Policy::UnderscorePrefix => !is_comment(line_text) && !is_in_string(line_text),
            Policy::ForbiddenWords | Policy::AllowDeadCode => true,
            Policy::StarsInComments => !is_doc_comment(line_text),
            Policy::AllCapsComments => comment_text(line_text).is_some_and(|text| {
                let alpha: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
                !alpha.is_empty() && alpha.iter().all(|c| c.is_uppercase())
            }),
        }
    }
}

// A grep sink collecting every violating line of a single file.
struct ViolationCollector {
    policy: Policy,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(policy: Policy, file_path: &Path) -> Self {
        Self {
            policy,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.policy.headline(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&self.policy.advice());
        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if self.policy.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///")
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with("//")
        || (line.contains("/*") && !line.contains("*/match") && !line.contains("*/let"))
}

// True when an underscore-bearing token sits between a pair of double quotes.
fn is_in_string(line: &str) -> bool {
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

// The text of a comment line without its `//`, `///` or `/* */` markers.
fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        Some(rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        Some(rest.trim())
    } else if let Some(idx) = line.find("/*") {
        let rest = &line[idx + 2..];
        Some(match rest.find("*/") {
            Some(end) => rest[..end].trim(),
            None => rest.trim(),
        })
    } else {
        None
    }
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    WalkDir::new(".")
        .into_iter()
        .filter_entry(|e| !SKIPPED_DIRS.iter().any(|dir| e.path() == Path::new(dir)))
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
}

fn scan(policy: Policy) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&policy.pattern())?;
    let mut searcher = Searcher::new();

    for path in rust_sources() {
        if !policy.covers_build_script() && path.file_name().is_some_and(|n| n == "build.rs") {
            continue;
        }
        if std::fs::metadata(&path).is_err() {
            continue;
        }

        let mut collector = ViolationCollector::new(policy, &path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

// Compiles this script on its own with the project's strict lints, so that it follows
// the same policy as the crate.
fn check_build_script_lints() {
    let build_path = Path::new("build.rs");
    let output = std::process::Command::new("rustc")
        .args([
            "--edition",
            "2021",
            "-D",
            "unused_variables",
            "-D",
            "dead_code",
            "-D",
            "unused_imports",
            "--crate-type",
            "bin",
            "--error-format",
            "human",
            "--emit",
            "metadata",
            "-o",
        ])
        .arg(std::env::temp_dir().join("concord-build-lint.rmeta"))
        .arg(build_path)
        .output();

    let Ok(output) = output else {
        eprintln!("cargo:warning=Could not check build.rs for unused variables, functions or imports");
        return;
    };
    if output.status.success() {
        return;
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let kind = if stderr.contains("unused variable") {
        "variables"
    } else if stderr.contains("is never used") {
        "functions"
    } else if stderr.contains("unused import") {
        "imports"
    } else {
        return;
    };
    eprintln!("\n❌ ERROR: Unused {kind} detected in build.rs!");
    eprintln!("{stderr}");
    eprintln!("\n⚠️ Unused {kind} are STRICTLY FORBIDDEN in this project.");
    std::process::exit(1);
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    check_build_script_lints();

    for policy in [
        Policy::UnderscorePrefix,
        Policy::ForbiddenWords,
        Policy::StarsInComments,
        Policy::AllCapsComments,
        Policy::AllowDeadCode,
    ] {
        if let Err(e) = scan(policy) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
