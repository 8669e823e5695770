use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories that are never scanned: build output and vendored reference material.
const SKIPPED_DIRS: [&str; 2] = ["./target", "./examples"];

/// One source policy enforced on every Rust file of the crate.
#[derive(Clone, Copy)]
enum Rule {
    UnderscoreBinding,
    ForbiddenWord,
    StarsInComment,
    UppercaseComment,
    AllowDeadCode,
}

impl Rule {
    const ALL: [Rule; 5] = [
        Rule::UnderscoreBinding,
        Rule::ForbiddenWord,
        Rule::StarsInComment,
        Rule::UppercaseComment,
        Rule::AllowDeadCode,
    ];

    fn pattern(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => r"\b(_[a-zA-Z0-9_]+)\b",
            Rule::ForbiddenWord => {
                r"(//|/\*|///).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)"
            }
            Rule::StarsInComment => r"(//|/\*).*\*\*",
            Rule::UppercaseComment => r"(//|/\*|///).*",
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        }
    }

    // The build script quotes the patterns it forbids, so only the binding rule reads it.
    fn scans_build_script(self) -> bool {
        matches!(self, Rule::UnderscoreBinding)
    }

    fn headline(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => "underscore-prefixed variables",
            Rule::ForbiddenWord | Rule::StarsInComment => "forbidden comment patterns",
            Rule::UppercaseComment => "comments with all uppercase alphabetic characters",
            Rule::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => {
                "Underscore-prefixed variable names are not allowed in this project.\n   Either use the variable (removing the underscore) or remove it completely."
            }
            Rule::ForbiddenWord => {
                "Comments announcing fixes, changes or updates are not allowed. Remove them completely."
            }
            Rule::StarsInComment => {
                "The '**' pattern is not allowed in regular comments (doc comments may use it)."
            }
            Rule::UppercaseComment => {
                "Comments where all alphabetic characters are uppercase are not allowed."
            }
            Rule::AllowDeadCode => {
                "Either use the code (removing the attribute) or remove it completely."
            }
        }
    }

    /// Whether a matched line is a real violation.
    fn violated_by(self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self {
            Rule::UnderscoreBinding => !is_comment(trimmed) && !underscore_in_string(line),
            Rule::ForbiddenWord | Rule::AllowDeadCode => true,
            Rule::StarsInComment => !trimmed.starts_with("///"),
            Rule::UppercaseComment => comment_text(trimmed).is_some_and(|text| {
                let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }),
        }
    }
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with("//") || trimmed.contains("/*")
}

fn underscore_in_string(line: &str) -> bool {
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn comment_text(trimmed: &str) -> Option<&str> {
    if let Some(rest) = trimmed.strip_prefix("///") {
        Some(rest.trim())
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        Some(rest.trim())
    } else if let Some(idx) = trimmed.find("/*") {
        let rest = &trimmed[idx + 2..];
        Some(rest.find("*/").map_or(rest, |end| &rest[..end]).trim())
    } else {
        None
    }
}

// Collects every violating line of one file for one rule.
struct ViolationCollector {
    rule: Rule,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl ViolationCollector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.headline(),
            self.file_path.to_str().unwrap_or("?")
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.rule.advice()));
        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.violated_by(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn rust_sources() -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(".")
        .into_iter()
        .filter_entry(|e| !SKIPPED_DIRS.iter().any(|dir| e.path().starts_with(dir)))
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
}

fn scan(rule: Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern())?;
    let mut searcher = Searcher::new();
    for entry in rust_sources() {
        if entry.file_name() == "build.rs" && !rule.scans_build_script() {
            continue;
        }
        let mut collector = ViolationCollector::new(rule, entry.path());
        searcher.search_path(&matcher, entry.path(), &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in ["rotate", "indices", "study", "src", "tests", "benches"] {
        println!("cargo:rerun-if-changed={dir}");
    }

    for rule in Rule::ALL {
        if let Err(e) = scan(rule) {
            // Shown in cargo's output before the build fails.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
