use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's own Rust sources.
const SOURCE_DIRS: [&str; 4] = ["baseline", "cli", "tests", "benches"];

const FORBIDDEN_WORDS: &str = "FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE";

// One source-hygiene rule: a line regex plus a filter that rejects false positives.
struct Rule {
    description: &'static str,
    pattern: String,
    is_violation: fn(&str) -> bool,
    advice: &'static str,
}

// Collects the violating lines of a single file.
struct LineCollector<'a> {
    rule: &'a Rule,
    violations: Vec<String>,
}

impl Sink for LineCollector<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.rule.is_violation)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

impl LineCollector<'_> {
    fn error_message(&self, file_path: &Path) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.description,
            file_path.display()
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.rule.advice));
        Some(error_msg)
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    if let Err(e) = check_sources(&rules()) {
        // eprintln is what surfaces the message in cargo's output.
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn rules() -> Vec<Rule> {
    vec![
        Rule {
            description: "underscore-prefixed identifiers",
            pattern: r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            is_violation: |line| !is_comment(line) && !underscore_only_in_strings(line),
            advice: "Underscore-prefixed names are not allowed in this project. Either use the binding or remove it.",
        },
        Rule {
            description: "forbidden comment words",
            pattern: format!(r"(//|/\*).*(?:{FORBIDDEN_WORDS})"),
            is_violation: |_| true,
            advice: "Comments describing edits ('FIXED', 'CHANGED', 'UPDATE', ...) are not allowed. Remove them.",
        },
        Rule {
            description: "'**' in regular comments",
            pattern: r"(//|/\*).*\*\*".to_string(),
            is_violation: |line| !is_doc_comment(line),
            advice: "The '**' pattern is only allowed in doc comments.",
        },
        Rule {
            description: "comments written entirely in uppercase",
            pattern: r"(//|/\*).*".to_string(),
            is_violation: is_shouting_comment,
            advice: "Comments where all alphabetic characters are uppercase are not allowed.",
        },
        Rule {
            description: "#[allow(dead_code)] attributes",
            pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
            is_violation: |_| true,
            advice: "Either use the code or remove it; #[allow(dead_code)] is not allowed.",
        },
    ]
}

fn check_sources(rules: &[Rule]) -> Result<(), Box<dyn Error>> {
    let files = source_files();
    let mut searcher = Searcher::new();
    for rule in rules {
        let matcher = RegexMatcher::new_line_matcher(&rule.pattern)?;
        for path in &files {
            let mut collector = LineCollector {
                rule,
                violations: Vec::new(),
            };
            searcher.search_path(&matcher, path, &mut collector)?;
            if let Some(error_message) = collector.error_message(path) {
                return Err(error_message.into());
            }
        }
    }
    Ok(())
}

fn source_files() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with("/*")
}

fn is_doc_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

// True when every underscore-prefixed word on the line sits inside a string literal.
fn underscore_only_in_strings(line: &str) -> bool {
    if !line.contains('"') {
        return false;
    }
    let code: String = line
        .split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 0)
        .map(|(_, part)| part)
        .collect::<Vec<_>>()
        .join(" ");
    !code
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|word| word.len() > 1 && word.starts_with('_'))
}

fn is_shouting_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    let comment_text = if let Some(rest) = trimmed.strip_prefix("///") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("//!") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        rest
    } else if let Some(idx) = line.find("/*") {
        let rest = &line[idx + 2..];
        rest.find("*/").map_or(rest, |end| &rest[..end])
    } else {
        return false;
    };
    let alpha: Vec<char> = comment_text.chars().filter(|c| c.is_alphabetic()).collect();
    // A single letter is a variable name, not shouting.
    alpha.len() > 1 && alpha.iter().all(|c| c.is_uppercase())
}
