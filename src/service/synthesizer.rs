//! Code synthesis boundary.
//!
//! [`CodeSynthesizer`] turns a brief into application files. This module also
//! owns the prompt text and the parser that splits raw model output into a
//! [`FileSet`]; provider clients such as `GeminiSynthesizer` only move bytes.

use std::fmt::Write as _;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::models::{Attachment, FileSet, Framework, Language, TestCase};
use crate::errors::SynthesisError;

/// Which request shape produced a synthesis call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Task,
    Legacy,
}

/// Input to a synthesis call.
#[derive(Debug, Clone)]
pub enum SynthesisRequest {
    /// Background task: brief plus acceptance checks.
    Task {
        task_id: String,
        brief: String,
        checks: Vec<String>,
        attachments: Vec<Attachment>,
    },
    /// Synchronous instruction-based request.
    Legacy {
        instructions: String,
        language: Language,
        framework: Framework,
        tests: Vec<TestCase>,
    },
}

impl SynthesisRequest {
    pub fn mode(&self) -> GenerationMode {
        match self {
            Self::Task { .. } => GenerationMode::Task,
            Self::Legacy { .. } => GenerationMode::Legacy,
        }
    }

    /// Task mode always targets plain JavaScript.
    pub fn language(&self) -> Language {
        match self {
            Self::Task { .. } => Language::JavaScript,
            Self::Legacy { language, .. } => *language,
        }
    }

    pub fn prompt(&self) -> String {
        match self {
            Self::Task {
                task_id,
                brief,
                checks,
                attachments,
            } => task_prompt(task_id, brief, checks, attachments),
            Self::Legacy {
                instructions,
                language,
                framework,
                tests,
            } => legacy_prompt(instructions, *language, *framework, tests),
        }
    }
}

/// Generates application source files from a request.
///
/// Implementations must return a non-empty [`FileSet`] on success.
#[async_trait]
pub trait CodeSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<FileSet, SynthesisError>;
}

const OUTPUT_FORMAT: &str = "Please structure your response as follows:\n```filename: [filename]\n[complete file content]\n```\n";

fn task_prompt(task_id: &str, brief: &str, checks: &[String], attachments: &[Attachment]) -> String {
    let mut requirements = String::from("Evaluation Requirements (MUST be satisfied):\n");
    for (i, check) in checks.iter().enumerate() {
        let _ = writeln!(requirements, "{}. {}", i + 1, check);
    }

    let mut attachment_info = String::new();
    if !attachments.is_empty() {
        attachment_info.push_str("Attachments provided:\n");
        for attachment in attachments {
            let preview: String = attachment.url.chars().take(100).collect();
            let _ = writeln!(attachment_info, "- {}: {}...", attachment.name, preview);
        }
        attachment_info.push_str("\nUse these attachments in your implementation as needed.\n");
    }

    format!(
        "You are an expert frontend web developer. Generate a complete, functional client-side web \
application for this specific task:

TASK ID: {task_id}
BRIEF: {brief}

{requirements}
{attachment_info}
CRITICAL CONSTRAINTS:
- Generate ONLY client-side code (HTML, CSS, JavaScript)
- NO server-side code whatsoever
- All functionality must work in a web browser without a server
- Must be deployable to GitHub Pages (static hosting only)
- Handle URL parameters (e.g., ?url=...) using JavaScript
- Use fetch() API for any external requests (if allowed by CORS)
- Include error handling for all operations

SPECIFIC REQUIREMENTS:
1. Generate COMPLETE, WORKING code - no placeholders
2. Create separate HTML, CSS, and JavaScript files
3. Implement ALL requirements from the brief
4. Ensure ALL evaluation checks can be satisfied
5. Include proper error handling and user feedback
6. Make the interface responsive and user-friendly
7. Use modern JavaScript (ES6+) and CSS3
8. Include comments explaining key functionality

IMPLEMENTATION NOTES:
- If handling images, use HTML5 Canvas or image processing libraries
- For URL parameters, use URLSearchParams API
- For file uploads, use FileReader API
- Store any data in localStorage if persistence is needed
- Include loading states and error messages

{OUTPUT_FORMAT}
Generate a functional, complete CLIENT-SIDE web application that satisfies all requirements:
"
    )
}

fn legacy_prompt(
    instructions: &str,
    language: Language,
    framework: Framework,
    tests: &[TestCase],
) -> String {
    let mut test_requirements = String::new();
    if !tests.is_empty() {
        test_requirements.push_str("Test Requirements:\n");
        for (i, test) in tests.iter().enumerate() {
            let _ = writeln!(test_requirements, "{}. {}", i + 1, test.description);
            let _ = writeln!(test_requirements, "   Input: {}", test.input);
            let _ = writeln!(test_requirements, "   Expected Output: {}", test.expected_output);
        }
    }

    format!(
        "You are an expert frontend web developer. Generate a complete, functional client-side web \
application based on the following instructions:

Instructions: {instructions}

Language: {language}
Framework: {framework}

{test_requirements}
IMPORTANT CONSTRAINTS:
- Generate ONLY client-side code (HTML, CSS, JavaScript)
- NO server-side code (no Node.js, Python, PHP, etc.)
- NO backend APIs or databases
- Use local storage for data persistence if needed
- All functionality must work in a web browser without a server
- The application must be deployable to GitHub Pages (static hosting)

Requirements:
1. Generate COMPLETE, WORKING code - no placeholders or comments like \"// Add your code here\"
2. Include ALL necessary files for a functional web application
3. Create separate HTML, CSS, and JavaScript files
4. Include proper error handling and validation
5. Make the code production-ready and well-structured
6. Ensure the code can pass the specified tests
7. Use vanilla JavaScript or the specified framework
8. Include responsive design with CSS

{OUTPUT_FORMAT}
For each file, use the format above. Start with index.html, then styles.css, then script.js or main.js.

Generate a functional, complete CLIENT-SIDE web application now:
",
        language = language.as_str(),
        framework = framework.as_str(),
    )
}

// ── Output parsing ───────────────────────────────────────────────────

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:html|css|javascript|js|python|py)?\n(.*?)\n```").unwrap()
});

/// Split raw model output into files.
///
/// Tries, in order:
/// 1. `filename:` markers (either `` ```filename: x `` opening a fence, or a
///    bare `filename: x` line followed by a fence);
/// 2. generic fenced blocks, named by content sniffing when there are several;
/// 3. the whole trimmed output as the language's main file.
///
/// The result always holds at least one file.
pub fn parse_generated_files(raw: &str, language: Language) -> FileSet {
    let files = parse_marked_files(raw);
    if !files.is_empty() {
        return files;
    }

    let files = parse_fenced_blocks(raw, language);
    if !files.is_empty() {
        return files;
    }

    let mut files = FileSet::new();
    files.insert(language.main_filename(), raw.trim());
    files
}

fn parse_marked_files(raw: &str) -> FileSet {
    let mut files = FileSet::new();
    let mut current: Option<String> = None;
    let mut content: Vec<&str> = Vec::new();
    let mut in_fence = false;

    fn flush(files: &mut FileSet, name: Option<String>, content: &[&str]) {
        if let Some(name) = name {
            let body = content.join("\n");
            let body = body.trim();
            if !body.is_empty() && !name.is_empty() {
                files.insert(name, body);
            }
        }
    }

    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("```filename:") {
            flush(&mut files, current.take(), &content);
            current = Some(rest.trim().to_string());
            content.clear();
            in_fence = true;
            continue;
        }
        if let Some(rest) = line.strip_prefix("filename:") {
            flush(&mut files, current.take(), &content);
            current = Some(rest.trim().to_string());
            content.clear();
            in_fence = false;
            continue;
        }
        if line.starts_with("```") {
            if current.is_some() {
                if in_fence {
                    flush(&mut files, current.take(), &content);
                    content.clear();
                    in_fence = false;
                } else {
                    in_fence = true;
                }
            }
            continue;
        }
        if current.is_some() {
            content.push(line);
        }
    }
    flush(&mut files, current, &content);
    files
}

fn parse_fenced_blocks(raw: &str, language: Language) -> FileSet {
    let blocks: Vec<&str> = FENCED_BLOCK
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    let mut files = FileSet::new();
    if let [only] = blocks.as_slice() {
        files.insert(language.main_filename(), only.trim());
        return files;
    }

    for (i, block) in blocks.iter().enumerate() {
        let name = if block.to_lowercase().contains("html") && block.contains("<!DOCTYPE") {
            "index.html".to_string()
        } else if block.contains("function") || block.contains("const") || block.contains("let") {
            "script.js".to_string()
        } else if block.contains("body") || block.contains("div") {
            "styles.css".to_string()
        } else {
            format!("file_{}.{}", i + 1, language.extension())
        };
        files.insert(name, block.trim());
    }
    files
}
