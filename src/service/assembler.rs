//! Project file templates: README, LICENSE, CI workflow and test harness.
//!
//! Output depends only on the inputs and the timestamp the assembler was
//! built with.

use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::models::{FileSet, Language, TestCase};
use crate::errors::AssemblyError;

pub const README_PATH: &str = "README.md";
pub const LICENSE_PATH: &str = "LICENSE";
pub const WORKFLOW_PATH: &str = ".github/workflows/ci.yml";
pub const TEST_HARNESS_PATH: &str = "test.html";
pub const PACKAGE_JSON_PATH: &str = "package.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum License {
    #[default]
    Mit,
    Apache,
    Gpl,
}

impl License {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mit => "mit",
            Self::Apache => "apache",
            Self::Gpl => "gpl",
        }
    }
}

impl FromStr for License {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mit" => Ok(Self::Mit),
            "apache" => Ok(Self::Apache),
            "gpl" => Ok(Self::Gpl),
            _ => Err(format!("Invalid license: {} (expected mit, apache or gpl)", s)),
        }
    }
}

/// Inputs for the generated (non-model) project files.
#[derive(Debug, Clone)]
pub struct ProjectMetadata {
    pub repo_name: String,
    pub description: String,
    pub language: Language,
    pub license: License,
    pub author: String,
    pub tests: Vec<TestCase>,
}

pub struct ProjectFileAssembler {
    generated_at: DateTime<Utc>,
}

impl ProjectFileAssembler {
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self { generated_at }
    }

    /// README, LICENSE and CI workflow.
    pub fn project_files(&self, meta: &ProjectMetadata) -> FileSet {
        let mut files = FileSet::new();
        files.insert(README_PATH, self.readme(meta));
        files.insert(LICENSE_PATH, self.license(meta.license, &meta.author));
        files.insert(WORKFLOW_PATH, workflow());
        files
    }

    /// `test.html` harness and a minimal `package.json`.
    pub fn test_files(&self, tests: &[TestCase]) -> FileSet {
        let mut files = FileSet::new();
        files.insert(TEST_HARNESS_PATH, test_harness(tests));
        files.insert(PACKAGE_JSON_PATH, package_json());
        files
    }

    /// Merge generated files, synthesized files and the test harness, in
    /// that precedence order.
    pub fn assemble(
        &self,
        meta: &ProjectMetadata,
        synthesized: FileSet,
    ) -> Result<FileSet, AssemblyError> {
        FileSet::layered(
            self.project_files(meta),
            synthesized,
            self.test_files(&meta.tests),
        )
    }

    pub fn readme(&self, meta: &ProjectMetadata) -> String {
        let repo_name = &meta.repo_name;
        let language = meta.language.as_str();

        let mut test_section = String::new();
        if !meta.tests.is_empty() {
            test_section.push_str("\n## Tests\n\nThis project includes the following test cases:\n\n");
            for (i, test) in meta.tests.iter().enumerate() {
                let _ = writeln!(test_section, "{}. **{}**", i + 1, test.description);
                let _ = writeln!(test_section, "   - Input: `{}`", test.input);
                let _ = writeln!(test_section, "   - Expected Output: `{}`\n", test.expected_output);
            }
        }

        let generated = self.generated_at.format("%Y-%m-%d %H:%M:%S");
        let stack = title_case(language);

        format!(
            r#"# {repo_name}

{description}

## Overview

This is a static web application built with {language}. It runs entirely in the browser without requiring a server backend. The application is automatically deployed to GitHub Pages.

## Features

- Client-side web application
- Deployed to GitHub Pages
- Responsive design
- Test harness included
- CI/CD pipeline with GitHub Actions
- No server dependencies required
{test_section}
## Setup and Installation

### Prerequisites
- Modern web browser
- HTTP server (optional for local development)

### Installation
```bash
git clone <repository-url>
cd {repo_name}

# Option 1: open directly in a browser
open index.html

# Option 2: serve with Python
python -m http.server 8000

# Option 3: serve with Node.js
npx serve .
```

### Testing
Open the application in a web browser and verify functionality according to the test cases above.
Open test.html in your browser, or run `npm test`.

## Deployment

Every push to the main branch runs the GitHub Actions workflow:

1. **Validation**: HTML and JavaScript files are checked
2. **Test**: Automated tests run when available
3. **Deploy**: The site is published to GitHub Pages

## Project Structure

```
{repo_name}/
├── index.html          # Main HTML file
├── styles.css          # Styling
├── script.js           # JavaScript functionality
├── test.html           # Test interface
├── README.md           # Project documentation
├── LICENSE             # Project license
└── .github/
    └── workflows/
        └── ci.yml      # CI/CD pipeline
```

## Live Demo

Once deployed, the application is available at:
`https://[username].github.io/{repo_name}`

## Technology Stack

- **Frontend**: {stack}
- **Styling**: CSS3
- **Hosting**: GitHub Pages
- **CI/CD**: GitHub Actions

## License

This project is licensed under the terms specified in the LICENSE file.

---

*Generated on {generated} by pageforge*
"#,
            description = meta.description,
        )
    }

    pub fn license(&self, license: License, author: &str) -> String {
        let year = self.generated_at.year();
        match license {
            License::Mit => format!(
                r#"MIT License

Copyright (c) {year} {author}

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
"#
            ),
            License::Apache => format!(
                r#"Apache License
                           Version 2.0, January 2004
                        http://www.apache.org/licenses/

   Copyright {year} {author}

   Licensed under the Apache License, Version 2.0 (the "License");
   you may not use this file except in compliance with the License.
   You may obtain a copy of the License at

       http://www.apache.org/licenses/LICENSE-2.0

   Unless required by applicable law or agreed to in writing, software
   distributed under the License is distributed on an "AS IS" BASIS,
   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
   See the License for the specific language governing permissions and
   limitations under the License.
"#
            ),
            License::Gpl => format!(
                r#"GNU General Public License v3.0

Copyright (C) {year} {author}

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.
"#
            ),
        }
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// GitHub Actions workflow: validate, test, then deploy to Pages.
pub fn workflow() -> String {
    r#"name: Build, Test, and Deploy to GitHub Pages

on:
  push:
    branches: [ main ]
  pull_request:
    branches: [ main ]

permissions:
  contents: read
  pages: write
  id-token: write

concurrency:
  group: "pages"
  cancel-in-progress: false

jobs:
  build-and-test:
    runs-on: ubuntu-latest
    steps:
    - name: Checkout
      uses: actions/checkout@v4

    - name: Setup Node.js
      uses: actions/setup-node@v4
      with:
        node-version: '18'

    - name: Install dependencies
      run: |
        if [ -f package-lock.json ]; then
          npm ci
        else
          echo "No lockfile found, using static files"
        fi

    - name: Validate HTML
      run: |
        for file in *.html; do
          if [ -f "$file" ]; then
            if grep -q "<!DOCTYPE\|<html\|<head\|<body" "$file"; then
              echo "ok: $file"
            else
              echo "warning: $file may not be valid HTML"
            fi
          fi
        done

    - name: Check JavaScript syntax
      run: |
        for file in *.js; do
          if [ -f "$file" ]; then
            node -c "$file" && echo "ok: $file" || echo "syntax error: $file"
          fi
        done

    - name: Run tests
      run: |
        if [ -f test.js ] && [ -f package.json ]; then
          npm test
        elif [ -f test.html ]; then
          echo "HTML test harness found - manual testing required"
        else
          echo "No automated tests found"
        fi

    - name: Setup Pages
      uses: actions/configure-pages@v4

    - name: Upload artifact
      uses: actions/upload-pages-artifact@v3
      with:
        path: '.'

  deploy:
    environment:
      name: github-pages
      url: ${{ steps.deployment.outputs.page_url }}
    runs-on: ubuntu-latest
    needs: build-and-test
    steps:
      - name: Deploy to GitHub Pages
        id: deployment
        uses: actions/deploy-pages@v4
"#
    .to_string()
}

/// Escape text placed inside HTML element content.
fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Escape text placed inside a single-quoted JavaScript string.
fn js_escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace('<', "\\x3c")
}

const HARNESS_STYLE: &str = r#"        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 20px; background-color: #f5f5f5; }
        .container { max-width: 800px; margin: 0 auto; background: white; padding: 20px; border-radius: 8px; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }
        .test-case { margin: 20px 0; padding: 15px; border: 1px solid #ddd; border-radius: 5px; background-color: #fafafa; }
        .test-detail { margin: 10px 0; padding: 10px; border-radius: 3px; font-family: 'Courier New', monospace; }
        .input { background-color: #e3f2fd; border-left: 4px solid #2196f3; }
        .expected { background-color: #e8f5e8; border-left: 4px solid #4caf50; }
        .result { padding: 10px; margin: 10px 0; border-radius: 3px; border-left: 4px solid #ff9800; background-color: #fff3e0; }
        .pass { color: #155724; }
        .fail { color: #721c24; }
        button { background: #007bff; color: white; border: none; padding: 8px 16px; border-radius: 4px; cursor: pointer; }
        .run-all { background: #28a745; margin-bottom: 20px; }
        .summary { background: #17a2b8; color: white; padding: 15px; border-radius: 5px; margin-bottom: 20px; }
"#;

/// Browser test harness with one runnable placeholder per test case.
pub fn test_harness(tests: &[TestCase]) -> String {
    let count = tests.len();
    let mut html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Test Suite</title>
    <style>
{HARNESS_STYLE}    </style>
</head>
<body>
    <div class="container">
        <h1>Automated Test Suite</h1>
        <div class="summary">
            <p><strong>Test Count:</strong> {count} tests</p>
            <p><strong>Instructions:</strong> Click individual test buttons or "Run All Tests" to validate the application.</p>
        </div>

        <button class="run-all" onclick="runAllTests()">Run All Tests</button>
        <div id="overall-result"></div>
"#
    );

    for (i, test) in tests.iter().enumerate() {
        let n = i + 1;
        let _ = write!(
            html,
            r#"
        <div class="test-case">
            <h3>Test {n}: {description}</h3>
            <div class="test-detail input"><strong>Input:</strong> {input}</div>
            <div class="test-detail expected"><strong>Expected Output:</strong> {expected}</div>
            <div class="result" id="result-{n}">
                <button onclick="runTest{n}()">Run Test</button>
                <span id="test-{n}-result"></span>
            </div>
        </div>
"#,
            description = html_escape(&test.description),
            input = html_escape(&test.input),
            expected = html_escape(&test.expected_output),
        );
    }

    html.push_str("    </div>\n\n    <script>\n        let testResults = [];\n");

    for (i, test) in tests.iter().enumerate() {
        let n = i + 1;
        let _ = write!(
            html,
            r#"
        function runTest{n}() {{
            const description = '{description}';
            try {{
                console.log('Running Test {n}: ' + description);
                // Replace with a real assertion against the application.
                const testPassed = true;
                document.getElementById('test-{n}-result').innerHTML = testPassed
                    ? '<span class="pass">Test structure created (implement actual test logic)</span>'
                    : '<span class="fail">Test failed</span>';
                testResults[{idx}] = testPassed;
            }} catch (error) {{
                document.getElementById('test-{n}-result').innerHTML =
                    '<span class="fail">Error: ' + error.message + '</span>';
                testResults[{idx}] = false;
            }}
        }}
"#,
            description = js_escape(&test.description),
            idx = i,
        );
    }

    let _ = write!(
        html,
        r#"
        function runAllTests() {{
            testResults = new Array({count}).fill(false);
"#
    );
    for n in 1..=count {
        let _ = writeln!(html, "            runTest{n}();");
    }
    let _ = write!(
        html,
        r#"            setTimeout(() => {{
                const passed = testResults.filter(result => result === true).length;
                const overall = document.getElementById('overall-result');
                overall.innerHTML = passed === {count}
                    ? '<div class="result pass">All tests passed! (' + passed + '/{count})</div>'
                    : '<div class="result fail">Some tests failed: ' + passed + '/{count} passed</div>';
            }}, 100);
        }}
    </script>
</body>
</html>
"#
    );
    html
}

pub fn package_json() -> String {
    let manifest = serde_json::json!({
        "name": "static-web-app",
        "version": "1.0.0",
        "description": "Static web application with test suite",
        "main": "index.html",
        "scripts": {
            "test": "echo 'Open test.html in your browser to run tests'",
            "serve": "python -m http.server 8000",
            "start": "python -m http.server 8000"
        },
        "keywords": ["static", "web", "html", "css", "javascript"],
        "license": "MIT"
    });
    serde_json::to_string_pretty(&manifest).unwrap_or_default()
}
