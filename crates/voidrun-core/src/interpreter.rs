//! Code snippets executed through the exec stream.

use crate::dispatch::{OutputCollector, StreamHandler};
use crate::error::{Result, SdkError};
use crate::event::ExitStatus;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default execution limit for code snippets.
pub const DEFAULT_CODE_TIMEOUT: Duration = Duration::from_secs(60);

/// Python snippets at least this long run from a temp file.
const INLINE_PYTHON_LIMIT: usize = 1000;

/// Supported interpreters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    Python,
    JavaScript,
    TypeScript,
    Node,
    Bash,
    Sh,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Node => "node",
            Self::Bash => "bash",
            Self::Sh => "sh",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Self::Python),
            "javascript" | "js" => Ok(Self::JavaScript),
            "typescript" | "ts" => Ok(Self::TypeScript),
            "node" => Ok(Self::Node),
            "bash" => Ok(Self::Bash),
            "sh" => Ok(Self::Sh),
            other => Err(SdkError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// Options for [`crate::Sandbox::run_code`].
#[derive(Debug, Clone)]
pub struct CodeOptions {
    pub language: Language,
    pub timeout: Duration,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
}

impl Default for CodeOptions {
    fn default() -> Self {
        Self {
            language: Language::default(),
            timeout: DEFAULT_CODE_TIMEOUT,
            cwd: None,
            env: HashMap::new(),
        }
    }
}

impl CodeOptions {
    pub fn language(language: Language) -> Self {
        Self {
            language,
            ..Self::default()
        }
    }
}

/// Raw stream chunks as they arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Logs {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Outcome of a code snippet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeResult {
    pub success: bool,
    /// Value of the last output line, see [`parse_results`].
    pub results: Option<serde_json::Value>,
    pub stdout: String,
    pub stderr: String,
    /// Stderr, when there was any.
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub logs: Logs,
}

impl CodeResult {
    pub(crate) fn from_collector(collector: OutputCollector) -> Self {
        let stdout = collector.stdout.concat();
        let stderr = collector.stderr.concat();
        // Each stdout event is one output line with its newline stripped.
        let results = parse_results(&collector.stdout.join("\n"));
        let exit_code = collector.exit.as_ref().map(|s| s.exit_code);
        let success =
            collector.exit.as_ref().map_or(true, ExitStatus::success) && collector.errors.is_empty();
        Self {
            success,
            results,
            error: (!stderr.is_empty()).then(|| stderr.clone()),
            stdout,
            stderr,
            exit_code,
            logs: Logs {
                stdout: collector.stdout,
                stderr: collector.stderr,
            },
        }
    }
}

fn shell_quote(code: &str) -> String {
    format!("'{}'", code.replace('\'', r"'\''"))
}

/// Shell command that runs `code` with the given interpreter.
///
/// Short single-block Python runs inline with `python3 -c`; anything else
/// that needs an interpreter file is written to `/tmp/code_{stamp}.{ext}`
/// via a quoted heredoc and removed afterwards. The heredoc body follows the
/// whole command line, since its terminator must stand alone.
pub fn build_command(code: &str, language: Language, stamp: i64) -> String {
    match language {
        Language::Python => {
            if code.len() < INLINE_PYTHON_LIMIT && !code.contains("\n\n") {
                format!("python3 -c {}", shell_quote(code))
            } else {
                let file = format!("/tmp/code_{stamp}.py");
                format!("cat > {file} << 'EOFPYTHON' && python3 {file} && rm -f {file}\n{code}\nEOFPYTHON")
            }
        }
        Language::JavaScript | Language::TypeScript | Language::Node => {
            let file = format!("/tmp/code_{stamp}.js");
            format!("cat > {file} << 'EOFJS' && node {file} && rm -f {file}\n{code}\nEOFJS")
        }
        Language::Bash | Language::Sh => format!("bash -c {}", shell_quote(code)),
    }
}

/// Value of a snippet's output.
///
/// The last line is parsed as JSON; failing that it is returned as a string,
/// unless it is `undefined` or `None`, in which case the whole trimmed output
/// is. Empty output has no value.
pub fn parse_results(output: &str) -> Option<serde_json::Value> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return None;
    }
    let last = trimmed.lines().last().unwrap_or(trimmed);
    if let Ok(value) = serde_json::from_str(last) {
        return Some(value);
    }
    if !last.is_empty() && last != "undefined" && last != "None" {
        return Some(serde_json::Value::String(last.to_string()));
    }
    Some(serde_json::Value::String(trimmed.to_string()))
}

/// Forwards every event to `inner` while collecting it.
pub(crate) struct Tee<'a, H: ?Sized> {
    pub collector: OutputCollector,
    pub inner: &'a mut H,
}

impl<'a, H: StreamHandler + ?Sized> Tee<'a, H> {
    pub fn new(inner: &'a mut H) -> Self {
        Self {
            collector: OutputCollector::default(),
            inner,
        }
    }
}

impl<H: StreamHandler + ?Sized> StreamHandler for Tee<'_, H> {
    fn on_stdout(&mut self, data: &str) {
        self.collector.on_stdout(data);
        self.inner.on_stdout(data);
    }

    fn on_stderr(&mut self, data: &str) {
        self.collector.on_stderr(data);
        self.inner.on_stderr(data);
    }

    fn on_exit(&mut self, status: ExitStatus) {
        self.collector.on_exit(status.clone());
        self.inner.on_exit(status);
    }

    fn on_error(&mut self, error: &SdkError) {
        self.collector.on_error(error);
        self.inner.on_error(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_python_inline() {
        let cmd = build_command("print('hi')", Language::Python, 1);
        assert_eq!(cmd, r#"python3 -c 'print('\''hi'\'')'"#);
    }

    #[test]
    fn test_python_blank_line_uses_file() {
        let cmd = build_command("import os\n\nprint(os.getcwd())", Language::Python, 42);
        assert_eq!(
            cmd,
            "cat > /tmp/code_42.py << 'EOFPYTHON' && python3 /tmp/code_42.py && rm -f /tmp/code_42.py\n\
             import os\n\nprint(os.getcwd())\nEOFPYTHON"
        );
    }

    #[test]
    fn test_python_long_uses_file() {
        let code = "x = 1\n".repeat(200);
        assert!(build_command(&code, Language::Python, 7).contains("/tmp/code_7.py"));
    }

    #[test]
    fn test_node_and_bash() {
        let js = build_command("console.log(1)", Language::TypeScript, 5);
        assert!(js.starts_with("cat > /tmp/code_5.js << 'EOFJS' && node /tmp/code_5.js"));
        assert!(js.ends_with("\nconsole.log(1)\nEOFJS"));
        assert_eq!(build_command("echo $HOME", Language::Sh, 0), "bash -c 'echo $HOME'");
    }

    #[test]
    fn test_parse_results() {
        assert_eq!(parse_results(""), None);
        assert_eq!(parse_results("  \n"), None);
        assert_eq!(parse_results("loading\n{\"a\":1}\n"), Some(json!({"a": 1})));
        assert_eq!(parse_results("42"), Some(json!(42)));
        assert_eq!(parse_results("hello world\n"), Some(json!("hello world")));
        assert_eq!(parse_results("side effect\nNone\n"), Some(json!("side effect\nNone")));
        assert_eq!(parse_results("undefined"), Some(json!("undefined")));
    }

    #[test]
    fn test_language_from_str() {
        assert_eq!("Python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("js".parse::<Language>().unwrap(), Language::JavaScript);
        assert!(matches!(
            "cobol".parse::<Language>(),
            Err(SdkError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_result_from_collector() {
        let collector = OutputCollector {
            stdout: vec!["a\n".into(), "3\n".into()],
            stderr: vec![],
            exit: Some(ExitStatus {
                exit_code: 0,
                error: None,
            }),
            errors: vec![],
        };
        let result = CodeResult::from_collector(collector);
        assert!(result.success);
        assert_eq!(result.stdout, "a\n3\n");
        assert_eq!(result.results, Some(json!(3)));
        assert_eq!(result.error, None);
        assert_eq!(result.logs.stdout.len(), 2);

        let failed = CodeResult::from_collector(OutputCollector {
            stderr: vec!["Traceback".into()],
            exit: Some(ExitStatus {
                exit_code: 1,
                error: None,
            }),
            ..Default::default()
        });
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("Traceback"));
        assert_eq!(failed.exit_code, Some(1));
    }

    #[test]
    fn test_result_from_line_events() {
        let result = CodeResult::from_collector(OutputCollector {
            stdout: vec!["computing".into(), "{\"answer\": 42}".into()],
            exit: Some(ExitStatus {
                exit_code: 0,
                error: None,
            }),
            ..Default::default()
        });
        assert_eq!(result.results, Some(json!({"answer": 42})));
        assert_eq!(result.stdout, "computing{\"answer\": 42}");

        let side_effect = CodeResult::from_collector(OutputCollector {
            stdout: vec!["side effect".into(), "None".into()],
            ..Default::default()
        });
        assert_eq!(side_effect.results, Some(json!("side effect\nNone")));
    }

    #[test]
    fn test_backend_error_is_not_success() {
        let result = CodeResult::from_collector(OutputCollector {
            exit: Some(ExitStatus {
                exit_code: 0,
                error: Some("timeout".into()),
            }),
            ..Default::default()
        });
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(0));
    }
}
