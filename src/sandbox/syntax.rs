//! Python syntax validation.
//!
//! tree-sitter rejects most broken sources without a subprocess. Its grammar
//! is more lenient than CPython (Python 2 `print`, dedents that match no outer
//! level, tab/space mixing), so sources it accepts are confirmed by running
//! `ast.parse` in a real interpreter.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tree_sitter::Parser;

/// Reads a module from stdin and exits nonzero if it does not compile.
const AST_CHECK: &str = "import ast, sys; ast.parse(sys.stdin.read())";

/// Default interpreter for the confirmation pass.
pub const DEFAULT_CHECK_INTERPRETER: &str = "python3";

/// Default deadline for the confirmation pass.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether `source` parses under the tree-sitter Python grammar.
///
/// Returns false if the grammar cannot be loaded.
pub fn is_valid_python(source: &str) -> bool {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&tree_sitter_python::LANGUAGE.into()) {
        tracing::error!(error = %e, "Failed to load Python grammar");
        return false;
    }

    match parser.parse(source, None) {
        Some(tree) => !tree.root_node().has_error(),
        None => false,
    }
}

/// Two-stage Python syntax check: tree-sitter, then the interpreter's own parser.
#[derive(Debug, Clone)]
pub struct SyntaxChecker {
    interpreter: Option<String>,
    timeout: Duration,
}

impl Default for SyntaxChecker {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_INTERPRETER, DEFAULT_CHECK_TIMEOUT)
    }
}

impl SyntaxChecker {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: Some(interpreter.into()),
            timeout,
        }
    }

    /// Checker that never starts a subprocess.
    pub fn grammar_only() -> Self {
        Self {
            interpreter: None,
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    /// Whether `source` is a valid Python module.
    ///
    /// When the interpreter cannot give a verdict (missing, timed out) the
    /// tree-sitter result stands.
    pub async fn is_valid(&self, source: &str) -> bool {
        if !is_valid_python(source) {
            return false;
        }
        let Some(ref interpreter) = self.interpreter else {
            return true;
        };
        match self.interpreter_verdict(interpreter, source).await {
            Some(valid) => {
                if !valid {
                    tracing::debug!(
                        interpreter = %interpreter,
                        "Interpreter rejected source accepted by grammar"
                    );
                }
                valid
            }
            None => true,
        }
    }

    async fn interpreter_verdict(&self, interpreter: &str, source: &str) -> Option<bool> {
        let mut child = match Command::new(interpreter)
            .args(["-c", AST_CHECK])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::debug!(
                    interpreter = %interpreter,
                    error = %e,
                    "Syntax check interpreter unavailable"
                );
                return None;
            }
        };

        let mut stdin = child.stdin.take()?;
        let check = async move {
            stdin.write_all(source.as_bytes()).await?;
            drop(stdin);
            child.wait().await
        };

        match tokio::time::timeout(self.timeout, check).await {
            Ok(Ok(status)) => Some(status.success()),
            Ok(Err(e)) => {
                tracing::warn!(
                    interpreter = %interpreter,
                    error = %e,
                    "Syntax check failed to run"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Syntax check timed out"
                );
                None
            }
        }
    }
}

/// Whether `python3` can be started, for tests that need the real parser.
#[cfg(test)]
pub(crate) fn python_available() -> bool {
    std::process::Command::new(DEFAULT_CHECK_INTERPRETER)
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// CPython's verdict on `source`, used as the oracle in tests.
#[cfg(test)]
pub(crate) fn cpython_parses(source: &str) -> bool {
    use std::io::Write as _;

    let mut child = std::process::Command::new(DEFAULT_CHECK_INTERPRETER)
        .args(["-c", AST_CHECK])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(source.as_bytes())
        .unwrap();
    child.wait().unwrap().success()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sources the grammar accepts but CPython rejects.
    const GRAMMAR_ONLY_VALID: [&str; 3] = [
        "print 'hello'\n",
        "import unittest\n\nclass TestA(unittest.TestCase):\n    def test_a(self):\n        self.assertTrue(True)\n      x = 1\n",
        "if True:\n        x = 1\n\ty = 2\n",
    ];

    #[test]
    fn test_valid_module() {
        let source = "import unittest\n\nclass TestX(unittest.TestCase):\n    def test_a(self):\n        self.assertTrue(True)\n";
        assert!(is_valid_python(source));
    }

    #[test]
    fn test_broken_syntax() {
        assert!(!is_valid_python("def f(:\n    return"));
        assert!(!is_valid_python("class Test(unittest.TestCase)\n    pass\n"));
    }

    #[test]
    fn test_empty_source_is_valid() {
        assert!(is_valid_python(""));
    }

    #[tokio::test]
    async fn test_interpreter_rejects_what_grammar_accepts() {
        if !python_available() {
            return;
        }
        let checker = SyntaxChecker::default();
        for source in GRAMMAR_ONLY_VALID {
            assert!(!cpython_parses(source), "{source}");
            assert!(!checker.is_valid(source).await, "{source}");
        }
        assert!(checker.is_valid("def f():\n    return 1\n").await);
    }

    #[tokio::test]
    async fn test_missing_interpreter_falls_back_to_grammar() {
        let checker = SyntaxChecker::new("/nonexistent/python", Duration::from_secs(1));
        assert!(checker.is_valid("x = 1\n").await);
        assert!(!checker.is_valid("def f(:\n").await);
    }

    #[tokio::test]
    async fn test_grammar_only_skips_interpreter() {
        let checker = SyntaxChecker::grammar_only();
        assert!(checker.is_valid("x = (1,\n 2)\n").await);
        assert!(!checker.is_valid("class X\n").await);
    }
}
