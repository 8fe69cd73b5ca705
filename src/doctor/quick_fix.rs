//! Deterministic quick fixes
//!
//! Rules are tried in order. A rule fires when one of its trigger phrases
//! appears in the error text; its extractor then pulls out the parameter the
//! suggestion needs. An extractor that cannot find its parameter yields no
//! fix and the next rule is tried.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::Fix;

/// Suggestions produced by one rule
#[derive(Debug, Clone, PartialEq)]
pub struct QuickFix {
    pub rule: &'static str,
    pub fixes: Vec<Fix>,
    pub explanation: String,
}

struct Rule {
    name: &'static str,
    /// Lowercase phrases that select this rule
    triggers: &'static [&'static str],
    extract: fn(&str) -> Option<(Vec<Fix>, String)>,
}

const RULES: &[Rule] = &[
    Rule {
        name: "missing-module",
        triggers: &["cannot find module", "module not found", "no module named"],
        extract: missing_module,
    },
    Rule {
        name: "port-in-use",
        triggers: &["already in use", "eaddrinuse"],
        extract: port_in_use,
    },
    Rule {
        name: "command-not-found",
        triggers: &["command not found", "is not recognized as an internal or external command"],
        extract: command_not_found,
    },
    Rule {
        name: "permission-denied",
        triggers: &["permission denied", "eacces"],
        extract: permission_denied,
    },
    Rule {
        name: "missing-path",
        triggers: &["enoent", "no such file or directory"],
        extract: missing_path,
    },
    Rule {
        name: "undefined-identifier",
        triggers: &["is not defined"],
        extract: undefined_identifier,
    },
];

/// Install hints for tools people commonly lack
const KNOWN_TOOLS: &[(&str, &str, &str)] = &[
    ("node", "Node.js", "brew install node"),
    ("npm", "Node.js", "brew install node"),
    ("npx", "Node.js", "brew install node"),
    ("yarn", "Yarn", "npm install -g yarn"),
    ("pnpm", "pnpm", "npm install -g pnpm"),
    ("tsc", "TypeScript", "npm install -g typescript"),
    ("claude", "Claude Code", "npm install -g @anthropic-ai/claude-code"),
    ("python", "Python", "brew install python"),
    ("python3", "Python", "brew install python"),
    ("pip", "pip", "python3 -m ensurepip --upgrade"),
    ("pip3", "pip", "python3 -m ensurepip --upgrade"),
    ("git", "Git", "brew install git"),
    ("cargo", "Rust", "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh"),
    ("rustc", "Rust", "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh"),
    ("go", "Go", "brew install go"),
    ("jq", "jq", "brew install jq"),
];

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::error!("[termsage:doctor] Invalid quick-fix pattern {}: {}", pattern, e);
            None
        }
    }
}

static MODULE_RE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r#"(?i)(?:cannot find module|module not found:.*?can't resolve)\s+['"]([^'"]+)['"]"#));
static PY_MODULE_RE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r#"(?i)no module named\s+['"]?([\w.\-]+)['"]?"#));
static PORT_RE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)(?:port\s+|EADDRINUSE[^\n]*?:)(\d{2,5})\b"));
static CMD_ZSH_RE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)command not found:\s*([\w.+\-]+)"));
static CMD_BASH_RE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)([\w.+\-]+):\s*command not found"));
static CMD_WIN_RE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"'([\w.+\-]+)' is not recognized as an internal or external command"));
static EACCES_RE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)EACCES: permission denied,\s*\w+\s+'([^']+)'"));
static PERM_PREFIX_RE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)permission denied:\s*'?([^\s']+)'?"));
static PERM_SUFFIX_RE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)([^\s:]+):\s*permission denied"));
static ENOENT_RE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)ENOENT[^'\n]*'([^']+)'"));
static NO_SUCH_FILE_RE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)([^\s:]+):\s*no such file or directory"));
static UNDEFINED_RE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"([A-Za-z_$][\w$]*) is not defined"));

/// First rule that can produce a complete suggestion for `error_text`
pub fn quick_fix(error_text: &str) -> Option<QuickFix> {
    let lower = error_text.to_lowercase();
    RULES
        .iter()
        .filter(|rule| rule.triggers.iter().any(|t| lower.contains(t)))
        .find_map(|rule| {
            let (fixes, explanation) = (rule.extract)(error_text)?;
            if fixes.is_empty() {
                return None;
            }
            Some(QuickFix {
                rule: rule.name,
                fixes,
                explanation,
            })
        })
}

fn capture(re: &Lazy<Option<Regex>>, text: &str) -> Option<String> {
    let re = re.as_ref()?;
    let value = re.captures(text)?.get(1)?.as_str();
    let value = value.trim().trim_matches(['\'', '"', '`']);
    (!value.is_empty()).then(|| value.to_string())
}

/// Quote `arg` for a POSIX shell unless it is made only of safe characters
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./@%+=:,~".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// `@scope/pkg/sub/path` -> `@scope/pkg`, `pkg/sub` -> `pkg`
fn package_name(specifier: &str) -> Option<String> {
    let mut parts = specifier.split('/');
    let first = parts.next().filter(|p| !p.is_empty())?;
    if first.starts_with('@') {
        let name = parts.next().filter(|p| !p.is_empty())?;
        Some(format!("{}/{}", first, name))
    } else {
        Some(first.to_string())
    }
}

fn missing_module(text: &str) -> Option<(Vec<Fix>, String)> {
    if let Some(specifier) = capture(&MODULE_RE, text) {
        if specifier.starts_with('.') || specifier.starts_with('/') {
            let fix = Fix::advice(
                "Check the import path",
                format!(
                    "'{}' is a relative import. Verify the file exists and the path is correct relative to the importing file.",
                    specifier
                ),
                0.7,
            )
            .with_file_edit();
            return Some((vec![fix], format!("Local module '{}' could not be resolved.", specifier)));
        }

        let package = package_name(&specifier)?;
        let fix = Fix::command(
            format!("Install {}", package),
            format!("The package '{}' is not installed in this project.", package),
            format!("npm install {}", shell_quote(&package)),
            0.9,
        );
        return Some((vec![fix], format!("Module '{}' is not installed.", package)));
    }

    let module = capture(&PY_MODULE_RE, text)?;
    let package = module.split('.').next().filter(|p| !p.is_empty())?.to_string();
    let fix = Fix::command(
        format!("Install {}", package),
        format!("The Python package '{}' is not installed.", package),
        format!("pip install {}", shell_quote(&package)),
        0.85,
    );
    Some((vec![fix], format!("Python module '{}' is not installed.", package)))
}

fn port_in_use(text: &str) -> Option<(Vec<Fix>, String)> {
    let port: u16 = capture(&PORT_RE, text)?.parse().ok().filter(|p| *p > 0)?;
    let fixes = vec![
        Fix::command(
            format!("Free port {}", port),
            format!("Stop the process currently listening on port {}.", port),
            format!("lsof -ti:{} | xargs kill -9", port),
            0.85,
        ),
        Fix::advice(
            "Use a different port",
            format!("Start the server on a port other than {}.", port),
            0.5,
        ),
    ];
    Some((fixes, format!("Another process is already listening on port {}.", port)))
}

fn command_not_found(text: &str) -> Option<(Vec<Fix>, String)> {
    let command = capture(&CMD_ZSH_RE, text)
        .or_else(|| capture(&CMD_BASH_RE, text))
        .or_else(|| capture(&CMD_WIN_RE, text))?;

    let explanation = format!("'{}' is not installed or not on your PATH.", command);
    let fix = match KNOWN_TOOLS.iter().find(|(name, _, _)| *name == command) {
        Some((_, product, install)) => Fix::command(
            format!("Install {}", product),
            format!("'{}' is provided by {}.", command, product),
            *install,
            0.8,
        ),
        None => Fix::advice(
            format!("Install {}", command),
            format!("Install '{}' or check the command for typos.", command),
            0.5,
        ),
    };
    Some((vec![fix], explanation))
}

fn permission_denied(text: &str) -> Option<(Vec<Fix>, String)> {
    let path = capture(&EACCES_RE, text)
        .or_else(|| capture(&PERM_PREFIX_RE, text))
        .or_else(|| capture(&PERM_SUFFIX_RE, text))?;

    let looks_executable = path.ends_with(".sh") || path.starts_with("./");
    let fix = if looks_executable {
        Fix::command(
            "Make it executable",
            format!("'{}' is missing the execute permission.", path),
            format!("chmod +x {}", shell_quote(&path)),
            0.8,
        )
    } else {
        Fix::command(
            "Grant read/write access",
            format!("Your user lacks permission to access '{}'.", path),
            format!("chmod u+rw {}", shell_quote(&path)),
            0.7,
        )
    };
    Some((vec![fix], format!("Permission denied for '{}'.", path)))
}

fn missing_path(text: &str) -> Option<(Vec<Fix>, String)> {
    let path = capture(&ENOENT_RE, text).or_else(|| capture(&NO_SUCH_FILE_RE, text))?;

    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(&path);
    let is_file = file_name.contains('.') && !file_name.starts_with('.');
    let fix = if is_file {
        let parent = path
            .rfind(['/', '\\'])
            .map(|i| &path[..i])
            .filter(|p| !p.is_empty());
        let command = match parent {
            Some(parent) => format!(
                "mkdir -p {} && touch {}",
                shell_quote(parent),
                shell_quote(&path)
            ),
            None => format!("touch {}", shell_quote(&path)),
        };
        Fix::command(
            "Create the missing file",
            format!("'{}' does not exist.", path),
            command,
            0.6,
        )
    } else {
        Fix::command(
            "Create the missing directory",
            format!("'{}' does not exist.", path),
            format!("mkdir -p {}", shell_quote(&path)),
            0.6,
        )
    };
    Some((vec![fix], format!("The path '{}' does not exist.", path)))
}

fn undefined_identifier(text: &str) -> Option<(Vec<Fix>, String)> {
    let ident = capture(&UNDEFINED_RE, text)?;

    let fix = if ident == "require" {
        Fix::advice(
            "Use ES module imports",
            "This file runs as an ES module. Replace require() with import, or rename the file to .cjs.",
            0.75,
        )
    } else {
        Fix::advice(
            format!("Define or import '{}'", ident),
            format!("'{}' is used but never declared in scope. Import it or declare it before use.", ident),
            0.6,
        )
    };
    Some((
        vec![fix.with_file_edit()],
        format!("'{}' is not defined.", ident),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_command(text: &str) -> Option<String> {
        quick_fix(text)?.fixes.into_iter().find_map(|f| f.command)
    }

    #[test]
    fn test_bare_module_installs_package() {
        assert_eq!(
            first_command("Error: Cannot find module 'lodash'").as_deref(),
            Some("npm install lodash")
        );
        assert_eq!(
            first_command("Error: Cannot find module '@babel/core/lib/x'").as_deref(),
            Some("npm install @babel/core")
        );
    }

    #[test]
    fn test_relative_module_suggests_path_check() {
        let fix = quick_fix("Error: Cannot find module './utils'").unwrap();
        assert_eq!(fix.rule, "missing-module");
        assert!(fix.fixes[0].command.is_none());
        assert!(fix.fixes[0].requires_file_edit);
    }

    #[test]
    fn test_python_module() {
        assert_eq!(
            first_command("ModuleNotFoundError: No module named 'requests.adapters'").as_deref(),
            Some("pip install requests")
        );
    }

    #[test]
    fn test_port_in_use() {
        let command = first_command("port 3000 already in use").unwrap();
        assert!(command.contains("3000"));
        let command =
            first_command("Error: listen EADDRINUSE: address already in use :::8080").unwrap();
        assert_eq!(command, "lsof -ti:8080 | xargs kill -9");
    }

    #[test]
    fn test_command_not_found_variants() {
        assert_eq!(
            first_command("zsh: command not found: yarn").as_deref(),
            Some("npm install -g yarn")
        );
        assert_eq!(
            first_command("bash: pnpm: command not found").as_deref(),
            Some("npm install -g pnpm")
        );

        let fix = quick_fix("bash: frobnicate: command not found").unwrap();
        assert!(fix.fixes[0].command.is_none());
        assert_eq!(fix.fixes[0].title, "Install frobnicate");
    }

    #[test]
    fn test_permission_denied() {
        assert_eq!(
            first_command("bash: ./deploy.sh: Permission denied").as_deref(),
            Some("chmod +x ./deploy.sh")
        );
        assert_eq!(
            first_command("Error: EACCES: permission denied, open '/var/log/app.log'").as_deref(),
            Some("chmod u+rw /var/log/app.log")
        );
        // Nothing to point the fix at
        assert!(quick_fix("Permission denied").is_none());
    }

    #[test]
    fn test_missing_path() {
        assert_eq!(
            first_command("Error: ENOENT: no such file or directory, open 'config/app.json'").as_deref(),
            Some("mkdir -p config && touch config/app.json")
        );
        assert_eq!(
            first_command("bash: cd: build: No such file or directory").as_deref(),
            Some("mkdir -p build")
        );
    }

    #[test]
    fn test_paths_with_spaces_are_quoted() {
        assert_eq!(
            first_command(
                "Error: ENOENT: no such file or directory, open '/home/me/My Project/config.json'"
            )
            .as_deref(),
            Some("mkdir -p '/home/me/My Project' && touch '/home/me/My Project/config.json'")
        );
        assert_eq!(
            first_command("Error: EACCES: permission denied, open '/srv/$HOME; rm -rf x.log'").as_deref(),
            Some("chmod u+rw '/srv/$HOME; rm -rf x.log'")
        );
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_undefined_identifier() {
        let fix = quick_fix("ReferenceError: fetchUser is not defined").unwrap();
        assert_eq!(fix.rule, "undefined-identifier");
        assert!(fix.fixes[0].title.contains("fetchUser"));
        assert!(fix.fixes[0].requires_file_edit);
    }

    #[test]
    fn test_failed_extraction_falls_through() {
        // Trigger matches but no module name can be extracted
        assert!(quick_fix("webpack: module not found somewhere").is_none());
        assert!(quick_fix("Segmentation fault").is_none());
    }
}
