//! Path and command guardrails: tokenizer-lite bash inspection and path
//! containment, shared by every layer of the Policy Manager.

use regex::Regex;
use std::path::{Component, Path, PathBuf};

/// Literal commands always denied regardless of any configured tier, per the
/// baseline guardrail list.
pub const BUILTIN_DENY_COMMANDS: &[&str] = &[
    "sudo *",
    "su *",
    "rm -rf /",
    "rm -rf /*",
    "mkfs*",
    "dd of=/dev/*",
    ":(){ :|:& };:",
];

/// Roots a write is never permitted to touch, even inside an `allowedPaths` entry.
pub const PROTECTED_SYSTEM_ROOTS: &[&str] = &["/etc", "/System", "/bin", "/usr", "/Windows"];

/// Generate candidate match strings for a bash command: the raw command, the
/// `env`-stripped form, and the absolute-path-to-basename resolved form, each
/// further split at every word boundary into `prefix:suffix` pairs. This
/// lets a single glob pattern like `rm *` catch `rm -rf /`, `/usr/bin/rm -rf /`
/// and `env rm -rf /` alike.
pub fn bash_candidates(command: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut base_commands = vec![command.to_string()];

    let env_stripped = strip_env_prefix(command);
    if env_stripped != command {
        base_commands.push(env_stripped.to_string());
    }

    for cmd in base_commands.clone() {
        let words: Vec<&str> = cmd.split_whitespace().collect();
        if let Some(first) = words.first() {
            if first.contains('/') {
                if let Some(basename) = first.rsplit('/').next() {
                    if !basename.is_empty() {
                        let resolved = std::iter::once(basename)
                            .chain(words[1..].iter().copied())
                            .collect::<Vec<&str>>()
                            .join(" ");
                        if !base_commands.contains(&resolved) {
                            base_commands.push(resolved);
                        }
                    }
                }
            }
        }
    }

    for base in &base_commands {
        candidates.push(base.clone());
        let words: Vec<&str> = base.split_whitespace().collect();
        for i in 1..words.len() {
            let prefix = words[..i].join(" ");
            let suffix = words[i..].join(" ");
            candidates.push(format!("{prefix}:{suffix}"));
        }
    }

    candidates
}

fn strip_env_prefix(command: &str) -> &str {
    let trimmed = command.trim();
    if !trimmed.starts_with("env ") {
        return command;
    }
    let rest = trimmed[4..].trim_start();
    let mut pos = rest;
    loop {
        let word_end = pos.find(char::is_whitespace).unwrap_or(pos.len());
        let word = &pos[..word_end];
        if word.contains('=') && !word.starts_with('-') {
            pos = pos[word_end..].trim_start();
        } else {
            break;
        }
    }
    pos
}

/// Permissive glob: `*` and `**` both match everything, including `/`. Used
/// for bash command matching, where `/` carries no path semantics.
pub fn glob_match_permissive(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let mut regex_str = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                while i < chars.len() && chars[i] == '*' {
                    i += 1;
                }
                regex_str.push_str(".*");
                continue;
            }
            '?' => regex_str.push('.'),
            '.' | '^' | '$' | '+' | '{' | '}' | '[' | ']' | '|' | '(' | ')' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
            }
            c => regex_str.push(c),
        }
        i += 1;
    }
    regex_str.push('$');
    Regex::new(&regex_str)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Path-aware glob: a single `*` does not cross `/`, `**` does.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let mut regex_str = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if i + 1 < chars.len() && chars[i + 1] == '*' {
                    regex_str.push_str(".*");
                    i += 2;
                    continue;
                } else {
                    regex_str.push_str("[^/]*");
                }
            }
            '?' => regex_str.push_str("[^/]"),
            '.' | '^' | '$' | '+' | '{' | '}' | '[' | ']' | '|' | '(' | ')' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
            }
            c => regex_str.push(c),
        }
        i += 1;
    }
    regex_str.push('$');
    Regex::new(&regex_str)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Detect common bash obfuscation/evasion techniques: base64-pipe-to-shell,
/// command substitution wrapping a dangerous verb, `LD_PRELOAD`, `/proc/self`
/// tricks, scripting-language `-c`/`-e` one-liners, variable-indirection
/// execution, `bash -c`/`eval`/here-doc/here-string wrappers, and
/// `xargs`-to-shell piping.
pub fn detect_obfuscation(command: &str) -> bool {
    let lower = command.to_lowercase();

    if lower.contains("base64")
        && (lower.contains("| bash") || lower.contains("| sh") || lower.contains("| eval"))
    {
        return true;
    }

    if lower.contains("\\x") && lower.contains("printf") {
        return true;
    }

    if (lower.contains("$(") || lower.contains('`'))
        && (lower.contains("rm ")
            || lower.contains("chmod")
            || lower.contains("dd ")
            || lower.contains("curl")
            || lower.contains("wget")
            || lower.contains("nc "))
    {
        return true;
    }

    if lower.contains("ld_preload") || lower.contains("ld_library_path") {
        return true;
    }

    if lower.contains("/proc/self/exe") || lower.contains("/proc/self/fd") {
        return true;
    }

    if (lower.contains("python") || lower.contains("perl") || lower.contains("ruby"))
        && (lower.contains("-c") || lower.contains("-e"))
    {
        return true;
    }

    if Regex::new(r"[A-Za-z_]\w*=\S+\s*;.*\$")
        .map(|re| re.is_match(&lower))
        .unwrap_or(false)
    {
        return true;
    }

    if Regex::new(r"(?:^|\s|;)(bash|sh|dash)\s+-c\s")
        .map(|re| re.is_match(&lower))
        .unwrap_or(false)
    {
        return true;
    }

    if Regex::new(r"(?:^|\s|;)eval\s")
        .map(|re| re.is_match(&lower))
        .unwrap_or(false)
    {
        return true;
    }

    if Regex::new(r"(?:bash|sh|dash)\s+<<<")
        .map(|re| re.is_match(&lower))
        .unwrap_or(false)
    {
        return true;
    }

    if Regex::new(r"(?:bash|sh|dash)\s+<<\s*\w")
        .map(|re| re.is_match(&lower))
        .unwrap_or(false)
    {
        return true;
    }

    if lower.contains("xargs") && (lower.contains("sh") || lower.contains("bash")) {
        return true;
    }

    false
}

/// Detect a raw `..`-style path traversal attempt before resolution.
pub fn detect_path_traversal(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    if normalized.contains("../") || normalized.contains("/..") || normalized == ".." {
        return true;
    }
    if normalized.contains("/proc/self/") {
        return true;
    }
    false
}

pub fn extract_path(args: &serde_json::Value) -> Option<String> {
    args.get("file_path")
        .or_else(|| args.get("path"))
        .or_else(|| args.get("pattern"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Resolve `path` (without touching the filesystem — components are purely
/// lexical) and check that it falls within `root` or one of `extra_roots`.
pub fn is_within(path: &Path, root: &Path, extra_roots: &[PathBuf]) -> bool {
    let resolved = lexical_normalize(path);
    std::iter::once(root)
        .chain(extra_roots.iter().map(|p| p.as_path()))
        .any(|allowed| resolved.starts_with(&lexical_normalize(allowed)))
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Is `path` under one of the system roots that are never writable,
/// regardless of workspace configuration?
pub fn touches_protected_root(path: &Path) -> bool {
    let s = path.to_string_lossy();
    PROTECTED_SYSTEM_ROOTS
        .iter()
        .any(|root| s == *root || s.starts_with(&format!("{root}/")))
}
