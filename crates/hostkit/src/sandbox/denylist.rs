//! Dangerous-operation screening for commands and scanner options.
//!
//! This is a usability safeguard that stops obvious accidents (a stray
//! recursive delete, a scanner told to overwrite a file). It is not a
//! security boundary: a determined caller with shell access on the remote
//! side can always express the same operation another way.

/// Substrings refused in remote shell commands (matched case-insensitively
/// on whitespace-collapsed text).
pub const DEFAULT_SHELL_PATTERNS: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "mkfs",
    "dd if=",
    "> /dev/",
    "format ",
    "fdisk",
    ":(){",
];

/// Scanner flags that read or write local files, pull targets from
/// somewhere other than the request, or run NSE scripts.
pub const DEFAULT_SCAN_FLAGS: &[&str] = &[
    "-oN",
    "-oX",
    "-oS",
    "-oG",
    "-oA",
    "-iL",
    "-iR",
    "--resume",
    "--datadir",
    "--servicedb",
    "--versiondb",
    "--stylesheet",
    "--excludefile",
    "--script",
    "--script-args",
    "--script-args-file",
    "-sC",
];

/// Characters that would let an option string escape into a shell.
const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '<', '>', '\n', '\r'];

/// Lowercase and collapse whitespace runs to a single space. Leading and
/// trailing whitespace is kept (as one space) so patterns like `"format "`
/// keep their meaning.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.extend(c.to_lowercase());
            in_space = false;
        }
    }
    out
}

/// A compiled substring denylist.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    patterns: Vec<(String, String)>,
}

impl Denylist {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter(|p| !p.as_ref().trim().is_empty())
            .map(|p| (p.as_ref().to_string(), normalize(p.as_ref())))
            .collect();
        Self { patterns }
    }

    /// The first configured pattern found in `text`.
    pub fn find(&self, text: &str) -> Option<&str> {
        let haystack = normalize(text);
        self.patterns
            .iter()
            .find(|(_, needle)| haystack.contains(needle.as_str()))
            .map(|(original, _)| original.as_str())
    }
}

/// Screen a remote shell command. Returns a description of the problem.
pub fn check_command(denylist: &Denylist, command: &str) -> Option<String> {
    if let Some(pattern) = denylist.find(command) {
        return Some(format!("potentially destructive command blocked (matched '{pattern}')"));
    }
    let compact: String = command.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.contains(":(){") || compact.contains(":|:&") {
        return Some("potentially destructive command blocked (fork bomb)".into());
    }
    if has_forced_recursive_rm(command) {
        return Some("potentially destructive command blocked (recursive forced rm)".into());
    }
    None
}

/// `rm` invoked with both a recursive and a force flag, in any spelling
/// (`-r -f`, `-Rf`, `--recursive --force`, ...).
fn has_forced_recursive_rm(command: &str) -> bool {
    let words: Vec<&str> = command
        .split(|c: char| c.is_whitespace() || matches!(c, ';' | '&' | '|' | '(' | ')'))
        .filter(|w| !w.is_empty())
        .collect();

    words.iter().enumerate().any(|(i, word)| {
        let is_rm = *word == "rm" || word.ends_with("/rm");
        if !is_rm {
            return false;
        }
        let mut recursive = false;
        let mut force = false;
        for flag in words.iter().skip(i + 1).take_while(|w| w.starts_with('-')) {
            match *flag {
                "--recursive" => recursive = true,
                "--force" => force = true,
                "--" => break,
                short if !short.starts_with("--") => {
                    recursive |= short.contains('r') || short.contains('R');
                    force |= short.contains('f');
                }
                _ => {}
            }
        }
        recursive && force
    })
}

/// Screen an extra-options string for the scanner. `flags` are refused as
/// whole tokens or as a prefix (`-oNout.txt`, `--datadir=/tmp`).
pub fn check_scan_options(flags: &[String], options: &str) -> Option<String> {
    if let Some(c) = options.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Some(format!("shell metacharacter {c:?} not allowed in scanner options"));
    }
    for token in options.split_whitespace() {
        for flag in flags {
            let long = flag.starts_with("--");
            let hit = if long {
                token == flag || token.starts_with(&format!("{flag}="))
            } else {
                token.starts_with(flag.as_str())
            };
            if hit {
                return Some(format!("scanner option '{flag}' is not allowed"));
            }
        }
    }
    None
}

/// Screen a path on a remote host (scp or FTP side of a transfer).
pub fn check_remote_path(denylist: &Denylist, path: &str) -> Option<String> {
    if path.starts_with('-') {
        return Some("remote path must not start with '-'".into());
    }
    if let Some(c) = path
        .chars()
        .find(|c| c.is_control() || SHELL_METACHARACTERS.contains(c) || matches!(c, '\'' | '"' | '\\'))
    {
        return Some(format!("character {c:?} not allowed in a remote path"));
    }
    denylist
        .find(path)
        .map(|pattern| format!("remote path blocked (matched '{pattern}')"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> Denylist {
        Denylist::new(DEFAULT_SHELL_PATTERNS)
    }

    fn scan_flags() -> Vec<String> {
        DEFAULT_SCAN_FLAGS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn blocks_default_patterns_case_and_space_insensitively() {
        assert!(check_command(&shell(), "rm -rf /tmp/x").is_some());
        assert!(check_command(&shell(), "RM   -RF  /").is_some());
        assert!(check_command(&shell(), "sudo mkfs.ext4 /dev/sda1").is_some());
        assert!(check_command(&shell(), "echo hi > /dev/sda").is_some());
    }

    #[test]
    fn blocks_split_and_long_rm_flags() {
        assert!(check_command(&shell(), "rm -r -f build").is_some());
        assert!(check_command(&shell(), "cd /; /bin/rm -Rf var").is_some());
        assert!(check_command(&shell(), "rm --recursive --force data").is_some());
    }

    #[test]
    fn blocks_fork_bomb() {
        assert!(check_command(&shell(), ":(){ :|:& };:").is_some());
    }

    #[test]
    fn allows_ordinary_commands() {
        assert!(check_command(&shell(), "uptime").is_none());
        assert!(check_command(&shell(), "rm old.log").is_none());
        assert!(check_command(&shell(), "rm -r emptydir").is_none());
        assert!(check_command(&shell(), "cat /etc/os-release | grep information").is_none());
    }

    #[test]
    fn pattern_with_trailing_space_is_preserved() {
        let list = Denylist::new(["format "]);
        assert!(list.find("format c:").is_some());
        assert!(list.find("--format=json").is_none());
    }

    #[test]
    fn empty_patterns_are_ignored() {
        let list = Denylist::new(["", "  "]);
        assert!(list.find("anything").is_none());
        assert!(list.find("").is_none());
    }

    #[test]
    fn scan_options_reject_metacharacters() {
        assert!(check_scan_options(&scan_flags(), "-T4; rm -rf /").is_some());
        assert!(check_scan_options(&scan_flags(), "$(id)").is_some());
        assert!(check_scan_options(&scan_flags(), "-T4 --open").is_none());
    }

    #[test]
    fn scan_options_reject_file_flags() {
        assert!(check_scan_options(&scan_flags(), "-oN out.txt").is_some());
        assert!(check_scan_options(&scan_flags(), "-oXscan.xml").is_some());
        assert!(check_scan_options(&scan_flags(), "--datadir=/tmp").is_some());
        assert!(check_scan_options(&scan_flags(), "-sV --osscan-limit").is_none());
    }

    #[test]
    fn scanner_scripts_are_refused() {
        for options in [
            "--script=http-enum",
            "--script vuln",
            "-sV --script-args=user=admin",
            "--script-args user=admin",
            "-sC",
            "-sCV",
        ] {
            assert!(check_scan_options(&scan_flags(), options).is_some(), "{options}");
        }
        assert!(check_scan_options(&scan_flags(), "-sV --version-light -T4").is_none());
    }

    #[test]
    fn remote_paths_reject_injection() {
        let empty = Denylist::default();
        assert!(check_remote_path(&empty, "/var/log/syslog").is_none());
        assert!(check_remote_path(&empty, "reports/q1 final.pdf").is_none());
        assert!(check_remote_path(&empty, "a;reboot").is_some());
        assert!(check_remote_path(&empty, "-oProxyCommand=x").is_some());
        assert!(check_remote_path(&empty, "file\r\nDELE x").is_some());
    }
}
