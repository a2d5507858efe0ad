use super::RiskClass;

const DESTRUCTIVE_PROGRAMS: &[&str] = &[
    "rm", "rmdir", "mv", "dd", "shred", "truncate", "chmod", "chown", "chgrp", "kill",
    "killall", "pkill", "sudo", "su", "doas", "fdisk", "parted", "reboot", "shutdown", "halt",
    "poweroff", "unlink", "tee",
];

const NETWORK_PROGRAMS: &[&str] = &[
    "curl", "wget", "ssh", "scp", "sftp", "ftp", "rsync", "nc", "ncat", "telnet", "ping",
];

const READ_ONLY_PROGRAMS: &[&str] = &[
    "ls", "cat", "head", "tail", "pwd", "echo", "printf", "grep", "egrep", "fgrep", "rg",
    "find", "wc", "du", "df", "which", "whereis", "whoami", "id", "date", "uname", "hostname",
    "file", "stat", "tree", "printenv", "ps", "uptime", "sort", "uniq", "cut", "basename",
    "dirname", "realpath", "readlink", "diff", "cmp", "md5sum", "sha256sum", "true", "free",
    "lsblk", "type",
];

/// Refines the risk of a shell command from its text.
///
/// Any destructive segment wins, then any network segment. The command is
/// read-only only when every segment is.
pub fn classify_command(command: &str) -> RiskClass {
    let segments = split_segments(command);
    if segments.is_empty() {
        return RiskClass::Execute;
    }

    if has_output_redirection(command)
        || segments.iter().any(|words| segment_is_destructive(words))
    {
        return RiskClass::Destructive;
    }
    if segments.iter().any(|words| segment_is_network(words)) {
        return RiskClass::Network;
    }

    let has_substitution = command.contains("$(") || command.contains('`');
    if !has_substitution && segments.iter().all(|words| segment_is_read_only(words)) {
        return RiskClass::ReadOnly;
    }
    RiskClass::Execute
}

fn split_segments(command: &str) -> Vec<Vec<String>> {
    strip_benign_redirections(command)
        .split(['|', ';', '&', '\n', '(', ')'])
        .map(|segment| {
            segment
                .split_whitespace()
                .map(|word| word.trim_matches(|c| c == '"' || c == '\'').to_string())
                .skip_while(|word| is_env_assignment(word))
                .collect::<Vec<String>>()
        })
        .filter(|words| !words.is_empty())
        .map(unwrap_launchers)
        .collect()
}

/// Replaces a launcher such as `env VAR=x cmd` or `nohup cmd` with the command
/// it runs. Launchers with options that change what runs are left in place, so
/// they never pass as read-only.
fn unwrap_launchers(mut words: Vec<String>) -> Vec<String> {
    loop {
        let launcher = program(&words).to_string();
        let skip = match launcher.as_str() {
            "env" => {
                let mut index = 1;
                while let Some(word) = words.get(index) {
                    let plain_flag = matches!(
                        word.as_str(),
                        "-" | "-i" | "--ignore-environment" | "-0" | "--null"
                    );
                    if plain_flag || is_env_assignment(word) {
                        index += 1;
                    } else if word.starts_with('-') {
                        return words;
                    } else {
                        break;
                    }
                }
                index
            }
            "nohup" | "time" | "command" | "exec" | "builtin" => {
                1 + words
                    .iter()
                    .skip(1)
                    .take_while(|word| word.starts_with('-'))
                    .count()
            }
            "nice" => match words.get(1).map(String::as_str) {
                Some("-n" | "--adjustment") => 3,
                Some(flag) if flag.starts_with('-') => 2,
                _ => 1,
            },
            "timeout" => {
                let flags = words
                    .iter()
                    .skip(1)
                    .take_while(|word| word.starts_with('-'))
                    .count();
                // The duration follows the options.
                2 + flags
            }
            _ => return words,
        };
        if skip >= words.len() {
            // Nothing left to run: `env` alone prints the environment.
            if launcher == "env" && skip == words.len() {
                return vec!["printenv".to_string()];
            }
            return words;
        }
        words.drain(..skip);
    }
}

fn is_env_assignment(word: &str) -> bool {
    word.split_once('=').is_some_and(|(name, _)| {
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

fn program(words: &[String]) -> &str {
    let first = words.first().map(String::as_str).unwrap_or_default();
    first.rsplit('/').next().unwrap_or(first)
}

fn subcommand(words: &[String]) -> &str {
    words
        .iter()
        .skip(1)
        .find(|word| !word.starts_with('-'))
        .map(String::as_str)
        .unwrap_or_default()
}

/// Non-option words after the program name.
fn operands(words: &[String]) -> Vec<&str> {
    words
        .iter()
        .skip(1)
        .map(String::as_str)
        .filter(|word| !word.starts_with('-'))
        .collect()
}

fn has_flag(words: &[String], short: &str, long: &str) -> bool {
    words.iter().skip(1).any(|word| {
        word == long
            || word.starts_with(&format!("{long}="))
            || (word.starts_with(short) && !word.starts_with("--"))
    })
}

/// Arguments that follow the git subcommand.
fn git_arguments(words: &[String]) -> Vec<&str> {
    let subcommand = subcommand(words);
    words
        .iter()
        .skip(1)
        .map(String::as_str)
        .skip_while(|word| *word != subcommand)
        .skip(1)
        .collect()
}

fn strip_benign_redirections(command: &str) -> String {
    command
        .replace("2>&1", " ")
        .replace("2>/dev/null", " ")
        .replace(">/dev/null", " ")
        .replace("> /dev/null", " ")
}

fn has_output_redirection(command: &str) -> bool {
    strip_benign_redirections(command).contains('>')
}

fn segment_is_destructive(words: &[String]) -> bool {
    let program = program(words);
    if DESTRUCTIVE_PROGRAMS.contains(&program) || program.starts_with("mkfs") {
        return true;
    }
    match program {
        "git" => match subcommand(words) {
            "push" | "reset" | "clean" | "rm" => true,
            "branch" => git_arguments(words).iter().any(|word| {
                matches!(
                    *word,
                    "-d" | "-D" | "--delete" | "-m" | "-M" | "--move" | "-f" | "--force"
                )
            }),
            "remote" => matches!(
                git_arguments(words).first().copied(),
                Some("remove" | "rm" | "rename" | "set-url" | "prune")
            ),
            _ => false,
        },
        "find" => words.iter().any(|word| {
            matches!(
                word.as_str(),
                "-delete" | "-fprint" | "-fprint0" | "-fprintf" | "-fls"
            )
        }),
        "sed" => words.iter().any(|word| word.starts_with("-i")),
        "sort" => has_flag(words, "-o", "--output"),
        "tree" => words.iter().skip(1).any(|word| word.starts_with("-o")),
        "uniq" => operands(words).len() > 1,
        "date" => has_flag(words, "-s", "--set"),
        "hostname" => has_flag(words, "-F", "--file") || !operands(words).is_empty(),
        _ => false,
    }
}

fn segment_is_network(words: &[String]) -> bool {
    let program = program(words);
    if NETWORK_PROGRAMS.contains(&program) {
        return true;
    }
    let subcommand = subcommand(words);
    match program {
        "git" => matches!(subcommand, "clone" | "fetch" | "pull"),
        "pip" | "pip3" | "npm" | "yarn" | "pnpm" | "brew" | "apt" | "apt-get" | "cargo" | "gem"
        | "go" => matches!(subcommand, "install" | "add" | "get" | "update" | "upgrade"),
        _ => false,
    }
}

fn segment_is_read_only(words: &[String]) -> bool {
    let program = program(words);
    match program {
        "find" => !words
            .iter()
            .any(|word| matches!(word.as_str(), "-delete" | "-exec" | "-execdir" | "-ok")),
        "git" => match subcommand(words) {
            "status" | "log" | "diff" | "show" | "rev-parse" => true,
            "branch" => git_arguments(words).iter().all(|word| {
                matches!(
                    *word,
                    "-a" | "--all" | "-r" | "--remotes" | "-v" | "-vv" | "--verbose"
                        | "--list" | "--show-current"
                )
            }),
            "remote" => matches!(
                git_arguments(words).first().copied(),
                None | Some("-v" | "--verbose" | "show" | "get-url")
            ),
            _ => false,
        },
        _ => READ_ONLY_PROGRAMS.contains(&program),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_inspection_commands_are_read_only() {
        for command in [
            "ls /tmp",
            "ls -la | grep foo",
            "cat Cargo.toml && wc -l src/main.rs",
            "git status",
            "git log --oneline -5",
            "find . -name '*.rs'",
            "LANG=C date",
            "/bin/ls",
            "du -sh . 2>/dev/null",
            "ls missing 2>&1",
            "env",
            "env LANG=C ls",
            "sort a.txt",
            "uniq a.txt",
            "git branch",
            "git branch -a",
            "git remote -v",
            "hostname",
            "date +%Y",
        ] {
            assert_eq!(classify_command(command), RiskClass::ReadOnly, "{command}");
        }
    }

    #[test]
    fn removal_and_redirection_are_destructive() {
        for command in [
            "rm -rf ./build",
            "ls && rm notes.txt",
            "echo hi > out.txt",
            "sudo apt-get update",
            "git push origin main",
            "find . -name '*.tmp' -delete",
            "sed -i s/a/b/ file",
            "mkfs.ext4 /dev/sdb1",
            "cat a | tee b",
            "env rm -rf ./build",
            "env -i PATH=/bin rm -rf ./build",
            "nohup rm -rf ./build",
            "nice -n 10 rm notes.txt",
            "timeout 5 rm notes.txt",
            "git branch -D main",
            "git remote remove origin",
            "sort -o victim.txt a",
            "sort --output=victim.txt a",
            "find . -fprint victim.txt",
            "uniq a victim.txt",
            "tree -o victim.txt",
            "date -s 2000-01-01",
            "hostname newname",
        ] {
            assert_eq!(classify_command(command), RiskClass::Destructive, "{command}");
        }
    }

    #[test]
    fn fetching_commands_are_network() {
        for command in [
            "curl https://example.com",
            "git clone https://github.com/a/b",
            "pip install requests",
            "npm install",
            "ls | wget -qO- http://x",
        ] {
            assert_eq!(classify_command(command), RiskClass::Network, "{command}");
        }
    }

    #[test]
    fn unknown_programs_and_substitutions_stay_execute() {
        for command in [
            "python script.py",
            "make build",
            "echo $(whoami)",
            "ls `pwd`",
            "find . -exec touch {} ;",
            "env -S 'rm -rf x'",
            "env python script.py",
            "git branch feature",
            "git remote add origin https://example.com/repo",
            "",
        ] {
            assert_eq!(classify_command(command), RiskClass::Execute, "{command:?}");
        }
    }
}
