//! # Shell Completion Module
//!
//! ```bash
//! nowplaying completion bash > ~/.local/share/bash-completion/completions/nowplaying
//! nowplaying completion zsh > ~/.config/zsh/completions/_nowplaying
//! ```

use crate::cli::{Args, Shell};
use clap::CommandFactory;
use clap_complete::{generate, Shell as CompletionShell};
use std::io::Write;

/// Write the completion script for `shell` to `out`.
pub fn write_completions(shell: Shell, out: &mut dyn Write) {
    let mut cmd = Args::command();
    let name = cmd.get_name().to_string();
    generate(to_completion_shell(shell), &mut cmd, name, out);
}

/// Convert our Shell enum to clap_complete's Shell enum
pub fn to_completion_shell(shell: Shell) -> CompletionShell {
    match shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_conversion() {
        assert_eq!(to_completion_shell(Shell::Bash), CompletionShell::Bash);
        assert_eq!(to_completion_shell(Shell::PowerShell), CompletionShell::PowerShell);
    }

    #[test]
    fn test_bash_script_lists_subcommands() {
        let mut out = Vec::new();
        write_completions(Shell::Bash, &mut out);
        let script = String::from_utf8_lossy(&out);

        assert!(script.contains("nowplaying"));
        assert!(script.contains("listeners"));
        assert!(script.contains("--auth-file"));
    }
}
