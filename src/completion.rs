//! # Shell Completion Module
//!
//! Completion scripts through `clap_complete`, and the track id list that
//! completion scripts can query for `recommend` and `show`.
//!
//! ```bash
//! lyrec completion bash > ~/.local/share/bash-completion/completions/lyrec
//! lyrec completion zsh > ~/.config/zsh/completions/_lyrec
//! ```

use crate::cli::Shell;
use crate::storage;
use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io::Write;
use std::path::Path;

/// Writes the completion script of `cmd` for `gen`.
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command, out: &mut dyn Write) {
    let name = cmd.get_name().to_string();
    generate(gen, cmd, name, out);
}

/// Convert our Shell enum to clap_complete's Shell enum
pub fn shell_to_completion_shell(shell: Shell) -> CompletionShell {
    match shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Track ids of the unified dataset in `data_dir`, sorted.
///
/// An unbuilt dataset yields no completions rather than an error.
pub fn track_completions(data_dir: &Path) -> Result<Vec<String>> {
    if !data_dir.join(crate::config::SONGS_FILE).is_file() {
        return Ok(Vec::new());
    }
    let (_, songs) = storage::load_songs(data_dir)?;
    let mut ids = songs.track_ids();
    ids.sort();
    Ok(ids)
}

/// Prints one track id per line.
pub fn write_track_completions(data_dir: &Path, out: &mut dyn Write) -> Result<()> {
    for id in track_completions(data_dir)? {
        writeln!(out, "{id}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_shell_conversion() {
        assert_eq!(shell_to_completion_shell(Shell::Bash), CompletionShell::Bash);
        assert_eq!(shell_to_completion_shell(Shell::Zsh), CompletionShell::Zsh);
    }

    #[test]
    fn test_bash_script_names_subcommands() {
        let mut out = Vec::new();
        generate_completions(CompletionShell::Bash, &mut Args::command(), &mut out);
        let script = String::from_utf8(out).expect("utf-8 script");
        assert!(script.contains("lyrec"));
        assert!(script.contains("train-gnn"));
    }

    #[test]
    fn test_track_completions_without_dataset() {
        let dir = TempDir::new().expect("temp dir");
        assert!(track_completions(dir.path()).expect("no dataset").is_empty());
    }
}
