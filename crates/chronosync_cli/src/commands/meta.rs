use std::io::Write;
use std::path::{Path, PathBuf};

use chronosync::config::STATE_DIR_NAME;
use chronosync::db::DATABASE_FILE_NAME;
use chronosync::fallback::MARKER_FILE_NAME;
use chronosync::lock::LOCK_FILE_NAME;
use clap::CommandFactory;

use super::sync::BLOCKED_EXIT_CODE;
use crate::Cli;
use crate::shutdown::FORCE_QUIT_EXIT_CODE;

fn cli_command() -> clap::Command {
    Cli::command()
}

fn completion_script(shell: clap_complete::Shell) -> Vec<u8> {
    let mut cmd = cli_command();
    let name = cmd.get_name().to_string();
    let mut out = Vec::new();
    clap_complete::generate(shell, &mut cmd, name, &mut out);
    out
}

/// Sections clap does not generate: what the exit codes mean and where state
/// lives on disk.
fn extra_sections() -> String {
    let state = format!("$GIT_DIR/{STATE_DIR_NAME}");
    format!(
        r#".SH "EXIT STATUS"
.TP
\fB0\fR
The run finished, possibly in fallback mode or with branches queued for recovery.
.TP
\fB1\fR
An error stopped the command, or \fBrecover\fR left an entry failed.
.TP
\fB{BLOCKED_EXIT_CODE}\fR
\fBsync\fR was blocked: the repository never became available, a fatal error was hit, or the run was cancelled.
.TP
\fB{FORCE_QUIT_EXIT_CODE}\fR
Interrupted twice and terminated without cleanup.
.SH FILES
.TP
\fI{state}/{DATABASE_FILE_NAME}\fR
Recovery queue, run log and run history.
.TP
\fI{state}/{MARKER_FILE_NAME}\fR
Present while a remote synchronization is owed after fallback mode.
.TP
\fI{state}/{LOCK_FILE_NAME}\fR
Held for the duration of a run.
"#
    )
}

fn main_man_page() -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let man = clap_mangen::Man::new(cli_command());
    let mut out = Vec::new();
    man.render(&mut out)?;
    out.extend_from_slice(extra_sections().as_bytes());
    Ok(out)
}

pub(crate) fn handle_completions(
    shell: clap_complete::Shell,
) -> Result<(), Box<dyn std::error::Error>> {
    std::io::stdout().write_all(&completion_script(shell))?;
    Ok(())
}

/// Write one page per subcommand into `dir`, with the main page carrying the
/// extra sections.
fn write_man_pages(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir)?;
    clap_mangen::generate_to(cli_command(), dir)?;
    let main_page = dir.join(format!("{}.1", cli_command().get_name()));
    std::fs::write(main_page, main_man_page()?)?;
    Ok(())
}

pub(crate) fn handle_man(output: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        Some(dir) => {
            write_man_pages(&dir)?;
            println!("Generated man pages in: {}", dir.display());
        }
        None => std::io::stdout().write_all(&main_man_page()?)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli_command().debug_assert();
    }

    #[test]
    fn completion_script_covers_queue_actions() {
        let script = completion_script(clap_complete::Shell::Bash);
        let script = String::from_utf8(script).expect("completion output should be UTF-8");
        assert!(script.contains("chronosync"));
        assert!(script.contains("recover"));
        assert!(script.contains("retry"));
    }

    #[test]
    fn man_page_documents_exit_codes_and_state_files() {
        let page = main_man_page().expect("man rendering should succeed");
        let page = String::from_utf8(page).expect("man output should be UTF-8");
        assert!(page.to_lowercase().contains(".th chronosync"));
        assert!(page.contains(".SH \"EXIT STATUS\""));
        assert!(page.contains(r"\fB2\fR"));
        assert!(page.contains(r"\fB130\fR"));
        assert!(page.contains("$GIT_DIR/chronosync/fallback.json"));
    }

    #[test]
    fn man_directory_gets_extended_main_page() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("man");

        handle_man(Some(out.clone())).expect("man page generation should succeed");

        let pages = std::fs::read_dir(&out)
            .expect("output directory should exist")
            .count();
        assert!(pages > 1, "expected a page per subcommand");
        let main_page = std::fs::read_to_string(out.join("chronosync.1")).unwrap();
        assert!(main_page.contains(".SH FILES"));
    }
}
