//! `raven completion {bash|zsh|fish|powershell}` (§6).

use clap::CommandFactory;

use crate::cli::{Cli, Shell};

pub fn run(shell: Shell) -> i32 {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(clap_complete::Shell::from(shell), &mut cmd, name, &mut std::io::stdout());
    super::EXIT_OK
}
