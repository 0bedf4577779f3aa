//! Generates the man page and shell completions from the CLI definition.

use clap::CommandFactory;
use clap_complete::{Shell, generate_to};

include!("src/cli.rs");

fn main() -> std::io::Result<()> {
    println!("cargo:rerun-if-changed=src/cli.rs");

    let Some(out_dir) = std::env::var_os("OUT_DIR").map(PathBuf::from) else {
        return Ok(());
    };

    let mut cmd = Cli::command();

    let mut man = Vec::new();
    clap_mangen::Man::new(cmd.clone()).render(&mut man)?;
    std::fs::write(out_dir.join("botdeploy.1"), man)?;

    for shell in [Shell::Bash, Shell::Zsh, Shell::Fish] {
        generate_to(shell, &mut cmd, "botdeploy", &out_dir)?;
    }

    Ok(())
}
