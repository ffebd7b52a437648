//! Generates man pages for `git-vendor` under `target/man/`. Run with
//! `cargo run -p xtask`.

use std::fs;
use std::path::Path;

use clap::CommandFactory;
use git_vendor::cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = Path::new("target/man");
    fs::create_dir_all(out_dir)?;
    write_man_page(out_dir, "git-vendor", Cli::command())?;
    Ok(())
}

fn write_man_page(out_dir: &Path, name: &str, command: clap::Command) -> Result<(), Box<dyn std::error::Error>> {
    let man = clap_mangen::Man::new(command);
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    let path = out_dir.join(format!("{name}.1"));
    fs::write(&path, buffer)?;
    println!("wrote {}", path.display());
    Ok(())
}
