//! Writes mxtctl.1 plus one mxtctl-<command>.1 page per subcommand
//!
//! Usage: gen-manpage [output-dir], default `man`

use clap::{Command, CommandFactory};
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
#[allow(dead_code)]
mod cli;

fn render(cmd: Command, page_name: &str, dir: &Path) -> std::io::Result<PathBuf> {
    let path = dir.join(format!("{}.1", page_name));
    let mut page = Vec::new();
    clap_mangen::Man::new(cmd).title(page_name).render(&mut page)?;
    std::fs::write(&path, page)?;
    Ok(path)
}

/// Render the top-level page and one page per subcommand into `dir`
fn write_pages(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let mut root = cli::Cli::command();
    root.build();
    let name = root.get_name().to_string();

    let mut pages = Vec::new();
    for sub in root.get_subcommands().filter(|s| s.get_name() != "help") {
        // Subcommand pages are named like git's: mxtctl-flash.1
        let page_name = format!("{}-{}", name, sub.get_name());
        pages.push(render(sub.clone(), &page_name, dir)?);
    }
    pages.push(render(root, &name, dir)?);
    Ok(pages)
}

fn main() -> std::io::Result<()> {
    let dir = std::env::args().nth(1).unwrap_or_else(|| "man".into());
    println!("Writing man pages:");
    for page in write_pages(Path::new(&dir))? {
        println!("  {}", page.display());
    }
    Ok(())
}
