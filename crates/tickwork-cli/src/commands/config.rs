//! `tickwork config`: print the effective configuration.

use std::path::Path;

pub fn execute(path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(path)?;
    match path {
        Some(path) => println!("# {}", path.display()),
        None => println!("# defaults"),
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
