pub mod check;
pub mod config;
pub mod fingerprint;

use std::io::BufRead;

use anyhow::{bail, Context, Result};

/// Read one line from stdin without its line terminator
pub fn read_secret_line() -> Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        bail!("no password given on stdin");
    }
    Ok(secret)
}
