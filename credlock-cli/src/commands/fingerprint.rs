use anyhow::Result;
use credlock::history::PasswordFingerprint;

pub fn execute() -> Result<()> {
    let secret = super::read_secret_line()?;
    println!("{}", PasswordFingerprint::of(&secret).to_hex());
    Ok(())
}
