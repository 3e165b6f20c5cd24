use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use credlock::prelude::*;

#[derive(Args)]
pub struct CheckArgs {
    /// Account the password is set for
    #[arg(long, short)]
    pub account: String,

    /// Candidate password (read from stdin when omitted)
    #[arg(long, short)]
    pub password: Option<String>,

    /// The password is an already-hashed form (only the account-name check applies)
    #[arg(long)]
    pub hashed: bool,

    /// Treat the password as set with an expiration time
    #[arg(long)]
    pub expires: bool,

    /// Word list for the dictionary check (enables it)
    #[arg(long)]
    pub dictionary: Option<PathBuf>,
}

pub async fn execute(config: &Path, verbose: bool, args: CheckArgs) -> Result<()> {
    let mut settings = Settings::load_from(config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?;
    if verbose {
        init_tracing(&settings);
    }

    let mut builder = PolicyState::builder().without_tracing().without_audit_log();
    if let Some(path) = &args.dictionary {
        let dictionary = WordListDictionary::from_file(path)
            .with_context(|| format!("failed to read dictionary {}", path.display()))?;
        settings.password.enable_dictionary_check = true;
        builder = builder.dictionary(Arc::new(dictionary));
    }
    let state = builder.settings(settings).build()?;

    let account = AccountKey::new(args.account)?;
    let secret = match args.password {
        Some(password) => password,
        None => super::read_secret_line()?,
    };
    let credential = if args.hashed {
        PresentedCredential::hashed(account, secret)
    } else {
        PresentedCredential::plaintext(account, secret)
    }
    .with_expiration(args.expires);

    match state.check_credential(&credential).await {
        Ok(()) => {
            println!("{} password accepted", "OK".green().bold());
            Ok(())
        }
        Err(Error::CredentialRejected(rejection)) => {
            println!("{} {}", "Rejected:".red().bold(), rejection);
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}
