use anyhow::Context;
use clap::Parser;
use devcert::{
    add_ca_to_keychain, display_certificate, read_settings,
    store::artifacts::{CSR_CONFIG, SERVER_BUNDLE, SERVER_CERT},
    ArtifactStore, CertificateIssuer, ConfigStore, DistinguishedNameConfig, DnOverrides, Error,
    FsStore, SanExtensionBuilder,
};
use rustyline::DefaultEditor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use utils::prompt_field;

use crate::cli::{Cli, Commands, ConfigArgs};

mod cli;
mod utils;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if cli.verbose { "debug" } else { "info" })
        }))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = read_settings(cli.config.as_deref())?;

    let store = FsStore::new(&cli.dir);
    match cli.command {
        Commands::Setup { path } => {
            let dir = path.unwrap_or(cli.dir);
            FsStore::new(&dir).setup()?;
            info!("Directory {} is ready", dir.display());
        }
        Commands::GenerateConfig(args) => generate_config(ready(&store)?, args)?,
        Commands::GenerateV3ExtFile => {
            SanExtensionBuilder::new(ready(&store)?).write()?;
        }
        Commands::GenerateCertificates { pem_file } => {
            let leaf = CertificateIssuer::new(ready(&store)?, &settings).run(pem_file)?;
            info!("Certificate written to {}", store.path_of(SERVER_CERT).display());
            if leaf.bundle_written {
                info!("Bundle written to {}", store.path_of(SERVER_BUNDLE).display());
            }
        }
        Commands::DisplayCertificate { ca } => {
            print!("{}", display_certificate(ready(&store)?, ca)?);
        }
        Commands::AddCaToKeychain => add_ca_to_keychain(ready(&store)?)?,
    }

    Ok(())
}

/// `store`, once its directory exists.
fn ready(store: &FsStore) -> devcert::Result<&FsStore> {
    if store.is_ready() {
        Ok(store)
    } else {
        Err(Error::DirectoryMissing(store.root().to_path_buf()))
    }
}

fn generate_config(store: &FsStore, args: ConfigArgs) -> anyhow::Result<()> {
    let configs = ConfigStore::new(store);
    if configs.exists() && !args.force {
        warn!(
            "{} already exists, keeping it (use --force to replace it)",
            store.path_of(CSR_CONFIG).display()
        );
        return Ok(());
    }

    let mut overrides = DnOverrides {
        country: args.country,
        state: args.state,
        locality: args.locality,
        organization: args.organization,
        email_address: args.email,
        common_name: args.common_name,
    };
    if !args.non_interactive {
        prompt_overrides(&mut overrides)?;
    }

    configs
        .persist(&ConfigStore::merge(&overrides))
        .context("can't write the certificate configuration")?;
    Ok(())
}

/// Prompt for every field not already given as a flag.
fn prompt_overrides(overrides: &mut DnOverrides) -> anyhow::Result<()> {
    let defaults = DistinguishedNameConfig::default();
    let mut rl = DefaultEditor::new()?;

    let fields = [
        (
            &mut overrides.country,
            "Enter the country of your organization",
            defaults.country,
        ),
        (
            &mut overrides.state,
            "Enter the state or province of your organization",
            defaults.state,
        ),
        (
            &mut overrides.locality,
            "Enter the city of your organization",
            defaults.locality,
        ),
        (
            &mut overrides.organization,
            "Enter your organization name",
            defaults.organization,
        ),
        (
            &mut overrides.email_address,
            "Enter your email",
            defaults.email_address,
        ),
        (
            &mut overrides.common_name,
            "Enter your local SSL domain",
            defaults.common_name,
        ),
    ];
    for (field, question, default) in fields {
        if field.is_none() {
            *field = prompt_field(&mut rl, question, &default)?;
        }
    }
    Ok(())
}
