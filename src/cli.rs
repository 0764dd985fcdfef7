use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// the working directory holding the CA and certificates.
    #[arg(long, short, global = true, env = "DEVCERT_DIR", default_value = "ssl")]
    pub dir: PathBuf,
    /// the config file.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,
    /// log skipped steps as well.
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the working directory.
    Setup {
        /// defaults to --dir.
        #[arg(value_name = "DIR")]
        path: Option<PathBuf>,
    },
    /// Write server.csr.cnf, prompting for each field.
    GenerateConfig(ConfigArgs),
    /// Rebuild v3.ext from the persisted common name.
    #[command(name = "generate-v3-ext-file")]
    GenerateV3ExtFile,
    /// Create the CA if needed, then issue server.key and server.crt.
    GenerateCertificates {
        /// also write server.pem (certificate followed by key).
        #[arg(long)]
        pem_file: bool,
    },
    /// Print server.crt in text form.
    DisplayCertificate {
        /// print rootCA.pem instead.
        #[arg(long)]
        ca: bool,
    },
    /// Trust rootCA.pem in the macOS System keychain (requires admin privileges).
    AddCaToKeychain,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// take flags and defaults without prompting.
    #[arg(long)]
    pub non_interactive: bool,
    /// replace an existing server.csr.cnf.
    #[arg(long, short)]
    pub force: bool,
    #[arg(long)]
    pub country: Option<String>,
    #[arg(long)]
    pub state: Option<String>,
    #[arg(long)]
    pub locality: Option<String>,
    #[arg(long)]
    pub organization: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
    /// the local SSL domain.
    #[arg(long)]
    pub common_name: Option<String>,
}
