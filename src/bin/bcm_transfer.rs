use std::path::Path;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bcm_transfer::bcm::{BcmClient, BcmHttpClient};
use bcm_transfer::config::{
    ConfigLoader, Credentials, NoPrompt, Overrides, Prompter, TerminalPrompter, resolve_value,
};
use bcm_transfer::de::{DeClient, DeHttpClient, DeObject, DeProject, DeProjectSource};
use bcm_transfer::error::TransferError;
use bcm_transfer::output::{ConsoleOutput, JsonOutput, OutputMode};
use bcm_transfer::pipeline::{ProgressSink, RecordSource, SourceEntry, Transfer, TransferOptions};
use bcm_transfer::scratch::Scratch;
use bcm_transfer::sheet::SheetSource;

#[derive(Parser)]
#[command(name = "bcm-transfer")]
#[command(about = "Move sequencing reads and their annotation into a BCM server")]
#[command(version, author)]
struct Cli {
    /// Print the run report as JSON and never prompt.
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Record failed samples and continue with the next one.
    #[arg(long, global = true)]
    keep_going: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Upload reads listed in a tab-separated sample sheet")]
    Upload(UploadArgs),
    #[command(about = "Migrate a DictyExpress project into BCM")]
    Migrate(MigrateArgs),
}

#[derive(Args)]
struct UploadArgs {
    #[arg(long = "sample-sheet", alias = "sample_sheet")]
    sample_sheet: Utf8PathBuf,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// BCM server address.
    #[arg(long, alias = "URL")]
    url: String,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct MigrateArgs {
    /// BCM username; overrides the config file.
    username: Option<String>,

    /// BCM password; overrides the config file.
    password: Option<String>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, alias = "URL")]
    url: Option<String>,

    #[arg(long)]
    storage: Option<Utf8PathBuf>,

    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<TransferError>() {
            return ExitCode::from(error.exit_code());
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let prompter: &dyn Prompter = match output_mode {
        OutputMode::Interactive => &TerminalPrompter,
        OutputMode::NonInteractive => &NoPrompt,
    };

    match cli.command {
        Commands::Upload(args) => run_upload(args, cli.keep_going, output_mode, prompter),
        Commands::Migrate(args) => run_migrate(args, cli.keep_going, output_mode, prompter),
    }
}

fn run_upload(
    args: UploadArgs,
    keep_going: bool,
    output_mode: OutputMode,
    prompter: &dyn Prompter,
) -> miette::Result<()> {
    let entries = SheetSource::new(args.sample_sheet).records()?;

    let user = resolve_value(args.username, None, || prompter.input("BCM username"))?;
    let password = resolve_value(args.password, None, || prompter.password("BCM password"))?;
    let bcm = BcmHttpClient::connect(&args.url, &Credentials::new(user, password))?;

    let scratch = Scratch::new(
        Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .map_err(|_| miette::Report::msg("temporary directory path is not UTF-8"))?,
    );
    let transfer = Transfer::new(bcm, NopDe, scratch);
    let options = TransferOptions {
        keep_going,
        dry_run: args.dry_run,
    };
    run_transfer(&transfer, &entries, options, output_mode)
}

fn run_migrate(
    args: MigrateArgs,
    keep_going: bool,
    output_mode: OutputMode,
    prompter: &dyn Prompter,
) -> miette::Result<()> {
    let config = ConfigLoader::load(args.config.as_deref())?;
    let overrides = Overrides {
        bcm_user: args.username,
        bcm_password: args.password,
        bcm_addr: args.url,
        storage: args.storage,
    };
    let resolved = ConfigLoader::resolve(config, overrides, prompter)?;

    let de = DeHttpClient::connect(&resolved.de_addr, &resolved.de_credentials)?;
    let entries = DeProjectSource::new(
        &de,
        resolved.de_project.clone(),
        resolved.de_type.clone(),
        resolved.migration.clone(),
    )
    .records()?;

    let bcm = BcmHttpClient::connect(&resolved.bcm_addr, &resolved.bcm_credentials)?;
    let transfer = Transfer::new(bcm, de, Scratch::new(resolved.storage.clone()));
    let options = TransferOptions {
        keep_going,
        dry_run: args.dry_run,
    };
    run_transfer(&transfer, &entries, options, output_mode)
}

fn run_transfer<B: BcmClient, D: DeClient>(
    transfer: &Transfer<B, D>,
    entries: &[SourceEntry],
    options: TransferOptions,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let report = match output_mode {
        OutputMode::Interactive => {
            let sink: &dyn ProgressSink = &ConsoleOutput;
            let report = transfer.run(entries, options, sink)?;
            ConsoleOutput::print_summary(&report);
            report
        }
        OutputMode::NonInteractive => {
            let report = transfer.run(entries, options, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
            report
        }
    };

    match report.failures() {
        0 => Ok(()),
        failed => Err(TransferError::RunIncomplete { failed }.into()),
    }
}

/// Source client for sheet uploads, which never reach DictyExpress.
struct NopDe;

impl DeClient for NopDe {
    fn project(&self, project_id: &str) -> Result<DeProject, TransferError> {
        Err(TransferError::DeProjectNotFound(project_id.to_string()))
    }

    fn project_data(&self, _project_id: &str) -> Result<Vec<DeObject>, TransferError> {
        Ok(Vec::new())
    }

    fn download(
        &self,
        object_id: &str,
        _filename: &str,
        _destination: &Path,
    ) -> Result<(), TransferError> {
        Err(TransferError::DeHttp(format!(
            "no DictyExpress session for object {object_id}"
        )))
    }
}
