#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

use std::path::PathBuf;

use anyhow::{Context, Result};
use fern::colors::{Color, ColoredLevelConfig};
use futures::future::TryFutureExt;
use lettre::message::Mailbox;
use structopt::StructOpt;

use panorama_mailmerge::config::{expand_path, Config, LogConfig, TlsMethod};
use panorama_mailmerge::delivery::{DryRun, Retrying, SmtpTransport};
use panorama_mailmerge::merge::{MergeOptions, MergeSummary, SubstitutionPolicy};
use panorama_mailmerge::{report_err, Credentials, Merger, PlaceholderTable, Template, Transport};

/// Sends one personalized message per row of a CSV file.
#[derive(Debug, StructOpt)]
#[structopt(author, about)]
struct Opt {
    /// Config file (default: $XDG_CONFIG_HOME/panorama/mailmerge.toml)
    #[structopt(long = "config", short = "c", parse(from_os_str))]
    config: Option<PathBuf>,

    /// Subject line, overrides merge.subject
    #[structopt(long = "subject", short = "s")]
    subject: Option<String>,

    /// Skip rows that don't fill every placeholder instead of sending them anyway
    #[structopt(long = "strict")]
    strict: bool,

    /// Print the messages instead of sending them
    #[structopt(long = "dry-run")]
    dry_run: bool,

    /// CSV with a header row and a recipient column
    #[structopt(parse(from_os_str))]
    placeholders: PathBuf,

    /// Plain-text body with {column} placeholders
    #[structopt(parse(from_os_str))]
    body: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let opt = Opt::from_args();

    let config_path = match &opt.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let config = Config::from_path(&config_path)?;
    setup_logger(&config.log)?;
    info!("email credentials read from {:?}", config_path);

    run(opt, config)
        .unwrap_or_else(|err| {
            report_err(err);
            std::process::exit(1);
        })
        .await;
    Ok(())
}

async fn run(opt: Opt, config: Config) -> Result<()> {
    let table = PlaceholderTable::from_path(&opt.placeholders, &config.merge.recipient_column)?;
    if table.is_empty() {
        warn!("{:?} has no rows, nothing will be sent", opt.placeholders);
    }
    let template = Template::from_path(&opt.body)?;

    let subject = opt
        .subject
        .clone()
        .or_else(|| config.merge.subject.clone())
        .ok_or_else(|| anyhow!("no subject, pass --subject or set merge.subject"))?;

    let mut options = config.merge.options();
    if opt.strict {
        options.policy = SubstitutionPolicy::Strict;
    }
    let sender = panorama_mailmerge::message::parse_mailbox(config.sender())
        .with_context(|| format!("bad sender address {:?}", config.sender()))?;
    let credentials = config.credentials.clone();

    if opt.dry_run {
        merge(DryRun::stdout(), credentials, sender, subject, options, table, template).await?;
        return Ok(());
    }

    if config.smtp.tls == TlsMethod::Off {
        warn!("tls is off, the password goes over the wire in the clear");
    }
    let transport = Retrying::new(
        SmtpTransport::new(config.smtp.clone()),
        config.merge.retry_policy(),
    );
    let summary = merge(transport, credentials, sender, subject, options, table, template).await?;
    if summary.skipped > 0 {
        warn!("{} row(s) were not sent", summary.skipped);
    }
    Ok(())
}

async fn merge<T: Transport>(
    transport: T,
    credentials: Credentials,
    sender: Mailbox,
    subject: String,
    options: MergeOptions,
    table: PlaceholderTable,
    template: Template,
) -> Result<MergeSummary> {
    let mut merger = Merger::new(transport, credentials, sender, subject, options);
    merger.load(table, template);
    Ok(merger.run().await?)
}

fn setup_logger(log: &LogConfig) -> Result<()> {
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .debug(Color::BrightBlack);

    let stderr = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                colors.color(record.level()),
                message
            ))
        })
        .chain(std::io::stderr());

    let mut dispatch = fern::Dispatch::new()
        .level(log.level_filter()?)
        .chain(stderr);

    if let Some(path) = &log.file {
        let file = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{}[{}][{}] {}",
                    chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                    record.target(),
                    record.level(),
                    message
                ))
            })
            .chain(fern::log_file(expand_path(path))?);
        dispatch = dispatch.chain(file);
    }

    dispatch.apply()?;
    Ok(())
}
