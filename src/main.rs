mod client;
mod config;
mod logging;
mod model;
mod output;

use crate::client::{OmeClient, PagingPolicy};
use crate::config::Config;
use crate::output::OutputFormat;
use anyhow::Result;
use clap::{ArgAction, CommandFactory, Parser, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "omectl",
    version,
    about = "Export the device inventory of an OpenManage Enterprise appliance as JSON or CSV"
)]
struct Cli {
    #[arg(
        long,
        short = 'i',
        value_name = "ADDRESS",
        help = "OME appliance IP or hostname (https:// is assumed without a scheme)"
    )]
    ip: Option<String>,

    #[arg(
        long,
        short = 'u',
        value_name = "USER",
        help = "Username for the appliance [default: admin]"
    )]
    user: Option<String>,

    #[arg(long, short = 'p', value_name = "PASSWORD", help = "Password for the appliance")]
    password: Option<String>,

    #[arg(
        long = "outformat",
        visible_alias = "of",
        value_enum,
        default_value_t = OutputFormat::Json,
        help = "Output format"
    )]
    outformat: OutputFormat,

    #[arg(
        long = "outpath",
        visible_alias = "op",
        value_name = "PATH",
        help = "File to write; an existing file is never overwritten (default: stdout)"
    )]
    outpath: Option<String>,

    #[arg(long, help = "Skip TLS certificate verification (self-signed appliances)")]
    insecure: bool,

    #[arg(long, value_name = "SECONDS", help = "Per-request timeout [default: 30]")]
    timeout: Option<u64>,

    #[arg(
        long,
        help = "Fail when any device page cannot be fetched instead of keeping the pages already read"
    )]
    strict: bool,

    #[arg(
        long,
        value_name = "NAME",
        help = "Only list devices whose DeviceName equals NAME"
    )]
    device_name: Option<String>,

    #[arg(long, value_name = "FILE", help = "YAML file with ip/user/password/verify_tls/timeout_secs")]
    config: Option<PathBuf>,

    #[arg(long, help = "Print the resolved connection settings (password masked) and exit")]
    show_config: bool,

    #[arg(long, value_enum, value_name = "SHELL", help = "Print a shell completion script and exit")]
    completions: Option<CompletionShell>,

    #[arg(short, long, action = ArgAction::Count, help = "More log output on stderr (-v, -vv, -vvv)")]
    verbose: u8,

    #[arg(short, long, conflicts_with = "verbose", help = "Only log errors")]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

impl Cli {
    fn outpath(&self) -> Option<PathBuf> {
        self.outpath
            .as_deref()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }

    fn overrides(&self) -> Config {
        Config {
            ip: self.ip.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            verify_tls: self.insecure.then_some(false),
            timeout_secs: self.timeout,
        }
    }

    fn paging(&self) -> PagingPolicy {
        if self.strict {
            PagingPolicy::Strict
        } else {
            PagingPolicy::Lenient
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_short_flags(std::env::args_os()));

    if let Some(shell) = cli.completions {
        print_completions(shell);
        return ExitCode::SUCCESS;
    }

    let _log = logging::init(cli.verbose, cli.quiet);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let outpath = cli.outpath();
    output::ensure_output_format(outpath.as_deref(), cli.outformat)?;

    let file = cli.config.as_deref().map(config::load).transpose()?;
    if cli.show_config {
        return show_config(file.unwrap_or_default(), cli.overrides());
    }
    let settings = config::resolve(file, cli.overrides())?;

    let client = OmeClient::new(&settings)?.with_paging(cli.paging());
    let session = client.authenticate(&settings.user, &settings.password)?;
    let devices = client.fetch_all_devices(&session, cli.device_name.as_deref())?;

    let rendered = output::render(&devices, cli.outformat)?;
    let written = output::write_output(&rendered, outpath.as_deref())?;
    if let Some(path) = written {
        info!(
            host = %client.host(),
            devices = devices.len(),
            path = %path.display(),
            "device list written"
        );
    }
    Ok(())
}

fn show_config(file: Config, overrides: Config) -> Result<()> {
    let mut shown = config::merge(file, overrides);
    if shown.password.is_some() {
        shown.password = Some("*****".into());
    }
    print!("{}", serde_yaml::to_string(&shown)?);
    Ok(())
}

fn print_completions(shell: CompletionShell) {
    use clap_complete::{generate, shells};
    let mut cmd = Cli::command();
    let bin = cmd.get_name().to_string();
    let mut out = std::io::stdout();
    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin, &mut out),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin, &mut out),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin, &mut out),
        CompletionShell::PowerShell => generate(shells::PowerShell, &mut cmd, bin, &mut out),
    }
}

/// `-of`/`-op` are two-letter single-dash flags, which clap would read as a
/// cluster of `-o -f`. Rewrite them to their long spellings before parsing.
fn normalize_short_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            for (short, long) in [("-of", "--outformat"), ("-op", "--outpath")] {
                if text == short {
                    return OsString::from(long);
                }
                if let Some(value) = text.strip_prefix(short).and_then(|rest| rest.strip_prefix('=')) {
                    return OsString::from(format!("{long}={value}"));
                }
            }
            arg
        })
        .collect()
}
