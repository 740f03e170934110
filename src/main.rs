use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod config;
mod deploy;
mod error;
mod model;
mod render;
mod spec;

use config::{NatMode, StackConfig};
use deploy::{AwsCliProvisioner, Provisioner, SystemRunner};
use error::ConfigurationError;
use spec::{CloudContext, validate_region};

pub type Result<T> = anyhow::Result<T>;

#[derive(Parser)]
#[command(name = "chatbot-stack")]
#[command(about = "Declare, render and deploy the Discord chat bot stack", long_about = None)]
struct Cli {
    /// Stack config file (TOML). Built-in defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target account id.
    #[arg(long, env = "CDK_DEFAULT_ACCOUNT")]
    account: Option<String>,

    /// Target region.
    #[arg(long, env = "CDK_DEFAULT_REGION")]
    region: Option<String>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    cmd: Commands,
}

/// Values that take precedence over the config file.
#[derive(Args)]
struct Overrides {
    #[arg(long)]
    stack_name: Option<String>,

    /// Directory with the chat bot's Dockerfile.
    #[arg(long)]
    build_context: Option<PathBuf>,

    /// Text file inlined as CHARACTER_SETTING.
    #[arg(long)]
    character_setting: Option<PathBuf>,

    #[arg(long, value_enum)]
    nat: Option<NatMode>,

    #[arg(long)]
    max_azs: Option<u8>,
}

impl Overrides {
    fn apply(self, config: &mut StackConfig) {
        if let Some(v) = self.stack_name {
            config.stack_name = v;
        }
        if let Some(v) = self.build_context {
            config.workload.build_context = v;
        }
        if let Some(v) = self.character_setting {
            config.workload.character_setting = v;
        }
        if let Some(v) = self.nat {
            config.network.nat = v;
        }
        if let Some(v) = self.max_azs {
            config.network.max_azs = v;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Render the CloudFormation template.
    Synth {
        /// Output file. Writes to stdout when omitted.
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,
    },
    /// Print the resource graph in dependency order.
    Graph,
    /// Synthesize, push the container image and deploy the stack.
    Deploy {
        #[arg(long, default_value = "chatbot-stack.out")]
        out_dir: PathBuf,
    },
    /// Delete the deployed stack.
    Destroy,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1) Config file + CLI overrides.
    let mut config = match &cli.config {
        Some(path) => StackConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => StackConfig::default(),
    };
    cli.overrides.apply(&mut config);
    config.validate()?;
    config.logging.init();

    // 2) Cloud context, resolved here and passed down explicitly.
    // `destroy` needs only the region.
    match cli.cmd {
        Commands::Synth { out } => {
            let ctx = cloud_context(cli.account, cli.region)?;
            let state = model::build_desired_state(&ctx, &config)?;
            let template = render::render_template(&state)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, template)
                        .with_context(|| format!("write {}", path.display()))?;
                    tracing::info!(path = %path.display(), "wrote template");
                }
                None => print!("{}", template),
            }
        }
        Commands::Graph => {
            let ctx = cloud_context(cli.account, cli.region)?;
            let state = model::build_desired_state(&ctx, &config)?;
            print!("{}", render::render_summary(&state));
        }
        Commands::Deploy { out_dir } => {
            let ctx = cloud_context(cli.account, cli.region)?;
            let state = model::build_desired_state(&ctx, &config)?;
            let template = render::render_template(&state)?;

            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("create {}", out_dir.display()))?;
            let path = out_dir.join(format!("{}.template.json", state.stack_name));
            std::fs::write(&path, template)
                .with_context(|| format!("write {}", path.display()))?;

            AwsCliProvisioner::new(SystemRunner)
                .deploy(&state, &path)
                .with_context(|| format!("deploy stack {}", state.stack_name))?;
        }
        Commands::Destroy => {
            let region = require_region(cli.region)?;
            AwsCliProvisioner::new(SystemRunner)
                .destroy(&config.stack_name, &region)
                .with_context(|| format!("destroy stack {}", config.stack_name))?;
        }
    }

    Ok(())
}

fn cloud_context(account: Option<String>, region: Option<String>) -> Result<CloudContext> {
    let account = account.ok_or(ConfigurationError::InvalidValue {
        field: "account",
        reason: "pass --account or set CDK_DEFAULT_ACCOUNT".to_string(),
    })?;
    let region = require_region(region)?;
    Ok(CloudContext::new(account, region)?)
}

fn require_region(region: Option<String>) -> Result<String> {
    let region = region.ok_or(ConfigurationError::InvalidValue {
        field: "region",
        reason: "pass --region or set CDK_DEFAULT_REGION".to_string(),
    })?;
    Ok(validate_region(region)?)
}
