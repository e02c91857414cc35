use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use initrd_assembler::backend::DockerBackend;
use initrd_assembler::config::{load_build_spec, ConfigSource};
use initrd_assembler::output::{parse_formats, write_outputs, OutputOptions};
use initrd_assembler::{build_initrd, parse_size_mb, preflight};

#[derive(Parser)]
#[command(name = "initrd-assembler", version, about = "Assemble bootable initrds from container images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an image from a YAML build description
    Build(BuildArgs),
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Name to use for output files [default: config file name]
    #[arg(long)]
    name: Option<String>,

    /// Directory for output files
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Size for output image, if supported and fixed size
    #[arg(long, default_value = "1024M")]
    size: String,

    /// Always pull images
    #[arg(long)]
    pull: bool,

    /// Skip image trust verification specified in the trust section
    #[arg(long)]
    disable_content_trust: bool,

    /// Output types to create: tar, tar-zst, kernel+initrd, raw
    #[arg(long = "output", short = 'o', value_delimiter = ',')]
    outputs: Vec<String>,

    /// Docker-compatible CLI used to pull and export images
    #[arg(long, default_value = "docker")]
    docker: String,

    /// Build description, or `-` for stdin
    config: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Build(args) => build(args),
    }
}

fn build(args: BuildArgs) -> Result<()> {
    let formats = parse_formats(&args.outputs)?;
    tracing::debug!(?formats, "outputs selected");

    let size_mb =
        parse_size_mb(&args.size).with_context(|| format!("parsing --size '{}'", args.size))?;

    preflight::check_build_tools(&args.docker, &formats)?;

    let source = ConfigSource::from_arg(&args.config);
    let name = args.name.unwrap_or_else(|| source.default_name());
    let mut spec = load_build_spec(&source.read()?).context("invalid build config")?;

    if args.disable_content_trust {
        tracing::debug!("content trust checks disabled for this build");
        spec.disable_trust();
    }

    let backend = DockerBackend::with_binary(args.docker);
    let initrd = build_initrd(&spec, &backend, args.pull).context("assembling initrd")?;

    tracing::info!("creating outputs");
    let base = args.dir.join(&name);
    let written = write_outputs(&base, &initrd, &formats, &OutputOptions { size_mb })?;
    for path in written {
        tracing::info!(path = %path.display(), "wrote");
    }
    Ok(())
}
