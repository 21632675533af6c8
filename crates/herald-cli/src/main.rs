use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use herald::context::Reporter;
use herald::engine::{Engine, RunSummary, resolve_enabled};
use herald::pipeline;
use herald::providers::builtin_registry;
use herald::signing::{self, Keyring};
use herald_config::{Config, Overrides};
use herald_encrypt::PassphraseSource;
use herald_types::{Category, Outcome};

#[derive(Parser, Debug)]
#[command(name = "herald", version)]
#[command(about = "Publish one release to announcers, file stores and staged repositories")]
struct Cli {
    /// Path to .herald.toml (default: search upwards from the current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log every mutating call instead of performing it.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Directory for signatures and the event log (default: out/herald)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Print debug lines.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign, then deploy, upload and announce.
    Release(Filter),
    /// Run the announce providers only.
    Announce(Filter),
    /// Run the upload providers only.
    Upload(Filter),
    /// Run the deploy providers only.
    Deploy(Filter),
    /// Sign the project artifacts.
    Sign,
    /// Check a detached signature.
    Verify {
        #[arg(long)]
        keyring: PathBuf,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        signature: PathBuf,
        #[arg(long)]
        key_id: Option<String>,
    },
    /// Create a signing key and add it to a keyring.
    Keygen {
        #[arg(long)]
        keyring: PathBuf,
        #[arg(long)]
        id: String,
        /// Environment variable holding the passphrase that seals the key
        #[arg(long, default_value = "HERALD_SIGNING_PASSPHRASE")]
        passphrase_env: String,
    },
    /// List configured providers and whether they would run.
    Providers,
}

#[derive(Args, Debug, Default)]
struct Filter {
    /// Run only these providers (repeatable).
    #[arg(long = "include")]
    include: Vec<String>,

    /// Skip these providers (repeatable; ignored with --include).
    #[arg(long = "exclude")]
    exclude: Vec<String>,
}

struct CliReporter {
    verbose: bool,
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }

    fn debug(&mut self, msg: &str) {
        if self.verbose {
            eprintln!("[debug] {msg}");
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("failed to read current directory")?;

    match &cli.cmd {
        Commands::Verify {
            keyring,
            file,
            signature,
            key_id,
        } => return run_verify(keyring, file, signature, key_id.as_deref()),
        Commands::Keygen {
            keyring,
            id,
            passphrase_env,
        } => return run_keygen(keyring, id, passphrase_env),
        _ => {}
    }

    let (config, base_dir) = load(&cli, &cwd)?;
    let reporter = Box::new(CliReporter {
        verbose: cli.verbose,
    });
    let ctx = pipeline::context_for(&config, &base_dir, reporter);
    let registry = builtin_registry();
    let bus = pipeline::default_bus(&ctx);
    let started = Instant::now();

    match &cli.cmd {
        Commands::Release(filter) => {
            let report =
                pipeline::run_release(&config, &registry, &bus, &ctx, &filter.include, &filter.exclude)?;
            for signature in &report.signatures {
                println!("signed: {}", signature.signature_path.display());
            }
            for summary in &report.summaries {
                print_summary(summary);
            }
        }
        Commands::Announce(filter) => {
            run_category(&config, &registry, &bus, &ctx, Category::Announce, filter)?
        }
        Commands::Upload(filter) => {
            run_category(&config, &registry, &bus, &ctx, Category::Upload, filter)?
        }
        Commands::Deploy(filter) => {
            run_category(&config, &registry, &bus, &ctx, Category::Deploy, filter)?
        }
        Commands::Sign => {
            if !config.signing.enabled {
                bail!("signing is not enabled in [signing]");
            }
            for signature in pipeline::run_signing(&config, &ctx)? {
                println!("signed: {}", signature.signature_path.display());
            }
        }
        Commands::Providers => {
            print_providers(&config, &registry, ctx.project().is_snapshot())?;
            return Ok(());
        }
        // Keyring commands return before configuration is loaded.
        Commands::Verify { .. } | Commands::Keygen { .. } => {}
    }

    let elapsed = std::time::Duration::from_millis(started.elapsed().as_millis() as u64);
    ctx.logger()
        .debug(&format!("finished in {}", humantime::format_duration(elapsed)));
    Ok(())
}

/// Load the configuration and the directory its relative paths resolve against.
fn load(cli: &Cli, cwd: &Path) -> Result<(Config, PathBuf)> {
    let path = match &cli.config {
        Some(path) => Some(cwd.join(path)),
        None => herald_config::find_config(cwd),
    };
    let (config, base_dir) = match path {
        Some(path) => {
            let config = herald_config::load_config_from_file(&path)?;
            let base = path.parent().map(Path::to_path_buf).unwrap_or_else(|| cwd.to_path_buf());
            (config, base)
        }
        None => (Config::default(), cwd.to_path_buf()),
    };

    let overrides = Overrides {
        dry_run: cli.dry_run.then_some(true),
        output_dir: cli.output_dir.as_ref().map(|dir| cwd.join(dir)),
    };
    let config = config.merge(&overrides);
    config.validate()?;
    Ok((config, base_dir))
}

fn run_category(
    config: &Config,
    registry: &herald::engine::ProviderRegistry,
    bus: &herald::lifecycle::EventBus,
    ctx: &herald::context::ExecutionContext,
    category: Category,
    filter: &Filter,
) -> Result<()> {
    let summary =
        Engine::new(config, registry, bus).run(category, &filter.include, &filter.exclude, ctx)?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    for (name, outcome) in &summary.ran {
        let status = match outcome {
            Outcome::RanOk => "ok",
            Outcome::RanFailed => "failed",
        };
        println!("{}.{name}: {status}", summary.category);
    }
    for name in &summary.skipped {
        println!("{}.{name}: skipped", summary.category);
    }
}

fn print_providers(
    config: &Config,
    registry: &herald::engine::ProviderRegistry,
    snapshot: bool,
) -> Result<()> {
    let mut any = false;
    for category in Category::RELEASE_ORDER {
        for (name, entry) in config.providers(category) {
            let provider = registry.build(category, name, entry)?;
            let state = if resolve_enabled(provider.as_ref(), snapshot) {
                "enabled"
            } else if provider.is_enabled() {
                "skipped for snapshots"
            } else {
                "disabled"
            };
            println!("{category}.{name} ({}): {state}", entry.kind);
            any = true;
        }
    }
    if !any {
        println!("no providers configured");
    }
    Ok(())
}

fn run_verify(keyring_path: &Path, file: &Path, signature: &Path, key_id: Option<&str>) -> Result<()> {
    let keyring = Keyring::load(keyring_path)?;
    let entry = keyring.find(key_id).with_context(|| {
        format!(
            "no key{} in keyring {}",
            key_id.map(|id| format!(" '{id}'")).unwrap_or_default(),
            keyring_path.display()
        )
    })?;
    let public_key = entry.verifying_key()?;

    if signing::verify_detached(file, signature, &public_key)? {
        println!("good signature from key {} for {}", entry.id, file.display());
        Ok(())
    } else {
        bail!("BAD signature {} for {}", signature.display(), file.display())
    }
}

fn run_keygen(keyring_path: &Path, id: &str, passphrase_env: &str) -> Result<()> {
    let passphrase = PassphraseSource::from_env(passphrase_env)
        .resolve()
        .with_context(|| format!("set {passphrase_env} to the passphrase that will seal the key"))?;

    let mut keyring = Keyring::load_or_default(keyring_path)?;
    let entry = signing::generate_key(id, &passphrase)?;
    let public_key = entry.public_key.clone();
    keyring.add(entry)?;
    keyring.save(keyring_path)?;

    println!("created key {id} ({public_key}) in {}", keyring_path.display());
    Ok(())
}
