mod server;

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use sitegen::config::credential_from_env;
use sitegen::{Attachment, GenerationClient, GenerationConfig, Session, SitegenConfig};

use server::AppState;

#[derive(Parser)]
#[command(name = "sitegen", version, about = "Describe a website and watch it being built")]
struct Args {
    /// Gemini API key (falls back to ~/.sitegen/config.json, then API_KEY)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model name (default: gemini-2.5-flash)
    #[arg(long)]
    model: Option<String>,

    /// Base URL for the Gemini API
    #[arg(long)]
    base_url: Option<String>,

    /// Sampling temperature (default: 0.7)
    #[arg(long)]
    temperature: Option<f32>,

    /// Output-token ceiling per generation (default: 8192)
    #[arg(long)]
    max_output_tokens: Option<u32>,

    /// Address to serve the web UI on
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: SocketAddr,

    /// Generate a single page from this prompt, write it out, exit
    #[arg(short = 'p', long = "print")]
    print_prompt: Option<String>,

    /// Reference image (PNG or JPEG) for --print
    #[arg(long, requires = "print_prompt")]
    image: Option<PathBuf>,

    /// Write the page to this file instead of stdout (with --print)
    #[arg(short = 'o', long, requires = "print_prompt")]
    output: Option<PathBuf>,

    /// Persist the effective settings to ~/.sitegen/config.json
    #[arg(long)]
    save_config: bool,

    /// Delete all sitegen data (~/.sitegen/) and exit
    #[arg(long)]
    reset: bool,
}

/// Flags and GEMINI_API_KEY win over the config file, which wins over
/// built-in defaults. `env_key` (API_KEY) is the last resort for the
/// credential. Blank keys count as unset at every step.
fn resolve_config(
    args: &Args,
    stored: Option<&SitegenConfig>,
    env_key: Option<String>,
) -> GenerationConfig {
    let mut config = GenerationConfig::default();
    if let Some(stored) = stored {
        stored.apply(&mut config);
    }
    if let Some(key) = args.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        config.api_key = Some(key.to_string());
    }
    if config.credential().is_none() {
        config.api_key = env_key.filter(|k| !k.trim().is_empty());
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(url) = &args.base_url {
        config.base_url = url.clone();
    }
    if let Some(t) = args.temperature {
        config.temperature = t;
    }
    if let Some(n) = args.max_output_tokens {
        config.max_output_tokens = n;
    }
    config
}

fn init_logging(log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;
    let log_path = log_dir.join("sitegen.log");
    let log_file = std::fs::File::create(&log_path)
        .with_context(|| format!("failed to create {}", log_path.display()))?;

    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("SITEGEN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .init();
    Ok(())
}

fn reset() -> anyhow::Result<()> {
    let dir = SitegenConfig::dir();
    eprintln!();
    eprintln!("  This will permanently delete all sitegen data:");
    eprintln!("    {}", dir.display());
    eprintln!();
    eprint!("  Are you sure? [y/N] ");
    std::io::stderr().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    if answer.trim().eq_ignore_ascii_case("y") {
        SitegenConfig::clear()?;
        eprintln!("  Done. All data removed.");
    } else {
        eprintln!("  Aborted.");
    }
    eprintln!();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.reset {
        return reset();
    }

    init_logging(&SitegenConfig::dir())?;

    let stored = SitegenConfig::load();
    let config = resolve_config(&args, stored.as_ref(), credential_from_env());
    if args.save_config {
        SitegenConfig::from_effective(&config).save()?;
        eprintln!("Saved settings to {}", SitegenConfig::dir().join("config.json").display());
    }
    if config.credential().is_none() {
        eprintln!("warning: no API key set (GEMINI_API_KEY); generations will return an error comment");
    }

    let client = GenerationClient::gemini(config);

    if let Some(prompt) = args.print_prompt {
        return run_print(client, prompt, args.image, args.output).await;
    }

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("failed to bind {}", args.addr))?;
    eprintln!("sitegen listening on http://{}", listener.local_addr()?);
    server::run(listener, AppState::new(client)).await
}

/// Run one turn outside the web UI. Fragments stream to stdout unless an
/// output file is given. Fails if the page ends in an error comment.
async fn run_print(
    client: GenerationClient,
    prompt: String,
    image: Option<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut session = Session::new();
    if let Some(path) = image {
        session.set_attachment(Attachment::from_path(&path)?);
    }

    match output {
        Some(path) => {
            stream_turn(&client, &mut session, &prompt, None).await?;
            std::fs::write(&path, session.document())
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stream_turn(&client, &mut session, &prompt, Some(&mut stdout)).await?;
            writeln!(stdout)?;
        }
    }

    if ends_with_diagnostic(session.document()) {
        anyhow::bail!("generation failed: see the error comment in the output");
    }
    Ok(())
}

/// Submit `prompt`, copying each fragment to `out`. The first write error
/// stops further writes and is returned once the turn has finished.
async fn stream_turn(
    client: &GenerationClient,
    session: &mut Session,
    prompt: &str,
    mut out: Option<&mut dyn Write>,
) -> anyhow::Result<()> {
    let mut write_error = None;
    let accepted = session
        .submit(client, prompt, |fragment| {
            if write_error.is_some() {
                return;
            }
            let Some(out) = out.as_mut() else {
                return;
            };
            if let Err(e) = out.write_all(fragment.as_bytes()).and_then(|()| out.flush()) {
                write_error = Some(e);
            }
        })
        .await;
    if !accepted {
        anyhow::bail!("nothing to generate: pass a non-empty prompt or --image");
    }
    if let Some(e) = write_error {
        return Err(e).context("failed to write the page");
    }
    Ok(())
}

fn ends_with_diagnostic(document: &str) -> bool {
    document
        .rfind("<!-- Error:")
        .is_some_and(|idx| document[idx..].trim_end().ends_with("-->"))
}
