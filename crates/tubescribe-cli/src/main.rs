use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tubescribe::server::{self, AppState, Envelope};
use tubescribe_core::BrowserEngine;
use tubescribe_local::config::{chromium_options_from_env, config_from_env};
use tubescribe_local::{Acquirer, ChromiumEngine};

#[derive(Parser, Debug)]
#[command(name = "tubescribe")]
#[command(about = "Video page transcript scraper (HTTP service + one-shot CLI)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve `POST /scrape` over HTTP.
    Serve(ServeCmd),
    /// Acquire one page and print the JSON envelope.
    Scrape(ScrapeCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct ServeCmd {
    #[arg(long, env = "TUBESCRIBE_HOST", default_value = "127.0.0.1")]
    host: String,
    #[arg(long, env = "TUBESCRIBE_PORT", default_value_t = 3000)]
    port: u16,
}

#[derive(clap::Args, Debug)]
struct ScrapeCmd {
    /// Watch page URL.
    url: String,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

/// `KEY=VALUE` pairs of an env file; blank lines, `#` comments and keyless lines are skipped.
fn env_pairs(txt: &str) -> impl Iterator<Item = (&str, &str)> {
    txt.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
}

/// Apply the file named by `TUBESCRIBE_ENV_FILE`, never overriding the process env.
///
/// Runs before logging is up, so it reports the keys it set (or why it could not read
/// the file) and the caller logs them.
fn load_env_file() -> Result<Vec<String>> {
    let path = std::env::var("TUBESCRIBE_ENV_FILE").unwrap_or_default();
    let path = path.trim();
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let txt = std::fs::read_to_string(path).with_context(|| format!("reading env file {path}"))?;
    let mut loaded = Vec::new();
    for (k, v) in env_pairs(&txt) {
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
            loaded.push(k.to_string());
        }
    }
    Ok(loaded)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tubescribe=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn launch_engine() -> Result<Arc<ChromiumEngine>> {
    let engine = ChromiumEngine::launch(chromium_options_from_env())
        .await
        .context("launching browser")?;
    Ok(Arc::new(engine))
}

async fn serve(args: ServeCmd) -> Result<()> {
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let state = AppState::new();
    let app = server::router(state.clone());
    let http = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    let engine = match launch_engine().await {
        Ok(e) => e,
        Err(e) => {
            http.abort();
            return Err(e);
        }
    };
    if !state.install(Acquirer::new(engine.clone(), config_from_env())) {
        http.abort();
        let _ = engine.shutdown().await;
        anyhow::bail!("acquirer installed twice");
    }
    tracing::info!("browser ready");

    let served = http.await;
    if let Err(e) = engine.shutdown().await {
        tracing::warn!(error = %e, "browser shutdown failed");
    }
    served?.context("http server")?;
    Ok(())
}

fn print_envelope(env: &Envelope, output: &str) -> Result<()> {
    match (output.to_ascii_lowercase().as_str(), &env.data) {
        ("text", Some(r)) => println!("{}", r.transcript_text),
        ("text", None) => {}
        _ => println!("{}", serde_json::to_string(env)?),
    }
    Ok(())
}

async fn scrape(args: ScrapeCmd) -> Result<()> {
    if let Err(e) = tubescribe_core::parse_target_url(&args.url) {
        let msg = server::error_message(&e);
        print_envelope(&Envelope::failure(msg.clone()), &args.output)?;
        anyhow::bail!(msg);
    }

    let engine = launch_engine().await?;
    let acquirer = Acquirer::new(engine.clone(), config_from_env());
    let out = acquirer.acquire(&args.url).await;
    if let Err(e) = engine.shutdown().await {
        tracing::warn!(error = %e, "browser shutdown failed");
    }

    match out {
        Ok(r) => print_envelope(&Envelope::ok(r), &args.output),
        Err(e) => {
            let msg = server::error_message(&e);
            print_envelope(&Envelope::failure(msg.clone()), &args.output)?;
            anyhow::bail!(msg)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_file = load_env_file();
    init_tracing();
    match env_file {
        Ok(keys) if !keys.is_empty() => tracing::debug!(keys = ?keys, "loaded env file"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %format!("{e:#}"), "env file ignored"),
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => serve(args).await?,
        Commands::Scrape(args) => scrape(args).await?,
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "tubescribe",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("tubescribe {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_file_fills_gaps_without_overriding() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("tubescribe.env");
        std::fs::write(
            &p,
            "# comment\nTUBESCRIBE_TEST_ENVFILE_NEW = from-file\nTUBESCRIBE_TEST_ENVFILE_SET=from-file\nnot a pair\n=x\n",
        )
        .unwrap();

        std::env::set_var("TUBESCRIBE_TEST_ENVFILE_SET", "explicit");
        std::env::remove_var("TUBESCRIBE_TEST_ENVFILE_NEW");
        std::env::set_var("TUBESCRIBE_ENV_FILE", &p);
        let loaded = load_env_file().unwrap();
        std::env::remove_var("TUBESCRIBE_ENV_FILE");
        assert_eq!(loaded, vec!["TUBESCRIBE_TEST_ENVFILE_NEW".to_string()]);

        assert_eq!(
            std::env::var("TUBESCRIBE_TEST_ENVFILE_NEW").as_deref(),
            Ok("from-file")
        );
        assert_eq!(
            std::env::var("TUBESCRIBE_TEST_ENVFILE_SET").as_deref(),
            Ok("explicit")
        );
        std::env::remove_var("TUBESCRIBE_TEST_ENVFILE_NEW");
        std::env::remove_var("TUBESCRIBE_TEST_ENVFILE_SET");

        // Same test: both cases share the process-wide TUBESCRIBE_ENV_FILE.
        std::env::set_var("TUBESCRIBE_ENV_FILE", dir.path().join("missing.env"));
        let err = load_env_file().unwrap_err();
        std::env::remove_var("TUBESCRIBE_ENV_FILE");
        assert!(format!("{err:#}").contains("missing.env"), "{err:#}");
    }

    #[test]
    fn env_pairs_skip_comments_and_keyless_lines() {
        let pairs: Vec<_> = env_pairs("# c\n\nA=1\n =2\nB = x=y \nnope\n").collect();
        assert_eq!(pairs, vec![("A", "1"), ("B", "x=y")]);
    }

    #[test]
    fn cli_parses_serve_defaults_and_scrape() {
        let cli = Cli::try_parse_from(["tubescribe", "scrape", "https://example.com/watch?v=x"])
            .unwrap();
        match cli.command {
            Commands::Scrape(a) => {
                assert_eq!(a.url, "https://example.com/watch?v=x");
                assert_eq!(a.output, "json");
            }
            other => panic!("unexpected {other:?}"),
        }
        let cli = Cli::try_parse_from(["tubescribe", "serve", "--port", "8080"]).unwrap();
        match cli.command {
            Commands::Serve(a) => assert_eq!(a.port, 8080),
            other => panic!("unexpected {other:?}"),
        }
    }
}
