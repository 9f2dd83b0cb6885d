//! dropseal: end-to-end encrypted file drops
//!
//! Commands:
//!   seal <files>...       - encrypt files into a new bundle and upload it
//!   open <bundle-id>      - unlock a bundle and decrypt its files locally
//!   list                  - list stored bundle ids
//!   delete <bundle-id>    - remove a bundle record and its blobs
//!   keygen                - print a fresh server secret
//!   config show           - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use dropseal_core::config::{expand_tilde, DropsealConfig};
use dropseal_core::types::{BundleAccess, BundleRecord, FileRecord, UnlockRequest};
use dropseal_crypto::{unlock_proof_for, OpeningSession, ProgressFn, SealingSession, SystemProvider};
use dropseal_gate::{generate_server_secret, load_server_secret, UnlockGate};
use dropseal_storage::{build_operator, check_health, BundleStore, S3Credentials};

static PROVIDER: SystemProvider = SystemProvider;

/// Client identity used for rate limiting when the gate runs in-process.
const LOCAL_CLIENT: &str = "local";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "dropseal",
    version,
    about = "End-to-end encrypted file drops",
    long_about = "dropseal: seal files under a passphrase, store the ciphertext, and open it again"
)]
struct Cli {
    /// Path to dropseal.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "DROPSEAL_CONFIG",
        default_value = "~/.config/dropseal/config.toml"
    )]
    config: PathBuf,

    /// Log level (overrides config; RUST_LOG takes precedence over both)
    #[arg(long, env = "DROPSEAL_LOG")]
    log: Option<String>,

    /// Log format (overrides config)
    #[arg(long, env = "DROPSEAL_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt files into a new bundle
    ///
    /// The passphrase is read from DROPSEAL_PASSPHRASE or prompted for.
    Seal {
        /// Files to include
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Expire the bundle this many seconds from now
        #[arg(long)]
        expires_in: Option<u64>,
        /// Bundle id (default: random)
        #[arg(long)]
        bundle_id: Option<String>,
    },

    /// Unlock a bundle and decrypt its files
    Open {
        bundle_id: String,
        /// Output directory (default: current directory)
        #[arg(long, short = 'o', default_value = ".")]
        out: PathBuf,
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// List stored bundles
    List,

    /// Delete a bundle and all of its blobs
    Delete { bundle_id: String },

    /// Print a fresh base64url server secret
    Keygen,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    // The missing-file warning fires before the configured subscriber exists.
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt().with_writer(std::io::stderr).finish(),
        || DropsealConfig::load(&config_path),
    )
    .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    match cli.command {
        Commands::Seal {
            files,
            expires_in,
            bundle_id,
        } => cmd_seal(&config, &files, expires_in, bundle_id).await,
        Commands::Open {
            bundle_id,
            out,
            force,
        } => cmd_open(&config, &bundle_id, &out, force).await,
        Commands::List => cmd_list(&config).await,
        Commands::Delete { bundle_id } => cmd_delete(&config, &bundle_id).await,
        Commands::Keygen => cmd_keygen(),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Storage and gate from configuration ───────────────────────────────────────

async fn open_store(config: &DropsealConfig) -> Result<BundleStore> {
    let creds = S3Credentials::from_env();
    let op = build_operator(&config.storage, creds.as_ref())?;
    check_health(&op)
        .await
        .with_context(|| format!("storage backend {:?} unreachable", config.storage.backend))?;
    Ok(BundleStore::new(op))
}

fn open_gate(config: &DropsealConfig) -> Result<UnlockGate> {
    let secret = load_server_secret(&config.unlock)?;
    Ok(UnlockGate::new(secret, &config.unlock)?)
}

// ── Passphrase input ──────────────────────────────────────────────────────────

fn read_passphrase(confirm: bool) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("DROPSEAL_PASSPHRASE") {
        anyhow::ensure!(!pw.is_empty(), "DROPSEAL_PASSPHRASE is empty");
        return Ok(SecretString::from(pw));
    }

    let pw = SecretString::from(
        rpassword::prompt_password("Passphrase: ").context("reading passphrase")?,
    );
    anyhow::ensure!(!pw.expose_secret().is_empty(), "passphrase must not be empty");
    if confirm {
        let again = SecretString::from(
            rpassword::prompt_password("Confirm passphrase: ").context("reading passphrase")?,
        );
        anyhow::ensure!(
            pw.expose_secret() == again.expose_secret(),
            "passphrases do not match"
        );
    }
    Ok(pw)
}

// ── Progress display ──────────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn chunk_progress(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done, total| {
        pb.set_length(total);
        pb.set_position(done);
    })
}

// ── `dropseal seal` ───────────────────────────────────────────────────────────

async fn cmd_seal(
    config: &DropsealConfig,
    files: &[PathBuf],
    expires_in: Option<u64>,
    bundle_id: Option<String>,
) -> Result<()> {
    for path in files {
        anyhow::ensure!(path.is_file(), "not a file: {}", path.display());
    }

    let store = open_store(config).await?;
    let gate = open_gate(config)?;
    let bundle_id = bundle_id.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    if store.get_record(&bundle_id).await?.is_some() {
        anyhow::bail!("bundle {bundle_id} already exists");
    }

    let passphrase = read_passphrase(true)?;
    let crypto = config.crypto.clone();
    let session = tokio::task::spawn_blocking(move || {
        SealingSession::new(&PROVIDER, &passphrase, &crypto)
    })
    .await
    .context("key derivation task failed")??;
    let session = Arc::new(session);

    let verifier = gate.enroll(&session.unlock_proof().to_b64())?;

    println!("Sealing {} file(s) into bundle {bundle_id}", files.len());

    let mut records = Vec::with_capacity(files.len());
    let mut total_bytes = 0u64;
    for path in files {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let size = std::fs::metadata(path)
            .with_context(|| format!("reading metadata: {}", path.display()))?
            .len();

        let pb = make_progress_bar(0, "seal");
        pb.set_message(filename.clone());
        let progress = chunk_progress(&pb);

        let tmp = tempfile::NamedTempFile::new().context("creating temp file")?;
        let sealed_path = tmp.path().to_path_buf();
        let source = path.clone();
        let session = Arc::clone(&session);
        let mimetype = guess_mimetype(&filename).to_string();
        let name = filename.clone();
        let record = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut reader = std::io::BufReader::new(
                std::fs::File::open(&source)
                    .with_context(|| format!("opening {}", source.display()))?,
            );
            let mut writer = std::io::BufWriter::new(
                std::fs::File::create(&sealed_path).context("opening temp file")?,
            );
            let record =
                session.seal_stream(&name, &mimetype, &mut reader, &mut writer, size, Some(&progress))?;
            std::io::Write::flush(&mut writer).context("flushing temp file")?;
            Ok(record)
        })
        .await
        .context("sealing task failed")??;

        let stored = store
            .put_blob_file(&bundle_id, &record.content_key, tmp.path())
            .await
            .with_context(|| format!("uploading {filename}"))?;
        pb.finish_with_message(format!("{filename} ({})", fmt_bytes(stored)));

        total_bytes += size;
        records.push(record);
    }

    let now = unix_now();
    let record = BundleRecord {
        bundle_id: bundle_id.clone(),
        access: BundleAccess::Encrypted(session.encryption_params(verifier)),
        created_at: now,
        expires_at: expires_in.map(|secs| now.saturating_add(secs)),
        files: records,
    };
    store.put_record(&record).await?;
    info!(bundle = %bundle_id, files = record.files.len(), "bundle sealed");

    println!();
    println!("Seal complete:");
    println!("  bundle:  {bundle_id}");
    println!("  files:   {}", record.files.len());
    println!("  bytes:   {}", fmt_bytes(total_bytes));
    if let Some(exp) = record.expires_at {
        println!("  expires: {exp} (unix)");
    }
    Ok(())
}

// ── `dropseal open` ───────────────────────────────────────────────────────────

async fn cmd_open(config: &DropsealConfig, bundle_id: &str, out: &Path, force: bool) -> Result<()> {
    let store = open_store(config).await?;
    let gate = open_gate(config)?;
    let record = store
        .get_record(bundle_id)
        .await?
        .with_context(|| format!("bundle not found: {bundle_id}"))?;
    let params = record.encryption()?.clone();

    let passphrase = Arc::new(read_passphrase(false)?);

    let proof = {
        let pw = Arc::clone(&passphrase);
        let params = params.clone();
        tokio::task::spawn_blocking(move || unlock_proof_for(&PROVIDER, &pw, &params))
            .await
            .context("key derivation task failed")??
    };
    let grant = gate
        .unlock(&record, LOCAL_CLIENT, &UnlockRequest::with_proof(proof.to_b64()))
        .await?;
    gate.validate_token(&grant.token, bundle_id)?;

    let crypto = config.crypto.clone();
    let session = tokio::task::spawn_blocking(move || {
        OpeningSession::new(&PROVIDER, &passphrase, &params, &crypto)
    })
    .await
    .context("key derivation task failed")??;
    let session = Arc::new(session);

    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;

    let failed = open_bundle_files(&store, &session, &record, out, force).await;
    let opened = record.files.len() - failed.len();

    println!();
    println!("Opened {opened} file(s) into {}", out.display());
    if !failed.is_empty() {
        anyhow::bail!(
            "{} of {} file(s) could not be opened: {}",
            failed.len(),
            record.files.len(),
            failed.join(", ")
        );
    }
    Ok(())
}

/// Open every file of `record` into `out`. A failing file is logged and
/// skipped; the labels of all failed files are returned.
async fn open_bundle_files(
    store: &BundleStore,
    session: &Arc<OpeningSession<'static>>,
    record: &BundleRecord,
    out: &Path,
    force: bool,
) -> Vec<String> {
    let mut failed = Vec::new();
    for file in &record.files {
        if let Err(e) = open_one(store, session, &record.bundle_id, file, out, force).await {
            warn!(bundle = %record.bundle_id, content_key = %file.content_key, "open failed: {e:#}");
            eprintln!("  {}: {e:#}", file.content_key);
            failed.push(file.content_key.clone());
        }
    }
    failed
}

async fn open_one(
    store: &BundleStore,
    session: &Arc<OpeningSession<'static>>,
    bundle_id: &str,
    file: &FileRecord,
    out: &Path,
    force: bool,
) -> Result<()> {
    let metadata = session.file_metadata(file)?;
    let name = safe_file_name(&metadata.filename).unwrap_or_else(|| file.content_key.clone());
    let dest = out.join(&name);
    if dest.exists() && !force {
        anyhow::bail!("{} exists (use --force to overwrite)", dest.display());
    }

    let blob = store.get_blob(bundle_id, &file.content_key).await?;

    let pb = make_progress_bar(0, "open");
    pb.set_message(name.clone());
    let progress = chunk_progress(&pb);

    let tmp = tempfile::NamedTempFile::new_in(out).context("creating temp file")?;
    let session = Arc::clone(session);
    let file_record = file.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut reader = std::io::Cursor::new(blob);
        let mut writer = std::io::BufWriter::new(tmp.as_file());
        session.open_stream(&file_record, &mut reader, &mut writer, Some(&progress))?;
        std::io::Write::flush(&mut writer).context("flushing temp file")?;
        drop(writer);
        Ok(tmp)
    })
    .await
    .context("decryption task failed")
    .and_then(|r| r);

    let tmp = match result {
        Ok(tmp) => tmp,
        Err(e) => {
            pb.abandon_with_message(format!("{name} (failed)"));
            return Err(e);
        }
    };
    tmp.persist(&dest)
        .with_context(|| format!("writing {}", dest.display()))?;
    pb.finish_with_message(format!("{name} ({})", fmt_bytes(file.original_size)));
    Ok(())
}

// ── `dropseal list` / `dropseal delete` ───────────────────────────────────────

async fn cmd_list(config: &DropsealConfig) -> Result<()> {
    let store = open_store(config).await?;
    let now = unix_now();
    for id in store.list_bundles().await? {
        match store.get_record(&id).await {
            Ok(Some(record)) => {
                let mode = match record.access {
                    BundleAccess::Open => "open",
                    BundleAccess::Password { .. } => "password",
                    BundleAccess::Encrypted(_) => "encrypted",
                };
                let state = if record.is_expired(now) { " (expired)" } else { "" };
                println!("{id}  {mode}  {} file(s){state}", record.files.len());
            }
            Ok(None) => println!("{id}  (no record)"),
            Err(e) => println!("{id}  (unreadable: {e})"),
        }
    }
    Ok(())
}

async fn cmd_delete(config: &DropsealConfig, bundle_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let removed = store.delete_bundle(bundle_id).await?;
    if removed == 0 {
        anyhow::bail!("bundle not found: {bundle_id}");
    }
    println!("Deleted {bundle_id} ({removed} object(s))");
    Ok(())
}

// ── `dropseal keygen` ─────────────────────────────────────────────────────────

fn cmd_keygen() -> Result<()> {
    println!("{}", generate_server_secret(&PROVIDER)?);
    Ok(())
}

// ── `dropseal config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &DropsealConfig, path: &Path) -> Result<()> {
    println!("# config: {}", path.display());
    let rendered = toml::to_string_pretty(config).context("rendering config")?;
    print!("{rendered}");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Reduce a decrypted filename to its final component. Metadata is sender
/// controlled and must never place files outside the output directory.
fn safe_file_name(name: &str) -> Option<String> {
    let last = Path::new(name).file_name()?.to_string_lossy().to_string();
    if last.is_empty() || last == "." || last == ".." {
        None
    } else {
        Some(last)
    }
}

fn guess_mimetype(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropseal_core::config::CryptoConfig;
    use dropseal_crypto::PlainFile;

    fn plain(name: &str, len: usize) -> PlainFile {
        PlainFile {
            filename: name.into(),
            mimetype: guess_mimetype(name).into(),
            data: vec![b'x'; len],
        }
    }

    #[tokio::test]
    async fn corrupt_file_does_not_stop_the_others() {
        let crypto = CryptoConfig {
            iterations: 10_000,
            chunk_size: 256,
            allowed_chunk_sizes: vec![256],
        };
        let pw = SecretString::from("pw".to_string());
        let sealer = SealingSession::new(&PROVIDER, &pw, &crypto).unwrap();
        let sealed = sealer
            .seal_files(&[plain("a.txt", 300), plain("b.txt", 600), plain("c.txt", 10)])
            .unwrap();

        let store = BundleStore::memory().unwrap();
        for (i, f) in sealed.iter().enumerate() {
            let mut ct = f.ciphertext.clone();
            if i == 0 {
                ct[5] ^= 0x01;
            }
            store.put_blob("b1", &f.record.content_key, ct).await.unwrap();
        }
        let record = BundleRecord {
            bundle_id: "b1".into(),
            access: BundleAccess::Encrypted(sealer.encryption_params(String::new())),
            created_at: 0,
            expires_at: None,
            files: sealed.iter().map(|f| f.record.clone()).collect(),
        };

        let params = record.encryption().unwrap();
        let opener = Arc::new(OpeningSession::new(&PROVIDER, &pw, params, &crypto).unwrap());
        let out = tempfile::tempdir().unwrap();
        let failed = open_bundle_files(&store, &opener, &record, out.path(), false).await;

        assert_eq!(failed, vec![record.files[0].content_key.clone()]);
        assert!(!out.path().join("a.txt").exists());
        assert_eq!(std::fs::read(out.path().join("b.txt")).unwrap().len(), 600);
        assert_eq!(std::fs::read(out.path().join("c.txt")).unwrap().len(), 10);
    }

    #[test]
    fn file_names_stay_inside_output_dir() {
        assert_eq!(safe_file_name("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(safe_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(safe_file_name("/abs/path/x.txt").as_deref(), Some("x.txt"));
        assert_eq!(safe_file_name(".."), None);
        assert_eq!(safe_file_name(""), None);
    }

    #[test]
    fn mimetype_by_extension() {
        assert_eq!(guess_mimetype("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mimetype("notes.txt"), "text/plain");
        assert_eq!(guess_mimetype("blob"), "application/octet-stream");
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(1536), "1.5 KB");
        assert_eq!(fmt_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn cli_parses() {
        let cli = Cli::try_parse_from(["dropseal", "open", "abc", "--out", "/tmp/x", "--force"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Open { force: true, .. }));
        assert!(Cli::try_parse_from(["dropseal", "seal"]).is_err());
    }
}
