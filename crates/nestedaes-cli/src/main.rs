//! nestedaes: encrypt, rotate and decrypt files with nested AES
//!
//! Commands:
//!   encrypt <file>     - encrypt under a fresh KEK, written to --out-kek
//!   reencrypt <file>   - rotate to a fresh KEK, adding one layer
//!   decrypt <file>     - remove every layer with the current KEK
//!   inspect <file>     - print the plain header (no key needed)
//!   config show        - display current configuration
//!
//! Examples:
//!   nestedaes encrypt --out-kek kek.key --out foo.enc foo.txt
//!   nestedaes reencrypt --in-kek kek.key --out-kek kek2.key --out foo.renc foo.enc
//!   nestedaes decrypt --in-kek kek2.key --out foo.txt foo.renc

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use nestedaes_core::NestedAesConfig;
use nestedaes_crypto::{Aes256GcmCtr, BaseIv, Kek, PlainHeader, Suite};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "nestedaes",
    version,
    about = "Updatable file encryption with nested AES",
    long_about = "nestedaes: encrypt a file, rotate its key-encrypting key any number of \
                  times without decrypting it, and decrypt it with the latest key"
)]
struct Cli {
    /// Path to nestedaes.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "NESTEDAES_CONFIG",
        default_value = "nestedaes.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "NESTEDAES_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "NESTEDAES_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a file under a freshly generated KEK
    Encrypt {
        /// File to encrypt
        file: PathBuf,
        /// Output file (default: rewrite FILE in place)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Where to write the new KEK (default: keys.kek_file from config)
        #[arg(long)]
        out_kek: Option<PathBuf>,
        /// Associated data bound to the ciphertext; decrypt must pass the same
        #[arg(long, default_value = "")]
        aad: String,
    },

    /// Rotate an encrypted file to a freshly generated KEK
    ///
    /// The payload is re-encrypted, never decrypted. The old KEK no longer
    /// opens the result and can be destroyed.
    Reencrypt {
        /// Encrypted file
        file: PathBuf,
        /// Output file (default: rewrite FILE in place)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Current KEK file (default: keys.kek_file from config)
        #[arg(long)]
        in_kek: Option<PathBuf>,
        /// Where to write the new KEK; may equal --in-kek (default: keys.kek_file)
        #[arg(long)]
        out_kek: Option<PathBuf>,
    },

    /// Decrypt an encrypted file with its current KEK
    Decrypt {
        /// Encrypted file
        file: PathBuf,
        /// Output file (default: rewrite FILE in place)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
        /// Current KEK file (default: keys.kek_file from config)
        #[arg(long)]
        in_kek: Option<PathBuf>,
        /// Associated data given at encryption time
        #[arg(long, default_value = "")]
        aad: String,
    },

    /// Show the unencrypted part of a file's header
    Inspect {
        /// Encrypted file
        file: PathBuf,
    },

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

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = NestedAesConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = match &cli.log_format {
        Some(format) => format.clone(),
        None if config.logging.format == "json" => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(level, &format);

    match cli.command {
        Commands::Encrypt {
            file,
            out,
            out_kek,
            aad,
        } => cmd_encrypt(&config, &file, out.as_deref(), out_kek.as_deref(), &aad),
        Commands::Reencrypt {
            file,
            out,
            in_kek,
            out_kek,
        } => cmd_reencrypt(
            &config,
            &file,
            out.as_deref(),
            in_kek.as_deref(),
            out_kek.as_deref(),
        ),
        Commands::Decrypt {
            file,
            out,
            in_kek,
            aad,
        } => cmd_decrypt(&config, &file, out.as_deref(), in_kek.as_deref(), &aad),
        Commands::Inspect { file } => cmd_inspect(&file),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so `inspect` and `config show` output stays clean.
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

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_encrypt(
    config: &NestedAesConfig,
    file: &Path,
    out: Option<&Path>,
    out_kek: Option<&Path>,
    aad: &str,
) -> Result<()> {
    let out = resolve_output(config, file, out)?;
    let out_kek = out_kek.unwrap_or(&config.keys.kek_file);

    let plaintext =
        std::fs::read(file).with_context(|| format!("reading input: {}", file.display()))?;

    let kek = Kek::generate::<Aes256GcmCtr>();
    let base_iv = BaseIv::generate::<Aes256GcmCtr>();
    let blob = nestedaes_crypto::encrypt(
        &plaintext,
        kek.as_bytes(),
        base_iv.as_bytes(),
        aad.as_bytes(),
    )
    .context("encrypt failed")?;

    let staged_blob = StagedFile::write(&out, &blob, config.output.file_mode)
        .with_context(|| format!("writing output: {}", out.display()))?;
    let staged_kek = StagedFile::write(out_kek, kek.as_bytes(), config.keys.key_file_mode)
        .with_context(|| format!("writing KEK file: {}", out_kek.display()))?;
    publish_with_kek(staged_blob, staged_kek)?;

    info!(
        input = %file.display(),
        output = %out.display(),
        kek = %out_kek.display(),
        bytes = plaintext.len(),
        "encrypted"
    );
    Ok(())
}

fn cmd_reencrypt(
    config: &NestedAesConfig,
    file: &Path,
    out: Option<&Path>,
    in_kek: Option<&Path>,
    out_kek: Option<&Path>,
) -> Result<()> {
    let out = resolve_output(config, file, out)?;
    let in_kek = in_kek.unwrap_or(&config.keys.kek_file);
    let out_kek = out_kek.unwrap_or(&config.keys.kek_file);

    let blob = std::fs::read(file).with_context(|| format!("reading input: {}", file.display()))?;
    let kek = read_kek(in_kek)?;

    let (blob, new_kek) =
        nestedaes_crypto::reencrypt(blob, kek.as_bytes()).context("reencrypt failed")?;
    let layers = PlainHeader::peek::<Aes256GcmCtr>(&blob)?.layer_count::<Aes256GcmCtr>()?;

    let staged_blob = StagedFile::write(&out, &blob, config.output.file_mode)
        .with_context(|| format!("writing output: {}", out.display()))?;
    let staged_kek = StagedFile::write(out_kek, new_kek.as_bytes(), config.keys.key_file_mode)
        .with_context(|| format!("writing KEK file: {}", out_kek.display()))?;
    publish_with_kek(staged_blob, staged_kek)?;

    info!(
        input = %file.display(),
        output = %out.display(),
        kek = %out_kek.display(),
        layers,
        "reencrypted"
    );
    Ok(())
}

fn cmd_decrypt(
    config: &NestedAesConfig,
    file: &Path,
    out: Option<&Path>,
    in_kek: Option<&Path>,
    aad: &str,
) -> Result<()> {
    let out = resolve_output(config, file, out)?;
    let in_kek = in_kek.unwrap_or(&config.keys.kek_file);

    let blob = std::fs::read(file).with_context(|| format!("reading input: {}", file.display()))?;
    let kek = read_kek(in_kek)?;

    let plaintext = nestedaes_crypto::decrypt(blob, kek.as_bytes(), aad.as_bytes())
        .context("decrypt failed")?;

    write_file(&out, &plaintext, config.output.file_mode)
        .with_context(|| format!("writing output: {}", out.display()))?;

    info!(
        input = %file.display(),
        output = %out.display(),
        bytes = plaintext.len(),
        "decrypted"
    );
    Ok(())
}

fn cmd_inspect(file: &Path) -> Result<()> {
    let blob = std::fs::read(file).with_context(|| format!("reading input: {}", file.display()))?;
    print!("{}", render_plain_header(&blob)?);
    Ok(())
}

fn cmd_config_show(config: &NestedAesConfig, path: &Path) -> Result<()> {
    println!("# config: {}", path.display());
    let rendered = toml::to_string_pretty(config).context("serializing config")?;
    print!("{rendered}");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn render_plain_header(blob: &[u8]) -> Result<String> {
    let plain = PlainHeader::peek::<Aes256GcmCtr>(blob).context("reading plain header")?;
    let layers = plain
        .layer_count::<Aes256GcmCtr>()
        .context("malformed header")?;
    let payload = blob
        .len()
        .checked_sub(plain.size as usize)
        .context("header size exceeds file size")?;

    Ok(format!(
        "suite:        {}\nheader size:  {} bytes\nbase IV:      {}\nlayers:       {}\npayload size: {} bytes\n",
        Aes256GcmCtr::NAME,
        plain.size,
        hex::encode(&plain.base_iv),
        layers,
        payload,
    ))
}

/// Output path: explicit `--out`, else the input itself when allowed.
fn resolve_output(config: &NestedAesConfig, input: &Path, out: Option<&Path>) -> Result<PathBuf> {
    match out {
        Some(path) => Ok(path.to_path_buf()),
        None if config.output.overwrite_input => Ok(input.to_path_buf()),
        None => anyhow::bail!(
            "no --out given and output.overwrite_input is disabled in the config"
        ),
    }
}

fn read_kek(path: &Path) -> Result<Kek> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading KEK file: {}", path.display()))?;
    if bytes.len() != Aes256GcmCtr::KEY_SIZE {
        anyhow::bail!(
            "KEK file {} holds {} bytes (expected {})",
            path.display(),
            bytes.len(),
            Aes256GcmCtr::KEY_SIZE
        );
    }
    Ok(Kek::from_slice(&bytes))
}

/// Write via a sibling temp file and rename, so a failed write never
/// truncates an existing file.
fn write_file(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    StagedFile::write(path, data, mode)?.commit()
}

/// A fully written and synced temp file beside its target. Removed on drop
/// unless committed.
struct StagedFile {
    file: tempfile::NamedTempFile,
    path: PathBuf,
}

impl StagedFile {
    fn write(path: &Path, data: &[u8], mode: u32) -> Result<Self> {
        use std::io::Write;

        let file_name = path
            .file_name()
            .with_context(|| format!("not a file path: {}", path.display()))?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut prefix = std::ffi::OsString::from(".");
        prefix.push(file_name);
        prefix.push(".");

        // Exclusive create under a random name: never reuses or follows an
        // existing path. Starts out as 0600.
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".partial")
            .tempfile_in(dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(mode))
                .with_context(|| format!("setting mode {mode:#o} on {}", file.path().display()))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        file.write_all(data)?;
        file.as_file().sync_all()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    fn commit(self) -> Result<()> {
        let Self { file, path } = self;
        file.persist(&path)
            .map(drop)
            .with_context(|| format!("renaming into {}", path.display()))
    }
}

/// Publish a blob together with the KEK that opens it.
///
/// The KEK lands first. A key it replaces is parked at `<kek>.prev` and put
/// back if the blob rename fails, so whatever blob is on disk has its KEK on
/// disk too.
fn publish_with_kek(blob: StagedFile, kek: StagedFile) -> Result<()> {
    let kek_path = kek.path.clone();
    let prev = if kek_path.exists() {
        let prev = with_suffix(&kek_path, ".prev")?;
        std::fs::rename(&kek_path, &prev)
            .with_context(|| format!("moving old KEK aside: {}", prev.display()))?;
        Some(prev)
    } else {
        None
    };

    if let Err(err) = kek.commit().and_then(|()| blob.commit()) {
        match &prev {
            Some(prev) => {
                if let Err(e) = std::fs::rename(prev, &kek_path) {
                    warn!(
                        error = %e,
                        kek = %prev.display(),
                        "could not restore previous KEK; it remains at this path"
                    );
                }
            }
            None if kek_path.exists() => {
                if let Err(e) = std::fs::remove_file(&kek_path) {
                    warn!(error = %e, kek = %kek_path.display(), "could not remove unused KEK");
                }
            }
            None => {}
        }
        return Err(err);
    }

    if let Some(prev) = prev {
        if let Err(e) = std::fs::remove_file(&prev) {
            warn!(error = %e, kek = %prev.display(), "could not remove previous KEK");
        }
    }
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> Result<PathBuf> {
    let mut name = path
        .file_name()
        .with_context(|| format!("not a file path: {}", path.display()))?
        .to_os_string();
    name.push(suffix);
    Ok(path.with_file_name(name))
}
