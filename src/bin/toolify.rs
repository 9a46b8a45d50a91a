//! CLI binary for the toolify server.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `ServerConfig` and runs the server.

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use toolify::{serve, Environment, ServerConfig};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"OPTIONAL ENGINES:
  Document conversion degrades gracefully when engines are missing:
    Word/Excel -> PDF   native reader, then LibreOffice (soffice), then a placeholder PDF
    PDF -> Image        pdfium, then Ghostscript (gs), then a placeholder PDF
  OCR requires tesseract and its language data; without it /api/convert/ocr returns 500.
  GET /api/health reports which engines were found at startup.

EXAMPLES:
  toolify --port 8080 --upload-dir /var/tmp/toolify
  TOOLIFY_ENV=production toolify --static-dir ./client/build
"#;

/// Document-processing web service for PDFs, images and office files.
#[derive(Parser, Debug)]
#[command(
    name = "toolify",
    version,
    about = "Document-processing web service for PDFs, images and office files",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Interface to bind.
    #[arg(long, env = "TOOLIFY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// TCP port.
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    port: u16,

    /// Root directory for per-request working directories.
    #[arg(long, env = "TOOLIFY_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Deployment environment; production hides error details.
    #[arg(long, env = "TOOLIFY_ENV", value_enum, default_value = "development")]
    env: EnvArg,

    /// Per-file upload limit in MiB.
    #[arg(long, env = "TOOLIFY_MAX_FILE_MB", default_value_t = 20,
          value_parser = clap::value_parser!(u64).range(1..=1024))]
    max_file_mb: u64,

    /// Maximum files on multi-file endpoints.
    #[arg(long, env = "TOOLIFY_MAX_FILES", default_value_t = 20)]
    max_files: usize,

    /// Requests per client IP per window on /api (0 disables limiting).
    #[arg(long, env = "TOOLIFY_RATE_LIMIT", default_value_t = 100)]
    rate_limit: u32,

    /// Rate-limit window in seconds.
    #[arg(long, env = "TOOLIFY_RATE_WINDOW", default_value_t = 900)]
    rate_window: u64,

    /// Allowed CORS origin; repeat or comma-separate for several.
    #[arg(long = "cors-origin", env = "TOOLIFY_CORS_ORIGINS", value_delimiter = ',')]
    cors_origins: Vec<String>,

    /// Serve a built browser client from this directory.
    #[arg(long, env = "TOOLIFY_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// LibreOffice executable.
    #[arg(long, env = "TOOLIFY_SOFFICE", default_value = "soffice")]
    soffice: String,

    /// Ghostscript executable.
    #[arg(long, env = "TOOLIFY_GHOSTSCRIPT", default_value = "gs")]
    ghostscript: String,

    /// Tesseract executable.
    #[arg(long, env = "TOOLIFY_TESSERACT", default_value = "tesseract")]
    tesseract: String,

    /// Longest edge in pixels for PDF pages rendered to images.
    #[arg(long, env = "TOOLIFY_RENDER_MAX_PIXELS", default_value_t = 2000)]
    render_max_pixels: u32,

    /// Timeout for a single external tool run, in seconds.
    #[arg(long, env = "TOOLIFY_TOOL_TIMEOUT", default_value_t = 120)]
    tool_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TOOLIFY_VERBOSE")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, env = "TOOLIFY_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EnvArg {
    Development,
    Production,
}

impl From<EnvArg> for Environment {
    fn from(v: EnvArg) -> Self {
        match v {
            EnvArg::Development => Environment::Development,
            EnvArg::Production => Environment::Production,
        }
    }
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig> {
        let mut builder = ServerConfig::builder()
            .host(self.host)
            .port(self.port)
            .upload_dir(self.upload_dir)
            .environment(self.env.into())
            .max_file_size(self.max_file_mb * 1024 * 1024)
            .max_files(self.max_files)
            .rate_limit(self.rate_limit, self.rate_window)
            .soffice_bin(self.soffice)
            .ghostscript_bin(self.ghostscript)
            .tesseract_bin(self.tesseract)
            .render_max_pixels(self.render_max_pixels)
            .tool_timeout_secs(self.tool_timeout);
        if !self.cors_origins.is_empty() {
            builder = builder.cors_origins(self.cors_origins);
        }
        if let Some(dir) = self.static_dir {
            builder = builder.static_dir(dir);
        }
        if let Some(lib) = self.pdfium_lib {
            builder = builder.pdfium_lib_path(lib);
        }
        builder.build().context("Invalid server configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = cli.into_config()?;
    tracing::info!(
        "Starting toolify {} ({:?})",
        env!("CARGO_PKG_VERSION"),
        config.environment
    );
    serve(config).await.context("Server failed")?;
    Ok(())
}
