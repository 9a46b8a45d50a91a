//! External capabilities: CLI tools and the pdfium shared library.
//!
//! Every optional dependency sits behind [`Capability`]. Availability is
//! probed once when the [`Toolbox`] is built and cached in an atomic, so the
//! hot path never touches `PATH`; [`Capability::refresh`] re-probes on demand,
//! and a tool that turns out to be missing at spawn time marks itself
//! unavailable.

use crate::config::ServerConfig;
use crate::error::AttemptError;
use pdfium_render::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Something the server may or may not have at runtime.
pub trait Capability: Send + Sync {
    /// Stable identifier, also used as the conversion-method name.
    fn name(&self) -> &'static str;

    /// Cached availability.
    fn is_available(&self) -> bool;

    /// Probe again and update the cache.
    fn refresh(&self) -> bool;
}

// ── External CLI tools ──────────────────────────────────────────────────

/// A command-line program invoked per request.
#[derive(Debug)]
pub struct ExternalTool {
    name: &'static str,
    program: String,
    timeout: Duration,
    available: AtomicBool,
}

impl ExternalTool {
    pub fn new(name: &'static str, program: impl Into<String>, timeout: Duration) -> Self {
        let tool = Self {
            name,
            program: program.into(),
            timeout,
            available: AtomicBool::new(false),
        };
        tool.refresh();
        tool
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the tool to completion, killing it if the timeout elapses.
    ///
    /// A non-zero exit status is a [`AttemptError::Failed`] carrying the tail
    /// of stderr. A spawn failure with `NotFound` flips the cached
    /// availability off.
    pub async fn run<I, S>(&self, args: I, cwd: Option<&Path>) -> Result<Output, AttemptError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        debug!(tool = self.name, program = %self.program, "Spawning external tool");
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                warn!(tool = self.name, "Timed out after {}s", self.timeout.as_secs());
                return Err(AttemptError::TimedOut {
                    method: self.name,
                    secs: self.timeout.as_secs(),
                });
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                self.available.store(false, Ordering::Relaxed);
                return Err(AttemptError::Unavailable {
                    method: self.name,
                    reason: format!("'{}' not found", self.program),
                });
            }
            Ok(Err(e)) => return Err(AttemptError::failed(self.name, e)),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(AttemptError::Failed {
                method: self.name,
                detail: format!("{} ({})", output.status, stderr_tail(&output.stderr)),
            });
        }
        Ok(output)
    }
}

impl Capability for ExternalTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn refresh(&self) -> bool {
        let found = locate_program(&self.program);
        match &found {
            Some(path) => debug!(tool = self.name, "Found {}", path.display()),
            None => debug!(tool = self.name, "'{}' not found", self.program),
        }
        let available = found.is_some();
        self.available.store(available, Ordering::Relaxed);
        available
    }
}

/// Resolve a program the way a shell would: explicit paths are checked
/// directly, bare names are searched on `PATH`.
pub fn locate_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let full = dir.join(program);
        if full.is_file() {
            return Some(full);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{program}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return "no stderr output".to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(400);
    chars[start..].iter().collect()
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// The pdfium shared library used to rasterise PDF pages.
///
/// `Pdfium::new` initialises the process-global library state and dropping
/// the instance tears it down, so exactly one instance is created and shared
/// by every render.
pub struct PdfiumLibrary {
    lib_path: Option<PathBuf>,
    instance: OnceLock<Pdfium>,
    init: Mutex<()>,
    available: AtomicBool,
}

impl std::fmt::Debug for PdfiumLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfiumLibrary")
            .field("lib_path", &self.lib_path)
            .field("bound", &self.instance.get().is_some())
            .finish()
    }
}

impl PdfiumLibrary {
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        let lib = Self {
            lib_path,
            instance: OnceLock::new(),
            init: Mutex::new(()),
            available: AtomicBool::new(false),
        };
        lib.refresh();
        lib
    }

    /// The shared instance, bound on first use: the configured path, else
    /// the working directory, else the system library search path.
    pub fn pdfium(&self) -> Result<&Pdfium, String> {
        if let Some(pdfium) = self.instance.get() {
            return Ok(pdfium);
        }
        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pdfium) = self.instance.get() {
            return Ok(pdfium);
        }
        let bindings = match &self.lib_path {
            Some(path) => Pdfium::bind_to_library(path)
                .map_err(|e| format!("failed to load '{}': {e:?}", path.display()))?,
            None => Pdfium::bind_to_library(&Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())
                .map_err(|e| format!("no pdfium library found: {e:?}"))?,
        };
        info!("pdfium bound");
        Ok(self.instance.get_or_init(|| Pdfium::new(bindings)))
    }

    /// Whether an instance has been created.
    pub fn is_bound(&self) -> bool {
        self.instance.get().is_some()
    }
}

impl Capability for PdfiumLibrary {
    fn name(&self) -> &'static str {
        "pdfium"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// A live instance is never rebuilt; only an unbound library is probed.
    fn refresh(&self) -> bool {
        let available = match self.pdfium() {
            Ok(_) => true,
            Err(e) => {
                debug!("pdfium unavailable: {}", e);
                false
            }
        };
        self.available.store(available, Ordering::Relaxed);
        available
    }
}

// ── Toolbox ──────────────────────────────────────────────────────────────

/// Every capability the server knows about, probed once at startup.
#[derive(Debug)]
pub struct Toolbox {
    pub pdfium: PdfiumLibrary,
    pub libreoffice: ExternalTool,
    pub ghostscript: ExternalTool,
    pub tesseract: ExternalTool,
}

/// Availability snapshot reported by the health endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CapabilityReport(pub BTreeMap<&'static str, bool>);

impl Toolbox {
    pub fn from_config(config: &ServerConfig) -> Self {
        let timeout = Duration::from_secs(config.tool_timeout_secs);
        let toolbox = Self {
            pdfium: PdfiumLibrary::new(config.pdfium_lib_path.clone()),
            libreoffice: ExternalTool::new("libreoffice", &config.soffice_bin, timeout),
            ghostscript: ExternalTool::new("ghostscript", &config.ghostscript_bin, timeout),
            tesseract: ExternalTool::new("tesseract", &config.tesseract_bin, timeout),
        };
        for cap in toolbox.capabilities() {
            if cap.is_available() {
                info!("Capability available: {}", cap.name());
            } else {
                warn!("Capability missing: {} (fallbacks will be used)", cap.name());
            }
        }
        toolbox
    }

    pub fn capabilities(&self) -> [&dyn Capability; 4] {
        [
            &self.pdfium,
            &self.libreoffice,
            &self.ghostscript,
            &self.tesseract,
        ]
    }

    pub fn report(&self) -> CapabilityReport {
        CapabilityReport(
            self.capabilities()
                .iter()
                .map(|c| (c.name(), c.is_available()))
                .collect(),
        )
    }

    /// Re-probe every capability.
    pub fn refresh_all(&self) -> CapabilityReport {
        for cap in self.capabilities() {
            cap.refresh();
        }
        self.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_unavailable() {
        let tool = ExternalTool::new("ghostscript", "/nonexistent/gs", Duration::from_secs(1));
        assert!(!tool.is_available());
        assert!(!tool.refresh());
        assert!(locate_program("definitely-not-a-real-program-xyz").is_none());
    }

    #[test]
    fn explicit_path_to_a_file_is_available() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-tool");
        std::fs::write(&fake, b"").unwrap();
        let tool = ExternalTool::new("tesseract", fake.to_string_lossy(), Duration::from_secs(1));
        assert!(tool.is_available());
    }

    #[test]
    fn unbindable_pdfium_is_unavailable() {
        let lib = PdfiumLibrary::new(Some(PathBuf::from("/nonexistent/libpdfium.so")));
        assert!(!lib.is_available());
        assert!(lib.pdfium().is_err());
        assert!(!lib.refresh());
        assert!(!lib.is_bound());
    }

    #[tokio::test]
    async fn running_a_missing_tool_reports_unavailable() {
        let tool = ExternalTool::new("libreoffice", "/nonexistent/soffice", Duration::from_secs(1));
        let err = tool.run(["--version"], None).await.unwrap_err();
        assert!(matches!(err, AttemptError::Unavailable { method: "libreoffice", .. }));
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let long = "x".repeat(1000);
        assert_eq!(stderr_tail(long.as_bytes()).len(), 400);
        assert_eq!(stderr_tail(b"  "), "no stderr output");
    }

    #[test]
    fn report_lists_all_capabilities() {
        let config = ServerConfig::builder()
            .pdfium_lib_path("/nonexistent/libpdfium.so")
            .soffice_bin("/nonexistent/soffice")
            .ghostscript_bin("/nonexistent/gs")
            .tesseract_bin("/nonexistent/tesseract")
            .build()
            .unwrap();
        let report = Toolbox::from_config(&config).report();
        assert_eq!(report.0.len(), 4);
        assert!(report.0.values().all(|v| !v));
    }
}
