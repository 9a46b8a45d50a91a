//! Configuration types for the toolify server.
//!
//! All server behaviour is controlled through [`ServerConfig`], built via its
//! [`ServerConfigBuilder`]. The per-request option types parsed from form
//! fields (target format, OCR language, split mode, JPEG quality) live here
//! too, so every knob a request can turn is defined in one place.

use crate::error::ToolifyError;
use axum::http::HeaderValue;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;

/// Configuration for a toolify server instance.
///
/// Built via [`ServerConfig::builder()`] or using [`ServerConfig::default()`].
///
/// # Example
/// ```rust
/// use toolify::ServerConfig;
///
/// let config = ServerConfig::builder()
///     .port(8080)
///     .upload_dir("/var/tmp/toolify")
///     .max_file_size(10 * 1024 * 1024)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind. Default: `0.0.0.0`.
    pub host: String,

    /// TCP port. Default: 5000.
    pub port: u16,

    /// Root under which every request gets its own working directory.
    /// Created at startup if missing. Default: `uploads`.
    pub upload_dir: PathBuf,

    /// Development exposes error details in responses; production does not.
    pub environment: Environment,

    /// Per-file upload limit in bytes, enforced while streaming. Default: 20 MiB.
    pub max_file_size: u64,

    /// Maximum files on multi-file endpoints (merge, image-to-pdf). Default: 20.
    pub max_files: usize,

    /// Requests allowed per client IP per window on `/api`. 0 disables limiting.
    /// Default: 100.
    pub rate_limit_max: u32,

    /// Rate-limit window length in seconds. Default: 900 (15 minutes).
    pub rate_limit_window_secs: u64,

    /// Origins allowed to make credentialed cross-origin requests.
    pub cors_origins: Vec<String>,

    /// Directory holding the built browser client. When set, non-`/api`
    /// paths are served from it with an `index.html` fallback.
    pub static_dir: Option<PathBuf>,

    /// Explicit pdfium shared library. When unset, the current directory and
    /// then the system library path are tried.
    pub pdfium_lib_path: Option<PathBuf>,

    /// LibreOffice executable (name on PATH or absolute path).
    pub soffice_bin: String,

    /// Ghostscript executable.
    pub ghostscript_bin: String,

    /// Tesseract executable.
    pub tesseract_bin: String,

    /// Longest edge, in pixels, of a PDF page rendered to an image. Default: 2000.
    ///
    /// Caps memory regardless of the page's physical size; an A0 poster would
    /// otherwise rasterise to hundreds of megapixels.
    pub render_max_pixels: u32,

    /// Wall-clock limit for a single external tool run. Default: 120.
    pub tool_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            upload_dir: PathBuf::from("uploads"),
            environment: Environment::default(),
            max_file_size: 20 * 1024 * 1024,
            max_files: 20,
            rate_limit_max: 100,
            rate_limit_window_secs: 15 * 60,
            cors_origins: vec![
                "https://toolifye.online".to_string(),
                "http://localhost:3000".to_string(),
            ],
            static_dir: None,
            pdfium_lib_path: None,
            soffice_bin: "soffice".to_string(),
            ghostscript_bin: "gs".to_string(),
            tesseract_bin: "tesseract".to_string(),
            render_max_pixels: 2000,
            tool_timeout_secs: 120,
        }
    }
}

impl ServerConfig {
    /// Create a new builder for `ServerConfig`.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Largest request body the router accepts: every file at its limit plus
    /// room for multipart framing and text fields.
    pub fn body_limit(&self) -> usize {
        let files = self.max_files as u64 * self.max_file_size;
        usize::try_from(files.saturating_add(1024 * 1024)).unwrap_or(usize::MAX)
    }

    pub fn expose_error_details(&self) -> bool {
        self.environment != Environment::Production
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn environment(mut self, env: Environment) -> Self {
        self.config.environment = env;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes.max(1);
        self
    }

    pub fn max_files(mut self, n: usize) -> Self {
        self.config.max_files = n.clamp(2, 100);
        self
    }

    pub fn rate_limit(mut self, max: u32, window_secs: u64) -> Self {
        self.config.rate_limit_max = max;
        self.config.rate_limit_window_secs = window_secs;
        self
    }

    pub fn cors_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.cors_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.static_dir = Some(dir.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn soffice_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.soffice_bin = bin.into();
        self
    }

    pub fn ghostscript_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.ghostscript_bin = bin.into();
        self
    }

    pub fn tesseract_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.tesseract_bin = bin.into();
        self
    }

    pub fn render_max_pixels(mut self, px: u32) -> Self {
        self.config.render_max_pixels = px.max(100);
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServerConfig, ToolifyError> {
        let c = &self.config;
        if c.upload_dir.as_os_str().is_empty() {
            return Err(ToolifyError::InvalidConfig(
                "upload directory must not be empty".into(),
            ));
        }
        if c.rate_limit_max > 0 && c.rate_limit_window_secs == 0 {
            return Err(ToolifyError::InvalidConfig(
                "rate-limit window must be ≥ 1 second when limiting is enabled".into(),
            ));
        }
        if let Some(bad) = c
            .cors_origins
            .iter()
            .find(|o| HeaderValue::from_str(o).is_err())
        {
            return Err(ToolifyError::InvalidConfig(format!(
                "CORS origin {bad:?} is not a valid header value"
            )));
        }
        for (name, bin) in [
            ("soffice", &c.soffice_bin),
            ("ghostscript", &c.ghostscript_bin),
            ("tesseract", &c.tesseract_bin),
        ] {
            if bin.trim().is_empty() {
                return Err(ToolifyError::InvalidConfig(format!(
                    "{name} executable must not be empty"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Output format for image conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Jpeg,
    #[default]
    Png,
    Webp,
    Gif,
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 4] = [
        TargetFormat::Jpeg,
        TargetFormat::Png,
        TargetFormat::Webp,
        TargetFormat::Gif,
    ];

    /// Form-field spelling, also used as the download file extension.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetFormat::Jpeg => "jpeg",
            TargetFormat::Png => "png",
            TargetFormat::Webp => "webp",
            TargetFormat::Gif => "gif",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            TargetFormat::Jpeg => "image/jpeg",
            TargetFormat::Png => "image/png",
            TargetFormat::Webp => "image/webp",
            TargetFormat::Gif => "image/gif",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            TargetFormat::Jpeg => image::ImageFormat::Jpeg,
            TargetFormat::Png => image::ImageFormat::Png,
            TargetFormat::Webp => image::ImageFormat::WebP,
            TargetFormat::Gif => image::ImageFormat::Gif,
        }
    }
}

impl FromStr for TargetFormat {
    type Err = ToolifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| {
                ToolifyError::invalid_field(
                    "format",
                    "Invalid format. Supported formats: jpeg, png, webp, gif",
                )
            })
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Languages the OCR endpoint accepts, by tesseract code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OcrLanguage {
    #[default]
    English,
    Spanish,
    French,
    German,
    Italian,
    Portuguese,
    Russian,
    ChineseSimplified,
    Japanese,
    Korean,
}

impl OcrLanguage {
    pub const ALL: [OcrLanguage; 10] = [
        OcrLanguage::English,
        OcrLanguage::Spanish,
        OcrLanguage::French,
        OcrLanguage::German,
        OcrLanguage::Italian,
        OcrLanguage::Portuguese,
        OcrLanguage::Russian,
        OcrLanguage::ChineseSimplified,
        OcrLanguage::Japanese,
        OcrLanguage::Korean,
    ];

    /// Tesseract traineddata code.
    pub fn code(&self) -> &'static str {
        match self {
            OcrLanguage::English => "eng",
            OcrLanguage::Spanish => "spa",
            OcrLanguage::French => "fra",
            OcrLanguage::German => "deu",
            OcrLanguage::Italian => "ita",
            OcrLanguage::Portuguese => "por",
            OcrLanguage::Russian => "rus",
            OcrLanguage::ChineseSimplified => "chi_sim",
            OcrLanguage::Japanese => "jpn",
            OcrLanguage::Korean => "kor",
        }
    }
}

impl FromStr for OcrLanguage {
    type Err = ToolifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|l| l.code() == wanted)
            .ok_or_else(|| {
                let codes: Vec<_> = Self::ALL.iter().map(OcrLanguage::code).collect();
                ToolifyError::invalid_field(
                    "language",
                    format!("unsupported language '{wanted}'. Supported: {}", codes.join(", ")),
                )
            })
    }
}

/// JPEG quality for the compress endpoint, 10–100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality(u8);

impl Quality {
    pub const MIN: u8 = 10;
    pub const MAX: u8 = 100;

    pub fn new(q: u8) -> Result<Self, ToolifyError> {
        if (Self::MIN..=Self::MAX).contains(&q) {
            Ok(Self(q))
        } else {
            Err(ToolifyError::invalid_field(
                "quality",
                format!("must be between {} and {}, got {q}", Self::MIN, Self::MAX),
            ))
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

impl FromStr for Quality {
    type Err = ToolifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u32 = s.trim().parse().map_err(|_| {
            ToolifyError::invalid_field("quality", format!("'{s}' is not a whole number"))
        })?;
        u8::try_from(n)
            .map_err(|_| {
                ToolifyError::invalid_field(
                    "quality",
                    format!("must be between {} and {}, got {n}", Self::MIN, Self::MAX),
                )
            })
            .and_then(Self::new)
    }
}

// ── Page ranges ──────────────────────────────────────────────────────────

static RANGE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*(?:-\s*(\d+))?\s*$").expect("valid regex"));

/// One inclusive, 1-indexed page range from a `pageRanges` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    /// Parse a comma-separated list such as `1-3, 5, 7-8`.
    ///
    /// Empty tokens (from doubled or trailing commas) are ignored. A token
    /// that is not `N` or `N-M` fails the whole list. Ranges are not checked
    /// against any page count here; see [`PageRange::is_valid_for`].
    pub fn parse_list(input: &str) -> Result<Vec<PageRange>, ToolifyError> {
        let mut ranges = Vec::new();
        for token in input.split(',') {
            if token.trim().is_empty() {
                continue;
            }
            let malformed = || ToolifyError::MalformedPageRange {
                token: token.trim().to_string(),
            };
            let caps = RANGE_TOKEN.captures(token).ok_or_else(malformed)?;
            // Digits-only captures; parsing fails only on overflow.
            let number = |m: Option<regex::Match<'_>>| {
                m.map(|m| m.as_str().parse::<u32>().map_err(|_| malformed()))
            };
            let start = number(caps.get(1)).ok_or_else(malformed)??;
            let end = number(caps.get(2)).transpose()?.unwrap_or(start);
            ranges.push(PageRange { start, end });
        }
        Ok(ranges)
    }

    /// `1 ≤ start ≤ end ≤ total`.
    pub fn is_valid_for(&self, total: u32) -> bool {
        self.start >= 1 && self.start <= self.end && self.end <= total
    }

    pub fn pages(&self) -> RangeInclusive<u32> {
        self.start..=self.end
    }

    pub fn file_name(&self) -> String {
        format!("pages-{}-{}.pdf", self.start, self.end)
    }
}

/// How a PDF should be split.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplitMode {
    /// One single-page PDF per page (default).
    #[default]
    All,
    /// One PDF per listed range.
    Ranges(Vec<PageRange>),
}

impl SplitMode {
    /// Interpret the `splitType` and `pageRanges` form fields.
    pub fn from_fields(
        split_type: Option<&str>,
        page_ranges: Option<&str>,
    ) -> Result<Self, ToolifyError> {
        match split_type.map(str::trim).filter(|s| !s.is_empty()) {
            None | Some("all") => Ok(SplitMode::All),
            Some("range") => {
                let raw = page_ranges.map(str::trim).unwrap_or_default();
                if raw.is_empty() {
                    return Err(ToolifyError::invalid_field(
                        "pageRanges",
                        "required when splitType is 'range'",
                    ));
                }
                let ranges = PageRange::parse_list(raw)?;
                if ranges.is_empty() {
                    return Err(ToolifyError::invalid_field(
                        "pageRanges",
                        "no page ranges given",
                    ));
                }
                Ok(SplitMode::Ranges(ranges))
            }
            Some(other) => Err(ToolifyError::invalid_field(
                "splitType",
                format!("expected 'all' or 'range', got '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ServerConfig::default();
        assert_eq!(c.port, 5000);
        assert_eq!(c.max_file_size, 20 * 1024 * 1024);
        assert_eq!(c.max_files, 20);
        assert_eq!(c.rate_limit_max, 100);
        assert_eq!(c.rate_limit_window_secs, 900);
        assert!(c.expose_error_details());
    }

    #[test]
    fn builder_clamps_and_validates() {
        let c = ServerConfig::builder()
            .max_files(0)
            .render_max_pixels(1)
            .tool_timeout_secs(0)
            .build()
            .unwrap();
        assert_eq!(c.max_files, 2);
        assert_eq!(c.render_max_pixels, 100);
        assert_eq!(c.tool_timeout_secs, 1);

        let err = ServerConfig::builder().rate_limit(10, 0).build().unwrap_err();
        assert!(err.to_string().contains("window"));

        let err = ServerConfig::builder()
            .cors_origins(["bad\norigin"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("CORS"));
    }

    #[test]
    fn production_hides_details() {
        let c = ServerConfig::builder()
            .environment("production".parse().unwrap())
            .build()
            .unwrap();
        assert!(!c.expose_error_details());
    }

    #[test]
    fn parse_page_ranges() {
        let ranges = PageRange::parse_list("1-2, 4 ,7-9,").unwrap();
        assert_eq!(
            ranges,
            vec![
                PageRange { start: 1, end: 2 },
                PageRange { start: 4, end: 4 },
                PageRange { start: 7, end: 9 },
            ]
        );
        assert!(matches!(
            PageRange::parse_list("1-2,x"),
            Err(ToolifyError::MalformedPageRange { token }) if token == "x"
        ));
        assert!(PageRange::parse_list("1--2").is_err());
    }

    #[test]
    fn range_validity() {
        assert!(PageRange { start: 1, end: 2 }.is_valid_for(4));
        assert!(!PageRange { start: 0, end: 2 }.is_valid_for(4));
        assert!(!PageRange { start: 3, end: 2 }.is_valid_for(4));
        assert!(!PageRange { start: 9, end: 9 }.is_valid_for(4));
        assert_eq!(PageRange { start: 2, end: 3 }.file_name(), "pages-2-3.pdf");
    }

    #[test]
    fn split_mode_from_fields() {
        assert_eq!(SplitMode::from_fields(None, None).unwrap(), SplitMode::All);
        assert_eq!(
            SplitMode::from_fields(Some("range"), Some("2")).unwrap(),
            SplitMode::Ranges(vec![PageRange { start: 2, end: 2 }])
        );
        assert!(SplitMode::from_fields(Some("range"), Some("  ")).is_err());
        assert!(SplitMode::from_fields(Some("range"), Some(",")).is_err());
        assert!(SplitMode::from_fields(Some("odd"), None).is_err());
    }

    #[test]
    fn quality_bounds() {
        assert_eq!(Quality::default().get(), 80);
        assert_eq!("10".parse::<Quality>().unwrap().get(), 10);
        assert_eq!("100".parse::<Quality>().unwrap().get(), 100);
        assert!("9".parse::<Quality>().is_err());
        assert!("101".parse::<Quality>().is_err());
        assert!("300".parse::<Quality>().is_err());
        assert!("high".parse::<Quality>().is_err());
    }

    #[test]
    fn format_and_language_parsing() {
        assert_eq!("webp".parse::<TargetFormat>().unwrap(), TargetFormat::Webp);
        assert!("bmp".parse::<TargetFormat>().is_err());
        assert_eq!(
            "chi_sim".parse::<OcrLanguage>().unwrap(),
            OcrLanguage::ChineseSimplified
        );
        assert!("klingon".parse::<OcrLanguage>().is_err());
    }
}
