use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_OCR_ENDPOINT: &str = "https://api.ocr.space/parse/image";
pub const DEFAULT_LANGUAGE: &str = "eng+ara";

#[derive(Parser, Debug)]
#[command(name = "ocr-relay-server")]
#[command(about = "Relays uploaded images to the OCR.space API and returns the text")]
#[command(version)]
pub struct Args {
    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// OCR.space API key
    #[arg(long, env = "OCR_SPACE_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// OCR.space parse endpoint
    #[arg(long, env = "OCR_SPACE_ENDPOINT", default_value = DEFAULT_OCR_ENDPOINT)]
    pub ocr_endpoint: String,

    /// Language sent with every request (e.g., "eng", "eng+ara")
    #[arg(long, env = "OCR_LANGUAGE", default_value = DEFAULT_LANGUAGE)]
    pub language: String,

    /// Ask OCR.space for word overlay coordinates
    #[arg(long, env = "OCR_OVERLAY_REQUIRED")]
    pub overlay_required: bool,

    /// Maximum upload size in bytes (default: 10MB)
    #[arg(long, env = "OCR_MAX_FILE_SIZE", default_value = "10485760")]
    pub max_file_size: usize,

    /// Directory for temporary uploads (defaults to the system temp dir)
    #[arg(long, env = "OCR_UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Directory of static frontend assets served at the root path
    #[arg(long, env = "OCR_PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,

    /// Timeout for the OCR.space call; unset waits indefinitely
    #[arg(long, env = "OCR_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub api_key: String,
    pub ocr_endpoint: String,
    pub language: String,
    pub overlay_required: bool,
    pub max_file_size: usize,
    pub upload_dir: PathBuf,
    pub public_dir: PathBuf,
    pub request_timeout: Option<Duration>,
}

impl TryFrom<Args> for Config {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.api_key.trim().is_empty() {
            anyhow::bail!("OCR.space API key is empty (set --api-key or OCR_SPACE_API_KEY)");
        }
        if args.ocr_endpoint.trim().is_empty() {
            anyhow::bail!("OCR endpoint is empty");
        }
        if args.language.trim().is_empty() {
            anyhow::bail!("OCR language is empty");
        }

        Ok(Self {
            host: args.host,
            port: args.port,
            api_key: args.api_key,
            ocr_endpoint: args.ocr_endpoint,
            language: args.language,
            overlay_required: args.overlay_required,
            max_file_size: args.max_file_size,
            upload_dir: args.upload_dir.unwrap_or_else(std::env::temp_dir),
            public_dir: args.public_dir,
            request_timeout: args.request_timeout_secs.map(Duration::from_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["ocr-relay-server"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn defaults_match_ocr_space_form() {
        let config = Config::try_from(parse(&["--api-key", "K123"]).unwrap()).unwrap();
        assert_eq!(config.language, "eng+ara");
        assert!(!config.overlay_required);
        assert_eq!(config.ocr_endpoint, DEFAULT_OCR_ENDPOINT);
        assert_eq!(config.api_key, "K123");
        assert!(config.request_timeout.is_none());
    }

    #[test]
    fn blank_api_key_is_rejected() {
        let args = parse(&["--api-key", "   "]).unwrap();
        let err = Config::try_from(args).unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn timeout_is_optional() {
        let args = parse(&["--api-key", "K123", "--request-timeout-secs", "15"]).unwrap();
        let config = Config::try_from(args).unwrap();
        assert_eq!(config.request_timeout, Some(Duration::from_secs(15)));
    }
}
