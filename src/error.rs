use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MeshError {
    #[error("download did not complete for {file} after {attempts} polls")]
    DownloadTimeout { file: String, attempts: u32 },

    #[error("downloaded archive is not a readable zip: {0}")]
    InvalidArchive(String),

    #[error("destination already occupied by a different file: {0}")]
    #[diagnostic(help("the source archive was left in place; move or remove the existing file"))]
    DestinationCollision(Utf8PathBuf),

    #[error("page driver failed: {0}")]
    PageDriver(String),

    #[error("WebDriver request failed: {0}")]
    WebDriverHttp(String),

    #[error("WebDriver returned status {status}: {message}")]
    WebDriverStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
