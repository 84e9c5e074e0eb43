//! tar-upload - upload the files of a tar archive to a hierarchical store
//!
//! ```text
//! tar-upload -f backup.tar -d /data/restore -e http://namenode:9870 -p 8
//! ```
//!
//! Every uploaded remote path is printed to stdout as it completes. Logs go
//! to stderr. Exit code 0 when every entry was uploaded, 1 on the first
//! fatal error.

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tar_upload::observability::{self, LogConfig};
use tar_upload::store::{Endpoint, InMemoryUploadClient, LocalFsUploadClient, UploadClient};
use tar_upload::upload::{ArchiveEntryStream, ConfigError, PassOrchestrator, UploadConfig};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::info;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(
    name = "tar-upload",
    version,
    about = "Upload the files of a tar archive to a hierarchical store",
    long_about = "Upload every non-empty file of a tar archive under a destination \
                  directory. Several workers scan the archive concurrently, missing \
                  parent directories are created on demand and transient failures \
                  are retried in later sweeps."
)]
struct CliArgs {
    /// Local tar archive (re-read from the start on every sweep)
    #[arg(short = 'f', long = "file", value_name = "ARCHIVE")]
    file: PathBuf,

    /// Destination directory in the store
    #[arg(short = 'd', long, value_name = "PATH")]
    dest: String,

    /// Store endpoint: http(s)://namenode:port, file:///dir, a local path, or memory:
    #[arg(
        short = 'e',
        long,
        env = "TAR_UPLOAD_ENDPOINT",
        default_value = "http://localhost:9870",
        value_name = "URL"
    )]
    endpoint: String,

    /// Replica count for each uploaded file
    #[arg(short = 'r', long, value_name = "NUM")]
    replication: Option<u16>,

    /// Extra request header, repeatable
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE", action = ArgAction::Append)]
    headers: Vec<String>,

    /// Concurrent scans in the initial pass
    #[arg(short = 'p', long, env = "TAR_UPLOAD_PARALLEL", value_name = "NUM")]
    parallel: Option<usize>,

    /// Retryable failures tolerated per entry
    #[arg(long, env = "TAR_UPLOAD_RETRIES", value_name = "NUM")]
    retries: Option<u32>,

    /// WebHDFS user name
    #[arg(short = 'u', long, env = "HADOOP_USER_NAME", value_name = "USER")]
    user: Option<String>,

    /// Fail instead of replacing files that already exist
    #[arg(long)]
    no_overwrite: bool,

    /// TOML configuration file; flags override its values
    #[arg(short = 'c', long, env = "TAR_UPLOAD_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging for this tool
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl CliArgs {
    /// Config file values, overridden by flags
    fn upload_config(&self) -> Result<UploadConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => UploadConfig::from_toml_file(path)?,
            None => UploadConfig::default(),
        };

        if let Some(parallel) = self.parallel {
            config.parallel = parallel;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if self.replication.is_some() {
            config.replication = self.replication;
        }
        if self.user.is_some() {
            config.user = self.user.clone();
        }
        if self.no_overwrite {
            config.overwrite = false;
        }
        for header in &self.headers {
            config.add_header(header)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn build_client(endpoint: &str, config: &UploadConfig) -> Result<Arc<dyn UploadClient>, String> {
    match Endpoint::parse(endpoint) {
        Endpoint::Memory => Ok(Arc::new(InMemoryUploadClient::new())),
        Endpoint::LocalFs(base) => Ok(Arc::new(LocalFsUploadClient::new(base))),
        #[cfg(feature = "webhdfs")]
        Endpoint::WebHdfs(url) => {
            let client = tar_upload::store::WebHdfsClient::new(tar_upload::store::WebHdfsConfig {
                endpoint: url,
                user: config.user.clone(),
                pool_size: config.parallel,
                request_timeout: config.request_timeout,
            })
            .map_err(|e| e.to_string())?;
            Ok(Arc::new(client))
        }
        #[cfg(not(feature = "webhdfs"))]
        Endpoint::WebHdfs(url) => {
            let _ = config;
            Err(ConfigError::Endpoint(format!("{} (built without webhdfs)", url)).to_string())
        }
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let mut log_config = LogConfig::from_env();
    if args.verbose {
        log_config = log_config.verbose();
    }
    if let Err(e) = observability::init_tracing(&log_config) {
        eprintln!("{}", failure_line(&e));
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", failure_line(&format!("starting runtime: {}", e)));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", failure_line(&e));
            ExitCode::FAILURE
        }
    }
}

fn failure_line(message: &str) -> String {
    format!("error: {}", message)
}

async fn run(args: CliArgs) -> Result<(), String> {
    let config = args.upload_config().map_err(|e| e.to_string())?;
    let client = build_client(&args.endpoint, &config)?;
    let stream = ArchiveEntryStream::open(
        &args.file,
        args.dest.clone(),
        config.chunk_size,
        config.chunk_queue_depth,
    )
    .map_err(|e| e.to_string())?;

    info!(
        archive = %args.file.display(),
        dest = %args.dest,
        endpoint = %args.endpoint,
        parallel = config.parallel,
        retries = config.retries,
        "starting upload"
    );

    // Completed paths go to stdout in completion order
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(path) = rx.recv().await {
            let line = format!("{}\n", path);
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
        let _ = stdout.flush().await;
    });

    let mut orchestrator = PassOrchestrator::new(client, stream, config).with_completion_sink(tx);
    let result = orchestrator.run().await;
    // Dropping the orchestrator closes the sink so the printer can finish
    drop(orchestrator);
    let _ = printer.await;

    result.map(|_| ()).map_err(|e| e.to_string())
}
