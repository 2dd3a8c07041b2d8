use clap::Parser;
use mongo_copy::{Connection, CopierConfig, MongoCopier, SyncError};
use std::path::Path;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[clap(version = env!("CARGO_PKG_VERSION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    /// copy configuration file path.
    #[clap(short, long, default_value = "config.toml")]
    conf: String,
    /// log file path, if not specified, all log information will be output to stdout.
    #[clap(long)]
    log_path: Option<String>,
    /// number of collections copied at the same time, overrides configuration file.
    #[clap(short, long)]
    threads: Option<usize>,
    /// output debug logs, including copy progress.
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts: Opts = Opts::parse();
    let level = if opts.verbose { Level::DEBUG } else { Level::INFO };
    let collector = tracing_subscriber::fmt().with_max_level(level);
    let (non_blocking, _guard) = match &opts.log_path {
        Some(path) => {
            let path = Path::new(path);
            let dir_name = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| SyncError::Config(format!("invalid log path {:?}", path)))?;
            let file_appender = tracing_appender::rolling::daily(dir_name, file_name);
            tracing_appender::non_blocking(file_appender)
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };
    collector.with_writer(non_blocking).init();

    let mut conf = CopierConfig::from_file(&opts.conf)?;
    if let Some(threads) = opts.threads {
        conf.set_threads(threads);
    }
    let job = conf.to_job()?;

    let source = Connection::new(conf.get_src_url())?;
    let target = Connection::new(conf.get_dst_url())?;
    source.check_permissions()?;
    target.check_permissions()?;
    info!(source = %source.get_url(), target = %target.get_url(), "Connected");

    match MongoCopier::new(source, target, job).run() {
        Ok(summary) => {
            info!(
                scheduled = summary.scheduled,
                completed = summary.completed,
                skipped = summary.skipped,
                failed = summary.failed,
                documents = summary.documents,
                started = %summary.started,
                finished = %summary.finished,
                "Copy done"
            );
            Ok(())
        }
        Err(e) => {
            error!(?e, "Copy job aborted");
            Err(e.into())
        }
    }
}
