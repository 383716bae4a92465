use loglens::cli::{Cli, Commands, ConfigAction};
use loglens::clustering::{Channel, ChannelTrees};
use loglens::config::{expand_path, Config};
use loglens::error::{LoglensError, Result};
use loglens::parsing::RawLine;
use loglens::pipeline::{OutputRow, Pipeline, PipelineStats, ProcessedRecord};
use loglens::redaction::RedactionMode;
use loglens::storage::StateStore;
use flate2::read::MultiGzDecoder;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Process {
            files,
            output,
            state,
            save_state,
            mode,
            parallel,
            profile,
        } => {
            let options = ProcessOptions {
                output,
                state,
                save_state,
                mode,
                parallel,
            };
            cmd_process(cli.config, profile, &files, options)?;
        }
        Commands::Templates { state, channel } => {
            cmd_templates(cli.config, state, channel)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "loglens=debug" } else { "loglens=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

struct ProcessOptions {
    output: Option<PathBuf>,
    state: Option<PathBuf>,
    save_state: bool,
    mode: Option<String>,
    parallel: bool,
}

fn cmd_process(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    files: &[PathBuf],
    options: ProcessOptions,
) -> Result<()> {
    let mut config = load_config(config_path, profile)?;

    if let Some(mode) = options.mode {
        RedactionMode::parse_mode(&mode)?;
        config.redaction.mode = mode;
    }
    let parallel = options.parallel || config.pipeline.parallel;

    let mut pipeline = Pipeline::from_config(&config)?;

    // State is only touched when asked for
    let store = if options.state.is_some() || options.save_state {
        let path = match options.state {
            Some(path) => path,
            None => expand_path(&config.storage.state_file)?,
        };
        Some(StateStore::new(path))
    } else {
        None
    };
    if let Some(store) = &store {
        let trees = store.load_or_new(&config.clustering)?;
        pipeline = pipeline.with_trees(trees);
    }

    let mut writer = open_output(options.output.as_deref())?;

    for file in files {
        tracing::info!("Processing {}", file.display());
        let mut lines = NumberedLines::new(file.display().to_string(), open_input(file)?);

        if parallel {
            let chunk_size = config.pipeline.chunk_size;
            for record in pipeline.process_batch_parallel(lines.by_ref(), chunk_size) {
                write_record(&mut writer, &record)?;
            }
        } else {
            for record in pipeline.process_batch(lines.by_ref()) {
                write_record(&mut writer, &record)?;
            }
        }

        if let Some(e) = lines.error.take() {
            return Err(LoglensError::Io {
                source: e,
                context: format!("Failed to read log file: {:?}", file),
            });
        }
    }

    writer.flush().map_err(|e| LoglensError::Io {
        source: e,
        context: "Failed to flush output".to_string(),
    })?;

    print_statistics(&pipeline.statistics());

    if options.save_state {
        if let Some(store) = &store {
            pipeline.save_state(store)?;
            eprintln!("✓ State saved to {}", store.path().display());
        }
    }

    Ok(())
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = std::fs::File::create(path).map_err(|e| LoglensError::Io {
                source: e,
                context: format!("Failed to create output file: {:?}", path),
            })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(std::io::stdout().lock()))),
    }
}

/// Open a log file, decompressing `.gz` files on the fly
fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = std::fs::File::open(path).map_err(|e| LoglensError::Io {
        source: e,
        context: format!("Failed to open log file: {:?}", path),
    })?;

    let gzipped = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    if gzipped {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Numbered lines read on demand; invalid UTF-8 is replaced, not rejected.
/// A read error ends the stream and is kept in `error`.
struct NumberedLines<R> {
    source: String,
    reader: R,
    next_number: u64,
    buf: Vec<u8>,
    error: Option<std::io::Error>,
}

impl<R: BufRead> NumberedLines<R> {
    fn new(source: String, reader: R) -> Self {
        Self {
            source,
            reader,
            next_number: 1,
            buf: Vec::new(),
            error: None,
        }
    }
}

impl<R: BufRead> Iterator for NumberedLines<R> {
    type Item = RawLine;

    fn next(&mut self) -> Option<RawLine> {
        if self.error.is_some() {
            return None;
        }

        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => return None,
            Ok(_) => {}
            Err(e) => {
                self.error = Some(e);
                return None;
            }
        }
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }

        let text = String::from_utf8_lossy(&self.buf).into_owned();
        let line = RawLine::new(self.source.clone(), self.next_number, text);
        self.next_number += 1;
        Some(line)
    }
}

fn write_record(writer: &mut dyn Write, record: &ProcessedRecord) -> Result<()> {
    let row = OutputRow::from(record);
    serde_json::to_writer(&mut *writer, &row).map_err(|e| LoglensError::Json {
        source: e,
        context: format!("Failed to serialize record {}", row.line_id),
    })?;
    writer.write_all(b"\n").map_err(|e| LoglensError::Io {
        source: e,
        context: "Failed to write output".to_string(),
    })
}

fn print_statistics(stats: &PipelineStats) {
    eprintln!("Records:   {}", stats.total_records);
    eprintln!("Degraded:  {}", stats.degraded_records);
    eprintln!("Truncated: {}", stats.truncated_lines);
    for (strategy, count) in &stats.strategy_counts {
        eprintln!("  {:<10} {}", strategy, count);
    }
    for (name, channel) in [("original", &stats.original), ("anonymized", &stats.anonymized)] {
        eprintln!(
            "Channel {}: {} clusters, {} clustered, {} unclustered, {} load-shed, {} leaf overflows",
            name,
            channel.clusters,
            channel.clustered,
            channel.unclustered,
            channel.load_shed,
            channel.leaf_overflows
        );
    }
}

fn cmd_templates(
    config_path: Option<PathBuf>,
    state: Option<PathBuf>,
    channel: Option<String>,
) -> Result<()> {
    let path = match state {
        Some(path) => path,
        None => {
            let config = load_config(config_path, None)?;
            expand_path(&config.storage.state_file)?
        }
    };

    let store = StateStore::new(path);
    if !store.exists() {
        return Err(LoglensError::StateNotFound {
            path: store.path().to_path_buf(),
        });
    }
    let trees = store.inspect()?;

    let channels = match channel {
        Some(name) => vec![Channel::parse_channel(&name)?],
        None => vec![Channel::Original, Channel::Anonymized],
    };
    for channel in channels {
        print_templates(&trees, channel);
    }

    Ok(())
}

fn print_templates(trees: &ChannelTrees, channel: Channel) {
    let tree = trees.get(channel);
    println!("Channel: {} ({} clusters)", channel, tree.len());
    for cluster in tree.clusters() {
        println!(
            "  {:>6}  {:>8}  {}",
            cluster.id,
            cluster.size,
            cluster.template_string()
        );
    }
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, None)?;
            let content = toml::to_string_pretty(&config)?;
            println!("{}", content);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| LoglensError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
        ConfigAction::Path => {
            println!("{}", Config::default_path()?.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'loglens config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        loglens::config::ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}
