/*!
tagpersist CLI - Command-line interface for the tagpersist engine.

Persists a sample article entity through the gateway and lists `.bin` files
in a directory.
*/

mod entity;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tabled::{Table, Tabled};
use tagpersist_core::{
    Destination, PersistConfig, PersistenceGateway, WriteMode, REQUIRED_SUFFIX,
};
use tracing::{debug, info};

use crate::entity::ArticleText;

#[derive(Parser)]
#[command(name = "tagpersist")]
#[command(about = "CLI for the tagpersist object persistence engine")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file (TAGPERSIST_* variables override it)
    #[arg(short, long, global = true, env = "TAGPERSIST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode an article text entity and write it to a .bin file
    Save {
        /// Destination file; must end with .bin
        #[arg(short, long)]
        out: PathBuf,

        /// Gzip-compress the encoded entity
        #[arg(long)]
        gzip: bool,

        /// How to open the destination file
        #[arg(long, default_value = "create")]
        mode: WriteMode,

        /// Write with async file I/O instead of blocking I/O
        #[arg(long = "async")]
        suspend: bool,

        #[arg(long)]
        article_text_id: i64,

        #[arg(long)]
        article_id: String,

        /// Article body, may contain HTML
        #[arg(long)]
        text: String,

        /// Plain-text body; derived from --text when omitted
        #[arg(long)]
        no_html: Option<String>,
    },
    /// List .bin files in a directory
    List {
        /// Directory to scan
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

#[derive(Tabled)]
struct BinFileInfo {
    #[tabled(rename = "File")]
    name: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Modified")]
    modified: String,
    #[tabled(rename = "Gzip magic")]
    gzip_magic: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Save {
            out,
            gzip,
            mode,
            suspend,
            article_text_id,
            article_id,
            text,
            no_html,
        } => {
            let article = entity::build_article(article_text_id, article_id, text, no_html);
            let destination = Destination::new(out).with_mode(mode).compressed(gzip);
            save_article(&config, &article, &destination, suspend).await?
        }
        Commands::List { dir } => list_bin_files(&dir)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PersistConfig, anyhow::Error> {
    let mut config = match path {
        Some(path) => {
            debug!("Loading configuration from {}", path.display());
            PersistConfig::from_json_file(path)?
        }
        None => PersistConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}

async fn save_article(
    config: &PersistConfig,
    article: &ArticleText,
    destination: &Destination,
    suspend: bool,
) -> Result<(), anyhow::Error> {
    let gateway = PersistenceGateway::from_config(config)?;

    let saved = if suspend {
        gateway.save_suspending(Some(article), destination).await?
    } else {
        gateway.save_blocking(Some(article), destination)?
    };

    let size = fs::metadata(&saved)?.len();
    info!(
        "Saved article text {} ({} mode{})",
        article.article_text_id,
        destination.mode(),
        if destination.is_compressed() { ", gzip" } else { "" }
    );
    println!("{} ({})", saved.display(), format_size(size));
    Ok(())
}

fn list_bin_files(dir: &Path) -> Result<(), anyhow::Error> {
    if !dir.exists() {
        println!("No directory found at: {}", dir.display());
        return Ok(());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        if !path.is_file() || !name.ends_with(REQUIRED_SUFFIX) {
            continue;
        }

        let meta = entry.metadata()?;
        let modified = meta
            .modified()
            .map(format_modified)
            .unwrap_or_else(|_| "Unknown".to_string());
        let gzip_magic = match has_gzip_magic(&path) {
            Ok(true) => "yes",
            Ok(false) => "no",
            Err(_) => "unreadable",
        };

        files.push(BinFileInfo {
            name,
            size: format_size(meta.len()),
            modified,
            gzip_magic: gzip_magic.to_string(),
        });
    }

    if files.is_empty() {
        println!("No {REQUIRED_SUFFIX} files found");
    } else {
        files.sort_by(|a, b| a.name.cmp(&b.name));
        println!("{}", Table::new(files));
        println!("Gzip magic is a hint only: the compression flag is not stored in the file.");
    }

    Ok(())
}

/// Whether the file starts with the two gzip magic bytes
fn has_gzip_magic(path: &Path) -> std::io::Result<bool> {
    let mut head = [0u8; 2];
    let mut file = fs::File::open(path)?;
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..])? {
            0 => return Ok(false),
            n => filled += n,
        }
    }
    Ok(head == [0x1f, 0x8b])
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_modified(time: std::time::SystemTime) -> String {
    let local: chrono::DateTime<chrono::Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}
