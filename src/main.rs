//! pagestore - inspect and exercise page files

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use pagestore::storage::{
    BufferPool, BufferPoolConfig, DiskConfig, Page, PageId, PageManager, PageType,
    PersistenceBackend, StorageError, PAGE_SIZE,
};
use std::path::{Path, PathBuf};

/// pagestore - slotted page files behind a clock buffer pool
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header and checksum status of every page in a file
    Inspect {
        /// Page file to read
        path: PathBuf,

        /// Also print the live records of each page
        #[arg(short, long)]
        records: bool,
    },
    /// Create a page file and fill it with records through a buffer pool
    Demo {
        /// Page file to create (truncated if it exists)
        path: PathBuf,

        /// Buffer pool frames
        #[arg(short, long, default_value = "8")]
        frames: usize,

        /// Number of records to insert
        #[arg(short = 'n', long, default_value = "1000")]
        records: usize,

        /// Size of each record in bytes
        #[arg(short = 's', long, default_value = "100")]
        record_size: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match args.command {
        Command::Inspect { path, records } => inspect(&path, records),
        Command::Demo {
            path,
            frames,
            records,
            record_size,
        } => demo(&path, frames, records, record_size),
    }
}

fn inspect(path: &Path, show_records: bool) -> Result<()> {
    let mut pages = PageManager::open(path)
        .with_context(|| format!("Failed to open page file: {}", path.display()))?;
    let num_pages = pages.num_pages()?;
    println!("{}: {} pages", path.display(), num_pages);

    let mut corrupt = 0;
    let mut buf = [0u8; PAGE_SIZE];
    for id in 1..=num_pages {
        let page_id = PageId(id);
        pages.read_page(page_id, &mut buf)?;
        if buf.iter().all(|&b| b == 0) {
            println!("page {:>6}  (unused)", id);
            continue;
        }

        match Page::from_bytes(&buf) {
            Ok(page) => {
                println!(
                    "page {:>6}  type={:<12} records={:<4} free={:<4} lsn={} checksum={:#010x} ok",
                    page.page_id(),
                    page.page_type()?.to_string(),
                    page.record_count(),
                    page.free_space(),
                    page.lsn(),
                    page.checksum()
                );
                if show_records {
                    for (slot, record) in page.live_records() {
                        println!("    slot {:>4}  {} bytes  {}", slot, record.len(), preview(record));
                    }
                }
            }
            Err(StorageError::CorruptPage { reason, .. }) => {
                corrupt += 1;
                println!("page {:>6}  CORRUPT: {}", id, reason);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if corrupt > 0 {
        anyhow::bail!("{} corrupt pages in {}", corrupt, path.display());
    }
    Ok(())
}

fn demo(path: &Path, frames: usize, records: usize, record_size: usize) -> Result<()> {
    let disk = PageManager::create_with_config(path, DiskConfig::default().sync_on_write(false))
        .with_context(|| format!("Failed to create page file: {}", path.display()))?;
    let pool = BufferPool::new(BufferPoolConfig::with_capacity(frames), disk)?;

    let record = vec![0xA5u8; record_size];
    let (mut page_id, mut handle) = pool.new_page(PageType::Data)?;
    let mut pages_used = 1;
    for _ in 0..records {
        let inserted = handle.write().insert_record(&record);
        match inserted {
            Ok(_) => {}
            Err(StorageError::PageFull { .. }) => {
                pool.unpin_page(page_id, true)?;
                (page_id, handle) = pool.new_page(PageType::Data)?;
                pages_used += 1;
                handle
                    .write()
                    .insert_record(&record)
                    .context("Record does not fit in an empty page")?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    pool.unpin_page(page_id, true)?;

    let stats = pool.stats();
    pool.shutdown()?;

    println!(
        "Inserted {} records of {} bytes into {} pages",
        records, record_size, pages_used
    );
    println!(
        "Buffer pool: {} frames, {} hits, {} misses, {} evictions, {} write-backs",
        frames, stats.hits, stats.misses, stats.evictions, stats.write_backs
    );
    Ok(())
}

fn preview(record: &[u8]) -> String {
    record
        .iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
