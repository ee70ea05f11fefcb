use std::path::PathBuf;

use anyhow::*;
use camino::Utf8PathBuf;
use log::*;
use structopt::*;

use zedit::*;

#[derive(Debug, StructOpt)]
#[structopt(name = "zalign", about = "Aligns the stored entries of a .zip or .apk in place")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Change to the given directory before perfoming any operations.
    #[structopt(short = "C", long)]
    directory: Option<PathBuf>,

    /// Alignment for stored entries
    #[structopt(short, long, default_value = "4")]
    alignment: u16,

    /// Alignment for native libraries (*.so)
    #[structopt(long, default_value = "4096")]
    so_alignment: u16,

    /// Also sort entries by name
    #[structopt(short, long)]
    sort: bool,

    /// Prints each entry's offsets instead of changing anything.
    #[structopt(short = "n", long)]
    dry_run: bool,

    #[structopt(name("ZIP file"))]
    zip_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    if let Some(chto) = args.directory {
        std::env::set_current_dir(&chto)
            .with_context(|| format!("Couldn't set working directory to {}", chto.display()))?;
    }

    let zip_path = Utf8PathBuf::from_path_buf(args.zip_path)
        .map_err(|p| anyhow!("{} isn't a UTF-8 path", p.display()))?;
    let options = ArchiveOptions::default()
        .alignment_rule(AlignmentRule::compose([
            AlignmentRule::for_suffix(".so", args.so_alignment),
            AlignmentRule::constant(args.alignment),
        ]))
        .auto_sort(args.sort);

    if args.dry_run {
        let archive = ZipArchive::open_read_only(&zip_path, options)
            .with_context(|| format!("Couldn't open {}", zip_path))?;
        return print_offsets(&archive);
    }

    let mut archive =
        ZipArchive::open(&zip_path, options).with_context(|| format!("Couldn't open {}", zip_path))?;
    if archive.realign()? {
        info!("Realigned {}", zip_path);
    } else if args.sort {
        archive.sort_contents()?;
    } else {
        info!("{} was already aligned", zip_path);
    }
    archive.close().context("Couldn't write archive")?;
    Ok(())
}

fn print_offsets(archive: &ZipArchive) -> Result<()> {
    let mut entries = archive.entries();
    entries.sort_by_key(|e| e.header().offset());
    for entry in entries {
        let offset = entry
            .header()
            .offset()
            .ok_or_else(|| anyhow!("{} has no offset", entry.name()))?;
        let data = offset + entry.local_header_size() as u64;
        let method = entry.header().compress_info()?.method;
        println!(
            "{:>10} {:>10} {:?} {}{}",
            offset,
            data,
            method,
            entry.name(),
            if entry.is_linking() { " (link)" } else { "" }
        );
    }
    Ok(())
}
