use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use log::{debug, warn};

/// A decoded routing-table snapshot on disk, tagged with the collector it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpSource {
    pub path: PathBuf,
    pub collector: String,
}

impl DumpSource {
    pub fn new(path: &Path) -> Self {
        DumpSource {
            path: path.to_path_buf(),
            collector: collector_name(path),
        }
    }

    pub fn with_collector(mut self, collector: impl Into<String>) -> Self {
        self.collector = collector.into();
        self
    }

    /// Opens the snapshot for line reading, decompressing `.bz2` files on the fly.
    pub fn open(&self) -> io::Result<Box<dyn BufRead + Send>> {
        let file = File::open(&self.path)?;
        let reader: Box<dyn Read + Send> = if self.is_bz2() {
            Box::new(BzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Box::new(BufReader::new(reader)))
    }

    fn is_bz2(&self) -> bool {
        self.path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("bz2"))
            .unwrap_or(false)
    }
}

/// Collector names come from the file layout (`route-views.sg/rib.20250101.0000.txt`),
/// falling back to the file stem when there is no meaningful parent directory.
pub fn collector_name(path: &Path) -> String {
    let parent = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty() && name != "." && name != "..");

    match parent {
        Some(name) => name,
        None => {
            let stem = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            stem.trim_end_matches(".bz2")
                .trim_end_matches(".txt")
                .to_string()
        }
    }
}

/// Expands the given inputs into dump sources.
///
/// Files are taken as-is. A directory is treated as a root of collector
/// directories; files lying directly in it are used too. With `latest_only`
/// only the lexicographically last file of each collector is kept, which for
/// RouteViews-style names (`rib.YYYYMMDD.HHMM`) is the newest snapshot.
pub fn discover_sources(inputs: &[PathBuf], latest_only: bool) -> io::Result<Vec<DumpSource>> {
    let mut sources = Vec::new();

    for input in inputs {
        if input.is_file() {
            sources.push(DumpSource::new(input));
            continue;
        }
        if !input.is_dir() {
            warn!("Input {:?} does not exist, skipping", input);
            continue;
        }

        let mut by_collector: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for entry in fs::read_dir(input)? {
            let path = entry?.path();
            if is_hidden(&path) {
                continue;
            }
            if path.is_dir() {
                let collector = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                for file in fs::read_dir(&path)? {
                    let file = file?.path();
                    if file.is_file() && !is_hidden(&file) {
                        by_collector.entry(collector.clone()).or_default().push(file);
                    }
                }
            } else if path.is_file() {
                sources.push(DumpSource::new(&path));
            }
        }

        for (collector, mut files) in by_collector {
            files.sort();
            if latest_only {
                if let Some(latest) = files.pop() {
                    debug!("Using {:?} for collector {}", latest, collector);
                    sources.push(DumpSource::new(&latest).with_collector(collector));
                }
            } else {
                for file in files {
                    sources.push(DumpSource::new(&file).with_collector(collector.clone()));
                }
            }
        }
    }

    Ok(sources)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}
