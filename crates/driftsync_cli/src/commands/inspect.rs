//! Inspect command implementation.

use driftsync_engine::{LocalDatabase, MetadataStore};
use serde::Serialize;
use std::path::Path;

/// Metadata inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Metadata file path.
    pub path: String,
    /// Number of stored versions, dirty ones included.
    pub stored_versions: usize,
    /// Headers of the local branch in order.
    pub local_branch: Vec<String>,
    /// Headers of superseded versions.
    pub dirty_versions: Vec<String>,
    /// Number of file histories with a live last version.
    pub tracked_files: usize,
    /// History objects already read from the remote.
    pub known_databases: Vec<String>,
    /// Multichunks that may hold content nobody references anymore.
    pub muddy_multichunks: Vec<MuddyEntry>,
    /// Last compaction number seen on the remote.
    pub cleanup_number: u64,
}

/// A muddy multichunk and the version that introduced it.
#[derive(Debug, Serialize)]
pub struct MuddyEntry {
    /// Multichunk id.
    pub id: String,
    /// Header of the losing version.
    pub header: String,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("No metadata found at {:?}", path).into());
    }

    let result = inspect(&LocalDatabase::open(path)?, path)?;

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects the inspection result from an opened store.
pub fn inspect(
    db: &LocalDatabase,
    path: &Path,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    Ok(InspectResult {
        path: path.display().to_string(),
        stored_versions: db.versions().len(),
        local_branch: db.local_branch()?.iter().map(ToString::to_string).collect(),
        dirty_versions: db.dirty_headers()?.iter().map(ToString::to_string).collect(),
        tracked_files: db.last_versions()?.len(),
        known_databases: db.known_databases()?.into_iter().collect(),
        muddy_multichunks: db
            .muddy_multichunks()?
            .into_iter()
            .map(|(id, header)| MuddyEntry {
                id: id.0,
                header: header.to_string(),
            })
            .collect(),
        cleanup_number: db.cleanup_number()?,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("DriftSync Replica Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Versions:");
    println!("  Stored:        {}", result.stored_versions);
    println!("  Local branch:  {}", result.local_branch.len());
    println!("  Dirty:         {}", result.dirty_versions.len());
    println!("  Tracked files: {}", result.tracked_files);
    println!("  Cleanup:       {}", result.cleanup_number);

    print_list("Local branch", &result.local_branch);
    print_list("Dirty versions", &result.dirty_versions);
    print_list("Known databases", &result.known_databases);

    if !result.muddy_multichunks.is_empty() {
        println!();
        println!("Muddy multichunks:");
        for entry in &result.muddy_multichunks {
            println!("  {} <- {}", entry.id, entry.header);
        }
    }
}

fn print_list(title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!();
    println!("{title}:");
    for item in items {
        println!("  {item}");
    }
}
