//! Main entry point for the archiver CLI application.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;

use archiver::cli::Command;
use archiver::{
    ArchiveEntry, Cli, EntryNaming, ListOptions, PackRequest, RepairOptions, RepairStatus,
    UnpackOptions, logger,
};

/// Overall result of a command, mapped onto the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Outcome {
    Success,
    Partial,
    Failure,
}

impl Outcome {
    fn code(self) -> ExitCode {
        match self {
            Self::Success => ExitCode::SUCCESS,
            Self::Failure => ExitCode::from(1),
            Self::Partial => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.log_level());

    match run(cli).await {
        Ok(outcome) => outcome.code(),
        Err(e) => {
            log::error!("{e:#}");
            Outcome::Failure.code()
        }
    }
}

async fn run(cli: Cli) -> Result<Outcome> {
    let quiet = cli.is_quiet();
    let verbose = cli.verbose > 0;

    match cli.command {
        Command::List { password, archives } => {
            let options = ListOptions::default().password(password.get());
            let results = run_batch(&archives, no_claims, move |path| {
                archiver::list_with(path, &options)
            })
            .await?;
            let multiple = results.len() > 1;
            Ok(report_each(results, |path, entries| {
                if multiple {
                    println!("Archive: {}", path.display());
                }
                print_listing(&entries, verbose);
                Outcome::Success
            }))
        }

        Command::Pack {
            output,
            level,
            keep_paths,
            strict_password,
            password,
            files,
        } => {
            let request = PackRequest::new(dedup(&files), &output)
                .policy(level)
                .password(password.get())
                .naming(keep_paths.map_or(EntryNaming::Flatten, EntryNaming::RelativeTo))
                .reject_inert_password(strict_password);
            let report = tokio::task::spawn_blocking(move || archiver::pack(&request))
                .await
                .context("pack task failed")??;

            if !quiet {
                println!(
                    "  packed {} files into {} ({})",
                    report.entries,
                    output.display(),
                    report.format
                );
                println!(
                    "  {} -> {} ({:.1}% saved) in {:.2}s",
                    format_size(report.original_size),
                    format_size(report.compressed_size),
                    report.saved_percent(),
                    report.elapsed.as_secs_f64()
                );
                if report.password_ignored {
                    println!("  note: {} archives are stored without encryption", report.format);
                }
            }
            Ok(Outcome::Success)
        }

        Command::Unpack {
            dir,
            never_overwrite,
            password,
            archives,
        } => {
            let options = UnpackOptions::default()
                .password(password.get())
                .skip_existing(never_overwrite);
            let destination_of =
                move |path: &Path| dir.clone().unwrap_or_else(|| default_destination(path));
            let claims = destination_of.clone();
            let results = run_batch(
                &archives,
                move |path| vec![claims(path)],
                move |path| {
                    let destination = destination_of(path);
                    archiver::unpack_with(path, &destination, &options).map(|r| (destination, r))
                },
            )
            .await?;
            Ok(report_each(results, |path, (destination, report)| {
                if !quiet {
                    println!(
                        "  {}: extracted {} files, {} directories ({}) into {}",
                        path.display(),
                        report.files,
                        report.directories,
                        format_size(report.bytes),
                        destination.display()
                    );
                    if report.skipped > 0 {
                        println!("  skipped {} existing files", report.skipped);
                    }
                }
                Outcome::Success
            }))
        }

        Command::Repair { password, archives } => {
            let options = RepairOptions::default().password(password.get());
            let results = run_batch(
                &archives,
                |path| vec![path.to_path_buf(), archiver::repaired_path(path)],
                move |path| archiver::repair_with(path, &options),
            )
            .await?;
            Ok(report_each(results, |path, result| {
                if !quiet {
                    println!("  {} -> {}", path.display(), result.output.display());
                    for entry in &result.recovered {
                        println!("    recovered: {}", entry.name);
                    }
                    for failed in &result.failed {
                        println!("    dropped:   {} ({})", failed.name, failed.reason);
                    }
                }
                match result.status() {
                    RepairStatus::Complete => Outcome::Success,
                    RepairStatus::Partial => Outcome::Partial,
                }
            }))
        }

        Command::Test { password, archives } => {
            let password = password.password.filter(|p| !p.is_empty());
            let results = run_batch(&archives, no_claims, move |path| {
                archiver::verify(path, password.as_deref())
            })
            .await?;
            Ok(report_each(results, |path, report| {
                if report.is_ok() {
                    if !quiet {
                        println!("  {}: {} entries OK", path.display(), report.entries);
                    }
                    Outcome::Success
                } else {
                    for name in &report.failed {
                        println!("  {}: {} FAILED", path.display(), name);
                    }
                    Outcome::Failure
                }
            }))
        }
    }
}

/// Run `job` for each distinct archive on the blocking pool and return the
/// results in command-line order.
///
/// `claims` names the paths a job writes. Jobs that share a claimed path run
/// one after another in command-line order; everything else runs in parallel.
async fn run_batch<T, C, F>(
    archives: &[PathBuf],
    claims: C,
    job: F,
) -> Result<Vec<(PathBuf, archiver::Result<T>)>>
where
    T: Send + 'static,
    C: Fn(&Path) -> Vec<PathBuf>,
    F: Fn(&Path) -> archiver::Result<T> + Clone + Send + 'static,
{
    let archives = dedup(archives);
    let claimed: Vec<Vec<PathBuf>> = archives
        .iter()
        .map(|path| claims(path).iter().map(|p| claim_key(p)).collect())
        .collect();

    let mut set = JoinSet::new();
    for group in collision_groups(&claimed) {
        let jobs: Vec<(usize, PathBuf)> = group
            .into_iter()
            .map(|index| (index, archives[index].clone()))
            .collect();
        let job = job.clone();
        set.spawn_blocking(move || {
            jobs.into_iter()
                .map(|(index, path)| {
                    let result = job(&path);
                    (index, path, result)
                })
                .collect::<Vec<_>>()
        });
    }

    let mut results = Vec::with_capacity(archives.len());
    while let Some(joined) = set.join_next().await {
        results.extend(joined.context("archive task failed")?);
    }
    results.sort_by_key(|(index, ..)| *index);
    Ok(results
        .into_iter()
        .map(|(_, path, result)| (path, result))
        .collect())
}

/// Claims of a read-only job.
fn no_claims(_: &Path) -> Vec<PathBuf> {
    Vec::new()
}

/// Resolve a claimed path so different spellings of it compare equal.
fn claim_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Partition job indices so that jobs sharing any claimed path end up in one
/// group. Groups and the indices inside them are in ascending order.
fn collision_groups(claims: &[Vec<PathBuf>]) -> Vec<Vec<usize>> {
    fn root(parent: &mut [usize], mut index: usize) -> usize {
        while parent[index] != index {
            parent[index] = parent[parent[index]];
            index = parent[index];
        }
        index
    }

    let mut parent: Vec<usize> = (0..claims.len()).collect();
    let mut owner: HashMap<&Path, usize> = HashMap::new();
    for (index, paths) in claims.iter().enumerate() {
        for path in paths {
            match owner.get(path.as_path()) {
                Some(&other) => {
                    let (a, b) = (root(&mut parent, index), root(&mut parent, other));
                    parent[a.max(b)] = a.min(b);
                }
                None => {
                    owner.insert(path, index);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for index in 0..claims.len() {
        let group = root(&mut parent, index);
        groups.entry(group).or_default().push(index);
    }
    groups.into_values().collect()
}

/// Print errors, hand successes to `show`, and return the worst outcome.
fn report_each<T>(
    results: Vec<(PathBuf, archiver::Result<T>)>,
    mut show: impl FnMut(&Path, T) -> Outcome,
) -> Outcome {
    let mut worst = Outcome::Success;
    for (path, result) in results {
        let outcome = match result {
            Ok(value) => show(&path, value),
            Err(e) => {
                log::error!("{e}");
                Outcome::Failure
            }
        };
        worst = worst.max(outcome);
    }
    worst
}

/// Drop repeated paths, keeping the first occurrence.
fn dedup(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .iter()
        .filter(|p| seen.insert(std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())))
        .cloned()
        .collect()
}

/// Directory that holds the archive.
fn default_destination(archive: &Path) -> PathBuf {
    match archive.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Print entry names, or with `verbose` a table with sizes and ratios.
fn print_listing(entries: &[ArchiveEntry], verbose: bool) {
    if !verbose {
        for entry in entries {
            println!("{}", entry.name);
        }
        return;
    }

    println!("{:>10}  {:>10}  {:>5}  Name", "Length", "Size", "Cmpr");
    println!("{}", "-".repeat(50));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;
    for entry in entries {
        let size = entry
            .compressed_size
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        let ratio = entry
            .ratio()
            .map_or_else(|| "    -".to_string(), |r| format!("{r:>4}%"));
        println!("{:>10}  {:>10}  {}  {}", entry.size, size, ratio, entry.name);

        if !entry.is_directory {
            total_uncompressed += entry.size;
            total_compressed += entry.compressed_size.unwrap_or(0);
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(50));
    let total_ratio = if total_uncompressed > 0 && total_compressed > 0 {
        format!(
            "{:>4}%",
            100u64.saturating_sub(total_compressed * 100 / total_uncompressed)
        )
    } else {
        "    -".to_string()
    };
    println!(
        "{:>10}  {:>10}  {}  {} files",
        total_uncompressed, total_compressed, total_ratio, file_count
    );
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_picks_unit() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let paths = [
            PathBuf::from("a.zip"),
            PathBuf::from("b.zip"),
            PathBuf::from("a.zip"),
        ];
        assert_eq!(dedup(&paths), vec![PathBuf::from("a.zip"), PathBuf::from("b.zip")]);
    }

    #[test]
    fn default_destination_is_archive_directory() {
        assert_eq!(default_destination(Path::new("/data/a.zip")), Path::new("/data"));
        assert_eq!(default_destination(Path::new("a.zip")), Path::new("."));
    }

    #[test]
    fn jobs_sharing_a_path_are_grouped() {
        let claims = vec![
            vec![PathBuf::from("/out")],
            vec![PathBuf::from("/elsewhere")],
            vec![PathBuf::from("/a.zip"), PathBuf::from("/a_repaired.zip")],
            vec![PathBuf::from("/out")],
            vec![PathBuf::from("/a_repaired.zip"), PathBuf::from("/a_repaired_repaired.zip")],
            vec![],
        ];
        assert_eq!(
            collision_groups(&claims),
            vec![vec![0, 3], vec![1], vec![2, 4], vec![5]]
        );
    }

    #[tokio::test]
    async fn colliding_jobs_run_in_order() {
        use std::sync::{Arc, Mutex};
        use std::time::Duration;

        let events = Arc::new(Mutex::new(Vec::new()));
        let archives = [
            PathBuf::from("first.zip"),
            PathBuf::from("other.zip"),
            PathBuf::from("second.zip"),
        ];
        let recorder = Arc::clone(&events);
        let results = run_batch(
            &archives,
            |path| {
                let shared = path != Path::new("other.zip");
                vec![PathBuf::from(if shared { "/shared-out" } else { "/own-out" })]
            },
            move |path| {
                let name = path.display().to_string();
                recorder.lock().unwrap().push(format!("start {name}"));
                std::thread::sleep(Duration::from_millis(20));
                recorder.lock().unwrap().push(format!("end {name}"));
                Ok(name)
            },
        )
        .await
        .unwrap();

        let names: Vec<_> = results.into_iter().map(|(_, r)| r.unwrap()).collect();
        assert_eq!(names, ["first.zip", "other.zip", "second.zip"]);

        let events = events.lock().unwrap();
        let at = |event: &str| events.iter().position(|e| e == event).unwrap();
        assert!(at("end first.zip") < at("start second.zip"), "{events:?}");
    }

    #[test]
    fn worst_outcome_wins() {
        assert!(Outcome::Failure > Outcome::Partial);
        assert!(Outcome::Partial > Outcome::Success);
    }
}
