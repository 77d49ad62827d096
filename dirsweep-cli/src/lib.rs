use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use dirsweep_core::{
    ClassificationStatus, Decision, DeleteMode, DeletionFailure, DeletionOutcome, DeletionSummary,
    RealFileSystem, RuntimeSession, ScanMessage, ScanSummary, SessionConfig, SessionEvent,
    SystemRecycleBin, WorkflowStep,
};

#[derive(Parser)]
#[command(name = "dirsweep")]
#[command(about = "A tool for finding and removing empty directories")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Load settings from a TOML file (flags override it)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List empty directories below a path
    Scan {
        #[command(flatten)]
        scan: ScanArgs,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Scan, then remove the empty directories that were found
    Delete {
        #[command(flatten)]
        scan: ScanArgs,

        /// How directories are removed
        #[arg(short = 'M', long, value_enum)]
        mode: Option<DeleteModeArg>,

        /// Show what would be deleted without touching anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Keep going after errors instead of asking
        #[arg(long)]
        ignore_errors: bool,

        /// Pause after each deleted directory (milliseconds)
        #[arg(long)]
        pause_ms: Option<u64>,

        /// Directories to keep (can be specified multiple times)
        #[arg(long = "protect", action = clap::ArgAction::Append)]
        protect: Vec<PathBuf>,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

/// Options shared by every command that scans.
#[derive(Debug, Clone, Default, Args)]
pub struct ScanArgs {
    /// Directory to scan [default: the configured root, or "."]
    pub path: Option<PathBuf>,

    /// Maximum depth to scan, the root being depth 1
    #[arg(short, long)]
    pub max_depth: Option<usize>,

    /// Skip directories created less than N hours ago
    #[arg(short = 'a', long)]
    pub min_age_hours: Option<u32>,

    /// File patterns that do not keep a directory (can be specified multiple times)
    #[arg(short = 'p', long = "ignore-pattern", action = clap::ArgAction::Append)]
    pub ignore_patterns: Vec<String>,

    /// Skip directories whose path contains this text (can be specified multiple times)
    #[arg(short = 'i', long = "ignore-dir", action = clap::ArgAction::Append)]
    pub ignore_dirs: Vec<String>,

    /// Don't descend into hidden directories
    #[arg(long)]
    pub skip_hidden: bool,

    /// Descend into system directories
    #[arg(long)]
    pub include_system: bool,

    /// Treat zero-byte files as real content
    #[arg(long)]
    pub keep_empty_files: bool,

    /// Path-too-long faults tolerated before the scan is aborted
    #[arg(long)]
    pub loop_threshold: Option<usize>,

    /// Don't print per-directory scan errors
    #[arg(long)]
    pub hide_errors: bool,

    /// Print the session log when done
    #[arg(long)]
    pub show_log: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DeleteModeArg {
    /// Move to the recycle bin
    #[value(name = "recycle-bin")]
    RecycleBin,
    /// Move to the recycle bin and print every error
    #[value(name = "recycle-bin-show-errors")]
    RecycleBinShowErrors,
    /// Move to the recycle bin, asking for each directory
    #[value(name = "recycle-bin-ask")]
    RecycleBinAsk,
    /// Delete permanently
    #[value(name = "direct")]
    Direct,
    /// Touch nothing
    #[value(name = "simulate")]
    Simulate,
}

impl From<DeleteModeArg> for DeleteMode {
    fn from(arg: DeleteModeArg) -> Self {
        match arg {
            DeleteModeArg::RecycleBin => DeleteMode::RecycleBin,
            DeleteModeArg::RecycleBinShowErrors => DeleteMode::RecycleBinShowErrors,
            DeleteModeArg::RecycleBinAsk => DeleteMode::RecycleBinWithQuestion,
            DeleteModeArg::Direct => DeleteMode::Direct,
            DeleteModeArg::Simulate => DeleteMode::Simulate,
        }
    }
}

/// 删除命令的参数配置
#[derive(Debug)]
struct DeleteCommandArgs {
    mode: Option<DeleteModeArg>,
    dry_run: bool,
    ignore_errors: bool,
    pause_ms: Option<u64>,
    protect: Vec<PathBuf>,
    yes: bool,
}

/// JSON output of the scan command
#[derive(Debug, Serialize)]
struct ScanOutput<'a> {
    root: &'a Path,
    summary: ScanSummary,
    empty_folders: &'a [PathBuf],
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // 设置日志级别
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "dirsweep={log_level},dirsweep_core={log_level},dirsweep_cli={log_level}"
        ))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Scan { scan, json } => handle_scan_command(cli.config.as_deref(), scan, json),
        Commands::Delete {
            scan,
            mode,
            dry_run,
            ignore_errors,
            pause_ms,
            protect,
            yes,
        } => handle_delete_command(
            cli.config.as_deref(),
            scan,
            DeleteCommandArgs {
                mode,
                dry_run,
                ignore_errors,
                pause_ms,
                protect,
                yes,
            },
        ),
    }
}

fn handle_scan_command(config_file: Option<&Path>, args: ScanArgs, json: bool) -> Result<()> {
    let config = create_session_config(config_file, &args)?;
    let (session, summary) = run_scan(RuntimeSession::new(config), !json)?;

    if json {
        let output = ScanOutput {
            root: &session.config().scan.root,
            summary,
            empty_folders: session.empty_folders(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        display_empty_folders(session.empty_folders(), &session.config().scan.root);
    }

    if args.show_log {
        display_log(&session);
    }
    Ok(())
}

fn handle_delete_command(
    config_file: Option<&Path>,
    scan_args: ScanArgs,
    args: DeleteCommandArgs,
) -> Result<()> {
    let mut config = create_session_config(config_file, &scan_args)?;
    apply_delete_args(&mut config, &args);
    let mode = config.delete.mode;

    let session = RuntimeSession::with_backends(
        config,
        Arc::new(RealFileSystem),
        Arc::new(SystemRecycleBin::with_confirmation(|path| {
            ask(&format!("Move {} to the recycle bin?", path.display())).unwrap_or(false)
        })),
    );
    let (mut session, _) = run_scan(session, true)?;

    if session.empty_folders().is_empty() {
        println!("No empty directories found.");
        return Ok(());
    }

    println!("Found {} empty directories:", session.empty_folders().len());
    display_empty_folders(session.empty_folders(), &session.config().scan.root);

    for path in &args.protect {
        info!("保护目录: {:?}", path);
        session.protection_mut().add(path);
    }

    // 确认删除
    if !args.yes && mode != DeleteMode::Simulate && !confirm_delete(session.empty_folders(), mode)? {
        info!("用户取消删除");
        println!("Deletion cancelled.");
        return Ok(());
    }

    let mut task = session.start_delete();
    let session = loop {
        let mut rejected = None;
        let mut suspended = None;
        for event in task.events() {
            match event {
                SessionEvent::Deletion(update) => {
                    println!(
                        "[{}/{}] {:<10} {}",
                        update.index + 1,
                        update.total,
                        outcome_label(&update.outcome),
                        update.path.display()
                    );
                    if let DeletionOutcome::Warning { message } = &update.outcome {
                        println!("           {message}");
                    }
                }
                SessionEvent::DeletionSuspended(failure) => suspended = Some(failure),
                SessionEvent::Rejected(message) => rejected = Some(message),
                _ => {}
            }
        }

        let session = task.join()?;
        if let Some(message) = rejected {
            bail!("{message}");
        }

        match (session.step(), suspended) {
            (WorkflowStep::AwaitingDecision, Some(failure)) => {
                warn!("删除暂停: {:?}", failure.path);
                let decision = prompt_decision(&failure)?;
                debug!("用户选择: {:?}", decision);
                task = session.resume_deletion(decision);
            }
            _ => break session,
        }
    };

    if let Some(summary) = session.deletion_summary() {
        display_deletion_result(&summary, mode);
    }
    if scan_args.show_log {
        display_log(&session);
    }
    Ok(())
}

/// Runs a scan on a worker thread, printing progress to stderr.
fn run_scan(
    session: RuntimeSession,
    report_progress: bool,
) -> Result<(RuntimeSession, ScanSummary)> {
    let task = session.start_scan();

    let mut aborted = None;
    let mut summary = ScanSummary::default();
    for event in task.events() {
        match event {
            SessionEvent::Scan(ScanMessage::Found(found)) => {
                if let ClassificationStatus::Error { message } = &found.status {
                    eprintln!("warning: {}: {message}", found.path.display());
                }
            }
            SessionEvent::Scan(ScanMessage::Progress { text, .. }) if report_progress => {
                eprintln!("{text}");
            }
            SessionEvent::ScanFinished(finished) => summary = finished,
            SessionEvent::ScanCancelled(partial) => {
                eprintln!("Scan cancelled.");
                summary = partial;
            }
            SessionEvent::ScanAborted(message) | SessionEvent::Rejected(message) => {
                aborted = Some(message)
            }
            _ => {}
        }
    }

    let session = task.join()?;
    if let Some(message) = aborted {
        bail!("Scan failed: {message}");
    }
    Ok((session, summary))
}

fn create_session_config(config_file: Option<&Path>, args: &ScanArgs) -> Result<SessionConfig> {
    let mut config = match config_file {
        Some(path) => {
            debug!("加载配置文件: {:?}", path);
            SessionConfig::from_toml_file(path)?
        }
        None => SessionConfig::default(),
    };

    if let Some(path) = &args.path {
        config.scan.root = path.clone();
    }
    if args.max_depth.is_some() {
        config.scan.max_depth = args.max_depth;
    }
    if let Some(hours) = args.min_age_hours {
        config.scan.min_folder_age_hours = hours;
    }
    config
        .scan
        .ignore_file_patterns
        .extend(args.ignore_patterns.iter().cloned());
    config
        .scan
        .ignore_directory_substrings
        .extend(args.ignore_dirs.iter().cloned());
    if args.skip_hidden {
        config.scan.ignore_hidden_folders = true;
    }
    if args.include_system {
        config.scan.keep_system_folders = false;
    }
    if args.keep_empty_files {
        config.scan.ignore_zero_byte_files = false;
    }
    if let Some(threshold) = args.loop_threshold {
        config.scan.infinite_loop_threshold = threshold;
    }
    if args.hide_errors {
        config.hide_scan_errors = true;
    }

    Ok(config)
}

fn apply_delete_args(config: &mut SessionConfig, args: &DeleteCommandArgs) {
    if let Some(mode) = args.mode {
        config.delete.mode = mode.into();
    }
    if args.dry_run {
        config.delete.mode = DeleteMode::Simulate;
    }
    if args.ignore_errors {
        config.delete.ignore_all_errors = true;
    }
    if let Some(pause) = args.pause_ms {
        config.delete.pause_time_ms = pause;
    }
}

fn display_empty_folders(folders: &[PathBuf], base_path: &Path) {
    if folders.is_empty() {
        println!("No empty directories found.");
        return;
    }

    let base_path = std::path::absolute(base_path).unwrap_or_else(|_| base_path.to_path_buf());

    println!("\n{:<6} {}", "#", "Path");
    println!("{}", "-".repeat(60));
    for (i, folder) in folders.iter().enumerate() {
        let relative = folder.strip_prefix(&base_path).unwrap_or(folder);
        let shown = if relative.as_os_str().is_empty() {
            Path::new(".")
        } else {
            relative
        };
        println!("{:<6} {}", i + 1, shown.display());
    }
    println!("{}", "-".repeat(60));
    println!("Total: {} empty directories", folders.len());
}

fn display_deletion_result(summary: &DeletionSummary, mode: DeleteMode) {
    if mode == DeleteMode::Simulate {
        println!("\nSimulation completed (nothing was deleted).");
    } else {
        println!("\nDeletion completed!");
    }
    println!("Deleted:   {}", summary.deleted);
    println!("Protected: {}", summary.protected);
    println!("Failed:    {}", summary.failed);
    if summary.skipped() > 0 {
        println!("Skipped:   {}", summary.skipped());
    }
}

fn display_log(session: &RuntimeSession) {
    println!("\nSession log:");
    print!("{}", session.log().as_str());
}

fn outcome_label(outcome: &DeletionOutcome) -> &'static str {
    match outcome {
        DeletionOutcome::Deleted => "deleted",
        DeletionOutcome::Warning { .. } => "failed",
        DeletionOutcome::Ignored => "gone",
        DeletionOutcome::Protected => "kept",
    }
}

fn confirm_delete(folders: &[PathBuf], mode: DeleteMode) -> Result<bool> {
    let action = if mode.is_recoverable() {
        "move to the recycle bin"
    } else {
        "permanently delete"
    };
    ask(&format!("\nThis will {action} {} directories. Continue?", folders.len()))
}

fn ask(question: &str) -> Result<bool> {
    print!("{question} [y/N]: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(is_yes(&input))
}

fn is_yes(input: &str) -> bool {
    let input = input.trim().to_lowercase();
    input == "y" || input == "yes"
}

fn prompt_decision(failure: &DeletionFailure) -> Result<Decision> {
    println!(
        "\nFailed to delete {}:\n  {}",
        failure.path.display(),
        failure.message
    );

    loop {
        print!("[a]bort, [c]ontinue, or continue and [i]gnore all errors? [a/c/i]: ");
        io::stdout().flush()?;

        let mut input = String::new();
        let read = io::stdin()
            .read_line(&mut input)
            .context("Failed to read answer")?;
        if read == 0 {
            return Ok(Decision::Abort);
        }
        if let Some(decision) = parse_decision(&input) {
            return Ok(decision);
        }
    }
}

fn parse_decision(input: &str) -> Option<Decision> {
    match input.trim().to_lowercase().as_str() {
        "a" | "abort" => Some(Decision::Abort),
        "c" | "continue" => Some(Decision::Continue {
            ignore_all_errors: false,
        }),
        "i" | "ignore" => Some(Decision::Continue {
            ignore_all_errors: true,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parse_scan_command() {
        let args = vec![
            "dirsweep",
            "scan",
            "/tmp",
            "--max-depth",
            "3",
            "--ignore-pattern",
            "*.tmp",
            "--ignore-pattern",
            "/^~/",
            "--json",
        ];
        let cli = Cli::try_parse_from(args).unwrap();

        match cli.command {
            Commands::Scan { scan, json } => {
                assert_eq!(scan.path, Some(PathBuf::from("/tmp")));
                assert_eq!(scan.max_depth, Some(3));
                assert_eq!(scan.ignore_patterns, vec!["*.tmp", "/^~/"]);
                assert!(json);
            }
            _ => panic!("Expected Scan command"),
        }
    }

    #[test]
    fn test_cli_parse_delete_command() {
        let args = vec![
            "dirsweep",
            "delete",
            "/tmp",
            "--mode",
            "direct",
            "--protect",
            "/tmp/keep",
            "--pause-ms",
            "25",
            "--yes",
            "-v",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.verbose);

        match cli.command {
            Commands::Delete {
                scan,
                mode,
                protect,
                pause_ms,
                yes,
                dry_run,
                ..
            } => {
                assert_eq!(scan.path, Some(PathBuf::from("/tmp")));
                assert!(matches!(mode, Some(DeleteModeArg::Direct)));
                assert_eq!(protect, vec![PathBuf::from("/tmp/keep")]);
                assert_eq!(pause_ms, Some(25));
                assert!(yes);
                assert!(!dry_run);
            }
            _ => panic!("Expected Delete command"),
        }
    }

    #[test]
    fn test_create_session_config_overrides() {
        let config = create_session_config(
            None,
            &ScanArgs {
                path: Some(PathBuf::from("/data")),
                max_depth: Some(5),
                min_age_hours: Some(48),
                ignore_patterns: vec!["*.bak".to_string()],
                ignore_dirs: vec!["node_modules".to_string()],
                skip_hidden: true,
                include_system: true,
                keep_empty_files: true,
                loop_threshold: Some(9),
                hide_errors: true,
                show_log: false,
            },
        )
        .unwrap();

        assert_eq!(config.scan.root, PathBuf::from("/data"));
        assert_eq!(config.scan.max_depth, Some(5));
        assert_eq!(config.scan.min_folder_age_hours, 48);
        assert_eq!(
            config.scan.ignore_file_patterns.last(),
            Some(&"*.bak".to_string())
        );
        assert!(config.scan.ignore_file_patterns.contains(&"thumbs.db".to_string()));
        assert_eq!(config.scan.ignore_directory_substrings, vec!["node_modules"]);
        assert!(config.scan.ignore_hidden_folders);
        assert!(!config.scan.keep_system_folders);
        assert!(!config.scan.ignore_zero_byte_files);
        assert_eq!(config.scan.infinite_loop_threshold, 9);
        assert!(config.hide_scan_errors);
    }

    #[test]
    fn test_config_file_is_base_for_flags() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("dirsweep.toml");
        std::fs::write(
            &file,
            "root = \"/from/file\"\nmax_depth = 2\n\n[delete]\nmode = \"direct\"\n",
        )?;

        let config = create_session_config(
            Some(&file),
            &ScanArgs {
                max_depth: Some(7),
                ..Default::default()
            },
        )?;
        assert_eq!(config.scan.root, PathBuf::from("/from/file"));
        assert_eq!(config.scan.max_depth, Some(7));
        assert_eq!(config.delete.mode, DeleteMode::Direct);
        Ok(())
    }

    #[test]
    fn test_dry_run_wins_over_mode() {
        let mut config = SessionConfig::default();
        apply_delete_args(
            &mut config,
            &DeleteCommandArgs {
                mode: Some(DeleteModeArg::Direct),
                dry_run: true,
                ignore_errors: true,
                pause_ms: Some(10),
                protect: Vec::new(),
                yes: false,
            },
        );
        assert_eq!(config.delete.mode, DeleteMode::Simulate);
        assert!(config.delete.ignore_all_errors);
        assert_eq!(config.delete.pause_time_ms, 10);
    }

    #[test]
    fn test_delete_mode_conversion() {
        assert_eq!(
            DeleteMode::from(DeleteModeArg::RecycleBinAsk),
            DeleteMode::RecycleBinWithQuestion
        );
        assert_eq!(DeleteMode::from(DeleteModeArg::Simulate), DeleteMode::Simulate);
    }

    #[test]
    fn test_parse_decision() {
        assert_eq!(parse_decision("a\n"), Some(Decision::Abort));
        assert_eq!(
            parse_decision(" C "),
            Some(Decision::Continue {
                ignore_all_errors: false
            })
        );
        assert_eq!(
            parse_decision("ignore"),
            Some(Decision::Continue {
                ignore_all_errors: true
            })
        );
        assert_eq!(parse_decision("maybe"), None);
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes("YES"));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label(&DeletionOutcome::Deleted), "deleted");
        assert_eq!(
            outcome_label(&DeletionOutcome::Warning {
                message: "x".to_string()
            }),
            "failed"
        );
        assert_eq!(outcome_label(&DeletionOutcome::Protected), "kept");
    }

    #[test]
    fn test_scan_on_worker_thread() -> Result<()> {
        let temp_dir = TempDir::new()?;
        std::fs::create_dir_all(temp_dir.path().join("a").join("b"))?;
        std::fs::write(temp_dir.path().join("keep.txt"), "1")?;

        let config = create_session_config(
            None,
            &ScanArgs {
                path: Some(temp_dir.path().to_path_buf()),
                ..Default::default()
            },
        )?;
        let (session, summary) = run_scan(RuntimeSession::new(config), false)?;
        assert_eq!(session.empty_folders().len(), 2);
        assert_eq!(summary.folders_scanned, 3);

        display_empty_folders(session.empty_folders(), temp_dir.path());
        Ok(())
    }

    #[test]
    fn test_scan_of_missing_root_fails() {
        let config = create_session_config(
            None,
            &ScanArgs {
                path: Some(PathBuf::from("/nonexistent/dirsweep/root")),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(run_scan(RuntimeSession::new(config), false).is_err());
    }
}
