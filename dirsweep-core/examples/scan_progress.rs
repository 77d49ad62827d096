use dirsweep_core::{DeleteMode, RuntimeSession, ScanMessage, SessionConfig, SessionEvent};
use std::fs;
use tempfile::TempDir;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 创建临时目录树
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();
    fs::create_dir_all(root.join("photos").join("2019"))?;
    fs::write(root.join("photos").join("Thumbs.db"), "cache")?;
    fs::create_dir_all(root.join("notes"))?;
    fs::write(root.join("notes").join("todo.txt"), "buy milk")?;

    let mut config = SessionConfig::default();
    config.scan.root = root.to_path_buf();
    config.delete.mode = DeleteMode::Simulate;

    println!("开始扫描 {}", root.display());
    let task = RuntimeSession::new(config).start_scan();
    for event in task.events() {
        match event {
            SessionEvent::Scan(ScanMessage::Found(found)) => {
                println!("  {:?}: {}", found.status, found.path.display());
            }
            SessionEvent::Scan(ScanMessage::Progress { text, .. }) => println!("  {text}"),
            SessionEvent::ScanFinished(summary) => println!(
                "扫描完成: {} 个空目录 / {} 个目录",
                summary.empty_folder_count, summary.folders_scanned
            ),
            other => println!("  {other:?}"),
        }
    }
    let session = task.join()?;

    println!("\n模拟删除...");
    let task = session.start_delete();
    for event in task.events() {
        if let SessionEvent::Deletion(update) = event {
            println!(
                "  [{}/{}] {:?} {}",
                update.index + 1,
                update.total,
                update.outcome,
                update.path.display()
            );
        }
    }
    let session = task.join()?;

    println!("\n会话日志:\n{}", session.log().as_str());
    Ok(())
}
