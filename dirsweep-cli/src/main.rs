use anyhow::Result;

fn main() -> Result<()> {
    dirsweep_cli::run_cli()
}
