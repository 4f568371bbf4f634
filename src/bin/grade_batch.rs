use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: grade_batch <request.json>");
        std::process::exit(2);
    };

    if let Err(e) = lms_autograder::run_batch(&path).await {
        eprintln!("grade_batch fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
