#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = lms_autograder::run().await {
        eprintln!("lms-autograder fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
