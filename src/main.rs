// ABOUTME: Binary entry point for the foreman CLI
// ABOUTME: All real work happens in cli::app

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    foreman::cli::app::run().await
}
