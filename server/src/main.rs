use deskpilot_server::run_main;

fn main() -> anyhow::Result<()> {
    // Logging goes to stderr; stdout belongs to the transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        run_main().await?;
        Ok(())
    })
}
