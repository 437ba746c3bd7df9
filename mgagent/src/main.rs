#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mgagent::run_cli().await
}
