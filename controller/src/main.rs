#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lamp_controller::host::run().await
}
