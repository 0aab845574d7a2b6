mod host;
mod monitor;
mod w1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
