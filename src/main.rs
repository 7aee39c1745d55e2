#[tokio::main]
async fn main() -> anyhow::Result<()> {
    studylens_lib::run().await
}
