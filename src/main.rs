#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vision_trigger_lib::run().await?;
    Ok(())
}
