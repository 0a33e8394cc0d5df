mod actuator;
mod host;
mod sensor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
