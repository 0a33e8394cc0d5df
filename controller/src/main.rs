mod console;
mod controller;
mod events;
mod host;
mod status;
mod store;
mod sync;
mod timers;
mod transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
